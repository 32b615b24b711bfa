//! Substitutable regions of the original SQL text.
//!
//! Every token is anchored at a byte offset (`begin_position`) into the
//! logical SQL and covers `[begin_position, stop_position)`. Tokens that only
//! insert text (items, ORDER BY, insert column) have an empty region.

use serde::{Deserialize, Serialize};

use kestrel_common::error::{ConfigError, KestrelResult};

/// A closed set of rewrite tokens. Adding a kind is a compile-time-checked
/// change for every consumer that matches on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SqlToken {
    Table(TableToken),
    Schema(SchemaToken),
    Index(IndexToken),
    Items(ItemsToken),
    InsertValues(InsertValuesToken),
    RowCount(RowCountToken),
    Offset(OffsetToken),
    OrderBy(OrderByToken),
    InsertColumn(InsertColumnToken),
}

const KNOWN_KINDS: &[&str] = &[
    "Table",
    "Schema",
    "Index",
    "Items",
    "InsertValues",
    "RowCount",
    "Offset",
    "OrderBy",
    "InsertColumn",
];

impl SqlToken {
    pub fn begin_position(&self) -> usize {
        match self {
            SqlToken::Table(t) => t.begin_position,
            SqlToken::Schema(t) => t.begin_position,
            SqlToken::Index(t) => t.begin_position,
            SqlToken::Items(t) => t.begin_position,
            SqlToken::InsertValues(t) => t.begin_position,
            SqlToken::RowCount(t) => t.begin_position,
            SqlToken::Offset(t) => t.begin_position,
            SqlToken::OrderBy(t) => t.begin_position,
            SqlToken::InsertColumn(t) => t.begin_position,
        }
    }

    /// Exclusive end of the region of original text this token replaces.
    pub fn stop_position(&self) -> usize {
        match self {
            SqlToken::Table(t) => {
                t.begin_position + t.skipped_schema_name_length + t.original_literals.len()
            }
            SqlToken::Schema(t) => t.begin_position + t.schema_name.len(),
            SqlToken::Index(t) => t.begin_position + t.original_literals.len(),
            SqlToken::InsertValues(t) => t.stop_position,
            SqlToken::RowCount(t) => {
                t.begin_position + literal_width(t.original_literals.as_deref(), t.row_count)
            }
            SqlToken::Offset(t) => {
                t.begin_position + literal_width(t.original_literals.as_deref(), t.offset)
            }
            SqlToken::Items(_) | SqlToken::OrderBy(_) | SqlToken::InsertColumn(_) => {
                self.begin_position()
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SqlToken::Table(_) => "Table",
            SqlToken::Schema(_) => "Schema",
            SqlToken::Index(_) => "Index",
            SqlToken::Items(_) => "Items",
            SqlToken::InsertValues(_) => "InsertValues",
            SqlToken::RowCount(_) => "RowCount",
            SqlToken::Offset(_) => "Offset",
            SqlToken::OrderBy(_) => "OrderBy",
            SqlToken::InsertColumn(_) => "InsertColumn",
        }
    }
}

/// A logical table name, optionally prefixed by a schema qualifier that is
/// dropped on rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableToken {
    pub begin_position: usize,
    /// Logical table name without delimiters.
    pub table_name: String,
    /// Text as written, including delimiters such as backticks.
    pub original_literals: String,
    /// Length of a skipped `schema.` prefix in front of the literal.
    #[serde(default)]
    pub skipped_schema_name_length: usize,
}

impl TableToken {
    pub fn new(begin_position: usize, original_literals: impl Into<String>) -> Self {
        let original_literals = original_literals.into();
        Self {
            begin_position,
            table_name: trim_delimiters(&original_literals).to_string(),
            original_literals,
            skipped_schema_name_length: 0,
        }
    }

    pub fn with_skipped_schema(mut self, length: usize) -> Self {
        self.skipped_schema_name_length = length;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaToken {
    pub begin_position: usize,
    pub schema_name: String,
    /// Logical table whose data source the schema stands for.
    pub table_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexToken {
    pub begin_position: usize,
    pub original_literals: String,
    /// Owning logical table; resolved through the rule's index names if absent.
    #[serde(default)]
    pub table_name: Option<String>,
}

impl IndexToken {
    pub fn index_name(&self) -> &str {
        trim_delimiters(&self.original_literals)
    }
}

/// Extra projection items needed by the merge (e.g. ORDER BY columns that
/// are not in the select list, AVG derived COUNT/SUM columns).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsToken {
    pub begin_position: usize,
    pub items: Vec<String>,
    /// True when the first item needs no leading `, ` separator.
    #[serde(default)]
    pub first_of_items_special: bool,
}

/// The VALUES clause of an INSERT; replaced by the rows routed to each unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertValuesToken {
    pub begin_position: usize,
    pub stop_position: usize,
    pub table_name: String,
}

/// A literal LIMIT row count. `original_literals` is the text as written
/// (e.g. `010`); when absent the region is the decimal rendering of the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCountToken {
    pub begin_position: usize,
    pub row_count: i64,
    #[serde(default)]
    pub original_literals: Option<String>,
}

impl RowCountToken {
    pub fn new(begin_position: usize, row_count: i64) -> Self {
        Self {
            begin_position,
            row_count,
            original_literals: None,
        }
    }

    pub fn with_literal(mut self, literal: impl Into<String>) -> Self {
        self.original_literals = Some(literal.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetToken {
    pub begin_position: usize,
    pub offset: i64,
    #[serde(default)]
    pub original_literals: Option<String>,
}

impl OffsetToken {
    pub fn new(begin_position: usize, offset: i64) -> Self {
        Self {
            begin_position,
            offset,
            original_literals: None,
        }
    }

    pub fn with_literal(mut self, literal: impl Into<String>) -> Self {
        self.original_literals = Some(literal.into());
        self
    }
}

fn literal_width(literal: Option<&str>, value: i64) -> usize {
    match literal {
        Some(text) => text.len(),
        None => value.to_string().len(),
    }
}

/// Insertion point for a synthesized ORDER BY, at the end of the GROUP BY clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderByToken {
    pub begin_position: usize,
}

/// Literal text spliced into an INSERT column list, separator included
/// (e.g. `, order_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertColumnToken {
    pub begin_position: usize,
    pub column_name: String,
}

/// Strip one pair of identifier delimiters (`` ` ``, `"`, `[]`).
pub fn trim_delimiters(literal: &str) -> &str {
    let (open, close) = delimiters(literal);
    &literal[open.len()..literal.len() - close.len()]
}

/// The opening and closing delimiters around an identifier literal, or empty
/// strings for an unquoted identifier.
pub fn delimiters(literal: &str) -> (&'static str, &'static str) {
    let bytes = literal.as_bytes();
    if bytes.len() < 2 {
        return ("", "");
    }
    match (bytes[0], bytes[bytes.len() - 1]) {
        (b'`', b'`') => ("`", "`"),
        (b'"', b'"') => ("\"", "\""),
        (b'[', b']') => ("[", "]"),
        _ => ("", ""),
    }
}

/// Decode the parser's JSON token list. Kinds outside the closed token set
/// are rejected as configuration errors before anything is rewritten.
pub fn decode_tokens(json: &str) -> KestrelResult<Vec<SqlToken>> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(json).map_err(|e| ConfigError::MalformedTokens(e.to_string()))?;
    let mut tokens = Vec::with_capacity(raw.len());
    for value in raw {
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| ConfigError::MalformedTokens(format!("token without kind: {}", value)))?;
        if !KNOWN_KINDS.contains(&kind) {
            return Err(ConfigError::UnknownToken(kind.to_string()).into());
        }
        let token: SqlToken = serde_json::from_value(value)
            .map_err(|e| ConfigError::MalformedTokens(e.to_string()))?;
        tokens.push(token);
    }
    Ok(tokens)
}
