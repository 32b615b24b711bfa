use serde::{Deserialize, Serialize};

use kestrel_common::datum::Datum;
use kestrel_common::error::{KestrelResult, RoutingError};

use crate::token::SqlToken;

/// Statement family, as tagged by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    /// CREATE / ALTER / DROP / TRUNCATE.
    Ddl,
    /// INSERT / UPDATE / DELETE.
    Dml,
    /// SELECT.
    Dql,
    /// Administrative SHOW / DESCRIBE style statements.
    Dal,
    /// BEGIN / COMMIT / ROLLBACK / SET AUTOCOMMIT.
    Tcl,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Ddl => "ddl",
            StatementKind::Dml => "dml",
            StatementKind::Dql => "dql",
            StatementKind::Dal => "dal",
            StatementKind::Tcl => "tcl",
        }
    }

    /// Statements whose per-unit responses are row streams.
    pub fn returns_rows(&self) -> bool {
        matches!(self, StatementKind::Dql | StatementKind::Dal)
    }
}

/// One logical statement with everything the core needs from the parser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlStatement {
    pub kind: StatementKind,
    pub sql: String,
    #[serde(default)]
    pub tokens: Vec<SqlToken>,
    /// Logical tables referenced, in order of appearance.
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub conditions: ShardingConditions,
    #[serde(default)]
    pub parameters: Vec<Datum>,
    #[serde(default)]
    pub select: Option<SelectContext>,
    #[serde(default)]
    pub insert: Option<InsertContext>,
}

impl SqlStatement {
    pub fn new(kind: StatementKind, sql: impl Into<String>) -> Self {
        Self {
            kind,
            sql: sql.into(),
            tokens: Vec::new(),
            tables: Vec::new(),
            conditions: ShardingConditions::default(),
            parameters: Vec::new(),
            select: None,
            insert: None,
        }
    }

    pub fn with_tokens(mut self, tokens: Vec<SqlToken>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_conditions(mut self, conditions: ShardingConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_parameters(mut self, parameters: Vec<Datum>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_select(mut self, select: SelectContext) -> Self {
        self.select = Some(select);
        self
    }

    pub fn with_insert(mut self, insert: InsertContext) -> Self {
        self.insert = Some(insert);
        self
    }

    /// True when the statement may be served by a read replica.
    pub fn is_read_only(&self) -> bool {
        match self.kind {
            StatementKind::Dql => !self.select.as_ref().is_some_and(|s| s.for_update),
            StatementKind::Dal => true,
            _ => false,
        }
    }
}

// ── SELECT context ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// An ORDER BY or GROUP BY item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderItem {
    /// Text emitted into a synthesized ORDER BY (column, qualified column or alias).
    pub name: String,
    /// Position of the column in the result rows.
    pub index: usize,
    pub direction: OrderDirection,
}

impl OrderItem {
    pub fn asc(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(name: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            index,
            direction: OrderDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationKind {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

/// Column positions of the COUNT and SUM columns derived for an AVG item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAvg {
    pub count_index: usize,
    pub sum_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationItem {
    pub kind: AggregationKind,
    /// Position of the aggregate in the result rows.
    pub index: usize,
    /// Required for AVG: shards cannot average averages.
    #[serde(default)]
    pub derived: Option<DerivedAvg>,
}

impl AggregationItem {
    pub fn new(kind: AggregationKind, index: usize) -> Self {
        Self {
            kind,
            index,
            derived: None,
        }
    }

    pub fn avg(index: usize, count_index: usize, sum_index: usize) -> Self {
        Self {
            kind: AggregationKind::Avg,
            index,
            derived: Some(DerivedAvg {
                count_index,
                sum_index,
            }),
        }
    }
}

/// A LIMIT/OFFSET operand: a literal or a bind parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitValue {
    pub value: i64,
    /// Index into the statement parameters when the operand is `?`.
    #[serde(default)]
    pub parameter_index: Option<usize>,
}

impl LimitValue {
    pub fn literal(value: i64) -> Self {
        Self {
            value,
            parameter_index: None,
        }
    }

    pub fn parameter(parameter_index: usize) -> Self {
        Self {
            value: -1,
            parameter_index: Some(parameter_index),
        }
    }

    /// The operand value, looked up in `parameters` when bound.
    pub fn resolve(&self, parameters: &[Datum]) -> KestrelResult<i64> {
        match self.parameter_index {
            None => Ok(self.value),
            Some(idx) => parameters
                .get(idx)
                .and_then(Datum::as_i64)
                .ok_or_else(|| RoutingError::ParamMissing(idx).into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    #[serde(default)]
    pub offset: Option<LimitValue>,
    #[serde(default)]
    pub row_count: Option<LimitValue>,
    /// Whether the dialect's row count must absorb the offset when the
    /// offset is reset to 0 on each shard (true for LIMIT/OFFSET dialects).
    #[serde(default = "default_true")]
    pub rewrite_row_count: bool,
}

fn default_true() -> bool {
    true
}

impl Limit {
    pub fn new(offset: Option<i64>, row_count: Option<i64>) -> Self {
        Self {
            offset: offset.map(LimitValue::literal),
            row_count: row_count.map(LimitValue::literal),
            rewrite_row_count: true,
        }
    }

    pub fn offset_value(&self, parameters: &[Datum]) -> KestrelResult<i64> {
        match &self.offset {
            Some(v) => Ok(v.resolve(parameters)?.max(0)),
            None => Ok(0),
        }
    }

    pub fn row_count_value(&self, parameters: &[Datum]) -> KestrelResult<Option<i64>> {
        match &self.row_count {
            Some(v) => Ok(Some(v.resolve(parameters)?.max(0))),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectContext {
    #[serde(default)]
    pub order_by_items: Vec<OrderItem>,
    #[serde(default)]
    pub group_by_items: Vec<OrderItem>,
    #[serde(default)]
    pub aggregation_items: Vec<AggregationItem>,
    #[serde(default)]
    pub limit: Option<Limit>,
    /// Number of columns the client asked for; derived columns beyond it
    /// are trimmed from merged rows.
    #[serde(default)]
    pub visible_column_count: Option<usize>,
    #[serde(default)]
    pub for_update: bool,
}

impl SelectContext {
    pub fn has_group_by_or_aggregation(&self) -> bool {
        !self.group_by_items.is_empty() || !self.aggregation_items.is_empty()
    }

    /// ORDER BY items each shard sorts by: the declared ones, or the
    /// GROUP BY items when no ORDER BY was written.
    pub fn effective_order_by(&self) -> &[OrderItem] {
        if self.order_by_items.is_empty() {
            &self.group_by_items
        } else {
            &self.order_by_items
        }
    }

    /// True when grouped rows arrive from every shard already sorted by the
    /// group key, so groups can be folded while streaming.
    pub fn is_same_group_by_and_order_by(&self) -> bool {
        !self.group_by_items.is_empty() && self.group_by_items == self.effective_order_by()
    }
}

// ── INSERT context ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InsertValueExpr {
    Literal(Datum),
    Parameter(usize),
    /// Opaque expression text copied verbatim (e.g. `NOW()`).
    Expression(String),
}

impl InsertValueExpr {
    fn to_sql(&self) -> String {
        match self {
            InsertValueExpr::Literal(d) => d.to_sql_literal(),
            InsertValueExpr::Parameter(_) => "?".to_string(),
            InsertValueExpr::Expression(text) => text.clone(),
        }
    }
}

/// One parenthesized row of a VALUES clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertValue {
    pub expressions: Vec<InsertValueExpr>,
}

impl InsertValue {
    pub fn new(expressions: Vec<InsertValueExpr>) -> Self {
        Self { expressions }
    }

    pub fn to_sql(&self) -> String {
        let parts: Vec<String> = self.expressions.iter().map(InsertValueExpr::to_sql).collect();
        format!("({})", parts.join(", "))
    }

    /// Statement parameter indices referenced by this row, in order.
    pub fn parameter_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.expressions.iter().filter_map(|e| match e {
            InsertValueExpr::Parameter(idx) => Some(*idx),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertContext {
    pub table_name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    pub values: Vec<InsertValue>,
}

impl InsertContext {
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))
    }
}

// ── Sharding conditions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShardingOperand {
    Literal(Datum),
    Parameter(usize),
}

impl ShardingOperand {
    pub fn resolve<'a>(&'a self, parameters: &'a [Datum]) -> KestrelResult<&'a Datum> {
        match self {
            ShardingOperand::Literal(d) => Ok(d),
            ShardingOperand::Parameter(idx) => parameters
                .get(*idx)
                .ok_or_else(|| RoutingError::ParamMissing(*idx).into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBound {
    pub value: ShardingOperand,
    pub inclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ShardingPredicate {
    /// `col = v` or `col IN (v1, v2, ...)`.
    Equal(Vec<ShardingOperand>),
    /// `col BETWEEN a AND b`, `col > a`, ...
    Range {
        lower: Option<RangeBound>,
        upper: Option<RangeBound>,
    },
}

/// A predicate on one sharding column of one logical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardingValue {
    pub logical_table: String,
    pub column: String,
    pub predicate: ShardingPredicate,
}

impl ShardingValue {
    pub fn equal(table: impl Into<String>, column: impl Into<String>, value: Datum) -> Self {
        Self {
            logical_table: table.into(),
            column: column.into(),
            predicate: ShardingPredicate::Equal(vec![ShardingOperand::Literal(value)]),
        }
    }

    pub fn in_list(table: impl Into<String>, column: impl Into<String>, values: Vec<Datum>) -> Self {
        Self {
            logical_table: table.into(),
            column: column.into(),
            predicate: ShardingPredicate::Equal(
                values.into_iter().map(ShardingOperand::Literal).collect(),
            ),
        }
    }

    pub fn between(
        table: impl Into<String>,
        column: impl Into<String>,
        lower: Datum,
        upper: Datum,
    ) -> Self {
        Self {
            logical_table: table.into(),
            column: column.into(),
            predicate: ShardingPredicate::Range {
                lower: Some(RangeBound {
                    value: ShardingOperand::Literal(lower),
                    inclusive: true,
                }),
                upper: Some(RangeBound {
                    value: ShardingOperand::Literal(upper),
                    inclusive: true,
                }),
            },
        }
    }
}

/// AND-ed sharding values. For INSERT, one condition per value row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardingCondition {
    pub values: Vec<ShardingValue>,
    /// Index of the VALUES row this condition was extracted from.
    #[serde(default)]
    pub insert_row: Option<usize>,
}

impl ShardingCondition {
    pub fn new(values: Vec<ShardingValue>) -> Self {
        Self {
            values,
            insert_row: None,
        }
    }

    pub fn for_insert_row(row: usize, values: Vec<ShardingValue>) -> Self {
        Self {
            values,
            insert_row: Some(row),
        }
    }

    pub fn value_for(&self, logical_table: &str, column: &str) -> Option<&ShardingValue> {
        self.values.iter().find(|v| {
            v.logical_table.eq_ignore_ascii_case(logical_table)
                && v.column.eq_ignore_ascii_case(column)
        })
    }
}

/// OR-ed sharding conditions. Empty means nothing narrows the candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardingConditions {
    pub conditions: Vec<ShardingCondition>,
}

impl ShardingConditions {
    pub fn new(conditions: Vec<ShardingCondition>) -> Self {
        Self { conditions }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_order_by_falls_back_to_group_by() {
        let select = SelectContext {
            group_by_items: vec![OrderItem::asc("user_id", 0)],
            ..Default::default()
        };
        assert_eq!(select.effective_order_by(), &[OrderItem::asc("user_id", 0)]);
        assert!(select.is_same_group_by_and_order_by());
    }

    #[test]
    fn test_group_by_and_order_by_mismatch() {
        let select = SelectContext {
            group_by_items: vec![OrderItem::asc("user_id", 0)],
            order_by_items: vec![OrderItem::desc("cnt", 1)],
            aggregation_items: vec![AggregationItem::new(AggregationKind::Count, 1)],
            ..Default::default()
        };
        assert!(select.has_group_by_or_aggregation());
        assert!(!select.is_same_group_by_and_order_by());
    }

    #[test]
    fn test_aggregation_without_group_by_is_not_aligned() {
        let select = SelectContext {
            aggregation_items: vec![AggregationItem::new(AggregationKind::Sum, 0)],
            ..Default::default()
        };
        assert!(!select.is_same_group_by_and_order_by());
    }

    #[test]
    fn test_limit_resolves_parameters() {
        let limit = Limit {
            offset: Some(LimitValue::parameter(1)),
            row_count: Some(LimitValue::parameter(2)),
            rewrite_row_count: true,
        };
        let params = vec![Datum::Int32(9), Datum::Int64(5), Datum::Int64(10)];
        assert_eq!(limit.offset_value(&params).unwrap(), 5);
        assert_eq!(limit.row_count_value(&params).unwrap(), Some(10));
        assert!(limit.offset_value(&[]).is_err());
    }

    #[test]
    fn test_insert_value_sql_and_parameters() {
        let row = InsertValue::new(vec![
            InsertValueExpr::Parameter(0),
            InsertValueExpr::Literal(Datum::Text("it's".into())),
            InsertValueExpr::Expression("NOW()".into()),
            InsertValueExpr::Parameter(1),
        ]);
        assert_eq!(row.to_sql(), "(?, 'it''s', NOW(), ?)");
        assert_eq!(row.parameter_indices().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_read_only_classification() {
        let select = SqlStatement::new(StatementKind::Dql, "SELECT 1");
        assert!(select.is_read_only());
        let locking = SqlStatement::new(StatementKind::Dql, "SELECT 1 FOR UPDATE").with_select(
            SelectContext {
                for_update: true,
                ..Default::default()
            },
        );
        assert!(!locking.is_read_only());
        assert!(!SqlStatement::new(StatementKind::Dml, "DELETE FROM t").is_read_only());
    }

    #[test]
    fn test_condition_lookup_is_case_insensitive() {
        let cond = ShardingCondition::new(vec![ShardingValue::equal(
            "T_ORDER",
            "Order_Id",
            Datum::Int64(1),
        )]);
        assert!(cond.value_for("t_order", "order_id").is_some());
        assert!(cond.value_for("t_order", "user_id").is_none());
    }
}
