use kestrel_common::datum::Datum;
use kestrel_common::error::{ConfigError, KestrelError, KestrelResult, RoutingError};
use kestrel_routing::{RoutingResult, RoutingUnit, ShardingRule};
use kestrel_sql_frontend::token::delimiters;
use kestrel_sql_frontend::{SqlStatement, SqlToken};

use crate::builder::{Placeholder, SqlBuilder};
use crate::pagination::PaginationRewrite;
use crate::sql_unit::SqlUnit;

/// Rewrites one logical statement for each of its routing units.
///
/// Token handling that does not depend on the unit (pagination, extra
/// projection items, ORDER BY, inserted columns) is resolved once in
/// [`SqlRewriteEngine::new`]; table, schema, index and VALUES regions are
/// resolved per unit in [`SqlRewriteEngine::generate_sql`].
#[derive(Debug)]
pub struct SqlRewriteEngine<'a> {
    rule: &'a ShardingRule,
    stmt: &'a SqlStatement,
    builder: SqlBuilder,
    parameters: Vec<Datum>,
    insert_layout: Option<InsertParameterLayout>,
}

/// Positions of the statement parameters relative to the VALUES rows.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InsertParameterLayout {
    before: Vec<usize>,
    rows: Vec<Vec<usize>>,
    after: Vec<usize>,
}

impl<'a> SqlRewriteEngine<'a> {
    pub fn new(
        rule: &'a ShardingRule,
        stmt: &'a SqlStatement,
        is_single_routing: bool,
    ) -> KestrelResult<Self> {
        let pagination = match &stmt.select {
            Some(select) => match &select.limit {
                Some(limit) => Some(PaginationRewrite::new(
                    select,
                    limit,
                    &stmt.parameters,
                    is_single_routing,
                )?),
                None => None,
            },
            None => None,
        };

        let mut parameters = stmt.parameters.clone();
        if let (Some(p), Some(limit)) = (
            &pagination,
            stmt.select.as_ref().and_then(|s| s.limit.as_ref()),
        ) {
            p.revise_parameters(limit, &mut parameters)?;
        }

        let mut engine = Self {
            rule,
            stmt,
            builder: SqlBuilder::new(),
            parameters,
            insert_layout: insert_layout(stmt),
        };
        engine.build(pagination.as_ref(), is_single_routing)?;
        Ok(engine)
    }

    pub fn sql_builder(&self) -> &SqlBuilder {
        &self.builder
    }

    fn build(
        &mut self,
        pagination: Option<&PaginationRewrite>,
        is_single_routing: bool,
    ) -> KestrelResult<()> {
        let stmt = self.stmt;
        let sql = stmt.sql.as_str();
        if stmt.tokens.is_empty() {
            self.builder.append_literal(sql);
            return Ok(());
        }

        let mut tokens: Vec<&SqlToken> = stmt.tokens.iter().collect();
        tokens.sort_by_key(|t| (t.begin_position(), t.stop_position(), kind_rank(t)));

        let mut cursor = 0usize;
        for token in tokens {
            let begin = token.begin_position();
            let stop = token.stop_position();
            if stop > sql.len() || !sql.is_char_boundary(begin) || !sql.is_char_boundary(stop) {
                return Err(ConfigError::TokenOutOfRange {
                    begin,
                    sql_len: sql.len(),
                }
                .into());
            }
            if begin < cursor {
                return Err(ConfigError::OverlappingToken {
                    begin,
                    previous_stop: cursor,
                }
                .into());
            }
            self.builder.append_literal(&sql[cursor..begin]);

            match token {
                SqlToken::Table(t) => {
                    let (open, close) = delimiters(&t.original_literals);
                    self.builder.append_placeholder(Placeholder::Table {
                        logical_table: t.table_name.to_lowercase(),
                        open,
                        close,
                    });
                }
                SqlToken::Schema(t) => {
                    self.builder.append_placeholder(Placeholder::Schema {
                        logical_table: t.table_name.to_lowercase(),
                    });
                }
                SqlToken::Index(t) => {
                    let index_name = t.index_name().to_lowercase();
                    let logical_table = match &t.table_name {
                        Some(table) => table.to_lowercase(),
                        None => self
                            .rule
                            .find_logic_table_by_index(&index_name)
                            .map(str::to_string)
                            .ok_or_else(|| ConfigError::UnknownIndex(index_name.clone()))?,
                    };
                    let (open, close) = delimiters(&t.original_literals);
                    self.builder.append_placeholder(Placeholder::Index {
                        index_name,
                        logical_table,
                        open,
                        close,
                    });
                }
                SqlToken::Items(t) if t.items.is_empty() => {}
                SqlToken::Items(t) => {
                    let joined = t.items.join(", ");
                    if t.first_of_items_special {
                        self.builder.append_literal(&joined);
                    } else {
                        self.builder.append_literal(&format!(", {}", joined));
                    }
                }
                SqlToken::InsertValues(_) => {
                    if stmt.insert.is_none() {
                        return Err(ConfigError::MissingContext("INSERT values").into());
                    }
                    self.builder.append_placeholder(Placeholder::InsertValues);
                }
                SqlToken::RowCount(t) => {
                    let text = match pagination {
                        Some(p) => p.revised_row_count(t.row_count),
                        None if is_single_routing => t.row_count,
                        None => return Err(ConfigError::MissingContext("LIMIT").into()),
                    };
                    self.builder.append_literal(&text.to_string());
                }
                SqlToken::Offset(t) => {
                    let text = match pagination {
                        Some(p) => p.revised_offset(t.offset),
                        None if is_single_routing => t.offset,
                        None => return Err(ConfigError::MissingContext("LIMIT").into()),
                    };
                    self.builder.append_literal(&text.to_string());
                }
                SqlToken::OrderBy(_) => {
                    let items = stmt
                        .select
                        .as_ref()
                        .map(|s| s.effective_order_by())
                        .filter(|items| !items.is_empty())
                        .ok_or(ConfigError::MissingContext("ORDER BY items"))?;
                    let rendered: Vec<String> = items
                        .iter()
                        .map(|i| format!("{} {}", i.name, i.direction.as_sql()))
                        .collect();
                    self.builder
                        .append_literal(&format!(" ORDER BY {}", rendered.join(", ")));
                }
                SqlToken::InsertColumn(t) => {
                    self.builder.append_literal(&t.column_name);
                }
            }
            cursor = stop;
        }
        self.builder.append_literal(&sql[cursor..]);
        Ok(())
    }

    /// Physical SQL and parameters for one unit.
    pub fn generate_sql(&self, unit: &RoutingUnit) -> KestrelResult<SqlUnit> {
        let sql = self.builder.to_sql(|p| self.resolve(p, unit))?;
        Ok(SqlUnit::new(sql, self.unit_parameters(unit)?))
    }

    fn resolve(&self, placeholder: &Placeholder, unit: &RoutingUnit) -> KestrelResult<String> {
        match placeholder {
            Placeholder::Table {
                logical_table,
                open,
                close,
            } => {
                let actual = self
                    .actual_table(unit, logical_table)?
                    .unwrap_or_else(|| logical_table.clone());
                Ok(format!("{}{}{}", open, actual, close))
            }
            Placeholder::Schema { .. } => Ok(unit.data_source_name.clone()),
            Placeholder::Index {
                index_name,
                logical_table,
                open,
                close,
            } => Ok(match self.actual_table(unit, logical_table)? {
                Some(actual) => format!("{}{}_{}{}", open, index_name, actual, close),
                None => format!("{}{}{}", open, index_name, close),
            }),
            Placeholder::InsertValues => self.insert_values(unit),
        }
    }

    /// The unit's actual table for `logical_table`: its own mapping first,
    /// then the co-located table of a bound table the unit does map.
    fn actual_table(&self, unit: &RoutingUnit, logical_table: &str) -> KestrelResult<Option<String>> {
        if let Some(actual) = unit.find_actual_table(logical_table) {
            return Ok(Some(actual.to_string()));
        }
        let Some(binding) = self.rule.binding_rule(logical_table) else {
            return Ok(None);
        };
        for table_unit in &unit.table_units {
            if binding.contains(&table_unit.logical_table_name) {
                let actual = self.rule.binding_actual_table(
                    &unit.data_source_name,
                    logical_table,
                    &table_unit.logical_table_name,
                    &table_unit.actual_table_name,
                )?;
                return Ok(Some(actual));
            }
        }
        Ok(None)
    }

    fn insert_values(&self, unit: &RoutingUnit) -> KestrelResult<String> {
        let insert = self
            .stmt
            .insert
            .as_ref()
            .ok_or(ConfigError::MissingContext("INSERT values"))?;
        let rows: Vec<usize> = match &unit.insert_rows {
            Some(rows) => rows.clone(),
            None => (0..insert.values.len()).collect(),
        };
        let mut rendered = Vec::with_capacity(rows.len());
        for row in rows {
            let value = insert.values.get(row).ok_or_else(|| {
                KestrelError::internal_bug(
                    "REWRITE_INSERT_ROW",
                    format!("routed insert row {} does not exist", row),
                    format!("unit={} rows={}", unit, insert.values.len()),
                )
            })?;
            rendered.push(value.to_sql());
        }
        Ok(format!("VALUES {}", rendered.join(", ")))
    }

    fn unit_parameters(&self, unit: &RoutingUnit) -> KestrelResult<Vec<Datum>> {
        let (Some(layout), Some(rows)) = (&self.insert_layout, &unit.insert_rows) else {
            return Ok(self.parameters.clone());
        };
        let mut indices: Vec<usize> = layout.before.clone();
        for row in rows {
            if let Some(row_params) = layout.rows.get(*row) {
                indices.extend(row_params.iter().copied());
            }
        }
        indices.extend(layout.after.iter().copied());
        indices
            .into_iter()
            .map(|idx| {
                self.parameters
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| RoutingError::ParamMissing(idx).into())
            })
            .collect()
    }
}

/// Tie-breaker for tokens sharing a region, so the result does not depend
/// on the order the parser listed them in.
fn kind_rank(token: &SqlToken) -> u8 {
    match token {
        SqlToken::Table(_) => 0,
        SqlToken::Schema(_) => 1,
        SqlToken::Index(_) => 2,
        SqlToken::Items(_) => 3,
        SqlToken::InsertValues(_) => 4,
        SqlToken::RowCount(_) => 5,
        SqlToken::Offset(_) => 6,
        SqlToken::OrderBy(_) => 7,
        SqlToken::InsertColumn(_) => 8,
    }
}

fn insert_layout(stmt: &SqlStatement) -> Option<InsertParameterLayout> {
    let insert = stmt.insert.as_ref()?;
    let rows: Vec<Vec<usize>> = insert
        .values
        .iter()
        .map(|v| v.parameter_indices().collect())
        .collect();
    let first = rows.iter().flatten().min().copied()?;
    let in_rows = |idx: &usize| rows.iter().any(|r| r.contains(idx));
    let (before, after): (Vec<usize>, Vec<usize>) = (0..stmt.parameters.len())
        .filter(|idx| !in_rows(idx))
        .partition(|idx| *idx < first);
    Some(InsertParameterLayout {
        before,
        rows,
        after,
    })
}

/// Rewrite `stmt` for every unit of `routing`, in unit order.
pub fn rewrite(
    rule: &ShardingRule,
    stmt: &SqlStatement,
    routing: &RoutingResult,
) -> KestrelResult<Vec<(RoutingUnit, SqlUnit)>> {
    let engine = SqlRewriteEngine::new(rule, stmt, routing.is_single_routing())?;
    let mut out = Vec::with_capacity(routing.len());
    for unit in &routing.units {
        out.push((unit.clone(), engine.generate_sql(unit)?));
    }
    tracing::debug!(units = out.len(), tokens = stmt.tokens.len(), "Rewrote statement");
    Ok(out)
}
