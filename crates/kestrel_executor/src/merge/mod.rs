//! Merge engine: turns the per-unit responses of one statement into the
//! single result the client sees.
//!
//! Writes are summed. Row results become a pull-based [`QueryResult`]
//! built from layered iterators:
//!
//! ```text
//!   unit rows ─┬─ OrderByStreamMerger (ORDER BY present)
//!              └─ IteratorStreamMerger (unit order)
//!        │
//!        ├─ aggregate_all / GroupByStreamMerger / group_in_memory
//!        ├─ LimitDecorator (client OFFSET/LIMIT)
//!        └─ visible-column trim
//! ```
//!
//! A result is a single forward pass; it cannot be restarted.

pub mod compare;
pub mod group_by;
pub mod pagination;
pub mod stream;

use std::fmt;

use kestrel_common::config::ExecutorConfig;
use kestrel_common::datum::{Datum, OwnedRow};
use kestrel_common::error::{ExecutionError, KestrelError, KestrelResult};
use kestrel_common::types::ColumnMeta;
use kestrel_routing::GeneratedKey;
use kestrel_sql_frontend::{SelectContext, SqlStatement, StatementKind};

use crate::response::ShardResponse;

use self::group_by::{aggregate_all, group_in_memory, AggregationPlan, GroupByStreamMerger};
use self::pagination::LimitWindow;
use self::stream::{IteratorStreamMerger, OrderByStreamMerger};

type RowIter = Box<dyn Iterator<Item = OwnedRow> + Send>;

/// Outcome of a write, DDL or transaction-control statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    /// Keys generated by the engine for an INSERT that omitted them.
    pub generated_keys: Option<GeneratedKey>,
}

/// Merged row stream with a cursor on top.
pub struct QueryResult {
    columns: Vec<ColumnMeta>,
    rows: RowIter,
    current: Option<OwnedRow>,
}

impl QueryResult {
    pub fn new(columns: Vec<ColumnMeta>, rows: impl Iterator<Item = OwnedRow> + Send + 'static) -> Self {
        Self {
            columns,
            rows: Box::new(rows),
            current: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), std::iter::empty())
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Move the cursor to the next row. Returns false once exhausted.
    pub fn advance(&mut self) -> bool {
        self.current = self.rows.next();
        self.current.is_some()
    }

    /// Value of `column` in the row under the cursor.
    pub fn value_at(&self, column: usize) -> KestrelResult<&Datum> {
        let row = self.current.as_ref().ok_or_else(|| {
            KestrelError::Internal("value_at called without a current row".into())
        })?;
        row.get(column)
            .ok_or_else(|| ExecutionError::ColumnOutOfBounds(column).into())
    }

    pub fn current_row(&self) -> Option<&OwnedRow> {
        self.current.as_ref()
    }
}

/// Pulls the rows that follow the cursor position.
impl Iterator for QueryResult {
    type Item = OwnedRow;

    fn next(&mut self) -> Option<OwnedRow> {
        self.current = None;
        self.rows.next()
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("columns", &self.columns)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum MergedResult {
    Update(UpdateResult),
    Query(QueryResult),
}

impl MergedResult {
    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            MergedResult::Update(update) => Some(update.affected_rows),
            MergedResult::Query(_) => None,
        }
    }

    pub fn into_query(self) -> Option<QueryResult> {
        match self {
            MergedResult::Query(query) => Some(query),
            MergedResult::Update(_) => None,
        }
    }

    pub fn into_update(self) -> Option<UpdateResult> {
        match self {
            MergedResult::Update(update) => Some(update),
            MergedResult::Query(_) => None,
        }
    }

    /// Result of a statement that routed to no unit at all.
    pub fn trivial(kind: StatementKind) -> Self {
        if kind.returns_rows() {
            MergedResult::Query(QueryResult::empty())
        } else {
            MergedResult::Update(UpdateResult::default())
        }
    }
}

/// Merge the responses of `stmt`, given in unit order.
pub fn merge(
    stmt: &SqlStatement,
    responses: Vec<ShardResponse>,
    config: &ExecutorConfig,
) -> KestrelResult<MergedResult> {
    match stmt.kind {
        StatementKind::Tcl => Ok(MergedResult::Update(UpdateResult::default())),
        StatementKind::Dml | StatementKind::Ddl => merge_updates(responses).map(MergedResult::Update),
        StatementKind::Dql | StatementKind::Dal => {
            merge_queries(stmt, responses, config).map(MergedResult::Query)
        }
    }
}

fn merge_updates(responses: Vec<ShardResponse>) -> KestrelResult<UpdateResult> {
    let mut merged = UpdateResult::default();
    for (index, response) in responses.into_iter().enumerate() {
        match response {
            ShardResponse::Update {
                affected_rows,
                last_insert_id,
            } => {
                merged.affected_rows += affected_rows;
                if last_insert_id != 0 {
                    merged.last_insert_id = last_insert_id;
                }
            }
            other => {
                return Err(ExecutionError::UnexpectedResponse {
                    index,
                    expected: "update",
                    got: other.kind_name(),
                }
                .into())
            }
        }
    }
    Ok(merged)
}

fn merge_queries(
    stmt: &SqlStatement,
    responses: Vec<ShardResponse>,
    config: &ExecutorConfig,
) -> KestrelResult<QueryResult> {
    let mut columns: Option<Vec<ColumnMeta>> = None;
    let mut units = Vec::with_capacity(responses.len());
    for (index, response) in responses.into_iter().enumerate() {
        match response {
            ShardResponse::Query { columns: cols, rows } => {
                if columns.is_none() {
                    columns = Some(cols);
                }
                units.push(rows);
            }
            other => {
                return Err(ExecutionError::UnexpectedResponse {
                    index,
                    expected: "query",
                    got: other.kind_name(),
                }
                .into())
            }
        }
    }
    let Some(mut columns) = columns else {
        return Ok(QueryResult::empty());
    };
    let column_count = columns.len();

    let rows: RowIter = match stmt.select.as_ref() {
        // The lone unit already grouped, sorted and paginated its rows.
        _ if units.len() == 1 => Box::new(units.into_iter().flatten()),
        None => Box::new(IteratorStreamMerger::new(units)),
        Some(select) => merge_select(stmt, select, units, column_count, config)?,
    };

    let visible = stmt
        .select
        .as_ref()
        .and_then(|s| s.visible_column_count)
        .filter(|v| *v < column_count);
    match visible {
        Some(visible) => {
            columns.truncate(visible);
            let rows = rows.map(move |mut row| {
                row.values.truncate(visible);
                row
            });
            Ok(QueryResult::new(columns, rows))
        }
        None => Ok(QueryResult::new(columns, rows)),
    }
}

fn merge_select(
    stmt: &SqlStatement,
    select: &SelectContext,
    units: Vec<Vec<OwnedRow>>,
    column_count: usize,
    config: &ExecutorConfig,
) -> KestrelResult<RowIter> {
    let order_by = select.effective_order_by();
    let rows: RowIter = if select.has_group_by_or_aggregation() {
        let plan = AggregationPlan::new(&select.aggregation_items)?;
        if select.group_by_items.is_empty() {
            let row = aggregate_all(IteratorStreamMerger::new(units), &plan, column_count);
            Box::new(std::iter::once(row))
        } else if select.is_same_group_by_and_order_by() {
            let sorted = OrderByStreamMerger::new(units, order_by);
            Box::new(GroupByStreamMerger::new(
                sorted,
                select.group_by_items.clone(),
                plan,
            ))
        } else {
            let grouped = group_in_memory(
                IteratorStreamMerger::new(units),
                &select.group_by_items,
                &select.order_by_items,
                &plan,
                config.max_rows_buffered,
            )?;
            Box::new(grouped.into_iter())
        }
    } else if order_by.is_empty() {
        Box::new(IteratorStreamMerger::new(units))
    } else {
        Box::new(OrderByStreamMerger::new(units, order_by))
    };

    match select.limit.as_ref() {
        Some(limit) => {
            let window = LimitWindow::resolve(limit, &stmt.parameters)?;
            Ok(Box::new(window.apply(rows)))
        }
        None => Ok(rows),
    }
}
