//! GROUP BY and aggregation folding across units.

use std::cmp::Ordering;
use std::collections::HashMap;

use kestrel_common::datum::{Datum, OwnedRow};
use kestrel_common::error::{ConfigError, ExecutionError, KestrelResult};
use kestrel_sql_frontend::{AggregationItem, AggregationKind, OrderItem};

use super::compare::{cmp_datum, compare_rows, datum_add, encode_group_key};

/// How each aggregate column of a grouped row folds with the same column of
/// another row from a different unit.
#[derive(Debug, Clone, Default)]
pub struct AggregationPlan {
    folds: Vec<(usize, AggregationKind)>,
    /// (avg column, count column, sum column)
    averages: Vec<(usize, usize, usize)>,
}

impl AggregationPlan {
    pub fn new(items: &[AggregationItem]) -> KestrelResult<Self> {
        let mut plan = AggregationPlan::default();
        for item in items {
            match item.kind {
                AggregationKind::Avg => {
                    let derived = item
                        .derived
                        .ok_or(ConfigError::MissingContext("derived COUNT/SUM columns for AVG"))?;
                    plan.averages
                        .push((item.index, derived.count_index, derived.sum_index));
                    plan.add_fold(derived.count_index, AggregationKind::Count);
                    plan.add_fold(derived.sum_index, AggregationKind::Sum);
                }
                kind => plan.add_fold(item.index, kind),
            }
        }
        Ok(plan)
    }

    fn add_fold(&mut self, index: usize, kind: AggregationKind) {
        if !self.folds.iter().any(|(i, _)| *i == index) {
            self.folds.push((index, kind));
        }
    }

    /// Fold `row` into `acc`. Both rows belong to the same group.
    pub fn fold(&self, acc: &mut OwnedRow, row: &OwnedRow) {
        for &(index, kind) in &self.folds {
            let (Some(current), Some(incoming)) = (acc.values.get(index), row.values.get(index)) else {
                continue;
            };
            let folded = match kind {
                AggregationKind::Sum | AggregationKind::Count => datum_add(current, incoming),
                AggregationKind::Min => pick(current, incoming, Ordering::Less),
                AggregationKind::Max => pick(current, incoming, Ordering::Greater),
                AggregationKind::Avg => continue,
            };
            acc.values[index] = folded;
        }
    }

    /// Compute AVG columns from their folded COUNT and SUM columns.
    pub fn finish(&self, row: &mut OwnedRow) {
        for &(index, count_index, sum_index) in &self.averages {
            let count = row.values.get(count_index).and_then(Datum::as_f64);
            let sum = row.values.get(sum_index).and_then(Datum::as_f64);
            let avg = match (sum, count) {
                (Some(sum), Some(count)) if count != 0.0 => Datum::Float64(sum / count),
                _ => Datum::Null,
            };
            if let Some(slot) = row.values.get_mut(index) {
                *slot = avg;
            }
        }
    }
}

/// MIN/MAX skip NULLs: a NULL only survives when every input is NULL.
fn pick(current: &Datum, incoming: &Datum, wanted: Ordering) -> Datum {
    if incoming.is_null() {
        return current.clone();
    }
    if current.is_null() || cmp_datum(incoming, current) == wanted {
        return incoming.clone();
    }
    current.clone()
}

/// Folds every input row into one. Aggregation without GROUP BY always
/// answers with exactly one row, even when no unit returned any.
pub fn aggregate_all(
    rows: impl Iterator<Item = OwnedRow>,
    plan: &AggregationPlan,
    column_count: usize,
) -> OwnedRow {
    let mut acc: Option<OwnedRow> = None;
    for row in rows {
        match acc.as_mut() {
            Some(acc) => plan.fold(acc, &row),
            None => acc = Some(row),
        }
    }
    let mut row = acc.unwrap_or_else(|| empty_aggregate_row(plan, column_count));
    plan.finish(&mut row);
    row
}

fn empty_aggregate_row(plan: &AggregationPlan, column_count: usize) -> OwnedRow {
    let mut values = vec![Datum::Null; column_count];
    for &(index, kind) in &plan.folds {
        if kind == AggregationKind::Count {
            if let Some(slot) = values.get_mut(index) {
                *slot = Datum::Int64(0);
            }
        }
    }
    OwnedRow::new(values)
}

/// Folds consecutive rows with equal group keys. The input must already be
/// sorted by the GROUP BY items, so each group is emitted as soon as the
/// next key shows up.
pub struct GroupByStreamMerger<I> {
    rows: I,
    group_by: Vec<OrderItem>,
    plan: AggregationPlan,
    pending: Option<(Vec<u8>, OwnedRow)>,
}

impl<I: Iterator<Item = OwnedRow>> GroupByStreamMerger<I> {
    pub fn new(rows: I, group_by: Vec<OrderItem>, plan: AggregationPlan) -> Self {
        Self {
            rows,
            group_by,
            plan,
            pending: None,
        }
    }
}

impl<I: Iterator<Item = OwnedRow>> Iterator for GroupByStreamMerger<I> {
    type Item = OwnedRow;

    fn next(&mut self) -> Option<OwnedRow> {
        let (key, mut acc) = match self.pending.take() {
            Some(pending) => pending,
            None => {
                let row = self.rows.next()?;
                (encode_group_key(&self.group_by, &row.values), row)
            }
        };
        for row in self.rows.by_ref() {
            let next_key = encode_group_key(&self.group_by, &row.values);
            if next_key == key {
                self.plan.fold(&mut acc, &row);
            } else {
                self.pending = Some((next_key, row));
                break;
            }
        }
        self.plan.finish(&mut acc);
        Some(acc)
    }
}

/// Folds groups in a hash table, then sorts them by `order_by`. Used when the
/// units were not sorted by the group key.
pub fn group_in_memory(
    rows: impl Iterator<Item = OwnedRow>,
    group_by: &[OrderItem],
    order_by: &[OrderItem],
    plan: &AggregationPlan,
    max_rows: usize,
) -> KestrelResult<Vec<OwnedRow>> {
    let mut groups: Vec<OwnedRow> = Vec::new();
    let mut index: HashMap<Vec<u8>, usize> = HashMap::new();
    for row in rows {
        let key = encode_group_key(group_by, &row.values);
        match index.get(&key) {
            Some(&slot) => plan.fold(&mut groups[slot], &row),
            None => {
                if groups.len() >= max_rows {
                    return Err(ExecutionError::TooManyRows {
                        buffered: groups.len(),
                        limit: max_rows,
                    }
                    .into());
                }
                index.insert(key, groups.len());
                groups.push(row);
            }
        }
    }
    for row in &mut groups {
        plan.finish(row);
    }
    if !order_by.is_empty() {
        groups.sort_by(|a, b| compare_rows(a, b, order_by));
    }
    tracing::debug!(groups = groups.len(), "Grouped rows in memory");
    Ok(groups)
}
