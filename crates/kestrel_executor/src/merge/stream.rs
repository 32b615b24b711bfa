//! Row-stream mergers over the per-unit responses.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::vec;

use kestrel_common::datum::OwnedRow;
use kestrel_sql_frontend::OrderItem;

use super::compare::compare_rows;

/// Yields the rows of every unit one unit after another, in unit order.
pub struct IteratorStreamMerger {
    units: vec::IntoIter<vec::IntoIter<OwnedRow>>,
    current: Option<vec::IntoIter<OwnedRow>>,
}

impl IteratorStreamMerger {
    pub fn new(units: Vec<Vec<OwnedRow>>) -> Self {
        let mut units: vec::IntoIter<vec::IntoIter<OwnedRow>> = units
            .into_iter()
            .map(Vec::into_iter)
            .collect::<Vec<_>>()
            .into_iter();
        let current = units.next();
        Self { units, current }
    }
}

impl Iterator for IteratorStreamMerger {
    type Item = OwnedRow;

    fn next(&mut self) -> Option<OwnedRow> {
        loop {
            if let Some(row) = self.current.as_mut()?.next() {
                return Some(row);
            }
            self.current = self.units.next();
        }
    }
}

struct HeadRow {
    row: OwnedRow,
    unit: usize,
    order_by: Arc<[OrderItem]>,
}

impl PartialEq for HeadRow {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeadRow {}

impl PartialOrd for HeadRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeadRow {
    // Ties go to the lower unit so equal keys keep unit order.
    fn cmp(&self, other: &Self) -> Ordering {
        compare_rows(&self.row, &other.row, &self.order_by).then(self.unit.cmp(&other.unit))
    }
}

/// K-way merge of unit streams that are each already sorted by `order_by`.
///
/// Only the head row of every unit is held in the heap; each `next` pops the
/// globally smallest head and refills from the unit it came from.
pub struct OrderByStreamMerger {
    units: Vec<vec::IntoIter<OwnedRow>>,
    heap: BinaryHeap<Reverse<HeadRow>>,
    order_by: Arc<[OrderItem]>,
}

impl OrderByStreamMerger {
    pub fn new(units: Vec<Vec<OwnedRow>>, order_by: &[OrderItem]) -> Self {
        let order_by: Arc<[OrderItem]> = order_by.to_vec().into();
        let mut units: Vec<vec::IntoIter<OwnedRow>> = units.into_iter().map(Vec::into_iter).collect();
        let mut heap = BinaryHeap::with_capacity(units.len());
        for (unit, rows) in units.iter_mut().enumerate() {
            if let Some(row) = rows.next() {
                heap.push(Reverse(HeadRow {
                    row,
                    unit,
                    order_by: order_by.clone(),
                }));
            }
        }
        Self {
            units,
            heap,
            order_by,
        }
    }
}

impl Iterator for OrderByStreamMerger {
    type Item = OwnedRow;

    fn next(&mut self) -> Option<OwnedRow> {
        let Reverse(head) = self.heap.pop()?;
        if let Some(next) = self.units.get_mut(head.unit).and_then(Iterator::next) {
            self.heap.push(Reverse(HeadRow {
                row: next,
                unit: head.unit,
                order_by: self.order_by.clone(),
            }));
        }
        Some(head.row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::datum::Datum;

    fn rows(values: &[i64]) -> Vec<OwnedRow> {
        values
            .iter()
            .map(|v| OwnedRow::new(vec![Datum::Int64(*v)]))
            .collect()
    }

    fn firsts(it: impl Iterator<Item = OwnedRow>) -> Vec<i64> {
        it.map(|r| r.values[0].as_i64().unwrap_or(-1)).collect()
    }

    #[test]
    fn test_iterator_merger_keeps_unit_order() {
        let merged = IteratorStreamMerger::new(vec![rows(&[3, 1]), vec![], rows(&[2])]);
        assert_eq!(firsts(merged), vec![3, 1, 2]);
    }

    #[test]
    fn test_iterator_merger_no_units() {
        assert_eq!(IteratorStreamMerger::new(vec![]).count(), 0);
    }

    #[test]
    fn test_order_by_merger_ascending() {
        let order = vec![OrderItem::asc("id", 0)];
        let merged = OrderByStreamMerger::new(
            vec![rows(&[1, 4, 9]), rows(&[2, 3]), vec![], rows(&[5, 6, 7, 8])],
            &order,
        );
        assert_eq!(firsts(merged), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_order_by_merger_descending() {
        let order = vec![OrderItem::desc("id", 0)];
        let merged = OrderByStreamMerger::new(vec![rows(&[9, 3]), rows(&[8, 7, 1])], &order);
        assert_eq!(firsts(merged), vec![9, 8, 7, 3, 1]);
    }

    #[test]
    fn test_order_by_merger_ties_follow_unit_order() {
        let order = vec![OrderItem::asc("k", 0)];
        let a = vec![OwnedRow::new(vec![Datum::Int64(1), Datum::Text("a".into())])];
        let b = vec![OwnedRow::new(vec![Datum::Int64(1), Datum::Text("b".into())])];
        let merged: Vec<OwnedRow> = OrderByStreamMerger::new(vec![b, a], &order).collect();
        assert_eq!(merged[0].values[1], Datum::Text("b".into()));
        assert_eq!(merged[1].values[1], Datum::Text("a".into()));
    }
}
