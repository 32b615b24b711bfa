use kestrel_common::datum::{Datum, OwnedRow};
use kestrel_common::error::KestrelResult;
use kestrel_sql_frontend::Limit;

/// The client's own window over the merged rows: the units were asked for
/// `offset + row_count` rows from offset 0, so the real offset is skipped
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitWindow {
    pub offset: usize,
    pub row_count: Option<usize>,
}

impl LimitWindow {
    /// Resolve against the statement's original parameters, not the revised
    /// per-unit ones.
    pub fn resolve(limit: &Limit, parameters: &[Datum]) -> KestrelResult<Self> {
        let offset = limit.offset_value(parameters)?;
        let row_count = limit.row_count_value(parameters)?;
        Ok(Self {
            offset: to_usize(offset),
            row_count: row_count.map(to_usize),
        })
    }

    pub fn apply<I>(self, rows: I) -> LimitDecorator<I>
    where
        I: Iterator<Item = OwnedRow>,
    {
        LimitDecorator {
            rows,
            skip: self.offset,
            remaining: self.row_count,
        }
    }
}

fn to_usize(v: i64) -> usize {
    usize::try_from(v).unwrap_or(0)
}

/// Skips `offset` rows before the first visible row and stops after
/// `row_count` more.
pub struct LimitDecorator<I> {
    rows: I,
    skip: usize,
    remaining: Option<usize>,
}

impl<I: Iterator<Item = OwnedRow>> Iterator for LimitDecorator<I> {
    type Item = OwnedRow;

    fn next(&mut self) -> Option<OwnedRow> {
        if self.remaining == Some(0) {
            return None;
        }
        while self.skip > 0 {
            self.rows.next()?;
            self.skip -= 1;
        }
        let row = self.rows.next()?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_sql_frontend::LimitValue;

    fn numbered(n: i64) -> impl Iterator<Item = OwnedRow> {
        (0..n).map(|i| OwnedRow::new(vec![Datum::Int64(i)]))
    }

    #[test]
    fn test_window_skips_then_takes() {
        let window = LimitWindow::resolve(&Limit::new(Some(5), Some(3)), &[]).unwrap();
        let rows: Vec<i64> = window
            .apply(numbered(20))
            .filter_map(|r| r.values[0].as_i64())
            .collect();
        assert_eq!(rows, vec![5, 6, 7]);
    }

    #[test]
    fn test_window_offset_past_end() {
        let window = LimitWindow::resolve(&Limit::new(Some(50), Some(3)), &[]).unwrap();
        assert_eq!(window.apply(numbered(20)).count(), 0);
    }

    #[test]
    fn test_window_without_row_count() {
        let window = LimitWindow::resolve(&Limit::new(Some(18), None), &[]).unwrap();
        assert_eq!(window.apply(numbered(20)).count(), 2);
    }

    #[test]
    fn test_window_from_parameters() {
        let limit = Limit {
            offset: Some(LimitValue::parameter(1)),
            row_count: Some(LimitValue::parameter(2)),
            rewrite_row_count: true,
        };
        let params = vec![Datum::Int64(9), Datum::Int64(2), Datum::Int32(4)];
        let window = LimitWindow::resolve(&limit, &params).unwrap();
        assert_eq!(
            window,
            LimitWindow {
                offset: 2,
                row_count: Some(4)
            }
        );
    }
}
