use std::cmp::Ordering;

use kestrel_common::datum::{Datum, OwnedRow};
use kestrel_sql_frontend::{OrderDirection, OrderItem};

/// Compare two optional datums. Missing values sort first.
pub fn compare_datums(a: Option<&Datum>, b: Option<&Datum>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(da), Some(db)) => cmp_datum(da, db),
    }
}

/// NULL sorts before every value; numeric types compare across widths.
pub fn cmp_datum(a: &Datum, b: &Datum) -> Ordering {
    match (a, b) {
        (Datum::Null, Datum::Null) => Ordering::Equal,
        (Datum::Null, _) => Ordering::Less,
        (_, Datum::Null) => Ordering::Greater,
        (Datum::Int32(x), Datum::Int32(y)) => x.cmp(y),
        (Datum::Int64(x), Datum::Int64(y)) => x.cmp(y),
        (Datum::Int32(x), Datum::Int64(y)) => (*x as i64).cmp(y),
        (Datum::Int64(x), Datum::Int32(y)) => x.cmp(&(*y as i64)),
        (Datum::Text(x), Datum::Text(y)) => x.cmp(y),
        (Datum::Boolean(x), Datum::Boolean(y)) => x.cmp(y),
        (Datum::Timestamp(x), Datum::Timestamp(y)) => x.cmp(y),
        (Datum::Decimal(xm, xs), Datum::Decimal(ym, ys)) if xs == ys => xm.cmp(ym),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

/// Compare rows by ORDER BY items, honouring each item's direction.
pub fn compare_rows(a: &OwnedRow, b: &OwnedRow, items: &[OrderItem]) -> Ordering {
    for item in items {
        let ord = compare_datums(a.get(item.index), b.get(item.index));
        let ord = match item.direction {
            OrderDirection::Asc => ord,
            OrderDirection::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Binary group key over the given columns. Integer widths encode alike so
/// `Int32(1)` and `Int64(1)` fall into one group.
pub fn encode_group_key(items: &[OrderItem], values: &[Datum]) -> Vec<u8> {
    let mut key = Vec::with_capacity(items.len() * 9);
    for item in items {
        match values.get(item.index).unwrap_or(&Datum::Null) {
            Datum::Null => key.push(0),
            Datum::Boolean(b) => {
                key.push(1);
                key.push(u8::from(*b));
            }
            Datum::Int32(v) => {
                key.push(3);
                key.extend_from_slice(&(*v as i64).to_be_bytes());
            }
            Datum::Int64(v) => {
                key.push(3);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Float64(v) => {
                key.push(4);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Text(s) => {
                key.push(5);
                key.extend_from_slice(&(s.len() as u32).to_be_bytes());
                key.extend_from_slice(s.as_bytes());
            }
            Datum::Timestamp(v) => {
                key.push(6);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Decimal(m, s) => {
                key.push(10);
                key.push(*s);
                key.extend_from_slice(&m.to_be_bytes());
            }
        }
    }
    key
}

/// Add two values for SUM/COUNT folding. Integer sums that leave the `i64`
/// range are promoted to a scale-0 decimal instead of wrapping.
pub fn datum_add(a: &Datum, b: &Datum) -> Datum {
    match (a, b) {
        (Datum::Null, other) | (other, Datum::Null) => other.clone(),
        (Datum::Decimal(xm, xs), Datum::Decimal(ym, ys)) if xs == ys => match xm.checked_add(*ym) {
            Some(m) => Datum::Decimal(m, *xs),
            None => float_add(a, b),
        },
        (Datum::Decimal(m, s), other) | (other, Datum::Decimal(m, s)) => match integer(other) {
            Some(v) => 10i128
                .checked_pow(*s as u32)
                .and_then(|f| (v as i128).checked_mul(f))
                .and_then(|v| v.checked_add(*m))
                .map(|m| Datum::Decimal(m, *s))
                .unwrap_or_else(|| float_add(a, b)),
            None => float_add(a, b),
        },
        _ => match (integer(a), integer(b)) {
            (Some(x), Some(y)) => match x.checked_add(y) {
                Some(v) => Datum::Int64(v),
                None => Datum::Decimal(x as i128 + y as i128, 0),
            },
            _ => float_add(a, b),
        },
    }
}

fn integer(d: &Datum) -> Option<i64> {
    match d {
        Datum::Int32(v) => Some(*v as i64),
        Datum::Int64(v) => Some(*v),
        _ => None,
    }
}

fn float_add(a: &Datum, b: &Datum) -> Datum {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Datum::Float64(x + y),
        _ => a.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmp_datum_mixed_widths_and_null() {
        assert_eq!(cmp_datum(&Datum::Int32(3), &Datum::Int64(3)), Ordering::Equal);
        assert_eq!(cmp_datum(&Datum::Null, &Datum::Int64(-9)), Ordering::Less);
        assert_eq!(cmp_datum(&Datum::Float64(2.5), &Datum::Int64(2)), Ordering::Greater);
        assert_eq!(
            cmp_datum(&Datum::Text("a".into()), &Datum::Text("b".into())),
            Ordering::Less
        );
    }

    #[test]
    fn test_compare_rows_multi_key() {
        let items = vec![OrderItem::asc("a", 0), OrderItem::desc("b", 1)];
        let r1 = OwnedRow::new(vec![Datum::Int64(1), Datum::Int64(5)]);
        let r2 = OwnedRow::new(vec![Datum::Int64(1), Datum::Int64(7)]);
        let r3 = OwnedRow::new(vec![Datum::Int64(0), Datum::Int64(1)]);
        assert_eq!(compare_rows(&r1, &r2, &items), Ordering::Greater);
        assert_eq!(compare_rows(&r3, &r1, &items), Ordering::Less);
    }

    #[test]
    fn test_group_key_normalizes_int_width() {
        let items = vec![OrderItem::asc("k", 0)];
        assert_eq!(
            encode_group_key(&items, &[Datum::Int32(1)]),
            encode_group_key(&items, &[Datum::Int64(1)])
        );
        assert_ne!(
            encode_group_key(&items, &[Datum::Int64(1)]),
            encode_group_key(&items, &[Datum::Text("1".into())])
        );
    }

    #[test]
    fn test_datum_add() {
        assert_eq!(datum_add(&Datum::Int32(2), &Datum::Int64(3)), Datum::Int64(5));
        assert_eq!(datum_add(&Datum::Null, &Datum::Int64(3)), Datum::Int64(3));
        assert_eq!(datum_add(&Datum::Decimal(150, 2), &Datum::Decimal(50, 2)), Datum::Decimal(200, 2));
        assert_eq!(datum_add(&Datum::Float64(0.5), &Datum::Int64(1)), Datum::Float64(1.5));
    }

    #[test]
    fn test_datum_add_promotes_on_overflow() {
        let sum = datum_add(&Datum::Int64(i64::MAX), &Datum::Int64(1));
        assert_eq!(sum, Datum::Decimal(i64::MAX as i128 + 1, 0));
        // Later shards keep folding exactly into the promoted sum.
        assert_eq!(
            datum_add(&sum, &Datum::Int32(-2)),
            Datum::Decimal(i64::MAX as i128 - 1, 0)
        );
        assert_eq!(
            datum_add(&Datum::Int64(i64::MIN), &Datum::Int64(-1)),
            Datum::Decimal(i64::MIN as i128 - 1, 0)
        );
        assert_eq!(datum_add(&Datum::Decimal(150, 2), &Datum::Int64(2)), Datum::Decimal(350, 2));
    }
}
