use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::DataType;

/// A single scalar value exchanged with a backend: a bind parameter, a
/// sharding value, or one cell of a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Text(String),
    /// Microseconds since Unix epoch.
    Timestamp(i64),
    /// Fixed-point decimal: mantissa × 10^(-scale).
    /// e.g. Decimal(12345, 2) = 123.45
    Decimal(i128, u8),
}

impl Datum {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Datum::Null => None,
            Datum::Boolean(_) => Some(DataType::Boolean),
            Datum::Int32(_) => Some(DataType::Int32),
            Datum::Int64(_) => Some(DataType::Int64),
            Datum::Float64(_) => Some(DataType::Float64),
            Datum::Text(_) => Some(DataType::Text),
            Datum::Timestamp(_) => Some(DataType::Timestamp),
            Datum::Decimal(_, scale) => Some(DataType::Decimal(*scale)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int32(v) => Some(*v as i64),
            Datum::Int64(v) => Some(*v),
            Datum::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int32(v) => Some(*v as f64),
            Datum::Int64(v) => Some(*v as f64),
            Datum::Float64(v) => Some(*v),
            Datum::Decimal(m, s) => Some(*m as f64 / 10f64.powi(*s as i32)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Render as a SQL literal suitable for splicing into a physical
    /// statement. Text is single-quoted with embedded quotes doubled.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Datum::Null => "NULL".to_string(),
            Datum::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Datum::Text(s) => format!("'{}'", s.replace('\'', "''")),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Boolean(b) => write!(f, "{}", b),
            Datum::Int32(v) => write!(f, "{}", v),
            Datum::Int64(v) => write!(f, "{}", v),
            Datum::Float64(v) => write!(f, "{}", v),
            Datum::Text(s) => write!(f, "{}", s),
            Datum::Timestamp(us) => write!(f, "{}", us),
            Datum::Decimal(m, s) => write!(f, "{}", decimal_to_string(*m, *s)),
        }
    }
}

/// A row of values, in result-column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedRow {
    pub values: Vec<Datum>,
}

impl OwnedRow {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    pub fn get(&self, idx: usize) -> Option<&Datum> {
        self.values.get(idx)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for OwnedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

/// Convert a (mantissa, scale) decimal to its string representation.
/// e.g. (12345, 2) → "123.45", (-1, 3) → "-0.001", (100, 0) → "100"
pub fn decimal_to_string(mantissa: i128, scale: u8) -> String {
    if scale == 0 {
        return mantissa.to_string();
    }
    let negative = mantissa < 0;
    let digits = mantissa.unsigned_abs().to_string();
    let scale = scale as usize;
    let padded = if digits.len() <= scale {
        format!("{}{}", "0".repeat(scale - digits.len() + 1), digits)
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    if negative {
        format!("-{}.{}", int_part, frac_part)
    } else {
        format!("{}.{}", int_part, frac_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_to_string() {
        assert_eq!(decimal_to_string(12345, 2), "123.45");
        assert_eq!(decimal_to_string(-1, 3), "-0.001");
        assert_eq!(decimal_to_string(100, 0), "100");
        assert_eq!(decimal_to_string(5, 1), "0.5");
    }

    #[test]
    fn test_sql_literal_escapes_quotes() {
        assert_eq!(Datum::Text("O'Brien".into()).to_sql_literal(), "'O''Brien'");
        assert_eq!(Datum::Null.to_sql_literal(), "NULL");
        assert_eq!(Datum::Int64(-7).to_sql_literal(), "-7");
        assert_eq!(Datum::Boolean(true).to_sql_literal(), "TRUE");
        assert_eq!(Datum::Decimal(1050, 2).to_sql_literal(), "10.50");
    }

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(Datum::Int32(4).as_i64(), Some(4));
        assert_eq!(Datum::Decimal(250, 2).as_f64(), Some(2.5));
        assert_eq!(Datum::Text("x".into()).as_i64(), None);
        assert!(Datum::Null.is_null());
    }

    #[test]
    fn test_row_display() {
        let row = OwnedRow::new(vec![Datum::Int32(1), Datum::Text("a".into()), Datum::Null]);
        assert_eq!(row.to_string(), "(1, a, NULL)");
        assert_eq!(row.len(), 3);
    }
}
