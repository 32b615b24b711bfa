//! Sharding strategies: pick data sources or actual tables for a sharding value.
//!
//! Targets are chosen by index suffix: with `n` shards a value maps to index
//! `i` in `0..n` and selects the candidate named `<prefix>_<i>`. A value whose
//! index has no matching candidate selects nothing; the statement then simply
//! routes nowhere for that value.

use kestrel_common::config::{ShardingAlgorithmKind, ShardingStrategyConfig};
use kestrel_common::datum::Datum;
use kestrel_common::error::{KestrelResult, RoutingError};
use kestrel_sql_frontend::{ShardingPredicate, ShardingValue};
use xxhash_rust::xxh3::xxh3_64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingStrategy {
    pub sharding_column: String,
    pub algorithm: ShardingAlgorithmKind,
    pub sharding_count: Option<u64>,
}

impl ShardingStrategy {
    pub fn new(sharding_column: impl Into<String>, algorithm: ShardingAlgorithmKind) -> Self {
        Self {
            sharding_column: sharding_column.into().to_lowercase(),
            algorithm,
            sharding_count: None,
        }
    }

    pub fn from_config(config: &ShardingStrategyConfig) -> Self {
        Self {
            sharding_column: config.sharding_column.to_lowercase(),
            algorithm: config.algorithm,
            sharding_count: config.sharding_count,
        }
    }

    fn algorithm_name(&self) -> &'static str {
        match self.algorithm {
            ShardingAlgorithmKind::Modulo => "modulo",
            ShardingAlgorithmKind::Hash => "hash",
        }
    }

    /// Select the targets among `available` that `value` can live on.
    /// The result keeps the order of `available`.
    pub fn do_sharding(
        &self,
        available: &[&str],
        value: &ShardingValue,
        parameters: &[Datum],
    ) -> KestrelResult<Vec<String>> {
        if available.is_empty() {
            return Ok(Vec::new());
        }
        let count = self.sharding_count.unwrap_or(available.len() as u64).max(1);
        let mut indices: Vec<u64> = Vec::new();
        match &value.predicate {
            ShardingPredicate::Equal(operands) => {
                for op in operands {
                    let datum = op.resolve(parameters)?;
                    indices.push(self.shard_index(datum, count)?);
                }
            }
            ShardingPredicate::Range { lower, upper } => {
                let (Some(lower), Some(upper), ShardingAlgorithmKind::Modulo) =
                    (lower, upper, self.algorithm)
                else {
                    return Ok(available.iter().map(|s| s.to_string()).collect());
                };
                let lo = self.integer(lower.value.resolve(parameters)?)?;
                let hi = self.integer(upper.value.resolve(parameters)?)?;
                let lo = if lower.inclusive { lo } else { lo.saturating_add(1) };
                let hi = if upper.inclusive { hi } else { hi.saturating_sub(1) };
                if hi < lo {
                    return Ok(Vec::new());
                }
                // A range spanning every residue touches every shard.
                if (hi as i128 - lo as i128 + 1) >= count as i128 {
                    return Ok(available.iter().map(|s| s.to_string()).collect());
                }
                for v in lo..=hi {
                    indices.push(v.rem_euclid(count as i64) as u64);
                }
            }
        }
        Ok(available
            .iter()
            .filter(|candidate| indices.iter().any(|idx| has_index_suffix(candidate, *idx)))
            .map(|s| s.to_string())
            .collect())
    }

    fn integer(&self, datum: &Datum) -> KestrelResult<i64> {
        datum.as_i64().ok_or_else(|| {
            RoutingError::UnsupportedValue {
                algorithm: self.algorithm_name(),
                value: datum.to_string(),
            }
            .into()
        })
    }

    fn shard_index(&self, datum: &Datum, count: u64) -> KestrelResult<u64> {
        match self.algorithm {
            ShardingAlgorithmKind::Modulo => {
                Ok(self.integer(datum)?.rem_euclid(count as i64) as u64)
            }
            ShardingAlgorithmKind::Hash => Ok(hash_sharding_value(datum) % count),
        }
    }
}

fn has_index_suffix(candidate: &str, idx: u64) -> bool {
    let suffix = idx.to_string();
    match candidate.strip_suffix(suffix.as_str()) {
        Some(prefix) => !prefix.ends_with(|c: char| c.is_ascii_digit()),
        None => false,
    }
}

/// xxh3 over a type-tagged encoding of the value. Integer widths hash
/// identically so `Int32(7)` and `Int64(7)` land on the same shard.
pub fn hash_sharding_value(datum: &Datum) -> u64 {
    let mut buf = Vec::with_capacity(16);
    match datum {
        Datum::Null => buf.push(0x00),
        Datum::Boolean(b) => {
            buf.push(0x01);
            buf.push(u8::from(*b));
        }
        Datum::Int32(v) => {
            buf.push(0x03);
            buf.extend_from_slice(&(*v as i64).to_le_bytes());
        }
        Datum::Int64(v) => {
            buf.push(0x03);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Datum::Float64(v) => {
            buf.push(0x04);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Datum::Text(s) => {
            buf.push(0x05);
            buf.extend_from_slice(s.as_bytes());
            buf.push(0x00);
        }
        Datum::Timestamp(v) => {
            buf.push(0x06);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Datum::Decimal(m, s) => {
            buf.push(0x07);
            buf.extend_from_slice(&m.to_le_bytes());
            buf.push(*s);
        }
    }
    xxh3_64(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLES: &[&str] = &["t_order_0", "t_order_1"];

    fn modulo() -> ShardingStrategy {
        ShardingStrategy::new("order_id", ShardingAlgorithmKind::Modulo)
    }

    #[test]
    fn test_modulo_equal() {
        let v = ShardingValue::equal("t_order", "order_id", Datum::Int64(7));
        assert_eq!(modulo().do_sharding(TABLES, &v, &[]).unwrap(), vec!["t_order_1"]);
        let v = ShardingValue::equal("t_order", "order_id", Datum::Int32(-4));
        assert_eq!(modulo().do_sharding(TABLES, &v, &[]).unwrap(), vec!["t_order_0"]);
    }

    #[test]
    fn test_modulo_in_list_keeps_candidate_order() {
        let v = ShardingValue::in_list(
            "t_order",
            "order_id",
            vec![Datum::Int64(3), Datum::Int64(2), Datum::Int64(5)],
        );
        assert_eq!(
            modulo().do_sharding(TABLES, &v, &[]).unwrap(),
            vec!["t_order_0", "t_order_1"]
        );
    }

    #[test]
    fn test_parameter_operand() {
        let v = ShardingValue {
            logical_table: "t_order".into(),
            column: "order_id".into(),
            predicate: ShardingPredicate::Equal(vec![
                kestrel_sql_frontend::ShardingOperand::Parameter(0),
            ]),
        };
        let out = modulo().do_sharding(TABLES, &v, &[Datum::Int64(11)]).unwrap();
        assert_eq!(out, vec!["t_order_1"]);
        assert!(modulo().do_sharding(TABLES, &v, &[]).is_err());
    }

    #[test]
    fn test_suffix_match_is_exact() {
        let tables = ["t_1", "t_11"];
        let strategy = ShardingStrategy {
            sharding_count: Some(12),
            ..modulo()
        };
        let v = ShardingValue::equal("t", "order_id", Datum::Int64(1));
        assert_eq!(strategy.do_sharding(&tables, &v, &[]).unwrap(), vec!["t_1"]);
        let v = ShardingValue::equal("t", "order_id", Datum::Int64(11));
        assert_eq!(strategy.do_sharding(&tables, &v, &[]).unwrap(), vec!["t_11"]);
    }

    #[test]
    fn test_no_matching_target_is_empty() {
        let strategy = ShardingStrategy {
            sharding_count: Some(4),
            ..modulo()
        };
        let v = ShardingValue::equal("t_order", "order_id", Datum::Int64(3));
        assert!(strategy.do_sharding(TABLES, &v, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_small_range_enumerates_values() {
        let strategy = ShardingStrategy {
            sharding_count: Some(4),
            ..modulo()
        };
        let tables = ["t_0", "t_1", "t_2", "t_3"];
        let v = ShardingValue::between("t", "order_id", Datum::Int64(5), Datum::Int64(6));
        assert_eq!(strategy.do_sharding(&tables, &v, &[]).unwrap(), vec!["t_1", "t_2"]);
        let v = ShardingValue::between("t", "order_id", Datum::Int64(0), Datum::Int64(100));
        assert_eq!(strategy.do_sharding(&tables, &v, &[]).unwrap().len(), 4);
    }

    #[test]
    fn test_text_rejected_by_modulo_but_hashable() {
        let v = ShardingValue::equal("t_order", "order_id", Datum::Text("abc".into()));
        assert!(modulo().do_sharding(TABLES, &v, &[]).is_err());
        let hash = ShardingStrategy::new("order_id", ShardingAlgorithmKind::Hash);
        assert_eq!(hash.do_sharding(TABLES, &v, &[]).unwrap().len(), 1);
    }

    #[test]
    fn test_hash_ignores_integer_width() {
        assert_eq!(
            hash_sharding_value(&Datum::Int32(42)),
            hash_sharding_value(&Datum::Int64(42))
        );
        assert_ne!(
            hash_sharding_value(&Datum::Int64(42)),
            hash_sharding_value(&Datum::Text("42".into()))
        );
    }
}
