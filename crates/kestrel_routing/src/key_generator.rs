//! Generated keys for INSERTs that omit the key column.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use kestrel_common::datum::Datum;
use kestrel_common::error::{KestrelResult, RoutingError};
use kestrel_sql_frontend::{
    InsertValueExpr, ShardingCondition, ShardingConditions, ShardingValue, SqlStatement,
};

use crate::rule::ShardingRule;

pub trait KeyGenerator: Send + Sync {
    fn next_key(&self) -> KestrelResult<Datum>;
}

/// Time-ordered 64-bit ids.
///
/// Layout: 41 bits of milliseconds since `epoch`, 10 bits of worker id,
/// 12 bits of per-millisecond sequence.
pub struct SnowflakeKeyGenerator {
    worker_id: u16,
    epoch: u64,
    state: Mutex<SnowflakeState>,
}

struct SnowflakeState {
    last_timestamp: u64,
    sequence: u16,
}

impl SnowflakeKeyGenerator {
    /// 2024-01-01 00:00:00 UTC.
    pub const DEFAULT_EPOCH: u64 = 1_704_067_200_000;
    pub const MAX_WORKER_ID: u16 = 1023;
    const MAX_SEQUENCE: u16 = 4095;

    pub fn new(worker_id: u16) -> KestrelResult<Self> {
        Self::with_epoch(worker_id, Self::DEFAULT_EPOCH)
    }

    pub fn with_epoch(worker_id: u16, epoch: u64) -> KestrelResult<Self> {
        if worker_id > Self::MAX_WORKER_ID {
            return Err(RoutingError::KeyGeneration(format!(
                "worker_id {} exceeds {}",
                worker_id,
                Self::MAX_WORKER_ID
            ))
            .into());
        }
        Ok(Self {
            worker_id,
            epoch,
            state: Mutex::new(SnowflakeState {
                last_timestamp: 0,
                sequence: 0,
            }),
        })
    }

    pub fn next_id(&self) -> KestrelResult<i64> {
        let mut state = self.state.lock();
        let mut timestamp = current_millis()?;
        if timestamp < state.last_timestamp {
            return Err(RoutingError::KeyGeneration(format!(
                "clock moved backwards by {}ms",
                state.last_timestamp - timestamp
            ))
            .into());
        }
        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & Self::MAX_SEQUENCE;
            if state.sequence == 0 {
                while timestamp <= state.last_timestamp {
                    timestamp = current_millis()?;
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = timestamp;
        let elapsed = timestamp.saturating_sub(self.epoch);
        Ok(((elapsed << 22) | ((self.worker_id as u64) << 12) | state.sequence as u64) as i64)
    }

    pub fn worker_id_of(id: i64) -> u16 {
        ((id as u64 >> 12) & Self::MAX_WORKER_ID as u64) as u16
    }
}

impl KeyGenerator for SnowflakeKeyGenerator {
    fn next_key(&self) -> KestrelResult<Datum> {
        Ok(Datum::Int64(self.next_id()?))
    }
}

fn current_millis() -> KestrelResult<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|e| RoutingError::KeyGeneration(e.to_string()).into())
}

/// Keys generated for one INSERT, one per VALUES row.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedKey {
    pub column: String,
    pub values: Vec<Datum>,
}

/// Fill the key generator column of an INSERT that omits it.
///
/// The column and one literal key per row are appended to the insert
/// context. When the column also shards the table, each row's condition
/// gains an equality on its key (rows without a condition get one) so the
/// router sends every row to the shard that owns its key.
pub fn apply_generated_keys(
    rule: &ShardingRule,
    stmt: &mut SqlStatement,
    generator: &dyn KeyGenerator,
) -> KestrelResult<Option<GeneratedKey>> {
    let Some(insert) = stmt.insert.as_mut() else {
        return Ok(None);
    };
    let Some(table) = rule.table_rule(&insert.table_name) else {
        return Ok(None);
    };
    let Some(column) = table.key_generator_column.as_deref() else {
        return Ok(None);
    };
    if insert.column_index(column).is_some() {
        return Ok(None);
    }

    let mut values = Vec::with_capacity(insert.values.len());
    for row in &mut insert.values {
        let key = generator.next_key()?;
        row.expressions.push(InsertValueExpr::Literal(key.clone()));
        values.push(key);
    }
    insert.columns.push(column.to_string());

    if table.is_sharding_column(column) {
        let logical = table.logical_table.clone();
        let mut conditions = std::mem::take(&mut stmt.conditions.conditions);
        for (row, key) in values.iter().enumerate() {
            let value = ShardingValue::equal(logical.as_str(), column, key.clone());
            match conditions.iter_mut().find(|c| c.insert_row == Some(row)) {
                Some(cond) => cond.values.push(value),
                None => conditions.push(ShardingCondition::for_insert_row(row, vec![value])),
            }
        }
        conditions.sort_by_key(|c| c.insert_row);
        stmt.conditions = ShardingConditions::new(conditions);
    }

    tracing::debug!(
        table = %table.logical_table,
        column,
        rows = values.len(),
        "Generated keys for insert"
    );
    Ok(Some(GeneratedKey {
        column: column.to_string(),
        values,
    }))
}
