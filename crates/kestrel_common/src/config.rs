use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, KestrelResult};

/// Top-level middleware configuration (`kestrel.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KestrelConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub sharding: ShardingRuleConfig,
    #[serde(default)]
    pub master_slave: Vec<MasterSlaveRuleConfig>,
    #[serde(default)]
    pub props: PropsConfig,
}

impl KestrelConfig {
    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> KestrelResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(
            path = %path.display(),
            tables = config.sharding.tables.len(),
            master_slave_rules = config.master_slave.len(),
            "Loaded kestrel config"
        );
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> KestrelResult<Self> {
        Ok(toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?)
    }

    pub fn to_toml_string(&self) -> KestrelResult<String> {
        Ok(toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?)
    }
}

/// Execution coordinator limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Completion-barrier timeout for one statement in milliseconds (0 = no timeout).
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
    /// Timeout passed to the pool when acquiring a backend connection.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Maximum number of rows buffered when a merge has to materialize groups.
    #[serde(default = "default_max_rows_buffered")]
    pub max_rows_buffered: usize,
}

fn default_statement_timeout_ms() -> u64 {
    30_000
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_max_rows_buffered() -> usize {
    1_000_000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            statement_timeout_ms: default_statement_timeout_ms(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            max_rows_buffered: default_max_rows_buffered(),
        }
    }
}

impl ExecutorConfig {
    /// `None` when the statement timeout is disabled.
    pub fn statement_timeout(&self) -> Option<Duration> {
        (self.statement_timeout_ms > 0).then(|| Duration::from_millis(self.statement_timeout_ms))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Sharding rule: table rules, binding groups and defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardingRuleConfig {
    /// Data source for logical tables that have no table rule.
    #[serde(default)]
    pub default_data_source: Option<String>,
    /// Groups of logical tables that are co-located shard by shard.
    #[serde(default)]
    pub binding_table_groups: Vec<Vec<String>>,
    #[serde(default)]
    pub default_database_strategy: Option<ShardingStrategyConfig>,
    #[serde(default)]
    pub default_table_strategy: Option<ShardingStrategyConfig>,
    #[serde(default)]
    pub tables: Vec<TableRuleConfig>,
}

/// One logical table and where its actual tables live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableRuleConfig {
    pub logical_table: String,
    /// `<data_source>.<table>` entries. Inline ranges `{0..3}` and lists
    /// `{a,b}` are expanded, e.g. `ds_{0..1}.t_order_{0..1}`.
    pub actual_data_nodes: Vec<String>,
    #[serde(default)]
    pub database_strategy: Option<ShardingStrategyConfig>,
    #[serde(default)]
    pub table_strategy: Option<ShardingStrategyConfig>,
    /// Logical index names owned by this table.
    #[serde(default)]
    pub logic_indexes: Vec<String>,
    /// Column filled with generated keys when an INSERT omits it.
    #[serde(default)]
    pub key_generator_column: Option<String>,
}

/// Column plus algorithm used to pick data sources or actual tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingStrategyConfig {
    pub sharding_column: String,
    pub algorithm: ShardingAlgorithmKind,
    /// Divisor for the algorithm; defaults to the number of candidate targets.
    #[serde(default)]
    pub sharding_count: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardingAlgorithmKind {
    /// `value % n` selects the target whose name ends in `_<index>`.
    Modulo,
    /// xxh3 hash of the value, modulo the number of targets.
    Hash,
}

/// Master plus read replicas behind one logical data source name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterSlaveRuleConfig {
    pub name: String,
    pub master: String,
    #[serde(default)]
    pub slaves: Vec<String>,
    #[serde(default)]
    pub load_balance: LoadBalanceKind,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceKind {
    #[default]
    RoundRobin,
    Random,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropsConfig {
    /// Log logical and physical SQL at info level.
    #[serde(default)]
    pub sql_show: bool,
    /// Worker id embedded in generated keys (0-1023).
    #[serde(default)]
    pub worker_id: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[executor]
statement_timeout_ms = 2000

[sharding]
default_data_source = "ds_0"
binding_table_groups = [["t_order", "t_order_item"]]

[sharding.default_database_strategy]
sharding_column = "user_id"
algorithm = "modulo"

[[sharding.tables]]
logical_table = "t_order"
actual_data_nodes = ["ds_{0..1}.t_order_{0..1}"]
key_generator_column = "order_id"

[sharding.tables.table_strategy]
sharding_column = "order_id"
algorithm = "modulo"

[[master_slave]]
name = "ds_0"
master = "ds_0_master"
slaves = ["ds_0_slave_0", "ds_0_slave_1"]
load_balance = "random"

[props]
sql_show = true
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = KestrelConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.executor.statement_timeout_ms, 2000);
        assert_eq!(config.executor.acquire_timeout_ms, 5000);
        assert_eq!(config.sharding.default_data_source.as_deref(), Some("ds_0"));
        assert_eq!(config.sharding.binding_table_groups.len(), 1);
        let table = &config.sharding.tables[0];
        assert_eq!(table.logical_table, "t_order");
        assert_eq!(
            table.table_strategy.as_ref().map(|s| s.algorithm),
            Some(ShardingAlgorithmKind::Modulo)
        );
        assert_eq!(config.master_slave[0].load_balance, LoadBalanceKind::Random);
        assert!(config.props.sql_show);
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let text = KestrelConfig::default().to_toml_string().unwrap();
        let parsed = KestrelConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.executor.statement_timeout_ms, 30_000);
        assert!(parsed.sharding.tables.is_empty());
    }

    #[test]
    fn test_zero_timeout_disables_barrier_timeout() {
        let cfg = ExecutorConfig {
            statement_timeout_ms: 0,
            ..Default::default()
        };
        assert!(cfg.statement_timeout().is_none());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = KestrelConfig::from_toml_str("[executor\n").unwrap_err();
        assert!(err.is_config_error());
    }
}
