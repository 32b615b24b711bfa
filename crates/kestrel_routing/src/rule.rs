//! Sharding rule built from configuration: table rules, binding groups and
//! default strategies. Logical names are lower-cased on entry so every
//! lookup is case-insensitive.

use std::collections::HashMap;

use kestrel_common::config::ShardingRuleConfig;
use kestrel_common::error::{ConfigError, KestrelResult};

use crate::data_node::{parse_data_nodes, DataNode};
use crate::strategy::ShardingStrategy;

/// Where one logical table's actual tables live and how rows are spread.
#[derive(Debug, Clone)]
pub struct TableRule {
    pub logical_table: String,
    pub actual_data_nodes: Vec<DataNode>,
    pub database_strategy: Option<ShardingStrategy>,
    pub table_strategy: Option<ShardingStrategy>,
    pub logic_indexes: Vec<String>,
    pub key_generator_column: Option<String>,
}

impl TableRule {
    pub fn new(logical_table: &str, actual_data_nodes: Vec<DataNode>) -> Self {
        Self {
            logical_table: logical_table.to_lowercase(),
            actual_data_nodes,
            database_strategy: None,
            table_strategy: None,
            logic_indexes: Vec::new(),
            key_generator_column: None,
        }
    }

    /// Data sources in declaration order.
    pub fn data_source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for node in &self.actual_data_nodes {
            if !names.contains(&node.data_source.as_str()) {
                names.push(&node.data_source);
            }
        }
        names
    }

    /// Actual tables on one data source, in declaration order.
    pub fn actual_tables(&self, data_source: &str) -> Vec<&str> {
        self.actual_data_nodes
            .iter()
            .filter(|n| n.data_source.eq_ignore_ascii_case(data_source))
            .map(|n| n.table.as_str())
            .collect()
    }

    /// Position of an actual table among the tables of its data source.
    pub fn actual_table_index(&self, data_source: &str, actual_table: &str) -> Option<usize> {
        self.actual_tables(data_source)
            .iter()
            .position(|t| t.eq_ignore_ascii_case(actual_table))
    }

    pub fn node_position(&self, node: &DataNode) -> usize {
        self.actual_data_nodes
            .iter()
            .position(|n| n == node)
            .unwrap_or(usize::MAX)
    }

    pub fn is_sharding_column(&self, column: &str) -> bool {
        [&self.database_strategy, &self.table_strategy]
            .into_iter()
            .flatten()
            .any(|s| s.sharding_column.eq_ignore_ascii_case(column))
    }
}

/// A group of logical tables co-located shard by shard: the i-th actual
/// table of every member on a data source holds the same key range.
#[derive(Debug, Clone)]
pub struct BindingTableRule {
    pub table_names: Vec<String>,
}

impl BindingTableRule {
    pub fn contains(&self, logical_table: &str) -> bool {
        self.table_names
            .iter()
            .any(|t| t.eq_ignore_ascii_case(logical_table))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShardingRule {
    table_rules: Vec<TableRule>,
    table_index: HashMap<String, usize>,
    binding_rules: Vec<BindingTableRule>,
    pub default_data_source: Option<String>,
    pub default_database_strategy: Option<ShardingStrategy>,
    pub default_table_strategy: Option<ShardingStrategy>,
}

impl ShardingRule {
    pub fn from_config(config: &ShardingRuleConfig) -> KestrelResult<Self> {
        let mut table_rules = Vec::with_capacity(config.tables.len());
        for t in &config.tables {
            let nodes = parse_data_nodes(&t.actual_data_nodes)?;
            if nodes.is_empty() {
                return Err(ConfigError::InvalidRule(format!(
                    "table '{}' declares no actual data nodes",
                    t.logical_table
                ))
                .into());
            }
            let mut rule = TableRule::new(&t.logical_table, nodes);
            rule.database_strategy = t.database_strategy.as_ref().map(ShardingStrategy::from_config);
            rule.table_strategy = t.table_strategy.as_ref().map(ShardingStrategy::from_config);
            rule.logic_indexes = t.logic_indexes.iter().map(|i| i.to_lowercase()).collect();
            rule.key_generator_column = t.key_generator_column.as_ref().map(|c| c.to_lowercase());
            table_rules.push(rule);
        }
        let binding_groups: Vec<Vec<String>> = config.binding_table_groups.clone();
        let mut rule = Self::new(table_rules, binding_groups)?;
        rule.default_data_source = config.default_data_source.as_ref().map(|d| d.to_lowercase());
        rule.default_database_strategy = config
            .default_database_strategy
            .as_ref()
            .map(ShardingStrategy::from_config);
        rule.default_table_strategy = config
            .default_table_strategy
            .as_ref()
            .map(ShardingStrategy::from_config);
        Ok(rule)
    }

    /// Build a rule and validate every binding group.
    pub fn new(table_rules: Vec<TableRule>, binding_groups: Vec<Vec<String>>) -> KestrelResult<Self> {
        let mut table_index = HashMap::with_capacity(table_rules.len());
        for (i, t) in table_rules.iter().enumerate() {
            if table_index.insert(t.logical_table.clone(), i).is_some() {
                return Err(ConfigError::InvalidRule(format!(
                    "duplicate table rule for '{}'",
                    t.logical_table
                ))
                .into());
            }
        }
        let mut rule = Self {
            table_rules,
            table_index,
            binding_rules: Vec::new(),
            default_data_source: None,
            default_database_strategy: None,
            default_table_strategy: None,
        };
        for group in binding_groups {
            let binding = BindingTableRule {
                table_names: group.iter().map(|t| t.to_lowercase()).collect(),
            };
            rule.validate_binding(&binding)?;
            rule.binding_rules.push(binding);
        }
        Ok(rule)
    }

    pub fn with_default_data_source(mut self, data_source: &str) -> Self {
        self.default_data_source = Some(data_source.to_lowercase());
        self
    }

    fn validate_binding(&self, binding: &BindingTableRule) -> KestrelResult<()> {
        let mut members = Vec::with_capacity(binding.table_names.len());
        for name in &binding.table_names {
            if self.binding_rules.iter().any(|b| b.contains(name)) {
                return Err(ConfigError::BindingTableInconsistent(format!(
                    "table '{}' appears in more than one binding group",
                    name
                ))
                .into());
            }
            let t = self.table_rule(name).ok_or_else(|| {
                ConfigError::BindingTableInconsistent(format!("table '{}' has no table rule", name))
            })?;
            members.push(t);
        }
        let Some(first) = members.first() else {
            return Ok(());
        };
        for other in &members[1..] {
            if first.data_source_names() != other.data_source_names() {
                return Err(ConfigError::BindingTableInconsistent(format!(
                    "'{}' and '{}' live on different data sources",
                    first.logical_table, other.logical_table
                ))
                .into());
            }
            for ds in first.data_source_names() {
                if first.actual_tables(ds).len() != other.actual_tables(ds).len() {
                    return Err(ConfigError::BindingTableInconsistent(format!(
                        "'{}' and '{}' have different actual table counts on '{}'",
                        first.logical_table, other.logical_table, ds
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    pub fn table_rules(&self) -> &[TableRule] {
        &self.table_rules
    }

    pub fn table_rule(&self, logical_table: &str) -> Option<&TableRule> {
        self.table_index
            .get(&logical_table.to_lowercase())
            .map(|&i| &self.table_rules[i])
    }

    /// Like [`Self::table_rule`], but a missing rule is a configuration error.
    pub fn require_table_rule(&self, logical_table: &str) -> KestrelResult<&TableRule> {
        self.table_rule(logical_table)
            .ok_or_else(|| ConfigError::MissingTableRule(logical_table.to_lowercase()).into())
    }

    pub fn binding_rule(&self, logical_table: &str) -> Option<&BindingTableRule> {
        self.binding_rules.iter().find(|b| b.contains(logical_table))
    }

    pub fn is_bound(&self, a: &str, b: &str) -> bool {
        self.binding_rule(a).is_some_and(|rule| rule.contains(b))
    }

    pub fn database_strategy<'a>(&'a self, table: &'a TableRule) -> Option<&'a ShardingStrategy> {
        table
            .database_strategy
            .as_ref()
            .or(self.default_database_strategy.as_ref())
    }

    pub fn table_strategy<'a>(&'a self, table: &'a TableRule) -> Option<&'a ShardingStrategy> {
        table
            .table_strategy
            .as_ref()
            .or(self.default_table_strategy.as_ref())
    }

    /// Owning logical table of a logical index name.
    pub fn find_logic_table_by_index(&self, index_name: &str) -> Option<&str> {
        self.table_rules
            .iter()
            .find(|t| t.logic_indexes.iter().any(|i| i.eq_ignore_ascii_case(index_name)))
            .map(|t| t.logical_table.as_str())
    }

    /// Actual table of `logical_table` co-located with `other_actual_table`
    /// (an actual table of the bound `other_logical_table`) on `data_source`.
    pub fn binding_actual_table(
        &self,
        data_source: &str,
        logical_table: &str,
        other_logical_table: &str,
        other_actual_table: &str,
    ) -> KestrelResult<String> {
        if !self.is_bound(logical_table, other_logical_table) {
            return Err(ConfigError::BindingTableInconsistent(format!(
                "'{}' is not bound to '{}'",
                logical_table, other_logical_table
            ))
            .into());
        }
        let other = self.require_table_rule(other_logical_table)?;
        let target = self.require_table_rule(logical_table)?;
        let index = other
            .actual_table_index(data_source, other_actual_table)
            .ok_or_else(|| {
                ConfigError::BindingTableInconsistent(format!(
                    "'{}' is not an actual table of '{}' on '{}'",
                    other_actual_table, other.logical_table, data_source
                ))
            })?;
        target
            .actual_tables(data_source)
            .get(index)
            .map(|t| t.to_string())
            .ok_or_else(|| {
                ConfigError::BindingTableInconsistent(format!(
                    "'{}' has no actual table #{} on '{}'",
                    target.logical_table, index, data_source
                ))
                .into()
            })
    }

    /// Every data source named by any table rule, then the default one.
    pub fn all_data_source_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for t in &self.table_rules {
            for ds in t.data_source_names() {
                if !names.iter().any(|n| n == ds) {
                    names.push(ds.to_string());
                }
            }
        }
        if let Some(ds) = &self.default_data_source {
            if !names.contains(ds) {
                names.push(ds.clone());
            }
        }
        names
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use kestrel_common::config::{
        ShardingAlgorithmKind, ShardingStrategyConfig, TableRuleConfig,
    };

    fn table_config(name: &str, nodes: &str) -> TableRuleConfig {
        TableRuleConfig {
            logical_table: name.into(),
            actual_data_nodes: vec![nodes.into()],
            database_strategy: Some(ShardingStrategyConfig {
                sharding_column: "user_id".into(),
                algorithm: ShardingAlgorithmKind::Modulo,
                sharding_count: None,
            }),
            table_strategy: Some(ShardingStrategyConfig {
                sharding_column: "order_id".into(),
                algorithm: ShardingAlgorithmKind::Modulo,
                sharding_count: None,
            }),
            logic_indexes: Vec::new(),
            key_generator_column: None,
        }
    }

    /// `t_order` and `t_order_item` bound across ds_0/ds_1 × _0/_1, plus an
    /// unbound `t_user` spread over the same data sources.
    pub(crate) fn order_rule() -> ShardingRule {
        let mut order = table_config("t_order", "ds_{0..1}.t_order_{0..1}");
        order.logic_indexes = vec!["idx_order_user".into()];
        order.key_generator_column = Some("order_id".into());
        let config = ShardingRuleConfig {
            default_data_source: Some("ds_0".into()),
            binding_table_groups: vec![vec!["t_order".into(), "t_order_item".into()]],
            default_database_strategy: None,
            default_table_strategy: None,
            tables: vec![
                order,
                table_config("t_order_item", "ds_{0..1}.t_order_item_{0..1}"),
                TableRuleConfig {
                    logical_table: "t_user".into(),
                    actual_data_nodes: vec!["ds_{0..1}.t_user".into()],
                    database_strategy: Some(ShardingStrategyConfig {
                        sharding_column: "user_id".into(),
                        algorithm: ShardingAlgorithmKind::Modulo,
                        sharding_count: None,
                    }),
                    table_strategy: None,
                    logic_indexes: Vec::new(),
                    key_generator_column: None,
                },
            ],
        };
        ShardingRule::from_config(&config).unwrap()
    }

    #[test]
    fn test_table_rule_lookup_case_insensitive() {
        let rule = order_rule();
        let t = rule.table_rule("T_ORDER").unwrap();
        assert_eq!(t.actual_data_nodes.len(), 4);
        assert_eq!(t.data_source_names(), vec!["ds_0", "ds_1"]);
        assert_eq!(t.actual_tables("ds_1"), vec!["t_order_0", "t_order_1"]);
        assert!(rule.require_table_rule("t_missing").unwrap_err().is_config_error());
    }

    #[test]
    fn test_binding_actual_table_co_located() {
        let rule = order_rule();
        for ds in ["ds_0", "ds_1"] {
            for suffix in ["0", "1"] {
                let actual = rule
                    .binding_actual_table(
                        ds,
                        "t_order_item",
                        "t_order",
                        &format!("t_order_{}", suffix),
                    )
                    .unwrap();
                assert_eq!(actual, format!("t_order_item_{}", suffix));
            }
        }
    }

    #[test]
    fn test_binding_requires_bound_tables() {
        let rule = order_rule();
        let err = rule
            .binding_actual_table("ds_0", "t_user", "t_order", "t_order_0")
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_inconsistent_binding_group_rejected() {
        let config = ShardingRuleConfig {
            binding_table_groups: vec![vec!["a".into(), "b".into()]],
            tables: vec![
                table_config("a", "ds_0.a_{0..1}"),
                table_config("b", "ds_0.b_{0..2}"),
            ],
            ..Default::default()
        };
        let err = ShardingRule::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("different actual table counts"));

        let config = ShardingRuleConfig {
            binding_table_groups: vec![vec!["a".into(), "missing".into()]],
            tables: vec![table_config("a", "ds_0.a_{0..1}")],
            ..Default::default()
        };
        assert!(ShardingRule::from_config(&config).unwrap_err().is_config_error());
    }

    #[test]
    fn test_duplicate_table_rule_rejected() {
        let config = ShardingRuleConfig {
            tables: vec![
                table_config("a", "ds_0.a_0"),
                table_config("A", "ds_0.a_1"),
            ],
            ..Default::default()
        };
        assert!(ShardingRule::from_config(&config).is_err());
    }

    #[test]
    fn test_index_and_data_source_lookup() {
        let rule = order_rule();
        assert_eq!(rule.find_logic_table_by_index("IDX_ORDER_USER"), Some("t_order"));
        assert_eq!(rule.find_logic_table_by_index("idx_unknown"), None);
        assert_eq!(rule.all_data_source_names(), vec!["ds_0", "ds_1"]);
        assert!(rule.table_rule("t_order").unwrap().is_sharding_column("ORDER_ID"));
    }
}
