//! Read/write splitting: map a logical data source to its master or one of
//! its read replicas.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;

use kestrel_common::config::{LoadBalanceKind, MasterSlaveRuleConfig};
use kestrel_common::error::{ConfigError, KestrelResult};

/// Picks one replica for a read.
pub trait LoadBalanceStrategy: Send + Sync + std::fmt::Debug {
    fn select<'a>(&self, rule_name: &str, slaves: &'a [String]) -> Option<&'a str>;
}

/// Rotates through replicas with one counter per rule.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    counters: DashMap<String, AtomicUsize>,
}

impl LoadBalanceStrategy for RoundRobinStrategy {
    fn select<'a>(&self, rule_name: &str, slaves: &'a [String]) -> Option<&'a str> {
        if slaves.is_empty() {
            return None;
        }
        let counter = self
            .counters
            .entry(rule_name.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        let n = counter.fetch_add(1, Ordering::Relaxed);
        Some(slaves[n % slaves.len()].as_str())
    }
}

#[derive(Debug, Default)]
pub struct RandomStrategy;

impl LoadBalanceStrategy for RandomStrategy {
    fn select<'a>(&self, _rule_name: &str, slaves: &'a [String]) -> Option<&'a str> {
        if slaves.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..slaves.len());
        Some(slaves[idx].as_str())
    }
}

#[derive(Debug, Clone)]
pub struct MasterSlaveRule {
    pub name: String,
    pub master: String,
    pub slaves: Vec<String>,
    pub load_balancer: Arc<dyn LoadBalanceStrategy>,
}

impl MasterSlaveRule {
    pub fn from_config(config: &MasterSlaveRuleConfig) -> KestrelResult<Self> {
        if config.name.is_empty() || config.master.is_empty() {
            return Err(ConfigError::InvalidRule(
                "master-slave rule needs a name and a master".into(),
            )
            .into());
        }
        let load_balancer: Arc<dyn LoadBalanceStrategy> = match config.load_balance {
            LoadBalanceKind::RoundRobin => Arc::new(RoundRobinStrategy::default()),
            LoadBalanceKind::Random => Arc::new(RandomStrategy),
        };
        Ok(Self {
            name: config.name.to_lowercase(),
            master: config.master.to_lowercase(),
            slaves: config.slaves.iter().map(|s| s.to_lowercase()).collect(),
            load_balancer,
        })
    }
}

/// Per-session state that pins reads to the master once the session has
/// written, or while it is inside a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MasterSlaveSession {
    pub in_transaction: bool,
    pub master_visited: bool,
}

impl MasterSlaveSession {
    pub fn begin(&mut self) {
        self.in_transaction = true;
    }

    /// End of transaction (commit or rollback).
    pub fn commit(&mut self) {
        self.in_transaction = false;
    }

    /// Called when the session's connection is released.
    pub fn clear(&mut self) {
        self.in_transaction = false;
        self.master_visited = false;
    }
}

#[derive(Debug, Clone, Default)]
pub struct MasterSlaveRouter {
    rules: HashMap<String, MasterSlaveRule>,
}

impl MasterSlaveRouter {
    pub fn new(rules: Vec<MasterSlaveRule>) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    pub fn from_config(configs: &[MasterSlaveRuleConfig]) -> KestrelResult<Self> {
        let rules = configs
            .iter()
            .map(MasterSlaveRule::from_config)
            .collect::<KestrelResult<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Physical data source for `data_source`. Names without a master-slave
    /// rule pass through unchanged.
    pub fn route(
        &self,
        data_source: &str,
        read_only: bool,
        session: &mut MasterSlaveSession,
    ) -> String {
        let Some(rule) = self.rules.get(&data_source.to_lowercase()) else {
            return data_source.to_string();
        };
        if !read_only || session.in_transaction || session.master_visited {
            session.master_visited = true;
            return rule.master.clone();
        }
        match rule.load_balancer.select(&rule.name, &rule.slaves) {
            Some(slave) => slave.to_string(),
            None => {
                tracing::debug!(rule = %rule.name, "No read replica configured, using master");
                rule.master.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router(load_balance: LoadBalanceKind, slaves: &[&str]) -> MasterSlaveRouter {
        MasterSlaveRouter::from_config(&[MasterSlaveRuleConfig {
            name: "ds_0".into(),
            master: "ds_0_master".into(),
            slaves: slaves.iter().map(|s| s.to_string()).collect(),
            load_balance,
        }])
        .unwrap()
    }

    #[test]
    fn test_reads_round_robin_over_slaves() {
        let r = router(LoadBalanceKind::RoundRobin, &["s0", "s1"]);
        let mut session = MasterSlaveSession::default();
        let picked: Vec<String> = (0..4).map(|_| r.route("ds_0", true, &mut session)).collect();
        assert_eq!(picked, vec!["s0", "s1", "s0", "s1"]);
        assert!(!session.master_visited);
    }

    #[test]
    fn test_write_pins_session_to_master() {
        let r = router(LoadBalanceKind::Random, &["s0", "s1"]);
        let mut session = MasterSlaveSession::default();
        assert_eq!(r.route("ds_0", false, &mut session), "ds_0_master");
        assert!(session.master_visited);
        assert_eq!(r.route("ds_0", true, &mut session), "ds_0_master");
        session.clear();
        assert_ne!(r.route("ds_0", true, &mut session), "ds_0_master");
    }

    #[test]
    fn test_transaction_reads_go_to_master() {
        let r = router(LoadBalanceKind::RoundRobin, &["s0"]);
        let mut session = MasterSlaveSession::default();
        session.begin();
        assert_eq!(r.route("ds_0", true, &mut session), "ds_0_master");
    }

    #[test]
    fn test_unknown_data_source_passes_through() {
        let r = router(LoadBalanceKind::RoundRobin, &["s0"]);
        let mut session = MasterSlaveSession::default();
        assert_eq!(r.route("ds_9", false, &mut session), "ds_9");
        assert!(!session.master_visited);
    }

    #[test]
    fn test_no_slaves_reads_from_master() {
        let r = router(LoadBalanceKind::RoundRobin, &[]);
        let mut session = MasterSlaveSession::default();
        assert_eq!(r.route("DS_0", true, &mut session), "ds_0_master");
    }
}
