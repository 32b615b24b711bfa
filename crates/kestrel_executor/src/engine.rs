//! `ShardingEngine`: the entry point a protocol front-end calls with a parsed
//! statement. Runs key generation, routing, rewrite, read/write splitting,
//! scatter and merge for one statement.

use std::sync::Arc;
use std::time::Instant;

use kestrel_common::config::{ExecutorConfig, KestrelConfig, PropsConfig};
use kestrel_common::error::KestrelResult;
use kestrel_rewrite::SqlUnit;
use kestrel_routing::{
    apply_generated_keys, KeyGenerator, MasterSlaveRouter, MasterSlaveSession, RoutingResult,
    RoutingUnit, ShardingRouter, ShardingRule, SnowflakeKeyGenerator,
};
use kestrel_sql_frontend::{SqlStatement, StatementKind};

use crate::merge::{merge, MergedResult};
use crate::pool::ConnectionPool;
use crate::scatter::{ExecutionCoordinator, ExecutionUnit};

pub struct ShardingEngine {
    rule: Arc<ShardingRule>,
    router: ShardingRouter,
    master_slave: MasterSlaveRouter,
    coordinator: ExecutionCoordinator,
    key_generator: Arc<dyn KeyGenerator>,
    props: PropsConfig,
}

impl ShardingEngine {
    pub fn new(
        rule: Arc<ShardingRule>,
        master_slave: MasterSlaveRouter,
        pool: Arc<dyn ConnectionPool>,
        executor: ExecutorConfig,
        props: PropsConfig,
    ) -> KestrelResult<Self> {
        let key_generator = Arc::new(SnowflakeKeyGenerator::new(props.worker_id)?);
        Ok(Self {
            router: ShardingRouter::new(rule.clone()),
            rule,
            master_slave,
            coordinator: ExecutionCoordinator::new(pool, executor),
            key_generator,
            props,
        })
    }

    pub fn from_config(config: &KestrelConfig, pool: Arc<dyn ConnectionPool>) -> KestrelResult<Self> {
        let rule = Arc::new(ShardingRule::from_config(&config.sharding)?);
        let master_slave = MasterSlaveRouter::from_config(&config.master_slave)?;
        tracing::info!(
            tables = rule.table_rules().len(),
            master_slave_rules = config.master_slave.len(),
            statement_timeout_ms = config.executor.statement_timeout_ms,
            "Sharding engine ready"
        );
        Self::new(
            rule,
            master_slave,
            pool,
            config.executor.clone(),
            config.props.clone(),
        )
    }

    pub fn with_key_generator(mut self, key_generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = key_generator;
        self
    }

    pub fn rule(&self) -> &Arc<ShardingRule> {
        &self.rule
    }

    pub fn route(&self, stmt: &SqlStatement) -> KestrelResult<RoutingResult> {
        self.router.route(stmt)
    }

    pub fn rewrite(
        &self,
        stmt: &SqlStatement,
        routing: &RoutingResult,
    ) -> KestrelResult<Vec<(RoutingUnit, SqlUnit)>> {
        kestrel_rewrite::rewrite(&self.rule, stmt, routing)
    }

    /// Run one logical statement end to end.
    ///
    /// Configuration and routing errors surface before any connection is
    /// acquired. A statement that routes nowhere succeeds trivially without
    /// touching a backend.
    pub async fn execute(
        &self,
        mut stmt: SqlStatement,
        session: &mut MasterSlaveSession,
    ) -> KestrelResult<MergedResult> {
        let start = Instant::now();
        let kind = stmt.kind;
        let result = self.execute_inner(&mut stmt, session).await;
        let units = result.as_ref().map(|(units, _)| *units).unwrap_or_default();
        kestrel_observability::record_statement_metrics(
            kind.as_str(),
            start.elapsed().as_micros() as u64,
            result.is_ok(),
            units,
        );
        result.map(|(_, merged)| merged)
    }

    async fn execute_inner(
        &self,
        stmt: &mut SqlStatement,
        session: &mut MasterSlaveSession,
    ) -> KestrelResult<(usize, MergedResult)> {
        let generated_keys = apply_generated_keys(&self.rule, stmt, self.key_generator.as_ref())?;
        let routing = self.router.route(stmt)?;
        if self.props.sql_show {
            tracing::info!(kind = stmt.kind.as_str(), sql = %stmt.sql, "Logic SQL");
        }
        if routing.is_empty() {
            tracing::debug!(sql = %stmt.sql, "No routing unit matched, nothing to execute");
            return Ok((0, MergedResult::trivial(stmt.kind)));
        }

        let rewritten = kestrel_rewrite::rewrite(&self.rule, stmt, &routing)?;
        let read_only = stmt.is_read_only();
        let mut units = Vec::with_capacity(rewritten.len());
        for (unit, sql_unit) in rewritten {
            let data_source = self
                .master_slave
                .route(&unit.data_source_name, read_only, session);
            if self.props.sql_show {
                tracing::info!(
                    data_source = %data_source,
                    sql = %sql_unit.sql,
                    parameters = sql_unit.parameters.len(),
                    "Actual SQL"
                );
            }
            units.push(ExecutionUnit::new(data_source, sql_unit));
        }
        let unit_count = units.len();

        if stmt.kind == StatementKind::Tcl {
            track_transaction(&stmt.sql, session);
        }
        let responses = self.coordinator.execute(stmt.kind, units).await?;
        let mut merged = merge(stmt, responses, self.coordinator.config())?;
        if let MergedResult::Update(update) = &mut merged {
            update.generated_keys = generated_keys;
        }
        Ok((unit_count, merged))
    }
}

/// Keep the read/write split session in step with transaction boundaries.
fn track_transaction(sql: &str, session: &mut MasterSlaveSession) {
    let keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .trim_end_matches(';')
        .to_ascii_uppercase();
    match keyword.as_str() {
        "BEGIN" | "START" => session.begin(),
        "COMMIT" | "ROLLBACK" | "END" => session.commit(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_transaction_keywords() {
        let mut session = MasterSlaveSession::default();
        track_transaction("begin", &mut session);
        assert!(session.in_transaction);
        track_transaction("COMMIT;", &mut session);
        assert!(!session.in_transaction);
        track_transaction("START TRANSACTION", &mut session);
        assert!(session.in_transaction);
        track_transaction("ROLLBACK", &mut session);
        assert!(!session.in_transaction);
        track_transaction("SET autocommit = 1", &mut session);
        assert!(!session.in_transaction);
    }
}
