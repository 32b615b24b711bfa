//! In-memory connection pool for coordinator and engine tests.
//!
//! Every data source can be scripted with a response, a failure and a delay.
//! Acquires and releases are counted per data source so tests can check that
//! every leased connection goes back exactly once.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use kestrel_common::datum::Datum;
use kestrel_common::error::{KestrelError, KestrelResult};
use kestrel_executor::{BackendConnection, ConnectionPool, ShardResponse};
use kestrel_rewrite::SqlUnit;
use kestrel_sql_frontend::StatementKind;

#[derive(Debug, Clone, Default)]
pub struct Script {
    pub response: Option<ShardResponse>,
    pub failure: Option<String>,
    pub delay: Option<Duration>,
}

#[derive(Default)]
struct PoolState {
    scripts: DashMap<String, Script>,
    /// Responses keyed by (data source, physical SQL); checked before the
    /// data source script.
    by_sql: DashMap<(String, String), ShardResponse>,
    unavailable: DashMap<String, ()>,
    acquires: DashMap<String, usize>,
    releases: DashMap<String, usize>,
    executed: Mutex<Vec<(String, String, Vec<Datum>)>>,
}

#[derive(Clone, Default)]
pub struct MockPool {
    state: Arc<PoolState>,
}

impl MockPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, data_source: &str, response: ShardResponse) {
        self.state.scripts.entry(data_source.to_string()).or_default().response = Some(response);
    }

    pub fn respond_to_sql(&self, data_source: &str, sql: &str, response: ShardResponse) {
        self.state
            .by_sql
            .insert((data_source.to_string(), sql.to_string()), response);
    }

    pub fn fail(&self, data_source: &str, message: &str) {
        self.state.scripts.entry(data_source.to_string()).or_default().failure = Some(message.to_string());
    }

    pub fn delay(&self, data_source: &str, delay: Duration) {
        self.state.scripts.entry(data_source.to_string()).or_default().delay = Some(delay);
    }

    pub fn make_unavailable(&self, data_source: &str) {
        self.state.unavailable.insert(data_source.to_string(), ());
    }

    pub fn acquires(&self, data_source: &str) -> usize {
        self.state.acquires.get(data_source).map(|v| *v).unwrap_or(0)
    }

    pub fn releases(&self, data_source: &str) -> usize {
        self.state.releases.get(data_source).map(|v| *v).unwrap_or(0)
    }

    pub fn total_acquires(&self) -> usize {
        self.state.acquires.iter().map(|e| *e.value()).sum()
    }

    pub fn total_releases(&self) -> usize {
        self.state.releases.iter().map(|e| *e.value()).sum()
    }

    /// (data source, sql, parameters) in the order the units reached a backend.
    pub fn executed(&self) -> Vec<(String, String, Vec<Datum>)> {
        self.state.executed.lock().clone()
    }
}

#[async_trait]
impl ConnectionPool for MockPool {
    async fn acquire(
        &self,
        data_source: &str,
        _timeout: Duration,
    ) -> KestrelResult<Box<dyn BackendConnection>> {
        if self.state.unavailable.contains_key(data_source) {
            return Err(KestrelError::Pool {
                data_source: data_source.to_string(),
                reason: "no connection available".into(),
            });
        }
        *self.state.acquires.entry(data_source.to_string()).or_insert(0) += 1;
        Ok(Box::new(MockConnection {
            data_source: data_source.to_string(),
            state: self.state.clone(),
        }))
    }

    fn release(&self, conn: Box<dyn BackendConnection>) {
        *self.state.releases.entry(conn.data_source().to_string()).or_insert(0) += 1;
    }
}

struct MockConnection {
    data_source: String,
    state: Arc<PoolState>,
}

#[async_trait]
impl BackendConnection for MockConnection {
    fn data_source(&self) -> &str {
        &self.data_source
    }

    async fn execute(&mut self, unit: &SqlUnit, kind: StatementKind) -> KestrelResult<ShardResponse> {
        let script = self
            .state
            .scripts
            .get(&self.data_source)
            .map(|s| s.value().clone())
            .unwrap_or_default();
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        self.state.executed.lock().push((
            self.data_source.clone(),
            unit.sql.clone(),
            unit.parameters.clone(),
        ));
        if let Some(message) = script.failure {
            return Err(KestrelError::backend(&self.data_source, message));
        }
        let key = (self.data_source.clone(), unit.sql.clone());
        if let Some(response) = self.state.by_sql.get(&key) {
            return Ok(response.value().clone());
        }
        Ok(script.response.unwrap_or_else(|| {
            if kind.returns_rows() {
                ShardResponse::query(Vec::new(), Vec::new())
            } else {
                ShardResponse::update(0)
            }
        }))
    }
}
