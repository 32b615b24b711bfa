//! Scatter phase: dispatch every unit of a statement in parallel and wait on
//! a completion barrier.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;

use kestrel_common::config::ExecutorConfig;
use kestrel_common::error::{ExecutionError, KestrelError, KestrelResult};
use kestrel_rewrite::SqlUnit;
use kestrel_sql_frontend::StatementKind;

use crate::pool::{ConnectionPool, PooledConnection};
use crate::response::ShardResponse;

/// One physical statement bound to the data source that runs it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionUnit {
    pub data_source: String,
    pub sql_unit: SqlUnit,
}

impl ExecutionUnit {
    pub fn new(data_source: impl Into<String>, sql_unit: SqlUnit) -> Self {
        Self {
            data_source: data_source.into(),
            sql_unit,
        }
    }
}

/// What one data-source task reports back to the barrier.
struct BatchOutcome {
    units: usize,
    responses: Vec<(usize, ShardResponse)>,
    /// Index of the failing unit and its error. Later units of the same
    /// batch were not sent.
    error: Option<(usize, KestrelError)>,
}

/// Per-statement completion barrier state.
struct Barrier {
    responses: Vec<Option<ShardResponse>>,
    first_error: Option<(usize, KestrelError)>,
    arrived: usize,
}

impl Barrier {
    fn new(units: usize) -> Self {
        Self {
            responses: (0..units).map(|_| None).collect(),
            first_error: None,
            arrived: 0,
        }
    }

    fn record_error(&mut self, index: usize, err: KestrelError) {
        let earlier = match &self.first_error {
            Some((current, _)) => index < *current,
            None => true,
        };
        if earlier {
            self.first_error = Some((index, err));
        }
    }

    /// Wait for every task. Errors never cut the wait short: every task must
    /// finish so its connection goes back to the pool.
    async fn wait(&mut self, tasks: &mut JoinSet<BatchOutcome>) {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    self.arrived += outcome.units;
                    for (idx, response) in outcome.responses {
                        if let Some(slot) = self.responses.get_mut(idx) {
                            *slot = Some(response);
                        }
                    }
                    if let Some((idx, err)) = outcome.error {
                        self.record_error(idx, err);
                    }
                }
                Err(join_err) => {
                    self.record_error(
                        usize::MAX,
                        KestrelError::internal_bug(
                            "E-SCATTER-001",
                            "unit task panicked during scatter execution",
                            join_err.to_string(),
                        ),
                    );
                }
            }
        }
    }
}

/// Dispatches the units of one statement and collects their responses.
pub struct ExecutionCoordinator {
    pool: Arc<dyn ConnectionPool>,
    config: ExecutorConfig,
}

impl ExecutionCoordinator {
    pub fn new(pool: Arc<dyn ConnectionPool>, config: ExecutorConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute `units` and return their responses in unit order.
    ///
    /// One connection is acquired per distinct data source; units that share
    /// a data source run one after another on that connection, and data
    /// sources run in parallel. The first error in unit order wins.
    pub async fn execute(
        &self,
        kind: StatementKind,
        units: Vec<ExecutionUnit>,
    ) -> KestrelResult<Vec<ShardResponse>> {
        if units.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let total = units.len();

        let mut batches: Vec<(String, Vec<(usize, SqlUnit)>)> = Vec::new();
        for (idx, unit) in units.into_iter().enumerate() {
            match batches.iter_mut().find(|(ds, _)| *ds == unit.data_source) {
                Some((_, batch)) => batch.push((idx, unit.sql_unit)),
                None => batches.push((unit.data_source, vec![(idx, unit.sql_unit)])),
            }
        }

        let mut tasks = JoinSet::new();
        for (data_source, batch) in batches {
            let pool = self.pool.clone();
            let acquire_timeout = self.config.acquire_timeout();
            tasks.spawn(run_batch(pool, data_source, batch, kind, acquire_timeout));
        }

        let mut barrier = Barrier::new(total);
        match self.config.statement_timeout() {
            Some(limit) => {
                if tokio::time::timeout(limit, barrier.wait(&mut tasks)).await.is_err() {
                    let pending_units = total.saturating_sub(barrier.arrived);
                    tasks.abort_all();
                    // Aborted tasks drop their leases on the way out.
                    while tasks.join_next().await.is_some() {}
                    tracing::warn!(
                        timeout_ms = self.config.statement_timeout_ms,
                        pending_units,
                        "Statement timed out, abandoned pending units"
                    );
                    kestrel_observability::record_timeout(kind.as_str());
                    return Err(KestrelError::Timeout {
                        timeout_ms: self.config.statement_timeout_ms,
                        pending_units,
                    });
                }
            }
            None => barrier.wait(&mut tasks).await,
        }

        if let Some((idx, err)) = barrier.first_error {
            tracing::warn!(unit = idx, error = %err, "Statement failed on backend");
            return Err(err);
        }

        let mut responses = Vec::with_capacity(total);
        for (idx, slot) in barrier.responses.into_iter().enumerate() {
            let response = slot.ok_or_else(|| {
                KestrelError::internal_bug(
                    "E-SCATTER-002",
                    format!("unit {} finished without a response", idx),
                    format!("units={}", total),
                )
            })?;
            responses.push(response);
        }
        tracing::debug!(
            units = total,
            elapsed_us = start.elapsed().as_micros() as u64,
            "Scatter complete"
        );
        Ok(responses)
    }
}

async fn run_batch(
    pool: Arc<dyn ConnectionPool>,
    data_source: String,
    batch: Vec<(usize, SqlUnit)>,
    kind: StatementKind,
    acquire_timeout: std::time::Duration,
) -> BatchOutcome {
    let units = batch.len();
    let first_idx = batch.first().map(|(idx, _)| *idx).unwrap_or_default();
    let mut conn = match PooledConnection::acquire(pool, &data_source, acquire_timeout).await {
        Ok(conn) => conn,
        Err(err) => {
            kestrel_observability::record_backend_error(&data_source);
            return BatchOutcome {
                units,
                responses: Vec::new(),
                error: Some((first_idx, err)),
            };
        }
    };

    let mut responses = Vec::with_capacity(units);
    for (idx, sql_unit) in batch {
        tracing::debug!(data_source = %data_source, unit = idx, sql = %sql_unit.sql, "Dispatching unit");
        match conn.execute(&sql_unit, kind).await {
            Ok(response) => {
                if let Err(err) = check_response(idx, kind, &response) {
                    return BatchOutcome {
                        units,
                        responses,
                        error: Some((idx, err)),
                    };
                }
                responses.push((idx, response));
            }
            Err(err) => {
                tracing::warn!(data_source = %data_source, unit = idx, error = %err, "Unit failed");
                kestrel_observability::record_backend_error(&data_source);
                return BatchOutcome {
                    units,
                    responses,
                    error: Some((idx, err)),
                };
            }
        }
    }
    BatchOutcome {
        units,
        responses,
        error: None,
    }
}

/// Row statements must answer with rows, everything else with a count.
fn check_response(idx: usize, kind: StatementKind, response: &ShardResponse) -> KestrelResult<()> {
    let expected = if kind.returns_rows() { "query" } else { "update" };
    if response.kind_name() == expected {
        return Ok(());
    }
    Err(ExecutionError::UnexpectedResponse {
        index: idx,
        expected,
        got: response.kind_name(),
    }
    .into())
}
