//! Connection-pool seam. The pool itself lives outside this crate; the
//! coordinator only acquires, uses and releases connections through these
//! traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use kestrel_common::error::{KestrelError, KestrelResult};
use kestrel_rewrite::SqlUnit;
use kestrel_sql_frontend::StatementKind;

use crate::response::ShardResponse;

/// One backend connection, used by a single statement at a time.
#[async_trait]
pub trait BackendConnection: Send {
    fn data_source(&self) -> &str;

    async fn execute(&mut self, unit: &SqlUnit, kind: StatementKind) -> KestrelResult<ShardResponse>;
}

#[async_trait]
pub trait ConnectionPool: Send + Sync {
    async fn acquire(
        &self,
        data_source: &str,
        timeout: Duration,
    ) -> KestrelResult<Box<dyn BackendConnection>>;

    /// Return a connection. Called exactly once per acquired connection.
    fn release(&self, conn: Box<dyn BackendConnection>);
}

/// A leased connection. Returns itself to the pool on drop, which covers
/// every exit path of a unit task: success, error, and abort on timeout.
pub struct PooledConnection {
    conn: Option<Box<dyn BackendConnection>>,
    pool: Arc<dyn ConnectionPool>,
}

impl PooledConnection {
    pub async fn acquire(
        pool: Arc<dyn ConnectionPool>,
        data_source: &str,
        timeout: Duration,
    ) -> KestrelResult<Self> {
        let conn = match tokio::time::timeout(timeout, pool.acquire(data_source, timeout)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(KestrelError::Pool {
                    data_source: data_source.to_string(),
                    reason: format!("acquire timed out after {}ms", timeout.as_millis()),
                })
            }
        };
        Ok(Self {
            conn: Some(conn),
            pool,
        })
    }

    pub fn data_source(&self) -> &str {
        self.conn.as_ref().map(|c| c.data_source()).unwrap_or_default()
    }

    pub async fn execute(&mut self, unit: &SqlUnit, kind: StatementKind) -> KestrelResult<ShardResponse> {
        let conn = self.conn.as_mut().ok_or_else(|| {
            KestrelError::internal_bug(
                "E-POOL-001",
                "connection used after release",
                unit.sql.clone(),
            )
        })?;
        conn.execute(unit, kind).await
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
