// Connection pooling
// bb8 pools behind the ConnectionPool trait, shared by every driver

use crate::db::config::PoolConfig;
use crate::db::error::DbError;
use crate::db::traits::{Canceller, Connection, ConnectionPool};
use crate::db::types::{QueryResponse, SqlParam};
use bb8::{ErrorSink, ManageConnection, Pool, PooledConnection, RunError};
use std::sync::{Arc, Mutex, PoisonError};

/// Pool of driver connections.
///
/// bb8 reports failed connection attempts through its error sink only, so a
/// checkout against a dead server surfaces as a timeout. The last such error is
/// kept and returned instead, so the caller sees the engine's message.
pub struct Bb8Pool<M: ManageConnection> {
    pool: Pool<M>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl<M> Bb8Pool<M>
where
    M: ManageConnection,
    M::Error: Into<DbError>,
{
    pub async fn build(manager: M, config: &PoolConfig) -> Result<Self, DbError> {
        let last_error = Arc::new(Mutex::new(None));
        let pool = Pool::builder()
            .max_size(config.max_connections.max(1))
            .min_idle(Some(config.min_idle.clamp(1, config.max_connections.max(1))))
            .connection_timeout(config.acquire_timeout())
            .idle_timeout(config.idle_timeout())
            .max_lifetime(config.max_lifetime())
            .error_sink(Box::new(LastErrorSink {
                last: last_error.clone(),
            }))
            .build(manager)
            .await
            .map_err(|e| {
                let err: DbError = e.into();
                err.into_connection_error()
            })?;

        Ok(Self { pool, last_error })
    }
}

#[async_trait::async_trait]
impl<M> ConnectionPool for Bb8Pool<M>
where
    M: ManageConnection,
    M::Connection: Connection,
    M::Error: Into<DbError>,
{
    async fn acquire(&self) -> Result<Box<dyn Connection>, DbError> {
        match self.pool.get_owned().await {
            Ok(conn) => Ok(Box::new(Pooled(conn))),
            Err(RunError::User(e)) => Err(e.into()),
            Err(RunError::TimedOut) => {
                let last = self
                    .last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                Err(match last {
                    Some(message) => DbError::ConnectionError(message),
                    None => DbError::PoolExhausted(
                        "timed out waiting for a free connection".to_string(),
                    ),
                })
            }
        }
    }

    fn state(&self) -> (u32, u32) {
        let state = self.pool.state();
        (state.connections, state.idle_connections)
    }
}

/// Checked-out connection; returns to the pool on drop
struct Pooled<M: ManageConnection>(PooledConnection<'static, M>);

#[async_trait::async_trait]
impl<M> Connection for Pooled<M>
where
    M: ManageConnection,
    M::Connection: Connection,
{
    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryResponse, DbError> {
        self.0.query(sql, params).await
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DbError> {
        self.0.execute(sql, params).await
    }

    fn canceller(&self) -> Option<Arc<dyn Canceller>> {
        self.0.canceller()
    }

    fn is_broken(&self) -> bool {
        self.0.is_broken()
    }
}

#[derive(Debug, Clone)]
struct LastErrorSink {
    last: Arc<Mutex<Option<String>>>,
}

impl<E> ErrorSink<E> for LastErrorSink
where
    E: Into<DbError> + 'static,
{
    fn sink(&self, error: E) {
        let error: DbError = error.into();
        tracing::warn!(error = %error, "pooled connection attempt failed");
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.message().to_string());
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<E>> {
        Box::new(self.clone())
    }
}

/// Marks a connection busy for the duration of one statement.
///
/// A connection whose statement future was dropped mid-flight still has the
/// flag set when it goes back to the pool; the managers' `has_broken` checks
/// it so such connections are discarded.
#[derive(Debug, Default)]
pub struct BusyFlag(bool);

impl BusyFlag {
    pub fn enter(&mut self) {
        self.0 = true;
    }

    pub fn leave(&mut self) {
        self.0 = false;
    }

    pub fn is_set(&self) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::types::{CellValue, ColumnDef};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingConn;

    #[async_trait::async_trait]
    impl Connection for CountingConn {
        async fn query(&mut self, _sql: &str, _params: &[SqlParam]) -> Result<QueryResponse, DbError> {
            Ok(QueryResponse::with_rows(
                vec![ColumnDef::new("x", "int")],
                vec![vec![CellValue::Int(1)]],
            ))
        }

        async fn execute(&mut self, _sql: &str, _params: &[SqlParam]) -> Result<u64, DbError> {
            Ok(0)
        }

        fn canceller(&self) -> Option<Arc<dyn Canceller>> {
            None
        }
    }

    struct Manager {
        fail: bool,
        opened: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl ManageConnection for Manager {
        type Connection = CountingConn;
        type Error = DbError;

        async fn connect(&self) -> Result<CountingConn, DbError> {
            if self.fail {
                return Err(DbError::ConnectionError("refused".to_string()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(CountingConn)
        }

        async fn is_valid(&self, _conn: &mut CountingConn) -> Result<(), DbError> {
            Ok(())
        }

        fn has_broken(&self, _conn: &mut CountingConn) -> bool {
            false
        }
    }

    fn tight() -> PoolConfig {
        PoolConfig {
            max_connections: 1,
            min_idle: 1,
            acquire_timeout_secs: 1,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let opened = Arc::new(AtomicU32::new(0));
        let pool = Bb8Pool::build(
            Manager {
                fail: false,
                opened: opened.clone(),
            },
            &tight(),
        )
        .await
        .unwrap();

        for _ in 0..3 {
            let mut conn = pool.acquire().await.unwrap();
            assert_eq!(conn.query("SELECT 1", &[]).await.unwrap().row_count, 1);
        }
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let pool = Bb8Pool::build(
            Manager {
                fail: false,
                opened: Arc::new(AtomicU32::new(0)),
            },
            &tight(),
        )
        .await
        .unwrap();

        let _held = pool.acquire().await.unwrap();
        let started = std::time::Instant::now();
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, DbError::PoolExhausted(_)));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_build_reports_connection_error() {
        let result = Bb8Pool::build(
            Manager {
                fail: true,
                opened: Arc::new(AtomicU32::new(0)),
            },
            &tight(),
        )
        .await;
        assert!(matches!(result.err(), Some(DbError::ConnectionError(_))));
    }
}
