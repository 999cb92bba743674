// Session
// One live connection handle: its pool, transaction pin and in-flight statements

use crate::db::cancel::{abortable, CancelRegistry, CancelTicket, InFlight};
use crate::db::config::ConnectionConfig;
use crate::db::dialect::Dialect;
use crate::db::error::DbError;
use crate::db::traits::{Canceller, Connection, ConnectionPool, DatabaseDriver};
use crate::transport::ssh::SshTunnel;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

/// Connection pinned by an open transaction
type PinnedConn = Arc<tokio::sync::Mutex<Box<dyn Connection>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    None,
    Active,
}

pub struct Session {
    handle: String,
    config: ConnectionConfig,
    driver: Arc<dyn DatabaseDriver>,
    pool: Arc<dyn ConnectionPool>,
    acquire_timeout: Duration,
    pinned: Mutex<Option<PinnedConn>>,
    tx_control: tokio::sync::Mutex<()>,
    inflight: Arc<CancelRegistry<u64>>,
    next_lease: AtomicU64,
    shutdown: CancellationToken,
    tunnel: Mutex<Option<SshTunnel>>,
}

impl Session {
    pub fn new(
        handle: String,
        config: ConnectionConfig,
        driver: Arc<dyn DatabaseDriver>,
        pool: Arc<dyn ConnectionPool>,
        acquire_timeout: Duration,
        tunnel: Option<SshTunnel>,
    ) -> Self {
        Self {
            handle,
            config,
            driver,
            pool,
            acquire_timeout,
            pinned: Mutex::new(None),
            tx_control: tokio::sync::Mutex::new(()),
            inflight: Arc::new(CancelRegistry::new()),
            next_lease: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            tunnel: Mutex::new(tunnel),
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn driver(&self) -> &dyn DatabaseDriver {
        self.driver.as_ref()
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        self.driver.dialect()
    }

    pub fn pool_state(&self) -> (u32, u32) {
        self.pool.state()
    }

    /// Run `fut` unless the session is closed first
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, DbError>
    where
        F: std::future::Future<Output = Result<T, DbError>>,
    {
        abortable(&self.shutdown, "connection closed", fut).await
    }

    /// Check out the connection the next statement runs on.
    ///
    /// With a transaction open this is the pinned connection, and callers queue
    /// for it up to the acquire timeout. Otherwise a pooled connection.
    pub async fn lease(&self) -> Result<Lease, DbError> {
        if self.shutdown.is_cancelled() {
            return Err(DbError::Cancelled("connection closed".to_string()));
        }

        loop {
            let Some(pinned) = self.pinned_conn() else {
                let conn = self.pool.acquire().await?;
                return Ok(self.track(LeaseConn::Pooled(conn)));
            };

            let guard = tokio::time::timeout(self.acquire_timeout, pinned.clone().lock_owned())
                .await
                .map_err(|_| {
                    DbError::PoolExhausted(
                        "timed out waiting for the connection held by the open transaction"
                            .to_string(),
                    )
                })?;

            // The transaction may have ended while we waited
            if self.is_pinned(&pinned) {
                return Ok(self.track(LeaseConn::Pinned(guard)));
            }
        }
    }

    fn track(&self, conn: LeaseConn) -> Lease {
        let pinned = matches!(conn, LeaseConn::Pinned(_));
        let canceller = conn.get().canceller();
        let ticket = canceller.map(|c| {
            let id = self.next_lease.fetch_add(1, Ordering::Relaxed);
            self.inflight
                .register(id, InFlight::new(Some(c), self.shutdown.clone()))
        });
        Lease {
            conn,
            pinned,
            _ticket: ticket,
        }
    }

    pub fn transaction_state(&self) -> TransactionState {
        if self.pinned_conn().is_some() {
            TransactionState::Active
        } else {
            TransactionState::None
        }
    }

    pub async fn begin(&self) -> Result<(), DbError> {
        let _control = self.tx_control.lock().await;
        if self.pinned_conn().is_some() {
            return Err(DbError::ValidationError(
                "a transaction is already active on this connection".to_string(),
            ));
        }

        let mut conn = self.pool.acquire().await?;
        conn.execute(self.dialect().begin_sql(), &[]).await?;
        *self.slot() = Some(Arc::new(tokio::sync::Mutex::new(conn)));

        tracing::info!(handle = %self.handle, "transaction started");
        Ok(())
    }

    pub async fn commit(&self) -> Result<(), DbError> {
        self.finish(self.dialect().commit_sql(), "committed").await
    }

    pub async fn rollback(&self) -> Result<(), DbError> {
        self.finish(self.dialect().rollback_sql(), "rolled back").await
    }

    async fn finish(&self, sql: &str, outcome: &str) -> Result<(), DbError> {
        let _control = self.tx_control.lock().await;
        let pinned = self
            .pinned_conn()
            .ok_or_else(|| DbError::ValidationError("no active transaction".to_string()))?;

        let mut conn = tokio::time::timeout(self.acquire_timeout, pinned.clone().lock_owned())
            .await
            .map_err(|_| {
                DbError::PoolExhausted(
                    "timed out waiting for a running statement in the transaction".to_string(),
                )
            })?;

        // The transaction may have been abandoned while we waited
        if !self.is_pinned(&pinned) {
            return Err(DbError::ValidationError("no active transaction".to_string()));
        }

        let result = conn.execute(sql, &[]).await;
        if result.is_err() {
            // The connection may still hold an open transaction
            let _ = conn.execute(self.dialect().rollback_sql(), &[]).await;
        }
        *self.slot() = None;

        match &result {
            Ok(_) => tracing::info!(handle = %self.handle, "transaction {}", outcome),
            Err(e) => tracing::warn!(handle = %self.handle, error = %e, "transaction end failed"),
        }
        result.map(|_| ())
    }

    /// End the transaction whose statement on `lease` was dropped mid-flight.
    ///
    /// The pin is released so later statements run on pooled connections. A clean
    /// connection is rolled back; a broken one is dropped and the pool discards it,
    /// which ends the transaction server side.
    pub async fn abandon_transaction(&self, mut lease: Lease) {
        if !lease.in_transaction() {
            return;
        }
        // The lease holds the pinned lock, so the slot still names its connection
        self.slot().take();

        let conn = lease.conn();
        if conn.is_broken() {
            tracing::warn!(handle = %self.handle, "statement abandoned mid-transaction, discarding connection");
            return;
        }
        let rollback = conn.execute(self.dialect().rollback_sql(), &[]);
        match tokio::time::timeout(self.acquire_timeout, rollback).await {
            Ok(Ok(_)) => tracing::info!(handle = %self.handle, "abandoned transaction rolled back"),
            Ok(Err(e)) => tracing::warn!(handle = %self.handle, error = %e, "rollback of abandoned transaction failed"),
            Err(_) => tracing::warn!(handle = %self.handle, "rollback of abandoned transaction timed out"),
        }
    }

    /// Abort in-flight work and release every resource the session holds.
    pub async fn close(&self) {
        self.inflight.cancel_all().await;
        self.shutdown.cancel();

        let pinned = self.slot().take();
        if let Some(pinned) = pinned {
            let rollback = async {
                let mut conn = pinned.lock().await;
                if conn.is_broken() {
                    return Err(DbError::ConnectionError(
                        "connection left mid-statement".to_string(),
                    ));
                }
                conn.execute(self.dialect().rollback_sql(), &[]).await
            };
            match tokio::time::timeout(self.acquire_timeout, rollback).await {
                Ok(Ok(_)) => tracing::debug!(handle = %self.handle, "open transaction rolled back"),
                Ok(Err(e)) => tracing::warn!(handle = %self.handle, error = %e, "rollback on close failed"),
                Err(_) => tracing::warn!(handle = %self.handle, "rollback on close timed out"),
            }
        }

        let tunnel = self
            .tunnel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tunnel) = tunnel {
            // Joining the forwarding thread blocks
            if let Err(e) = tokio::task::spawn_blocking(move || drop(tunnel)).await {
                tracing::warn!(error = %e, "ssh tunnel shutdown failed");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<PinnedConn>> {
        self.pinned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pinned_conn(&self) -> Option<PinnedConn> {
        self.slot().clone()
    }

    fn is_pinned(&self, conn: &PinnedConn) -> bool {
        self.slot()
            .as_ref()
            .map(|current| Arc::ptr_eq(current, conn))
            .unwrap_or(false)
    }
}

enum LeaseConn {
    Pooled(Box<dyn Connection>),
    Pinned(OwnedMutexGuard<Box<dyn Connection>>),
}

impl LeaseConn {
    fn get(&self) -> &dyn Connection {
        match self {
            LeaseConn::Pooled(conn) => &**conn,
            LeaseConn::Pinned(guard) => &***guard,
        }
    }
}

/// Scoped use of one connection. Dropping it returns a pooled connection or
/// unlocks the pinned one.
pub struct Lease {
    conn: LeaseConn,
    pinned: bool,
    _ticket: Option<CancelTicket<u64>>,
}

impl Lease {
    pub fn conn(&mut self) -> &mut dyn Connection {
        match &mut self.conn {
            LeaseConn::Pooled(conn) => &mut **conn,
            LeaseConn::Pinned(guard) => &mut ***guard,
        }
    }

    /// Whether statements on this lease run inside the user's transaction
    pub fn in_transaction(&self) -> bool {
        self.pinned
    }

    pub fn canceller(&self) -> Option<Arc<dyn Canceller>> {
        self.conn.get().canceller()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::PoolConfig;
    use crate::db::drivers::sqlite::SqliteDriver;
    use crate::db::traits::ConnectTarget;
    use crate::db::types::CellValue;

    async fn memory_session(acquire_timeout: Duration) -> Arc<Session> {
        let config = ConnectionConfig::sqlite("mem", ":memory:");
        let driver: Arc<dyn DatabaseDriver> = Arc::new(SqliteDriver::new());
        let pool_config = config.effective_pool(&PoolConfig::default());
        let pool = driver
            .connect(&config, &ConnectTarget::direct(&config), &pool_config)
            .await
            .unwrap();
        Arc::new(Session::new(
            "h1".to_string(),
            config,
            driver,
            pool,
            acquire_timeout,
            None,
        ))
    }

    #[tokio::test]
    async fn test_transaction_state_transitions() {
        let session = memory_session(Duration::from_secs(5)).await;
        assert_eq!(session.transaction_state(), TransactionState::None);
        assert!(matches!(session.commit().await, Err(DbError::ValidationError(_))));

        session.begin().await.unwrap();
        assert_eq!(session.transaction_state(), TransactionState::Active);
        assert!(matches!(session.begin().await, Err(DbError::ValidationError(_))));

        session.rollback().await.unwrap();
        assert_eq!(session.transaction_state(), TransactionState::None);
    }

    #[tokio::test]
    async fn test_rollback_discards_work() {
        let session = memory_session(Duration::from_secs(5)).await;
        {
            let mut lease = session.lease().await.unwrap();
            lease
                .conn()
                .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
                .await
                .unwrap();
        }

        session.begin().await.unwrap();
        {
            let mut lease = session.lease().await.unwrap();
            assert!(lease.in_transaction());
            lease.conn().execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        }
        session.rollback().await.unwrap();

        let mut lease = session.lease().await.unwrap();
        let resp = lease.conn().query("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(resp.rows[0][0], CellValue::Int(0));
    }

    #[tokio::test]
    async fn test_second_caller_queues_then_times_out() {
        let session = memory_session(Duration::from_millis(200)).await;
        session.begin().await.unwrap();

        let held = session.lease().await.unwrap();
        let err = session.lease().await.err().unwrap();
        assert!(matches!(err, DbError::PoolExhausted(_)));

        drop(held);
        assert!(session.lease().await.is_ok());
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_statement_ends_transaction() {
        let session = memory_session(Duration::from_secs(5)).await;
        {
            let mut lease = session.lease().await.unwrap();
            lease
                .conn()
                .execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
                .await
                .unwrap();
        }

        session.begin().await.unwrap();
        let mut lease = session.lease().await.unwrap();
        lease.conn().execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        session.abandon_transaction(lease).await;

        assert_eq!(session.transaction_state(), TransactionState::None);
        assert!(matches!(session.commit().await, Err(DbError::ValidationError(_))));

        let mut lease = session.lease().await.unwrap();
        assert!(!lease.in_transaction());
        let resp = lease.conn().query("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(resp.rows[0][0], CellValue::Int(0));
    }

    #[tokio::test]
    async fn test_close_rejects_new_work() {
        let session = memory_session(Duration::from_secs(5)).await;
        session.begin().await.unwrap();
        session.close().await;

        assert!(session.is_closed());
        assert_eq!(session.transaction_state(), TransactionState::None);
        assert!(matches!(session.lease().await.err(), Some(DbError::Cancelled(_))));
    }
}
