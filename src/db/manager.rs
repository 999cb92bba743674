// Connection Manager
// Owns live sessions and routes every handle-addressed operation to its driver

use crate::db::cancel::{abortable, CancelRegistry, InFlight};
use crate::db::config::{ConnectionConfig, PoolConfig};
use crate::db::error::DbError;
use crate::db::registry::DriverRegistry;
use crate::db::schema::{ColumnInfo, ForeignKeyInfo, IndexInfo, SchemaInfo, TableInfo};
use crate::db::session::{Lease, Session, TransactionState};
use crate::db::traits::{ConnectTarget, ConnectionPool, DatabaseDriver};
use crate::db::types::{QueryResponse, SqlParam};
use crate::transport::ssh::SshTunnel;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Everything `connect` opens before a session exists
struct Opened {
    driver: Arc<dyn DatabaseDriver>,
    pool: Arc<dyn ConnectionPool>,
    pool_config: PoolConfig,
    tunnel: Option<SshTunnel>,
}

/// Connection registry.
///
/// Handles are fresh UUIDs minted per `connect`, so a handle is never reused
/// after its session is gone and any stale handle fails with
/// [`DbError::UnknownConnection`].
pub struct ConnectionManager {
    drivers: DriverRegistry,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    queries: Arc<CancelRegistry<String>>,
    pool_defaults: std::sync::RwLock<PoolConfig>,
}

impl ConnectionManager {
    pub fn new(drivers: DriverRegistry, pool_defaults: PoolConfig) -> Self {
        Self {
            drivers,
            sessions: RwLock::new(HashMap::new()),
            queries: Arc::new(CancelRegistry::new()),
            pool_defaults: std::sync::RwLock::new(pool_defaults),
        }
    }

    /// Manager with every built-in driver
    pub async fn with_defaults(pool_defaults: PoolConfig) -> Self {
        Self::new(DriverRegistry::with_builtin_drivers().await, pool_defaults)
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    /// Pool sizing applied to configs that carry none. Existing sessions keep theirs.
    pub fn set_pool_defaults(&self, defaults: PoolConfig) {
        *self
            .pool_defaults
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = defaults;
    }

    fn pool_defaults(&self) -> PoolConfig {
        self.pool_defaults
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub async fn connect(&self, config: ConnectionConfig) -> Result<String, DbError> {
        let opened = self.open(&config).await?;
        let handle = uuid::Uuid::new_v4().to_string();

        tracing::info!(
            handle = %handle,
            config_id = %config.id,
            engine = ?config.database_type(),
            driver = opened.driver.driver_name(),
            tunneled = opened.tunnel.is_some(),
            "connected"
        );

        let session = Session::new(
            handle.clone(),
            config,
            opened.driver,
            opened.pool,
            opened.pool_config.acquire_timeout(),
            opened.tunnel,
        );
        self.sessions
            .write()
            .await
            .insert(handle.clone(), Arc::new(session));
        Ok(handle)
    }

    /// Connect, ping, tear down. Expected failures come back as `false`.
    pub async fn test_connection(&self, config: &ConnectionConfig) -> Result<bool, DbError> {
        let outcome = async {
            config.validate()?;
            let engine = config
                .database_type()
                .ok_or_else(|| DbError::ConnectionError("unsupported engine".to_string()))?;
            let driver = self.drivers.get_driver(engine).await?;
            let pool_config = config.effective_pool(&self.pool_defaults());
            let (target, tunnel) = self.open_transport(config, &pool_config).await?;
            let result = driver.test_connection(config, &target, &pool_config).await;
            close_tunnel(tunnel).await;
            result
        }
        .await;

        match outcome {
            Ok(()) => Ok(true),
            Err(DbError::IoError(message)) => Err(DbError::IoError(message)),
            Err(e) => {
                tracing::info!(config_id = %config.id, error = %e, "connection test failed");
                Ok(false)
            }
        }
    }

    /// Idempotent. Unknown handles are ignored.
    pub async fn disconnect(&self, handle: &str) -> Result<(), DbError> {
        let session = self.sessions.write().await.remove(handle);
        match session {
            Some(session) => {
                session.close().await;
                tracing::info!(handle = %handle, "disconnected");
            }
            None => tracing::debug!(handle = %handle, "disconnect on unknown handle ignored"),
        }
        Ok(())
    }

    /// Close every session, used on application exit
    pub async fn disconnect_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close().await;
        }
    }

    pub async fn get(&self, handle: &str) -> Result<Arc<Session>, DbError> {
        self.sessions
            .read()
            .await
            .get(handle)
            .cloned()
            .ok_or_else(|| DbError::UnknownConnection(handle.to_string()))
    }

    pub async fn is_connected(&self, handle: &str) -> bool {
        self.sessions.read().await.contains_key(handle)
    }

    pub async fn handles(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Opened, DbError> {
        config.validate()?;
        let engine = config.database_type().ok_or_else(|| {
            DbError::ConnectionError(format!("unsupported engine for '{}'", config.name))
        })?;
        let driver = self.drivers.get_driver(engine).await?;
        let pool_config = config.effective_pool(&self.pool_defaults());

        let (target, tunnel) = self.open_transport(config, &pool_config).await?;
        match driver.connect(config, &target, &pool_config).await {
            Ok(pool) => Ok(Opened {
                driver,
                pool,
                pool_config,
                tunnel,
            }),
            Err(e) => {
                close_tunnel(tunnel).await;
                Err(e.into_connection_error())
            }
        }
    }

    /// Socket target for the driver, through an SSH tunnel when one is configured
    async fn open_transport(
        &self,
        config: &ConnectionConfig,
        pool_config: &PoolConfig,
    ) -> Result<(ConnectTarget, Option<SshTunnel>), DbError> {
        let direct = ConnectTarget::direct(config);
        let Some(ssh) = config.ssh.clone() else {
            return Ok((direct, None));
        };

        let connect_timeout = pool_config.connect_timeout();
        let (remote_host, remote_port) = (direct.host.clone(), direct.port);
        let tunnel = tokio::task::spawn_blocking(move || {
            SshTunnel::open(&ssh, &remote_host, remote_port, connect_timeout)
        })
        .await
        .map_err(|e| DbError::ConnectionError(format!("ssh tunnel task failed: {}", e)))??;

        let target = ConnectTarget {
            host: "127.0.0.1".to_string(),
            port: tunnel.local_port(),
            tls_domain: direct.host,
        };
        Ok((target, Some(tunnel)))
    }

    async fn lease(&self, handle: &str) -> Result<(Arc<Session>, Lease), DbError> {
        let session = self.get(handle).await?;
        let lease = session.guard(session.lease()).await?;
        Ok((session, lease))
    }

    // ========================================================================
    // Query execution
    // ========================================================================

    /// Run one statement. `query_id` makes it cancellable through
    /// [`ConnectionManager::cancel_query`]; `timeout_ms` bounds it.
    pub async fn execute_query(
        &self,
        handle: &str,
        sql: &str,
        query_id: Option<String>,
        timeout_ms: Option<u64>,
    ) -> Result<QueryResponse, DbError> {
        let (session, mut lease) = self.lease(handle).await?;
        let canceller = lease.canceller();
        let abort = CancellationToken::new();
        let _ticket = query_id
            .clone()
            .map(|id| self.queries.register(id, InFlight::new(canceller.clone(), abort.clone())));

        let work = session.guard(abortable(
            &abort,
            "cancelled by user",
            session.driver().execute(lease.conn(), sql),
        ));

        let (result, dropped) = match timeout_ms {
            None => {
                let result = work.await;
                let dropped = matches!(result, Err(DbError::Cancelled(_)));
                (result, dropped)
            }
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), work).await {
                Ok(result) => {
                    let dropped = matches!(result, Err(DbError::Cancelled(_)));
                    (result, dropped)
                }
                Err(_) => {
                    tracing::warn!(handle = %handle, query_id = ?query_id, timeout_ms = ms, "query timed out");
                    if let Some(canceller) = canceller {
                        if let Err(e) = canceller.cancel().await {
                            tracing::debug!(error = %e, "cancel after timeout failed");
                        }
                    }
                    let err = DbError::QueryError(format!("query timed out after {} ms", ms));
                    (Err(err), true)
                }
            },
        };

        // An interrupted statement ends the transaction it ran in
        if dropped && lease.in_transaction() {
            session.abandon_transaction(lease).await;
            return result.map_err(|e| match e {
                DbError::QueryError(m) => {
                    DbError::QueryError(format!("{}; transaction rolled back", m))
                }
                DbError::Cancelled(m) => DbError::Cancelled(format!("{}; transaction rolled back", m)),
                other => other,
            });
        }
        result
    }

    /// Best-effort cancel of a statement started with `query_id`
    pub async fn cancel_query(&self, query_id: &str) -> bool {
        let found = self.queries.cancel(&query_id.to_string()).await;
        tracing::info!(query_id = %query_id, found, "cancel requested");
        found
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub async fn begin_transaction(&self, handle: &str) -> Result<(), DbError> {
        let session = self.get(handle).await?;
        session.guard(session.begin()).await
    }

    pub async fn commit_transaction(&self, handle: &str) -> Result<(), DbError> {
        let session = self.get(handle).await?;
        session.guard(session.commit()).await
    }

    pub async fn rollback_transaction(&self, handle: &str) -> Result<(), DbError> {
        let session = self.get(handle).await?;
        session.guard(session.rollback()).await
    }

    pub async fn get_transaction_state(&self, handle: &str) -> Result<TransactionState, DbError> {
        Ok(self.get(handle).await?.transaction_state())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub async fn get_schemas(&self, handle: &str) -> Result<Vec<SchemaInfo>, DbError> {
        let (session, mut lease) = self.lease(handle).await?;
        session
            .guard(session.driver().get_schemas(lease.conn()))
            .await
            .map_err(|e| e.context("get_schemas"))
    }

    pub async fn get_tables(&self, handle: &str, schema: &str) -> Result<Vec<TableInfo>, DbError> {
        let (session, mut lease) = self.lease(handle).await?;
        session
            .guard(session.driver().get_tables(lease.conn(), schema))
            .await
            .map_err(|e| e.context("get_tables"))
    }

    pub async fn get_columns(
        &self,
        handle: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, DbError> {
        let (session, mut lease) = self.lease(handle).await?;
        session
            .guard(session.driver().get_columns(lease.conn(), schema, table))
            .await
            .map_err(|e| e.context("get_columns"))
    }

    pub async fn get_indexes(
        &self,
        handle: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, DbError> {
        let (session, mut lease) = self.lease(handle).await?;
        session
            .guard(session.driver().get_indexes(lease.conn(), schema, table))
            .await
            .map_err(|e| e.context("get_indexes"))
    }

    pub async fn get_foreign_keys(
        &self,
        handle: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ForeignKeyInfo>, DbError> {
        let (session, mut lease) = self.lease(handle).await?;
        session
            .guard(session.driver().get_foreign_keys(lease.conn(), schema, table))
            .await
            .map_err(|e| e.context("get_foreign_keys"))
    }

    pub async fn get_table_data(
        &self,
        handle: &str,
        schema: &str,
        table: &str,
        limit: i64,
        offset: i64,
    ) -> Result<QueryResponse, DbError> {
        let (session, mut lease) = self.lease(handle).await?;
        session
            .guard(session.driver().get_table_data(lease.conn(), schema, table, limit, offset))
            .await
            .map_err(|e| e.context("get_table_data"))
    }

    pub async fn get_row_count(&self, handle: &str, schema: &str, table: &str) -> Result<i64, DbError> {
        let (session, mut lease) = self.lease(handle).await?;
        session
            .guard(session.driver().get_row_count(lease.conn(), schema, table))
            .await
            .map_err(|e| e.context("get_row_count"))
    }

    pub async fn export_ddl(&self, handle: &str, schema: &str, table: &str) -> Result<String, DbError> {
        let (session, mut lease) = self.lease(handle).await?;
        session
            .guard(session.driver().export_ddl(lease.conn(), schema, table))
            .await
            .map_err(|e| e.context("export_ddl"))
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    pub async fn update_cell(
        &self,
        handle: &str,
        schema: &str,
        table: &str,
        column: &str,
        value: SqlParam,
        pk_columns: &[String],
        pk_values: &[SqlParam],
    ) -> Result<(), DbError> {
        let (session, mut lease) = self.lease(handle).await?;
        let nested = lease.in_transaction();
        session
            .guard(session.driver().update_cell(
                lease.conn(),
                nested,
                schema,
                table,
                column,
                value,
                pk_columns,
                pk_values,
            ))
            .await
            .map_err(|e| e.context("update_cell"))
    }

    pub async fn insert_row(
        &self,
        handle: &str,
        schema: &str,
        table: &str,
        columns: &[String],
        values: &[SqlParam],
    ) -> Result<u64, DbError> {
        let (session, mut lease) = self.lease(handle).await?;
        session
            .guard(session.driver().insert_row(lease.conn(), schema, table, columns, values))
            .await
            .map_err(|e| e.context("insert_row"))
    }

    pub async fn delete_rows(
        &self,
        handle: &str,
        schema: &str,
        table: &str,
        pk_columns: &[String],
        pk_values_list: &[Vec<SqlParam>],
    ) -> Result<u64, DbError> {
        let (session, mut lease) = self.lease(handle).await?;
        let nested = lease.in_transaction();
        session
            .guard(session.driver().delete_rows(
                lease.conn(),
                nested,
                schema,
                table,
                pk_columns,
                pk_values_list,
            ))
            .await
            .map_err(|e| e.context("delete_rows"))
    }
}

async fn close_tunnel(tunnel: Option<SshTunnel>) {
    if let Some(tunnel) = tunnel {
        if let Err(e) = tokio::task::spawn_blocking(move || drop(tunnel)).await {
            tracing::warn!(error = %e, "ssh tunnel shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::{EngineConfig, NetworkEndpoint};
    use crate::db::types::{CellValue, ColumnDef};
    use tempfile::TempDir;

    async fn manager() -> ConnectionManager {
        ConnectionManager::with_defaults(PoolConfig::default()).await
    }

    fn file_config(dir: &TempDir) -> ConnectionConfig {
        let path = dir.path().join("deck.db");
        ConnectionConfig::sqlite("deck", path.to_string_lossy())
    }

    fn unreachable_postgres() -> ConnectionConfig {
        let mut config = ConnectionConfig::new(
            "offline",
            EngineConfig::Postgresql(NetworkEndpoint {
                host: "127.0.0.1".to_string(),
                port: Some(9),
                username: "postgres".to_string(),
                password: String::new(),
                database: "test".to_string(),
            }),
        );
        config.pool = Some(PoolConfig {
            connect_timeout_secs: 2,
            acquire_timeout_secs: 2,
            ..PoolConfig::default()
        });
        config
    }

    #[tokio::test]
    async fn test_reconnect_yields_fresh_handle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager().await;
        let config = file_config(&dir);

        let first = manager.connect(config.clone()).await.unwrap();
        manager.disconnect(&first).await.unwrap();
        let second = manager.connect(config).await.unwrap();

        assert_ne!(first, second);
        assert!(matches!(
            manager.execute_query(&first, "SELECT 1", None, None).await,
            Err(DbError::UnknownConnection(_))
        ));
        assert!(manager.execute_query(&second, "SELECT 1", None, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let manager = manager().await;
        let handle = manager
            .connect(ConnectionConfig::sqlite("mem", ":memory:"))
            .await
            .unwrap();

        manager.disconnect(&handle).await.unwrap();
        manager.disconnect(&handle).await.unwrap();
        manager.disconnect("never-existed").await.unwrap();
        assert!(!manager.is_connected(&handle).await);
    }

    #[tokio::test]
    async fn test_unsupported_engine() {
        let manager = manager().await;
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"name": "x", "db_type": "Oracle"}"#).unwrap();

        assert!(matches!(
            manager.connect(config.clone()).await,
            Err(DbError::ConnectionError(_))
        ));
        assert!(!manager.test_connection(&config).await.unwrap());
    }

    #[tokio::test]
    async fn test_connection_reports_reachability() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager().await;
        let missing = file_config(&dir);
        assert!(!manager.test_connection(&missing).await.unwrap());
        assert!(!dir.path().join("deck.db").exists());

        let handle = manager.connect(missing.clone()).await.unwrap();
        manager.execute_query(&handle, "SELECT 1", None, None).await.unwrap();
        manager.disconnect(&handle).await.unwrap();
        assert!(manager.test_connection(&missing).await.unwrap());
        assert!(manager.handles().await.is_empty());

        let started = std::time::Instant::now();
        assert!(!manager.test_connection(&unreachable_postgres()).await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_select_and_dml_shapes() {
        let manager = manager().await;
        let handle = manager
            .connect(ConnectionConfig::sqlite("mem", ":memory:"))
            .await
            .unwrap();

        let resp = manager
            .execute_query(&handle, "SELECT 1 AS x", None, None)
            .await
            .unwrap();
        assert_eq!(resp.columns, vec![ColumnDef::new("x", "integer")]);
        assert_eq!(resp.rows, vec![vec![CellValue::Int(1)]]);
        assert_eq!(resp.row_count, 1);
        assert_eq!(resp.affected_rows, None);

        manager
            .execute_query(&handle, "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", None, None)
            .await
            .unwrap();
        let resp = manager
            .execute_query(&handle, "INSERT INTO t (v) VALUES ('a'), ('b')", None, None)
            .await
            .unwrap();
        assert!(resp.rows.is_empty() && resp.columns.is_empty());
        assert_eq!(resp.affected_rows, Some(2));
    }

    #[tokio::test]
    async fn test_timeout_and_cancel() {
        let manager = manager().await;
        let handle = manager
            .connect(ConnectionConfig::sqlite("mem", ":memory:"))
            .await
            .unwrap();
        let endless = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                       SELECT COUNT(*) FROM c";

        let err = manager
            .execute_query(&handle, endless, None, Some(100))
            .await
            .unwrap_err();
        assert!(err.message().contains("timed out"));

        assert!(!manager.cancel_query("nothing-running").await);

        let (result, cancelled) = tokio::join!(
            manager.execute_query(&handle, endless, Some("q1".to_string()), None),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                manager.cancel_query("q1").await
            }
        );
        assert!(cancelled);
        assert!(result.is_err());

        // The connection is usable again afterwards
        assert!(manager.execute_query(&handle, "SELECT 1", None, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_transaction_flow() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager().await;
        let handle = manager.connect(file_config(&dir)).await.unwrap();
        manager
            .execute_query(&handle, "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", None, None)
            .await
            .unwrap();

        manager.begin_transaction(&handle).await.unwrap();
        assert_eq!(
            manager.get_transaction_state(&handle).await.unwrap(),
            TransactionState::Active
        );
        manager
            .insert_row(&handle, "main", "t", &["v".to_string()], &["x".into()])
            .await
            .unwrap();
        manager.rollback_transaction(&handle).await.unwrap();

        assert_eq!(manager.get_row_count(&handle, "main", "t").await.unwrap(), 0);
        assert!(matches!(
            manager.commit_transaction(&handle).await,
            Err(DbError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_inside_transaction_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager().await;
        let handle = manager.connect(file_config(&dir)).await.unwrap();
        manager
            .execute_query(&handle, "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", None, None)
            .await
            .unwrap();

        manager.begin_transaction(&handle).await.unwrap();
        manager
            .insert_row(&handle, "main", "t", &["v".to_string()], &["x".into()])
            .await
            .unwrap();
        let endless = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                       SELECT COUNT(*) FROM c";
        let err = manager
            .execute_query(&handle, endless, None, Some(200))
            .await
            .unwrap_err();
        assert!(matches!(&err, DbError::QueryError(m) if m.contains("timed out") && m.contains("rolled back")));

        assert_eq!(
            manager.get_transaction_state(&handle).await.unwrap(),
            TransactionState::None
        );
        assert_eq!(manager.get_row_count(&handle, "main", "t").await.unwrap(), 0);
        assert!(matches!(
            manager.commit_transaction(&handle).await,
            Err(DbError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_exhausted_pool_reports_pool_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager().await;
        let mut config = file_config(&dir);
        config.pool = Some(PoolConfig {
            max_connections: 2,
            min_idle: 1,
            acquire_timeout_secs: 1,
            ..PoolConfig::default()
        });
        let handle = manager.connect(config).await.unwrap();

        let first = manager.lease(&handle).await.unwrap();
        let second = manager.lease(&handle).await.unwrap();
        assert!(matches!(
            manager.execute_query(&handle, "SELECT 1", None, None).await,
            Err(DbError::PoolExhausted(_))
        ));

        drop((first, second));
        assert!(manager.execute_query(&handle, "SELECT 1", None, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_mutations_and_introspection() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager().await;
        let handle = manager.connect(file_config(&dir)).await.unwrap();
        manager
            .execute_query(&handle, "CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT)", None, None)
            .await
            .unwrap();
        for v in ["a", "b", "c"] {
            manager
                .insert_row(&handle, "main", "t", &["v".to_string()], &[v.into()])
                .await
                .unwrap();
        }

        let tables = manager.get_tables(&handle, "main").await.unwrap();
        assert_eq!(tables.len(), 1);
        let columns = manager.get_columns(&handle, "main", "t").await.unwrap();
        assert!(columns[0].is_primary_key);

        let pk = vec!["id".to_string()];
        manager
            .update_cell(&handle, "main", "t", "v", "z".into(), &pk, &["2".into()])
            .await
            .unwrap();
        assert!(matches!(
            manager
                .update_cell(&handle, "main", "t", "v", "z".into(), &pk, &["99".into()])
                .await,
            Err(DbError::ConstraintViolation(_))
        ));

        let deleted = manager
            .delete_rows(&handle, "main", "t", &pk, &[vec!["1".into()], vec!["42".into()]])
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let page = manager.get_table_data(&handle, "main", "t", 10, 0).await.unwrap();
        assert_eq!(
            page.rows,
            vec![
                vec![CellValue::Int(2), CellValue::Text("z".to_string())],
                vec![CellValue::Int(3), CellValue::Text("c".to_string())],
            ]
        );

        let ddl = manager.export_ddl(&handle, "main", "t").await.unwrap();
        assert!(ddl.starts_with("CREATE TABLE \"t\""));
    }

    #[tokio::test]
    async fn test_handles_do_not_block_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager().await;
        let a = manager.connect(file_config(&dir)).await.unwrap();
        let b = manager
            .connect(ConnectionConfig::sqlite("mem", ":memory:"))
            .await
            .unwrap();

        manager.begin_transaction(&a).await.unwrap();
        let started = std::time::Instant::now();
        manager.execute_query(&b, "SELECT 1", None, None).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        manager.rollback_transaction(&a).await.unwrap();
    }
}
