// SQLite Driver
// rusqlite connections behind a bb8 pool; statements run on the blocking pool

use crate::db::config::{ConnectionConfig, DatabaseType, FileEndpoint, PoolConfig};
use crate::db::dialect::{Dialect, SqliteDialect};
use crate::db::error::DbError;
use crate::db::pool::Bb8Pool;
use crate::db::traits::{Canceller, ConnectTarget, Connection, ConnectionPool, DatabaseDriver};
use crate::db::types::{CellValue, ColumnDef, QueryResponse, SqlParam};
use rusqlite::types::ValueRef;
use rusqlite::{Connection as RusqliteConnection, ErrorCode, InterruptHandle, OpenFlags};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite specific connection wrapper
pub struct SqliteConnection {
    conn: Arc<Mutex<RusqliteConnection>>,
    interrupt: Arc<InterruptHandle>,
}

impl SqliteConnection {
    fn open(target: &SqliteTarget) -> Result<Self, DbError> {
        let conn = match target {
            SqliteTarget::Memory => RusqliteConnection::open_in_memory(),
            SqliteTarget::File(path) => RusqliteConnection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            ),
        }
        .map_err(|e| DbError::ConnectionError(format!("Failed to open SQLite database: {}", e)))?;

        conn.busy_timeout(BUSY_TIMEOUT).map_err(map_error)?;
        conn.execute_batch("PRAGMA foreign_keys = ON").map_err(map_error)?;

        Ok(Self {
            interrupt: Arc::new(conn.get_interrupt_handle()),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run(&self, sql: &str, params: &[SqlParam]) -> Result<QueryResponse, DbError> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        let params: Vec<Option<String>> = params
            .iter()
            .map(|p| p.as_deref().map(str::to_string))
            .collect();

        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            run_statement(&guard, &sql, &params)
        })
        .await?
    }
}

#[async_trait::async_trait]
impl Connection for SqliteConnection {
    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryResponse, DbError> {
        self.run(sql, params).await
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DbError> {
        let resp = self.run(sql, params).await?;
        Ok(resp.affected_rows.unwrap_or(0))
    }

    fn canceller(&self) -> Option<Arc<dyn Canceller>> {
        Some(Arc::new(SqliteCanceller(self.interrupt.clone())))
    }
}

struct SqliteCanceller(Arc<InterruptHandle>);

#[async_trait::async_trait]
impl Canceller for SqliteCanceller {
    async fn cancel(&self) -> Result<(), DbError> {
        self.0.interrupt();
        Ok(())
    }
}

fn run_statement(
    conn: &RusqliteConnection,
    sql: &str,
    params: &[Option<String>],
) -> Result<QueryResponse, DbError> {
    let started = Instant::now();
    let mut stmt = conn.prepare(sql).map_err(map_error)?;

    if stmt.column_count() == 0 {
        let affected = stmt
            .execute(rusqlite::params_from_iter(params.iter()))
            .map_err(map_error)?;
        return Ok(QueryResponse::affected(affected as u64).elapsed(started));
    }

    let declared: Vec<(String, String)> = stmt
        .columns()
        .iter()
        .map(|c| {
            (
                c.name().to_string(),
                c.decl_type().unwrap_or_default().to_string(),
            )
        })
        .collect();

    let mut rows = Vec::new();
    let mut result = stmt
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(map_error)?;
    while let Some(row) = result.next().map_err(map_error)? {
        let mut cells = Vec::with_capacity(declared.len());
        for (idx, (_, decl)) in declared.iter().enumerate() {
            cells.push(cell_value(row.get_ref(idx).map_err(map_error)?, decl));
        }
        rows.push(cells);
    }

    let columns = declared
        .into_iter()
        .enumerate()
        .map(|(idx, (name, decl))| {
            let data_type = if decl.is_empty() {
                rows.first()
                    .map(|r: &Vec<CellValue>| storage_class(&r[idx]))
                    .unwrap_or("any")
                    .to_string()
            } else {
                decl
            };
            ColumnDef::new(name, data_type)
        })
        .collect();

    Ok(QueryResponse::with_rows(columns, rows).elapsed(started))
}

/// Map a value using the column's declared type for affinity hints
fn cell_value(value: ValueRef<'_>, declared: &str) -> CellValue {
    let decl = declared.to_ascii_lowercase();
    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(i) if decl.contains("bool") => CellValue::Bool(i != 0),
        ValueRef::Integer(i) => CellValue::Int(i),
        ValueRef::Real(f) => CellValue::float(f),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            if decl.contains("json") {
                CellValue::Json(text)
            } else if decl.contains("date") || decl.contains("time") {
                CellValue::Timestamp(text)
            } else {
                CellValue::Text(text)
            }
        }
        ValueRef::Blob(bytes) => CellValue::Binary(bytes.to_vec()),
    }
}

fn storage_class(value: &CellValue) -> &'static str {
    match value {
        CellValue::Int(_) | CellValue::Bool(_) => "integer",
        CellValue::Float(_) => "real",
        CellValue::Binary(_) => "blob",
        CellValue::Null => "null",
        _ => "text",
    }
}

fn map_error(err: rusqlite::Error) -> DbError {
    let message = err.to_string();
    match &err {
        rusqlite::Error::SqliteFailure(e, _) => match e.code {
            ErrorCode::ConstraintViolation if e.extended_code == SQLITE_CONSTRAINT_DATATYPE => {
                DbError::TypeMismatch(message)
            }
            ErrorCode::ConstraintViolation => DbError::ConstraintViolation(message),
            ErrorCode::TypeMismatch => DbError::TypeMismatch(message),
            ErrorCode::OperationInterrupted => DbError::Cancelled(message),
            ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::PermissionDenied => {
                DbError::ConnectionError(message)
            }
            _ if message.contains("syntax error") || message.contains("incomplete input") => {
                DbError::SyntaxError(message)
            }
            _ => DbError::QueryError(message),
        },
        rusqlite::Error::InvalidParameterCount(_, _) => DbError::ValidationError(message),
        _ => DbError::QueryError(message),
    }
}

/// `SQLITE_CONSTRAINT_DATATYPE`, raised by STRICT tables
const SQLITE_CONSTRAINT_DATATYPE: std::os::raw::c_int = 3091;

// ============================================================================
// Pool manager
// ============================================================================

#[derive(Debug, Clone)]
enum SqliteTarget {
    Memory,
    File(PathBuf),
}

pub struct SqliteManager {
    target: SqliteTarget,
}

impl SqliteManager {
    pub fn new(file: &FileEndpoint) -> Self {
        let target = if file.is_in_memory() {
            SqliteTarget::Memory
        } else {
            SqliteTarget::File(file.resolved_path())
        };
        Self { target }
    }
}

#[async_trait::async_trait]
impl bb8::ManageConnection for SqliteManager {
    type Connection = SqliteConnection;
    type Error = DbError;

    async fn connect(&self) -> Result<SqliteConnection, DbError> {
        let target = self.target.clone();
        tokio::task::spawn_blocking(move || SqliteConnection::open(&target))
            .await
            .map_err(DbError::from)?
    }

    async fn is_valid(&self, conn: &mut SqliteConnection) -> Result<(), DbError> {
        conn.run("SELECT 1", &[]).await.map(|_| ())
    }

    fn has_broken(&self, _conn: &mut SqliteConnection) -> bool {
        // Abandoned statements finish on the blocking pool behind the mutex
        false
    }
}

/// SQLite driver implementation
pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for SqliteDriver {
    fn database_types(&self) -> &'static [DatabaseType] {
        &[DatabaseType::Sqlite]
    }

    fn driver_name(&self) -> &'static str {
        "SQLite"
    }

    fn dialect(&self) -> &'static dyn Dialect {
        &SqliteDialect
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        _target: &ConnectTarget,
        pool: &PoolConfig,
    ) -> Result<Arc<dyn ConnectionPool>, DbError> {
        let file = config.engine.file().ok_or_else(|| {
            DbError::ValidationError("SQLite connections need a database path".to_string())
        })?;
        tracing::debug!(path = %file.path, "opening SQLite database");

        let pool = Bb8Pool::build(SqliteManager::new(file), pool).await?;
        Ok(Arc::new(pool))
    }

    /// A missing file fails the test and is never created
    async fn test_connection(
        &self,
        config: &ConnectionConfig,
        target: &ConnectTarget,
        pool: &PoolConfig,
    ) -> Result<(), DbError> {
        if let Some(file) = config.engine.file().filter(|f| !f.is_in_memory()) {
            let path = file.resolved_path();
            if !path.is_file() {
                return Err(DbError::ConnectionError(format!(
                    "SQLite database not found: {}",
                    path.display()
                )));
            }
        }
        let pool = self.connect(config, target, &pool.single_use()).await?;
        let mut conn = pool.acquire().await?;
        conn.query(self.dialect().ping_sql(), &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> SqliteConnection {
        SqliteConnection::open(&SqliteTarget::Memory).unwrap()
    }

    #[tokio::test]
    async fn test_select_shape() {
        let mut conn = memory();
        let resp = conn.query("SELECT 1 AS x, 'a' AS y, NULL AS z", &[]).await.unwrap();

        assert_eq!(resp.columns[0], ColumnDef::new("x", "integer"));
        assert_eq!(resp.columns[1].data_type, "text");
        assert_eq!(resp.rows, vec![vec![CellValue::Int(1), CellValue::Text("a".into()), CellValue::Null]]);
        assert_eq!(resp.affected_rows, None);
    }

    #[tokio::test]
    async fn test_declared_types_drive_mapping() {
        let mut conn = memory();
        conn.execute(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, ok BOOLEAN, at DATETIME, doc JSON, raw BLOB, price REAL)",
            &[],
        )
        .await
        .unwrap();
        let inserted = conn
            .execute(
                "INSERT INTO t VALUES (1, 1, '2024-01-31 08:00:00', '{\"a\":1}', X'CAFE', 1.5)",
                &[],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);

        let resp = conn.query("SELECT * FROM t", &[]).await.unwrap();
        assert_eq!(resp.columns[1].data_type, "BOOLEAN");
        assert_eq!(
            resp.rows[0],
            vec![
                CellValue::Int(1),
                CellValue::Bool(true),
                CellValue::Timestamp("2024-01-31 08:00:00".into()),
                CellValue::Json("{\"a\":1}".into()),
                CellValue::Binary(vec![0xca, 0xfe]),
                CellValue::Float(1.5),
            ]
        );
    }

    #[tokio::test]
    async fn test_dml_reports_affected_rows() {
        let mut conn = memory();
        conn.execute("CREATE TABLE t (v TEXT)", &[]).await.unwrap();
        conn.execute("INSERT INTO t VALUES (?), (?)", &[SqlParam::from("a"), SqlParam::Null])
            .await
            .unwrap();

        let resp = conn.query("UPDATE t SET v = 'b'", &[]).await.unwrap();
        assert!(resp.columns.is_empty() && resp.rows.is_empty());
        assert_eq!(resp.affected_rows, Some(2));
    }

    #[tokio::test]
    async fn test_error_classification() {
        let mut conn = memory();
        let err = conn.query("SELEC 1", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::SyntaxError(_)), "{:?}", err);

        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[]).await.unwrap();
        conn.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        let err = conn.execute("INSERT INTO t VALUES (1)", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));

        let err = conn.query("SELECT * FROM missing", &[]).await.unwrap_err();
        assert!(matches!(err, DbError::QueryError(_)));
    }

    #[tokio::test]
    async fn test_file_pool_shares_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        let config = ConnectionConfig::sqlite("file", path.to_string_lossy());
        let driver = SqliteDriver::new();
        let pool = driver
            .connect(&config, &ConnectTarget::direct(&config), &PoolConfig::default())
            .await
            .unwrap();

        let mut a = pool.acquire().await.unwrap();
        let mut b = pool.acquire().await.unwrap();
        a.execute("CREATE TABLE t (id INTEGER)", &[]).await.unwrap();
        a.execute("INSERT INTO t VALUES (42)", &[]).await.unwrap();
        let resp = b.query("SELECT id FROM t", &[]).await.unwrap();
        assert_eq!(resp.rows[0][0], CellValue::Int(42));
        assert!(path.exists());
    }
}
