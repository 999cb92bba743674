// Database Driver Traits
// The capability interface every engine adapter implements

use crate::db::config::{ConnectionConfig, DatabaseType, PoolConfig};
use crate::db::dialect::Dialect;
use crate::db::error::DbError;
use crate::db::schema::{ColumnInfo, ForeignKeyInfo, IndexInfo, SchemaInfo, TableInfo};
use crate::db::types::{CellValue, QueryResponse, SqlParam};
use crate::db::{mutation, query, schema};
use std::sync::Arc;

/// One live protocol connection, checked out of a pool
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Run a statement. Row-shaped statements return columns and rows, everything
    /// else an affected-row count.
    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryResponse, DbError>;

    /// Run a statement and return its affected-row count
    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DbError>;

    /// Out-of-band handle that aborts whatever this connection is running
    fn canceller(&self) -> Option<Arc<dyn Canceller>>;

    /// Set while a dropped statement left the protocol stream half-read.
    /// Such a connection must not run anything else.
    fn is_broken(&self) -> bool {
        false
    }
}

/// Best-effort abort of an in-flight statement
#[async_trait::async_trait]
pub trait Canceller: Send + Sync {
    async fn cancel(&self) -> Result<(), DbError>;
}

/// Bounded set of connections to one database
#[async_trait::async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Check out a connection, waiting at most the acquire timeout
    async fn acquire(&self) -> Result<Box<dyn Connection>, DbError>;

    /// (connections, idle)
    fn state(&self) -> (u32, u32);
}

/// Where the driver opens its socket. Differs from the configured host when an
/// SSH tunnel is in front of the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    /// Name the server certificate is checked against
    pub tls_domain: String,
}

impl ConnectTarget {
    pub fn direct(config: &ConnectionConfig) -> Self {
        let host = config
            .engine
            .network()
            .map(|ep| ep.host.clone())
            .unwrap_or_default();
        Self {
            tls_domain: host.clone(),
            host,
            port: config.port(),
        }
    }

    pub fn is_tunneled(&self) -> bool {
        self.host != self.tls_domain
    }
}

/// Database driver trait - all engine adapters implement this.
///
/// Adapters provide the protocol pieces (`connect` and the [`Connection`] they
/// hand out). Everything built from plain SQL is shared through the default
/// methods, which generate statements from [`DatabaseDriver::dialect`].
#[async_trait::async_trait]
pub trait DatabaseDriver: Send + Sync {
    // --- Metadata ---
    /// Engines this driver serves
    fn database_types(&self) -> &'static [DatabaseType];

    /// Get the display name for this driver
    fn driver_name(&self) -> &'static str;

    fn dialect(&self) -> &'static dyn Dialect;

    // --- Connection Management ---
    /// Open a pool against `target`
    async fn connect(
        &self,
        config: &ConnectionConfig,
        target: &ConnectTarget,
        pool: &PoolConfig,
    ) -> Result<Arc<dyn ConnectionPool>, DbError>;

    /// Connect, run the liveness check, tear down
    async fn test_connection(
        &self,
        config: &ConnectionConfig,
        target: &ConnectTarget,
        pool: &PoolConfig,
    ) -> Result<(), DbError> {
        let pool = self.connect(config, target, &pool.single_use()).await?;
        let mut conn = pool.acquire().await?;
        conn.query(self.dialect().ping_sql(), &[]).await?;
        Ok(())
    }

    // --- Query Execution ---
    async fn execute(&self, conn: &mut dyn Connection, sql: &str) -> Result<QueryResponse, DbError> {
        query::run(conn, sql).await
    }

    // --- Schema Metadata ---
    async fn get_schemas(&self, conn: &mut dyn Connection) -> Result<Vec<SchemaInfo>, DbError> {
        schema::schemas(conn, self.dialect()).await
    }

    async fn get_tables(
        &self,
        conn: &mut dyn Connection,
        schema_name: &str,
    ) -> Result<Vec<TableInfo>, DbError> {
        schema::tables(conn, self.dialect(), schema_name).await
    }

    async fn get_columns(
        &self,
        conn: &mut dyn Connection,
        schema_name: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, DbError> {
        schema::columns(conn, self.dialect(), schema_name, table).await
    }

    async fn get_indexes(
        &self,
        conn: &mut dyn Connection,
        schema_name: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, DbError> {
        schema::indexes(conn, self.dialect(), schema_name, table).await
    }

    async fn get_foreign_keys(
        &self,
        conn: &mut dyn Connection,
        schema_name: &str,
        table: &str,
    ) -> Result<Vec<ForeignKeyInfo>, DbError> {
        schema::foreign_keys(conn, self.dialect(), schema_name, table).await
    }

    // --- Table browsing ---
    async fn get_table_data(
        &self,
        conn: &mut dyn Connection,
        schema_name: &str,
        table: &str,
        limit: i64,
        offset: i64,
    ) -> Result<QueryResponse, DbError> {
        schema::table_data(conn, self.dialect(), schema_name, table, limit, offset).await
    }

    async fn get_row_count(
        &self,
        conn: &mut dyn Connection,
        schema_name: &str,
        table: &str,
    ) -> Result<i64, DbError> {
        schema::row_count(conn, self.dialect(), schema_name, table).await
    }

    // --- Mutation ---
    /// `nested` is set when a user transaction is already open on `conn`
    #[allow(clippy::too_many_arguments)]
    async fn update_cell(
        &self,
        conn: &mut dyn Connection,
        nested: bool,
        schema_name: &str,
        table: &str,
        column: &str,
        value: SqlParam,
        pk_columns: &[String],
        pk_values: &[SqlParam],
    ) -> Result<(), DbError> {
        let target = mutation::TableRef::new(schema_name, table);
        mutation::update_cell(conn, self.dialect(), nested, &target, column, value, pk_columns, pk_values).await
    }

    async fn insert_row(
        &self,
        conn: &mut dyn Connection,
        schema_name: &str,
        table: &str,
        columns: &[String],
        values: &[SqlParam],
    ) -> Result<u64, DbError> {
        let target = mutation::TableRef::new(schema_name, table);
        mutation::insert_row(conn, self.dialect(), &target, columns, values).await
    }

    async fn delete_rows(
        &self,
        conn: &mut dyn Connection,
        nested: bool,
        schema_name: &str,
        table: &str,
        pk_columns: &[String],
        pk_values_list: &[Vec<SqlParam>],
    ) -> Result<u64, DbError> {
        let target = mutation::TableRef::new(schema_name, table);
        mutation::delete_rows(conn, self.dialect(), nested, &target, pk_columns, pk_values_list).await
    }

    // --- DDL ---
    async fn export_ddl(
        &self,
        conn: &mut dyn Connection,
        schema_name: &str,
        table: &str,
    ) -> Result<String, DbError> {
        let columns = self.get_columns(conn, schema_name, table).await?;
        if columns.is_empty() {
            return Err(DbError::QueryError(format!(
                "table {} not found",
                self.dialect().qualify(schema_name, table)
            )));
        }
        let indexes = self.get_indexes(conn, schema_name, table).await?;
        let foreign_keys = self.get_foreign_keys(conn, schema_name, table).await?;
        Ok(crate::export::ddl::create_table(
            self.dialect(),
            schema_name,
            table,
            &columns,
            &indexes,
            &foreign_keys,
        ))
    }
}

/// Read the single integer a `COUNT(*)`-style query returns
pub(crate) fn scalar_i64(resp: &QueryResponse) -> Result<i64, DbError> {
    match resp.rows.first().and_then(|r| r.first()) {
        Some(CellValue::Int(n)) => Ok(*n),
        Some(CellValue::Text(s)) => s
            .parse()
            .map_err(|_| DbError::QueryError(format!("expected an integer, got {}", s))),
        Some(CellValue::Float(f)) => Ok(*f as i64),
        other => Err(DbError::QueryError(format!(
            "expected an integer, got {:?}",
            other
        ))),
    }
}
