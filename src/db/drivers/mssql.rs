// MS-SQL Driver
// tiberius clients behind a bb8 pool

use crate::db::config::{ConnectionConfig, DatabaseType, PoolConfig};
use crate::db::dialect::{Dialect, MssqlDialect};
use crate::db::error::{classify_mssql, DbError};
use crate::db::pool::{Bb8Pool, BusyFlag};
use crate::db::query::is_dml;
use crate::db::traits::{Canceller, ConnectTarget, Connection, ConnectionPool, DatabaseDriver};
use crate::db::types::{CellValue, ColumnDef, QueryResponse, SqlParam};
use crate::transport::connect_tcp;
use crate::transport::tls::apply_mssql_tls;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiberius::{AuthMethod, Client, ColumnData, ColumnType, Config, FromSql, Query, QueryItem, QueryStream};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type MssqlClient = Client<Compat<TcpStream>>;

/// MS-SQL specific connection wrapper.
///
/// SQL Server has no out-of-band cancel we can reach from here; an abandoned
/// statement leaves the busy flag set and the pool discards the client.
pub struct MssqlConnection {
    client: MssqlClient,
    busy: BusyFlag,
}

impl MssqlConnection {
    async fn run(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryResponse, DbError> {
        self.busy.enter();
        let result = self.run_statement(sql, params).await;
        self.busy.leave();
        result
    }

    async fn run_statement(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryResponse, DbError> {
        let started = Instant::now();

        // The row stream does not carry DONE counts, so DML goes through `execute`
        if is_dml(sql) {
            let result = if params.is_empty() {
                self.client.execute(sql, &[]).await
            } else {
                bind(sql, params).execute(&mut self.client).await
            };
            let affected = result.map_err(map_error)?.total();
            return Ok(QueryResponse::affected(affected).elapsed(started));
        }

        let stream = if params.is_empty() {
            self.client.simple_query(sql).await
        } else {
            bind(sql, params).query(&mut self.client).await
        }
        .map_err(map_error)?;

        Ok(first_result_set(stream).await?.elapsed(started))
    }
}

fn bind<'a>(sql: &'a str, params: &[SqlParam]) -> Query<'a> {
    let mut query = Query::new(sql);
    for param in params {
        query.bind(param.as_deref().map(str::to_string));
    }
    query
}

/// Collect the first result set; later sets are drained so the client is reusable
async fn first_result_set(mut stream: QueryStream<'_>) -> Result<QueryResponse, DbError> {
    let mut columns: Option<Vec<(String, ColumnType)>> = None;
    let mut rows = Vec::new();

    while let Some(item) = stream.try_next().await.map_err(map_error)? {
        match item {
            QueryItem::Metadata(meta) if meta.result_index() == 0 => {
                columns = Some(
                    meta.columns()
                        .iter()
                        .map(|c| (c.name().to_string(), c.column_type()))
                        .collect(),
                );
            }
            QueryItem::Row(row) if row.result_index() == 0 => {
                let types: Vec<ColumnType> = row.columns().iter().map(|c| c.column_type()).collect();
                rows.push(
                    row.into_iter()
                        .zip(types)
                        .map(|(data, ty)| cell_value(data, ty))
                        .collect::<Vec<_>>(),
                );
            }
            _ => {}
        }
    }

    Ok(match columns {
        Some(columns) => {
            let defs = columns
                .into_iter()
                .map(|(name, ty)| ColumnDef::new(name, type_name(ty)))
                .collect();
            QueryResponse::with_rows(defs, rows)
        }
        // Statements without a result set (DDL, SET, EXEC of a procedure that returns nothing)
        None => QueryResponse::affected(0),
    })
}

#[async_trait::async_trait]
impl Connection for MssqlConnection {
    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryResponse, DbError> {
        self.run(sql, params).await
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DbError> {
        let resp = self.run(sql, params).await?;
        Ok(resp.affected_rows.unwrap_or(resp.row_count as u64))
    }

    fn canceller(&self) -> Option<Arc<dyn Canceller>> {
        None
    }

    fn is_broken(&self) -> bool {
        self.busy.is_set()
    }
}

// ============================================================================
// Type mapping
// ============================================================================

fn type_name(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Int1 => "tinyint",
        ColumnType::Int2 => "smallint",
        ColumnType::Int4 | ColumnType::Intn => "int",
        ColumnType::Int8 => "bigint",
        ColumnType::Float4 => "real",
        ColumnType::Float8 | ColumnType::Floatn => "float",
        ColumnType::Decimaln | ColumnType::Numericn => "decimal",
        ColumnType::Money | ColumnType::Money4 => "money",
        ColumnType::Bit | ColumnType::Bitn => "bit",
        ColumnType::BigVarChar => "varchar",
        ColumnType::BigChar => "char",
        ColumnType::NVarchar => "nvarchar",
        ColumnType::NChar => "nchar",
        ColumnType::Text => "text",
        ColumnType::NText => "ntext",
        ColumnType::Datetime | ColumnType::Datetimen => "datetime",
        ColumnType::Datetime2 => "datetime2",
        ColumnType::Datetime4 => "smalldatetime",
        ColumnType::Daten => "date",
        ColumnType::Timen => "time",
        ColumnType::DatetimeOffsetn => "datetimeoffset",
        ColumnType::BigVarBin => "varbinary",
        ColumnType::BigBinary => "binary",
        ColumnType::Image => "image",
        ColumnType::Guid => "uniqueidentifier",
        ColumnType::Xml => "xml",
        ColumnType::SSVariant => "sql_variant",
        ColumnType::Udt => "udt",
        ColumnType::Null => "null",
    }
}

fn cell_value(data: ColumnData<'static>, ty: ColumnType) -> CellValue {
    match data {
        ColumnData::U8(v) => v.map_or(CellValue::Null, |v| CellValue::Int(v.into())),
        ColumnData::I16(v) => v.map_or(CellValue::Null, |v| CellValue::Int(v.into())),
        ColumnData::I32(v) => v.map_or(CellValue::Null, |v| CellValue::Int(v.into())),
        ColumnData::I64(v) => v.map_or(CellValue::Null, CellValue::Int),
        ColumnData::F32(v) => v.map_or(CellValue::Null, |v| CellValue::float(v.into())),
        ColumnData::F64(v) => match (v, ty) {
            (None, _) => CellValue::Null,
            // Money travels as a float; four decimals is its exact scale
            (Some(v), ColumnType::Money | ColumnType::Money4) => CellValue::Text(format!("{:.4}", v)),
            (Some(v), _) => CellValue::float(v),
        },
        ColumnData::Bit(v) => v.map_or(CellValue::Null, CellValue::Bool),
        ColumnData::String(v) => v.map_or(CellValue::Null, |s| CellValue::Text(s.into_owned())),
        ColumnData::Guid(v) => v.map_or(CellValue::Null, |g| CellValue::Text(g.to_string())),
        ColumnData::Binary(v) => v.map_or(CellValue::Null, |b| CellValue::Binary(b.into_owned())),
        ColumnData::Numeric(v) => v.map_or(CellValue::Null, |n| CellValue::Text(n.to_string())),
        ColumnData::Xml(v) => v.map_or(CellValue::Null, |x| CellValue::Text(x.into_owned().into_string())),
        temporal => temporal_value(&temporal, ty),
    }
}

fn temporal_value(data: &ColumnData<'static>, ty: ColumnType) -> CellValue {
    let converted = match ty {
        ColumnType::Daten => NaiveDate::from_sql(data).map(|v| v.map(|d| d.to_string())),
        ColumnType::Timen => NaiveTime::from_sql(data).map(|v| v.map(|t| t.to_string())),
        ColumnType::DatetimeOffsetn => {
            DateTime::<Utc>::from_sql(data).map(|v| v.map(|dt| dt.to_rfc3339()))
        }
        _ => NaiveDateTime::from_sql(data)
            .map(|v| v.map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
    };

    match converted {
        Ok(Some(text)) => CellValue::Timestamp(text),
        Ok(None) => CellValue::Null,
        Err(e) => {
            tracing::debug!(column_type = ?ty, error = %e, "unmapped SQL Server value");
            CellValue::Null
        }
    }
}

fn map_error(err: tiberius::error::Error) -> DbError {
    match err {
        tiberius::error::Error::Server(e) => classify_mssql(e.code(), e.message().to_string()),
        tiberius::error::Error::Io { .. } | tiberius::error::Error::Tls(_) => {
            DbError::ConnectionError(err.to_string())
        }
        tiberius::error::Error::Routing { host, port } => DbError::ConnectionError(format!(
            "server redirected the connection to {}:{}",
            host, port
        )),
        tiberius::error::Error::Conversion(_) => DbError::TypeMismatch(err.to_string()),
        other => DbError::QueryError(other.to_string()),
    }
}

// ============================================================================
// Pool manager
// ============================================================================

pub struct MssqlManager {
    config: Config,
    target: ConnectTarget,
    connect_timeout: Duration,
}

#[async_trait::async_trait]
impl bb8::ManageConnection for MssqlManager {
    type Connection = MssqlConnection;
    type Error = DbError;

    async fn connect(&self) -> Result<MssqlConnection, DbError> {
        let tcp = connect_tcp(&self.target, self.connect_timeout).await?;

        let client = tokio::time::timeout(
            self.connect_timeout,
            Client::connect(self.config.clone(), tcp.compat_write()),
        )
        .await
        .map_err(|_| DbError::ConnectionError("timed out during SQL Server login".to_string()))?
        .map_err(|e| map_error(e).into_connection_error())?;

        Ok(MssqlConnection {
            client,
            busy: BusyFlag::default(),
        })
    }

    async fn is_valid(&self, conn: &mut MssqlConnection) -> Result<(), DbError> {
        conn.client
            .simple_query("SELECT 1")
            .await
            .map_err(map_error)?
            .into_row()
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    fn has_broken(&self, conn: &mut MssqlConnection) -> bool {
        conn.busy.is_set()
    }
}

/// MS-SQL driver implementation
pub struct MssqlDriver;

impl MssqlDriver {
    pub fn new() -> Self {
        Self
    }

    /// Convert the connection config to a tiberius config aimed at `target`.
    ///
    /// Certificates are checked against the socket host; tiberius has no
    /// separate verification name, so `verify_full` through a tunnel needs a
    /// CA whose certificate also names 127.0.0.1.
    fn build_config(config: &ConnectionConfig, target: &ConnectTarget) -> Result<Config, DbError> {
        let ep = config.engine.network().ok_or_else(|| {
            DbError::ValidationError("SQL Server connections need a host".to_string())
        })?;

        let mut tds = Config::new();
        tds.host(&target.host);
        tds.port(target.port);
        if !ep.database.is_empty() {
            tds.database(&ep.database);
        }
        tds.application_name("querydeck");
        tds.authentication(AuthMethod::sql_server(&ep.username, &ep.password));
        apply_mssql_tls(&mut tds, &config.tls());
        Ok(tds)
    }
}

impl Default for MssqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MssqlDriver {
    fn database_types(&self) -> &'static [DatabaseType] {
        &[DatabaseType::Mssql]
    }

    fn driver_name(&self) -> &'static str {
        "MS-SQL"
    }

    fn dialect(&self) -> &'static dyn Dialect {
        &MssqlDialect
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        target: &ConnectTarget,
        pool: &PoolConfig,
    ) -> Result<Arc<dyn ConnectionPool>, DbError> {
        let manager = MssqlManager {
            config: Self::build_config(config, target)?,
            target: target.clone(),
            connect_timeout: pool.connect_timeout(),
        };
        tracing::debug!(host = %target.host, port = target.port, tunneled = target.is_tunneled(), "opening SQL Server pool");

        let pool = Bb8Pool::build(manager, pool).await?;
        Ok(Arc::new(pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_type_names() {
        assert_eq!(type_name(ColumnType::Int4), "int");
        assert_eq!(type_name(ColumnType::Float8), "float");
        assert_eq!(type_name(ColumnType::NVarchar), "nvarchar");
        assert_eq!(type_name(ColumnType::Datetime2), "datetime2");
        assert_eq!(type_name(ColumnType::BigVarBin), "varbinary");
    }

    #[test]
    fn test_cell_values() {
        assert_eq!(cell_value(ColumnData::U8(Some(7)), ColumnType::Int1), CellValue::Int(7));
        assert_eq!(cell_value(ColumnData::I32(None), ColumnType::Intn), CellValue::Null);
        assert_eq!(cell_value(ColumnData::Bit(Some(true)), ColumnType::Bitn), CellValue::Bool(true));
        assert_eq!(
            cell_value(ColumnData::F64(Some(12.5)), ColumnType::Money),
            CellValue::Text("12.5000".into())
        );
        assert_eq!(
            cell_value(ColumnData::String(Some(Cow::Borrowed("héllo"))), ColumnType::NVarchar),
            CellValue::Text("héllo".into())
        );
        assert_eq!(
            cell_value(ColumnData::Binary(Some(Cow::Owned(vec![1, 2]))), ColumnType::BigVarBin),
            CellValue::Binary(vec![1, 2])
        );
    }

    #[test]
    fn test_server_errors_are_classified() {
        use tiberius::error::Error;
        let err = map_error(Error::Conversion("bad cast".into()));
        assert!(matches!(err, DbError::TypeMismatch(_)));
        let err = map_error(Error::Routing {
            host: "other".into(),
            port: 1433,
        });
        assert!(matches!(err, DbError::ConnectionError(m) if m.contains("other:1433")));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let json = r#"{"db_type":"MSSQL","host":"127.0.0.1","port":9,"username":"sa","password":"x"}"#;
        let config: ConnectionConfig = serde_json::from_str(json).unwrap();
        let pool = PoolConfig {
            acquire_timeout_secs: 2,
            connect_timeout_secs: 2,
            ..PoolConfig::default()
        };

        let result = MssqlDriver::new()
            .connect(&config, &ConnectTarget::direct(&config), &pool)
            .await;
        assert!(matches!(result.err(), Some(DbError::ConnectionError(_))));
    }
}
