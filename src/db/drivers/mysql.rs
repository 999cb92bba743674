// MySQL Driver
// mysql_async connections behind a bb8 pool; also serves MariaDB

use crate::db::config::{ConnectionConfig, DatabaseType, PoolConfig};
use crate::db::dialect::{Dialect, MysqlDialect};
use crate::db::error::{classify_mysql, DbError};
use crate::db::pool::{Bb8Pool, BusyFlag};
use crate::db::traits::{Canceller, ConnectTarget, Connection, ConnectionPool, DatabaseDriver};
use crate::db::types::{CellValue, ColumnDef, QueryResponse, SqlParam};
use crate::transport::tls::mysql_ssl_opts;
use mysql_async::consts::{ColumnFlags, ColumnType};
use mysql_async::prelude::{Protocol, Queryable};
use mysql_async::{Column, Conn, Opts, OptsBuilder, Params, QueryResult, Row, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// `binary` collation id; columns using it hold bytes, not text
const BINARY_CHARSET: u16 = 63;

/// MySQL specific connection wrapper
pub struct MysqlConnection {
    conn: Conn,
    canceller: Arc<MysqlCanceller>,
    busy: BusyFlag,
}

impl MysqlConnection {
    async fn run(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryResponse, DbError> {
        self.busy.enter();
        let started = Instant::now();
        let result = if params.is_empty() {
            // Text protocol: accepts statements the server cannot prepare
            match self.conn.query_iter(sql).await {
                Ok(result) => drain(result).await,
                Err(e) => Err(map_error(e)),
            }
        } else {
            let values = params
                .iter()
                .map(|p| match p.as_deref() {
                    Some(text) => Value::Bytes(text.as_bytes().to_vec()),
                    None => Value::NULL,
                })
                .collect();
            match self.conn.exec_iter(sql, Params::Positional(values)).await {
                Ok(result) => drain(result).await,
                Err(e) => Err(map_error(e)),
            }
        };
        self.busy.leave();
        result.map(|resp| resp.elapsed(started))
    }
}

/// First result set as the response; later sets are read and discarded
async fn drain<P: Protocol>(mut result: QueryResult<'_, 'static, P>) -> Result<QueryResponse, DbError> {
    let columns: Vec<Column> = result.columns().map(|c| c.to_vec()).unwrap_or_default();

    let response = if columns.is_empty() {
        QueryResponse::affected(result.affected_rows())
    } else {
        let rows: Vec<Row> = result.collect().await.map_err(map_error)?;
        let rows = rows
            .into_iter()
            .map(|row| {
                row.unwrap()
                    .into_iter()
                    .zip(&columns)
                    .map(|(value, column)| cell_value(value, column))
                    .collect()
            })
            .collect();
        let defs = columns
            .iter()
            .map(|c| ColumnDef::new(c.name_str(), type_name(c)))
            .collect();
        QueryResponse::with_rows(defs, rows)
    };

    result.drop_result().await.map_err(map_error)?;
    Ok(response)
}

#[async_trait::async_trait]
impl Connection for MysqlConnection {
    async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryResponse, DbError> {
        self.run(sql, params).await
    }

    async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DbError> {
        let resp = self.run(sql, params).await?;
        Ok(resp.affected_rows.unwrap_or(resp.row_count as u64))
    }

    fn canceller(&self) -> Option<Arc<dyn Canceller>> {
        Some(self.canceller.clone())
    }

    fn is_broken(&self) -> bool {
        self.busy.is_set()
    }
}

/// `KILL QUERY` issued from a second connection
struct MysqlCanceller {
    opts: Opts,
    thread_id: u32,
    connect_timeout: Duration,
}

#[async_trait::async_trait]
impl Canceller for MysqlCanceller {
    async fn cancel(&self) -> Result<(), DbError> {
        let mut conn = tokio::time::timeout(self.connect_timeout, Conn::new(self.opts.clone()))
            .await
            .map_err(|_| DbError::ConnectionError("timed out opening cancel connection".to_string()))?
            .map_err(map_error)?;
        conn.query_drop(format!("KILL QUERY {}", self.thread_id))
            .await
            .map_err(map_error)?;
        let _ = conn.disconnect().await;
        tracing::debug!(thread_id = self.thread_id, "MySQL query killed");
        Ok(())
    }
}

// ============================================================================
// Type mapping
// ============================================================================

fn is_binary(column: &Column) -> bool {
    column.character_set() == BINARY_CHARSET
}

/// Engine type name as MySQL spells it in `information_schema`
fn type_name(column: &Column) -> String {
    let unsigned = column.flags().contains(ColumnFlags::UNSIGNED_FLAG);
    let base = match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY => "TINYINT",
        ColumnType::MYSQL_TYPE_SHORT => "SMALLINT",
        ColumnType::MYSQL_TYPE_INT24 => "MEDIUMINT",
        ColumnType::MYSQL_TYPE_LONG => "INT",
        ColumnType::MYSQL_TYPE_LONGLONG => "BIGINT",
        ColumnType::MYSQL_TYPE_FLOAT => "FLOAT",
        ColumnType::MYSQL_TYPE_DOUBLE => "DOUBLE",
        ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => "DECIMAL",
        ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE => "DATE",
        ColumnType::MYSQL_TYPE_TIME | ColumnType::MYSQL_TYPE_TIME2 => "TIME",
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_DATETIME2 => "DATETIME",
        ColumnType::MYSQL_TYPE_TIMESTAMP | ColumnType::MYSQL_TYPE_TIMESTAMP2 => "TIMESTAMP",
        ColumnType::MYSQL_TYPE_YEAR => "YEAR",
        ColumnType::MYSQL_TYPE_BIT => "BIT",
        ColumnType::MYSQL_TYPE_JSON => "JSON",
        ColumnType::MYSQL_TYPE_ENUM => "ENUM",
        ColumnType::MYSQL_TYPE_SET => "SET",
        ColumnType::MYSQL_TYPE_GEOMETRY => "GEOMETRY",
        ColumnType::MYSQL_TYPE_NULL => "NULL",
        ColumnType::MYSQL_TYPE_VARCHAR | ColumnType::MYSQL_TYPE_VAR_STRING => {
            if is_binary(column) { "VARBINARY" } else { "VARCHAR" }
        }
        ColumnType::MYSQL_TYPE_STRING => {
            if is_binary(column) { "BINARY" } else { "CHAR" }
        }
        ColumnType::MYSQL_TYPE_TINY_BLOB
        | ColumnType::MYSQL_TYPE_MEDIUM_BLOB
        | ColumnType::MYSQL_TYPE_LONG_BLOB
        | ColumnType::MYSQL_TYPE_BLOB => {
            if is_binary(column) { "BLOB" } else { "TEXT" }
        }
        other => return format!("{:?}", other).trim_start_matches("MYSQL_TYPE_").to_string(),
    };
    if unsigned {
        format!("{} UNSIGNED", base)
    } else {
        base.to_string()
    }
}

/// Map one value. The text protocol delivers everything as bytes, the binary
/// protocol as typed values, so both shapes are handled per column type.
fn cell_value(value: Value, column: &Column) -> CellValue {
    let ty = column.column_type();
    match value {
        Value::NULL => CellValue::Null,
        Value::Int(i) if is_bool(column) => CellValue::Bool(i != 0),
        Value::Int(i) => CellValue::Int(i),
        Value::UInt(u) => CellValue::wide_int(u),
        Value::Float(f) => CellValue::float(f.into()),
        Value::Double(d) => CellValue::float(d),
        Value::Date(y, mo, d, h, mi, s, us) => {
            if matches!(ty, ColumnType::MYSQL_TYPE_DATE | ColumnType::MYSQL_TYPE_NEWDATE) {
                CellValue::Timestamp(format!("{:04}-{:02}-{:02}", y, mo, d))
            } else {
                CellValue::Timestamp(format!(
                    "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}{}",
                    y, mo, d, h, mi, s, micros(us)
                ))
            }
        }
        Value::Time(negative, days, h, mi, s, us) => CellValue::Timestamp(format!(
            "{}{:02}:{:02}:{:02}{}",
            if negative { "-" } else { "" },
            days * 24 + u32::from(h),
            mi,
            s,
            micros(us)
        )),
        Value::Bytes(bytes) => bytes_value(bytes, column),
    }
}

fn is_bool(column: &Column) -> bool {
    column.column_type() == ColumnType::MYSQL_TYPE_TINY && column.column_length() == 1
}

fn micros(us: u32) -> String {
    if us == 0 {
        String::new()
    } else {
        format!(".{:06}", us)
    }
}

fn bytes_value(bytes: Vec<u8>, column: &Column) -> CellValue {
    use ColumnType::*;

    let ty = column.column_type();
    if ty == MYSQL_TYPE_BIT {
        return if column.column_length() == 1 {
            CellValue::Bool(bytes.iter().any(|b| *b != 0))
        } else {
            CellValue::Binary(bytes)
        };
    }
    if is_binary(column) && !matches!(ty, MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_INT24
        | MYSQL_TYPE_LONG | MYSQL_TYPE_LONGLONG | MYSQL_TYPE_YEAR | MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE
        | MYSQL_TYPE_DECIMAL | MYSQL_TYPE_NEWDECIMAL | MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE
        | MYSQL_TYPE_TIME | MYSQL_TYPE_TIME2 | MYSQL_TYPE_DATETIME | MYSQL_TYPE_DATETIME2
        | MYSQL_TYPE_TIMESTAMP | MYSQL_TYPE_TIMESTAMP2 | MYSQL_TYPE_JSON)
    {
        return CellValue::Binary(bytes);
    }

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => return CellValue::Binary(e.into_bytes()),
    };

    match ty {
        MYSQL_TYPE_TINY if is_bool(column) => CellValue::Bool(text != "0"),
        MYSQL_TYPE_TINY | MYSQL_TYPE_SHORT | MYSQL_TYPE_INT24 | MYSQL_TYPE_LONG | MYSQL_TYPE_LONGLONG
        | MYSQL_TYPE_YEAR => match text.parse::<i64>() {
            Ok(i) => CellValue::Int(i),
            Err(_) => CellValue::Text(text),
        },
        MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE => match text.parse::<f64>() {
            Ok(f) => CellValue::float(f),
            Err(_) => CellValue::Text(text),
        },
        MYSQL_TYPE_DATETIME | MYSQL_TYPE_DATETIME2 | MYSQL_TYPE_TIMESTAMP | MYSQL_TYPE_TIMESTAMP2 => {
            CellValue::Timestamp(text.replacen(' ', "T", 1))
        }
        MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE | MYSQL_TYPE_TIME | MYSQL_TYPE_TIME2 => {
            CellValue::Timestamp(text)
        }
        MYSQL_TYPE_JSON => CellValue::Json(text),
        _ => CellValue::Text(text),
    }
}

fn map_error(err: mysql_async::Error) -> DbError {
    match &err {
        mysql_async::Error::Server(e) => classify_mysql(e.code, e.message.clone()),
        mysql_async::Error::Io(_) => DbError::ConnectionError(err.to_string()),
        mysql_async::Error::Url(_) => DbError::ValidationError(err.to_string()),
        _ => DbError::QueryError(err.to_string()),
    }
}

// ============================================================================
// Pool manager
// ============================================================================

pub struct MysqlManager {
    opts: Opts,
    connect_timeout: Duration,
}

#[async_trait::async_trait]
impl bb8::ManageConnection for MysqlManager {
    type Connection = MysqlConnection;
    type Error = DbError;

    async fn connect(&self) -> Result<MysqlConnection, DbError> {
        let conn = tokio::time::timeout(self.connect_timeout, Conn::new(self.opts.clone()))
            .await
            .map_err(|_| {
                DbError::ConnectionError(format!(
                    "timed out connecting to {}:{}",
                    self.opts.ip_or_hostname(),
                    self.opts.tcp_port()
                ))
            })?
            .map_err(|e| map_error(e).into_connection_error())?;

        Ok(MysqlConnection {
            canceller: Arc::new(MysqlCanceller {
                opts: self.opts.clone(),
                thread_id: conn.id(),
                connect_timeout: self.connect_timeout,
            }),
            conn,
            busy: BusyFlag::default(),
        })
    }

    async fn is_valid(&self, conn: &mut MysqlConnection) -> Result<(), DbError> {
        conn.conn.ping().await.map_err(map_error)
    }

    fn has_broken(&self, conn: &mut MysqlConnection) -> bool {
        conn.busy.is_set()
    }
}

/// MySQL driver implementation
pub struct MysqlDriver;

impl MysqlDriver {
    pub fn new() -> Self {
        Self
    }

    fn build_opts(config: &ConnectionConfig, target: &ConnectTarget) -> Result<Opts, DbError> {
        let ep = config.engine.network().ok_or_else(|| {
            DbError::ValidationError("MySQL connections need a host".to_string())
        })?;

        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let builder = OptsBuilder::default()
            .ip_or_hostname(target.host.clone())
            .tcp_port(target.port)
            .user(non_empty(&ep.username))
            .pass(non_empty(&ep.password))
            .db_name(non_empty(&ep.database))
            .prefer_socket(false)
            // UPDATE reports matched rows, so rewriting an unchanged cell counts as 1
            .client_found_rows(true)
            .ssl_opts(mysql_ssl_opts(&config.tls(), &target.tls_domain)?);
        Ok(builder.into())
    }
}

impl Default for MysqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for MysqlDriver {
    fn database_types(&self) -> &'static [DatabaseType] {
        &[DatabaseType::Mysql, DatabaseType::Mariadb]
    }

    fn driver_name(&self) -> &'static str {
        "MySQL"
    }

    fn dialect(&self) -> &'static dyn Dialect {
        &MysqlDialect
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        target: &ConnectTarget,
        pool: &PoolConfig,
    ) -> Result<Arc<dyn ConnectionPool>, DbError> {
        let manager = MysqlManager {
            opts: Self::build_opts(config, target)?,
            connect_timeout: pool.connect_timeout(),
        };
        tracing::debug!(host = %target.host, port = target.port, tunneled = target.is_tunneled(), "opening MySQL pool");

        let pool = Bb8Pool::build(manager, pool).await?;
        Ok(Arc::new(pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(ty: ColumnType) -> Column {
        Column::new(ty).with_character_set(33)
    }

    #[test]
    fn test_type_names() {
        assert_eq!(type_name(&column(ColumnType::MYSQL_TYPE_LONG)), "INT");
        assert_eq!(
            type_name(&column(ColumnType::MYSQL_TYPE_LONGLONG).with_flags(ColumnFlags::UNSIGNED_FLAG)),
            "BIGINT UNSIGNED"
        );
        assert_eq!(type_name(&column(ColumnType::MYSQL_TYPE_VAR_STRING)), "VARCHAR");
        assert_eq!(
            type_name(&column(ColumnType::MYSQL_TYPE_BLOB).with_character_set(BINARY_CHARSET)),
            "BLOB"
        );
    }

    #[test]
    fn test_text_protocol_values() {
        let int = column(ColumnType::MYSQL_TYPE_LONG).with_column_length(11);
        assert_eq!(cell_value(Value::Bytes(b"42".to_vec()), &int), CellValue::Int(42));

        let flag = column(ColumnType::MYSQL_TYPE_TINY).with_column_length(1);
        assert_eq!(cell_value(Value::Bytes(b"1".to_vec()), &flag), CellValue::Bool(true));

        let dt = column(ColumnType::MYSQL_TYPE_DATETIME);
        assert_eq!(
            cell_value(Value::Bytes(b"2024-01-31 08:00:00".to_vec()), &dt),
            CellValue::Timestamp("2024-01-31T08:00:00".into())
        );

        let dec = column(ColumnType::MYSQL_TYPE_NEWDECIMAL);
        assert_eq!(
            cell_value(Value::Bytes(b"12345678901234567890.12".to_vec()), &dec),
            CellValue::Text("12345678901234567890.12".into())
        );

        let blob = column(ColumnType::MYSQL_TYPE_BLOB).with_character_set(BINARY_CHARSET);
        assert_eq!(cell_value(Value::Bytes(vec![0xff]), &blob), CellValue::Binary(vec![0xff]));
    }

    #[test]
    fn test_binary_protocol_values() {
        let date = column(ColumnType::MYSQL_TYPE_DATE);
        assert_eq!(
            cell_value(Value::Date(2024, 1, 31, 0, 0, 0, 0), &date),
            CellValue::Timestamp("2024-01-31".into())
        );
        let time = column(ColumnType::MYSQL_TYPE_TIME);
        assert_eq!(
            cell_value(Value::Time(true, 1, 2, 3, 4, 0), &time),
            CellValue::Timestamp("-26:03:04".into())
        );
        let big = column(ColumnType::MYSQL_TYPE_LONGLONG);
        assert_eq!(cell_value(Value::UInt(u64::MAX), &big), CellValue::Text(u64::MAX.to_string()));
    }

    #[test]
    fn test_tunnel_target_keeps_tls_domain() {
        let json = r#"{"db_type":"MariaDB","host":"db.internal","username":"root","tls":{"mode":"verify_full"}}"#;
        let config: ConnectionConfig = serde_json::from_str(json).unwrap();
        let target = ConnectTarget {
            host: "127.0.0.1".to_string(),
            port: 40000,
            tls_domain: "db.internal".to_string(),
        };

        let opts = MysqlDriver::build_opts(&config, &target).unwrap();
        assert_eq!(opts.ip_or_hostname(), "127.0.0.1");
        assert!(opts.client_found_rows());
        assert_eq!(opts.tcp_port(), 40000);
        assert_eq!(
            opts.ssl_opts().and_then(|s| s.tls_hostname_override()),
            Some("db.internal")
        );
    }

    #[test]
    fn test_update_counts_matched_rows() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"db_type":"MySQL","host":"localhost"}"#).unwrap();
        let opts = MysqlDriver::build_opts(&config, &ConnectTarget::direct(&config)).unwrap();
        assert!(opts.client_found_rows());
        assert_eq!(opts.tcp_port(), 3306);
    }
}
