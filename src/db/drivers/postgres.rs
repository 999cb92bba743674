// PostgreSQL Driver
// tokio-postgres connections behind a bb8 pool; also serves CockroachDB

use crate::db::config::{ConnectionConfig, DatabaseType, PoolConfig};
use crate::db::dialect::{Dialect, PostgresDialect};
use crate::db::error::{classify_sqlstate, DbError};
use crate::db::pool::{Bb8Pool, BusyFlag};
use crate::db::traits::{Canceller, ConnectTarget, Connection, ConnectionPool, DatabaseDriver};
use crate::db::types::{CellValue, ColumnDef, QueryResponse, SqlParam};
use crate::transport::connect_tcp;
use crate::transport::tls::{native_connector, postgres_ssl_mode};
use bytes::BytesMut;
use postgres_native_tls::TlsConnector as PgTlsConnector;
use crate::export::json::cell_to_json_value;
use postgres_types::{to_sql_checked, Format, FromSql, IsNull, Kind, ToSql, Type};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_postgres::error::ErrorPosition;
use tokio_postgres::{CancelToken, Client, Row, SimpleQueryMessage};

type BoxError = Box<dyn StdError + Sync + Send>;

/// PostgreSQL specific connection wrapper
pub struct PostgresConnection {
    client: Client,
    canceller: Arc<PgCanceller>,
    busy: BusyFlag,
}

impl PostgresConnection {
    async fn run(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryResponse, DbError> {
        self.busy.enter();
        let result = self.run_statement(sql, params).await;
        self.busy.leave();
        result
    }

    async fn run_statement(&self, sql: &str, params: &[SqlParam]) -> Result<QueryResponse, DbError> {
        let started = Instant::now();
        let stmt = self.client.prepare(sql).await.map_err(map_error)?;

        let binds: Vec<TextParam<'_>> = params.iter().map(|p| TextParam(p.as_deref())).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = binds.iter().map(|b| b as &(dyn ToSql + Sync)).collect();

        if stmt.columns().is_empty() {
            let affected = self.client.execute(&stmt, &refs).await.map_err(map_error)?;
            return Ok(QueryResponse::affected(affected).elapsed(started));
        }

        let columns: Vec<ColumnDef> = stmt
            .columns()
            .iter()
            .map(|c| ColumnDef::new(c.name(), c.type_().name()))
            .collect();

        // Types without a binary decoder are read through the text protocol
        let types: Vec<Type> = stmt.columns().iter().map(|c| c.type_().clone()).collect();
        if params.is_empty() && !types.iter().all(has_decoder) {
            return self.run_text(sql, &types, columns, started).await;
        }

        let rows = self.client.query(&stmt, &refs).await.map_err(map_error)?;
        let rows: Vec<Vec<CellValue>> = rows
            .iter()
            .map(|row| (0..row.len()).map(|idx| cell_value(row, idx)).collect())
            .collect();

        Ok(QueryResponse::with_rows(columns, rows).elapsed(started))
    }

    async fn run_text(
        &self,
        sql: &str,
        types: &[Type],
        columns: Vec<ColumnDef>,
        started: Instant,
    ) -> Result<QueryResponse, DbError> {
        let messages = self.client.simple_query(sql).await.map_err(map_error)?;
        let rows: Vec<Vec<CellValue>> = messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(row),
                _ => None,
            })
            .map(|row| {
                types
                    .iter()
                    .enumerate()
                    .map(|(idx, ty)| match row.get(idx) {
                        Some(text) => text_cell(ty, text),
                        None => CellValue::Null,
                    })
                    .collect()
            })
            .collect();

        Ok(QueryResponse::with_rows(columns, rows).elapsed(started))
    }
}

#[async_trait::async_trait]
impl Connection for PostgresConnection {
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
        self.client.is_closed() || self.busy.is_set()
    }
}

/// Protocol-level cancel request, sent over a fresh socket to the same target
struct PgCanceller {
    token: CancelToken,
    target: ConnectTarget,
    tls: native_tls::TlsConnector,
    connect_timeout: Duration,
}

#[async_trait::async_trait]
impl Canceller for PgCanceller {
    async fn cancel(&self) -> Result<(), DbError> {
        let stream = connect_tcp(&self.target, self.connect_timeout).await?;
        let tls = PgTlsConnector::new(self.tls.clone(), &self.target.tls_domain);
        self.token
            .cancel_query_raw(stream, tls)
            .await
            .map_err(|e| DbError::ConnectionError(format!("cancel request failed: {}", e)))?;
        tracing::debug!(host = %self.target.host, "PostgreSQL cancel request sent");
        Ok(())
    }
}

// ============================================================================
// Binding and decoding
// ============================================================================

/// Bind value sent in text format, so the server casts it to the parameter's type
#[derive(Debug)]
struct TextParam<'a>(Option<&'a str>);

impl ToSql for TextParam<'_> {
    fn to_sql(&self, _ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self.0 {
            Some(text) => {
                out.extend_from_slice(text.as_bytes());
                Ok(IsNull::No)
            }
            None => Ok(IsNull::Yes),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}

/// Undecoded column payload, binary format
struct RawValue<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(RawValue(raw))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// pg_catalog scalars with a binary decoder in [`decode`]
const BINARY_SCALARS: &[&str] = &[
    "bool", "int2", "int4", "int8", "oid", "float4", "float8", "numeric", "money", "text",
    "varchar", "bpchar", "name", "unknown", "char", "json", "jsonb", "bytea", "uuid", "inet",
    "date", "time", "timestamp", "timestamptz", "interval", "timetz", "point",
];

/// Whether values of `ty` can be read from the binary wire format
fn has_decoder(ty: &Type) -> bool {
    match ty.kind() {
        Kind::Enum(_) => true,
        Kind::Array(elem) => has_decoder(elem),
        Kind::Domain(base) => has_decoder(base),
        Kind::Simple => ty.schema() == "pg_catalog" && BINARY_SCALARS.contains(&ty.name()),
        _ => false,
    }
}

fn decode(ty: &Type, raw: &[u8]) -> Result<CellValue, BoxError> {
    match ty.kind() {
        Kind::Array(elem) => return decode_array(elem, raw),
        Kind::Domain(base) => return decode(base, raw),
        Kind::Enum(_) => return Ok(CellValue::Text(std::str::from_utf8(raw)?.to_string())),
        _ => {}
    }

    let cell = match ty.name() {
        "bool" => CellValue::Bool(bool::from_sql(ty, raw)?),
        "int2" => CellValue::Int(i16::from_sql(ty, raw)?.into()),
        "int4" => CellValue::Int(i32::from_sql(ty, raw)?.into()),
        "int8" => CellValue::Int(i64::from_sql(ty, raw)?),
        "oid" => CellValue::Int(u32::from_sql(ty, raw)?.into()),
        "float4" => CellValue::float(f32::from_sql(ty, raw)?.into()),
        "float8" => CellValue::float(f64::from_sql(ty, raw)?),
        "numeric" => CellValue::Text(decode_numeric(raw)?),
        "money" => CellValue::Text(decode_money(raw)?),
        "text" | "varchar" | "bpchar" | "name" | "unknown" => {
            CellValue::Text(std::str::from_utf8(raw)?.to_string())
        }
        "char" => CellValue::Text((i8::from_sql(ty, raw)? as u8 as char).to_string()),
        "json" | "jsonb" => CellValue::Json(serde_json::Value::from_sql(ty, raw)?.to_string()),
        "bytea" => CellValue::Binary(raw.to_vec()),
        "uuid" => CellValue::Text(uuid::Uuid::from_sql(ty, raw)?.to_string()),
        "inet" => CellValue::Text(std::net::IpAddr::from_sql(ty, raw)?.to_string()),
        "date" => CellValue::Timestamp(chrono::NaiveDate::from_sql(ty, raw)?.to_string()),
        "time" => CellValue::Timestamp(chrono::NaiveTime::from_sql(ty, raw)?.to_string()),
        "timestamp" => CellValue::Timestamp(
            chrono::NaiveDateTime::from_sql(ty, raw)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        "timestamptz" => CellValue::Timestamp(
            chrono::DateTime::<chrono::Utc>::from_sql(ty, raw)?.to_rfc3339(),
        ),
        "interval" => CellValue::Text(decode_interval(raw)?),
        "timetz" => CellValue::Timestamp(decode_timetz(raw)?),
        "point" => CellValue::Text(decode_point(raw)?),
        other => return Err(format!("no binary decoder for type {}", other).into()),
    };
    Ok(cell)
}

fn be_i64(raw: &[u8]) -> i64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&raw[..8]);
    i64::from_be_bytes(word)
}

fn be_i32(raw: &[u8]) -> i32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&raw[..4]);
    i32::from_be_bytes(word)
}

/// MONEY is an i64 count of cents
fn decode_money(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() != 8 {
        return Err("invalid MONEY payload".into());
    }
    let cents = be_i64(raw);
    let sign = if cents < 0 { "-" } else { "" };
    Ok(format!("{}{}.{:02}", sign, (cents / 100).abs(), (cents % 100).abs()))
}

/// `hh:mm:ss[.ffffff]` with trailing fraction zeros dropped
fn clock(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let total = micros.unsigned_abs();
    let (secs, frac) = (total / 1_000_000, total % 1_000_000);
    let mut text = format!("{}{:02}:{:02}:{:02}", sign, secs / 3600, secs / 60 % 60, secs % 60);
    if frac != 0 {
        text.push('.');
        text.push_str(format!("{:06}", frac).trim_end_matches('0'));
    }
    text
}

/// Binary INTERVAL: microseconds, days, months. Rendered like the server's
/// default `postgres` interval style.
fn decode_interval(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() != 16 {
        return Err("invalid INTERVAL payload".into());
    }
    let micros = be_i64(raw);
    let days = be_i32(&raw[8..]);
    let months = be_i32(&raw[12..]);

    let mut parts = Vec::new();
    for (n, unit) in [(months / 12, "year"), (months % 12, "mon"), (days, "day")] {
        if n != 0 {
            parts.push(format!("{} {}{}", n, unit, if n == 1 { "" } else { "s" }));
        }
    }
    if micros != 0 || parts.is_empty() {
        parts.push(clock(micros));
    }
    Ok(parts.join(" "))
}

/// Binary TIMETZ: microseconds since midnight, then the zone in seconds west of UTC
fn decode_timetz(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() != 12 {
        return Err("invalid TIMETZ payload".into());
    }
    let east = -be_i32(&raw[8..]);
    let abs = east.unsigned_abs();

    let mut text = clock(be_i64(raw));
    text.push_str(&format!("{}{:02}", if east < 0 { '-' } else { '+' }, abs / 3600));
    if abs % 3600 != 0 {
        text.push_str(&format!(":{:02}", abs / 60 % 60));
    }
    if abs % 60 != 0 {
        text.push_str(&format!(":{:02}", abs % 60));
    }
    Ok(text)
}

fn decode_point(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() != 16 {
        return Err("invalid POINT payload".into());
    }
    let x = f64::from_bits(be_i64(raw) as u64);
    let y = f64::from_bits(be_i64(&raw[8..]) as u64);
    Ok(format!("({},{})", x, y))
}

/// Cursor over a binary payload
struct WireReader<'a>(&'a [u8]);

impl<'a> WireReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], BoxError> {
        if self.0.len() < n {
            return Err("truncated array payload".into());
        }
        let (head, tail) = self.0.split_at(n);
        self.0 = tail;
        Ok(head)
    }

    fn i32(&mut self) -> Result<i32, BoxError> {
        Ok(be_i32(self.take(4)?))
    }
}

/// Binary array: ndim, flags, element oid, (length, lower bound) per
/// dimension, then length-prefixed elements. Rendered as nested JSON arrays.
fn decode_array(elem: &Type, raw: &[u8]) -> Result<CellValue, BoxError> {
    let mut reader = WireReader(raw);
    let ndim = reader.i32()?;
    reader.take(8)?;

    let mut dims = Vec::new();
    for _ in 0..ndim.max(0) {
        let len = usize::try_from(reader.i32()?).map_err(|_| "negative array dimension")?;
        reader.i32()?;
        dims.push(len);
    }
    if dims.is_empty() {
        return Ok(CellValue::Json("[]".to_string()));
    }

    let total: usize = dims.iter().product();
    let mut items = Vec::with_capacity(total);
    for _ in 0..total {
        let len = reader.i32()?;
        let item = match usize::try_from(len) {
            Ok(len) => cell_to_json_value(&decode(elem, reader.take(len)?)?),
            Err(_) => serde_json::Value::Null,
        };
        items.push(item);
    }
    Ok(CellValue::Json(nest(&dims, &mut items.into_iter()).to_string()))
}

fn nest(dims: &[usize], items: &mut dyn Iterator<Item = serde_json::Value>) -> serde_json::Value {
    match dims.split_first() {
        Some((&len, [])) => serde_json::Value::Array(items.take(len).collect()),
        Some((&len, rest)) => {
            serde_json::Value::Array((0..len).map(|_| nest(rest, &mut *items)).collect())
        }
        None => serde_json::Value::Array(Vec::new()),
    }
}

/// Binary NUMERIC: ndigits, weight, sign, dscale, then base-10000 digit groups
fn decode_numeric(raw: &[u8]) -> Result<String, BoxError> {
    if raw.len() < 8 {
        return Err("invalid NUMERIC payload".into());
    }
    let word = |at: usize| u16::from_be_bytes([raw[at], raw[at + 1]]);

    let ndigits = word(0) as usize;
    let weight = word(2) as i16 as i32;
    let sign = word(4);
    let dscale = word(6) as usize;

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if raw.len() < 8 + ndigits * 2 {
        return Err("truncated NUMERIC payload".into());
    }

    // Digit group `i` is worth 10000^(weight - i)
    let group = |i: i32| -> u16 {
        if i < 0 || i as usize >= ndigits {
            0
        } else {
            word(8 + i as usize * 2)
        }
    };

    let mut text = String::new();
    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&group(0).to_string());
        for i in 1..=weight {
            text.push_str(&format!("{:04}", group(i)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    let is_zero = text.bytes().all(|b| b == b'0' || b == b'.');
    if sign == 0x4000 && !is_zero {
        text.insert(0, '-');
    }
    Ok(text)
}

/// Decode a binary column; undecodable payloads fall back to text or bytes
fn cell_value(row: &Row, idx: usize) -> CellValue {
    let ty = row.columns()[idx].type_();
    match row.try_get::<_, Option<RawValue<'_>>>(idx) {
        Ok(Some(RawValue(raw))) => decode(ty, raw).unwrap_or_else(|e| {
            tracing::debug!(column = idx, error = %e, "binary decode failed, using raw value");
            match std::str::from_utf8(raw) {
                Ok(text) => CellValue::Text(text.to_string()),
                Err(_) => CellValue::Binary(raw.to_vec()),
            }
        }),
        _ => CellValue::Null,
    }
}

/// Map a text-format value by its column type
fn text_cell(ty: &Type, text: &str) -> CellValue {
    let as_text = || CellValue::Text(text.to_string());
    match ty.name() {
        "bool" => CellValue::Bool(text == "t"),
        "int2" | "int4" | "int8" | "oid" => text.parse().map(CellValue::Int).unwrap_or_else(|_| as_text()),
        "float4" | "float8" => text.parse().map(CellValue::float).unwrap_or_else(|_| as_text()),
        "json" | "jsonb" => CellValue::Json(text.to_string()),
        "bytea" => text
            .strip_prefix("\\x")
            .and_then(decode_hex)
            .map(CellValue::Binary)
            .unwrap_or_else(as_text),
        "date" | "time" | "timetz" => CellValue::Timestamp(text.to_string()),
        "timestamp" | "timestamptz" => CellValue::Timestamp(text.replacen(' ', "T", 1)),
        _ => as_text(),
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

fn map_error(err: tokio_postgres::Error) -> DbError {
    if let Some(db) = err.as_db_error() {
        let mut message = db.message().to_string();
        if let Some(detail) = db.detail() {
            message.push_str(&format!(" ({})", detail));
        }
        if let Some(ErrorPosition::Original(pos)) = db.position() {
            message.push_str(&format!(" at character {}", pos));
        }
        return classify_sqlstate(db.code().code(), message);
    }
    if err.is_closed() {
        return DbError::ConnectionError(err.to_string());
    }
    DbError::QueryError(err.to_string())
}

// ============================================================================
// Pool manager
// ============================================================================

pub struct PostgresManager {
    config: tokio_postgres::Config,
    target: ConnectTarget,
    tls: native_tls::TlsConnector,
    connect_timeout: Duration,
}

#[async_trait::async_trait]
impl bb8::ManageConnection for PostgresManager {
    type Connection = PostgresConnection;
    type Error = DbError;

    async fn connect(&self) -> Result<PostgresConnection, DbError> {
        let stream = connect_tcp(&self.target, self.connect_timeout).await?;
        let tls = PgTlsConnector::new(self.tls.clone(), &self.target.tls_domain);

        let (client, connection) =
            tokio::time::timeout(self.connect_timeout, self.config.connect_raw(stream, tls))
                .await
                .map_err(|_| DbError::ConnectionError("timed out during PostgreSQL startup".to_string()))?
                .map_err(|e| map_error(e).into_connection_error())?;

        let host = self.target.host.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(host = %host, error = %e, "PostgreSQL connection closed with error");
            }
        });

        Ok(PostgresConnection {
            canceller: Arc::new(PgCanceller {
                token: client.cancel_token(),
                target: self.target.clone(),
                tls: self.tls.clone(),
                connect_timeout: self.connect_timeout,
            }),
            client,
            busy: BusyFlag::default(),
        })
    }

    async fn is_valid(&self, conn: &mut PostgresConnection) -> Result<(), DbError> {
        conn.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    fn has_broken(&self, conn: &mut PostgresConnection) -> bool {
        conn.client.is_closed() || conn.busy.is_set()
    }
}

/// PostgreSQL driver implementation
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }

    fn build_config(config: &ConnectionConfig, pool: &PoolConfig) -> Result<tokio_postgres::Config, DbError> {
        let ep = config.engine.network().ok_or_else(|| {
            DbError::ValidationError("PostgreSQL connections need a host".to_string())
        })?;

        let mut pg = tokio_postgres::Config::new();
        pg.user(&ep.username)
            .password(&ep.password)
            .application_name("querydeck")
            .ssl_mode(postgres_ssl_mode(config.tls().mode))
            .connect_timeout(pool.connect_timeout());
        if !ep.database.is_empty() {
            pg.dbname(&ep.database);
        }
        Ok(pg)
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DatabaseDriver for PostgresDriver {
    fn database_types(&self) -> &'static [DatabaseType] {
        &[DatabaseType::Postgresql, DatabaseType::Cockroachdb]
    }

    fn driver_name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn dialect(&self) -> &'static dyn Dialect {
        &PostgresDialect
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        target: &ConnectTarget,
        pool: &PoolConfig,
    ) -> Result<Arc<dyn ConnectionPool>, DbError> {
        let manager = PostgresManager {
            config: Self::build_config(config, pool)?,
            target: target.clone(),
            tls: native_connector(&config.tls())?,
            connect_timeout: pool.connect_timeout(),
        };
        tracing::debug!(host = %target.host, port = target.port, tunneled = target.is_tunneled(), "opening PostgreSQL pool");

        let pool = Bb8Pool::build(manager, pool).await?;
        Ok(Arc::new(pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(ndigits: u16, weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = Vec::new();
        for word in [ndigits, weight as u16, sign, dscale] {
            raw.extend_from_slice(&word.to_be_bytes());
        }
        for d in digits {
            raw.extend_from_slice(&d.to_be_bytes());
        }
        raw
    }

    #[test]
    fn test_numeric_decoding() {
        assert_eq!(decode_numeric(&numeric(2, 0, 0, 2, &[1234, 5000])).unwrap(), "1234.50");
        assert_eq!(decode_numeric(&numeric(2, 1, 0x4000, 0, &[1234, 5678])).unwrap(), "-12345678");
        assert_eq!(decode_numeric(&numeric(1, 1, 0, 0, &[1])).unwrap(), "10000");
        assert_eq!(decode_numeric(&numeric(1, -2, 0, 8, &[1234])).unwrap(), "0.00001234");
        assert_eq!(decode_numeric(&numeric(0, 0, 0, 0, &[])).unwrap(), "0");
        assert_eq!(decode_numeric(&numeric(0, 0, 0xC000, 0, &[])).unwrap(), "NaN");
        assert!(decode_numeric(&[0, 1]).is_err());
    }

    #[test]
    fn test_interval_and_time_types() {
        let interval = [0, 0, 0, 1, 173, 39, 72, 0, 0, 0, 0, 1, 0, 0, 0, 0];
        assert_eq!(
            decode(&Type::INTERVAL, &interval).unwrap(),
            CellValue::Text("1 day 02:00:00".into())
        );

        let mut mixed = Vec::new();
        mixed.extend_from_slice(&(-1_500_000i64).to_be_bytes());
        mixed.extend_from_slice(&3i32.to_be_bytes());
        mixed.extend_from_slice(&14i32.to_be_bytes());
        assert_eq!(decode_interval(&mixed).unwrap(), "1 year 2 mons 3 days -00:00:01.5");
        assert_eq!(decode_interval(&[0; 16]).unwrap(), "00:00:00");

        let mut timetz = Vec::new();
        timetz.extend_from_slice(&43_200_000_000i64.to_be_bytes());
        timetz.extend_from_slice(&(-7200i32).to_be_bytes());
        assert_eq!(
            decode(&Type::TIMETZ, &timetz).unwrap(),
            CellValue::Timestamp("12:00:00+02".into())
        );

        let mut point = Vec::new();
        point.extend_from_slice(&1.0f64.to_be_bytes());
        point.extend_from_slice(&2.5f64.to_be_bytes());
        assert_eq!(decode(&Type::POINT, &point).unwrap(), CellValue::Text("(1,2.5)".into()));
    }

    fn array(elem_oid: u32, dims: &[i32], items: &[Option<Vec<u8>>]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(dims.len() as i32).to_be_bytes());
        raw.extend_from_slice(&1i32.to_be_bytes());
        raw.extend_from_slice(&elem_oid.to_be_bytes());
        for len in dims {
            raw.extend_from_slice(&len.to_be_bytes());
            raw.extend_from_slice(&1i32.to_be_bytes());
        }
        for item in items {
            match item {
                Some(bytes) => {
                    raw.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    raw.extend_from_slice(bytes);
                }
                None => raw.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        raw
    }

    #[test]
    fn test_arrays_decode_to_json() {
        let ints = array(
            23,
            &[3],
            &[Some(1i32.to_be_bytes().to_vec()), None, Some(3i32.to_be_bytes().to_vec())],
        );
        assert_eq!(
            decode(&Type::INT4_ARRAY, &ints).unwrap(),
            CellValue::Json("[1,null,3]".into())
        );

        let id = uuid::Uuid::from_u128(0x0b86);
        let uuids = array(2950, &[1], &[Some(id.as_bytes().to_vec())]);
        assert_eq!(
            decode(&Type::UUID_ARRAY, &uuids).unwrap(),
            CellValue::Json(format!("[\"{}\"]", id))
        );

        let nums = array(1700, &[1], &[Some(numeric(2, 0, 0, 1, &[1, 5000]))]);
        assert_eq!(
            decode(&Type::NUMERIC_ARRAY, &nums).unwrap(),
            CellValue::Json("[\"1.5\"]".into())
        );

        let grid: Vec<Option<Vec<u8>>> =
            (1..=4i16).map(|n| Some(n.to_be_bytes().to_vec())).collect();
        assert_eq!(
            decode(&Type::INT2_ARRAY, &array(21, &[2, 2], &grid)).unwrap(),
            CellValue::Json("[[1,2],[3,4]]".into())
        );
        assert_eq!(
            decode(&Type::TEXT_ARRAY, &array(25, &[], &[])).unwrap(),
            CellValue::Json("[]".into())
        );
        assert!(decode(&Type::INT4_ARRAY, &ints[..ints.len() - 2]).is_err());
    }

    #[test]
    fn test_undecodable_types_use_text_protocol() {
        assert!(has_decoder(&Type::INTERVAL));
        assert!(has_decoder(&Type::TIMETZ_ARRAY));
        assert!(!has_decoder(&Type::TS_VECTOR));
        assert!(!has_decoder(&Type::CIDR_ARRAY));

        assert_eq!(text_cell(&Type::TS_VECTOR, "'cat':1"), CellValue::Text("'cat':1".into()));
        assert_eq!(text_cell(&Type::INT8, "42"), CellValue::Int(42));
        assert_eq!(text_cell(&Type::BOOL, "f"), CellValue::Bool(false));
        assert_eq!(text_cell(&Type::BYTEA, "\\xcafe"), CellValue::Binary(vec![0xca, 0xfe]));
        assert_eq!(
            text_cell(&Type::TIMESTAMP, "2024-01-31 08:00:00"),
            CellValue::Timestamp("2024-01-31T08:00:00".into())
        );
    }

    #[test]
    fn test_text_params_bind_in_text_format() {
        let mut out = BytesMut::new();
        let param = TextParam(Some("42"));
        assert!(matches!(param.to_sql(&Type::INT4, &mut out).unwrap(), IsNull::No));
        assert_eq!(&out[..], b"42");
        assert!(matches!(param.encode_format(&Type::INT4), Format::Text));

        let null = TextParam(None);
        assert!(matches!(null.to_sql(&Type::INT4, &mut out).unwrap(), IsNull::Yes));
    }

    #[test]
    fn test_driver_serves_cockroach() {
        let driver = PostgresDriver::new();
        assert!(driver.database_types().contains(&DatabaseType::Cockroachdb));
        assert_eq!(driver.dialect().placeholder(1), "$1");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        let json = r#"{"db_type":"PostgreSQL","host":"127.0.0.1","port":9,"username":"u","database":"test"}"#;
        let config: ConnectionConfig = serde_json::from_str(json).unwrap();
        let pool = PoolConfig {
            acquire_timeout_secs: 2,
            connect_timeout_secs: 2,
            ..PoolConfig::default()
        };

        let result = PostgresDriver::new()
            .connect(&config, &ConnectTarget::direct(&config), &pool)
            .await;
        assert!(matches!(result.err(), Some(DbError::ConnectionError(_))));
    }
}
