// Schema Introspection
// Catalog queries from the dialect, normalized into engine-agnostic metadata.
// Nothing is cached here; every call reads the live catalog.

use crate::db::dialect::{BoundSql, Dialect};
use crate::db::error::DbError;
use crate::db::traits::{scalar_i64, Connection};
use crate::db::types::{CellValue, QueryResponse};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
}

/// Represents a table or view in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub schema: String,
    pub table_type: String, // "BASE TABLE" or "VIEW"
    /// Catalog estimate, when the engine keeps one
    pub row_count: Option<i64>,
}

/// Represents a column in a table or view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub is_primary_key: bool,
    pub ordinal_position: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
    pub index_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_update: String,
    pub on_delete: String,
}

async fn catalog(conn: &mut dyn Connection, query: BoundSql) -> Result<QueryResponse, DbError> {
    conn.query(&query.sql, &query.params).await
}

pub async fn schemas(conn: &mut dyn Connection, dialect: &dyn Dialect) -> Result<Vec<SchemaInfo>, DbError> {
    let resp = catalog(conn, dialect.list_schemas()).await?;
    Ok(resp
        .rows
        .iter()
        .filter_map(|row| text_at(row, 0))
        .map(|name| SchemaInfo { name })
        .collect())
}

pub async fn tables(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    schema: &str,
) -> Result<Vec<TableInfo>, DbError> {
    let resp = catalog(conn, dialect.list_tables(schema)).await?;
    Ok(resp
        .rows
        .iter()
        .map(|row| TableInfo {
            name: text_at(row, 0).unwrap_or_default(),
            schema: text_at(row, 1).unwrap_or_else(|| schema.to_string()),
            table_type: text_at(row, 2).unwrap_or_else(|| "BASE TABLE".to_string()),
            row_count: row.get(3).and_then(cell_as_i64).filter(|n| *n >= 0),
        })
        .collect())
}

pub async fn columns(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnInfo>, DbError> {
    let resp = catalog(conn, dialect.list_columns(schema, table)).await?;
    Ok(resp
        .rows
        .iter()
        .enumerate()
        .map(|(idx, row)| ColumnInfo {
            name: text_at(row, 0).unwrap_or_default(),
            data_type: text_at(row, 1).unwrap_or_default(),
            is_nullable: row.get(2).and_then(cell_as_bool).unwrap_or(true),
            column_default: text_at(row, 3),
            is_primary_key: row.get(4).and_then(cell_as_bool).unwrap_or(false),
            ordinal_position: row
                .get(5)
                .and_then(cell_as_i64)
                .and_then(|n| i32::try_from(n).ok())
                .unwrap_or(idx as i32 + 1),
        })
        .collect())
}

/// One entry per index, key columns in index order
pub async fn indexes(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    schema: &str,
    table: &str,
) -> Result<Vec<IndexInfo>, DbError> {
    let resp = catalog(conn, dialect.list_indexes(schema, table)).await?;
    let mut out: Vec<IndexInfo> = Vec::new();

    for row in &resp.rows {
        let Some(name) = text_at(row, 0) else { continue };
        let column = text_at(row, 1).unwrap_or_default();

        match out.last_mut() {
            Some(current) if current.name == name => current.columns.push(column),
            _ => out.push(IndexInfo {
                name,
                columns: vec![column],
                is_unique: row.get(2).and_then(cell_as_bool).unwrap_or(false),
                is_primary: row.get(3).and_then(cell_as_bool).unwrap_or(false),
                index_type: text_at(row, 4),
            }),
        }
    }
    Ok(out)
}

/// One entry per constraint, column pairs in key order
pub async fn foreign_keys(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    schema: &str,
    table: &str,
) -> Result<Vec<ForeignKeyInfo>, DbError> {
    let resp = catalog(conn, dialect.list_foreign_keys(schema, table)).await?;
    let mut out: Vec<ForeignKeyInfo> = Vec::new();

    for row in &resp.rows {
        let Some(name) = text_at(row, 0) else { continue };
        let column = text_at(row, 1).unwrap_or_default();
        let referenced_column = text_at(row, 4).unwrap_or_default();

        match out.last_mut() {
            Some(current) if current.name == name => {
                current.columns.push(column);
                current.referenced_columns.push(referenced_column);
            }
            _ => out.push(ForeignKeyInfo {
                name,
                columns: vec![column],
                referenced_schema: text_at(row, 2).unwrap_or_else(|| schema.to_string()),
                referenced_table: text_at(row, 3).unwrap_or_default(),
                referenced_columns: vec![referenced_column],
                on_update: referential_action(text_at(row, 5)),
                on_delete: referential_action(text_at(row, 6)),
            }),
        }
    }
    Ok(out)
}

/// Normalize `ON UPDATE/DELETE` rules to their SQL spelling
fn referential_action(raw: Option<String>) -> String {
    let Some(raw) = raw else {
        return "NO ACTION".to_string();
    };
    // pg_constraint stores single-letter codes
    match raw.as_str() {
        "a" => "NO ACTION".to_string(),
        "r" => "RESTRICT".to_string(),
        "c" => "CASCADE".to_string(),
        "n" => "SET NULL".to_string(),
        "d" => "SET DEFAULT".to_string(),
        other => other.replace('_', " ").to_ascii_uppercase(),
    }
}

/// One page of rows, ordered by primary key when the table has one
pub async fn table_data(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    schema: &str,
    table: &str,
    limit: i64,
    offset: i64,
) -> Result<QueryResponse, DbError> {
    if limit < 0 || offset < 0 {
        return Err(DbError::ValidationError(format!(
            "limit and offset must not be negative (got {}, {})",
            limit, offset
        )));
    }

    let cols = columns(conn, dialect, schema, table).await?;
    let order_by: Vec<String> = page_order(dialect, &cols)
        .into_iter()
        .map(|c| dialect.quote_ident(&c.name))
        .collect();

    let base = format!("SELECT * FROM {}", dialect.qualify(schema, table));
    let sql = dialect.paginate(&base, &order_by, limit, offset);
    tracing::debug!(schema, table, limit, offset, "fetching table page");
    conn.query(&sql, &[]).await
}

pub async fn row_count(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    schema: &str,
    table: &str,
) -> Result<i64, DbError> {
    let resp = conn.query(&dialect.count_rows(schema, table), &[]).await?;
    scalar_i64(&resp)
}

// ============================================================================
// Cell readers
// ============================================================================

fn text_at(row: &[CellValue], idx: usize) -> Option<String> {
    row.get(idx).and_then(cell_as_string)
}

pub(crate) fn cell_as_string(cell: &CellValue) -> Option<String> {
    match cell {
        CellValue::Null => None,
        CellValue::Text(s) | CellValue::Timestamp(s) | CellValue::Json(s) => Some(s.clone()),
        // Some MySQL catalog columns arrive with the binary collation
        CellValue::Binary(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        other => Some(other.to_string()),
    }
}

pub(crate) fn cell_as_bool(cell: &CellValue) -> Option<bool> {
    match cell {
        CellValue::Bool(b) => Some(*b),
        CellValue::Int(n) => Some(*n != 0),
        CellValue::Text(s) => match s.to_ascii_lowercase().as_str() {
            "1" | "t" | "true" | "yes" | "y" => Some(true),
            "0" | "f" | "false" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Key columns, or every comparable column in ordinal order when the table has
/// no key, so LIMIT/OFFSET pages stay stable between calls
fn page_order<'a>(dialect: &dyn Dialect, cols: &'a [ColumnInfo]) -> Vec<&'a ColumnInfo> {
    let pk: Vec<&ColumnInfo> = cols.iter().filter(|c| c.is_primary_key).collect();
    if !pk.is_empty() {
        return pk;
    }
    let mut all: Vec<&ColumnInfo> = cols
        .iter()
        .filter(|c| dialect.orderable(&c.data_type))
        .collect();
    all.sort_by_key(|c| c.ordinal_position);
    all
}

pub(crate) fn cell_as_i64(cell: &CellValue) -> Option<i64> {
    match cell {
        CellValue::Int(n) => Some(*n),
        CellValue::Float(f) => Some(*f as i64),
        CellValue::Text(s) => s.trim().parse().ok(),
        CellValue::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::{ConnectionConfig, PoolConfig};
    use crate::db::dialect::SqliteDialect;
    use crate::db::drivers::SqliteDriver;
    use crate::db::traits::{ConnectTarget, DatabaseDriver};

    async fn sample() -> Box<dyn Connection> {
        let config = ConnectionConfig::sqlite("mem", ":memory:");
        let pool = SqliteDriver::new()
            .connect(
                &config,
                &ConnectTarget::direct(&config),
                &config.effective_pool(&PoolConfig::default()),
            )
            .await
            .unwrap();
        let mut conn = pool.acquire().await.unwrap();
        for sql in [
            "CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT NOT NULL DEFAULT 'x')",
            "CREATE TABLE child (a INTEGER, b TEXT, parent_id INTEGER REFERENCES parent(id) ON DELETE CASCADE, PRIMARY KEY (a, b))",
            "CREATE UNIQUE INDEX child_parent ON child(parent_id)",
            "CREATE VIEW parent_names AS SELECT name FROM parent",
            "INSERT INTO parent (id, name) VALUES (3, 'c'), (1, 'a'), (2, 'b')",
        ] {
            conn.execute(sql, &[]).await.unwrap();
        }
        conn
    }

    #[tokio::test]
    async fn test_schemas_and_tables() {
        let mut conn = sample().await;
        let schemas = schemas(conn.as_mut(), &SqliteDialect).await.unwrap();
        assert_eq!(schemas, vec![SchemaInfo { name: "main".into() }]);

        let tables = tables(conn.as_mut(), &SqliteDialect, "main").await.unwrap();
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["child", "parent", "parent_names"]);
        assert_eq!(tables[2].table_type, "VIEW");
        assert_eq!(tables[0].schema, "main");
        assert_eq!(tables[0].row_count, None);
    }

    #[tokio::test]
    async fn test_columns() {
        let mut conn = sample().await;
        let cols = columns(conn.as_mut(), &SqliteDialect, "main", "parent").await.unwrap();
        assert_eq!(cols.len(), 2);
        assert!(cols[0].is_primary_key);
        assert_eq!(cols[0].data_type, "INTEGER");
        assert!(!cols[1].is_nullable);
        assert_eq!(cols[1].column_default.as_deref(), Some("'x'"));
        assert_eq!(cols[1].ordinal_position, 2);

        let missing = columns(conn.as_mut(), &SqliteDialect, "main", "nope").await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_indexes_group_columns() {
        let mut conn = sample().await;
        let idx = indexes(conn.as_mut(), &SqliteDialect, "main", "child").await.unwrap();

        let pk = idx.iter().find(|i| i.is_primary).unwrap();
        assert_eq!(pk.columns, vec!["a", "b"]);
        let unique = idx.iter().find(|i| i.name == "child_parent").unwrap();
        assert!(unique.is_unique && !unique.is_primary);
        assert_eq!(unique.columns, vec!["parent_id"]);
    }

    #[tokio::test]
    async fn test_foreign_keys() {
        let mut conn = sample().await;
        let fks = foreign_keys(conn.as_mut(), &SqliteDialect, "main", "child").await.unwrap();
        assert_eq!(fks.len(), 1);
        assert_eq!(fks[0].columns, vec!["parent_id"]);
        assert_eq!(fks[0].referenced_table, "parent");
        assert_eq!(fks[0].referenced_columns, vec!["id"]);
        assert_eq!(fks[0].on_delete, "CASCADE");
        assert_eq!(fks[0].on_update, "NO ACTION");

        let none = foreign_keys(conn.as_mut(), &SqliteDialect, "main", "parent").await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_table_data_pages_in_key_order() {
        let mut conn = sample().await;
        let page = table_data(conn.as_mut(), &SqliteDialect, "main", "parent", 2, 1).await.unwrap();
        let ids: Vec<_> = page.rows.iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![CellValue::Int(2), CellValue::Int(3)]);

        let err = table_data(conn.as_mut(), &SqliteDialect, "main", "parent", -1, 0).await;
        assert!(matches!(err, Err(DbError::ValidationError(_))));

        assert_eq!(row_count(conn.as_mut(), &SqliteDialect, "main", "parent").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_table_data_without_key_orders_by_every_column() {
        let mut conn = sample().await;
        for sql in [
            "CREATE TABLE log (level INTEGER, msg VARCHAR(20), payload JSON)",
            "INSERT INTO log VALUES (2, 'b', '{}'), (1, 'z', '{}'), (2, 'a', '{}'), (1, 'y', '{}')",
        ] {
            conn.execute(sql, &[]).await.unwrap();
        }

        let mut seen = Vec::new();
        for offset in [0, 2] {
            let page = table_data(conn.as_mut(), &SqliteDialect, "main", "log", 2, offset)
                .await
                .unwrap();
            seen.extend(page.rows.into_iter().map(|r| r[1].clone()));
        }
        let expected: Vec<CellValue> =
            ["y", "z", "a", "b"].iter().map(|s| CellValue::Text(s.to_string())).collect();
        assert_eq!(seen, expected);

        let cols = columns(conn.as_mut(), &SqliteDialect, "main", "log").await.unwrap();
        let order: Vec<&str> = page_order(&SqliteDialect, &cols)
            .into_iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(order, vec!["level", "msg"]);
    }

    #[test]
    fn test_referential_actions() {
        assert_eq!(referential_action(Some("c".into())), "CASCADE");
        assert_eq!(referential_action(Some("n".into())), "SET NULL");
        assert_eq!(referential_action(Some("SET_DEFAULT".into())), "SET DEFAULT");
        assert_eq!(referential_action(None), "NO ACTION");
    }

    #[test]
    fn test_cell_readers() {
        assert_eq!(cell_as_bool(&CellValue::Int(1)), Some(true));
        assert_eq!(cell_as_bool(&CellValue::Text("NO".into())), Some(false));
        assert_eq!(cell_as_i64(&CellValue::Text(" 42 ".into())), Some(42));
        assert_eq!(cell_as_string(&CellValue::Null), None);
        assert_eq!(cell_as_string(&CellValue::Binary(b"id".to_vec())).as_deref(), Some("id"));
    }
}
