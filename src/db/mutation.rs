// Mutation Engine
// Parameterized UPDATE/INSERT/DELETE keyed by primary-key tuples

use crate::db::dialect::Dialect;
use crate::db::error::DbError;
use crate::db::traits::Connection;
use crate::db::types::SqlParam;

/// Tuples per `IN (...)` batch
const DELETE_BATCH: usize = 500;

/// Schema-qualified target table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub table: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn qualified(&self, dialect: &dyn Dialect) -> String {
        dialect.qualify(&self.schema, &self.table)
    }
}

/// Placeholder numbering across one statement
struct Binds<'d> {
    dialect: &'d dyn Dialect,
    params: Vec<SqlParam>,
}

impl<'d> Binds<'d> {
    fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    fn push(&mut self, value: SqlParam) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    /// `a = ? AND b = ?`
    fn key_match(&mut self, columns: &[String], values: &[SqlParam]) -> String {
        let mut terms = Vec::with_capacity(columns.len());
        for (col, val) in columns.iter().zip(values) {
            let slot = self.push(val.clone());
            terms.push(format!("{} = {}", self.dialect.quote_ident(col), slot));
        }
        terms.join(" AND ")
    }
}

/// Transaction or savepoint around one mutation
struct WriteScope {
    savepoint: Option<String>,
}

impl WriteScope {
    async fn open(conn: &mut dyn Connection, dialect: &dyn Dialect, nested: bool) -> Result<Self, DbError> {
        if nested {
            let name = format!("qd_{}", uuid::Uuid::new_v4().simple());
            conn.execute(&dialect.savepoint_sql(&name), &[]).await?;
            Ok(Self { savepoint: Some(name) })
        } else {
            conn.execute(dialect.begin_sql(), &[]).await?;
            Ok(Self { savepoint: None })
        }
    }

    async fn commit(self, conn: &mut dyn Connection, dialect: &dyn Dialect) -> Result<(), DbError> {
        match &self.savepoint {
            Some(name) => {
                if let Some(release) = dialect.release_savepoint_sql(name) {
                    conn.execute(&release, &[]).await?;
                }
            }
            None => {
                conn.execute(dialect.commit_sql(), &[]).await?;
            }
        }
        Ok(())
    }

    async fn rollback(self, conn: &mut dyn Connection, dialect: &dyn Dialect) {
        let sql = match &self.savepoint {
            Some(name) => dialect.rollback_to_savepoint_sql(name),
            None => dialect.rollback_sql().to_string(),
        };
        if let Err(e) = conn.execute(&sql, &[]).await {
            tracing::warn!(error = %e, "rollback after failed mutation did not complete");
        }
    }

    /// Commit on success, roll back on error
    async fn finish<T>(
        self,
        conn: &mut dyn Connection,
        dialect: &dyn Dialect,
        result: Result<T, DbError>,
    ) -> Result<T, DbError> {
        match result {
            Ok(value) => {
                self.commit(conn, dialect).await?;
                Ok(value)
            }
            Err(e) => {
                self.rollback(conn, dialect).await;
                Err(e)
            }
        }
    }
}

fn check_key(pk_columns: &[String], pk_values: &[SqlParam]) -> Result<(), DbError> {
    if pk_columns.is_empty() {
        return Err(DbError::ValidationError(
            "at least one primary key column is required".to_string(),
        ));
    }
    if pk_columns.len() != pk_values.len() {
        return Err(DbError::ValidationError(format!(
            "{} primary key columns but {} values",
            pk_columns.len(),
            pk_values.len()
        )));
    }
    Ok(())
}

/// Set one cell. Exactly one row must match the key, else nothing changes.
#[allow(clippy::too_many_arguments)]
pub async fn update_cell(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    nested: bool,
    target: &TableRef,
    column: &str,
    value: SqlParam,
    pk_columns: &[String],
    pk_values: &[SqlParam],
) -> Result<(), DbError> {
    check_key(pk_columns, pk_values)?;

    let mut binds = Binds::new(dialect);
    let assign = format!("{} = {}", dialect.quote_ident(column), binds.push(value));
    let filter = binds.key_match(pk_columns, pk_values);
    let sql = format!("UPDATE {} SET {} WHERE {}", target.qualified(dialect), assign, filter);

    let scope = WriteScope::open(conn, dialect, nested).await?;
    let result = match conn.execute(&sql, &binds.params).await {
        Ok(1) => Ok(()),
        Ok(n) => Err(DbError::ConstraintViolation(format!(
            "expected the key to match exactly one row in {}, matched {}",
            target.table, n
        ))),
        Err(e) => Err(e),
    };
    scope.finish(conn, dialect, result).await?;

    tracing::debug!(table = %target.table, column, "cell updated");
    Ok(())
}

/// Insert one row; values bind positionally to `columns`
pub async fn insert_row(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    target: &TableRef,
    columns: &[String],
    values: &[SqlParam],
) -> Result<u64, DbError> {
    if columns.len() != values.len() {
        return Err(DbError::ValidationError(format!(
            "{} columns but {} values",
            columns.len(),
            values.len()
        )));
    }

    if columns.is_empty() {
        let sql = format!("INSERT INTO {} DEFAULT VALUES", target.qualified(dialect));
        return conn.execute(&sql, &[]).await;
    }

    let mut binds = Binds::new(dialect);
    let names: Vec<String> = columns.iter().map(|c| dialect.quote_ident(c)).collect();
    let slots: Vec<String> = values.iter().map(|v| binds.push(v.clone())).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        target.qualified(dialect),
        names.join(", "),
        slots.join(", ")
    );
    conn.execute(&sql, &binds.params).await
}

/// Delete rows by key. Returns the true count, which is lower than the number
/// of tuples when some rows were already gone.
pub async fn delete_rows(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    nested: bool,
    target: &TableRef,
    pk_columns: &[String],
    pk_values_list: &[Vec<SqlParam>],
) -> Result<u64, DbError> {
    if pk_values_list.is_empty() {
        return Ok(0);
    }
    for values in pk_values_list {
        check_key(pk_columns, values)?;
    }

    let scope = WriteScope::open(conn, dialect, nested).await?;
    let result = if dialect.supports_tuple_in() {
        delete_batched(conn, dialect, target, pk_columns, pk_values_list).await
    } else {
        delete_each(conn, dialect, target, pk_columns, pk_values_list).await
    };
    let deleted = scope.finish(conn, dialect, result).await?;

    tracing::debug!(table = %target.table, requested = pk_values_list.len(), deleted, "rows deleted");
    Ok(deleted)
}

async fn delete_batched(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    target: &TableRef,
    pk_columns: &[String],
    pk_values_list: &[Vec<SqlParam>],
) -> Result<u64, DbError> {
    let key = if pk_columns.len() == 1 {
        dialect.quote_ident(&pk_columns[0])
    } else {
        let cols: Vec<String> = pk_columns.iter().map(|c| dialect.quote_ident(c)).collect();
        format!("({})", cols.join(", "))
    };

    let mut deleted = 0;
    for chunk in pk_values_list.chunks(DELETE_BATCH) {
        let mut binds = Binds::new(dialect);
        let tuples: Vec<String> = chunk
            .iter()
            .map(|values| {
                let slots: Vec<String> = values.iter().map(|v| binds.push(v.clone())).collect();
                match slots.as_slice() {
                    [single] => single.clone(),
                    _ => format!("({})", slots.join(", ")),
                }
            })
            .collect();
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            target.qualified(dialect),
            key,
            tuples.join(", ")
        );
        deleted += conn.execute(&sql, &binds.params).await?;
    }
    Ok(deleted)
}

async fn delete_each(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    target: &TableRef,
    pk_columns: &[String],
    pk_values_list: &[Vec<SqlParam>],
) -> Result<u64, DbError> {
    let mut deleted = 0;
    for values in pk_values_list {
        let mut binds = Binds::new(dialect);
        let filter = binds.key_match(pk_columns, values);
        let sql = format!("DELETE FROM {} WHERE {}", target.qualified(dialect), filter);
        deleted += conn.execute(&sql, &binds.params).await?;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::{ConnectionConfig, PoolConfig};
    use crate::db::dialect::{MssqlDialect, PostgresDialect, SqliteDialect};
    use crate::db::drivers::SqliteDriver;
    use crate::db::traits::{Canceller, ConnectTarget, DatabaseDriver};
    use crate::db::types::{CellValue, QueryResponse};
    use std::sync::Arc;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn people() -> Box<dyn Connection> {
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
        conn.execute("CREATE TABLE people (id INTEGER PRIMARY KEY, team TEXT, name TEXT)", &[])
            .await
            .unwrap();
        conn.execute(
            "INSERT INTO people VALUES (1, 'red', 'ann'), (2, 'red', 'bob'), (3, 'blue', 'cy')",
            &[],
        )
        .await
        .unwrap();
        conn
    }

    async fn names(conn: &mut dyn Connection) -> Vec<CellValue> {
        let resp = conn.query("SELECT name FROM people ORDER BY id", &[]).await.unwrap();
        resp.rows.into_iter().map(|mut r| r.remove(0)).collect()
    }

    #[tokio::test]
    async fn test_update_single_row() {
        let mut conn = people().await;
        let target = TableRef::new("main", "people");
        update_cell(
            conn.as_mut(),
            &SqliteDialect,
            false,
            &target,
            "name",
            SqlParam::from("anne"),
            &keys(&["id"]),
            &[SqlParam::from("1")],
        )
        .await
        .unwrap();

        let names = names(conn.as_mut()).await;
        assert_eq!(names[0], CellValue::Text("anne".into()));
        assert_eq!(names[1], CellValue::Text("bob".into()));
    }

    #[tokio::test]
    async fn test_update_requires_exactly_one_match() {
        let mut conn = people().await;
        let target = TableRef::new("main", "people");

        let err = update_cell(
            conn.as_mut(),
            &SqliteDialect,
            false,
            &target,
            "name",
            SqlParam::from("x"),
            &keys(&["id"]),
            &[SqlParam::from("99")],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));

        // A stale key set that matches two rows must not be applied
        let err = update_cell(
            conn.as_mut(),
            &SqliteDialect,
            false,
            &target,
            "name",
            SqlParam::from("x"),
            &keys(&["team"]),
            &[SqlParam::from("red")],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
        assert_eq!(names(conn.as_mut()).await[0], CellValue::Text("ann".into()));
    }

    #[tokio::test]
    async fn test_update_validates_key_arity() {
        let mut conn = people().await;
        let err = update_cell(
            conn.as_mut(),
            &SqliteDialect,
            false,
            &TableRef::new("main", "people"),
            "name",
            SqlParam::Null,
            &keys(&["id", "team"]),
            &[SqlParam::from("1")],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_insert_row() {
        let mut conn = people().await;
        let target = TableRef::new("main", "people");
        let inserted = insert_row(
            conn.as_mut(),
            &SqliteDialect,
            &target,
            &keys(&["id", "name"]),
            &[SqlParam::from("4"), SqlParam::Null],
        )
        .await
        .unwrap();
        assert_eq!(inserted, 1);

        let err = insert_row(conn.as_mut(), &SqliteDialect, &target, &keys(&["id"]), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_delete_reports_true_count() {
        let mut conn = people().await;
        let target = TableRef::new("main", "people");
        let list = vec![
            vec![SqlParam::from("1")],
            vec![SqlParam::from("3")],
            vec![SqlParam::from("42")],
        ];
        let deleted = delete_rows(conn.as_mut(), &SqliteDialect, false, &target, &keys(&["id"]), &list)
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(names(conn.as_mut()).await, vec![CellValue::Text("bob".into())]);

        let none = delete_rows(conn.as_mut(), &SqliteDialect, false, &target, &keys(&["id"]), &[])
            .await
            .unwrap();
        assert_eq!(none, 0);
    }

    #[tokio::test]
    async fn test_composite_key_delete_inside_user_transaction() {
        let mut conn = people().await;
        let target = TableRef::new("main", "people");
        conn.execute("BEGIN", &[]).await.unwrap();

        let deleted = delete_rows(
            conn.as_mut(),
            &SqliteDialect,
            true,
            &target,
            &keys(&["id", "team"]),
            &[vec![SqlParam::from("2"), SqlParam::from("red")]],
        )
        .await
        .unwrap();
        assert_eq!(deleted, 1);

        // The savepoint is released into the outer transaction, which still decides
        conn.execute("ROLLBACK", &[]).await.unwrap();
        assert_eq!(names(conn.as_mut()).await.len(), 3);
    }

    /// Records statements and reports one affected row for each
    #[derive(Default)]
    struct Recorder {
        statements: Vec<(String, Vec<SqlParam>)>,
    }

    #[async_trait::async_trait]
    impl Connection for Recorder {
        async fn query(&mut self, sql: &str, params: &[SqlParam]) -> Result<QueryResponse, DbError> {
            self.statements.push((sql.to_string(), params.to_vec()));
            Ok(QueryResponse::affected(1))
        }

        async fn execute(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64, DbError> {
            self.query(sql, params).await.map(|_| 1)
        }

        fn canceller(&self) -> Option<Arc<dyn Canceller>> {
            None
        }
    }

    #[tokio::test]
    async fn test_postgres_statements() {
        let mut rec = Recorder::default();
        let target = TableRef::new("public", "t");
        update_cell(
            &mut rec,
            &PostgresDialect,
            false,
            &target,
            "v",
            SqlParam::from("x"),
            &keys(&["a", "b"]),
            &[SqlParam::from("1"), SqlParam::from("2")],
        )
        .await
        .unwrap();
        assert_eq!(rec.statements[0].0, "BEGIN");
        assert_eq!(
            rec.statements[1].0,
            "UPDATE \"public\".\"t\" SET \"v\" = $1 WHERE \"a\" = $2 AND \"b\" = $3"
        );
        assert_eq!(rec.statements[2].0, "COMMIT");

        let mut rec = Recorder::default();
        let list = vec![
            vec![SqlParam::from("1"), SqlParam::from("2")],
            vec![SqlParam::from("3"), SqlParam::from("4")],
        ];
        delete_rows(&mut rec, &PostgresDialect, false, &target, &keys(&["a", "b"]), &list)
            .await
            .unwrap();
        assert_eq!(
            rec.statements[1].0,
            "DELETE FROM \"public\".\"t\" WHERE (\"a\", \"b\") IN (($1, $2), ($3, $4))"
        );
    }

    #[tokio::test]
    async fn test_mssql_deletes_one_tuple_per_statement() {
        let mut rec = Recorder::default();
        let target = TableRef::new("dbo", "t");
        let list = vec![vec![SqlParam::from("1")], vec![SqlParam::from("2")]];
        let deleted = delete_rows(&mut rec, &MssqlDialect, true, &target, &keys(&["id"]), &list)
            .await
            .unwrap();

        assert_eq!(deleted, 2);
        assert!(rec.statements[0].0.starts_with("SAVE TRANSACTION qd_"));
        assert_eq!(rec.statements[1].0, "DELETE FROM [dbo].[t] WHERE [id] = @P1");
        assert_eq!(rec.statements[2].1, vec![SqlParam::from("2")]);
        // No release statement on SQL Server
        assert_eq!(rec.statements.len(), 3);
    }

    #[tokio::test]
    async fn test_large_delete_is_batched() {
        let mut rec = Recorder::default();
        let list: Vec<Vec<SqlParam>> = (0..1001).map(|i| vec![SqlParam::from(i.to_string())]).collect();
        delete_rows(&mut rec, &PostgresDialect, false, &TableRef::new("s", "t"), &keys(&["id"]), &list)
            .await
            .unwrap();
        // BEGIN, three batches, COMMIT
        assert_eq!(rec.statements.len(), 5);
        assert_eq!(rec.statements[1].1.len(), DELETE_BATCH);
        assert_eq!(rec.statements[3].1.len(), 1);
    }
}
