// SQL dialects
// Identifier quoting, placeholders, literals and catalog queries per engine family

use crate::db::config::DatabaseType;
use crate::db::types::SqlParam;

/// SQL text plus positional bind values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundSql {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl BoundSql {
    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn bare(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// Engine-specific SQL generation.
///
/// Catalog queries return rows in a fixed column order that
/// [`crate::db::schema`] maps into the normalized metadata entities:
///
/// - schemas: `name`
/// - tables: `name, schema, table_type, row_count`
/// - columns: `name, data_type, is_nullable, column_default, is_primary_key, ordinal_position`
/// - indexes: `index_name, column_name, is_unique, is_primary, index_type` (one row per key column)
/// - foreign keys: `name, column_name, referenced_schema, referenced_table,
///   referenced_column, on_update, on_delete` (one row per column pair)
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Quote an identifier, doubling any embedded quote character.
    fn quote_ident(&self, ident: &str) -> String;

    /// Schema-qualified table name. An empty schema yields the bare table.
    fn qualify(&self, schema: &str, table: &str) -> String {
        if schema.is_empty() {
            self.quote_ident(table)
        } else {
            format!("{}.{}", self.quote_ident(schema), self.quote_ident(table))
        }
    }

    /// 1-based positional placeholder
    fn placeholder(&self, index: usize) -> String;

    /// Whether `(a, b) IN ((?, ?), ...)` is available
    fn supports_tuple_in(&self) -> bool {
        true
    }

    fn begin_sql(&self) -> &'static str {
        "BEGIN"
    }

    fn commit_sql(&self) -> &'static str {
        "COMMIT"
    }

    fn rollback_sql(&self) -> &'static str {
        "ROLLBACK"
    }

    fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVEPOINT {}", name)
    }

    fn rollback_to_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {}", name)
    }

    fn release_savepoint_sql(&self, name: &str) -> Option<String> {
        Some(format!("RELEASE SAVEPOINT {}", name))
    }

    /// Liveness check
    fn ping_sql(&self) -> &'static str {
        "SELECT 1"
    }

    /// Whether a column of `data_type` may appear in ORDER BY
    fn orderable(&self, data_type: &str) -> bool {
        !matches!(
            base_type(data_type).as_str(),
            "json" | "xml" | "point" | "geometry" | "geography"
        )
    }

    /// Wrap a `SELECT * FROM t` with ordering and pagination
    fn paginate(&self, base: &str, order_by: &[String], limit: i64, offset: i64) -> String {
        let mut sql = base.to_string();
        if !order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by.join(", "));
        }
        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
        sql
    }

    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        format!("X'{}'", hex(bytes))
    }

    fn bool_literal(&self, value: bool) -> String {
        if value { "TRUE" } else { "FALSE" }.to_string()
    }

    /// Whether `CREATE TABLE` names the schema
    fn qualifies_ddl(&self) -> bool {
        true
    }

    /// Whether foreign keys must be declared inside `CREATE TABLE`
    fn inline_foreign_keys(&self) -> bool {
        false
    }

    fn list_schemas(&self) -> BoundSql;
    fn list_tables(&self, schema: &str) -> BoundSql;
    fn list_columns(&self, schema: &str, table: &str) -> BoundSql;
    fn list_indexes(&self, schema: &str, table: &str) -> BoundSql;
    fn list_foreign_keys(&self, schema: &str, table: &str) -> BoundSql;

    fn count_rows(&self, schema: &str, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", self.qualify(schema, table))
    }
}

/// Dialect for an engine
pub fn dialect_for(db_type: DatabaseType) -> &'static dyn Dialect {
    match db_type {
        DatabaseType::Postgresql | DatabaseType::Cockroachdb => &PostgresDialect,
        DatabaseType::Mysql | DatabaseType::Mariadb => &MysqlDialect,
        DatabaseType::Mssql => &MssqlDialect,
        DatabaseType::Sqlite => &SqliteDialect,
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn double_quoted(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn params(values: &[&str]) -> Vec<SqlParam> {
    values.iter().map(|v| SqlParam::from(*v)).collect()
}

// ============================================================================
// PostgreSQL / CockroachDB
// ============================================================================

/// `VARCHAR(20)` -> `varchar`
fn base_type(data_type: &str) -> String {
    data_type
        .split('(')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn quote_ident(&self, ident: &str) -> String {
        double_quoted(ident)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        format!("'\\x{}'::bytea", hex(bytes))
    }

    fn list_schemas(&self) -> BoundSql {
        BoundSql::bare(
            "SELECT n.nspname AS name \
             FROM pg_catalog.pg_namespace n \
             WHERE n.nspname NOT IN ('pg_catalog', 'information_schema', 'pg_toast', 'crdb_internal', 'pg_extension') \
               AND n.nspname NOT LIKE 'pg_temp_%' \
               AND n.nspname NOT LIKE 'pg_toast_temp_%' \
             ORDER BY n.nspname",
        )
    }

    fn list_tables(&self, schema: &str) -> BoundSql {
        BoundSql::new(
            "SELECT c.relname AS name, n.nspname AS schema, \
                    CASE WHEN c.relkind IN ('v', 'm') THEN 'VIEW' ELSE 'BASE TABLE' END AS table_type, \
                    CASE WHEN c.reltuples < 0 THEN NULL ELSE c.reltuples::int8 END AS row_count \
             FROM pg_catalog.pg_class c \
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = $1 AND c.relkind IN ('r', 'p', 'v', 'm') \
             ORDER BY c.relname",
            params(&[schema]),
        )
    }

    fn list_columns(&self, schema: &str, table: &str) -> BoundSql {
        BoundSql::new(
            "SELECT a.attname AS name, \
                    pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type, \
                    NOT a.attnotnull AS is_nullable, \
                    pg_catalog.pg_get_expr(d.adbin, d.adrelid) AS column_default, \
                    EXISTS (SELECT 1 FROM pg_catalog.pg_index i \
                            WHERE i.indrelid = c.oid AND i.indisprimary AND a.attnum = ANY(i.indkey)) AS is_primary_key, \
                    a.attnum::int4 AS ordinal_position \
             FROM pg_catalog.pg_attribute a \
             JOIN pg_catalog.pg_class c ON c.oid = a.attrelid \
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum \
             WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped \
             ORDER BY a.attnum",
            params(&[schema, table]),
        )
    }

    fn list_indexes(&self, schema: &str, table: &str) -> BoundSql {
        BoundSql::new(
            "SELECT ic.relname AS index_name, a.attname AS column_name, \
                    ix.indisunique AS is_unique, ix.indisprimary AS is_primary, am.amname AS index_type \
             FROM pg_catalog.pg_index ix \
             JOIN pg_catalog.pg_class t ON t.oid = ix.indrelid \
             JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace \
             JOIN pg_catalog.pg_class ic ON ic.oid = ix.indexrelid \
             JOIN pg_catalog.pg_am am ON am.oid = ic.relam \
             CROSS JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) \
             JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum \
             WHERE n.nspname = $1 AND t.relname = $2 \
             ORDER BY ic.relname, k.ord",
            params(&[schema, table]),
        )
    }

    fn list_foreign_keys(&self, schema: &str, table: &str) -> BoundSql {
        BoundSql::new(
            "SELECT con.conname AS name, a.attname AS column_name, \
                    rn.nspname AS referenced_schema, rc.relname AS referenced_table, \
                    ra.attname AS referenced_column, \
                    con.confupdtype::text AS on_update, con.confdeltype::text AS on_delete \
             FROM pg_catalog.pg_constraint con \
             JOIN pg_catalog.pg_class c ON c.oid = con.conrelid \
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             JOIN pg_catalog.pg_class rc ON rc.oid = con.confrelid \
             JOIN pg_catalog.pg_namespace rn ON rn.oid = rc.relnamespace \
             CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, refnum, ord) \
             JOIN pg_catalog.pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum \
             JOIN pg_catalog.pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.refnum \
             WHERE con.contype = 'f' AND n.nspname = $1 AND c.relname = $2 \
             ORDER BY con.conname, k.ord",
            params(&[schema, table]),
        )
    }
}

// ============================================================================
// MySQL / MariaDB
// ============================================================================

pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn begin_sql(&self) -> &'static str {
        "START TRANSACTION"
    }

    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn bool_literal(&self, value: bool) -> String {
        if value { "1" } else { "0" }.to_string()
    }

    fn list_schemas(&self) -> BoundSql {
        BoundSql::bare(
            "SELECT SCHEMA_NAME AS name \
             FROM information_schema.SCHEMATA \
             WHERE SCHEMA_NAME NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys') \
             ORDER BY SCHEMA_NAME",
        )
    }

    fn list_tables(&self, schema: &str) -> BoundSql {
        BoundSql::new(
            "SELECT TABLE_NAME AS name, TABLE_SCHEMA AS `schema`, \
                    CASE WHEN TABLE_TYPE = 'VIEW' THEN 'VIEW' ELSE 'BASE TABLE' END AS table_type, \
                    TABLE_ROWS AS row_count \
             FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? \
             ORDER BY TABLE_NAME",
            params(&[schema]),
        )
    }

    fn list_columns(&self, schema: &str, table: &str) -> BoundSql {
        BoundSql::new(
            "SELECT COLUMN_NAME AS name, COLUMN_TYPE AS data_type, \
                    IS_NULLABLE = 'YES' AS is_nullable, COLUMN_DEFAULT AS column_default, \
                    COLUMN_KEY = 'PRI' AS is_primary_key, ORDINAL_POSITION AS ordinal_position \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
            params(&[schema, table]),
        )
    }

    fn list_indexes(&self, schema: &str, table: &str) -> BoundSql {
        BoundSql::new(
            "SELECT INDEX_NAME AS index_name, COLUMN_NAME AS column_name, \
                    NON_UNIQUE = 0 AS is_unique, INDEX_NAME = 'PRIMARY' AS is_primary, \
                    INDEX_TYPE AS index_type \
             FROM information_schema.STATISTICS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY INDEX_NAME, SEQ_IN_INDEX",
            params(&[schema, table]),
        )
    }

    fn list_foreign_keys(&self, schema: &str, table: &str) -> BoundSql {
        BoundSql::new(
            "SELECT k.CONSTRAINT_NAME AS name, k.COLUMN_NAME AS column_name, \
                    k.REFERENCED_TABLE_SCHEMA AS referenced_schema, k.REFERENCED_TABLE_NAME AS referenced_table, \
                    k.REFERENCED_COLUMN_NAME AS referenced_column, \
                    r.UPDATE_RULE AS on_update, r.DELETE_RULE AS on_delete \
             FROM information_schema.KEY_COLUMN_USAGE k \
             JOIN information_schema.REFERENTIAL_CONSTRAINTS r \
               ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME \
             WHERE k.TABLE_SCHEMA = ? AND k.TABLE_NAME = ? AND k.REFERENCED_TABLE_NAME IS NOT NULL \
             ORDER BY k.CONSTRAINT_NAME, k.ORDINAL_POSITION",
            params(&[schema, table]),
        )
    }
}

// ============================================================================
// SQL Server
// ============================================================================

pub struct MssqlDialect;

/// `OBJECT_ID` argument built server-side from the two bind values
const MSSQL_OBJECT: &str = "OBJECT_ID(QUOTENAME(@P1) + N'.' + QUOTENAME(@P2))";

impl Dialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn quote_ident(&self, ident: &str) -> String {
        format!("[{}]", ident.replace(']', "]]"))
    }

    fn placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn supports_tuple_in(&self) -> bool {
        false
    }

    fn begin_sql(&self) -> &'static str {
        "BEGIN TRANSACTION"
    }

    fn commit_sql(&self) -> &'static str {
        "COMMIT TRANSACTION"
    }

    fn rollback_sql(&self) -> &'static str {
        "ROLLBACK TRANSACTION"
    }

    fn savepoint_sql(&self, name: &str) -> String {
        format!("SAVE TRANSACTION {}", name)
    }

    fn rollback_to_savepoint_sql(&self, name: &str) -> String {
        format!("ROLLBACK TRANSACTION {}", name)
    }

    fn release_savepoint_sql(&self, _name: &str) -> Option<String> {
        None
    }

    fn orderable(&self, data_type: &str) -> bool {
        !matches!(
            base_type(data_type).as_str(),
            "text" | "ntext" | "image" | "xml" | "geometry" | "geography" | "hierarchyid"
                | "sql_variant"
        )
    }

    fn paginate(&self, base: &str, order_by: &[String], limit: i64, offset: i64) -> String {
        let order = if order_by.is_empty() {
            "(SELECT NULL)".to_string()
        } else {
            order_by.join(", ")
        };
        format!(
            "{} ORDER BY {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
            base, order, offset, limit
        )
    }

    fn string_literal(&self, value: &str) -> String {
        format!("N'{}'", value.replace('\'', "''"))
    }

    fn binary_literal(&self, bytes: &[u8]) -> String {
        format!("0x{}", hex(bytes))
    }

    fn bool_literal(&self, value: bool) -> String {
        if value { "1" } else { "0" }.to_string()
    }

    fn count_rows(&self, schema: &str, table: &str) -> String {
        format!("SELECT COUNT_BIG(*) FROM {}", self.qualify(schema, table))
    }

    fn list_schemas(&self) -> BoundSql {
        BoundSql::bare(
            "SELECT s.name AS name FROM sys.schemas s \
             WHERE s.schema_id < 16384 AND s.name NOT IN ('sys', 'INFORMATION_SCHEMA', 'guest') \
             ORDER BY s.name",
        )
    }

    fn list_tables(&self, schema: &str) -> BoundSql {
        BoundSql::new(
            "SELECT o.name AS name, s.name AS [schema], \
                    CASE WHEN o.type = 'V' THEN 'VIEW' ELSE 'BASE TABLE' END AS table_type, \
                    (SELECT SUM(p.rows) FROM sys.partitions p \
                     WHERE p.object_id = o.object_id AND p.index_id IN (0, 1)) AS row_count \
             FROM sys.objects o \
             JOIN sys.schemas s ON s.schema_id = o.schema_id \
             WHERE o.type IN ('U', 'V') AND s.name = @P1 \
             ORDER BY o.name",
            params(&[schema]),
        )
    }

    fn list_columns(&self, schema: &str, table: &str) -> BoundSql {
        BoundSql::new(
            format!(
                "SELECT c.name AS name, \
                        TYPE_NAME(c.user_type_id) + CASE \
                          WHEN TYPE_NAME(c.user_type_id) IN ('varchar', 'char', 'varbinary', 'binary') \
                            THEN '(' + CASE WHEN c.max_length = -1 THEN 'max' ELSE CAST(c.max_length AS varchar(10)) END + ')' \
                          WHEN TYPE_NAME(c.user_type_id) IN ('nvarchar', 'nchar') \
                            THEN '(' + CASE WHEN c.max_length = -1 THEN 'max' ELSE CAST(c.max_length / 2 AS varchar(10)) END + ')' \
                          WHEN TYPE_NAME(c.user_type_id) IN ('decimal', 'numeric') \
                            THEN '(' + CAST(c.precision AS varchar(10)) + ',' + CAST(c.scale AS varchar(10)) + ')' \
                          ELSE '' END AS data_type, \
                        c.is_nullable AS is_nullable, \
                        OBJECT_DEFINITION(c.default_object_id) AS column_default, \
                        CAST(CASE WHEN EXISTS (SELECT 1 FROM sys.index_columns ic \
                                JOIN sys.indexes i ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
                                WHERE i.is_primary_key = 1 AND ic.object_id = c.object_id AND ic.column_id = c.column_id) \
                             THEN 1 ELSE 0 END AS bit) AS is_primary_key, \
                        c.column_id AS ordinal_position \
                 FROM sys.columns c \
                 WHERE c.object_id = {} \
                 ORDER BY c.column_id",
                MSSQL_OBJECT
            ),
            params(&[schema, table]),
        )
    }

    fn list_indexes(&self, schema: &str, table: &str) -> BoundSql {
        BoundSql::new(
            format!(
                "SELECT i.name AS index_name, c.name AS column_name, \
                        i.is_unique AS is_unique, i.is_primary_key AS is_primary, i.type_desc AS index_type \
                 FROM sys.indexes i \
                 JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
                 JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
                 WHERE i.object_id = {} AND i.name IS NOT NULL AND ic.is_included_column = 0 \
                 ORDER BY i.name, ic.key_ordinal",
                MSSQL_OBJECT
            ),
            params(&[schema, table]),
        )
    }

    fn list_foreign_keys(&self, schema: &str, table: &str) -> BoundSql {
        BoundSql::new(
            format!(
                "SELECT fk.name AS name, pc.name AS column_name, \
                        rs.name AS referenced_schema, rt.name AS referenced_table, rc.name AS referenced_column, \
                        fk.update_referential_action_desc AS on_update, \
                        fk.delete_referential_action_desc AS on_delete \
                 FROM sys.foreign_keys fk \
                 JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id \
                 JOIN sys.columns pc ON pc.object_id = fkc.parent_object_id AND pc.column_id = fkc.parent_column_id \
                 JOIN sys.tables rt ON rt.object_id = fkc.referenced_object_id \
                 JOIN sys.schemas rs ON rs.schema_id = rt.schema_id \
                 JOIN sys.columns rc ON rc.object_id = fkc.referenced_object_id AND rc.column_id = fkc.referenced_column_id \
                 WHERE fk.parent_object_id = {} \
                 ORDER BY fk.name, fkc.constraint_column_id",
                MSSQL_OBJECT
            ),
            params(&[schema, table]),
        )
    }
}

// ============================================================================
// SQLite
// ============================================================================

pub struct SqliteDialect;

impl SqliteDialect {
    /// SQLite exposes attached databases as schemas; `main` is the default.
    pub const MAIN_SCHEMA: &'static str = "main";

    fn schema_or_main(schema: &str) -> &str {
        if schema.is_empty() {
            Self::MAIN_SCHEMA
        } else {
            schema
        }
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_ident(&self, ident: &str) -> String {
        double_quoted(ident)
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn bool_literal(&self, value: bool) -> String {
        if value { "1" } else { "0" }.to_string()
    }

    fn qualifies_ddl(&self) -> bool {
        false
    }

    fn inline_foreign_keys(&self) -> bool {
        true
    }

    fn list_schemas(&self) -> BoundSql {
        BoundSql::bare("SELECT name FROM pragma_database_list WHERE name <> 'temp' ORDER BY seq")
    }

    fn list_tables(&self, schema: &str) -> BoundSql {
        let schema = Self::schema_or_main(schema);
        BoundSql::new(
            format!(
                "SELECT name, ? AS schema, \
                        CASE WHEN type = 'view' THEN 'VIEW' ELSE 'BASE TABLE' END AS table_type, \
                        NULL AS row_count \
                 FROM {}.sqlite_master \
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
                self.quote_ident(schema)
            ),
            params(&[schema]),
        )
    }

    fn list_columns(&self, schema: &str, table: &str) -> BoundSql {
        BoundSql::new(
            "SELECT name, type AS data_type, \"notnull\" = 0 AS is_nullable, dflt_value AS column_default, \
                    pk > 0 AS is_primary_key, cid + 1 AS ordinal_position \
             FROM pragma_table_info(?, ?) \
             ORDER BY cid",
            params(&[table, Self::schema_or_main(schema)]),
        )
    }

    fn list_indexes(&self, schema: &str, table: &str) -> BoundSql {
        let schema = Self::schema_or_main(schema);
        BoundSql::new(
            "SELECT il.name AS index_name, ii.name AS column_name, \
                    il.\"unique\" AS is_unique, il.origin = 'pk' AS is_primary, NULL AS index_type \
             FROM pragma_index_list(?, ?) AS il \
             JOIN pragma_index_info(il.name, ?) AS ii \
             WHERE ii.name IS NOT NULL \
             ORDER BY il.seq, ii.seqno",
            params(&[table, schema, schema]),
        )
    }

    fn list_foreign_keys(&self, schema: &str, table: &str) -> BoundSql {
        let schema = Self::schema_or_main(schema);
        BoundSql::new(
            "SELECT 'fk_' || ? || '_' || id AS name, \"from\" AS column_name, ? AS referenced_schema, \
                    \"table\" AS referenced_table, \"to\" AS referenced_column, \
                    on_update, on_delete \
             FROM pragma_foreign_key_list(?, ?) \
             ORDER BY id, seq",
            params(&[table, schema, table, schema]),
        )
    }
}
