// DDL Export
// Rebuilds CREATE TABLE, CREATE INDEX and foreign key statements from live metadata

use crate::db::dialect::Dialect;
use crate::db::schema::{ColumnInfo, ForeignKeyInfo, IndexInfo};

const INDENT: &str = "    ";

/// Script recreating `table` as currently described by the catalog.
///
/// Statements end with `;` and are separated by blank lines. Foreign keys are
/// appended as `ALTER TABLE` unless the dialect only accepts them inline.
pub fn create_table(
    dialect: &dyn Dialect,
    schema: &str,
    table: &str,
    columns: &[ColumnInfo],
    indexes: &[IndexInfo],
    foreign_keys: &[ForeignKeyInfo],
) -> String {
    let target = table_name(dialect, schema, table);

    let mut body: Vec<String> = columns.iter().map(|c| column_line(dialect, c)).collect();

    let primary_key = primary_key_columns(columns, indexes);
    if !primary_key.is_empty() {
        body.push(format!("PRIMARY KEY ({})", quoted_list(dialect, &primary_key)));
    }

    if dialect.inline_foreign_keys() {
        body.extend(foreign_keys.iter().map(|fk| foreign_key_clause(dialect, fk)));
    }

    let mut script = format!(
        "CREATE TABLE {} (\n{}{}\n);\n",
        target,
        INDENT,
        body.join(&format!(",\n{}", INDENT))
    );

    for index in indexes.iter().filter(|i| !i.is_primary && !is_internal(i)) {
        script.push_str(&format!(
            "\nCREATE {}INDEX {} ON {} ({});\n",
            if index.is_unique { "UNIQUE " } else { "" },
            dialect.quote_ident(&index.name),
            target,
            quoted_list(dialect, &index.columns)
        ));
    }

    if !dialect.inline_foreign_keys() {
        for fk in foreign_keys {
            script.push_str(&format!(
                "\nALTER TABLE {} ADD CONSTRAINT {} {};\n",
                target,
                dialect.quote_ident(&fk.name),
                foreign_key_clause(dialect, fk)
            ));
        }
    }

    script
}

fn table_name(dialect: &dyn Dialect, schema: &str, table: &str) -> String {
    if dialect.qualifies_ddl() {
        dialect.qualify(schema, table)
    } else {
        dialect.quote_ident(table)
    }
}

fn column_line(dialect: &dyn Dialect, column: &ColumnInfo) -> String {
    let mut line = format!("{} {}", dialect.quote_ident(&column.name), column.data_type);
    if !column.is_nullable {
        line.push_str(" NOT NULL");
    }
    if let Some(default) = column.column_default.as_deref().filter(|d| !d.is_empty()) {
        line.push_str(" DEFAULT ");
        line.push_str(default);
    }
    line
}

/// Key order from the primary index when the catalog lists one, else column order
fn primary_key_columns(columns: &[ColumnInfo], indexes: &[IndexInfo]) -> Vec<String> {
    if let Some(index) = indexes.iter().find(|i| i.is_primary) {
        return index.columns.clone();
    }
    columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| c.name.clone())
        .collect()
}

fn foreign_key_clause(dialect: &dyn Dialect, fk: &ForeignKeyInfo) -> String {
    let mut clause = format!(
        "FOREIGN KEY ({}) REFERENCES {} ({})",
        quoted_list(dialect, &fk.columns),
        table_name(dialect, &fk.referenced_schema, &fk.referenced_table),
        quoted_list(dialect, &fk.referenced_columns)
    );
    for (event, action) in [("UPDATE", &fk.on_update), ("DELETE", &fk.on_delete)] {
        if !action.is_empty() && action != "NO ACTION" {
            clause.push_str(&format!(" ON {} {}", event, action));
        }
    }
    clause
}

/// Indexes the engine creates for constraints and names itself
fn is_internal(index: &IndexInfo) -> bool {
    index.name.starts_with("sqlite_autoindex_")
}

fn quoted_list(dialect: &dyn Dialect, names: &[String]) -> String {
    names
        .iter()
        .map(|n| dialect.quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}
