// IPC Bridge - Tauri Command Handlers
// Thin wrappers exposing the connection core to the frontend via invoke

use std::path::PathBuf;
use tauri::{command, State};

use crate::db::{
    dialect_for, CellValue, ColumnDef, ColumnInfo, ConnectionConfig, DatabaseType, DbError,
    ForeignKeyInfo, IndexInfo, QueryResponse, SchemaInfo, SqlParam, TableInfo, TransactionState,
};
use crate::export::{
    self, sql::target_table, ExportFormat, ExportOptions, ExportSource, ExportSummary,
    ImportResult,
};
use crate::settings::AppSettings;
use crate::AppState;

fn params(values: Vec<Option<String>>) -> Vec<SqlParam> {
    values.into_iter().map(SqlParam::from).collect()
}

// ============================================================================
// Connection Commands
// ============================================================================

/// Open a session and return its handle
#[command]
pub async fn connect_db(
    state: State<'_, AppState>,
    config: ConnectionConfig,
) -> Result<String, DbError> {
    state.manager.connect(config).await
}

#[command]
pub async fn disconnect_db(
    state: State<'_, AppState>,
    connection_id: String,
) -> Result<(), DbError> {
    state.manager.disconnect(&connection_id).await
}

/// Connect and tear down without registering a session
#[command]
pub async fn test_connection(
    state: State<'_, AppState>,
    config: ConnectionConfig,
) -> Result<bool, DbError> {
    state.manager.test_connection(&config).await
}

/// Engines with a registered driver
#[command]
pub async fn get_supported_databases(
    state: State<'_, AppState>,
) -> Result<Vec<DatabaseType>, DbError> {
    Ok(state.manager.drivers().get_supported_types().await)
}

// ============================================================================
// Query Commands
// ============================================================================

#[command]
pub async fn execute_query(
    state: State<'_, AppState>,
    connection_id: String,
    sql: String,
    query_id: Option<String>,
    timeout_ms: Option<u64>,
) -> Result<QueryResponse, DbError> {
    state
        .manager
        .execute_query(&connection_id, &sql, query_id, timeout_ms)
        .await
}

/// Cancel a running query
#[command]
pub async fn cancel_query(state: State<'_, AppState>, query_id: String) -> Result<bool, DbError> {
    Ok(state.manager.cancel_query(&query_id).await)
}

// ============================================================================
// Transaction Commands
// ============================================================================

#[command]
pub async fn begin_transaction(
    state: State<'_, AppState>,
    connection_id: String,
) -> Result<(), DbError> {
    state.manager.begin_transaction(&connection_id).await
}

#[command]
pub async fn commit_transaction(
    state: State<'_, AppState>,
    connection_id: String,
) -> Result<(), DbError> {
    state.manager.commit_transaction(&connection_id).await
}

#[command]
pub async fn rollback_transaction(
    state: State<'_, AppState>,
    connection_id: String,
) -> Result<(), DbError> {
    state.manager.rollback_transaction(&connection_id).await
}

#[command]
pub async fn get_transaction_state(
    state: State<'_, AppState>,
    connection_id: String,
) -> Result<TransactionState, DbError> {
    state.manager.get_transaction_state(&connection_id).await
}

// ============================================================================
// Schema Commands
// ============================================================================

#[command]
pub async fn get_schemas(
    state: State<'_, AppState>,
    connection_id: String,
) -> Result<Vec<SchemaInfo>, DbError> {
    state.manager.get_schemas(&connection_id).await
}

#[command]
pub async fn get_tables(
    state: State<'_, AppState>,
    connection_id: String,
    schema: String,
) -> Result<Vec<TableInfo>, DbError> {
    state.manager.get_tables(&connection_id, &schema).await
}

#[command]
pub async fn get_columns(
    state: State<'_, AppState>,
    connection_id: String,
    schema: String,
    table: String,
) -> Result<Vec<ColumnInfo>, DbError> {
    state.manager.get_columns(&connection_id, &schema, &table).await
}

#[command]
pub async fn get_indexes(
    state: State<'_, AppState>,
    connection_id: String,
    schema: String,
    table: String,
) -> Result<Vec<IndexInfo>, DbError> {
    state.manager.get_indexes(&connection_id, &schema, &table).await
}

#[command]
pub async fn get_foreign_keys(
    state: State<'_, AppState>,
    connection_id: String,
    schema: String,
    table: String,
) -> Result<Vec<ForeignKeyInfo>, DbError> {
    state
        .manager
        .get_foreign_keys(&connection_id, &schema, &table)
        .await
}

#[command]
pub async fn get_table_data(
    state: State<'_, AppState>,
    connection_id: String,
    schema: String,
    table: String,
    limit: i64,
    offset: i64,
) -> Result<QueryResponse, DbError> {
    state
        .manager
        .get_table_data(&connection_id, &schema, &table, limit, offset)
        .await
}

#[command]
pub async fn get_row_count(
    state: State<'_, AppState>,
    connection_id: String,
    schema: String,
    table: String,
) -> Result<i64, DbError> {
    state.manager.get_row_count(&connection_id, &schema, &table).await
}

// ============================================================================
// Mutation Commands
// ============================================================================

#[command]
#[allow(clippy::too_many_arguments)]
pub async fn update_cell(
    state: State<'_, AppState>,
    connection_id: String,
    schema: String,
    table: String,
    column: String,
    value: Option<String>,
    pk_columns: Vec<String>,
    pk_values: Vec<Option<String>>,
) -> Result<(), DbError> {
    state
        .manager
        .update_cell(
            &connection_id,
            &schema,
            &table,
            &column,
            SqlParam::from(value),
            &pk_columns,
            &params(pk_values),
        )
        .await
}

#[command]
pub async fn insert_row(
    state: State<'_, AppState>,
    connection_id: String,
    schema: String,
    table: String,
    columns: Vec<String>,
    values: Vec<Option<String>>,
) -> Result<(), DbError> {
    state
        .manager
        .insert_row(&connection_id, &schema, &table, &columns, &params(values))
        .await
        .map(|_| ())
}

/// Returns the number of rows actually deleted
#[command]
pub async fn delete_rows(
    state: State<'_, AppState>,
    connection_id: String,
    schema: String,
    table: String,
    pk_columns: Vec<String>,
    pk_values_list: Vec<Vec<Option<String>>>,
) -> Result<u64, DbError> {
    let tuples: Vec<Vec<SqlParam>> = pk_values_list.into_iter().map(params).collect();
    state
        .manager
        .delete_rows(&connection_id, &schema, &table, &pk_columns, &tuples)
        .await
}

// ============================================================================
// Export / Import Commands
// ============================================================================

#[allow(clippy::too_many_arguments)]
async fn export_rows(
    state: &AppState,
    format: ExportFormat,
    file_path: String,
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<CellValue>>,
    connection_id: Option<String>,
    schema: Option<String>,
    table: Option<String>,
    export_all: bool,
) -> Result<ExportSummary, DbError> {
    let dialect = match connection_id.as_deref() {
        Some(handle) => state.manager.get(handle).await?.dialect(),
        None => dialect_for(DatabaseType::Postgresql),
    };
    let sql_table = target_table(dialect, schema.as_deref(), table.as_deref());

    let source = match (export_all, connection_id.as_deref(), table.as_deref()) {
        (true, Some(handle), Some(table)) => ExportSource::Table {
            manager: state.manager.as_ref(),
            handle,
            schema: schema.as_deref().unwrap_or(""),
            table,
            page_size: state.settings().export_page_size,
        },
        _ => ExportSource::Rows {
            columns: &columns,
            rows: &rows,
        },
    };

    let path = PathBuf::from(file_path);
    let summary = export::export_to_file(
        &path,
        format,
        &ExportOptions::default(),
        dialect,
        &sql_table,
        source,
    )
    .await?;
    Ok(summary)
}

#[command]
#[allow(clippy::too_many_arguments)]
pub async fn export_to_csv(
    state: State<'_, AppState>,
    file_path: String,
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<CellValue>>,
    connection_id: Option<String>,
    schema: Option<String>,
    table: Option<String>,
    export_all: bool,
) -> Result<ExportSummary, DbError> {
    export_rows(
        &state,
        ExportFormat::Csv,
        file_path,
        columns,
        rows,
        connection_id,
        schema,
        table,
        export_all,
    )
    .await
}

#[command]
#[allow(clippy::too_many_arguments)]
pub async fn export_to_json(
    state: State<'_, AppState>,
    file_path: String,
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<CellValue>>,
    connection_id: Option<String>,
    schema: Option<String>,
    table: Option<String>,
    export_all: bool,
) -> Result<ExportSummary, DbError> {
    export_rows(
        &state,
        ExportFormat::Json,
        file_path,
        columns,
        rows,
        connection_id,
        schema,
        table,
        export_all,
    )
    .await
}

#[command]
#[allow(clippy::too_many_arguments)]
pub async fn export_to_sql(
    state: State<'_, AppState>,
    file_path: String,
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<CellValue>>,
    connection_id: Option<String>,
    schema: Option<String>,
    table: Option<String>,
    export_all: bool,
) -> Result<ExportSummary, DbError> {
    export_rows(
        &state,
        ExportFormat::Sql,
        file_path,
        columns,
        rows,
        connection_id,
        schema,
        table,
        export_all,
    )
    .await
}

/// DDL from live metadata; also written to `file_path` when given
#[command]
pub async fn export_ddl(
    state: State<'_, AppState>,
    connection_id: String,
    schema: String,
    table: String,
    file_path: Option<String>,
) -> Result<String, DbError> {
    let ddl = state.manager.export_ddl(&connection_id, &schema, &table).await?;
    if let Some(path) = file_path {
        export::write_text(&PathBuf::from(path), &ddl)?;
    }
    Ok(ddl)
}

#[command]
pub async fn import_csv(
    state: State<'_, AppState>,
    connection_id: String,
    schema: String,
    table: String,
    file_path: String,
) -> Result<ImportResult, DbError> {
    let path = PathBuf::from(file_path);
    export::import_csv(&state.manager, &connection_id, &schema, &table, &path).await
}

// ============================================================================
// Settings Commands
// ============================================================================

#[command]
pub async fn get_settings(state: State<'_, AppState>) -> Result<AppSettings, DbError> {
    Ok(state.settings())
}

#[command]
pub async fn update_settings(
    state: State<'_, AppState>,
    settings: AppSettings,
) -> Result<(), DbError> {
    state.update_settings(settings)
}
