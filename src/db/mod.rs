// Database Module
// Connection, execution, introspection and mutation core shared by every engine

pub mod cancel;
pub mod config;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod manager;
pub mod mutation;
pub mod pool;
pub mod query;
pub mod registry;
pub mod schema;
pub mod session;
pub mod traits;
pub mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{
    ConnectionConfig, ConnectionMetadata, DatabaseType, EngineConfig, PoolConfig,
    SshTunnelConfig, TlsConfig, TlsMode,
};
pub use dialect::{dialect_for, Dialect};
pub use drivers::{MssqlDriver, MysqlDriver, PostgresDriver, SqliteDriver};
pub use error::DbError;
pub use manager::ConnectionManager;
pub use registry::DriverRegistry;
pub use schema::{ColumnInfo, ForeignKeyInfo, IndexInfo, SchemaInfo, TableInfo};
pub use session::TransactionState;
pub use traits::{Connection, DatabaseDriver};
pub use types::{CellValue, ColumnDef, QueryResponse, SqlParam};
