// Connection configuration
// One tagged section per engine family; only the selected engine's fields are accepted

use crate::db::error::DbError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Supported database engines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    #[serde(rename = "PostgreSQL")]
    Postgresql,
    #[serde(rename = "CockroachDB")]
    Cockroachdb,
    #[serde(rename = "MySQL")]
    Mysql,
    #[serde(rename = "MariaDB")]
    Mariadb,
    #[serde(rename = "MSSQL")]
    Mssql,
    #[serde(rename = "SQLite")]
    Sqlite,
}

impl DatabaseType {
    /// Display name for UI
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::Postgresql => "PostgreSQL",
            DatabaseType::Cockroachdb => "CockroachDB",
            DatabaseType::Mysql => "MySQL",
            DatabaseType::Mariadb => "MariaDB",
            DatabaseType::Mssql => "Microsoft SQL Server",
            DatabaseType::Sqlite => "SQLite",
        }
    }

    /// Default port for the database type
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Postgresql => 5432,
            DatabaseType::Cockroachdb => 26257,
            DatabaseType::Mysql | DatabaseType::Mariadb => 3306,
            DatabaseType::Mssql => 1433,
            DatabaseType::Sqlite => 0, // File-based, no port
        }
    }
}

/// Configuration errors, raised before any socket is opened
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Unsupported database engine")]
    UnsupportedEngine,

    #[error("{0} is not supported for this engine")]
    NotApplicable(&'static str),
}

impl From<ConfigError> for DbError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnsupportedEngine => DbError::ConnectionError(err.to_string()),
            other => DbError::ValidationError(other.to_string()),
        }
    }
}

/// Host/port/credentials for network engines
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct NetworkEndpoint {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub database: String,
}

/// Database file for embedded engines
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileEndpoint {
    pub path: String,
}

impl FileEndpoint {
    pub const IN_MEMORY: &'static str = ":memory:";

    pub fn is_in_memory(&self) -> bool {
        self.path == Self::IN_MEMORY
    }

    /// Path with a leading `~/` expanded
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(rest) = self.path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                return Path::new(&home).join(rest);
            }
        }
        PathBuf::from(&self.path)
    }
}

/// Engine section, tagged by `db_type`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "db_type")]
pub enum EngineConfig {
    #[serde(rename = "PostgreSQL")]
    Postgresql(NetworkEndpoint),
    #[serde(rename = "CockroachDB")]
    Cockroachdb(NetworkEndpoint),
    #[serde(rename = "MySQL")]
    Mysql(NetworkEndpoint),
    #[serde(rename = "MariaDB")]
    Mariadb(NetworkEndpoint),
    #[serde(rename = "MSSQL")]
    Mssql(NetworkEndpoint),
    #[serde(rename = "SQLite")]
    Sqlite(FileEndpoint),
    /// Advertised by the UI but without a driver (Oracle, Snowflake, ...)
    #[serde(other)]
    Unsupported,
}

impl EngineConfig {
    pub fn database_type(&self) -> Option<DatabaseType> {
        Some(match self {
            EngineConfig::Postgresql(_) => DatabaseType::Postgresql,
            EngineConfig::Cockroachdb(_) => DatabaseType::Cockroachdb,
            EngineConfig::Mysql(_) => DatabaseType::Mysql,
            EngineConfig::Mariadb(_) => DatabaseType::Mariadb,
            EngineConfig::Mssql(_) => DatabaseType::Mssql,
            EngineConfig::Sqlite(_) => DatabaseType::Sqlite,
            EngineConfig::Unsupported => return None,
        })
    }

    pub fn network(&self) -> Option<&NetworkEndpoint> {
        match self {
            EngineConfig::Postgresql(ep)
            | EngineConfig::Cockroachdb(ep)
            | EngineConfig::Mysql(ep)
            | EngineConfig::Mariadb(ep)
            | EngineConfig::Mssql(ep) => Some(ep),
            EngineConfig::Sqlite(_) | EngineConfig::Unsupported => None,
        }
    }

    pub fn file(&self) -> Option<&FileEndpoint> {
        match self {
            EngineConfig::Sqlite(file) => Some(file),
            _ => None,
        }
    }
}

/// SSH bastion used to reach the database host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshTunnelConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default, skip_serializing)]
    pub passphrase: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyFull,
}

/// TLS material. A client certificate without a key is read as a PKCS#12 bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TlsConfig {
    #[serde(default)]
    pub mode: TlsMode,
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub client_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub client_key_path: Option<PathBuf>,
}

/// Pool sizing and timeouts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_idle: u32,
    pub acquire_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_idle: 1,
            acquire_timeout_secs: 10,
            connect_timeout_secs: 10,
            idle_timeout_secs: Some(600),
            max_lifetime_secs: Some(1800),
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime_secs.map(Duration::from_secs)
    }

    /// Single connection that is never recycled, so one in-memory database survives.
    pub fn pinned_single(&self) -> Self {
        Self {
            max_connections: 1,
            min_idle: 1,
            idle_timeout_secs: None,
            max_lifetime_secs: None,
            ..self.clone()
        }
    }

    /// Throwaway pool used by `test_connection`
    pub fn single_use(&self) -> Self {
        Self {
            max_connections: 1,
            min_idle: 1,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool.max_connections",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.min_idle > self.max_connections {
            return Err(ConfigError::InvalidValue {
                field: "pool.min_idle",
                reason: "must not exceed max_connections".to_string(),
            });
        }
        Ok(())
    }
}

/// Free-form UI metadata, opaque to the core
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionMetadata {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Full connection configuration as sent by the UI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    #[serde(default = "new_config_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub ssh: Option<SshTunnelConfig>,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Older UI builds send a plain flag instead of a `tls` section
    #[serde(default, skip_serializing)]
    pub use_ssl: Option<bool>,
    #[serde(default)]
    pub pool: Option<PoolConfig>,
    #[serde(default)]
    pub metadata: ConnectionMetadata,
}

fn new_config_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, engine: EngineConfig) -> Self {
        Self {
            id: new_config_id(),
            name: name.into(),
            engine,
            ssh: None,
            tls: None,
            use_ssl: None,
            pool: None,
            metadata: ConnectionMetadata::default(),
        }
    }

    pub fn sqlite(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(name, EngineConfig::Sqlite(FileEndpoint { path: path.into() }))
    }

    pub fn database_type(&self) -> Option<DatabaseType> {
        self.engine.database_type()
    }

    /// Port with the engine default applied
    pub fn port(&self) -> u16 {
        let default = self.database_type().map(|t| t.default_port()).unwrap_or(0);
        self.engine
            .network()
            .and_then(|ep| ep.port)
            .unwrap_or(default)
    }

    /// Effective TLS settings; the legacy flag maps to `require`
    pub fn tls(&self) -> TlsConfig {
        match (&self.tls, self.use_ssl) {
            (Some(tls), _) => tls.clone(),
            (None, Some(true)) => TlsConfig {
                mode: TlsMode::Require,
                ..TlsConfig::default()
            },
            (None, _) => TlsConfig {
                mode: TlsMode::Disable,
                ..TlsConfig::default()
            },
        }
    }

    /// Effective pool settings, falling back to application defaults
    pub fn effective_pool(&self, defaults: &PoolConfig) -> PoolConfig {
        let pool = self.pool.clone().unwrap_or_else(|| defaults.clone());
        match self.engine.file() {
            Some(file) if file.is_in_memory() => pool.pinned_single(),
            _ => pool,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.engine {
            EngineConfig::Unsupported => return Err(ConfigError::UnsupportedEngine),
            EngineConfig::Sqlite(file) => {
                if file.path.trim().is_empty() {
                    return Err(ConfigError::MissingField("SQLite database path"));
                }
                if self.ssh.is_some() {
                    return Err(ConfigError::NotApplicable("SSH tunnel"));
                }
                if self.tls.is_some() || self.use_ssl == Some(true) {
                    return Err(ConfigError::NotApplicable("TLS"));
                }
            }
            _ => {
                let ep = self
                    .engine
                    .network()
                    .ok_or(ConfigError::UnsupportedEngine)?;
                if ep.host.trim().is_empty() {
                    return Err(ConfigError::MissingField("Host"));
                }
                if ep.port == Some(0) {
                    return Err(ConfigError::InvalidValue {
                        field: "port",
                        reason: "must be greater than 0".to_string(),
                    });
                }
            }
        }

        if let Some(ssh) = &self.ssh {
            if ssh.host.trim().is_empty() {
                return Err(ConfigError::MissingField("SSH host"));
            }
            if ssh.username.trim().is_empty() {
                return Err(ConfigError::MissingField("SSH username"));
            }
        }

        if let Some(tls) = &self.tls {
            if tls.client_key_path.is_some() && tls.client_cert_path.is_none() {
                return Err(ConfigError::InvalidValue {
                    field: "tls",
                    reason: "client key given without a client certificate".to_string(),
                });
            }
        }

        if let Some(pool) = &self.pool {
            pool.validate()?;
        }

        Ok(())
    }
}
