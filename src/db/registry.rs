// Driver Registry
// Maps engine kinds to the adapter that serves them

use crate::db::config::DatabaseType;
use crate::db::drivers::{MssqlDriver, MysqlDriver, PostgresDriver, SqliteDriver};
use crate::db::error::DbError;
use crate::db::traits::DatabaseDriver;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry for managing database drivers
pub struct DriverRegistry {
    drivers: RwLock<HashMap<DatabaseType, Arc<dyn DatabaseDriver>>>,
}

impl DriverRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with every built-in adapter
    pub async fn with_builtin_drivers() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(PostgresDriver::new())).await;
        registry.register(Arc::new(MysqlDriver::new())).await;
        registry.register(Arc::new(MssqlDriver::new())).await;
        registry.register(Arc::new(SqliteDriver::new())).await;
        registry
    }

    /// Register a driver for every engine it serves, replacing earlier ones
    pub async fn register(&self, driver: Arc<dyn DatabaseDriver>) {
        let mut drivers = self.drivers.write().await;
        for db_type in driver.database_types() {
            drivers.insert(*db_type, driver.clone());
            tracing::debug!(engine = ?db_type, driver = driver.driver_name(), "registered driver");
        }
    }

    /// Get a driver by database type
    pub async fn get_driver(&self, db_type: DatabaseType) -> Result<Arc<dyn DatabaseDriver>, DbError> {
        let drivers = self.drivers.read().await;
        drivers.get(&db_type).cloned().ok_or_else(|| {
            DbError::ConnectionError(format!(
                "no driver registered for {}",
                db_type.display_name()
            ))
        })
    }

    /// Get all registered database types
    pub async fn get_supported_types(&self) -> Vec<DatabaseType> {
        let drivers = self.drivers.read().await;
        drivers.keys().copied().collect()
    }

    /// Check if a driver is registered for a given database type
    pub async fn has_driver(&self, db_type: DatabaseType) -> bool {
        let drivers = self.drivers.read().await;
        drivers.contains_key(&db_type)
    }

    /// Remove a driver (useful for testing or dynamic unloading)
    pub async fn unregister(&self, db_type: DatabaseType) {
        let mut drivers = self.drivers.write().await;
        drivers.remove(&db_type);
        tracing::debug!(engine = ?db_type, "unregistered driver");
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::config::{ConnectionConfig, PoolConfig};
    use crate::db::dialect::{dialect_for, Dialect};
    use crate::db::traits::{ConnectTarget, ConnectionPool};

    // Mock driver for testing
    struct MockDriver;

    #[async_trait::async_trait]
    impl DatabaseDriver for MockDriver {
        fn database_types(&self) -> &'static [DatabaseType] {
            &[DatabaseType::Mssql]
        }

        fn driver_name(&self) -> &'static str {
            "mock"
        }

        fn dialect(&self) -> &'static dyn Dialect {
            dialect_for(DatabaseType::Mssql)
        }

        async fn connect(
            &self,
            _config: &ConnectionConfig,
            _target: &ConnectTarget,
            _pool: &PoolConfig,
        ) -> Result<Arc<dyn ConnectionPool>, DbError> {
            Err(DbError::ConnectionError("Mock".to_string()))
        }
    }

    #[tokio::test]
    async fn test_register_driver() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(MockDriver)).await;

        assert!(registry.has_driver(DatabaseType::Mssql).await);
        assert!(!registry.has_driver(DatabaseType::Sqlite).await);
    }

    #[tokio::test]
    async fn test_get_driver() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(MockDriver)).await;

        assert!(registry.get_driver(DatabaseType::Mssql).await.is_ok());
        let err = registry.get_driver(DatabaseType::Postgresql).await.err().unwrap();
        assert!(matches!(err, DbError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn test_unregister_driver() {
        let registry = DriverRegistry::new();
        registry.register(Arc::new(MockDriver)).await;
        registry.unregister(DatabaseType::Mssql).await;
        assert!(!registry.has_driver(DatabaseType::Mssql).await);
    }

    #[tokio::test]
    async fn test_builtin_drivers_cover_every_engine() {
        let registry = DriverRegistry::with_builtin_drivers().await;
        let mut types = registry.get_supported_types().await;
        types.sort_by_key(|t| t.display_name());
        assert_eq!(types.len(), 6);

        let pg = registry.get_driver(DatabaseType::Postgresql).await.unwrap();
        let crdb = registry.get_driver(DatabaseType::Cockroachdb).await.unwrap();
        assert!(Arc::ptr_eq(&pg, &crdb));
    }
}
