// Module declarations
#[cfg(feature = "desktop")]
pub mod commands;
pub mod db;
pub mod export;
pub mod settings;
pub mod transport;

use db::{ConnectionManager, DbError};
use settings::{AppSettings, SettingsStore};
use std::sync::{Arc, RwLock};
use tracing_subscriber::EnvFilter;

/// Shared state handed to every command
pub struct AppState {
    pub manager: Arc<ConnectionManager>,
    settings: RwLock<AppSettings>,
    settings_store: Option<SettingsStore>,
}

impl AppState {
    pub fn new(
        manager: Arc<ConnectionManager>,
        settings: AppSettings,
        settings_store: Option<SettingsStore>,
    ) -> Self {
        Self {
            manager,
            settings: RwLock::new(settings),
            settings_store,
        }
    }

    pub fn settings(&self) -> AppSettings {
        match self.settings.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Validate, persist and apply. New pool defaults affect later connects only.
    pub fn update_settings(&self, settings: AppSettings) -> Result<(), DbError> {
        settings.validate()?;
        if let Some(store) = &self.settings_store {
            store.save(&settings)?;
        }
        self.manager.set_pool_defaults(settings.default_pool.clone());

        let mut guard = match self.settings.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        tracing::info!("settings updated");
        Ok(())
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new(settings::DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Settings plus any problem met while loading them, reported once logging is up
#[cfg_attr(not(feature = "desktop"), allow(dead_code))]
fn load_settings(
    opened: settings::SettingsResult<SettingsStore>,
) -> (AppSettings, Option<SettingsStore>, Option<String>) {
    match opened {
        Ok(store) => match store.load() {
            Ok(settings) => (settings, Some(store), None),
            Err(e) => (
                AppSettings::default(),
                Some(store),
                Some(format!("failed to load settings: {}", e)),
            ),
        },
        Err(e) => (
            AppSettings::default(),
            None,
            Some(format!("settings unavailable, using defaults: {}", e)),
        ),
    }
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let (settings, settings_store, load_error) = load_settings(SettingsStore::open_default());
    init_logging(&settings.log_filter);
    if let Some(message) = load_error {
        tracing::warn!("{}", message);
    }
    if let Some(store) = &settings_store {
        tracing::info!(path = %store.path().display(), "settings loaded");
    }

    let manager = Arc::new(tauri::async_runtime::block_on(
        ConnectionManager::with_defaults(settings.default_pool.clone()),
    ));
    let app_state = AppState::new(Arc::clone(&manager), settings, settings_store);

    let app = tauri::Builder::default()
        .manage(app_state)
        .plugin(tauri_plugin_opener::init())
        .invoke_handler(tauri::generate_handler![
            // Connection commands
            commands::connect_db,
            commands::disconnect_db,
            commands::test_connection,
            commands::get_supported_databases,
            // Query commands
            commands::execute_query,
            commands::cancel_query,
            // Transaction commands
            commands::begin_transaction,
            commands::commit_transaction,
            commands::rollback_transaction,
            commands::get_transaction_state,
            // Schema commands
            commands::get_schemas,
            commands::get_tables,
            commands::get_columns,
            commands::get_indexes,
            commands::get_foreign_keys,
            commands::get_table_data,
            commands::get_row_count,
            // Mutation commands
            commands::update_cell,
            commands::insert_row,
            commands::delete_rows,
            // Export / Import commands
            commands::export_to_csv,
            commands::export_to_json,
            commands::export_to_sql,
            commands::export_ddl,
            commands::import_csv,
            // Settings commands
            commands::get_settings,
            commands::update_settings,
        ])
        .build(tauri::generate_context!());

    let app = match app {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "error while building tauri application");
            return;
        }
    };

    app.run(move |_handle, event| {
        if let tauri::RunEvent::Exit = event {
            let manager = Arc::clone(&manager);
            tauri::async_runtime::block_on(async move { manager.disconnect_all().await });
            tracing::info!("all sessions closed");
        }
    });
}
