//! Service Bootstrap and Initialization
//!
//! - Logging configuration
//! - Store selection (SQLite or in-memory) and device catalogue seeding
//! - Engine, API server and shutdown wiring

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use coldroom_memmap::MemoryMapSchema;
use coldroom_modbus::{Connector, TcpConnector};
use common::logging::{self, LogConfig};
use common::sqlite::SqliteClient;
use errors::{ColdroomError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

#[cfg(feature = "swagger-ui")]
use utoipa::OpenApi;
#[cfg(feature = "swagger-ui")]
use utoipa_swagger_ui::SwaggerUi;

pub use common::bootstrap_args::ServiceArgs;

use crate::api::{create_routes, AppState};
use crate::config::AppConfig;
use crate::engine::{EngineHandle, PollingEngine};
use crate::storage::{SqliteStore, Stores};

pub const SERVICE_NAME: &str = "coldsrv";

/// Console level from the command line, file level from the configuration
pub fn initialize_logging(args: &ServiceArgs, config: &AppConfig) -> Result<()> {
    logging::init_log_root(Some(&config.logging.dir));
    let file_level = config.logging.level.parse::<Level>().unwrap_or(Level::DEBUG);
    logging::init_with_config(LogConfig {
        service_name: SERVICE_NAME.to_string(),
        log_dir: logging::get_log_root(),
        console_level: args.parse_log_level(),
        file_level,
        enable_json: config.logging.json,
        ansi: !args.no_color,
        console_only: args.is_one_shot(),
    })
    .map_err(|e| ColdroomError::Configuration(format!("Logging init failed: {e}")))
}

/// Load the configuration named by `--config`, or the default file
pub fn load_configuration(args: &ServiceArgs) -> Result<AppConfig> {
    AppConfig::load(args.config.as_deref().map(Path::new))
}

/// Check the configuration and the bundled memory map, then report
pub fn validate_configuration(config: &AppConfig) -> Result<()> {
    config.validate()?;
    let schema = MemoryMapSchema::bundled()?;
    info!(
        "Config OK: {} devices, map {} registers ({} fields)",
        config.devices.len(),
        schema.total_registers(),
        schema.fields().len()
    );
    Ok(())
}

/// Write the bundled memory map as CSV
pub fn export_memory_map(path: &str) -> Result<()> {
    let schema = MemoryMapSchema::bundled()?;
    let file = std::fs::File::create(path)?;
    schema.write_csv(file)?;
    info!("Memory map written to {}", path);
    Ok(())
}

/// Open the configured stores and seed the device catalogue.
///
/// Devices listed in the configuration replace the stored list; an empty
/// list keeps whatever the API stored last.
pub async fn open_stores(config: &AppConfig, args: &ServiceArgs) -> Result<Stores> {
    let stores = if config.database.in_memory {
        info!("Stores: in memory");
        Stores::in_memory(Vec::new())
    } else {
        let path = args.get_db_path(&config.database.path);
        let client = SqliteClient::new(&path).await?;
        Stores::sqlite(Arc::new(SqliteStore::open(client).await?))
    };

    if !config.devices.is_empty() {
        stores.devices.replace_devices(config.devices.clone()).await?;
    }
    let devices = stores.devices.list_devices().await?;
    if devices.is_empty() {
        warn!("No devices configured");
    }
    Ok(stores)
}

/// Everything the running service owns
pub struct AppContext {
    pub config: AppConfig,
    pub schema: Arc<MemoryMapSchema>,
    pub stores: Stores,
    pub engine: EngineHandle,
    pub shutdown: CancellationToken,
}

impl AppContext {
    pub fn new(config: AppConfig, stores: Stores, connector: Arc<dyn Connector>) -> Result<Self> {
        let schema = MemoryMapSchema::bundled()?;
        let engine = PollingEngine::new(schema.clone(), &config.polling, stores.clone(), connector);
        Ok(Self {
            config,
            schema,
            stores,
            engine,
            shutdown: CancellationToken::new(),
        })
    }

    /// Context talking Modbus TCP with the configured timeouts
    pub fn with_tcp(config: AppConfig, stores: Stores) -> Result<Self> {
        let connector = TcpConnector {
            connect_timeout: config.polling.connect_timeout(),
            request_timeout: config.polling.request_timeout(),
        };
        Self::new(config, stores, Arc::new(connector))
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.engine.clone(), self.stores.clone())
    }

    pub fn router(&self) -> Router {
        let app = create_routes(self.app_state());

        #[cfg(feature = "swagger-ui")]
        let app = app.merge(
            SwaggerUi::new("/swagger-ui")
                .url("/openapi.json", crate::api::routes::ColdsrvApiDoc::openapi()),
        );

        app
    }

    /// Serve the API and drive the engine until the shutdown token fires
    pub async fn serve(&self, bind_address: &str) -> Result<()> {
        let addr: SocketAddr = bind_address.parse().map_err(|e| {
            ColdroomError::Configuration(format!("Invalid bind address '{bind_address}': {e}"))
        })?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ColdroomError::Configuration(format!("Failed to bind {addr}: {e}")))?;
        info!("API listening on http://{}", addr);

        let engine_handle = tokio::spawn(self.engine.clone().run(self.shutdown.child_token()));

        let token = self.shutdown.clone();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = &result {
            error!("Server error: {}", e);
            self.shutdown.cancel();
        }

        if let Err(e) = engine_handle.await {
            error!("Engine task: {}", e);
        }
        result.map_err(ColdroomError::Io)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, DeviceConfig};

    fn config() -> AppConfig {
        AppConfig {
            database: DatabaseConfig {
                in_memory: true,
                ..Default::default()
            },
            devices: vec![DeviceConfig::new(1, "Cámara 1", "127.0.0.1", 1502)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_config_devices_seed_catalogue() {
        let stores = open_stores(&config(), &ServiceArgs::default()).await.unwrap();
        let devices = stores.devices.list_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].host, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_sqlite_keeps_api_devices_when_config_lists_none() {
        let dir = tempfile::tempdir().unwrap();
        let args = ServiceArgs {
            db_path: Some(dir.path().join("coldsrv.db").to_string_lossy().to_string()),
            ..Default::default()
        };
        let mut config = config();
        config.database.in_memory = false;
        open_stores(&config, &args).await.unwrap();

        config.devices.clear();
        let stores = open_stores(&config, &args).await.unwrap();
        assert_eq!(stores.devices.list_devices().await.unwrap().len(), 1);
    }

    #[test]
    fn test_export_memory_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.csv");
        export_memory_map(path.to_str().unwrap()).unwrap();
        let csv = std::fs::read_to_string(path).unwrap();
        assert!(csv.lines().count() > 100);
        assert!(csv.contains("eepromTypeToSave"));
    }
}
