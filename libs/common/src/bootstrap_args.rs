//! Command-line arguments shared by the gateway binaries

#[cfg(feature = "cli")]
use clap::Parser;

/// Environment variable overriding the SQLite path
pub const DB_PATH_ENV: &str = "COLDROOM_DB_PATH";

/// Common service startup arguments
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Parser))]
#[cfg_attr(feature = "cli", clap(author, version, about))]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    #[cfg_attr(
        feature = "cli",
        clap(short = 'l', long, default_value = "info", env = "RUST_LOG")
    )]
    pub log_level: String,

    /// Configuration file (YAML)
    #[cfg_attr(feature = "cli", clap(short = 'c', long, env = "COLDSRV_CONFIG"))]
    pub config: Option<String>,

    /// Bind address override (e.g., 0.0.0.0:6100)
    #[cfg_attr(feature = "cli", clap(short = 'b', long, env = "BIND_ADDRESS"))]
    pub bind_address: Option<String>,

    /// Disable colored output
    #[cfg_attr(feature = "cli", clap(long))]
    pub no_color: bool,

    /// Only validate configuration without starting service
    #[cfg_attr(feature = "cli", clap(long))]
    pub validate: bool,

    /// Write the memory map as CSV to this path and exit
    #[cfg_attr(feature = "cli", clap(long, value_name = "PATH"))]
    pub export_map: Option<String>,

    /// SQLite database path override
    #[cfg_attr(feature = "cli", clap(long))]
    pub db_path: Option<String>,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            config: None,
            bind_address: None,
            no_color: false,
            validate: false,
            export_map: None,
            db_path: None,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// True when the process only runs a one-shot command
    pub fn is_one_shot(&self) -> bool {
        self.validate || self.export_map.is_some()
    }

    /// Database path: flag > `COLDROOM_DB_PATH` > configured value
    pub fn get_db_path(&self, configured: &str) -> String {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        std::env::var(DB_PATH_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| configured.to_string())
    }
}
