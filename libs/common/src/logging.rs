//! Logging bootstrap for the gateway services
//!
//! Console output and a daily rolling log file share one reloadable
//! `EnvFilter`, so the level can be changed at runtime through
//! [`set_log_level`].

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable overriding the log directory
pub const LOG_DIR_ENV: &str = "COLDROOM_LOG_DIR";

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809000Z [INFO] Polling started`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking file writer alive for the process lifetime
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Log root directory, resolved once
static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

type EnvFilterReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
static LOG_FILTER_HANDLE: OnceLock<EnvFilterReloadHandle> = OnceLock::new();
static CURRENT_LOG_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

/// Initialize the log root directory.
///
/// Priority: `COLDROOM_LOG_DIR` > `config_dir` > `logs`
pub fn init_log_root(config_dir: Option<&str>) {
    LOG_ROOT.get_or_init(|| {
        std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                config_dir
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("logs"))
            })
    });
}

pub fn get_log_root() -> PathBuf {
    LOG_ROOT.get().cloned().unwrap_or_else(|| {
        std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("logs"))
    })
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name, used as the file prefix and the default debug target
    pub service_name: String,
    pub log_dir: PathBuf,
    pub console_level: Level,
    pub file_level: Level,
    /// JSON lines in the log file instead of the bracketed format
    pub enable_json: bool,
    /// Colored console output
    pub ansi: bool,
    /// Disable the file layer entirely (tests, `--validate`)
    pub console_only: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "coldsrv".to_string(),
            log_dir: get_log_root(),
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            enable_json: false,
            ansi: true,
            console_only: false,
        }
    }
}

/// Filter string used when `RUST_LOG` is not set
pub fn default_filter(service_name: &str, level: Level) -> String {
    let crate_target = service_name.replace('-', "_");
    format!(
        "{},{}=debug",
        level.as_str().to_lowercase(),
        crate_target
    )
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter_str = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_filter(&config.service_name, config.console_level));
    let env_filter = EnvFilter::try_new(&filter_str)?;

    let (reload_filter, reload_handle) = reload::Layer::new(env_filter);
    let _ = LOG_FILTER_HANDLE.set(reload_handle);
    let _ = CURRENT_LOG_LEVEL.set(Mutex::new(filter_str));

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.console_only {
        None
    } else {
        fs::create_dir_all(&config.log_dir)?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(&config.service_name)
            .filename_suffix("log")
            .build(&config.log_dir)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
        match guards.lock() {
            Ok(mut guards) => guards.push(guard),
            Err(poisoned) => poisoned.into_inner().push(guard),
        }

        let file_filter = tracing_subscriber::filter::LevelFilter::from_level(config.file_level);
        let layer = if config.enable_json {
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_target(true)
                .with_filter(file_filter)
                .boxed()
        } else {
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .event_format(BracketedLevelFormat)
                .with_filter(file_filter)
                .boxed()
        };
        Some(layer)
    };

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    if config.console_only {
        tracing::info!("Logging: {} (console)", config.service_name);
    } else {
        tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
    }
    Ok(())
}

/// Change the active filter at runtime, e.g. `"info,coldsrv=trace"`
pub fn set_log_level(level: &str) -> errors::Result<()> {
    let new_filter = EnvFilter::try_new(level).map_err(|e| {
        errors::ColdroomError::BadRequest(format!("Invalid log level '{}': {}", level, e))
    })?;

    let handle = LOG_FILTER_HANDLE.get().ok_or_else(|| {
        errors::ColdroomError::Internal("Logging not initialized with reload support".into())
    })?;
    handle.reload(new_filter).map_err(|e| {
        errors::ColdroomError::Internal(format!("Failed to reload log filter: {}", e))
    })?;

    if let Some(current) = CURRENT_LOG_LEVEL.get() {
        match current.lock() {
            Ok(mut guard) => *guard = level.to_string(),
            Err(poisoned) => *poisoned.into_inner() = level.to_string(),
        }
    }

    tracing::info!("Log level: {}", level);
    Ok(())
}

/// Current filter string, or `unknown` before initialization
pub fn get_log_level() -> String {
    CURRENT_LOG_LEVEL
        .get()
        .and_then(|m| m.lock().ok())
        .map(|guard| guard.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Cut `body` to at most `max_length` bytes on a char boundary
#[cfg(any(feature = "axum", test))]
fn truncate_body(body: &str, max_length: usize) -> String {
    if body.len() <= max_length {
        return body.to_string();
    }
    let mut end = max_length;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}[truncated {} bytes]", &body[..end], body.len() - end)
}

/// HTTP request logger middleware
///
/// Modifying requests are logged at INFO under the `api_access` target;
/// everything else, and JSON request bodies, only at DEBUG.
///
/// ```ignore
/// let app = Router::new()
///     // ... routes ...
///     .layer(middleware::from_fn(http_request_logger)) // before .with_state()
///     .with_state(state);
/// ```
#[cfg(feature = "axum")]
pub async fn http_request_logger(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    use axum::body::Body;
    use std::time::Instant;
    use tracing::{debug, info, level_enabled};

    const MAX_BODY_LENGTH: usize = 500;

    let method = req.method().clone();
    let uri = req.uri().clone();
    let modifying = matches!(method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE");
    let is_json = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));
    let start = Instant::now();

    let (req, body) = if modifying && is_json && level_enabled!(Level::DEBUG) {
        let (parts, body) = req.into_parts();
        let bytes = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Request body read: {}", e);
                return next
                    .run(axum::extract::Request::from_parts(parts, Body::empty()))
                    .await;
            },
        };
        let text = match std::str::from_utf8(&bytes) {
            Ok(s) => truncate_body(s, MAX_BODY_LENGTH),
            Err(_) => "<binary data>".to_string(),
        };
        (
            axum::extract::Request::from_parts(parts, Body::from(bytes)),
            Some(text),
        )
    } else {
        (req, None)
    };

    let response = next.run(req).await;
    let duration = start.elapsed();
    let status = response.status();

    if modifying {
        info!(
            target: "api_access",
            method = %method,
            path = %uri.path(),
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "HTTP request"
        );
    }
    match body {
        Some(body) => debug!(
            target: "api_access",
            method = %method,
            path = %uri.path(),
            status = %status.as_u16(),
            request_body = %body,
            "HTTP request (detailed)"
        ),
        None if !modifying => debug!(
            target: "api_access",
            method = %method,
            path = %uri.path(),
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            "HTTP request"
        ),
        None => {},
    }

    response
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter("coldsrv", Level::INFO), "info,coldsrv=debug");
        assert_eq!(
            default_filter("coldroom-memmap", Level::WARN),
            "warn,coldroom_memmap=debug"
        );
    }

    #[test]
    fn test_truncate_body_keeps_char_boundary() {
        assert_eq!(truncate_body("abc", 10), "abc");
        // 'á' is two bytes; cutting at 2 would split it
        assert_eq!(truncate_body("aáb", 2), "a[truncated 3 bytes]");
    }

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(&Level::WARN), "[WARN]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
    }

    #[test]
    fn test_set_level_rejects_bad_filter() {
        assert!(matches!(
            set_log_level("coldsrv=loud"),
            Err(errors::ColdroomError::BadRequest(_))
        ));
    }

    #[test]
    fn test_set_level_before_init_fails() {
        if LOG_FILTER_HANDLE.get().is_none() {
            assert!(matches!(
                set_log_level("debug"),
                Err(errors::ColdroomError::Internal(_))
            ));
            assert_eq!(get_log_level(), "unknown");
        }
    }
}
