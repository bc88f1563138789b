use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once};

use tracing::Level;
use tracing_subscriber::{fmt, fmt::format::FmtSpan, prelude::*, EnvFilter, Layer};

static INIT: Once = Once::new();

/// Logging configuration options
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level; `RUST_LOG` directives take precedence
    pub level: Level,
    /// Whether to include timestamps
    pub timestamps: bool,
    /// Whether to include source code locations
    pub source_location: bool,
    /// Whether to log span open/close events
    pub log_spans: bool,
    /// Output file path (None for stdout)
    pub file_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            timestamps: true,
            source_location: false,
            log_spans: false,
            file_path: None,
        }
    }
}

/// Install the global `tracing` subscriber. Only the first call has an
/// effect; later calls return `Ok(())`.
pub fn setup_logging(config: LogConfig) -> Result<(), String> {
    let mut result = Ok(());

    INIT.call_once(|| {
        result = setup_logging_internal(config);
    });

    result
}

fn setup_logging_internal(config: LogConfig) -> Result<(), String> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let span_events = if config.log_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_target(true)
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_span_events(span_events);

    let layer = match &config.file_path {
        Some(path) => {
            let layer = layer
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?));
            if config.timestamps {
                layer.boxed()
            } else {
                layer.without_time().boxed()
            }
        }
        None if config.timestamps => layer.boxed(),
        None => layer.without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| format!("Failed to set global subscriber: {}", e))
}

fn open_log_file(path: &Path) -> Result<File, String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create log directory {}: {}", parent.display(), e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))
}
