//! Logging setup.
//!
//! The terminal belongs to the progress renderer, so diagnostics are kept out
//! of its way: with a log file configured everything goes there, otherwise
//! only warnings and errors reach stderr.
//!
//! # Environment Variables
//!
//! - `WEBIFY_LOG` - log filter (overrides `RUST_LOG`)
//! - `WEBIFY_LOG_FILE` - path of a log file
//! - `RUST_LOG` - standard filter, used when `WEBIFY_LOG` is unset

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Number of live [`StderrPause`] guards. Stderr output is dropped while non-zero.
static STDERR_PAUSES: AtomicUsize = AtomicUsize::new(0);

/// Keeps stderr logging silent while it is alive.
///
/// Hold one for as long as a renderer owns the terminal: rows written behind
/// its back would throw off its redraws.
#[derive(Debug)]
#[must_use = "stderr logging resumes as soon as the pause is dropped"]
pub struct StderrPause(());

impl Drop for StderrPause {
    fn drop(&mut self) {
        STDERR_PAUSES.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Silence stderr logging until the returned guard is dropped.
pub fn pause_stderr() -> StderrPause {
    STDERR_PAUSES.fetch_add(1, Ordering::SeqCst);
    StderrPause(())
}

/// Whether stderr logging is currently allowed to write.
pub fn stderr_enabled() -> bool {
    STDERR_PAUSES.load(Ordering::SeqCst) == 0
}

/// Logging configuration, built from CLI flags and then environment overrides.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base level when no filter is given (default: WARN)
    pub level: Level,
    /// Filter directive, overrides `level` when set
    pub filter: Option<String>,
    /// Log file; `None` logs to stderr
    pub file_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            filter: None,
            file_path: None,
        }
    }
}

impl LogConfig {
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    /// Fill unset fields from `WEBIFY_LOG`, `RUST_LOG` and `WEBIFY_LOG_FILE`.
    ///
    /// Values already set from the command line win.
    pub fn with_env_overrides(mut self) -> Self {
        if self.filter.is_none() {
            self.filter = std::env::var("WEBIFY_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .ok();
        }
        if self.file_path.is_none() {
            if let Ok(path) = std::env::var("WEBIFY_LOG_FILE") {
                self.file_path = Some(PathBuf::from(path));
            }
        }
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string().to_lowercase());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }
}

/// Parse a level name; also accepts `warning`.
pub fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "warning" => Some(Level::WARN),
        other => Level::from_str(other).ok(),
    }
}

/// Install the global subscriber. Later calls are ignored.
///
/// Returns the file writer's guard, which must be kept alive until exit so
/// buffered lines are flushed.
pub fn init(config: LogConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = config.build_filter();

    match &config.file_path {
        Some(path) => {
            let parent = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("webify.log");
            let appender = tracing_appender::rolling::never(parent, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
            Some(guard)
        }
        None => {
            let layer = fmt::layer()
                .compact()
                .with_ansi(std::io::stderr().is_terminal())
                .with_writer(std::io::stderr.with_filter(|_| stderr_enabled()));
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
            None
        }
    }
}

/// Route panic messages through `tracing` instead of the default hook.
///
/// The default hook writes straight to stderr, which would land in the middle
/// of the live progress region when a worker panics.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let thread = std::thread::current();
        let name = thread.name().unwrap_or("<unnamed>");
        let msg = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        match info.location() {
            Some(loc) => tracing::error!(thread = name, location = %loc, "panicked: {}", msg),
            None => tracing::error!(thread = name, "panicked: {}", msg),
        }
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("error"), Some(Level::ERROR));
        assert_eq!(parse_level("warn"), Some(Level::WARN));
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("INFO"), Some(Level::INFO));
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn test_defaults_are_quiet() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::WARN);
        assert!(config.filter.is_none());
        assert!(config.file_path.is_none());
    }

    #[test]
    fn test_stderr_pauses_nest() {
        assert!(stderr_enabled());
        let outer = pause_stderr();
        assert!(!stderr_enabled());
        let inner = pause_stderr();
        drop(outer);
        assert!(!stderr_enabled());
        drop(inner);
        assert!(stderr_enabled());
    }

    #[test]
    fn test_builder() {
        let config = LogConfig::default()
            .with_level(Level::DEBUG)
            .with_file(PathBuf::from("/tmp/webify.log"));
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/webify.log")));
    }
}
