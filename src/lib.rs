//! # webify - batch WebM/WebP converter
//!
//! `webify` walks a directory, converts every video to WebM and every image to
//! WebP with ffmpeg, and shows one live progress line per running conversion.
//!
//! ## Features
//!
//! - A bounded pool of workers, each driving one external conversion
//! - A multiplexed terminal renderer that redraws all live lines atomically
//! - Finished jobs leave exactly one line of status in the scrollback
//! - Configurable extension map, tool paths and bar widths
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use webify::{AppConfig, FfmpegProducer, Renderer, WorkerPool};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = AppConfig::default();
//! let renderer = Renderer::stdout("== Processing... ==");
//! let producer = Arc::new(FfmpegProducer::new(config.clone()));
//!
//! let mut pool = WorkerPool::new(config.threads, Arc::clone(&renderer), producer);
//! for file in webify::find_convertible(Path::new("media"), &config) {
//!     pool.submit(file);
//! }
//! pool.run()?;
//! let report = pool.join()?;
//! renderer.set_header("== Done! ==");
//! println!("{} files processed", report.completed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom producers
//!
//! Anything implementing [`Producer`] can be driven by the pool, including
//! plain closures:
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use webify::{Renderer, WorkerPool};
//!
//! # fn main() -> anyhow::Result<()> {
//! let renderer = Renderer::stdout("");
//! let producer = |input: &Path, report: &dyn Fn(&str)| {
//!     for pct in (0..=100).step_by(25) {
//!         report(&format!("{} {}%", input.display(), pct));
//!     }
//! };
//! let mut pool = WorkerPool::new(2, renderer, Arc::new(producer));
//! pool.submit("a.mp4");
//! pool.submit("b.mp4");
//! pool.run()?;
//! pool.join()?;
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub mod convert;
pub mod line;
pub mod logging;
pub mod pool;
pub mod progress;
pub mod renderer;
pub mod scan;

pub use convert::{ChildGuard, FfmpegProducer};
pub use line::{LineObserver, LineStream};
pub use pool::{PoolReport, Producer, WorkerPool};
pub use renderer::{LineId, Renderer};
pub use scan::{find_convertible, working_directory};

fn default_format_map() -> BTreeMap<String, String> {
    [
        (".mp4", ".webm"),
        (".mov", ".webm"),
        (".mkv", ".webm"),
        (".png", ".webp"),
        (".jpg", ".webp"),
        (".jpeg", ".webp"),
    ]
    .into_iter()
    .map(|(from, to)| (from.to_string(), to.to_string()))
    .collect()
}

fn default_threads() -> usize {
    4
}
fn default_ffmpeg_cmd() -> String {
    "ffmpeg".to_string()
}
fn default_exiftool_cmd() -> String {
    "exiftool".to_string()
}
fn default_true() -> bool {
    true
}
fn default_width() -> usize {
    40
}
fn default_hidden_prefixes() -> Vec<String> {
    vec![".".to_string()]
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source extension (with dot, lowercase) to target extension
    #[serde(default = "default_format_map")]
    pub format_map: BTreeMap<String, String>,
    /// Concurrent conversions
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_ffmpeg_cmd")]
    pub ffmpeg_cmd: String,
    #[serde(default = "default_exiftool_cmd")]
    pub exiftool_cmd: String,
    /// Copy file dates onto converted files with exiftool
    #[serde(default = "default_true")]
    pub copy_dates: bool,
    /// Width the output name is padded or cut to in progress lines
    #[serde(default = "default_width")]
    pub name_width: usize,
    /// Number of cells in the progress bar
    #[serde(default = "default_width")]
    pub bar_width: usize,
    /// File and directory name prefixes that are never scanned
    #[serde(default = "default_hidden_prefixes")]
    pub hidden_prefixes: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            format_map: default_format_map(),
            threads: default_threads(),
            ffmpeg_cmd: default_ffmpeg_cmd(),
            exiftool_cmd: default_exiftool_cmd(),
            copy_dates: true,
            name_width: default_width(),
            bar_width: default_width(),
            hidden_prefixes: default_hidden_prefixes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a `.json` or `.toml` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let mut cfg: AppConfig = if is_toml {
            toml::from_str(&text).with_context(|| format!("parsing config toml {}", path.display()))?
        } else {
            serde_json::from_str(&text).with_context(|| format!("parsing config json {}", path.display()))?
        };
        cfg.normalize();
        cfg.validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(cfg)
    }

    /// Lowercase the extension keys so lookups are case-insensitive.
    fn normalize(&mut self) {
        self.format_map = std::mem::take(&mut self.format_map)
            .into_iter()
            .map(|(from, to)| (from.to_lowercase(), to))
            .collect();
    }

    /// Check the configuration for values that would break a run.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(anyhow!("threads must be at least 1"));
        }
        for (from, to) in &self.format_map {
            if !from.starts_with('.') || from.len() < 2 {
                return Err(anyhow!("source extension '{}' must look like '.ext'", from));
            }
            if !to.starts_with('.') || to.len() < 2 {
                return Err(anyhow!("target extension '{}' must look like '.ext'", to));
            }
        }
        if self.ffmpeg_cmd.trim().is_empty() {
            return Err(anyhow!("ffmpeg_cmd cannot be empty"));
        }
        Ok(())
    }

    /// Target extension (with dot) for `path`, matched case-insensitively.
    pub fn target_extension(&self, path: &Path) -> Option<&str> {
        let ext = path.extension()?.to_str()?;
        let key = format!(".{}", ext.to_lowercase());
        self.format_map.get(&key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format_map() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.target_extension(Path::new("a.mp4")), Some(".webm"));
        assert_eq!(cfg.target_extension(Path::new("a.MOV")), Some(".webm"));
        assert_eq!(cfg.target_extension(Path::new("a.jpeg")), Some(".webp"));
        assert_eq!(cfg.target_extension(Path::new("a.webm")), None);
        assert_eq!(cfg.target_extension(Path::new("Makefile")), None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_json_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webify.json");
        fs::write(&path, r#"{"threads": 2, "format_map": {".GIF": ".webp"}}"#).unwrap();
        let cfg = AppConfig::from_file(&path).unwrap();
        assert_eq!(cfg.threads, 2);
        assert_eq!(cfg.ffmpeg_cmd, "ffmpeg");
        assert_eq!(cfg.target_extension(Path::new("x.gif")), Some(".webp"));
        assert_eq!(cfg.target_extension(Path::new("x.mp4")), None);
    }

    #[test]
    fn test_toml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webify.toml");
        fs::write(&path, "copy_dates = false\nbar_width = 20\n").unwrap();
        let cfg = AppConfig::from_file(&path).unwrap();
        assert!(!cfg.copy_dates);
        assert_eq!(cfg.bar_width, 20);
        assert_eq!(cfg.format_map, default_format_map());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webify.json");
        fs::write(&path, r#"{"threads": 0}"#).unwrap();
        assert!(AppConfig::from_file(&path).is_err());
        fs::write(&path, r#"{"format_map": {"mp4": ".webm"}}"#).unwrap();
        assert!(AppConfig::from_file(&path).is_err());
        fs::write(&path, "not json").unwrap();
        assert!(AppConfig::from_file(&path).is_err());
    }
}
