//! Finding the files a run should convert.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::AppConfig;

/// Resolve the directory to work in: no argument means the current
/// directory, relative paths are taken from it, absolute paths are kept.
pub fn working_directory(opt: Option<&Path>) -> std::io::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(match opt {
        None => cwd,
        Some(p) if p.as_os_str().is_empty() => cwd,
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => cwd.join(p),
    })
}

fn is_hidden(name: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| !p.is_empty() && name.starts_with(p.as_str()))
}

/// Every convertible file below `root`, sorted and without duplicates.
///
/// Hidden entries (by configured name prefix) are skipped together with
/// everything beneath them. Unreadable entries are ignored.
pub fn find_convertible(root: &Path, config: &AppConfig) -> Vec<PathBuf> {
    if !root.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| {
            // The root itself may live under a dot-directory (temp dirs do).
            e.depth() == 0
                || !e
                    .file_name()
                    .to_str()
                    .is_some_and(|name| is_hidden(name, &config.hidden_prefixes))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| config.target_extension(p).is_some())
        .collect();
    files.sort();
    files.dedup();
    files
}
