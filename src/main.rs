use anyhow::{anyhow, Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use webify::logging::{self, LogConfig};
use webify::{AppConfig, FfmpegProducer, Producer, Renderer, WorkerPool};

const PROCESSING_BANNER: &str =
    "==================================== Processing... ====================================";
const DONE_BANNER: &str =
    "======================================== Done! ========================================";

fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(p) = explicit {
        return AppConfig::from_file(p);
    }

    // Look in the user config dir, then the current dir, then fall back to built-ins
    let mut tried: Vec<PathBuf> = Vec::new();
    if let Some(mut d) = dirs::config_dir() {
        d.push("webify");
        tried.push(d.join("webify.json"));
        tried.push(d.join("webify.toml"));
    }
    tried.push(PathBuf::from("webify.json"));
    tried.push(PathBuf::from("webify.toml"));

    for p in &tried {
        if p.exists() {
            info!(path = %p.display(), "loading config");
            return AppConfig::from_file(p);
        }
    }

    Ok(AppConfig::default())
}

#[derive(Parser, Debug)]
#[command(version, about = "Convert videos to WebM and images to WebP, in parallel.")]
struct Args {
    /// Path to the target directory (current directory by default)
    folder: Option<PathBuf>,

    /// Concurrent ffmpeg instances (overrides the config, 4 by default)
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    threads: Option<u16>,

    /// Configuration file (.json or .toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write diagnostics to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace
    #[arg(long)]
    log_level: Option<String>,

    /// Remove the original files after converting, without asking
    #[arg(short = 'y', long, default_value_t = false, conflicts_with = "keep_originals")]
    remove_originals: bool,

    /// Keep the original files, without asking
    #[arg(long, default_value_t = false)]
    keep_originals: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut log_config = LogConfig::default();
    if let Some(level) = &args.log_level {
        let level = logging::parse_level(level).ok_or_else(|| anyhow!("Unknown log level '{}'", level))?;
        log_config = log_config.with_level(level);
        log_config.filter = Some(level.to_string().to_lowercase());
    }
    if let Some(path) = &args.log_file {
        log_config = log_config.with_file(path.clone());
    }
    let _log_guard = logging::init(log_config.with_env_overrides());
    logging::install_panic_hook();

    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(threads) = args.threads {
        cfg.threads = usize::from(threads);
    }

    let working_dir = webify::working_directory(args.folder.as_deref()).context("resolving working directory")?;
    println!("Working directory: {}", working_dir.display());

    let candidates = scan(&working_dir, &cfg);
    if candidates.is_empty() {
        println!("Could not find any files to process");
        return Ok(());
    }
    info!(files = candidates.len(), threads = cfg.threads, "starting conversion");

    // The renderer owns the terminal until the final header is drawn.
    let quiet = logging::pause_stderr();
    let renderer = Renderer::stdout(PROCESSING_BANNER);
    let producer = Arc::new(FfmpegProducer::new(cfg.clone()));
    let shared: Arc<dyn Producer> = producer.clone();
    let mut pool = WorkerPool::new(cfg.threads, Arc::clone(&renderer), shared);

    let start = Instant::now();
    for file in &candidates {
        pool.submit(file.clone());
    }
    pool.run()?;
    let report = pool.join()?;
    let elapsed = start.elapsed();

    renderer.set_header(DONE_BANNER);
    drop(quiet);
    println!(
        "Converting took {:.2} seconds ({})",
        elapsed.as_secs_f64(),
        HumanDuration(elapsed)
    );
    if report.panicked > 0 {
        eprintln!("Warning: {} job(s) crashed; see the log for details", report.panicked);
    }
    info!(completed = report.completed, panicked = report.panicked, secs = elapsed.as_secs_f64(), "conversion finished");

    if should_remove_originals(&args)? {
        remove_originals(&candidates, &producer);
    }

    Ok(())
}

fn scan(root: &Path, cfg: &AppConfig) -> Vec<PathBuf> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Scanning {}", root.display()));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let files = webify::find_convertible(root, cfg);

    spinner.finish_and_clear();
    files
}

fn should_remove_originals(args: &Args) -> Result<bool> {
    if args.remove_originals {
        return Ok(true);
    }
    if args.keep_originals || !std::io::stdin().is_terminal() {
        return Ok(false);
    }
    Ok(Confirm::new()
        .with_prompt("Remove old files?")
        .default(false)
        .interact()?)
}

/// Delete originals whose converted counterpart exists; everything else stays.
fn remove_originals(files: &[PathBuf], producer: &FfmpegProducer) {
    let mut removed = 0usize;
    for file in files {
        let converted = producer.output_for(file).is_some_and(|out| out.exists());
        if !converted {
            info!(file = %file.display(), "no converted file, keeping original");
            continue;
        }
        match fs::remove_file(file) {
            Ok(()) => removed += 1,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "failed to remove original");
                eprintln!("Warning: failed to remove {}: {}", file.display(), e);
            }
        }
    }
    println!("Removed {} of {} original files", removed, files.len());
}
