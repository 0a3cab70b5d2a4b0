//! Example: drive the live multi-line display with fake jobs, no ffmpeg needed.
//!
//! Run with: cargo run --example simulated_jobs

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use webify::progress::{fit_name, progress_bar};
use webify::{Renderer, WorkerPool};

fn main() -> anyhow::Result<()> {
    let renderer = Renderer::stdout("=========== Processing... ===========");

    // Each "conversion" takes a different amount of time based on its name length
    let producer = |input: &Path, report: &dyn Fn(&str)| {
        let name = fit_name(&input.display().to_string(), 20);
        let step = Duration::from_millis(20 + 10 * input.as_os_str().len() as u64);
        for pct in 0..=100u32 {
            report(&format!("{} {} {}%", name, progress_bar(30, pct as f64 / 100.0), pct));
            thread::sleep(step);
        }
        report(&format!("{} done", input.display()));
    };

    let mut pool = WorkerPool::new(3, Arc::clone(&renderer), Arc::new(producer));
    for name in ["intro.mp4", "holiday.mov", "a.png", "long_recording.mkv", "b.jpg", "c.jpeg"] {
        pool.submit(name);
    }

    let start = Instant::now();
    pool.run()?;
    let report = pool.join()?;

    renderer.set_header("=============== Done! ===============");
    println!("{} jobs in {:.1} seconds", report.completed, start.elapsed().as_secs_f64());
    Ok(())
}
