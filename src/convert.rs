//! One conversion job: ffmpeg with progress, then a best-effort date copy.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command as ProcCommand, Stdio};
use std::time::Instant;
use tracing::debug;

use crate::pool::Producer;
use crate::progress::{fit_name, ProgressParser};
use crate::AppConfig;

/// Kills the wrapped child on drop unless it has already been reaped.
pub struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    pub fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Wait for the child and disarm the guard.
    pub fn wait(mut self) -> std::io::Result<std::process::ExitStatus> {
        match self.child.take() {
            Some(mut child) => child.wait(),
            None => Err(std::io::Error::other("child already reaped")),
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

/// Converts one file with ffmpeg, reporting a progress bar line.
#[derive(Debug, Clone)]
pub struct FfmpegProducer {
    config: AppConfig,
}

impl FfmpegProducer {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Where `input` will be written, or `None` if its extension has no target.
    pub fn output_for(&self, input: &Path) -> Option<PathBuf> {
        let target = self.config.target_extension(input)?;
        Some(input.with_extension(target.trim_start_matches('.')))
    }

    fn convert(&self, input: &Path, report: &dyn Fn(&str)) {
        if !input.exists() {
            report(&format!("Could not find file {}", input.display()));
            return;
        }
        let Some(output) = self.output_for(input) else {
            report(&format!(
                "Could not find conversion format for file {}",
                input.display()
            ));
            return;
        };

        if output.exists() {
            self.copy_dates(input, &output);
            report(&format!(
                "File {} already exists. Skipping...",
                output.display()
            ));
            return;
        }

        report(&format!("Starting conversion for {}", output.display()));
        let started = Instant::now();

        let spawned = ProcCommand::new(&self.config.ffmpeg_cmd)
            .arg("-err_detect")
            .arg("ignore_err")
            .arg("-i")
            .arg(input)
            .arg(&output)
            .arg("-progress")
            .arg("pipe:2")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();
        let mut guard = match spawned {
            Ok(child) => ChildGuard::new(child),
            Err(e) => {
                debug!(error = %e, cmd = %self.config.ffmpeg_cmd, "failed to spawn ffmpeg");
                report(&format!(
                    "Could not start {} for {}: {}",
                    self.config.ffmpeg_cmd,
                    input.display(),
                    e
                ));
                return;
            }
        };
        debug!(input = %input.display(), output = %output.display(), "ffmpeg started");

        let label = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut parser = ProgressParser::new(fit_name(&label, self.config.name_width), self.config.bar_width);

        if let Some(stderr) = guard.child_mut().and_then(|c| c.stderr.take()) {
            // ffmpeg rewrites its stats line with '\r'; split on both.
            let mut reader = BufReader::new(stderr);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match read_until_eol(&mut reader, &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        if let Some(text) = parser.feed(&line) {
                            report(&text);
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "error reading ffmpeg output");
                        break;
                    }
                }
            }
        }

        let status = guard.wait();
        let secs = started.elapsed().as_secs_f64();
        self.copy_dates(input, &output);

        match status {
            Ok(status) if status.success() => {
                debug!(output = %output.display(), secs, "ffmpeg finished");
                report(&format!("{} done in {:.2} seconds", output.display(), secs));
            }
            Ok(status) => {
                debug!(output = %output.display(), %status, "ffmpeg failed");
                report(&format!(
                    "{} failed ({}) after {:.2} seconds",
                    output.display(),
                    status,
                    secs
                ));
            }
            Err(e) => {
                debug!(output = %output.display(), error = %e, "waiting for ffmpeg failed");
                report(&format!("{} failed ({}) after {:.2} seconds", output.display(), e, secs));
            }
        }
    }

    /// Copy file dates from `source` onto `target` with exiftool, best effort.
    fn copy_dates(&self, source: &Path, target: &Path) {
        if !self.config.copy_dates {
            return;
        }
        let result = ProcCommand::new(&self.config.exiftool_cmd)
            .arg("-q")
            .arg("-TagsFromFile")
            .arg(source)
            .arg("-FileModifyDate")
            .arg("-FileCreateDate")
            .arg("-overwrite_original")
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match result {
            Ok(status) if !status.success() => {
                debug!(file = %target.display(), %status, "exiftool exited unsuccessfully")
            }
            Err(e) => debug!(file = %target.display(), error = %e, "exiftool unavailable"),
            _ => {}
        }
    }
}

impl Producer for FfmpegProducer {
    fn produce(&self, input: &Path, report: &dyn Fn(&str)) {
        self.convert(input, report);
    }
}

/// Read up to and including the next `\n` or `\r`. Returns bytes consumed.
fn read_until_eol<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    let mut consumed = 0;
    loop {
        let (done, used) = {
            let available = reader.fill_buf()?;
            if available.is_empty() {
                return Ok(consumed);
            }
            match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(i) => {
                    buf.extend_from_slice(&available[..i]);
                    (true, i + 1)
                }
                None => {
                    buf.extend_from_slice(available);
                    (false, available.len())
                }
            }
        };
        reader.consume(used);
        consumed += used;
        if done {
            return Ok(consumed);
        }
    }
}
