//! Turning ffmpeg's stderr chatter into one-line progress reports.

/// Parse an `HH:MM:SS.fff` clock (or any `:`-separated suffix of it) into seconds.
///
/// Returns `None` for empty input, unparseable components, or negative values
/// (ffmpeg prints `out_time=-577014:32:22.77` before the first frame).
pub fn parse_clock(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let mut total = 0.0;
    for (i, part) in s.split(':').rev().enumerate() {
        let value: f64 = part.trim().parse().ok()?;
        if value < 0.0 {
            return None;
        }
        total += value * 60f64.powi(i as i32);
    }
    Some(total)
}

/// Fixed-width progress bar, e.g. `|####......|`.
pub fn progress_bar(width: usize, progress: f64) -> String {
    let filled = ((width as f64) * progress.clamp(0.0, 1.0)) as usize;
    let filled = filled.min(width);
    format!("|{}{}|", "#".repeat(filled), ".".repeat(width - filled))
}

/// Pad `name` with spaces to `width` characters, or cut it and append `...`.
pub fn fit_name(name: &str, width: usize) -> String {
    let len = name.chars().count();
    if len > width {
        let keep = width.saturating_sub(3);
        let mut out: String = name.chars().take(keep).collect();
        out.push_str("...");
        out
    } else {
        format!("{name}{}", " ".repeat(width - len))
    }
}

/// Whole percent, truncated like ffmpeg users expect (99.9% is still 99%).
pub fn percent(progress: f64) -> u32 {
    (progress.clamp(0.0, 1.0) * 100.0) as u32
}

/// Incremental parser for `ffmpeg ... -progress pipe:2` output.
///
/// Feed it every stderr line; it yields a formatted report whenever the whole
/// percentage changes.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    label: String,
    bar_width: usize,
    duration: Option<f64>,
    last_percent: Option<u32>,
}

impl ProgressParser {
    /// `label` is the output name shown in front of the bar, already fitted.
    pub fn new(label: impl Into<String>, bar_width: usize) -> Self {
        Self {
            label: label.into(),
            bar_width,
            duration: None,
            last_percent: None,
        }
    }

    /// Input duration in seconds, once the `Duration:` banner has been seen.
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn feed(&mut self, line: &str) -> Option<String> {
        if let Some(rest) = after(line, "Duration: ") {
            let clock = rest.split(',').next().unwrap_or(rest);
            self.duration = parse_clock(clock).filter(|d| *d > 0.0);
            return None;
        }

        let rest = after(line, "out_time=")?;
        let elapsed = parse_clock(rest)?;
        let duration = self.duration?;

        let progress = (elapsed / duration).clamp(0.0, 1.0);
        let pct = percent(progress);
        if self.last_percent == Some(pct) {
            return None;
        }
        self.last_percent = Some(pct);
        Some(format!(
            "{} {} {}%",
            self.label,
            progress_bar(self.bar_width, progress),
            pct
        ))
    }
}

fn after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker).map(|pos| &line[pos + marker.len()..])
}
