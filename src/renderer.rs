//! Multiplexed terminal renderer.
//!
//! The renderer keeps a live region at the bottom of the terminal: an optional
//! header followed by one row per open [`LineStream`]. Every change redraws the
//! whole region by moving the cursor up over the rows drawn last time, erasing
//! them, and writing the new snapshot. When a line closes its final text is
//! written once above the live region and becomes ordinary scrollback.
//!
//! All registry changes and all writes to the sink happen under one mutex, so
//! output from different workers never interleaves and every snapshot is
//! consistent.
//!
//! When several lines close at nearly the same time, each close removes its own
//! registry entry, but the order of their scrollback rows is the order in which
//! the closing threads win the lock. That order is not specified.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::line::{LineObserver, LineStream};

/// Erase the current row.
pub const ERASE_LINE: &str = "\x1b[2K";
/// Move the cursor up one row.
pub const CURSOR_UP: &str = "\x1b[1A";

/// Identity of a registered line, unique for the renderer's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineId(u64);

struct Entry {
    id: LineId,
    line: LineObserver,
}

struct RenderState {
    out: Box<dyn Write + Send>,
    header: String,
    lines: Vec<Entry>,
    /// Rows written by the last redraw; exactly this many get erased next time.
    drawn: usize,
}

impl RenderState {
    fn erase(&mut self) -> io::Result<()> {
        if self.drawn > 0 {
            let mut seq = String::with_capacity(ERASE_LINE.len() + self.drawn * 8 + 1);
            seq.push_str(ERASE_LINE);
            for _ in 0..self.drawn {
                seq.push_str(CURSOR_UP);
                seq.push_str(ERASE_LINE);
            }
            seq.push('\r');
            self.out.write_all(seq.as_bytes())?;
        }
        self.drawn = 0;
        Ok(())
    }

    fn paint(&mut self) -> io::Result<()> {
        let mut frame = String::new();
        let mut rows = 0;
        if !self.header.is_empty() {
            frame.push_str(&self.header);
            frame.push('\n');
            rows += 1;
        }
        for entry in &self.lines {
            // An entry whose line is already gone still owns its row until removed.
            frame.push_str(&entry.line.text().unwrap_or_default());
            frame.push('\n');
            rows += 1;
        }
        self.out.write_all(frame.as_bytes())?;
        self.drawn = rows;
        self.out.flush()
    }

    fn redraw(&mut self) -> io::Result<()> {
        self.erase()?;
        self.paint()
    }

    fn retire(&mut self, id: LineId, final_text: &str) -> io::Result<()> {
        let Some(pos) = self.lines.iter().position(|e| e.id == id) else {
            return Ok(());
        };
        self.lines.remove(pos);
        self.erase()?;
        self.out.write_all(final_text.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.paint()
    }
}

/// Shared renderer. Create it once per run and hand an `Arc` to every worker.
pub struct Renderer {
    state: Mutex<RenderState>,
    next_id: AtomicU64,
}

impl Renderer {
    /// Create a renderer writing to `sink`. A non-empty header is drawn at once.
    pub fn new(header: impl Into<String>, sink: Box<dyn Write + Send>) -> Arc<Self> {
        let mut state = RenderState {
            out: sink,
            header: header.into(),
            lines: Vec::new(),
            drawn: 0,
        };
        if let Err(e) = state.paint() {
            debug!(error = %e, "failed to draw initial header");
        }
        Arc::new(Self {
            state: Mutex::new(state),
            next_id: AtomicU64::new(0),
        })
    }

    /// Renderer drawing to the process's standard output.
    pub fn stdout(header: impl Into<String>) -> Arc<Self> {
        Self::new(header, Box::new(io::stdout()))
    }

    /// Register a new line at the bottom of the live region and return it.
    ///
    /// The caller owns the line; the renderer only observes it. Updates to the
    /// line redraw the region and closing it moves its text into scrollback.
    pub fn acquire_line(self: &Arc<Self>, initial: impl Into<String>) -> LineStream {
        let mut line = LineStream::new(initial);
        let id = LineId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let renderer = Arc::clone(self);
        line.on_update(move |_| renderer.redraw());
        let renderer = Arc::clone(self);
        line.on_close(move |text| renderer.retire(id, text));

        let mut state = self.lock();
        state.lines.push(Entry {
            id,
            line: line.observe(),
        });
        if let Err(e) = state.redraw() {
            debug!(error = %e, "redraw after acquire failed");
        }
        drop(state);
        line
    }

    /// Replace the header and redraw.
    pub fn set_header(&self, text: impl Into<String>) {
        let mut state = self.lock();
        state.header = text.into();
        if let Err(e) = state.redraw() {
            debug!(error = %e, "redraw after header change failed");
        }
    }

    pub fn header(&self) -> String {
        self.lock().header.clone()
    }

    /// Number of lines currently in the live region.
    pub fn live_lines(&self) -> usize {
        self.lock().lines.len()
    }

    fn redraw(&self) {
        if let Err(e) = self.lock().redraw() {
            debug!(error = %e, "redraw failed");
        }
    }

    fn retire(&self, id: LineId, final_text: &str) {
        if let Err(e) = self.lock().retire(id, final_text) {
            debug!(error = %e, ?id, "failed to retire line");
        }
    }

    fn lock(&self) -> MutexGuard<'_, RenderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Renderer")
            .field("header", &state.header)
            .field("lines", &state.lines.len())
            .field("drawn", &state.drawn)
            .finish()
    }
}
