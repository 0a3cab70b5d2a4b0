//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use webify::renderer::{CURSOR_UP, ERASE_LINE};

/// In-memory terminal sink that can be cloned and inspected while in use.
#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn since(&self, from: usize) -> String {
        self.contents()[from..].to_string()
    }
}

/// Number of rows erased in a chunk of renderer output.
pub fn erase_count(chunk: &str) -> usize {
    chunk.matches(CURSOR_UP).count()
}

/// Replay renderer output on a minimal terminal and return the visible rows,
/// without trailing blank rows.
pub fn screen(output: &str) -> Vec<String> {
    let mut rows = vec![String::new()];
    let mut row = 0usize;
    let mut rest = output;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix(CURSOR_UP) {
            row = row.saturating_sub(1);
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix(ERASE_LINE) {
            rows[row].clear();
            rest = tail;
        } else {
            let ch = rest.chars().next().unwrap();
            match ch {
                '\r' => {}
                '\n' => {
                    row += 1;
                    if rows.len() <= row {
                        rows.push(String::new());
                    }
                }
                c => rows[row].push(c),
            }
            rest = &rest[ch.len_utf8()..];
        }
    }
    while rows.last().is_some_and(String::is_empty) {
        rows.pop();
    }
    rows
}
