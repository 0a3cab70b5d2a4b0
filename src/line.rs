//! A single live line of terminal text.
//!
//! A [`LineStream`] is owned by exactly one producer. Anything else that wants
//! to look at the line (the renderer, in practice) gets a [`LineObserver`],
//! which can read the text and tell whether the line is still alive but never
//! keeps it alive.

use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Callback invoked with the line's text.
pub type Subscriber = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Default)]
struct LineCell {
    text: Mutex<String>,
}

impl LineCell {
    fn read(&self) -> String {
        self.text.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn write(&self, text: &str) {
        let mut guard = self.text.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clear();
        guard.push_str(text);
    }
}

/// Owning handle to one line of output.
///
/// The handle is deliberately not `Clone`: whoever holds it is the only writer.
/// Closing consumes the handle, so a line can never be updated after close.
/// Dropping an unclosed handle closes it.
pub struct LineStream {
    cell: Option<Arc<LineCell>>,
    on_update: Vec<Subscriber>,
    on_close: Vec<Subscriber>,
}

impl LineStream {
    /// Create a line seeded with `initial`.
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            cell: Some(Arc::new(LineCell {
                text: Mutex::new(initial.into()),
            })),
            on_update: Vec::new(),
            on_close: Vec::new(),
        }
    }

    /// Register a callback run after every [`update`](Self::update).
    pub fn on_update<F>(&mut self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_update.push(Box::new(f));
    }

    /// Register a callback run once, with the final text, when the line closes.
    pub fn on_close<F>(&mut self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_close.push(Box::new(f));
    }

    /// Replace the text and notify update subscribers in registration order.
    ///
    /// The text lock is released before any subscriber runs, so a subscriber
    /// may read this line (directly or through an observer) without deadlock.
    pub fn update(&self, text: &str) {
        let Some(cell) = &self.cell else { return };
        cell.write(text);
        for subscriber in &self.on_update {
            subscriber(text);
        }
    }

    /// Current text.
    pub fn text(&self) -> String {
        self.cell.as_ref().map(|c| c.read()).unwrap_or_default()
    }

    /// Non-owning view of this line.
    pub fn observe(&self) -> LineObserver {
        LineObserver {
            cell: self.cell.as_ref().map(Arc::downgrade).unwrap_or_default(),
        }
    }

    /// Close the line: run close subscribers with the final text, then release it.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(cell) = self.cell.take() else { return };
        let text = cell.read();
        for subscriber in self.on_close.drain(..) {
            subscriber(&text);
        }
        // Observers expire only after every close subscriber has seen the text.
        drop(cell);
    }
}

impl Drop for LineStream {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LineStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineStream")
            .field("text", &self.text())
            .field("on_update", &self.on_update.len())
            .field("on_close", &self.on_close.len())
            .finish()
    }
}

/// Weak view of a [`LineStream`] that never extends its lifetime.
#[derive(Debug, Clone, Default)]
pub struct LineObserver {
    cell: Weak<LineCell>,
}

impl LineObserver {
    pub fn is_live(&self) -> bool {
        self.cell.strong_count() > 0
    }

    /// Current text, or `None` once the line has been released.
    pub fn text(&self) -> Option<String> {
        self.cell.upgrade().map(|c| c.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        (log, move |s: &str| sink.lock().unwrap().push(s.to_string()))
    }

    #[test]
    fn test_update_replaces_text() {
        let line = LineStream::new("start");
        assert_eq!(line.text(), "start");
        line.update("10%");
        line.update("20%");
        assert_eq!(line.text(), "20%");
    }

    #[test]
    fn test_update_subscribers_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut line = LineStream::new("");
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            line.on_update(move |text| order.lock().unwrap().push(format!("{tag}:{text}")));
        }
        line.update("x");
        assert_eq!(
            *order.lock().unwrap(),
            vec!["first:x", "second:x", "third:x"]
        );
    }

    #[test]
    fn test_close_fires_once_with_last_text() {
        let (log, record) = recorder();
        let mut line = LineStream::new("");
        line.on_close(record);
        line.update("a");
        line.update("b");
        line.close();
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_drop_closes_line() {
        let (log, record) = recorder();
        {
            let mut line = LineStream::new("seed");
            line.on_close(record);
        }
        assert_eq!(*log.lock().unwrap(), vec!["seed"]);
    }

    #[test]
    fn test_close_runs_before_release() {
        let mut line = LineStream::new("");
        let inside = line.observe();
        let outside = line.observe();
        let seen_live = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&seen_live);
        line.on_close(move |text| {
            *seen.lock().unwrap() = Some((inside.is_live(), inside.text(), text.to_string()));
        });
        line.update("final");
        assert!(outside.is_live());
        line.close();

        let (live, observed, text) = seen_live.lock().unwrap().clone().unwrap();
        assert!(live);
        assert_eq!(observed.as_deref(), Some("final"));
        assert_eq!(text, "final");
        assert!(!outside.is_live());
        assert_eq!(outside.text(), None);
    }

    #[test]
    fn test_subscriber_may_read_line_during_update() {
        let mut line = LineStream::new("");
        let observer = line.observe();
        let (log, record) = recorder();
        line.on_update(move |_| record(&observer.text().unwrap_or_default()));
        line.update("visible");
        assert_eq!(*log.lock().unwrap(), vec!["visible"]);
    }

    #[test]
    fn test_observer_does_not_keep_line_alive() {
        let line = LineStream::new("x");
        let observer = line.observe();
        drop(line);
        assert!(!observer.is_live());
        assert!(LineObserver::default().text().is_none());
    }
}
