use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

/// Live streams keyed by stream id, each holding a cancellation flag.
///
/// Shared between the task that streams and whoever may cancel it. A
/// session's flag only ever goes from `false` to `true`.
#[derive(Default)]
pub struct StreamRegistry {
    sessions: DashMap<String, AtomicBool>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh, non-cancelled session.
    ///
    /// Returns `false` and leaves the existing session untouched when the id
    /// is already live.
    pub fn open(&self, stream_id: &str) -> bool {
        match self.sessions.entry(stream_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(AtomicBool::new(false));
                debug!(stream_id, "stream session opened");
                true
            }
        }
    }

    /// Flags the session as cancelled. Returns whether it existed.
    pub fn cancel(&self, stream_id: &str) -> bool {
        match self.sessions.get(stream_id) {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                debug!(stream_id, "stream session cancelled");
                true
            }
            None => false,
        }
    }

    /// Unknown ids read as not cancelled.
    pub fn is_cancelled(&self, stream_id: &str) -> bool {
        self.sessions
            .get(stream_id)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    pub fn close(&self, stream_id: &str) {
        if self.sessions.remove(stream_id).is_some() {
            debug!(stream_id, "stream session closed");
        }
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.sessions.contains_key(stream_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn open_cancel_close_lifecycle() {
        let registry = StreamRegistry::new();
        assert!(registry.open("s1"));
        assert!(!registry.is_cancelled("s1"));
        assert!(registry.cancel("s1"));
        assert!(registry.is_cancelled("s1"));
        registry.close("s1");
        assert!(!registry.contains("s1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn second_open_keeps_existing_session() {
        let registry = StreamRegistry::new();
        assert!(registry.open("s1"));
        registry.cancel("s1");
        assert!(!registry.open("s1"));
        assert!(registry.is_cancelled("s1"), "cancellation must not be reset");
    }

    #[test]
    fn cancel_is_idempotent_and_unknown_ids_are_noops() {
        let registry = StreamRegistry::new();
        assert!(!registry.cancel("missing"));
        assert!(!registry.is_cancelled("missing"));

        registry.open("s1");
        assert!(registry.cancel("s1"));
        assert!(registry.cancel("s1"));
        registry.close("s1");
        assert!(!registry.cancel("s1"));
        registry.close("s1");
    }

    #[test]
    fn concurrent_cancel_is_observed_by_reader() {
        let registry = Arc::new(StreamRegistry::new());
        registry.open("shared");
        let canceller = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.cancel("shared"))
        };
        assert!(canceller.join().expect("join"));
        assert!(registry.is_cancelled("shared"));
    }
}
