use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::task::AbortHandle;

/// In-flight answer streams keyed by conversation id. Registering a new
/// stream for a key aborts the one it replaces.
#[derive(Default)]
pub struct ActiveStreams {
    next_ticket: AtomicU64,
    streams: Mutex<HashMap<String, (u64, AbortHandle)>>,
}

impl ActiveStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a ticket to hand back to `finish`.
    pub fn register(&self, key: &str, handle: AbortHandle) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let previous = match self.streams.lock() {
            Ok(mut streams) => streams.insert(key.to_string(), (ticket, handle)),
            Err(poisoned) => poisoned
                .into_inner()
                .insert(key.to_string(), (ticket, handle)),
        };

        if let Some((_, old)) = previous {
            tracing::info!(conversation_id = key, "Superseding in-flight answer stream");
            old.abort();
        }
        ticket
    }

    /// Forgets the stream if `ticket` is still the current one for `key`.
    pub fn finish(&self, key: &str, ticket: u64) {
        let mut streams = match self.streams.lock() {
            Ok(streams) => streams,
            Err(poisoned) => poisoned.into_inner(),
        };
        if streams.get(key).is_some_and(|(current, _)| *current == ticket) {
            streams.remove(key);
        }
    }

    /// Aborts the current stream for `key`, if any.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = match self.streams.lock() {
            Ok(mut streams) => streams.remove(key),
            Err(poisoned) => poisoned.into_inner().remove(key),
        };
        match removed {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.streams.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
