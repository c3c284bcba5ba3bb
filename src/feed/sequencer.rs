use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Identifies one issued fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

/// Monotonic request ids; only the most recently issued ticket may commit.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    latest: AtomicU64,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> Ticket {
        Ticket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_latest(&self, ticket: Ticket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }
}

/// Trailing-edge debounce: a pushed value settles only if nothing newer
/// arrives within the window.
#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    slot: Mutex<(u64, Option<T>)>,
}

impl<T: Clone> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self { window, slot: Mutex::new((0, None)) }
    }

    /// Records `value` and returns its generation.
    pub fn push(&self, value: T) -> u64 {
        let mut slot = self.slot.lock().unwrap();
        slot.0 += 1;
        slot.1 = Some(value);
        slot.0
    }

    /// Waits out the window; `None` when a newer value superseded `generation`.
    pub async fn settle(&self, generation: u64) -> Option<T> {
        tokio::time::sleep(self.window).await;
        let slot = self.slot.lock().unwrap();
        if slot.0 == generation {
            slot.1.clone()
        } else {
            None
        }
    }
}
