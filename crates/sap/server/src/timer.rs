//! Disconnect timers
//!
//! The session arms at most one timer at a time. Scheduling is abstracted
//! behind [`Scheduler`] so tests can fire timers by hand.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, after, bounded, select};
use parking_lot::Mutex;
use tracing::{error, trace};

/// Work run when a timer fires
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Wrap a scheduler specific id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Scheduler specific id
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// One-shot timer service
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay` unless cancelled first
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;

    /// Cancel a timer; cancelling a fired or unknown timer does nothing
    fn cancel(&self, handle: TimerHandle);
}

/// Scheduler backed by one short-lived thread per timer
#[derive(Debug, Default)]
pub struct ThreadScheduler {
    next_id: AtomicU64,
    timers: Arc<Mutex<HashMap<u64, Sender<()>>>>,
}

impl ThreadScheduler {
    /// Create a new scheduler
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        self.timers.lock().insert(id, cancel_tx);

        let timers = Arc::clone(&self.timers);
        let spawned = thread::Builder::new()
            .name("sap-timer".into())
            .spawn(move || {
                select! {
                    // Dropping the sender disconnects the channel
                    recv(cancel_rx) -> _ => trace!(id, "Timer cancelled"),
                    recv(after(delay)) -> _ => {
                        // Losing the race against cancel() means the timer was cancelled
                        if timers.lock().remove(&id).is_some() {
                            task();
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "Unable to spawn timer thread");
            self.timers.lock().remove(&id);
        }

        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        self.timers.lock().remove(&handle.0);
    }
}
