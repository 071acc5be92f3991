//! Correlation of modem requests with their responses

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::message::MessageKind;

/// Outstanding modem requests keyed by token
///
/// Shared between the thread that sends requests and the thread that decodes
/// responses. Tokens are handed out from a counter that starts at 1 and never
/// repeats within a session.
#[derive(Debug)]
pub struct PendingRequests {
    next_token: AtomicU32,
    requests: Mutex<HashMap<u32, MessageKind>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    /// Empty table
    pub fn new() -> Self {
        Self {
            next_token: AtomicU32::new(1),
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next token
    pub fn next_token(&self) -> u32 {
        self.next_token.fetch_add(1, Ordering::Relaxed)
    }

    /// Record that `token` was sent for a request of `kind`
    pub fn insert(&self, token: u32, kind: MessageKind) {
        if let Some(previous) = self.requests.lock().insert(token, kind) {
            debug!(token, %previous, "Token reused while still pending");
        }
    }

    /// Remove and return the request kind for `token`
    pub fn take(&self, token: u32) -> Option<MessageKind> {
        self.requests.lock().remove(&token)
    }

    /// Forget every outstanding request, returning how many were dropped
    pub fn clear_all(&self) -> usize {
        let mut requests = self.requests.lock();
        let dropped = requests.len();
        requests.clear();
        dropped
    }

    /// Number of outstanding requests
    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    /// Whether no request is outstanding
    pub fn is_empty(&self) -> bool {
        self.requests.lock().is_empty()
    }
}
