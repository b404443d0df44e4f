//! Cooperative cancellation.
//!
//! A [`CancelToken`] is a cloneable handle around a shared flag. One clone is
//! handed to a signal handler (e.g. Ctrl+C), another to the long-running
//! loop, which polls it at well-defined points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Visible to every clone.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let handler_side = token.clone();
        assert!(!token.is_cancelled());

        handler_side.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_from_other_thread() {
        let token = CancelToken::new();
        let t = token.clone();
        std::thread::spawn(move || t.cancel()).join().unwrap();
        assert!(token.is_cancelled());
    }
}
