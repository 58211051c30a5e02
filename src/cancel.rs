//! Poll-able cancellation for streaming operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheap, cloneable cancellation token.
///
/// Streaming operations poll the token between buffered chunks and fail with
/// [`ZipError::Cancelled`](crate::result::ZipError::Cancelled) once it has
/// been triggered. Clones share the same flag, so a token handed to a worker
/// can be cancelled from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Trigger cancellation. All clones observe the change.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Returns whether [`CancelToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use super::CancelToken;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
