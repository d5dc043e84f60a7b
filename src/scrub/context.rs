//! Cancellation and nesting state threaded through every scrub entry point

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, shared between the thread running a
/// scrub and whoever wants to stop it.
///
/// The only cross-thread shared state in the engine; relaxed ordering is
/// enough since eventual visibility is all cancellation needs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask running scrubs to unwind at the next split boundary
    pub fn request_abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn abort_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Re-arm the token for another run
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Per-session scrub state: the cancellation token and a nesting counter
/// letting callers detect that a scrub is already in progress. Passed
/// explicitly so independent sessions never share state.
#[derive(Debug, Default)]
pub struct ScrubContext {
    cancel: CancelToken,
    depth: Cell<usize>,
}

impl ScrubContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context around an externally held token
    pub fn with_token(cancel: CancelToken) -> Self {
        Self {
            cancel,
            depth: Cell::new(0),
        }
    }

    /// A handle on the cancellation token, for handing to another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.abort_requested()
    }

    /// Whether any scrub driver is currently on the stack
    pub fn scrub_in_progress(&self) -> bool {
        self.depth.get() > 0
    }

    /// Mark a driver as running until the guard drops
    pub(crate) fn enter(&self) -> DepthGuard<'_> {
        self.depth.set(self.depth.get() + 1);
        DepthGuard(self)
    }
}

pub(crate) struct DepthGuard<'a>(&'a ScrubContext);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        let depth = self.0.depth.get();
        self.0.depth.set(depth.saturating_sub(1));
    }
}

/// Percent of `current` out of `total` for progress reporting
pub(crate) fn percent_complete(current: usize, total: usize) -> i32 {
    if total == 0 {
        100
    } else {
        ((100 * current) / total) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(!token.abort_requested());
        handle.request_abort();
        assert!(token.abort_requested());
        token.reset();
        assert!(!handle.abort_requested());
    }

    #[test]
    fn test_depth_guard_tracks_nesting() {
        let ctx = ScrubContext::new();
        assert!(!ctx.scrub_in_progress());
        {
            let _outer = ctx.enter();
            assert!(ctx.scrub_in_progress());
            {
                let _inner = ctx.enter();
                assert!(ctx.scrub_in_progress());
            }
            assert!(ctx.scrub_in_progress());
        }
        assert!(!ctx.scrub_in_progress());
    }

    #[test]
    fn test_percent_complete() {
        assert_eq!(percent_complete(0, 40), 0);
        assert_eq!(percent_complete(10, 40), 25);
        assert_eq!(percent_complete(0, 0), 100);
    }
}
