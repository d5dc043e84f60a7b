//! Traits for progress reporting and extensibility

/// Receives periodic progress from the account-tree batch drivers.
///
/// `percent` is in `[-1, 100]`; a call with `percent == -1` signals
/// completion regardless of the message.
pub trait ProgressReporter {
    fn report(&mut self, message: Option<&str>, percent: i32);
}

/// Progress reporter that discards everything, for silent runs
pub struct NullProgress;

impl ProgressReporter for NullProgress {
    fn report(&mut self, _message: Option<&str>, _percent: i32) {}
}

/// Adapter turning a closure into a [`ProgressReporter`]
///
/// ```
/// use ledger_scrub::traits::{ProgressFn, ProgressReporter};
///
/// let mut last = 0;
/// let mut progress = ProgressFn(|_message: Option<&str>, percent| last = percent);
/// progress.report(None, -1);
/// assert_eq!(last, -1);
/// ```
pub struct ProgressFn<F>(pub F);

impl<F> ProgressReporter for ProgressFn<F>
where
    F: FnMut(Option<&str>, i32),
{
    fn report(&mut self, message: Option<&str>, percent: i32) {
        (self.0)(message, percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fn_forwards() {
        let mut calls = Vec::new();
        {
            let mut progress =
                ProgressFn(|message: Option<&str>, percent| calls.push((message.map(str::to_string), percent)));
            progress.report(Some("halfway"), 50);
            progress.report(None, -1);
        }
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], (Some("halfway".to_string()), 50));
        assert_eq!(calls[1], (None, -1));
    }

    #[test]
    fn test_null_progress_is_silent() {
        let mut progress = NullProgress;
        progress.report(Some("ignored"), 10);
        progress.report(None, -1);
    }
}
