//! Coalesces bursts of change signals into a single action.
//!
//! One pending timer: the first signal arms it, every further signal
//! re-arms it, and the action runs once the channel has been quiet for the
//! configured delay. Signals that arrive while the action runs start the
//! next burst, so actions never overlap.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Consume `rx` until every sender is dropped, calling `action` once per
/// quiet period. A burst still pending when the channel closes is flushed.
pub async fn run<F, Fut>(mut rx: mpsc::Receiver<()>, delay: Duration, mut action: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    while rx.recv().await.is_some() {
        let mut signals = 1usize;
        let closed = loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(()) => signals += 1,
                    None => break true,
                },
                _ = tokio::time::sleep(delay) => break false,
            }
        };

        tracing::debug!(signals, "debounce window elapsed");
        action().await;
        if closed {
            break;
        }
    }
}
