use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `interval` unless `cancel` fires first.
///
/// Returns `false` when the wait was cut short by cancellation.
pub async fn sleep_or_cancelled(interval: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

/// Child of `parent` that is also cancelled once `timeout` elapses.
pub fn with_deadline(parent: &CancellationToken, timeout: Option<Duration>) -> CancellationToken {
    let child = parent.child_token();
    if let Some(timeout) = timeout {
        let deadline = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = deadline.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    tracing::warn!("Query deadline of {:?} reached, cancelling", timeout);
                    deadline.cancel();
                }
            }
        });
    }
    child
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    #[tokio::test]
    async fn test_sleep_wakes_on_cancel() {
        let cancel = CancellationToken::new();
        let mut wait = task::spawn(sleep_or_cancelled(Duration::from_secs(60), &cancel));

        assert_pending!(wait.poll());
        cancel.cancel();
        assert!(wait.is_woken());
        assert_ready_eq!(wait.poll(), false);
    }

    #[tokio::test]
    async fn test_sleep_completes() {
        let cancel = CancellationToken::new();
        assert!(sleep_or_cancelled(Duration::from_millis(5), &cancel).await);
    }

    #[tokio::test]
    async fn test_cancelled_sleep_returns_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        assert!(!sleep_or_cancelled(Duration::from_secs(30), &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_deadline_cancels_child_only() {
        let parent = CancellationToken::new();
        let child = with_deadline(&parent, Some(Duration::from_millis(10)));
        tokio::time::timeout(Duration::from_secs(5), child.cancelled())
            .await
            .unwrap();
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_parent_cancellation_reaches_child() {
        let parent = CancellationToken::new();
        let child = with_deadline(&parent, None);
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
