//! Cancellation and deadline context passed down every execution path.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a context stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interruption {
    DeadlineExceeded,
    Cancelled,
}

/// Caller-owned cancellation token plus optional deadline
#[derive(Clone, Debug, Default)]
pub struct ExecutionContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    /// Context with no deadline that is never cancelled unless asked to
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().bounded(Some(timeout))
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// Child context whose deadline is min(self deadline, now + timeout).
    /// A timeout too large to represent adds no deadline. Cancelling the
    /// parent cancels the child, not the reverse.
    pub fn bounded(&self, timeout: Option<Duration>) -> Self {
        let child = Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        };
        match timeout.and_then(|t| Instant::now().checked_add(t)) {
            Some(deadline) => child.with_deadline(deadline),
            None => child,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is already done, if it is
    pub fn interruption(&self) -> Option<Interruption> {
        if self.token.is_cancelled() {
            return Some(Interruption::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d => Some(Interruption::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves when the context is cancelled or its deadline passes
    pub async fn done(&self) -> Interruption {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Interruption::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => Interruption::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Interruption::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_is_not_done() {
        let ctx = ExecutionContext::background();
        assert!(ctx.interruption().is_none());
        assert!(ctx.deadline().is_none());
    }

    #[tokio::test]
    async fn test_bounded_takes_earliest_deadline() {
        let parent = ExecutionContext::with_timeout(Duration::from_millis(50));
        let child = parent.bounded(Some(Duration::from_secs(30)));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.bounded(Some(Duration::from_millis(1)));
        assert!(tighter.deadline().unwrap() < parent.deadline().unwrap());
    }

    #[tokio::test]
    async fn test_parent_cancel_propagates() {
        let parent = ExecutionContext::background();
        let child = parent.bounded(None);
        parent.cancel();
        assert_eq!(child.interruption(), Some(Interruption::Cancelled));
        assert_eq!(child.done().await, Interruption::Cancelled);
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_reach_parent() {
        let parent = ExecutionContext::background();
        let child = parent.bounded(None);
        child.cancel();
        assert!(parent.interruption().is_none());
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_adds_no_deadline() {
        let ctx = ExecutionContext::background().bounded(Some(Duration::from_secs(u64::MAX / 2)));
        assert!(ctx.deadline().is_none());
        assert!(ctx.interruption().is_none());

        let parent = ExecutionContext::with_timeout(Duration::from_secs(5));
        let child = parent.bounded(Some(Duration::MAX));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn test_deadline_resolves() {
        let ctx = ExecutionContext::with_timeout(Duration::from_millis(10));
        assert_eq!(ctx.done().await, Interruption::DeadlineExceeded);
        assert_eq!(ctx.interruption(), Some(Interruption::DeadlineExceeded));
    }
}
