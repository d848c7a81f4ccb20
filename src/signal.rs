//! The combined abort signal of one attempt.

use crate::registry::CancellationHandle;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Reason reported when the caller's own token aborts an attempt.
pub(crate) const EXTERNAL_ABORT_REASON: &str = "The operation was aborted.";

/// Why an attempt stopped before its transport call finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Abort {
    Timeout(Duration),
    Cancelled(String),
}

/// Combines the registry handle, the caller's token and the timeout deadline.
pub(crate) struct AttemptSignal {
    handle: CancellationHandle,
    external: Option<CancellationToken>,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl AttemptSignal {
    /// The timeout clock starts here.
    pub(crate) fn new(
        handle: CancellationHandle,
        external: Option<CancellationToken>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            handle,
            external,
            timeout,
            deadline: timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    /// Returns the abort that has already happened, if any.
    pub(crate) fn check(&self) -> Option<Abort> {
        if self.handle.is_aborted() {
            return Some(self.handle_abort());
        }
        if self.external.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Some(Abort::Cancelled(EXTERNAL_ABORT_REASON.to_string()));
        }
        match (self.deadline, self.timeout) {
            (Some(deadline), Some(timeout)) if Instant::now() >= deadline => {
                Some(Abort::Timeout(timeout))
            }
            _ => None,
        }
    }

    /// Runs `future` until it finishes or the signal fires, whichever is first.
    pub(crate) async fn race<F: Future>(&self, future: F) -> Result<F::Output, Abort> {
        tokio::select! {
            biased;
            abort = self.fired() => Err(abort),
            output = future => Ok(output),
        }
    }

    async fn fired(&self) -> Abort {
        let external = async {
            match &self.external {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.handle.aborted() => self.handle_abort(),
            _ = external => Abort::Cancelled(EXTERNAL_ABORT_REASON.to_string()),
            _ = deadline => Abort::Timeout(self.timeout.unwrap_or_default()),
        }
    }

    fn handle_abort(&self) -> Abort {
        Abort::Cancelled(
            self.handle
                .reason()
                .unwrap_or(EXTERNAL_ABORT_REASON)
                .to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_future_wins_without_abort() {
        let signal = AttemptSignal::new(CancellationHandle::new(), None, None);
        assert_eq!(signal.race(async { 7 }).await, Ok(7));
        assert_eq!(signal.check(), None);
    }

    #[tokio::test]
    async fn test_timeout_fires() {
        let signal = AttemptSignal::new(
            CancellationHandle::new(),
            None,
            Some(Duration::from_millis(20)),
        );
        let result = signal
            .race(tokio::time::sleep(Duration::from_millis(500)))
            .await;
        assert_eq!(result, Err(Abort::Timeout(Duration::from_millis(20))));
        assert!(signal.check().is_some());
    }

    #[tokio::test]
    async fn test_external_token_cancels() {
        let token = CancellationToken::new();
        let signal = AttemptSignal::new(CancellationHandle::new(), Some(token.clone()), None);
        token.cancel();

        let result = signal.race(std::future::pending::<()>()).await;
        assert_eq!(
            result,
            Err(Abort::Cancelled(EXTERNAL_ABORT_REASON.to_string()))
        );
    }

    #[tokio::test]
    async fn test_handle_abort_reports_reason() {
        let handle = CancellationHandle::new();
        let signal = AttemptSignal::new(handle.clone(), None, Some(Duration::from_secs(5)));
        handle.abort("superseded");

        let result = signal.race(std::future::pending::<()>()).await;
        assert_eq!(result, Err(Abort::Cancelled("superseded".to_string())));
    }
}
