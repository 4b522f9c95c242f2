//! Per-request context: caller identity, cancellation and deadline.
//!
//! Every repository and evaluator call takes a `&RequestContext`; every I/O
//! future it issues is wrapped in [`RequestContext::guard`] so a cancelled or
//! expired request abandons in-flight work.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use erpguard_core::DomainError;

use crate::Principal;

#[derive(Debug, Clone)]
pub struct RequestContext {
    principal: Option<Principal>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context with no identity and no deadline (background jobs, tests).
    pub fn background() -> Self {
        Self {
            principal: None,
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            ..Self::background()
        }
    }

    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Run `fut` until it completes, the context is cancelled, or the deadline
    /// passes. The latter two yield [`DomainError::Canceled`].
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, DomainError> {
        if self.is_cancelled() {
            return Err(DomainError::Canceled);
        }

        match self.deadline {
            Some(deadline) => tokio::select! {
                out = fut => Ok(out),
                _ = self.cancel.cancelled() => Err(DomainError::Canceled),
                _ = tokio::time::sleep_until(deadline) => Err(DomainError::Canceled),
            },
            None => tokio::select! {
                out = fut => Ok(out),
                _ = self.cancel.cancelled() => Err(DomainError::Canceled),
            },
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_when_not_cancelled() {
        let ctx = RequestContext::background();
        assert_eq!(ctx.guard(async { 5 }).await, Ok(5));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let ctx = RequestContext::background();
        ctx.cancel();
        let out = ctx.guard(async { 5 }).await;
        assert_eq!(out, Err(DomainError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_abandons_slow_future() {
        let ctx = RequestContext::with_timeout(Duration::from_millis(50));
        let slow = tokio::time::sleep(Duration::from_secs(10));
        assert_eq!(ctx.guard(slow).await, Err(DomainError::Canceled));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_from_another_task_interrupts() {
        let ctx = RequestContext::background();
        let token = ctx.cancellation_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let pending = std::future::pending::<()>();
        assert_eq!(ctx.guard(pending).await, Err(DomainError::Canceled));
    }
}
