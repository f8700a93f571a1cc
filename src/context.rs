//! Per-request cancellation and deadlines
//!
//! Every collaborator call made on behalf of a request goes through
//! [`RequestContext::guard`], so a cancelled or expired request stops at the
//! next step of the embedding → vector query → record load chain.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{MembankError, Result, Service};

/// Cancellation token plus optional deadline for one handler invocation
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that never expires and is only cancelled explicitly
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Share cancellation with a transport-level token
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Tighten the deadline; an earlier existing deadline wins
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail fast before starting a step against `service`
    pub fn check(&self, service: Service) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(MembankError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(MembankError::unavailable(service, "deadline exceeded"));
        }
        Ok(())
    }

    /// Run a collaborator call, racing it against cancellation and the deadline
    pub async fn guard<T, F>(&self, service: Service, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(service)?;

        let deadline = self.deadline;
        let run = async move {
            match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(MembankError::unavailable(service, "deadline exceeded")),
                },
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(MembankError::Cancelled),
            result = run => result,
        }
    }
}
