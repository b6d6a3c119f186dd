use std::sync::Arc;

use gdrive_core::{ApiErrorClass, DriveClient, DriveError, RequestSpec};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::limiter::ConcurrencyLimiter;
use super::timeout::TimeoutPolicy;
use crate::credentials::{CredentialError, CredentialMode, CredentialPool};

#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Drive(#[from] DriveError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl AttemptError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AttemptError::Drive(err) if err.is_rate_limited())
    }

    fn is_permanent(&self) -> bool {
        matches!(self, AttemptError::Drive(err) if err.classification() == ApiErrorClass::Permanent)
    }
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("no credentials available")]
    NoCredentials,
    #[error("request failed after {attempts} attempt(s): {last}")]
    RequestFailed { attempts: u32, last: AttemptError },
    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ExecuteError {
    pub fn is_no_credentials(&self) -> bool {
        matches!(self, ExecuteError::NoCredentials)
    }
}

enum Attempt {
    Done(Value),
    Fatal(ExecuteError),
    Failed(AttemptError),
}

/// Runs remote calls through the shared limiter with bounded retries.
///
/// Every attempt draws a fresh token from the credential pool, so a
/// rate-limited identity is replaced on the next attempt. The timeout for
/// attempt `n` comes from [`TimeoutPolicy::for_attempt`]; there is no sleep
/// between attempts.
#[derive(Clone)]
pub struct RequestExecutor {
    client: DriveClient,
    credentials: Arc<CredentialPool>,
    limiter: ConcurrencyLimiter,
    timeouts: TimeoutPolicy,
    retry_limit: u32,
}

impl RequestExecutor {
    pub fn new(
        client: DriveClient,
        credentials: Arc<CredentialPool>,
        limiter: ConcurrencyLimiter,
        timeouts: TimeoutPolicy,
        retry_limit: u32,
    ) -> Self {
        Self {
            client,
            credentials,
            limiter,
            timeouts,
            retry_limit: retry_limit.max(1),
        }
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn credentials(&self) -> &Arc<CredentialPool> {
        &self.credentials
    }

    pub async fn execute(
        &self,
        spec: &RequestSpec,
        mode: CredentialMode,
    ) -> Result<Value, ExecuteError> {
        self.limiter.schedule(self.retry_loop(spec, mode)).await
    }

    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
        mode: CredentialMode,
    ) -> Result<T, ExecuteError> {
        let value = self.execute(spec, mode).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn retry_loop(
        &self,
        spec: &RequestSpec,
        mode: CredentialMode,
    ) -> Result<Value, ExecuteError> {
        let mut attempts = 0;
        loop {
            let err = match self.attempt(spec, mode, attempts).await {
                Attempt::Done(value) => return Ok(value),
                Attempt::Fatal(err) => return Err(err),
                Attempt::Failed(err) => err,
            };
            attempts += 1;
            if attempts >= self.retry_limit || err.is_permanent() {
                warn!(
                    method = %spec.method,
                    path = %spec.path,
                    attempts,
                    error = %err,
                    "request failed"
                );
                return Err(ExecuteError::RequestFailed {
                    attempts,
                    last: err,
                });
            }
            debug!(path = %spec.path, attempts, error = %err, "retrying request");
        }
    }

    async fn attempt(&self, spec: &RequestSpec, mode: CredentialMode, attempt: u32) -> Attempt {
        let lease = match self.credentials.acquire(mode).await {
            Ok(lease) => lease,
            Err(CredentialError::NoCredentialsAvailable) => {
                return Attempt::Fatal(ExecuteError::NoCredentials);
            }
            Err(err) => return Attempt::Failed(err.into()),
        };

        let timeout = self.timeouts.for_attempt(attempt);
        match self.client.send(spec, &lease.token, timeout).await {
            Ok(value) => Attempt::Done(value),
            Err(err) => {
                if err.is_rate_limited() {
                    warn!(path = %spec.path, pooled = lease.pooled, "rate limit reached");
                    if lease.pooled {
                        self.credentials.evict(lease.handle).await;
                    }
                } else if err.is_timeout() {
                    debug!(path = %spec.path, timeout_ms = timeout.as_millis() as u64, "request timed out");
                }
                Attempt::Failed(err.into())
            }
        }
    }
}
