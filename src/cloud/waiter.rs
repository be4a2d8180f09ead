//! Polling of long-running compute operations.
//!
//! The waiter picks the zonal, regional or global operations endpoint from the
//! operation's self link and polls until the operation is `DONE`.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{CloudError, Result};

use super::compute::OperationClient;
use super::types::Operation;
use super::url::GoogleCloudUrl;

/// Default delay between polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default bound on a single wait.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Operations slower than this are logged in full.
const DEFAULT_LONG_OPERATION_THRESHOLD: Duration = Duration::from_secs(60);

/// Waiter tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterConfig {
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Maximum time spent waiting for one operation.
    pub timeout: Duration,
    /// Operations slower than this are logged with their full JSON.
    pub long_operation_threshold: Duration,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            long_operation_threshold: DEFAULT_LONG_OPERATION_THRESHOLD,
        }
    }
}

/// Waits for operations to finish.
pub struct OperationWaiter<'a> {
    /// Polling endpoint.
    operations: &'a dyn OperationClient,
    /// Tuning.
    config: WaiterConfig,
}

impl<'a> OperationWaiter<'a> {
    /// Creates a waiter polling through `operations`.
    #[must_use]
    pub const fn new(operations: &'a dyn OperationClient, config: WaiterConfig) -> Self {
        Self { operations, config }
    }

    /// Waits until `op` is done.
    ///
    /// # Errors
    ///
    /// Returns `OperationFailed` with the first sub-error if the operation failed,
    /// `Timeout` if it did not finish in time, or the polling error.
    pub async fn wait(&self, op: &Operation) -> Result<()> {
        if op.is_done() {
            return operation_result(op);
        }

        let url = GoogleCloudUrl::parse(&op.self_link)?;
        let start = Instant::now();
        let mut current = op.clone();

        while !current.is_done() {
            if start.elapsed() >= self.config.timeout {
                return Err(CloudError::Timeout {
                    operation: op.name.clone(),
                    waited_secs: start.elapsed().as_secs(),
                }
                .into());
            }

            tokio::time::sleep(self.config.poll_interval).await;

            match self.operations.get(&url.project, &url.scope, &url.name).await {
                Ok(polled) => {
                    debug!("Operation {} is {:?}", polled.name, polled.status);
                    current = polled;
                }
                Err(e) if e.is_retryable() => {
                    warn!("Transient error polling operation {}: {e}", op.name);
                }
                Err(e) => return Err(e),
            }
        }

        let elapsed = start.elapsed();
        if elapsed > self.config.long_operation_threshold {
            match serde_json::to_string(&current) {
                Ok(json) => info!("Operation {} took {}s: {json}", current.name, elapsed.as_secs()),
                Err(e) => warn!("Operation {} took {}s ({e})", current.name, elapsed.as_secs()),
            }
        }

        operation_result(&current)
    }

    /// Waits for each operation in turn.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub async fn wait_all(&self, ops: &[Operation]) -> Result<()> {
        for op in ops {
            self.wait(op).await?;
        }
        Ok(())
    }
}

/// Converts a finished operation into a result.
fn operation_result(op: &Operation) -> Result<()> {
    let Some(error) = op.error.as_ref() else {
        return Ok(());
    };
    match error.errors.first() {
        None => Err(CloudError::OperationFailed {
            operation: op.name.clone(),
            code: "UNKNOWN".to_string(),
            message: "operation reported an error without details".to_string(),
        }
        .into()),
        Some(first) if first.code == "RESOURCE_NOT_READY" => Err(CloudError::ResourceNotReady {
            message: first.message.clone(),
        }
        .into()),
        Some(first) => Err(CloudError::OperationFailed {
            operation: op.name.clone(),
            code: first.code.clone(),
            message: first.message.clone(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::compute::MockOperationClient;
    use crate::cloud::types::{OperationError, OperationErrorItem, OperationStatus};
    use crate::cloud::url::Scope;
    use crate::error::InfraError;

    fn op(status: OperationStatus) -> Operation {
        Operation {
            name: "op-1".into(),
            status,
            self_link: "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a/operations/op-1"
                .into(),
            ..Operation::default()
        }
    }

    #[tokio::test]
    async fn test_done_operation_returns_immediately() {
        let client = MockOperationClient::new();
        let waiter = OperationWaiter::new(&client, WaiterConfig::default());
        waiter.wait(&op(OperationStatus::Done)).await.expect("done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_zonal_endpoint_until_done() {
        let mut client = MockOperationClient::new();
        let mut calls = 0;
        client
            .expect_get()
            .withf(|project, scope, name| {
                project == "p" && *scope == Scope::Zone("us-central1-a".into()) && name == "op-1"
            })
            .times(2)
            .returning(move |_, _, _| {
                calls += 1;
                Ok(op(if calls < 2 {
                    OperationStatus::Running
                } else {
                    OperationStatus::Done
                }))
            });

        let waiter = OperationWaiter::new(&client, WaiterConfig::default());
        waiter.wait(&op(OperationStatus::Pending)).await.expect("done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_operation_surfaces_first_error() {
        let mut client = MockOperationClient::new();
        client.expect_get().returning(|_, _, _| {
            let mut done = op(OperationStatus::Done);
            done.error = Some(OperationError {
                errors: vec![
                    OperationErrorItem {
                        code: "QUOTA_EXCEEDED".into(),
                        message: "CPUS quota".into(),
                        location: None,
                    },
                    OperationErrorItem {
                        code: "OTHER".into(),
                        message: "ignored".into(),
                        location: None,
                    },
                ],
            });
            Ok(done)
        });

        let waiter = OperationWaiter::new(&client, WaiterConfig::default());
        let err = waiter
            .wait(&op(OperationStatus::Running))
            .await
            .expect_err("operation failed");
        match err {
            InfraError::Cloud(CloudError::OperationFailed { code, .. }) => {
                assert_eq!(code, "QUOTA_EXCEEDED");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_without_items_is_a_failure() {
        let client = MockOperationClient::new();
        let mut done = op(OperationStatus::Done);
        done.error = Some(OperationError { errors: Vec::new() });

        let waiter = OperationWaiter::new(&client, WaiterConfig::default());
        let err = waiter.wait(&done).await.expect_err("operation failed");
        assert!(matches!(
            err,
            InfraError::Cloud(CloudError::OperationFailed { ref code, .. }) if code == "UNKNOWN"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let mut client = MockOperationClient::new();
        client
            .expect_get()
            .returning(|_, _, _| Ok(op(OperationStatus::Running)));

        let config = WaiterConfig {
            timeout: Duration::from_secs(10),
            ..WaiterConfig::default()
        };
        let waiter = OperationWaiter::new(&client, config);
        let err = waiter
            .wait(&op(OperationStatus::Running))
            .await
            .expect_err("times out");
        assert!(matches!(err, InfraError::Cloud(CloudError::Timeout { .. })));
    }
}
