use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::poll::{poll_until, PollError, PollOutcome};
use crate::adapters::{MetricSource, PlatformError};

#[derive(Debug, thiserror::Error)]
pub enum ScaleToZeroError {
    #[error("{workload} did not scale to zero within {timeout:?} ({last})")]
    TimedOut {
        workload: String,
        timeout: Duration,
        last: String,
    },
    #[error("cancelled while waiting for {0} to scale to zero")]
    Cancelled(String),
    #[error(transparent)]
    Metric(#[from] PlatformError),
}

/// Watches the instance-count metric of deployed workloads.
#[derive(Clone)]
pub struct ScaleToZeroDetector {
    metrics: Arc<dyn MetricSource>,
}

impl ScaleToZeroDetector {
    pub fn new(metrics: Arc<dyn MetricSource>) -> Self {
        Self { metrics }
    }

    /// Single check, no waiting.
    pub async fn is_scaled_to_zero(&self, workload: &str) -> Result<bool, ScaleToZeroError> {
        Ok(self.metrics.instance_count(workload).await? == 0)
    }

    /// Blocks until the metric reads zero. Metric query failures are logged
    /// and polling continues; only the timeout ends the wait with an error.
    pub async fn wait_for_scale_to_zero(
        &self,
        cancel: &CancellationToken,
        workload: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(), ScaleToZeroError> {
        info!(workload, timeout_s = timeout.as_secs(), "waiting for scale to zero");
        let metrics = &self.metrics;
        let outcome = poll_until(cancel, timeout, poll_interval, move || async move {
            match metrics.instance_count(workload).await {
                Ok(0) => PollOutcome::Ready(()),
                Ok(count) => {
                    debug!(workload, instances = count, "still running");
                    PollOutcome::Pending(format!("{count} instance(s) running"))
                }
                Err(error) => {
                    warn!(workload, error = %error, "instance count query failed, retrying");
                    PollOutcome::Pending(format!("metric query failed: {error}"))
                }
            }
        })
        .await;

        match outcome {
            Ok(()) => {
                info!(workload, "scaled to zero");
                Ok(())
            }
            Err(PollError::Cancelled) => Err(ScaleToZeroError::Cancelled(workload.to_string())),
            Err(PollError::TimedOut { last, .. }) => Err(ScaleToZeroError::TimedOut {
                workload: workload.to_string(),
                timeout,
                last,
            }),
            Err(PollError::Failed(message)) => Err(ScaleToZeroError::Metric(PlatformError::Other(message))),
        }
    }
}
