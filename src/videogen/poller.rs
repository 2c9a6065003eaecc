use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::api::VideoGenApi;
use super::types::{JobHandle, ProgressEstimate};
use crate::consts::DEFAULT_POLL_INTERVAL;
use crate::error::VideoGenError;

/// Retry budget for transient refresh failures. Zero retries means the first
/// failure aborts the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub const NONE: Self = Self {
        max_retries: 0,
        initial_backoff: Duration::ZERO,
    };
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::NONE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub poll_interval: Duration,
    /// Give up once this much time has passed without completion
    pub max_wait: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: None,
            retry: RetryPolicy::NONE,
        }
    }
}

/// Drive `handle` until the remote operation reports done.
///
/// Each round emits a progress estimate, waits `poll_interval`, then refreshes
/// the handle exactly once. When the operation finishes a last estimate with
/// fraction 1.0 is emitted. Refresh errors abort the wait (after the retry
/// budget, if any, is spent); the handle is then abandoned.
pub async fn await_completion<F>(
    api: &dyn VideoGenApi,
    mut handle: JobHandle,
    options: &PollOptions,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<JobHandle, VideoGenError>
where
    F: FnMut(ProgressEstimate) + Send,
{
    let start_time = Instant::now();
    let mut iterations: u64 = 0;

    info!(operation = %handle.name, "Waiting for video generation to complete");

    while !handle.done {
        let elapsed = start_time.elapsed();

        if let Some(max_wait) = options.max_wait {
            if elapsed >= max_wait {
                warn!(
                    operation = %handle.name,
                    elapsed_secs = elapsed.as_secs(),
                    "Giving up on video generation"
                );
                return Err(VideoGenError::TimedOut {
                    waited_secs: elapsed.as_secs(),
                });
            }
        }

        on_progress(ProgressEstimate::running(elapsed.as_secs()));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(operation = %handle.name, "Video generation wait cancelled");
                return Err(VideoGenError::Cancelled);
            }
            _ = tokio::time::sleep(options.poll_interval) => {}
        }

        handle = refresh_with_retry(api, &handle, &options.retry, cancel).await?;
        iterations += 1;

        // Still processing, log progress every 6 polls
        if !handle.done && iterations % 6 == 0 {
            info!(
                "Video generation still in progress... ({} seconds elapsed)",
                start_time.elapsed().as_secs()
            );
        }
    }

    let elapsed = start_time.elapsed().as_secs();
    on_progress(ProgressEstimate::finished(elapsed));

    info!(
        operation = %handle.name,
        elapsed_secs = elapsed,
        polls = iterations,
        "Video generation completed"
    );

    Ok(handle)
}

async fn refresh_with_retry(
    api: &dyn VideoGenApi,
    handle: &JobHandle,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<JobHandle, VideoGenError> {
    let mut attempt = 0;
    let mut backoff = retry.initial_backoff;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(VideoGenError::Cancelled),
            result = api.refresh(handle) => result,
        };

        match result {
            Err(e) if e.is_transient() && attempt < retry.max_retries => {
                attempt += 1;
                warn!(
                    operation = %handle.name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient failure refreshing operation, retrying"
                );

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(VideoGenError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = backoff.saturating_mul(2);
            }
            other => return other,
        }
    }
}
