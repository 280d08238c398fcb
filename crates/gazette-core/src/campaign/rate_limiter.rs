//! Send pacing - fixed interval between individual sends

use gazette_common::config::SenderConfig;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Throughput constants of the batch sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    /// Jobs claimed per batch
    pub batch_size: usize,
    /// Minimum gap between the end of one send and the start of the next
    pub send_interval: Duration,
}

impl RatePolicy {
    pub fn new(batch_size: usize, send_interval: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            send_interval,
        }
    }

    pub fn from_config(config: &SenderConfig) -> Self {
        Self::new(
            config.batch_size,
            Duration::from_millis(config.send_delay_ms),
        )
    }
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self::from_config(&SenderConfig::default())
    }
}

/// Fixed-interval pacer for one campaign drain.
///
/// The gap is kept across batch boundaries, so claiming jobs in batches never
/// shortens the delay between two sends.
#[derive(Debug)]
pub struct SendPacer {
    interval: Duration,
    last_send: Option<Instant>,
}

impl SendPacer {
    pub fn new(policy: RatePolicy) -> Self {
        Self {
            interval: policy.send_interval,
            last_send: None,
        }
    }

    /// Wait until the next send is allowed.
    ///
    /// Returns `false` as soon as `halt` is cancelled, including mid-wait.
    pub async fn ready(&self, halt: &CancellationToken) -> bool {
        if halt.is_cancelled() {
            return false;
        }

        let Some(last) = self.last_send else {
            return true;
        };

        tokio::select! {
            biased;
            _ = halt.cancelled() => false,
            _ = sleep_until(last + self.interval) => true,
        }
    }

    /// Note that a send just finished
    pub fn record_send(&mut self) {
        self.last_send = Some(Instant::now());
    }
}
