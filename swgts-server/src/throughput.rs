//! Per-context filtering rate.
//!
//! Each completed job contributes one sample, the wall time from acceptance to
//! completion divided by the bytes it reserved. The mean of the last
//! [`WINDOW`] samples is the context's seconds-per-pending-byte estimate used
//! for `Retry-After` hints.

use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::keys::ContextKeys;
use crate::store::{SharedStore, StoreError, StoreOp};

/// Number of samples kept per context
pub const WINDOW: usize = 10;

#[derive(Clone)]
pub struct ThroughputEstimator {
    store: SharedStore,
    ttl: Duration,
}

impl ThroughputEstimator {
    pub fn new(store: SharedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Seconds per byte for a finished job; `None` for jobs that reserved nothing
    pub fn sample(elapsed: Duration, byte_size: u64) -> Option<f64> {
        (byte_size > 0).then(|| elapsed.as_secs_f64() / byte_size as f64)
    }

    /// Operations pushing a sample and trimming the window, for inclusion in a larger batch
    pub fn sample_ops(&self, context: Uuid, sample: f64) -> Vec<StoreOp> {
        let key = ContextKeys::new(context).speed();
        vec![
            StoreOp::LPush {
                key: key.clone(),
                values: vec![sample.to_string()],
            },
            StoreOp::LTrim {
                key: key.clone(),
                start: 0,
                stop: WINDOW as isize - 1,
            },
            StoreOp::expire(key, self.ttl),
        ]
    }

    pub async fn record(&self, context: Uuid, sample: f64) -> Result<(), StoreError> {
        self.store.atomic(self.sample_ops(context, sample)).await?;
        Ok(())
    }

    /// Mean of the window, zero when there are no samples yet
    pub async fn rate(&self, context: Uuid) -> Result<f64, StoreError> {
        let key = ContextKeys::new(context).speed();
        let raw = self.store.lrange(&key, 0, WINDOW as isize - 1).await?;

        let samples: Vec<f64> = raw
            .iter()
            .filter_map(|value| match value.parse::<f64>() {
                Ok(sample) if sample.is_finite() && sample >= 0.0 => Some(sample),
                _ => {
                    warn!(context = %context, value = %value, "Ignoring invalid throughput sample");
                    None
                }
            })
            .collect();

        if samples.is_empty() {
            return Ok(0.0);
        }
        Ok(samples.iter().sum::<f64>() / samples.len() as f64)
    }
}
