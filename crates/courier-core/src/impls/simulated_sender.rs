//! SimulatedSender - 開発用の配送先
//!
//! ランダムな遅延のあと、一定の確率で失敗する。
//! 成功時のペイロードは固定値 `{"hello":"world"}`。

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use tracing::debug;

use crate::error::SenderError;
use crate::ports::Sender;

#[derive(Debug, Clone)]
pub struct SimulatedSender {
    min_latency: Duration,
    max_latency: Duration,
    failure_rate: f64,
}

impl SimulatedSender {
    /// `failure_rate` is clamped to `[0, 1]`; latency bounds are swapped if reversed.
    pub fn new(min_latency: Duration, max_latency: Duration, failure_rate: f64) -> Self {
        let (min_latency, max_latency) = if min_latency <= max_latency {
            (min_latency, max_latency)
        } else {
            (max_latency, min_latency)
        };
        let failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
        Self {
            min_latency,
            max_latency,
            failure_rate,
        }
    }

    /// No latency, never fails.
    pub fn reliable() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 0.0)
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    fn roll(&self) -> (Duration, bool) {
        let mut rng = rand::thread_rng();
        let min = self.min_latency.as_millis() as u64;
        let max = self.max_latency.as_millis() as u64;
        let delay = Duration::from_millis(rng.gen_range(min..=max));
        let fail = rng.gen_bool(self.failure_rate);
        (delay, fail)
    }
}

impl Default for SimulatedSender {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_millis(1000), 0.2)
    }
}

#[async_trait]
impl Sender for SimulatedSender {
    async fn send(&self, resource: &Path) -> Result<serde_json::Value, SenderError> {
        let (delay, fail) = self.roll();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if fail {
            return Err(SenderError::new(format!(
                "simulated send failure for {}",
                resource.display()
            )));
        }

        debug!(resource = %resource.display(), delay_ms = delay.as_millis() as u64, "Sent");
        Ok(json!({ "hello": "world" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reliable_sender_returns_fixed_payload() {
        let sender = SimulatedSender::reliable();
        let payload = sender.send(Path::new("x/y.jpg")).await.unwrap();
        assert_eq!(payload, json!({ "hello": "world" }));
    }

    #[tokio::test]
    async fn always_failing_sender_fails() {
        let sender = SimulatedSender::new(Duration::ZERO, Duration::ZERO, 1.0);
        let err = sender.send(Path::new("x/y.jpg")).await.unwrap_err();
        assert!(err.to_string().contains("x/y.jpg"));
    }

    #[test]
    fn constructor_normalizes_inputs() {
        let sender = SimulatedSender::new(Duration::from_secs(2), Duration::from_secs(1), 7.0);
        assert_eq!(sender.failure_rate(), 1.0);
        let (delay, _) = sender.roll();
        assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(2));
    }

    #[test]
    fn default_matches_dev_profile() {
        let sender = SimulatedSender::default();
        assert_eq!(sender.failure_rate(), 0.2);
        let (delay, _) = sender.roll();
        assert!(delay >= Duration::from_millis(200) && delay <= Duration::from_millis(1000));
    }
}
