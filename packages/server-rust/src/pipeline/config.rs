use std::time::Duration;

use dispatch_core::WireFormat;

/// Pipeline-level configuration.
///
/// Controls topic names, the wire format, the per-command handler timeout, and
/// the hardening knobs for broker read errors and failed publishes.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Topic the reader consumes commands from.
    pub command_topic: String,
    /// Topic the writer publishes results to.
    pub result_topic: String,
    /// Envelope encoding used on both topics.
    pub wire_format: WireFormat,
    /// Upper bound on a single handler invocation.
    pub handler_timeout: Duration,
    /// Delay policy between consecutive broker read failures. The processor
    /// uses the same policy to poll for a stopped reader.
    pub read_backoff: BackoffConfig,
    /// Retry policy for failed result publishes.
    pub publish_retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            command_topic: "create_order.commands".to_string(),
            result_topic: "courier.results".to_string(),
            wire_format: WireFormat::Json,
            handler_timeout: Duration::from_secs(30),
            read_backoff: BackoffConfig::default(),
            publish_retry: RetryConfig::default(),
        }
    }
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (0-based): `initial * multiplier^attempt`,
    /// capped at `max`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let scaled = self.initial.as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(50),
            max: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Publish retry policy. `attempts` counts retries after the first try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 0,
            delay: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.command_topic, "create_order.commands");
        assert_eq!(config.result_topic, "courier.results");
        assert_eq!(config.wire_format, WireFormat::Json);
        assert_eq!(config.handler_timeout, Duration::from_secs(30));
        assert_eq!(config.publish_retry.attempts, 0);
    }

    #[test]
    fn backoff_grows_geometrically() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay_for(0), Duration::from_millis(50));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn backoff_is_capped() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay_for(10), Duration::from_secs(5));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn multiplier_below_one_never_shrinks_the_delay() {
        let backoff = BackoffConfig {
            multiplier: 0.5,
            ..BackoffConfig::default()
        };
        assert_eq!(backoff.delay_for(4), backoff.initial);
    }
}
