//! Outbound dispatcher CLI config.

use std::time::Duration;

use dispatcher::DispatcherConfig;

/// Tuning for outbound notification posting.
#[derive(Debug, Clone, clap::Parser)]
pub struct OutboundConfig {
    /// Pause before retrying a failed outbound post.
    #[clap(
        long = "outbound-retry-interval",
        env = "PULSE_OUTBOUND_RETRY_INTERVAL",
        default_value = "60s",
        value_parser = humantime::parse_duration,
        action
    )]
    pub retry_interval: Duration,

    /// Idle time after which a destination's dispatcher is collected.
    #[clap(
        long = "outbound-max-idle",
        env = "PULSE_OUTBOUND_MAX_IDLE",
        default_value = "1h",
        value_parser = humantime::parse_duration,
        action
    )]
    pub max_idle: Duration,
}

impl From<&OutboundConfig> for DispatcherConfig {
    fn from(config: &OutboundConfig) -> Self {
        Self {
            retry_interval: config.retry_interval,
            max_idle: config.max_idle,
            ..Self::default()
        }
    }
}
