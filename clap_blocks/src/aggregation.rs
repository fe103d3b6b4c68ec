//! Aggregation tier CLI config.

use aggregator::Parameters;

/// Tuning for the aggregation tiers.
///
/// The first tier always runs, compressing raw seconds into
/// `resample-period` windows once they age past `raw-max-age`. The
/// optional second tier re-aggregates those summaries into
/// `reaggregate-period` windows once they age past `reaggregate-max-age`.
#[derive(Debug, Clone, clap::Parser)]
pub struct AggregationConfig {
    /// Age (seconds) past which raw samples are eligible for aggregation.
    #[clap(
        long = "aggregate-raw-max-age",
        env = "PULSE_AGGREGATE_RAW_MAX_AGE",
        default_value = "86400",
        action
    )]
    pub raw_max_age: u64,

    /// First-tier window width (seconds); also the tick cadence.
    #[clap(
        long = "aggregate-resample-period",
        env = "PULSE_AGGREGATE_RESAMPLE_PERIOD",
        default_value = "3600",
        action
    )]
    pub resample_period: u32,

    /// Retention horizon (seconds); rows older than this are deleted from
    /// both latency tables.
    #[clap(
        long = "aggregate-expunge-period",
        env = "PULSE_AGGREGATE_EXPUNGE_PERIOD",
        default_value = "7776000",
        action
    )]
    pub expunge_period: u64,

    /// Enable the second (re-aggregation) tier.
    #[clap(
        long = "aggregate-reaggregate",
        env = "PULSE_AGGREGATE_REAGGREGATE",
        action
    )]
    pub reaggregate: bool,

    /// Age (seconds) past which first-tier summaries are re-aggregated.
    #[clap(
        long = "aggregate-reaggregate-max-age",
        env = "PULSE_AGGREGATE_REAGGREGATE_MAX_AGE",
        default_value = "604800",
        action
    )]
    pub reaggregate_max_age: u64,

    /// Second-tier window width (seconds).
    #[clap(
        long = "aggregate-reaggregate-period",
        env = "PULSE_AGGREGATE_REAGGREGATE_PERIOD",
        default_value = "86400",
        action
    )]
    pub reaggregate_period: u32,
}

impl AggregationConfig {
    /// Parameters for the always-on first tier.
    pub fn first_tier(&self) -> Parameters {
        Parameters::raw_tier(self.raw_max_age, self.resample_period, self.expunge_period)
    }

    /// Parameters for the second tier, when enabled.
    pub fn second_tier(&self) -> Option<Parameters> {
        self.reaggregate.then(|| {
            Parameters::reaggregation_tier(
                self.reaggregate_max_age,
                self.reaggregate_period,
                self.expunge_period,
            )
        })
    }
}
