//! Data preparation for history plots: merging aggregated windows,
//! re-pooling their statistics, and mapping times onto the
//! day-of-week axis.

use chrono::{Datelike, TimeZone, Timelike, Utc};
use data_types::AggregatedSample;

const SECONDS_PER_DAY: f64 = 24.0 * 60.0 * 60.0;

/// One plotted span: overlapping aggregated windows merged and re-pooled,
/// all latencies in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MergedWindow {
    pub start_unix: u64,
    pub end_unix: u64,
    pub mean: f64,
    pub minimum: f64,
    pub maximum: f64,
    /// `max(0, mean − σ)`.
    pub lower_sigma: f64,
    /// `mean + σ`.
    pub upper_sigma: f64,
}

/// Merge aggregated rows (ordered by start timestamp) into display spans.
///
/// Rows from different monitors or servers that share a window land in the
/// same span; their statistics are pooled with the weighted formula so the
/// drawn mean/σ band reflects the combined population.
pub(crate) fn merge_windows(entries: &[AggregatedSample]) -> Vec<MergedWindow> {
    // Group rows into spans first.
    let mut groups: Vec<Vec<&AggregatedSample>> = Vec::new();
    let mut span: Option<(u64, u64)> = None;

    for entry in entries {
        let start = entry.start_unix_timestamp();
        let end = entry.end_unix_timestamp();

        let starts_new_span = match span {
            None => true,
            Some((span_start, span_end)) => start < span_start || end > span_end,
        };

        if starts_new_span {
            span = Some((start, end));
            groups.push(Vec::new());
        }

        groups
            .last_mut()
            .expect("a group exists after the span check")
            .push(entry);
    }

    groups
        .into_iter()
        .map(|group| {
            let start_unix = group
                .first()
                .map(|e| e.start_unix_timestamp())
                .expect("groups are non-empty");
            let end_unix = group
                .last()
                .map(|e| e.end_unix_timestamp())
                .expect("groups are non-empty");

            let mut number_samples = 0_u64;
            let mut weighted_mean = 0.0;
            let mut weighted_variance = 0.0;
            let mut minimum = f64::MAX;
            let mut maximum = 0.0_f64;

            for entry in &group {
                let mean = entry.mean_latency_micros * 1.0e-6;
                let variance = entry.variance_latency_micros * 1.0e-12;
                let n = f64::from(entry.number_samples);

                weighted_mean += n * mean;
                weighted_variance += n * variance;
                minimum = minimum.min(f64::from(entry.minimum_latency_micros) * 1.0e-6);
                maximum = maximum.max(f64::from(entry.maximum_latency_micros) * 1.0e-6);
                number_samples += u64::from(entry.number_samples);
            }

            let mean = weighted_mean / number_samples as f64;
            for entry in &group {
                let d = entry.mean_latency_micros * 1.0e-6 - mean;
                weighted_variance += f64::from(entry.number_samples) * d * d;
            }
            let variance = weighted_variance / number_samples as f64;
            let sigma = variance.sqrt();

            MergedWindow {
                start_unix,
                end_unix,
                mean,
                minimum,
                maximum,
                lower_sigma: (mean - sigma).max(0.0),
                upper_sigma: mean + sigma,
            }
        })
        .collect()
}

/// The Unix timestamp of 00:00 UTC on the Monday of the week containing
/// `unix`.
pub(crate) fn monday_aligned_week_start(unix: u64) -> u64 {
    let datetime = Utc
        .timestamp_opt(unix as i64, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"));

    let days_from_monday = u64::from(datetime.date_naive().weekday().num_days_from_monday());
    let midnight = unix - u64::from(datetime.num_seconds_from_midnight());

    midnight - days_from_monday * 86_400
}

/// Map a Unix timestamp onto the day-of-week axis: Monday 00:00 is 1.0,
/// the following Monday is 8.0. `None` when the time falls outside the
/// plotted week.
pub(crate) fn day_of_week_coordinate(unix: u64, week_start: u64) -> Option<f64> {
    let offset = unix.checked_sub(week_start)? as f64;
    let coordinate = 1.0 + offset / SECONDS_PER_DAY;

    (coordinate < 8.0).then_some(coordinate)
}

/// Like [`day_of_week_coordinate`] for a span end: a span running past the
/// end of the week is clipped to just inside it.
pub(crate) fn day_of_week_end_coordinate(unix: u64, week_start: u64) -> f64 {
    let offset = unix.saturating_sub(week_start) as f64;
    let coordinate = 1.0 + offset / SECONDS_PER_DAY;

    coordinate.min(7.999_999_9)
}

#[cfg(test)]
mod tests {
    use data_types::{MonitorId, Sample, ServerId, ZORAN_EPOCH_OFFSET};

    use super::*;

    fn aggregated(start: u32, end: u32, mean: f64, variance: f64, n: u32) -> AggregatedSample {
        AggregatedSample {
            sample: Sample {
                monitor_id: MonitorId::new(7),
                server_id: ServerId::new(3),
                zoran_timestamp: start + 1,
                latency_micros: mean as u32,
            },
            start_zoran_timestamp: start,
            end_zoran_timestamp: end,
            mean_latency_micros: mean,
            variance_latency_micros: variance,
            minimum_latency_micros: (mean / 2.0) as u32,
            maximum_latency_micros: (mean * 2.0) as u32,
            number_samples: n,
        }
    }

    #[test]
    fn distinct_windows_stay_separate() {
        let entries = vec![
            aggregated(0, 3600, 100.0, 0.0, 2),
            aggregated(3600, 7200, 300.0, 0.0, 2),
        ];

        let merged = merge_windows(&entries);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].start_unix, ZORAN_EPOCH_OFFSET);
        assert_eq!(merged[1].start_unix, ZORAN_EPOCH_OFFSET + 3600);
    }

    #[test]
    fn same_window_rows_pool_their_statistics() {
        // (n=2, μ=100µs, v=0) and (n=2, μ=300µs, v=0) in the same window
        // pool to μ=200µs with σ=100µs.
        let entries = vec![
            aggregated(0, 3600, 100.0, 0.0, 2),
            aggregated(0, 3600, 300.0, 0.0, 2),
        ];

        let merged = merge_windows(&entries);
        assert_eq!(merged.len(), 1);
        let window = merged[0];
        assert!((window.mean - 200.0e-6).abs() < 1e-15);
        assert!((window.upper_sigma - 300.0e-6).abs() < 1e-12);
        assert!((window.lower_sigma - 100.0e-6).abs() < 1e-12);
        assert!((window.minimum - 50.0e-6).abs() < 1e-15);
        assert!((window.maximum - 600.0e-6).abs() < 1e-15);
    }

    #[test]
    fn sigma_band_never_goes_negative() {
        let entries = vec![
            aggregated(0, 3600, 1.0, 0.0, 1),
            aggregated(0, 3600, 1000.0, 0.0, 1),
        ];

        let merged = merge_windows(&entries);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].lower_sigma >= 0.0);
    }

    #[test]
    fn week_start_is_a_monday_at_midnight() {
        // 2021-01-06 12:30:00 UTC was a Wednesday; its week began on
        // Monday 2021-01-04 00:00:00 UTC (1609718400).
        let wednesday = 1_609_936_200;
        assert_eq!(monday_aligned_week_start(wednesday), 1_609_718_400);

        // A Monday maps to its own midnight.
        assert_eq!(monday_aligned_week_start(1_609_718_400), 1_609_718_400);
    }

    #[test]
    fn day_of_week_axis() {
        let week_start = 1_609_718_400;

        assert_eq!(day_of_week_coordinate(week_start, week_start), Some(1.0));
        // Noon on Wednesday sits halfway through day 3.
        let wednesday_noon = week_start + 2 * 86_400 + 43_200;
        assert_eq!(day_of_week_coordinate(wednesday_noon, week_start), Some(3.5));

        // Outside the week: before, and on/after the next Monday.
        assert_eq!(day_of_week_coordinate(week_start - 1, week_start), None);
        assert_eq!(
            day_of_week_coordinate(week_start + 7 * 86_400, week_start),
            None
        );

        // Span ends clip to just inside the axis.
        let clipped = day_of_week_end_coordinate(week_start + 10 * 86_400, week_start);
        assert!(clipped < 8.0);
    }
}
