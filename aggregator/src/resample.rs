//! Window partitioning and summary generation.
//!
//! Input rows arrive ordered by `(monitor_id, server_id, timestamp)`; the
//! stream is cut into aggregation windows and each window is reduced to one
//! [`AggregatedSample`]. Pure logic — the database never appears here.

use data_types::{
    AggregatedSample, MonitorId, Sample, ServerId, ShortSample, StatisticsAccumulator,
};

use crate::picker::IndexPicker;

/// One row read from the input table, raw or pre-aggregated.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InputRow {
    pub monitor_id: MonitorId,
    pub server_id: ServerId,
    /// Representative observation time, Zoran seconds.
    pub timestamp: u32,
    /// Representative latency, microseconds.
    pub latency: u32,
    /// Pre-aggregated summary fields; `None` for raw rows.
    pub summary: Option<InputSummary>,
}

/// The summary columns of a pre-aggregated input row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InputSummary {
    pub start_timestamp: u32,
    pub end_timestamp: u32,
    pub mean_latency: f64,
    pub variance_latency: f64,
    pub minimum_latency: u32,
    pub maximum_latency: u32,
    pub number_samples: u32,
}

impl InputRow {
    /// The time span this row covers: the window bounds for aggregated
    /// rows, the instant of observation for raw rows.
    fn span(&self) -> (u32, u32) {
        match self.summary {
            Some(s) => (s.start_timestamp, s.end_timestamp),
            None => (self.timestamp, self.timestamp),
        }
    }
}

/// Cut the ordered input stream into aligned windows of `resample_period`
/// seconds and summarise each.
///
/// A window closes when the `(monitor, server)` key changes or when a row's
/// end reaches the current window's end. Windows are aligned to multiples
/// of the period: `start = end_ts - (end_ts % period)`.
pub(crate) fn generate_windows(
    rows: &[InputRow],
    resample_period: u32,
    picker: &mut IndexPicker,
) -> Vec<AggregatedSample> {
    assert!(resample_period > 0, "resample period must be non-zero");

    let mut result = Vec::new();

    let mut current_key: Option<(MonitorId, ServerId)> = None;
    let mut window_start: u32 = 0;
    let mut window_end: u32 = 0;
    let mut accumulator = StatisticsAccumulator::new();
    let mut representatives: Vec<ShortSample> = Vec::new();

    for row in rows {
        let key = (row.monitor_id, row.server_id);
        let (row_start, row_end) = row.span();

        if current_key != Some(key) || row_end >= window_end {
            if let Some((monitor_id, server_id)) = current_key {
                if !representatives.is_empty() {
                    result.push(close_window(
                        monitor_id,
                        server_id,
                        window_start,
                        window_end,
                        &accumulator,
                        &representatives,
                        picker,
                    ));
                    accumulator = StatisticsAccumulator::new();
                    representatives.clear();
                }
            }

            current_key = Some(key);

            // The sort guarantees end timestamps are non-decreasing within
            // a key, so bounds only move when the row escapes the current
            // window.
            if row_end >= window_end || row_start < window_start {
                window_start = row_end - (row_end % resample_period);
                window_end = window_start + resample_period;
            }
        }

        match row.summary {
            Some(s) => accumulator.push_summary(
                u64::from(s.number_samples),
                s.mean_latency,
                s.variance_latency,
                s.minimum_latency,
                s.maximum_latency,
            ),
            None => accumulator.push_value(row.latency),
        }

        representatives.push(ShortSample {
            zoran_timestamp: row.timestamp,
            latency_micros: row.latency,
        });
    }

    if let Some((monitor_id, server_id)) = current_key {
        if !representatives.is_empty() {
            result.push(close_window(
                monitor_id,
                server_id,
                window_start,
                window_end,
                &accumulator,
                &representatives,
                picker,
            ));
        }
    }

    result
}

fn close_window(
    monitor_id: MonitorId,
    server_id: ServerId,
    window_start: u32,
    window_end: u32,
    accumulator: &StatisticsAccumulator,
    representatives: &[ShortSample],
    picker: &mut IndexPicker,
) -> AggregatedSample {
    let stats = accumulator
        .finish()
        .expect("window closed with representatives but no samples");
    let representative = representatives[picker.pick(representatives.len())];

    AggregatedSample {
        sample: Sample {
            monitor_id,
            server_id,
            zoran_timestamp: representative.zoran_timestamp,
            latency_micros: representative.latency_micros,
        },
        start_zoran_timestamp: window_start,
        end_zoran_timestamp: window_end,
        mean_latency_micros: stats.mean,
        variance_latency_micros: stats.variance,
        minimum_latency_micros: stats.minimum,
        maximum_latency_micros: stats.maximum,
        number_samples: u32::try_from(stats.number_samples).unwrap_or(u32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(monitor: u32, server: u16, ts: u32, latency: u32) -> InputRow {
        InputRow {
            monitor_id: MonitorId::new(monitor),
            server_id: ServerId::new(server),
            timestamp: ts,
            latency,
            summary: None,
        }
    }

    #[test]
    fn one_window_of_raw_rows() {
        let rows: Vec<_> = [(100, 100), (200, 200), (300, 300), (400, 400)]
            .iter()
            .map(|&(ts, lat)| raw(7, 3, ts, lat))
            .collect();

        let mut picker = IndexPicker::new();
        let out = generate_windows(&rows, 3600, &mut picker);

        assert_eq!(out.len(), 1);
        let w = &out[0];
        assert_eq!(w.start_zoran_timestamp, 0);
        assert_eq!(w.end_zoran_timestamp, 3600);
        assert_eq!(w.mean_latency_micros, 250.0);
        assert_eq!(w.variance_latency_micros, 12_500.0);
        assert_eq!(w.minimum_latency_micros, 100);
        assert_eq!(w.maximum_latency_micros, 400);
        assert_eq!(w.number_samples, 4);

        // The representative is one of the underlying observations.
        assert!(rows
            .iter()
            .any(|r| r.timestamp == w.sample.zoran_timestamp
                && r.latency == w.sample.latency_micros));
    }

    #[test]
    fn key_change_cuts_a_window() {
        let rows = vec![raw(7, 3, 100, 100), raw(7, 4, 100, 300), raw(8, 3, 100, 500)];

        let mut picker = IndexPicker::new();
        let out = generate_windows(&rows, 3600, &mut picker);

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].sample.server_id, ServerId::new(3));
        assert_eq!(out[1].sample.server_id, ServerId::new(4));
        assert_eq!(out[2].sample.monitor_id, MonitorId::new(8));
        for w in &out {
            assert_eq!(w.number_samples, 1);
            assert_eq!(w.variance_latency_micros, 0.0);
        }
    }

    #[test]
    fn window_boundary_cuts_within_a_key() {
        let rows = vec![raw(7, 3, 100, 100), raw(7, 3, 3599, 200), raw(7, 3, 3700, 300)];

        let mut picker = IndexPicker::new();
        let out = generate_windows(&rows, 3600, &mut picker);

        assert_eq!(out.len(), 2);
        assert_eq!(
            (out[0].start_zoran_timestamp, out[0].end_zoran_timestamp),
            (0, 3600)
        );
        assert_eq!(out[0].number_samples, 2);
        assert_eq!(
            (out[1].start_zoran_timestamp, out[1].end_zoran_timestamp),
            (3600, 7200)
        );
        assert_eq!(out[1].number_samples, 1);
    }

    #[test]
    fn windows_are_aligned_to_the_period() {
        let rows: Vec<_> = (0..50).map(|i| raw(7, 3, 1000 + i * 500, 10)).collect();

        let mut picker = IndexPicker::new();
        for w in generate_windows(&rows, 3600, &mut picker) {
            assert_eq!(w.start_zoran_timestamp % 3600, 0);
            assert_eq!(w.end_zoran_timestamp - w.start_zoran_timestamp, 3600);
            assert!(w.start_zoran_timestamp <= w.sample.zoran_timestamp);
            assert!(w.sample.zoran_timestamp < w.end_zoran_timestamp);
        }
    }

    #[test]
    fn pre_aggregated_rows_pool_exactly() {
        // Two summaries (n=2, μ=100, v=0) and (n=2, μ=300, v=0) must pool
        // to μ=200, v=10 000.
        let summary = |start, end, mean, min, max| InputRow {
            monitor_id: MonitorId::new(7),
            server_id: ServerId::new(3),
            timestamp: start + 1,
            latency: min,
            summary: Some(InputSummary {
                start_timestamp: start,
                end_timestamp: end,
                mean_latency: mean,
                variance_latency: 0.0,
                minimum_latency: min,
                maximum_latency: max,
                number_samples: 2,
            }),
        };

        // Period chosen so both input windows land inside one output
        // window: ends 3600 and 7200 both fall short of 10800.
        let rows = vec![
            summary(0, 3600, 100.0, 100, 100),
            summary(3600, 7200, 300.0, 300, 300),
        ];

        let mut picker = IndexPicker::new();
        let out = generate_windows(&rows, 10_800, &mut picker);

        assert_eq!(out.len(), 1);
        let w = &out[0];
        assert_eq!(w.mean_latency_micros, 200.0);
        assert_eq!(w.variance_latency_micros, 10_000.0);
        assert_eq!(w.minimum_latency_micros, 100);
        assert_eq!(w.maximum_latency_micros, 300);
        assert_eq!(w.number_samples, 4);
        assert_eq!(
            (w.start_zoran_timestamp, w.end_zoran_timestamp),
            (0, 10_800)
        );
    }

    #[test]
    fn empty_input_yields_no_windows() {
        let mut picker = IndexPicker::new();
        assert!(generate_windows(&[], 3600, &mut picker).is_empty());
    }
}
