//! Chart drawing and image encoding.
//!
//! Rendering happens into an RGB pixel buffer which is then encoded to the
//! requested image format. Everything here is synchronous; the render
//! worker owns the only call sites.

use std::io::Cursor;

use chrono::format::{Item, StrftimeItems};
use chrono::{TimeZone, Utc};
use data_types::{AggregatedSample, Sample};
use plotters::coord::cartesian::Cartesian2d;
use plotters::coord::ranged1d::{AsRangedCoord, Ranged, ValueFormatter};
use plotters::prelude::*;

use crate::history::{
    day_of_week_coordinate, day_of_week_end_coordinate, merge_windows, monday_aligned_week_start,
};
use crate::layout::{histogram_buckets, nice_log_range, nice_range, FontSpec, FontWeight};
use crate::{HistogramPlotRequest, HistoryPlotRequest, ImageFormat, PlotStyle};

/// Failures while producing an image.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Reading the samples failed.
    #[error("query failed: {0}")]
    Query(#[from] querier::Error),

    /// The chart could not be drawn.
    #[error("drawing failed: {0}")]
    Draw(String),

    /// The pixel buffer could not be encoded.
    #[error("image encoding failed: {0}")]
    Encode(String),
}

const ACCENT_BLUE: RGBColor = RGBColor(0x17, 0x6E, 0xDA);
const DEFAULT_DATE_FORMAT: &str = "%b %d %Y - %H:%M";
const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// The line/band geometry of a history plot, in axis coordinates.
#[derive(Debug, Default)]
struct HistorySeries {
    /// Mean step line through the aggregated spans, continued by the raw
    /// observations past the aggregated horizon.
    recent: Vec<(f64, f64)>,
    minimum: Vec<(f64, f64)>,
    maximum: Vec<(f64, f64)>,
    /// Closed ±1σ polygon: upper edge forward, lower edge reversed.
    sigma_band: Vec<(f64, f64)>,
}

pub(crate) fn render_history(
    raw: &[Sample],
    aggregated: &[AggregatedSample],
    request: &HistoryPlotRequest,
) -> Result<Vec<u8>, RenderError> {
    let merged = merge_windows(aggregated);
    let day_of_week = request.date_format == "dow";

    // Establish the plotted time span from the data itself.
    let mut minimum_time = u64::MAX;
    let mut maximum_time = 0_u64;
    if let (Some(first), Some(last)) = (merged.first(), merged.last()) {
        minimum_time = first.start_unix;
        maximum_time = last.end_unix;
    }
    if let (Some(first), Some(last)) = (raw.first(), raw.last()) {
        minimum_time = minimum_time.min(first.unix_timestamp());
        maximum_time = maximum_time.max(last.unix_timestamp());
    }
    if minimum_time > maximum_time {
        // Nothing to draw; render an empty chart over a token span.
        minimum_time = 0;
        maximum_time = 1;
    }

    let week_start = day_of_week.then(|| monday_aligned_week_start(minimum_time));

    let mut series = HistorySeries::default();
    let mut minimum_latency = f64::MAX;
    let mut maximum_latency = f64::MIN;

    let mut lower_edge = Vec::new();
    for window in &merged {
        let coordinates = match week_start {
            Some(week_start) => day_of_week_coordinate(window.start_unix, week_start)
                .map(|x0| (x0, day_of_week_end_coordinate(window.end_unix, week_start))),
            None => Some((window.start_unix as f64, window.end_unix as f64)),
        };
        let Some((x0, x1)) = coordinates else {
            continue;
        };

        for x in [x0, x1] {
            series.recent.push((x, window.mean));
            series.minimum.push((x, window.minimum));
            series.maximum.push((x, window.maximum));
            series.sigma_band.push((x, window.upper_sigma));
            lower_edge.push((x, window.lower_sigma));
        }

        minimum_latency = minimum_latency.min(window.minimum);
        maximum_latency = maximum_latency.max(window.maximum);
    }
    lower_edge.reverse();
    series.sigma_band.extend(lower_edge);

    for sample in raw {
        let x = match week_start {
            Some(week_start) => match day_of_week_coordinate(sample.unix_timestamp(), week_start) {
                Some(x) => x,
                None => continue,
            },
            None => sample.unix_timestamp() as f64,
        };

        let latency = sample.latency_seconds();
        series.recent.push((x, latency));
        minimum_latency = minimum_latency.min(latency);
        maximum_latency = maximum_latency.max(latency);
    }

    if minimum_latency == maximum_latency {
        minimum_latency *= 0.9;
        maximum_latency *= 1.1;
    } else if minimum_latency > maximum_latency {
        minimum_latency = 0.0;
        maximum_latency = 1.0;
    }

    // Explicit bounds beat the derived ones; otherwise round to a nice
    // range (linear) or powers of ten (log).
    let mut y_labels = 9_usize;
    if request.log_scale {
        nice_log_range(&mut minimum_latency, &mut maximum_latency);
    } else if request.minimum_latency < 0.0 && request.maximum_latency < 0.0 {
        y_labels = nice_range(&mut minimum_latency, &mut maximum_latency) as usize + 1;
    }
    if request.minimum_latency >= 0.0 {
        minimum_latency = request.minimum_latency;
    }
    if request.maximum_latency >= 0.0 {
        maximum_latency = request.maximum_latency;
    }
    if minimum_latency >= maximum_latency {
        maximum_latency = minimum_latency + 1.0;
    }

    let (x_range, x_formatter): (std::ops::Range<f64>, Box<dyn Fn(&f64) -> String>) =
        if day_of_week {
            (1.0..8.0, Box::new(|x: &f64| day_label(*x)))
        } else {
            let span_start = minimum_time as f64;
            let mut span_end = maximum_time as f64;
            if span_end <= span_start {
                span_end = span_start + 1.0;
            }
            let format = request.date_format.clone();
            (
                span_start..span_end,
                Box::new(move |x: &f64| format_unix(*x, &format)),
            )
        };

    let width = request.style.width;
    let height = request.style.height;
    let mut buffer = vec![0_u8; (width * height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_error)?;

        if request.log_scale {
            let y_range = (minimum_latency..maximum_latency).log_scale();
            draw_history_chart(
                &root,
                &request.style,
                x_range,
                y_range,
                &x_formatter,
                y_labels,
                &series,
            )?;
        } else {
            draw_history_chart(
                &root,
                &request.style,
                x_range,
                minimum_latency..maximum_latency,
                &x_formatter,
                y_labels,
                &series,
            )?;
        }

        root.present().map_err(draw_error)?;
    }

    encode(buffer, width, height, request.style.format)
}

fn draw_history_chart<Y>(
    root: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    style: &PlotStyle,
    x_range: std::ops::Range<f64>,
    y_range: Y,
    x_formatter: &dyn Fn(&f64) -> String,
    y_labels: usize,
    series: &HistorySeries,
) -> Result<(), RenderError>
where
    Y: AsRangedCoord<Value = f64>,
    Y::CoordDescType: Ranged<ValueType = f64> + ValueFormatter<f64>,
{
    let mut chart = ChartBuilder::on(root)
        .caption(&style.title, font(&style.title_font, 20.0))
        .margin(10)
        .x_label_area_size(45)
        .y_label_area_size(70)
        .build_cartesian_2d(x_range, y_range)
        .map_err(draw_error)?;

    chart
        .configure_mesh()
        .x_desc(&style.x_axis_label)
        .y_desc(&style.y_axis_label)
        .x_labels(8)
        .y_labels(y_labels)
        .x_label_formatter(x_formatter)
        .axis_desc_style(font(&style.axis_title_font, 15.0))
        .label_style(font(&style.axis_label_font, 12.0))
        .draw()
        .map_err(draw_error)?;

    draw_history_series(&mut chart, series)
}

fn draw_history_series<X, Y>(
    chart: &mut ChartContext<'_, BitMapBackend<'_>, Cartesian2d<X, Y>>,
    series: &HistorySeries,
) -> Result<(), RenderError>
where
    X: Ranged<ValueType = f64>,
    Y: Ranged<ValueType = f64>,
{
    if series.sigma_band.len() >= 3 {
        chart
            .draw_series(std::iter::once(Polygon::new(
                series.sigma_band.clone(),
                ACCENT_BLUE.mix(0.12).filled(),
            )))
            .map_err(draw_error)?;
    }

    let thin_red = RED.stroke_width(1);
    for line in [&series.minimum, &series.maximum] {
        if line.len() >= 2 {
            chart
                .draw_series(LineSeries::new(line.iter().copied(), thin_red))
                .map_err(draw_error)?;
        }
    }

    if series.recent.len() >= 2 {
        chart
            .draw_series(LineSeries::new(
                series.recent.iter().copied(),
                ACCENT_BLUE.stroke_width(2),
            ))
            .map_err(draw_error)?;
    }

    Ok(())
}

pub(crate) fn render_histogram(
    raw: &[Sample],
    aggregated: &[AggregatedSample],
    request: &HistogramPlotRequest,
) -> Result<Vec<u8>, RenderError> {
    // Raw observations plus each aggregated row's representative.
    let values: Vec<f64> = raw
        .iter()
        .map(Sample::latency_seconds)
        .chain(aggregated.iter().map(AggregatedSample::latency_seconds))
        .collect();

    let mut minimum = f64::MAX;
    let mut maximum = f64::MIN;
    for &v in &values {
        minimum = minimum.min(v);
        maximum = maximum.max(v);
    }

    if minimum == maximum {
        minimum *= 0.9;
        maximum *= 1.1;
    } else if minimum > maximum {
        minimum = 0.0;
        maximum = 1.0;
    }

    if request.minimum_latency >= 0.0 {
        minimum = request.minimum_latency;
    }
    if request.maximum_latency >= 0.0 {
        maximum = request.maximum_latency;
    }

    let steps = nice_range(&mut minimum, &mut maximum);
    let (buckets, _minor_ticks) = histogram_buckets(values.len() as u64, steps);
    let bucket_width = (maximum - minimum) / f64::from(buckets);

    let mut counts = vec![0_u64; buckets as usize];
    for &v in &values {
        if v >= minimum && v <= maximum {
            let index = (((v - minimum) / bucket_width) as usize).min(counts.len() - 1);
            counts[index] += 1;
        }
    }

    let mut minimum_count = 0.0;
    let mut maximum_count = counts.iter().copied().max().unwrap_or(0) as f64;
    if maximum_count == 0.0 {
        maximum_count = 1.0;
    }
    let count_steps = nice_range(&mut minimum_count, &mut maximum_count);

    let width = request.style.width;
    let height = request.style.height;
    let mut buffer = vec![0_u8; (width * height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_error)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(&request.style.title, font(&request.style.title_font, 20.0))
            .margin(10)
            .x_label_area_size(45)
            .y_label_area_size(70)
            .build_cartesian_2d(minimum..maximum, minimum_count..maximum_count)
            .map_err(draw_error)?;

        chart
            .configure_mesh()
            .x_desc(&request.style.x_axis_label)
            .y_desc(&request.style.y_axis_label)
            .x_labels(steps as usize + 1)
            .y_labels(count_steps as usize + 1)
            .axis_desc_style(font(&request.style.axis_title_font, 15.0))
            .label_style(font(&request.style.axis_label_font, 12.0))
            .draw()
            .map_err(draw_error)?;

        chart
            .draw_series(counts.iter().enumerate().map(|(index, &count)| {
                let x0 = minimum + f64::from(index as u32) * bucket_width;
                let x1 = x0 + bucket_width;
                let mut bar = Rectangle::new(
                    [(x0, 0.0), (x1, count as f64)],
                    ACCENT_BLUE.mix(0.85).filled(),
                );
                bar.set_margin(0, 0, 1, 1);
                bar
            }))
            .map_err(draw_error)?;

        root.present().map_err(draw_error)?;
    }

    encode(buffer, width, height, request.style.format)
}

/// The font for `spec`, or a sans-serif fallback at `fallback_size`.
fn font<'a>(spec: &'a Option<FontSpec>, fallback_size: f64) -> FontDesc<'a> {
    match spec {
        Some(spec) => FontDesc::new(
            FontFamily::Name(&spec.family),
            f64::from(spec.size),
            match spec.weight {
                FontWeight::Bold => FontStyle::Bold,
                FontWeight::Normal | FontWeight::Light => FontStyle::Normal,
            },
        ),
        None => FontDesc::new(FontFamily::SansSerif, fallback_size, FontStyle::Normal),
    }
}

fn day_label(x: f64) -> String {
    let index = (x.floor() as i64 - 1).clamp(0, 6) as usize;
    DAY_NAMES[index].to_owned()
}

/// Format a Unix-seconds axis position with the caller's date format,
/// falling back to the default when the format string is malformed.
fn format_unix(unix: f64, format: &str) -> String {
    let Some(datetime) = Utc.timestamp_opt(unix as i64, 0).single() else {
        return String::new();
    };

    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return datetime.format(DEFAULT_DATE_FORMAT).to_string();
    }

    datetime.format_with_items(items.into_iter()).to_string()
}

fn encode(
    buffer: Vec<u8>,
    width: u32,
    height: u32,
    format: ImageFormat,
) -> Result<Vec<u8>, RenderError> {
    let image = image::RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| RenderError::Encode("pixel buffer size mismatch".to_owned()))?;

    let output_format = match format {
        ImageFormat::Png => image::ImageOutputFormat::Png,
        ImageFormat::Jpeg => image::ImageOutputFormat::Jpeg(90),
    };

    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut out, output_format)
        .map_err(|e| RenderError::Encode(e.to_string()))?;

    Ok(out.into_inner())
}

fn draw_error<E: std::fmt::Display>(e: E) -> RenderError {
    RenderError::Draw(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_labels_span_the_week() {
        assert_eq!(day_label(1.0), "Mon");
        assert_eq!(day_label(3.5), "Wed");
        assert_eq!(day_label(7.9), "Sun");
        // Out-of-axis values clamp instead of panicking.
        assert_eq!(day_label(0.0), "Mon");
        assert_eq!(day_label(9.0), "Sun");
    }

    #[test]
    fn malformed_date_formats_fall_back() {
        let formatted = format_unix(1_609_718_400.0, "%Q not a thing");
        assert_eq!(formatted, "Jan 04 2021 - 00:00");

        let custom = format_unix(1_609_718_400.0, "%Y/%m/%d");
        assert_eq!(custom, "2021/01/04");
    }
}
