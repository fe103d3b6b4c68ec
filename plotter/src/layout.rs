//! Axis layout rules: range rounding, tick counts, time-range repair,
//! dimension clamping, and font descriptions. Pure functions, shared by
//! both chart types.

/// Smallest accepted canvas edge, pixels.
pub const MINIMUM_DIMENSION: u32 = 100;
/// Largest accepted canvas edge, pixels.
pub const MAXIMUM_DIMENSION: u32 = 2048;

/// Default canvas width, pixels.
pub const DEFAULT_WIDTH: u32 = 1024;
/// Default canvas height, pixels.
pub const DEFAULT_HEIGHT: u32 = 768;

/// The tick count the nice-range search optimises towards.
const TARGET_TICK_COUNT: f64 = 8.0;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Clamp a requested canvas edge into the supported range.
pub fn clamp_dimension(v: u32) -> u32 {
    v.clamp(MINIMUM_DIMENSION, MAXIMUM_DIMENSION)
}

/// Repair a query time range: an end of zero means open-ended, a
/// collapsed range is widened by one day, and a reversed range is swapped.
pub fn fix_time_range(start: &mut u64, end: &mut u64) {
    if *end == 0 {
        *end = u64::MAX;
    }

    if *end == *start {
        *end = *start + SECONDS_PER_DAY;
    } else if *end < *start {
        std::mem::swap(start, end);
    }
}

/// Round `minimum`/`maximum` outward to a 1×, 2×, 5× or 10× multiple of
/// the decade below the span, choosing the multiple whose resulting tick
/// count lands closest to eight. Returns the number of major steps.
pub fn nice_range(minimum: &mut f64, maximum: &mut f64) -> u32 {
    if minimum == maximum {
        *minimum -= 0.5;
        *maximum += 0.5;
        return 1;
    }

    let span = (*maximum - *minimum).abs();
    let magnitude_minimum = minimum.abs();
    let magnitude_maximum = maximum.abs();

    let distance = if 10.0 * magnitude_minimum < magnitude_maximum {
        magnitude_maximum
    } else if span < magnitude_minimum {
        span
    } else {
        magnitude_minimum.max(magnitude_maximum)
    };

    let base = 10_f64.powf(distance.log10().floor() - 1.0);
    let rounding = [base, 2.0 * base, 5.0 * base, 10.0 * base]
        .into_iter()
        .min_by(|a, b| {
            let score_a = (TARGET_TICK_COUNT - span / a).abs();
            let score_b = (TARGET_TICK_COUNT - span / b).abs();
            score_a.total_cmp(&score_b)
        })
        .expect("candidate list is non-empty");

    *minimum = rounding * (*minimum / rounding).floor();
    *maximum = rounding * (*maximum / rounding).ceil();

    ((*maximum - *minimum) / rounding).round() as u32
}

/// Round a log-axis range outward to powers of ten. Non-positive inputs
/// pin to one microsecond.
pub fn nice_log_range(minimum: &mut f64, maximum: &mut f64) {
    *minimum = if *minimum <= 0.0 {
        1.0e-6
    } else {
        10_f64.powf(minimum.log10().floor())
    };

    *maximum = if *maximum <= 0.0 {
        1.0e-6
    } else {
        10_f64.powf(maximum.log10().ceil())
    };
}

/// Font weight names accepted in font descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontWeight {
    /// Regular weight.
    #[default]
    Normal,
    /// Lighter than regular.
    Light,
    /// Heavier than regular.
    Bold,
}

/// A parsed `"family, size[, weight]"` font description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontSpec {
    /// Font family name, lower-cased.
    pub family: String,
    /// Point size, within `[6, 32]`.
    pub size: u32,
    /// Weight; defaults to normal.
    pub weight: FontWeight,
}

impl FontSpec {
    /// Parse a font description. `None` when the description is malformed
    /// or out of range, in which case callers keep their default font.
    pub fn parse(description: &str) -> Option<Self> {
        let fields: Vec<&str> = description.split(',').collect();
        if fields.len() < 2 || fields.len() > 3 {
            return None;
        }

        let family = fields[0].trim().to_lowercase();
        if family.is_empty() {
            return None;
        }

        let size: u32 = fields[1].trim().parse().ok()?;
        if !(6..=32).contains(&size) {
            return None;
        }

        let weight = match fields.get(2) {
            None => FontWeight::Normal,
            Some(w) => match w.trim().to_lowercase().as_str() {
                "normal" => FontWeight::Normal,
                "light" => FontWeight::Light,
                "bold" => FontWeight::Bold,
                _ => return None,
            },
        };

        Some(Self {
            family,
            size,
            weight,
        })
    }
}

/// How many histogram buckets to use for `total_entries` values across a
/// range with `nice_steps` major ticks. Returns `(buckets, minor_ticks)`
/// with the bucket count a multiple of the major tick count where
/// possible, capped at 100.
pub fn histogram_buckets(total_entries: u64, nice_steps: u32) -> (u32, u32) {
    let nice_steps = nice_steps.max(1);
    let mut buckets = (total_entries / 500).min(100) as u32;

    if buckets < nice_steps {
        buckets = nice_steps;
        while buckets < 10 {
            buckets <<= 1;
        }
    } else {
        buckets = (buckets / nice_steps) * nice_steps;
    }

    let minor_ticks = (buckets / nice_steps).saturating_sub(1);
    (buckets, minor_ticks)
}
