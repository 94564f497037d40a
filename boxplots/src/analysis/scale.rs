use serde::{Deserialize, Serialize};

/// Spread (max over floored min) above which the y-axis switches to log scale.
pub const LOG_RATIO_THRESHOLD: f64 = 100.0;
/// Floor applied to the minimum so zero-valued replicates do not divide by zero.
pub const MIN_FLOOR: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisScale {
    Linear,
    Log,
}

/// Configured scale: detect from the data, or force one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMode {
    #[default]
    Auto,
    Linear,
    Log,
}

impl AxisScale {
    pub fn y_label(&self) -> &'static str {
        match self {
            AxisScale::Linear => "Expression level (TPM)",
            AxisScale::Log => "Expression level (TPM, log scale)",
        }
    }
}

/// Global minimum and maximum, ignoring non-finite values.
pub fn value_extent(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// One decision for the whole figure: log when `max / max(min, 0.1) > 100`.
pub fn choose_scale(mode: ScaleMode, y_min: f64, y_max: f64) -> AxisScale {
    match mode {
        ScaleMode::Linear => AxisScale::Linear,
        ScaleMode::Log => AxisScale::Log,
        ScaleMode::Auto => {
            if y_max / y_min.max(MIN_FLOOR) > LOG_RATIO_THRESHOLD {
                AxisScale::Log
            } else {
                AxisScale::Linear
            }
        }
    }
}
