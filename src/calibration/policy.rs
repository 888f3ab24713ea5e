use serde::Deserialize;

use crate::error::DmmError;

/// How the spread of calibration readings is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispersionEstimator {
    /// Largest absolute deviation from the mean.
    MaxDeviation,
    /// Population standard deviation.
    StdDev,
}

/// Acceptance policy for calibration measurements.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CalibrationPolicy {
    /// Readings averaged per calibration step.
    pub samples: usize,
    pub dispersion_threshold_percent: f64,
    pub estimator: DispersionEstimator,
}

impl Default for CalibrationPolicy {
    fn default() -> Self {
        Self {
            samples: 10,
            dispersion_threshold_percent: 5.0,
            estimator: DispersionEstimator::MaxDeviation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleStats {
    pub mean: f64,
    /// Spread relative to the reference magnitude, in percent.
    pub dispersion_percent: f64,
}

impl CalibrationPolicy {
    /// Mean and dispersion of `readings`, the spread expressed relative to
    /// `reference_magnitude`.
    pub fn evaluate(&self, readings: &[f64], reference_magnitude: f64) -> SampleStats {
        if readings.is_empty() {
            return SampleStats {
                mean: 0.0,
                dispersion_percent: 0.0,
            };
        }
        let n = readings.len() as f64;
        let mean = readings.iter().sum::<f64>() / n;
        let spread = match self.estimator {
            DispersionEstimator::MaxDeviation => readings
                .iter()
                .map(|r| (r - mean).abs())
                .fold(0.0, f64::max),
            DispersionEstimator::StdDev => {
                (readings.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt()
            }
        };
        let dispersion_percent = if reference_magnitude > 0.0 {
            spread / reference_magnitude * 100.0
        } else if spread == 0.0 {
            0.0
        } else {
            f64::INFINITY
        };
        SampleStats {
            mean,
            dispersion_percent,
        }
    }

    pub fn check(&self, stats: &SampleStats) -> Result<(), DmmError> {
        if stats.dispersion_percent > self.dispersion_threshold_percent {
            Err(DmmError::MeasureDispersion)
        } else {
            Ok(())
        }
    }
}
