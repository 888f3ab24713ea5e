//! Acquisition collaborator: whatever produces raw readings for a scale.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::error::DmmError;
use crate::scale::Scale;

/// The measurement hardware as seen by the core.
///
/// The meter owns the notion of the current scale. Readings are raw, before
/// any calibration coefficient is applied.
pub trait Meter {
    fn configure(&mut self, scale: Scale) -> Result<(), DmmError>;
    fn current_scale(&self) -> Option<Scale>;
    /// One reading in base units, or [`DmmError::ValidDataTimeout`] when the
    /// converter did not deliver valid data in time.
    fn read_raw(&mut self) -> Result<f64, DmmError>;
}

/// Parameters of the simulated front end.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    pub seed: u64,
    /// Peak noise as a percentage of the scale's full range.
    pub noise_percent: f64,
    /// Relative gain error, 0.01 reads 1% high.
    pub gain_error: f64,
    /// Offset as a fraction of the scale's full range.
    pub offset_error: f64,
    /// Value applied to the input terminals, in base units.
    pub signal: f64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            noise_percent: 0.05,
            gain_error: 0.002,
            offset_error: 0.0005,
            signal: 0.0,
        }
    }
}

/// Meter backed by a seeded noise source instead of an ADC.
#[derive(Debug)]
pub struct SimulatedMeter {
    settings: SimulatorSettings,
    scale: Option<Scale>,
    rng: StdRng,
    pending_timeouts: u32,
}

impl SimulatedMeter {
    pub fn new(settings: SimulatorSettings) -> Self {
        let rng = StdRng::seed_from_u64(settings.seed);
        Self {
            settings,
            scale: None,
            rng,
            pending_timeouts: 0,
        }
    }

    /// Changes the value applied to the input terminals.
    pub fn set_signal(&mut self, value: f64) {
        self.settings.signal = value;
    }

    pub fn set_noise_percent(&mut self, percent: f64) {
        self.settings.noise_percent = percent;
    }

    /// The next `count` acquisitions time out.
    pub fn fail_next(&mut self, count: u32) {
        self.pending_timeouts = count;
    }
}

impl Meter for SimulatedMeter {
    fn configure(&mut self, scale: Scale) -> Result<(), DmmError> {
        self.scale = Some(scale);
        Ok(())
    }

    fn current_scale(&self) -> Option<Scale> {
        self.scale
    }

    fn read_raw(&mut self) -> Result<f64, DmmError> {
        let scale = self.scale.ok_or(DmmError::NoScale)?;
        if self.pending_timeouts > 0 {
            self.pending_timeouts -= 1;
            return Err(DmmError::ValidDataTimeout);
        }
        let full_scale = scale.info().full_scale;
        let s = &self.settings;
        let peak_noise = s.noise_percent / 100.0 * full_scale;
        let noise = if peak_noise > 0.0 {
            self.rng.gen_range(-peak_noise..=peak_noise)
        } else {
            0.0
        };
        Ok(s.signal * (1.0 + s.gain_error) + s.offset_error * full_scale + noise)
    }
}
