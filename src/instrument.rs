//! The meter together with the active (USER) calibration coefficients.

use tracing::info;

use crate::calibration::{CoefficientPair, CoefficientTable};
use crate::error::DmmError;
use crate::meter::Meter;
use crate::scale::Scale;

pub struct Instrument<M: Meter> {
    meter: M,
    use_calibration: bool,
    coefficients: CoefficientTable,
}

impl<M: Meter> Instrument<M> {
    pub fn new(meter: M) -> Self {
        Self {
            meter,
            use_calibration: true,
            coefficients: CoefficientTable::default(),
        }
    }

    pub fn meter(&self) -> &M {
        &self.meter
    }

    pub fn meter_mut(&mut self) -> &mut M {
        &mut self.meter
    }

    pub fn scale(&self) -> Option<Scale> {
        self.meter.current_scale()
    }

    pub fn require_scale(&self) -> Result<Scale, DmmError> {
        self.scale().ok_or(DmmError::NoScale)
    }

    pub fn select_scale(&mut self, scale: Scale) -> Result<(), DmmError> {
        self.meter.configure(scale)?;
        if self.meter.current_scale() != Some(scale) {
            return Err(DmmError::ConfigVerify);
        }
        info!(scale = scale.name(), index = scale.index(), "scale selected");
        Ok(())
    }

    pub fn uses_calibration(&self) -> bool {
        self.use_calibration
    }

    pub fn coefficients(&self) -> &CoefficientTable {
        &self.coefficients
    }

    pub fn coefficients_mut(&mut self) -> &mut CoefficientTable {
        &mut self.coefficients
    }

    pub fn set_coefficients(&mut self, table: CoefficientTable) {
        self.coefficients = table;
    }

    /// Coefficients of the current scale.
    pub fn current_pair(&self) -> Result<CoefficientPair, DmmError> {
        Ok(self.coefficients.get(self.require_scale()?))
    }

    pub fn read_raw(&mut self) -> Result<f64, DmmError> {
        self.meter.read_raw()
    }

    /// One reading, corrected with the current scale's coefficients unless
    /// calibration use is switched off.
    pub fn read_value(&mut self) -> Result<f64, DmmError> {
        let scale = self.require_scale()?;
        let raw = self.meter.read_raw()?;
        if self.use_calibration {
            Ok(self.coefficients.get(scale).apply(raw))
        } else {
            Ok(raw)
        }
    }

    /// One reading with calibration switched off for this acquisition only.
    pub fn read_uncalibrated(&mut self) -> Result<f64, DmmError> {
        let previous = self.use_calibration;
        self.use_calibration = false;
        let result = self.read_value();
        self.use_calibration = previous;
        result
    }

    /// Mean of `count` corrected readings; the first failure aborts.
    pub fn read_average(&mut self, count: usize) -> Result<f64, DmmError> {
        let count = count.max(1);
        let mut sum = 0.0;
        for _ in 0..count {
            sum += self.read_value()?;
        }
        Ok(sum / count as f64)
    }

    /// `count` raw readings.
    pub fn read_raw_samples(&mut self, count: usize) -> Result<Vec<f64>, DmmError> {
        self.require_scale()?;
        (0..count.max(1)).map(|_| self.meter.read_raw()).collect()
    }
}
