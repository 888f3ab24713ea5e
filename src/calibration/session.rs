use tracing::{debug, info};

use super::policy::{CalibrationPolicy, SampleStats};
use super::table::CoefficientPair;
use crate::error::DmmError;
use crate::instrument::Instrument;
use crate::meter::Meter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    fn opposite(self) -> Polarity {
        match self {
            Polarity::Positive => Polarity::Negative,
            Polarity::Negative => Polarity::Positive,
        }
    }
}

/// What a calibration step corrects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibTarget {
    Positive,
    Negative,
    Zero,
}

impl From<Polarity> for CalibTarget {
    fn from(p: Polarity) -> Self {
        match p {
            Polarity::Positive => CalibTarget::Positive,
            Polarity::Negative => CalibTarget::Negative,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibState {
    #[default]
    Idle,
    Measuring,
    Measured,
    Finalized,
}

// A committed (raw reading, reference) pair, used as the second point of
// later fits in the same session.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CalibPoint {
    raw: f64,
    reference: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct TargetSession {
    state: CalibState,
    point: Option<CalibPoint>,
}

/// Result of one calibration step.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibOutcome {
    pub reference: f64,
    /// Mean reading with the coefficients in force before the step.
    pub measured: f64,
    pub dispersion_percent: f64,
    /// Which coefficients were changed, set only when the step committed.
    pub changes: Option<String>,
}

/// Positive/negative/zero calibration sessions on the current scale.
#[derive(Debug, Clone, Default)]
pub struct CalibrationWorkflow {
    policy: CalibrationPolicy,
    positive: TargetSession,
    negative: TargetSession,
    zero: TargetSession,
}

impl CalibrationWorkflow {
    pub fn new(policy: CalibrationPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn state(&self, target: CalibTarget) -> CalibState {
        self.session(target).state
    }

    /// Back to `Idle` for every target; called on scale changes.
    pub fn reset(&mut self) {
        self.positive = TargetSession::default();
        self.negative = TargetSession::default();
        self.zero = TargetSession::default();
    }

    fn session(&self, target: CalibTarget) -> &TargetSession {
        match target {
            CalibTarget::Positive => &self.positive,
            CalibTarget::Negative => &self.negative,
            CalibTarget::Zero => &self.zero,
        }
    }

    fn session_mut(&mut self, target: CalibTarget) -> &mut TargetSession {
        match target {
            CalibTarget::Positive => &mut self.positive,
            CalibTarget::Negative => &mut self.negative,
            CalibTarget::Zero => &mut self.zero,
        }
    }

    /// Takes the calibrated reading a later finalize step relies on.
    pub fn measure_for_calib<M: Meter>(
        &mut self,
        instrument: &mut Instrument<M>,
        polarity: Polarity,
    ) -> Result<f64, DmmError> {
        let target = CalibTarget::from(polarity);
        let previous = self.session(target).state;
        self.session_mut(target).state = CalibState::Measuring;
        match instrument.read_value() {
            Ok(value) => {
                self.session_mut(target).state = CalibState::Measured;
                debug!(?polarity, value, "measurement for calibration taken");
                Ok(value)
            }
            Err(e) => {
                self.session_mut(target).state = previous;
                Err(e)
            }
        }
    }

    /// Runs one calibration step against `reference`.
    ///
    /// A preview (`finalize == false`) only measures and checks dispersion.
    /// Finalizing a polarity requires a prior [`measure_for_calib`] on it;
    /// zero calibration has no such prerequisite.
    ///
    /// [`measure_for_calib`]: Self::measure_for_calib
    pub fn calib_on<M: Meter>(
        &mut self,
        instrument: &mut Instrument<M>,
        target: CalibTarget,
        reference: f64,
        finalize: bool,
    ) -> Result<CalibOutcome, DmmError> {
        let scale = instrument.require_scale()?;
        if finalize && target != CalibTarget::Zero && self.state(target) != CalibState::Measured {
            return Err(DmmError::MissingMeasurement);
        }

        let readings = instrument.read_raw_samples(self.policy.samples)?;
        let current = instrument.coefficients().get(scale);
        let full_scale = scale.info().full_scale;
        let raw_mean = readings.iter().sum::<f64>() / readings.len() as f64;
        let magnitude = match target {
            CalibTarget::Zero => full_scale,
            _ => raw_mean.abs().max(full_scale * 0.01),
        };
        let stats: SampleStats = self.policy.evaluate(&readings, magnitude);
        self.policy.check(&stats)?;

        let mut outcome = CalibOutcome {
            reference,
            measured: current.apply(stats.mean),
            dispersion_percent: stats.dispersion_percent,
            changes: None,
        };
        if !finalize {
            return Ok(outcome);
        }

        let point = CalibPoint {
            raw: stats.mean,
            reference,
        };
        let updated = self.fit(target, point, current)?;
        instrument.coefficients_mut().set(scale, updated);
        outcome.changes = Some(updated.describe_change(&current));
        info!(
            scale = scale.name(),
            ?target,
            mult = updated.mult,
            add = updated.add,
            "calibration committed"
        );

        if target == CalibTarget::Zero {
            // The offset moved, points taken against the old one are stale.
            self.positive = TargetSession::default();
            self.negative = TargetSession::default();
        }
        let session = self.session_mut(target);
        session.state = CalibState::Finalized;
        session.point = Some(point);
        Ok(outcome)
    }

    fn fit(
        &self,
        target: CalibTarget,
        point: CalibPoint,
        current: CoefficientPair,
    ) -> Result<CoefficientPair, DmmError> {
        let mult = f64::from(current.mult);
        let (mult, add) = match target {
            CalibTarget::Zero => (mult, -mult * point.raw),
            CalibTarget::Positive | CalibTarget::Negative => {
                let polarity = match target {
                    CalibTarget::Positive => Polarity::Positive,
                    _ => Polarity::Negative,
                };
                let other = self
                    .session(polarity.opposite().into())
                    .point
                    .or(self.zero.point);
                match other {
                    Some(other) => {
                        let span = point.raw - other.raw;
                        if span == 0.0 {
                            return Err(degenerate());
                        }
                        let mult = (point.reference - other.reference) / span;
                        (mult, point.reference - mult * point.raw)
                    }
                    None => {
                        if point.raw == 0.0 {
                            return Err(degenerate());
                        }
                        let add = f64::from(current.add);
                        ((point.reference - add) / point.raw, add)
                    }
                }
            }
        };
        if !mult.is_finite() || !add.is_finite() {
            return Err(degenerate());
        }
        Ok(CoefficientPair::new(mult as f32, add as f32))
    }
}

fn degenerate() -> DmmError {
    DmmError::Generic(String::from("Calibration points too close to compute coefficients"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::{SimulatedMeter, SimulatorSettings};
    use crate::scale::Scale;
    use approx::assert_relative_eq;

    fn instrument(signal: f64, gain_error: f64, offset_error: f64) -> Instrument<SimulatedMeter> {
        let meter = SimulatedMeter::new(SimulatorSettings {
            noise_percent: 0.0,
            gain_error,
            offset_error,
            signal,
            ..Default::default()
        });
        let mut inst = Instrument::new(meter);
        inst.select_scale(Scale::by_name("VoltageDC5").unwrap()).unwrap();
        inst
    }

    #[test]
    fn finalize_without_measurement_is_rejected() {
        let mut inst = instrument(4.0, 0.01, 0.0);
        let mut wf = CalibrationWorkflow::default();
        let before = inst.coefficients().clone();
        assert_eq!(
            wf.calib_on(&mut inst, CalibTarget::Positive, 4.0, true),
            Err(DmmError::MissingMeasurement)
        );
        assert_eq!(inst.coefficients(), &before);
    }

    #[test]
    fn measurement_on_other_polarity_does_not_count() {
        let mut inst = instrument(4.0, 0.01, 0.0);
        let mut wf = CalibrationWorkflow::default();
        wf.measure_for_calib(&mut inst, Polarity::Negative).unwrap();
        assert_eq!(
            wf.calib_on(&mut inst, CalibTarget::Positive, 4.0, true),
            Err(DmmError::MissingMeasurement)
        );
    }

    #[test]
    fn preview_leaves_table_untouched() {
        let mut inst = instrument(4.0, 0.01, 0.0);
        let mut wf = CalibrationWorkflow::default();
        let outcome = wf.calib_on(&mut inst, CalibTarget::Positive, 4.0, false).unwrap();
        assert_relative_eq!(outcome.measured, 4.04, epsilon = 1e-9);
        assert!(outcome.changes.is_none());
        assert_eq!(inst.coefficients(), &Default::default());
        assert_eq!(wf.state(CalibTarget::Positive), CalibState::Idle);
    }

    #[test]
    fn finalize_positive_corrects_gain() {
        let mut inst = instrument(4.0, 0.01, 0.0);
        let mut wf = CalibrationWorkflow::default();
        wf.measure_for_calib(&mut inst, Polarity::Positive).unwrap();
        assert_eq!(wf.state(CalibTarget::Positive), CalibState::Measured);
        let outcome = wf.calib_on(&mut inst, CalibTarget::Positive, 4.0, true).unwrap();
        assert!(outcome.changes.unwrap().starts_with("Mult. coeff"));
        assert_eq!(wf.state(CalibTarget::Positive), CalibState::Finalized);
        assert_relative_eq!(inst.read_value().unwrap(), 4.0, epsilon = 1e-5);
    }

    #[test]
    fn zero_then_positive_uses_two_points() {
        let mut inst = instrument(0.0, 0.02, 0.001);
        let mut wf = CalibrationWorkflow::default();
        wf.calib_on(&mut inst, CalibTarget::Zero, 0.0, true).unwrap();
        assert_relative_eq!(inst.read_value().unwrap(), 0.0, epsilon = 1e-6);

        inst.meter_mut().set_signal(3.0);
        wf.measure_for_calib(&mut inst, Polarity::Positive).unwrap();
        wf.calib_on(&mut inst, CalibTarget::Positive, 3.0, true).unwrap();
        assert_relative_eq!(inst.read_value().unwrap(), 3.0, epsilon = 1e-5);

        inst.meter_mut().set_signal(-2.0);
        assert_relative_eq!(inst.read_value().unwrap(), -2.0, epsilon = 1e-5);
    }

    #[test]
    fn noisy_zero_is_rejected_without_change() {
        let mut inst = instrument(0.0, 0.0, 0.0);
        inst.meter_mut().set_noise_percent(20.0);
        let mut wf = CalibrationWorkflow::default();
        assert_eq!(
            wf.calib_on(&mut inst, CalibTarget::Zero, 0.0, true),
            Err(DmmError::MeasureDispersion)
        );
        assert_eq!(inst.coefficients(), &Default::default());
        assert_eq!(wf.state(CalibTarget::Zero), CalibState::Idle);
    }

    #[test]
    fn failed_measurement_keeps_state() {
        let mut inst = instrument(1.0, 0.0, 0.0);
        let mut wf = CalibrationWorkflow::default();
        inst.meter_mut().fail_next(1);
        assert_eq!(
            wf.measure_for_calib(&mut inst, Polarity::Negative),
            Err(DmmError::ValidDataTimeout)
        );
        assert_eq!(wf.state(CalibTarget::Negative), CalibState::Idle);
    }

    #[test]
    fn reset_returns_everything_to_idle() {
        let mut inst = instrument(1.0, 0.0, 0.0);
        let mut wf = CalibrationWorkflow::default();
        wf.measure_for_calib(&mut inst, Polarity::Positive).unwrap();
        wf.measure_for_calib(&mut inst, Polarity::Negative).unwrap();
        wf.reset();
        assert_eq!(wf.state(CalibTarget::Positive), CalibState::Idle);
        assert_eq!(wf.state(CalibTarget::Negative), CalibState::Idle);
    }
}
