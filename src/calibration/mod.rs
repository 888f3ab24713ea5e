//! Calibration coefficients and the sessions that compute them.
//!
//! A session runs on the current scale. Positive and negative steps are
//! two-phase: `measure_for_calib` arms the polarity, then a finalizing
//! `calib_on` averages a burst of readings, checks their dispersion and
//! commits the fitted pair into the in-memory USER table. Zero calibration
//! commits in one step and only moves the additive coefficient.

mod policy;
mod session;
mod table;

pub use policy::{CalibrationPolicy, DispersionEstimator, SampleStats};
pub use session::{CalibOutcome, CalibState, CalibTarget, CalibrationWorkflow, Polarity};
pub use table::{CoefficientPair, CoefficientTable};
