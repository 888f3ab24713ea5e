//! # DMMShield Control Core
//!
//! This library contains the control logic of the DMMShield multimeter:
//! the text command interpreter, the calibration workflow and the EPROM
//! calibration store. The measurement, storage, display and serial
//! hardware sit behind small traits so the core runs the same against the
//! real board or the simulated parts shipped here.
//!
//! Responses are the CRLF-terminated `PASS, ...` / `FAIL 0xNN, ...` lines
//! the firmware prints, so scripts written for the board keep working.

pub mod calibration;
pub mod command;
pub mod config;
pub mod display;
pub mod eprom;
pub mod error;
pub mod instrument;
pub mod interpreter;
pub mod meter;
pub mod scale;
pub mod status;
pub mod store;
pub mod transport;
pub mod units;

pub use calibration::{CalibrationWorkflow, CoefficientPair, CoefficientTable};
pub use command::{decode, CommandKey};
pub use config::Settings;
pub use error::{DmmError, ErrorKind};
pub use interpreter::Interpreter;
pub use scale::Scale;
pub use status::StatusComposer;
