//! Result codes raised by the DMM core.
//!
//! Every failure carries the numeric code the instrument reports on the
//! serial line, so automation scripts written against the firmware keep
//! working.

use thiserror::Error;

/// Errors raised while decoding, measuring, calibrating or persisting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DmmError {
    #[error("EPROM write data ready timeout")]
    WriteTimeout,
    #[error("Wrong checksum when reading data from EPROM")]
    Checksum,
    #[error("Wrong magic number when reading data from EPROM")]
    MagicNumber,
    #[error("Wrong scale index")]
    ScaleIndex,
    #[error("Valid data DMM timeout")]
    ValidDataTimeout,
    #[error("Wrong parameters")]
    WrongParams,
    #[error("EPROM calibration data mismatch values found")]
    VerifyMismatch,
    #[error("No scale selected")]
    NoScale,
    #[error("DMM configuration verify error")]
    ConfigVerify,
    #[error("The provided value has a wrong measure unit")]
    ValueWrongUnit,
    #[error("The numeric value cannot be extracted from the provided string")]
    ValueFormat,
    #[error("The calibration measurement dispersion exceeds accepted range")]
    MeasureDispersion,
    #[error("A measurement must be performed before calling the finalize calibration function")]
    MissingMeasurement,
    /// Catch-all carrying a human-readable detail.
    #[error("{0}")]
    Generic(String),
    #[error("Unrecognized command: {0}")]
    UnrecognizedCommand(String),
    #[error("Empty command")]
    EmptyCommand,
    /// I/O failure of the line transport; only the front end sees these.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Coarse classification of [`DmmError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Scale,
    AcquisitionTimeout,
    CalibrationState,
    CalibrationQuality,
    PersistenceIntegrity,
    PersistenceTimeout,
    Transport,
}

impl DmmError {
    /// The numeric result code reported on the serial line.
    pub fn code(&self) -> u8 {
        match self {
            DmmError::WriteTimeout => 0xFF,
            DmmError::Checksum => 0xFE,
            DmmError::MagicNumber => 0xFD,
            DmmError::ScaleIndex => 0xFC,
            DmmError::ValidDataTimeout => 0xFA,
            DmmError::WrongParams => 0xF9,
            DmmError::VerifyMismatch => 0xF8,
            DmmError::NoScale => 0xF6,
            DmmError::ConfigVerify => 0xF5,
            DmmError::ValueWrongUnit => 0xF4,
            DmmError::ValueFormat => 0xF2,
            DmmError::MeasureDispersion => 0xF1,
            DmmError::MissingMeasurement => 0xF0,
            DmmError::Generic(_) => 0xEF,
            DmmError::UnrecognizedCommand(_) => 0xEE,
            DmmError::EmptyCommand => 0xED,
            DmmError::Transport(_) => 0xEC,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DmmError::WriteTimeout => ErrorKind::PersistenceTimeout,
            DmmError::Checksum | DmmError::MagicNumber | DmmError::VerifyMismatch => {
                ErrorKind::PersistenceIntegrity
            }
            DmmError::ScaleIndex | DmmError::NoScale | DmmError::ConfigVerify => ErrorKind::Scale,
            DmmError::ValidDataTimeout => ErrorKind::AcquisitionTimeout,
            DmmError::MeasureDispersion => ErrorKind::CalibrationQuality,
            DmmError::MissingMeasurement => ErrorKind::CalibrationState,
            DmmError::WrongParams
            | DmmError::ValueWrongUnit
            | DmmError::ValueFormat
            | DmmError::Generic(_)
            | DmmError::UnrecognizedCommand(_)
            | DmmError::EmptyCommand => ErrorKind::Input,
            DmmError::Transport(_) => ErrorKind::Transport,
        }
    }
}

impl From<std::io::Error> for DmmError {
    fn from(e: std::io::Error) -> Self {
        DmmError::Transport(e.to_string())
    }
}
