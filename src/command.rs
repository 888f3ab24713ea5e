//! Command table and line decoding.
//!
//! A request line is `<name> <arg>,<arg>,...`: the name is separated from the
//! arguments by whitespace, arguments from each other by commas.

use std::str::Split;

use crate::error::DmmError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKey {
    /// The line held no command.
    None,
    /// The first token matched no table entry.
    Invalid,
    Config,
    CalibP,
    CalibN,
    CalibZ,
    MeasureRep,
    MeasureStop,
    MeasureRaw,
    MeasureAvg,
    SaveEprom,
    VerifyEprom,
    ExportCalib,
    ImportCalib,
    MeasureForCalibP,
    MeasureForCalibN,
    FinalizeCalibP,
    FinalizeCalibN,
    RestoreFactCalibs,
    ReadSerialNo,
}

/// Command names as sent on the wire. Case-sensitive.
pub const COMMANDS: [(&str, CommandKey); 18] = [
    ("DMMConfig", CommandKey::Config),
    ("DMMCalibP", CommandKey::CalibP),
    ("DMMCalibN", CommandKey::CalibN),
    ("DMMCalibZ", CommandKey::CalibZ),
    ("DMMMeasureRep", CommandKey::MeasureRep),
    ("DMMMeasureStop", CommandKey::MeasureStop),
    ("DMMMeasureRaw", CommandKey::MeasureRaw),
    ("DMMMeasureAvg", CommandKey::MeasureAvg),
    ("DMMSaveEPROM", CommandKey::SaveEprom),
    ("DMMVerifyEPROM", CommandKey::VerifyEprom),
    ("DMMExportCalib", CommandKey::ExportCalib),
    ("DMMImportCalib", CommandKey::ImportCalib),
    ("DMMMeasureForCalibP", CommandKey::MeasureForCalibP),
    ("DMMMeasureForCalibN", CommandKey::MeasureForCalibN),
    ("DMMFinalizeCalibP", CommandKey::FinalizeCalibP),
    ("DMMFinalizeCalibN", CommandKey::FinalizeCalibN),
    ("DMMRestoreFactCalibs", CommandKey::RestoreFactCalibs),
    ("DMMReadSerialNo", CommandKey::ReadSerialNo),
];

impl CommandKey {
    /// Linear search of [`COMMANDS`].
    pub fn lookup(name: &str) -> Option<CommandKey> {
        COMMANDS
            .iter()
            .find(|(candidate, _)| *candidate == name)
            .map(|(_, key)| *key)
    }

    pub fn name(self) -> Option<&'static str> {
        COMMANDS
            .iter()
            .find(|(_, key)| *key == self)
            .map(|(name, _)| *name)
    }
}

/// Comma-separated arguments of one decoded line, consumed in order.
#[derive(Debug, Clone)]
pub struct Arguments<'a> {
    tokens: Split<'a, char>,
}

impl<'a> Arguments<'a> {
    fn new(rest: &'a str) -> Self {
        Self {
            tokens: rest.split(','),
        }
    }

    /// Next argument, or [`DmmError::WrongParams`] when the line has no more.
    pub fn require(&mut self) -> Result<&'a str, DmmError> {
        self.next().ok_or(DmmError::WrongParams)
    }
}

impl<'a> Iterator for Arguments<'a> {
    type Item = &'a str;

    // Empty tokens are skipped, as between two consecutive commas.
    fn next(&mut self) -> Option<&'a str> {
        loop {
            let token = self.tokens.next()?.trim();
            if !token.is_empty() {
                return Some(token);
            }
        }
    }
}

/// One tokenized request line.
#[derive(Debug, Clone)]
pub struct Decoded<'a> {
    pub key: CommandKey,
    pub args: Arguments<'a>,
    /// Why the line did not resolve to a command.
    pub diagnostic: Option<DmmError>,
}

pub fn decode(line: &str) -> Decoded<'_> {
    let line = line.trim();
    let (name, rest) = match line.find(char::is_whitespace) {
        Some(split) => (&line[..split], &line[split..]),
        None => (line, ""),
    };
    let (key, diagnostic) = if name.is_empty() {
        (CommandKey::None, Some(DmmError::EmptyCommand))
    } else {
        match CommandKey::lookup(name) {
            Some(key) => (key, None),
            None => (
                CommandKey::Invalid,
                Some(DmmError::UnrecognizedCommand(name.to_string())),
            ),
        }
    };
    Decoded {
        key,
        args: Arguments::new(rest),
        diagnostic,
    }
}
