//! The fixed catalogue of measurement scales.
//!
//! A scale is identified by its position in [`SCALES`]. The position is what
//! `DMMConfig` reports back and what the calibration tables are indexed by,
//! so the order must never change once coefficients have been persisted.

use std::fmt;

use crate::error::DmmError;

/// Measurement mode of a scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleKind {
    Resistance,
    VoltageDc,
    VoltageAc,
    CurrentDc,
    CurrentAc,
    Continuity,
    Diode,
}

/// Base unit of the values measured on a scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Ohm,
    Volt,
    Ampere,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Ohm => "Ohm",
            Unit::Volt => "V",
            Unit::Ampere => "A",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleInfo {
    pub name: &'static str,
    pub kind: ScaleKind,
    /// Magnitude of the range end, in base units.
    pub full_scale: f64,
}

impl ScaleInfo {
    const fn new(name: &'static str, kind: ScaleKind, full_scale: f64) -> Self {
        Self { name, kind, full_scale }
    }

    pub fn unit(&self) -> Unit {
        match self.kind {
            ScaleKind::Resistance | ScaleKind::Continuity => Unit::Ohm,
            ScaleKind::VoltageDc | ScaleKind::VoltageAc | ScaleKind::Diode => Unit::Volt,
            ScaleKind::CurrentDc | ScaleKind::CurrentAc => Unit::Ampere,
        }
    }
}

use ScaleKind::*;

pub const SCALES: [ScaleInfo; 27] = [
    ScaleInfo::new("Resistance50M", Resistance, 50e6),
    ScaleInfo::new("Resistance5M", Resistance, 5e6),
    ScaleInfo::new("Resistance500k", Resistance, 500e3),
    ScaleInfo::new("Resistance50k", Resistance, 50e3),
    ScaleInfo::new("Resistance5k", Resistance, 5e3),
    ScaleInfo::new("Resistance500", Resistance, 500.0),
    ScaleInfo::new("Resistance50", Resistance, 50.0),
    ScaleInfo::new("VoltageDC5", VoltageDc, 5.0),
    ScaleInfo::new("VoltageDC50", VoltageDc, 50.0),
    ScaleInfo::new("VoltageDC500m", VoltageDc, 0.5),
    ScaleInfo::new("VoltageDC50m", VoltageDc, 0.05),
    ScaleInfo::new("VoltageAC30", VoltageAc, 30.0),
    ScaleInfo::new("VoltageAC5", VoltageAc, 5.0),
    ScaleInfo::new("VoltageAC500m", VoltageAc, 0.5),
    ScaleInfo::new("VoltageAC50m", VoltageAc, 0.05),
    ScaleInfo::new("CurrentDC5", CurrentDc, 5.0),
    ScaleInfo::new("CurrentAC5", CurrentAc, 5.0),
    ScaleInfo::new("Continuity", Continuity, 500.0),
    ScaleInfo::new("Diode", Diode, 5.0),
    ScaleInfo::new("CurrentDC500m", CurrentDc, 0.5),
    ScaleInfo::new("CurrentDC50m", CurrentDc, 0.05),
    ScaleInfo::new("CurrentDC5m", CurrentDc, 5e-3),
    ScaleInfo::new("CurrentDC500u", CurrentDc, 500e-6),
    ScaleInfo::new("CurrentAC500m", CurrentAc, 0.5),
    ScaleInfo::new("CurrentAC50m", CurrentAc, 0.05),
    ScaleInfo::new("CurrentAC5m", CurrentAc, 5e-3),
    ScaleInfo::new("CurrentAC500u", CurrentAc, 500e-6),
];

pub const SCALE_COUNT: usize = SCALES.len();

/// Index into [`SCALES`]; only constructible for valid positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scale(usize);

impl Scale {
    pub fn from_index(index: usize) -> Result<Self, DmmError> {
        if index < SCALE_COUNT {
            Ok(Scale(index))
        } else {
            Err(DmmError::ScaleIndex)
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn by_name(name: &str) -> Option<Self> {
        Scale::all().find(|s| s.name() == name)
    }

    pub fn index(self) -> usize {
        self.0
    }

    pub fn info(self) -> &'static ScaleInfo {
        &SCALES[self.0]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn unit(self) -> Unit {
        self.info().unit()
    }

    pub fn all() -> impl Iterator<Item = Scale> {
        (0..SCALE_COUNT).map(Scale)
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
