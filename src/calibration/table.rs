use std::fmt::Write;

use crate::error::DmmError;
use crate::scale::{Scale, SCALE_COUNT};

/// Correction applied to raw readings of one scale: `raw * mult + add`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoefficientPair {
    pub mult: f32,
    pub add: f32,
}

impl Default for CoefficientPair {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl CoefficientPair {
    pub const IDENTITY: Self = Self { mult: 1.0, add: 0.0 };

    pub fn new(mult: f32, add: f32) -> Self {
        Self { mult, add }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        raw * f64::from(self.mult) + f64::from(self.add)
    }

    /// Describes which of the two coefficients differ from `previous`.
    pub fn describe_change(&self, previous: &CoefficientPair) -> String {
        let mut parts = Vec::new();
        if self.mult != previous.mult {
            parts.push(format!("Mult. coeff: {} -> {}", previous.mult, self.mult));
        }
        if self.add != previous.add {
            parts.push(format!("Add. coeff: {} -> {}", previous.add, self.add));
        }
        if parts.is_empty() {
            String::from("Coefficients unchanged")
        } else {
            parts.join(", ")
        }
    }
}

/// One coefficient pair per entry of the scale catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientTable {
    pairs: [CoefficientPair; SCALE_COUNT],
}

impl Default for CoefficientTable {
    fn default() -> Self {
        Self {
            pairs: [CoefficientPair::IDENTITY; SCALE_COUNT],
        }
    }
}

impl CoefficientTable {
    pub fn get(&self, scale: Scale) -> CoefficientPair {
        self.pairs[scale.index()]
    }

    pub fn set(&mut self, scale: Scale, pair: CoefficientPair) {
        self.pairs[scale.index()] = pair;
    }

    pub fn pairs(&self) -> &[CoefficientPair; SCALE_COUNT] {
        &self.pairs
    }

    /// Number of entries that differ from `other`.
    pub fn count_differences(&self, other: &CoefficientTable) -> usize {
        self.pairs
            .iter()
            .zip(other.pairs.iter())
            .filter(|(a, b)| a != b)
            .count()
    }

    /// Text dump of the whole table, one `index,mult,add` line per scale.
    ///
    /// Every data line can be fed back verbatim as the argument list of
    /// `DMMImportCalib`.
    pub fn export(&self) -> String {
        let mut out = String::with_capacity(32 * (SCALE_COUNT + 1));
        let _ = write!(
            out,
            "Calibration coefficients for {} scales (index,mult,add):\r\n",
            SCALE_COUNT
        );
        for (index, pair) in self.pairs.iter().enumerate() {
            let _ = write!(out, "{},{},{}\r\n", index, pair.mult, pair.add);
        }
        out
    }

    /// Overwrites one entry in memory. Nothing is persisted.
    pub fn import(&mut self, index: i64, mult: f32, add: f32) -> Result<Scale, DmmError> {
        let index = usize::try_from(index).map_err(|_| DmmError::ScaleIndex)?;
        let scale = Scale::from_index(index)?;
        self.set(scale, CoefficientPair::new(mult, add));
        Ok(scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_export(text: &str) -> Vec<(i64, f32, f32)> {
        text.lines()
            .skip(1)
            .map(|line| {
                let mut parts = line.trim_end().split(',');
                let idx = parts.next().unwrap().parse().unwrap();
                let mult = parts.next().unwrap().parse().unwrap();
                let add = parts.next().unwrap().parse().unwrap();
                (idx, mult, add)
            })
            .collect()
    }

    #[test]
    fn default_table_is_identity() {
        let t = CoefficientTable::default();
        assert!(t.pairs().iter().all(|p| *p == CoefficientPair::IDENTITY));
    }

    #[test]
    fn export_has_one_line_per_scale() {
        let text = CoefficientTable::default().export();
        assert_eq!(text.lines().count(), SCALE_COUNT + 1);
        assert!(text.starts_with("Calibration coefficients for 27 scales"));
        assert!(text.contains("\r\n7,1,0\r\n"));
    }

    #[test]
    fn export_import_export_round_trip() {
        let mut source = CoefficientTable::default();
        source.import(3, 1.000_123_4, -0.000_56).unwrap();
        source.import(7, 0.998_7, 0.002_5).unwrap();
        source.import(26, 1.0 / 3.0, 1e-7).unwrap();
        let exported = source.export();

        let mut target = CoefficientTable::default();
        for (idx, mult, add) in parse_export(&exported) {
            target.import(idx, mult, add).unwrap();
        }
        assert_eq!(target, source);
        assert_eq!(target.export(), exported);
    }

    #[test]
    fn import_rejects_out_of_range_index() {
        let mut t = CoefficientTable::default();
        assert_eq!(t.import(27, 1.0, 0.0), Err(DmmError::ScaleIndex));
        assert_eq!(t.import(-1, 1.0, 0.0), Err(DmmError::ScaleIndex));
        assert_eq!(t, CoefficientTable::default());
    }

    #[test]
    fn count_differences_counts_entries() {
        let a = CoefficientTable::default();
        let mut b = a.clone();
        b.import(0, 2.0, 0.0).unwrap();
        b.import(5, 1.0, 0.5).unwrap();
        assert_eq!(a.count_differences(&b), 2);
    }

    #[test]
    fn describe_change_lists_changed_coefficients() {
        let old = CoefficientPair::IDENTITY;
        assert_eq!(
            CoefficientPair::new(1.0, -0.25).describe_change(&old),
            "Add. coeff: 0 -> -0.25"
        );
        assert_eq!(old.describe_change(&old), "Coefficients unchanged");
    }
}
