//! Engineering-unit formatting and interpretation of measured values.

use crate::error::DmmError;
use crate::scale::{Scale, Unit};

const PREFIXES: [(char, f64); 4] = [('M', 1e6), ('k', 1e3), ('m', 1e-3), ('u', 1e-6)];
const STEPS: [(&str, f64); 5] = [("M", 1e6), ("k", 1e3), ("", 1.0), ("m", 1e-3), ("u", 1e-6)];

/// Formats `value` with an engineering prefix and four decimals,
/// e.g. `4.9987 V` or `-12.5000 mA`.
pub fn format_value(value: f64, unit: Unit) -> String {
    let magnitude = value.abs();
    let mut step = if magnitude >= 1e6 {
        0
    } else if magnitude >= 1e3 {
        1
    } else if magnitude >= 1.0 || magnitude == 0.0 {
        2
    } else if magnitude >= 1e-3 {
        3
    } else {
        4
    };
    let mut scaled = round4(value / STEPS[step].1);
    // Rounding may carry into the next decade, e.g. 999.99996 V.
    if scaled.abs() >= 1000.0 && step > 0 {
        step -= 1;
        scaled = round4(value / STEPS[step].1);
    }
    format!("{:.4} {}{}", scaled, STEPS[step].0, unit.symbol())
}

fn round4(value: f64) -> f64 {
    (value * 1e4).round() / 1e4
}

/// Formats an uncalibrated reading the way the raw stream reports it.
pub fn format_raw(value: f64) -> String {
    format!("{:.6}", value)
}

/// Parses a reference value such as `5`, `500mV`, `-2.5 mA` or `10kOhm`
/// for use on `scale`.
///
/// A unit that belongs to another kind of scale is rejected with
/// [`DmmError::ValueWrongUnit`]; anything that is not a number with an
/// optional prefix and unit is a [`DmmError::ValueFormat`].
pub fn interpret_value(text: &str, scale: Scale) -> Result<f64, DmmError> {
    let text = text.trim();
    let (number, suffix) = split_number(text).ok_or(DmmError::ValueFormat)?;
    let suffix = suffix.trim();
    if suffix.is_empty() {
        return Ok(number);
    }

    let expected = scale.unit();
    match parse_suffix(suffix) {
        Some((_, Some(unit))) if unit != expected => Err(DmmError::ValueWrongUnit),
        Some((factor, _)) => Ok(number * factor),
        None => Err(DmmError::ValueFormat),
    }
}

// Leading decimal number: sign, digits, fraction, exponent.
fn split_number(text: &str) -> Option<(f64, &str)> {
    let bytes = text.as_bytes();
    let digits_from = |start: usize| {
        bytes[start.min(bytes.len())..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count()
    };

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_digits = digits_from(end);
    end += int_digits;
    let mut frac_digits = 0;
    if bytes.get(end) == Some(&b'.') {
        frac_digits = digits_from(end + 1);
        if int_digits + frac_digits > 0 {
            end += 1 + frac_digits;
        }
    }
    if int_digits + frac_digits == 0 {
        return None;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exp_digits = digits_from(end + 1 + sign);
        if exp_digits > 0 {
            end += 1 + sign + exp_digits;
        }
    }

    text[..end]
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| (v, &text[end..]))
}

fn parse_unit(symbol: &str) -> Option<Unit> {
    match symbol {
        "V" => Some(Unit::Volt),
        "A" => Some(Unit::Ampere),
        "Ohm" | "ohm" | "Ω" => Some(Unit::Ohm),
        _ => None,
    }
}

// Returns the prefix multiplier and the unit, if one was given.
fn parse_suffix(suffix: &str) -> Option<(f64, Option<Unit>)> {
    if let Some(unit) = parse_unit(suffix) {
        return Some((1.0, Some(unit)));
    }
    let mut chars = suffix.chars();
    let first = chars.next()?;
    let factor = PREFIXES.iter().find(|(p, _)| *p == first)?.1;
    let rest = chars.as_str();
    if rest.is_empty() {
        return Some((factor, None));
    }
    parse_unit(rest).map(|unit| (factor, Some(unit)))
}
