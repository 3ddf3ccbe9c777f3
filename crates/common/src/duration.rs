//! Duration strings in the `1h30m` / `500ms` / `1.5s` notation.

use crate::error::DurationError;
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Parse a duration string made of one or more `<number><unit>` pairs.
///
/// Accepted units: `ns`, `us`, `µs`, `ms`, `s`, `m`, `h`. A bare `0` is
/// allowed. Negative durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Invalid(input.to_string()));
    }
    if s.starts_with('-') {
        return Err(DurationError::Negative(input.to_string()));
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..num_end];
        if number.is_empty() || number == "." {
            return Err(DurationError::Invalid(input.to_string()));
        }
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];
        if unit.is_empty() {
            return Err(DurationError::MissingUnit(input.to_string()));
        }

        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3_600 * NANOS_PER_SEC,
            _ => {
                return Err(DurationError::UnknownUnit {
                    unit: unit.to_string(),
                    input: input.to_string(),
                })
            }
        };

        total = total
            .checked_add(scaled(number, scale, input)?)
            .ok_or_else(|| DurationError::Overflow(input.to_string()))?;
    }

    let secs = u64::try_from(total / NANOS_PER_SEC)
        .map_err(|_| DurationError::Overflow(input.to_string()))?;
    Ok(Duration::new(secs, (total % NANOS_PER_SEC) as u32))
}

fn scaled(number: &str, scale: u128, input: &str) -> Result<u128, DurationError> {
    let (whole, frac) = match number.split_once('.') {
        Some((w, f)) => (w, f),
        None => (number, ""),
    };
    if frac.contains('.') {
        return Err(DurationError::Invalid(input.to_string()));
    }

    let overflow = || DurationError::Overflow(input.to_string());
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };
    let mut value = whole.checked_mul(scale).ok_or_else(overflow)?;

    // Fractional digits beyond the unit's precision are dropped.
    let mut divisor: u128 = 1;
    for digit in frac.chars() {
        divisor = match divisor.checked_mul(10) {
            Some(d) if d <= scale => d,
            _ => break,
        };
        let d = digit.to_digit(10).ok_or_else(overflow)? as u128;
        value = value
            .checked_add(d * (scale / divisor))
            .ok_or_else(overflow)?;
    }
    Ok(value)
}

/// Format a duration the way `parse_duration` reads it, e.g. `11h0m0s`,
/// `1m30s`, `2.5s`, `750ms`.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }

    let nanos = d.as_nanos();
    if nanos < NANOS_PER_SEC {
        return if nanos < 1_000 {
            format!("{}ns", nanos)
        } else if nanos < 1_000_000 {
            format!("{}µs", fraction(nanos, 1_000))
        } else {
            format!("{}ms", fraction(nanos, 1_000_000))
        };
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = fraction((total_secs % 60) as u128 * NANOS_PER_SEC + d.subsec_nanos() as u128, NANOS_PER_SEC);

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn fraction(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let rem = value % unit;
    if rem == 0 {
        return whole.to_string();
    }
    let width = unit.to_string().len() - 1;
    let digits = format!("{:0width$}", rem, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Round `d` to the nearest multiple of `multiple`, halves rounding up.
pub fn round_duration(d: Duration, multiple: Duration) -> Duration {
    let m = multiple.as_nanos();
    if m == 0 {
        return d;
    }
    let n = d.as_nanos();
    let r = n % m;
    let rounded = if r + r < m { n - r } else { n + (m - r) };
    Duration::from_nanos(u64::try_from(rounded).unwrap_or(u64::MAX))
}
