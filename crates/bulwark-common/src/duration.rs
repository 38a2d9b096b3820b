//! Go-style duration strings
//!
//! The StorageCluster spec stores durations the way `metav1.Duration`
//! serialises them: a sequence of `<number><unit>` pairs such as `24h`,
//! `1h30m`, or `24h0m0s`. Units `h`, `m`, `s`, and `ms` are accepted; a bare
//! integer is read as seconds.

use std::time::Duration;

use crate::Error;

/// Parse a duration string such as `1h30m` or `3600s`
pub fn parse_duration(input: &str) -> Result<Duration, Error> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::validation("empty duration"));
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let invalid = || {
        Error::validation(format!(
            "invalid duration '{}', expected e.g. 24h, 1h30m, 3600s",
            input
        ))
    };

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let value: u64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "h" => Duration::from_secs(value.checked_mul(3600).ok_or_else(invalid)?),
            "m" => Duration::from_secs(value.checked_mul(60).ok_or_else(invalid)?),
            "s" => Duration::from_secs(value),
            "ms" => Duration::from_millis(value),
            _ => return Err(invalid()),
        };
        total = total.checked_add(part).ok_or_else(invalid)?;
    }

    Ok(total)
}
