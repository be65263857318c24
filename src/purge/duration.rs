//! Human durations such as `10m`, `2h30m`, or `1d`

use crate::error::BotError;
use anyhow::Result;
use std::time::Duration;

/// Parse a sequence of `<number><unit>` terms, units `s`, `m`, `h`, `d`.  A bare number is
/// seconds.
pub fn parse(input: &str) -> Result<Duration> {
    let invalid = || BotError::InvalidInput(format!("`{}` is not a duration like `10m` or `2h30m`.", input));

    let input = input.trim().to_lowercase();
    if input.is_empty() {
        return Err(invalid().into());
    }
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut number = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            _ => return Err(invalid().into()),
        };
        let value: u64 = number.parse().map_err(|_| invalid())?;
        total = value
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;
        number.clear();
    }
    // Trailing digits without a unit, e.g. `1h30`
    if !number.is_empty() {
        return Err(invalid().into());
    }

    Ok(Duration::from_secs(total))
}

/// Compact rendering, largest units first: `1d 2h`, `45m`, `0s`.
pub fn format(duration: Duration) -> String {
    let mut secs = duration.as_secs();
    let mut parts = Vec::new();
    for (unit, name) in [(86_400, "d"), (3_600, "h"), (60, "m"), (1, "s")] {
        if secs >= unit {
            parts.push(format!("{}{}", secs / unit, name));
            secs %= unit;
        }
    }
    if parts.is_empty() {
        return "0s".to_owned();
    }
    parts.join(" ")
}
