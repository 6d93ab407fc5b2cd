//! Duration parsing utilities.

use std::time::Duration;

use anyhow::Context;

/// Parse a duration string like "1d", "2h", "30m", "300s", "500ms" or "300".
///
/// Supports:
/// - Plain numbers (interpreted as seconds): "300"
/// - Milliseconds suffix: "500ms"
/// - Seconds suffix: "300s"
/// - Minutes suffix: "30m"
/// - Hours suffix: "2h"
/// - Days suffix: "1d"
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    // "ms" must be checked before "m" and "s".
    let (num_str, unit_secs, unit_name) = if let Some(n) = s.strip_suffix("ms") {
        let millis: u64 = n
            .trim()
            .parse()
            .with_context(|| format!("Invalid milliseconds value: {n}"))?;
        return Ok(Duration::from_millis(millis));
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86_400, "days")
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600, "hours")
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60, "minutes")
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1, "seconds")
    } else {
        (s, 1, "duration")
    };

    let value: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid {unit_name} value: {num_str}"))?;
    let secs = value
        .checked_mul(unit_secs)
        .with_context(|| format!("Duration too large: {s}"))?;
    Ok(Duration::from_secs(secs))
}
