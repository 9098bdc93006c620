use std::time::Duration;

/// Parses a compact duration string such as `30s`, `2m` or `1h30m`.
///
/// Each segment is a run of digits followed by one of `ms`, `s`, `m`, `h` or `d`.
/// A bare number is read as seconds. Returns `None` for empty, malformed or
/// overflowing input.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use quiver_utils::time::parse_duration;
///
/// assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
/// assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
/// ```
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(secs) = input.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total_ms: u64 = 0;
    let mut rest = input;

    while !rest.is_empty() {
        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let number: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let (unit_ms, unit_len) = if rest.starts_with("ms") {
            (1, 2)
        } else {
            match rest.chars().next()? {
                's' => (1_000, 1),
                'm' => (60_000, 1),
                'h' => (3_600_000, 1),
                'd' => (86_400_000, 1),
                _ => return None,
            }
        };
        rest = &rest[unit_len..];

        total_ms = total_ms.checked_add(number.checked_mul(unit_ms)?)?;
    }

    Some(Duration::from_millis(total_ms))
}
