//! Conversions between playback positions and clock-style time codes

/// Parse a time code into seconds.
///
/// Accepts `HH:MM:SS`, `MM:SS` (read as `00:MM:SS`) and a bare number of
/// seconds. Returns `None` for anything else.
pub fn parse_time_code(text: &str) -> Option<i64> {
    let parts: Vec<&str> = text.trim().split(':').collect();
    let numbers = parts
        .iter()
        .map(|p| p.trim().parse::<i64>().ok().filter(|n| *n >= 0))
        .collect::<Option<Vec<i64>>>()?;

    let (h, m, s) = match numbers.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        [s] => (0, 0, *s),
        _ => return None,
    };

    h.checked_mul(3600)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(s)
}

/// Format seconds as `HH:MM` (seconds truncated).
pub fn format_hh_mm(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60)
}

/// Format seconds as `HH:MM:SS`.
pub fn format_hh_mm_ss(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_code() {
        assert_eq!(parse_time_code("01:02:03"), Some(3723));
        assert_eq!(parse_time_code("02:03"), Some(123));
        assert_eq!(parse_time_code("90"), Some(90));
        assert_eq!(parse_time_code(" 00:01:30 "), Some(90));
    }

    #[test]
    fn test_parse_time_code_rejects_garbage() {
        assert_eq!(parse_time_code(""), None);
        assert_eq!(parse_time_code("1:2:3:4"), None);
        assert_eq!(parse_time_code("ab:cd"), None);
        assert_eq!(parse_time_code("-5"), None);
    }

    #[test]
    fn test_parse_time_code_overflow() {
        assert_eq!(parse_time_code("99999999999999999:00:00"), None);
        assert_eq!(parse_time_code("999999999999999999:00"), None);
        assert_eq!(parse_time_code("00:00:9223372036854775807"), Some(i64::MAX));
    }

    #[test]
    fn test_format() {
        assert_eq!(format_hh_mm(90), "00:01");
        assert_eq!(format_hh_mm(3723), "01:02");
        assert_eq!(format_hh_mm_ss(3723), "01:02:03");
        assert_eq!(format_hh_mm_ss(-1), "00:00:00");
    }
}
