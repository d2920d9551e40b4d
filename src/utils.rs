use std::str::FromStr;
use tokio::time::Duration;

/// Parses a duration string such as "800ms", "5s", "2m" or "1h".
///
/// Supported units:
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let split_at = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("Missing duration unit in '{}'. Use 'ms', 's', 'm' or 'h'.", s))?;
    let (value_str, unit) = s.split_at(split_at);

    let value = u64::from_str(value_str)
        .map_err(|_| format!("Invalid numeric value in duration: '{}'", value_str))?;

    let seconds_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "Unknown duration unit: '{}'. Use 'ms', 's', 'm' or 'h'.",
                unit
            ))
        }
    };

    value
        .checked_mul(seconds_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Invalid numeric value in duration: '{}' is too large", s))
}

/// Parses a boolean flag the way the env config accepts it ("true", "1", "yes").
pub fn parse_flag(s: &str) -> bool {
    matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Splits a comma-separated header string, honouring `\,` as a literal comma.
///
/// Example: "User-Agent:sim/1.0,Accept:text/html\,application/xml"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => {
                if !current.trim().is_empty() {
                    headers.push(current.clone());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if !current.trim().is_empty() {
        headers.push(current);
    }

    headers
}

/// Replaces line breaks so a log entry always renders as a single line.
pub fn single_line(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    mod duration {
        use super::*;

        #[test]
        fn parse_millis() {
            assert_eq!(
                parse_duration_string("800ms").unwrap(),
                Duration::from_millis(800)
            );
        }

        #[test]
        fn parse_seconds() {
            assert_eq!(parse_duration_string("5s").unwrap(), Duration::from_secs(5));
        }

        #[test]
        fn parse_minutes_and_hours() {
            assert_eq!(parse_duration_string("2m").unwrap(), Duration::from_secs(120));
            assert_eq!(parse_duration_string("1h").unwrap(), Duration::from_secs(3600));
        }

        #[test]
        fn trims_whitespace() {
            assert_eq!(
                parse_duration_string("  10s  ").unwrap(),
                Duration::from_secs(10)
            );
        }

        #[test]
        fn empty_string_errors() {
            let err = parse_duration_string("   ").unwrap_err();
            assert!(err.contains("empty"), "error was: {}", err);
        }

        #[test]
        fn no_suffix_errors() {
            let err = parse_duration_string("10").unwrap_err();
            assert!(err.contains("Missing duration unit"), "error was: {}", err);
        }

        #[test]
        fn unknown_suffix_errors() {
            let err = parse_duration_string("10d").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn no_number_errors() {
            let err = parse_duration_string("ms").unwrap_err();
            assert!(err.contains("Invalid numeric"), "error was: {}", err);
        }

        #[test]
        fn overflowing_values_error() {
            let err = parse_duration_string("999999999999999999m").unwrap_err();
            assert!(err.contains("too large"), "error was: {}", err);
            assert!(parse_duration_string("18446744073709551615h").is_err());
            assert!(parse_duration_string("18446744073709551615s").is_ok());
        }

        #[test]
        fn negative_number_errors() {
            let err = parse_duration_string("-5s").unwrap_err();
            assert!(err.contains("Invalid numeric"), "error was: {}", err);
        }
    }

    #[test]
    fn flags() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" YES "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn headers_split_on_unescaped_commas() {
        let result = parse_headers_with_escapes("User-Agent:sim/1.0,Accept:text/html\\,application/xml");
        assert_eq!(result, vec!["User-Agent:sim/1.0", "Accept:text/html,application/xml"]);
    }

    #[test]
    fn headers_keep_backslash_not_before_comma() {
        let result = parse_headers_with_escapes("Path:C:\\Users\\test,Host:example.com");
        assert_eq!(result, vec!["Path:C:\\Users\\test", "Host:example.com"]);
    }

    #[test]
    fn headers_skip_blank_entries() {
        let result = parse_headers_with_escapes("A:1, ,B:2,");
        assert_eq!(result, vec!["A:1", "B:2"]);
    }

    #[test]
    fn single_line_strips_breaks() {
        assert_eq!(single_line("a\nb\r\nc\rd"), "a b c d");
    }
}
