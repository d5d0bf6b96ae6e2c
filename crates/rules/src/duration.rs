//! Duration parsing for rule files and formatting for status output.

use std::time::Duration;

/// Parse a human-readable duration string into a [`Duration`].
///
/// Accepts two forms:
/// - unit components `Xd`, `Xh`, `Xm`, `Xs`, combinable as in `"2h30m"`,
///   `"1d12h"`, `"90s"`; a bare number is seconds;
/// - clock form `[d.]hh:mm:ss[.fffffff]`, as produced by [`format_duration`].
///
/// Returns `None` if the string is empty or unparseable.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains(':') {
        return parse_clock(s);
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else {
            let n: u64 = num_buf.parse().ok()?;
            num_buf.clear();
            let unit = match ch {
                'd' => 86_400,
                'h' => 3_600,
                'm' => 60,
                's' => 1,
                _ => return None,
            };
            total_secs = total_secs.checked_add(n.checked_mul(unit)?)?;
            found_unit = true;
        }
    }

    // Trailing number without unit.
    if !num_buf.is_empty() {
        if found_unit {
            // Ambiguous: "30m15".
            return None;
        }
        let n: u64 = num_buf.parse().ok()?;
        total_secs += n;
    }

    Some(Duration::from_secs(total_secs))
}

fn parse_clock(s: &str) -> Option<Duration> {
    let (days, clock) = match s.split_once('.') {
        // A '.' before the first ':' separates days; after it, fractions.
        Some((d, rest)) if !d.contains(':') => (d.parse::<u64>().ok()?, rest),
        _ => (0, s),
    };

    let mut parts = clock.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds_part = parts.next()?;
    if parts.next().is_some() || hours > 23 || minutes > 59 {
        return None;
    }

    let (secs, nanos) = match seconds_part.split_once('.') {
        Some((secs, frac)) => {
            if frac.is_empty() || frac.len() > 9 || !frac.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let padded = format!("{:0<9}", frac);
            (secs.parse::<u64>().ok()?, padded.parse::<u32>().ok()?)
        }
        None => (seconds_part.parse::<u64>().ok()?, 0),
    };
    if secs > 59 {
        return None;
    }

    let total = days
        .checked_mul(86_400)?
        .checked_add(hours * 3_600 + minutes * 60 + secs)?;
    Some(Duration::new(total, nanos))
}

/// Format a [`Duration`] as `[d.]hh:mm:ss[.fffffff]`.
///
/// Sub-second precision is kept to 100ns ticks and only printed when
/// non-zero: `00:00:02`, `1.02:00:00`, `00:00:00.5000000`.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    let ticks = d.subsec_nanos() / 100;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{}.", days));
    }
    out.push_str(&format!("{:02}:{:02}:{:02}", hours, minutes, seconds));
    if ticks > 0 {
        out.push_str(&format!(".{:07}", ticks));
    }
    out
}

/// Serialize `Option<Duration>` as a nullable [`format_duration`] string.
pub(crate) mod nullable_clock {
    use std::time::Duration;

    use serde::Serializer;

    pub(crate) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&super::format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_units() {
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1_800)));
        assert_eq!(parse_duration("2h30m"), Some(Duration::from_secs(9_000)));
        assert_eq!(
            parse_duration("1d2h30m15s"),
            Some(Duration::from_secs(86_400 + 7_200 + 1_800 + 15))
        );
        assert_eq!(parse_duration("120"), Some(Duration::from_secs(120)));
    }

    #[test]
    fn parse_clock_form() {
        assert_eq!(parse_duration("00:00:02"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("01:30:00"), Some(Duration::from_secs(5_400)));
        assert_eq!(parse_duration("1.02:00:00"), Some(Duration::from_secs(93_600)));
        assert_eq!(parse_duration("00:00:00.5"), Some(Duration::from_millis(500)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("30m15"), None);
        assert_eq!(parse_duration("-5s"), None);
        assert_eq!(parse_duration("00:61:00"), None);
        assert_eq!(parse_duration("00:00"), None);
        assert_eq!(parse_duration("00:00:01:00"), None);
    }

    #[test]
    fn format_clock_form() {
        assert_eq!(format_duration(Duration::from_secs(2)), "00:00:02");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "01:02:05");
        assert_eq!(format_duration(Duration::from_secs(93_600)), "1.02:00:00");
        assert_eq!(format_duration(Duration::from_millis(1_500)), "00:00:01.5000000");
        assert_eq!(format_duration(Duration::ZERO), "00:00:00");
    }

    #[test]
    fn format_output_parses_back() {
        for d in [
            Duration::from_secs(1),
            Duration::from_secs(86_399),
            Duration::from_secs(3 * 86_400 + 5),
            Duration::from_millis(250),
        ] {
            assert_eq!(parse_duration(&format_duration(d)), Some(d));
        }
    }
}
