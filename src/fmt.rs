//! Provides parsing and formatting helpers for durations as they appear in the config.
//!
//! Expirations like `update_expire: 1d` or `submit_expire: 15m` are written as a positive
//! integer followed by an optional unit. [parse_duration](parse_duration) turns these into a
//! **std::time::Duration**, [format_duration](format_duration) renders one back for log output.
use std::fmt::Write;
use std::time::Duration;

/// Parses a duration from a given string.
///
/// This string can have the following suffixes:
/// * **us** or **US**: treats the value as microseconds
/// * **ms** or **MS**: treats the value as milliseconds (also used if no suffix is given)
/// * **s** or **S**: treats the value as seconds
/// * **m** or **M**: treats the value as minutes
/// * **h** or **H**: treats the value as hours
/// * **d** or **D**: treats the value as days
///
/// Returns an **Err** if either a non-integer value is given or if an unknown suffix was provided.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(ems_plat::fmt::parse_duration("1us").unwrap(), Duration::from_micros(1));
/// assert_eq!(ems_plat::fmt::parse_duration("500").unwrap(), Duration::from_millis(500));
/// assert_eq!(ems_plat::fmt::parse_duration("100 ms").unwrap(), Duration::from_millis(100));
/// assert_eq!(ems_plat::fmt::parse_duration("12 s").unwrap(), Duration::from_secs(12));
/// assert_eq!(ems_plat::fmt::parse_duration("15m").unwrap(), Duration::from_secs(15 * 60));
/// assert_eq!(ems_plat::fmt::parse_duration("12 H").unwrap(), Duration::from_secs(12 * 60 * 60));
/// assert_eq!(ems_plat::fmt::parse_duration("30d").unwrap(), Duration::from_secs(30 * 24 * 60 * 60));
///
/// // An invalid suffix results in an error...
/// assert_eq!(ems_plat::fmt::parse_duration("3 Y").is_err(), true);
///
/// // Decimal or negative numbers result in an error...
/// assert_eq!(ems_plat::fmt::parse_duration("1.5h").is_err(), true);
/// assert_eq!(ems_plat::fmt::parse_duration("-1m").is_err(), true);
///
/// // ...and so do values which don't fit into a duration.
/// assert_eq!(ems_plat::fmt::parse_duration("99999999999999999d").is_err(), true);
/// assert_eq!(ems_plat::fmt::parse_duration("99999999999999999h").is_err(), true);
/// ```
pub fn parse_duration(str: impl AsRef<str>) -> anyhow::Result<Duration> {
    lazy_static::lazy_static! {
        static ref NUMBER_AND_UNIT: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *((us|ms|s|m|h|d|US|MS|S|M|H|D)?) *$").unwrap();
    }

    let captures = NUMBER_AND_UNIT.captures(str.as_ref()).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a duration. \
             Expected a positive number and optionally 'us', 'ms', 's', 'm', 'h' or 'd' as unit.",
            str.as_ref()
        )
    })?;

    let number = captures[1].parse::<u64>()?;
    let seconds = |factor: u64| {
        number
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| anyhow::anyhow!("The duration '{}' is too large.", str.as_ref()))
    };

    let duration = match &captures[2] {
        "us" | "US" => Duration::from_micros(number),
        "s" | "S" => Duration::from_secs(number),
        "m" | "M" => seconds(60)?,
        "h" | "H" => seconds(60 * 60)?,
        "d" | "D" => seconds(60 * 60 * 24)?,
        _ => Duration::from_millis(number),
    };

    Ok(duration)
}

/// Formats a duration into a string like "5d 3h 17m 2s 12ms".
///
/// Sub-millisecond durations (which only show up in tests) are rendered in microseconds.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(ems_plat::fmt::format_duration(Duration::from_micros(1)), "1us");
/// assert_eq!(ems_plat::fmt::format_duration(Duration::from_millis(13)), "13ms");
/// assert_eq!(ems_plat::fmt::format_duration(Duration::from_millis(62_013)), "1m 2s 13ms");
/// assert_eq!(ems_plat::fmt::format_duration(Duration::from_secs(15 * 60)), "15m");
/// assert_eq!(ems_plat::fmt::format_duration(Duration::from_secs(24 * 60 * 60 + 60 * 60)), "1d 1h");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let mut result = String::new();

    let mut millis = duration.as_millis();
    if millis == 0 {
        let _ = write!(result, "{}us", duration.as_micros());
        return result;
    }

    for (unit, unit_millis) in [
        ("d", 1000 * 60 * 60 * 24),
        ("h", 1000 * 60 * 60),
        ("m", 1000 * 60),
        ("s", 1000),
        ("ms", 1),
    ] {
        let amount = millis / unit_millis;
        if amount > 0 {
            if !result.is_empty() {
                result.push(' ');
            }
            let _ = write!(result, "{}{}", amount, unit);
            millis %= unit_millis;
        }
    }

    result
}
