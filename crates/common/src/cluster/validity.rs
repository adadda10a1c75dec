use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const YEAR: u64 = 365 * DAY;

/// Maximum validities the cluster's resources are issued with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    /// Lease TTLs of the PKI mounts and lifetime of their CAs
    pub ca: Duration,
    /// Certificates issued through the `admin` signing role
    pub admin: Duration,
    /// Component certificates and the period of instance tokens
    pub components: Duration,
    /// Bootstrap tokens
    pub init_tokens: Duration,
}

impl Default for Validity {
    fn default() -> Self {
        Self {
            ca: Duration::from_secs(20 * YEAR),
            admin: Duration::from_secs(YEAR),
            components: Duration::from_secs(30 * DAY),
            init_tokens: Duration::from_secs(5 * YEAR),
        }
    }
}

/// Parse a duration such as `720h`, `30d`, `1h30m`, `20y` or bare seconds
///
/// Units: `s`, `m`, `h`, `d`, `y` (365 days). Components may be chained and
///  are summed.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let input = input.trim();
    let invalid = || ConfigError::InvalidDuration(input.to_string());

    if input.is_empty() {
        return Err(invalid());
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
            'm' => MINUTE,
            'h' => HOUR,
            'd' => DAY,
            'y' => YEAR,
            _ => return Err(invalid()),
        };
        let value: u64 = number.parse().map_err(|_| invalid())?;
        total = value
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;
        number.clear();
    }
    if !number.is_empty() {
        return Err(invalid());
    }

    Ok(Duration::from_secs(total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("3600").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("720h").unwrap(), Duration::from_secs(720 * HOUR));
        assert_eq!(parse_duration("30d").unwrap(), Duration::from_secs(30 * DAY));
        assert_eq!(parse_duration("20y").unwrap(), Duration::from_secs(20 * YEAR));
        assert_eq!(
            parse_duration("1h30m").unwrap(),
            Duration::from_secs(HOUR + 30 * MINUTE)
        );
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for input in ["", "h", "10x", "1h30", "-5s", "1.5h"] {
            assert!(parse_duration(input).is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn test_default_validity() {
        let validity = Validity::default();
        assert_eq!(validity.ca, parse_duration("20y").unwrap());
        assert_eq!(validity.admin, parse_duration("1y").unwrap());
        assert_eq!(validity.components, parse_duration("30d").unwrap());
        assert_eq!(validity.init_tokens, parse_duration("5y").unwrap());
    }
}
