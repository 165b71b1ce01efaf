use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// HumanDuration
// ---------------------------------------------------------------------------

/// A duration parsed from a human-readable string like `"250ms"`, `"30s"`,
/// `"5m"`, `"1h"`, `"2d"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HumanDuration(Duration);

impl HumanDuration {
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Nanoseconds, saturating at `i64::MAX`. Engine timestamps are `i64` nanos.
    pub fn as_nanos_i64(&self) -> i64 {
        i64::try_from(self.0.as_nanos()).unwrap_or(i64::MAX)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<HumanDuration> for Duration {
    fn from(hd: HumanDuration) -> Self {
        hd.0
    }
}

impl From<Duration> for HumanDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

const UNITS: &[(&str, u64)] = &[
    ("d", 86_400_000_000_000),
    ("h", 3_600_000_000_000),
    ("m", 60_000_000_000),
    ("s", 1_000_000_000),
    ("ms", 1_000_000),
    ("us", 1_000),
    ("ns", 1),
];

impl FromStr for HumanDuration {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            anyhow::bail!("empty duration string");
        }

        let (num_part, suffix) = split_number_suffix(s)?;
        let value: u64 = num_part
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid number in duration: {s:?}"))?;

        let Some(&(_, unit_nanos)) = UNITS.iter().find(|(name, _)| *name == suffix) else {
            anyhow::bail!(
                "unsupported duration suffix {suffix:?} in {s:?} (expected ns/us/ms/s/m/h/d)"
            )
        };
        let nanos = value
            .checked_mul(unit_nanos)
            .ok_or_else(|| anyhow::anyhow!("duration overflow: {s:?}"))?;

        Ok(Self(Duration::from_nanos(nanos)))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos == 0 {
            return write!(f, "0s");
        }
        for (name, unit) in UNITS {
            let unit = u128::from(*unit);
            if nanos.is_multiple_of(unit) {
                return write!(f, "{}{name}", nanos / unit);
            }
        }
        write!(f, "{nanos}ns")
    }
}

impl Serialize for HumanDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Split a string like `"30s"` into `("30", "s")`.
/// Returns an error if the string is all-digits or all-letters.
fn split_number_suffix(s: &str) -> anyhow::Result<(&str, &str)> {
    let idx = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow::anyhow!("missing suffix in {s:?}"))?;
    if idx == 0 {
        anyhow::bail!("missing numeric part in {s:?}");
    }
    Ok((&s[..idx], &s[idx..]))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_seconds() {
        let d: HumanDuration = "30s".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(30));
        assert_eq!(d.to_string(), "30s");
    }

    #[test]
    fn duration_minutes() {
        let d: HumanDuration = "5m".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(300));
        assert_eq!(d.to_string(), "5m");
    }

    #[test]
    fn duration_hours_normalize_to_days() {
        let d: HumanDuration = "48h".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(48 * 3600));
        assert_eq!(d.to_string(), "2d");
    }

    #[test]
    fn duration_sub_second() {
        let d: HumanDuration = "250ms".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_millis(250));
        assert_eq!(d.as_nanos_i64(), 250_000_000);
        assert_eq!(d.to_string(), "250ms");

        let d: HumanDuration = "1500us".parse().unwrap();
        assert_eq!(d.as_duration(), Duration::from_micros(1500));
        assert_eq!(d.to_string(), "1500us");

        let d: HumanDuration = "7ns".parse().unwrap();
        assert_eq!(d.as_nanos_i64(), 7);
    }

    #[test]
    fn duration_zero() {
        let d: HumanDuration = "0s".parse().unwrap();
        assert!(d.is_zero());
        assert_eq!(d.to_string(), "0s");
    }

    #[test]
    fn duration_errors() {
        assert!("".parse::<HumanDuration>().is_err());
        assert!("30".parse::<HumanDuration>().is_err());
        assert!("30x".parse::<HumanDuration>().is_err());
        assert!("s".parse::<HumanDuration>().is_err());
        assert!("99999999999999999d".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn serde_roundtrip_duration() {
        let d: HumanDuration = "30s".parse().unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, "\"30s\"");
        let d2: HumanDuration = serde_json::from_str(&json).unwrap();
        assert_eq!(d, d2);
    }
}
