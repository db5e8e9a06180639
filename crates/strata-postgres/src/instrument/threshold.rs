use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Slow-query threshold in milliseconds; `0` disables instrumentation.
///
/// Parsing is lenient: a value that is not a non-negative integer is treated as
/// disabled instead of failing startup. That includes integral floats, so
/// `"5.0"` disables instrumentation rather than meaning five milliseconds.
///
/// ```rust
/// use strata_postgres::SlowQueryThreshold;
///
/// assert_eq!("250".parse::<SlowQueryThreshold>().unwrap().as_millis(), 250);
/// assert!(!"-5".parse::<SlowQueryThreshold>().unwrap().is_enabled());
/// assert!(!"5.0".parse::<SlowQueryThreshold>().unwrap().is_enabled());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlowQueryThreshold(u64);

impl SlowQueryThreshold {
    /// Threshold that never reports.
    pub const DISABLED: Self = Self(0);

    /// Creates a threshold from milliseconds.
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Parses a configured value, falling back to [`Self::DISABLED`].
    ///
    /// Non-numeric, negative and fractional values are all treated as disabled,
    /// even when the fraction is zero (`"5.0"`).
    pub fn parse_lenient(value: &str) -> Self {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .unwrap_or(Self::DISABLED)
    }

    /// Parses an optional environment value; unset means disabled.
    pub fn from_env_value(value: Option<&str>) -> Self {
        value.map(Self::parse_lenient).unwrap_or_default()
    }

    /// Returns whether slow queries are reported at all.
    #[inline]
    pub const fn is_enabled(&self) -> bool {
        self.0 > 0
    }

    /// Returns the threshold in milliseconds.
    #[inline]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns the threshold as a [`Duration`].
    #[inline]
    pub const fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }

    /// Returns whether `elapsed` meets or exceeds an enabled threshold.
    #[inline]
    pub fn is_exceeded_by(&self, elapsed: Duration) -> bool {
        self.is_enabled() && elapsed >= self.as_duration()
    }
}

impl FromStr for SlowQueryThreshold {
    type Err = Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_lenient(value))
    }
}

impl From<u64> for SlowQueryThreshold {
    fn from(millis: u64) -> Self {
        Self(millis)
    }
}

impl fmt::Display for SlowQueryThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_enabled() {
            write!(f, "{}ms", self.0)
        } else {
            f.write_str("disabled")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_non_negative_integers() {
        assert_eq!(SlowQueryThreshold::parse_lenient("50").as_millis(), 50);
        assert_eq!(SlowQueryThreshold::parse_lenient(" 1200 ").as_millis(), 1200);
        assert_eq!(SlowQueryThreshold::parse_lenient("0"), SlowQueryThreshold::DISABLED);
    }

    #[test]
    fn invalid_values_disable() {
        for value in ["", "abc", "-5", "12.5", "5.0", "1e3", "50ms"] {
            assert_eq!(
                SlowQueryThreshold::parse_lenient(value),
                SlowQueryThreshold::DISABLED,
                "{value:?} should disable the threshold"
            );
        }
    }

    #[test]
    fn unset_env_value_disables() {
        assert!(!SlowQueryThreshold::from_env_value(None).is_enabled());
        assert!(SlowQueryThreshold::from_env_value(Some("10")).is_enabled());
    }

    #[test]
    fn threshold_is_inclusive() {
        let threshold = SlowQueryThreshold::from_millis(50);
        assert!(!threshold.is_exceeded_by(Duration::from_millis(49)));
        assert!(threshold.is_exceeded_by(Duration::from_millis(50)));
        assert!(threshold.is_exceeded_by(Duration::from_millis(60)));
        assert!(!SlowQueryThreshold::DISABLED.is_exceeded_by(Duration::from_secs(3600)));
    }

    #[test]
    fn displays_disabled() {
        assert_eq!(SlowQueryThreshold::DISABLED.to_string(), "disabled");
        assert_eq!(SlowQueryThreshold::from_millis(75).to_string(), "75ms");
    }
}
