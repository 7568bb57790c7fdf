use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr, time::Duration};

/// How long a deleted object is kept before it is purged, e.g. `1h` or `7d12h`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct RetentionDuration(Duration);

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("invalid unit: {}", EXPECTED_UNITS)]
    InvalidUnit,

    #[error("missing a unit: {}", EXPECTED_UNITS)]
    NoUnit,

    #[error("retention must not be negative")]
    Negative,

    #[error("invalid number: {}", .0)]
    NotANumber(#[from] std::num::ParseFloatError),

    #[error("retention is too long")]
    Overflow,
}

const EXPECTED_UNITS: &str = "expected one of 's', 'm', 'h' or 'd'";

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

impl RetentionDuration {
    #[inline]
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for RetentionDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl From<RetentionDuration> for Duration {
    fn from(RetentionDuration(duration): RetentionDuration) -> Self {
        duration
    }
}

impl fmt::Display for RetentionDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs != 0 && secs % DAY.as_secs() == 0 {
            write!(f, "{}d", secs / DAY.as_secs())
        } else if secs != 0 && secs % HOUR.as_secs() == 0 {
            write!(f, "{}h", secs / HOUR.as_secs())
        } else if secs != 0 && secs % MINUTE.as_secs() == 0 {
            write!(f, "{}m", secs / MINUTE.as_secs())
        } else {
            write!(f, "{}s", self.0.as_secs_f64())
        }
    }
}

impl FromStr for RetentionDuration {
    type Err = ParseError;

    fn from_str(mut s: &str) -> Result<Self, Self::Err> {
        fn duration_from_units(val: f64, unit: &str) -> Result<Duration, ParseError> {
            let base = match unit {
                "s" => Duration::from_secs(1),
                "m" => MINUTE,
                "h" => HOUR,
                "d" => DAY,
                _ => return Err(ParseError::InvalidUnit),
            };
            if val.is_sign_negative() {
                return Err(ParseError::Negative);
            }
            Duration::try_from_secs_f64(val * base.as_secs_f64())
                .map_err(|_| ParseError::Overflow)
        }

        s = s.trim();
        if s.starts_with('-') {
            return Err(ParseError::Negative);
        }
        s = s.trim_start_matches('+');

        if s == "0" {
            return Ok(Self(Duration::ZERO));
        }

        let mut total = Duration::ZERO;
        while !s.is_empty() {
            let Some(unit_start) = s.find(|c: char| c.is_alphabetic()) else {
                return Err(ParseError::NoUnit);
            };
            let (val, rest) = s.split_at(unit_start);
            let val = val.parse::<f64>()?;
            let unit_end = rest
                .find(|c: char| !c.is_alphabetic())
                .unwrap_or(rest.len());
            let (unit, rest) = rest.split_at(unit_end);
            s = rest;
            total = total
                .checked_add(duration_from_units(val, unit)?)
                .ok_or(ParseError::Overflow)?;
        }

        Ok(Self(total))
    }
}

impl Serialize for RetentionDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RetentionDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;
        impl de::Visitor<'_> for Visitor {
            type Value = RetentionDuration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration such as `30m`, `1h` or `7d`")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value.parse().map_err(de::Error::custom)
            }
        }
        deserializer.deserialize_str(Visitor)
    }
}
