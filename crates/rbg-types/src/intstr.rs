//! Absolute-or-percentage quantities used by rollout strategies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Either an absolute count (`2`) or a percentage of a total (`"25%"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IntOrPercent {
    Int(i32),
    #[serde(with = "percent_string")]
    Percent(u32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntOrPercentError {
    #[error("invalid percentage: {0}")]
    InvalidPercent(String),

    #[error("negative value not allowed: {0}")]
    Negative(i32),
}

impl IntOrPercent {
    /// Resolve against `total`, rounding percentages up or down
    pub fn resolve(&self, total: i32, round_up: bool) -> Result<i32, IntOrPercentError> {
        match *self {
            IntOrPercent::Int(v) if v < 0 => Err(IntOrPercentError::Negative(v)),
            IntOrPercent::Int(v) => Ok(v),
            IntOrPercent::Percent(p) => {
                let scaled = i64::from(total.max(0)) * i64::from(p);
                let value = if round_up {
                    (scaled + 99) / 100
                } else {
                    scaled / 100
                };
                Ok(i32::try_from(value).unwrap_or(i32::MAX))
            }
        }
    }
}

impl Default for IntOrPercent {
    fn default() -> Self {
        IntOrPercent::Int(0)
    }
}

impl fmt::Display for IntOrPercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntOrPercent::Int(v) => write!(f, "{v}"),
            IntOrPercent::Percent(p) => write!(f, "{p}%"),
        }
    }
}

impl FromStr for IntOrPercent {
    type Err = IntOrPercentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(number) = trimmed.strip_suffix('%') {
            return number
                .parse::<u32>()
                .map(IntOrPercent::Percent)
                .map_err(|_| IntOrPercentError::InvalidPercent(s.to_string()));
        }
        match trimmed.parse::<i32>() {
            Ok(v) if v < 0 => Err(IntOrPercentError::Negative(v)),
            Ok(v) => Ok(IntOrPercent::Int(v)),
            Err(_) => Err(IntOrPercentError::InvalidPercent(s.to_string())),
        }
    }
}

mod percent_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value}%"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim()
            .strip_suffix('%')
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| de::Error::custom(format!("expected percentage, got {raw:?}")))
    }
}
