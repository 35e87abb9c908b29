//! Timeframe utilities for expressing uniform bar intervals.
//!
//! A [`Timeframe`] pairs a non-zero amount with a fixed-width [`TimeframeUnit`].
//! Only fixed-width units are supported so that every timeframe maps onto an
//! epoch-anchored window of a constant number of seconds.
//!
//! Typical usage:
//! ```
//! use std::num::NonZeroU32;
//! use market_data::models::timeframe::{Timeframe, TimeframeUnit};
//!
//! let tf: Timeframe = "15m".parse().unwrap();
//! assert_eq!(tf, Timeframe::new(NonZeroU32::new(15).unwrap(), TimeframeUnit::Minute));
//! assert_eq!(tf.seconds(), 900);
//! ```

use std::{fmt, num::NonZeroU32, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bucket::{SECS_PER_DAY, SECS_PER_HOUR, SECS_PER_MINUTE};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeframeError {
    #[error("Invalid amount in timeframe {input:?}: {message}")]
    InvalidAmount { input: String, message: String },

    #[error("Unknown timeframe unit {unit:?} (use m/h/D)")]
    UnknownUnit { unit: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

/// Fixed-width timeframe granularity, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeframeUnit {
    Minute,
    Hour,
    Day,
}

impl TimeframeUnit {
    pub const fn seconds(self) -> i64 {
        match self {
            TimeframeUnit::Minute => SECS_PER_MINUTE,
            TimeframeUnit::Hour => SECS_PER_HOUR,
            TimeframeUnit::Day => SECS_PER_DAY,
        }
    }
}

/// A timeframe = amount × unit (e.g., 1-Minute, 15-Minute, 1-Hour).
///
/// Serialized as its display string (`"5m"`, `"1h"`, `"1D"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe {
    unit: TimeframeUnit,
    amount: NonZeroU32,
}

impl Timeframe {
    /// Builds a timeframe expressed in the largest unit that divides it, so
    /// `60m` and `1h` are the same value.
    pub fn new(amount: NonZeroU32, unit: TimeframeUnit) -> Self {
        let secs = amount.get() as i64 * unit.seconds();
        for wide in [TimeframeUnit::Day, TimeframeUnit::Hour] {
            if wide > unit && secs % wide.seconds() == 0 {
                if let Some(amount) = u32::try_from(secs / wide.seconds())
                    .ok()
                    .and_then(NonZeroU32::new)
                {
                    return Self { unit: wide, amount };
                }
            }
        }
        Self { unit, amount }
    }

    pub fn minutes(amount: u32) -> Result<Self, TimeframeError> {
        Self::checked(amount, TimeframeUnit::Minute)
    }

    pub fn hours(amount: u32) -> Result<Self, TimeframeError> {
        Self::checked(amount, TimeframeUnit::Hour)
    }

    pub fn days(amount: u32) -> Result<Self, TimeframeError> {
        Self::checked(amount, TimeframeUnit::Day)
    }

    fn checked(amount: u32, unit: TimeframeUnit) -> Result<Self, TimeframeError> {
        let amount = NonZeroU32::new(amount).ok_or_else(|| TimeframeError::InvalidAmount {
            input: format!("{amount}{unit:?}"),
            message: "amount must be > 0".into(),
        })?;
        Ok(Self::new(amount, unit))
    }

    pub const fn amount(&self) -> NonZeroU32 {
        self.amount
    }

    pub const fn unit(&self) -> TimeframeUnit {
        self.unit
    }

    /// Width of one bar in seconds.
    pub const fn seconds(&self) -> i64 {
        self.amount.get() as i64 * self.unit.seconds()
    }

    /// How many bars of `base` make up one bar of `self`, if `self` is an exact multiple.
    pub fn multiple_of(&self, base: Timeframe) -> Option<u32> {
        let (wide, narrow) = (self.seconds(), base.seconds());
        if wide % narrow != 0 {
            return None;
        }
        u32::try_from(wide / narrow).ok()
    }

    /// The timeframe `multiple` times as wide as `self`, expressed in the largest unit that divides it.
    pub fn scaled(&self, multiple: NonZeroU32) -> Self {
        Self::new(self.amount.saturating_mul(multiple), self.unit)
    }
}

/// Display/parse for config and CLI ergonomics (`"5m"`, `"1h"`, `"1D"`).
impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.amount.get();
        let u = match self.unit {
            TimeframeUnit::Minute => "m",
            TimeframeUnit::Hour => "h",
            TimeframeUnit::Day => "D",
        };
        write!(f, "{a}{u}")
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    /// Accepts the short form (`5m`, `1h`, `1D`) as well as long suffixes
    /// (`5min`, `1hour`, `1day`). Unit matching is case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TimeframeError::InvalidInput {
                message: "empty timeframe".into(),
            });
        }
        let digits_end = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| TimeframeError::UnknownUnit { unit: String::new() })?;
        let (digits, unit) = s.split_at(digits_end);
        if digits.is_empty() {
            return Err(TimeframeError::InvalidAmount {
                input: s.to_string(),
                message: "missing number".into(),
            });
        }
        let amount: u32 = digits.parse().map_err(|_| TimeframeError::InvalidAmount {
            input: s.to_string(),
            message: "not a valid u32".into(),
        })?;
        let amount = NonZeroU32::new(amount).ok_or_else(|| TimeframeError::InvalidAmount {
            input: s.to_string(),
            message: "amount must be > 0".into(),
        })?;
        let unit = match unit.trim().to_ascii_lowercase().as_str() {
            "m" | "min" | "mins" | "minute" | "minutes" => TimeframeUnit::Minute,
            "h" | "hr" | "hour" | "hours" => TimeframeUnit::Hour,
            "d" | "day" | "days" => TimeframeUnit::Day,
            other => {
                return Err(TimeframeError::UnknownUnit {
                    unit: other.to_string(),
                });
            }
        };
        Ok(Timeframe::new(amount, unit))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = TimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}
