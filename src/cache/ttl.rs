//! Freshness classes and human-readable TTL durations.

use std::fmt;
use std::num::NonZeroU64;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const MONTH: u64 = 30 * DAY;
const YEAR: u64 = 365 * DAY;

/// How quickly the data behind a cache family goes stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Reference data that changes only through admin edits.
    Indefinite,
    /// Hours.
    Long,
    /// Tens of minutes.
    Medium,
    /// A few minutes.
    Short,
    /// Bounded by a user session.
    Session,
    /// Transactional data; never cached.
    Never,
}

impl Freshness {
    pub fn as_str(self) -> &'static str {
        match self {
            Freshness::Indefinite => "indefinite",
            Freshness::Long => "long",
            Freshness::Medium => "medium",
            Freshness::Short => "short",
            Freshness::Session => "session",
            Freshness::Never => "never",
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("invalid duration format: `{input}` (expected e.g. \"30 minutes\" or \"2 days\")")]
    InvalidFormat { input: String },
}

impl DurationError {
    fn invalid(input: &str) -> Self {
        Self::InvalidFormat {
            input: input.to_string(),
        }
    }
}

/// Parse `"<integer> <unit>"` into seconds.
///
/// Accepts seconds, minutes, hours, days, months (30 days) and years
/// (365 days) in singular or plural, plus `sec(s)`, `min(s)` and `hr(s)`.
/// Matching is case-insensitive and surrounding whitespace is ignored; the
/// space between number and unit is optional.
pub fn parse_duration(input: &str) -> Result<u64, DurationError> {
    let trimmed = input.trim();
    let digits_end = trimmed
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, rest) = trimmed.split_at(digits_end);
    if digits.is_empty() {
        return Err(DurationError::invalid(input));
    }

    let unit = rest.trim_start().to_ascii_lowercase();
    let seconds_per_unit = match unit.as_str() {
        "sec" | "secs" | "second" | "seconds" => 1,
        "min" | "mins" | "minute" | "minutes" => MINUTE,
        "hr" | "hrs" | "hour" | "hours" => HOUR,
        "day" | "days" => DAY,
        "month" | "months" => MONTH,
        "year" | "years" => YEAR,
        _ => return Err(DurationError::invalid(input)),
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|amount| amount.checked_mul(seconds_per_unit))
        .ok_or_else(|| DurationError::invalid(input))
}

/// Resolved time-to-live for a cache write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ttl {
    /// Do not cache.
    Never,
    Seconds(NonZeroU64),
}

impl Ttl {
    /// A zero duration means "do not cache".
    pub fn from_secs(secs: u64) -> Self {
        NonZeroU64::new(secs).map_or(Ttl::Never, Ttl::Seconds)
    }

    pub fn parse(input: &str) -> Result<Self, DurationError> {
        parse_duration(input).map(Self::from_secs)
    }

    pub fn as_secs(self) -> Option<u64> {
        match self {
            Ttl::Never => None,
            Ttl::Seconds(secs) => Some(secs.get()),
        }
    }

    pub fn is_cacheable(self) -> bool {
        matches!(self, Ttl::Seconds(_))
    }
}

impl FromStr for Ttl {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = match self {
            Ttl::Never => return f.write_str("never"),
            Ttl::Seconds(secs) => secs.get(),
        };
        let (amount, unit) = [(DAY, "day"), (HOUR, "hour"), (MINUTE, "minute")]
            .into_iter()
            .find(|(size, _)| secs % size == 0)
            .map_or((secs, "second"), |(size, unit)| (secs / size, unit));
        let plural = if amount == 1 { "" } else { "s" };
        write!(f, "{amount} {unit}{plural}")
    }
}
