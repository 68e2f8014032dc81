//! Timestamp normalization for post dates.
//!
//! Every board family encodes `created_at` differently. This module parses the three
//! encodings into an absolute instant and renders it as `"%x %X"` in the configured
//! display zone. Failures never propagate: they come back as [`DateWarning`]s next to a
//! degraded, non-empty display string.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::booru::site::SiteType;

const DISPLAY_FORMAT: &str = "%x %X";
const ISO_8601_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";
const RFC_2822_LIKE_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Display value used when a date cannot be parsed and the raw input is blank.
pub const UNKNOWN_DATE: &str = "Unknown";

/// Raw timestamp encodings found in board responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
    /// `2019-04-02T12:34:56.789-04:00`
    Iso8601,
    /// `1554222896`
    UnixEpoch,
    /// `Tue Apr 02 12:34:56 -0400 2019`
    Rfc2822Like,
}

impl From<SiteType> for DateFormat {
    fn from(site_type: SiteType) -> Self {
        match site_type {
            SiteType::DanbooruV2 => DateFormat::Iso8601,
            SiteType::Moebooru => DateFormat::UnixEpoch,
            SiteType::Danbooru | SiteType::Gelbooru => DateFormat::Rfc2822Like,
        }
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateFormat::Iso8601 => write!(f, "ISO-8601"),
            DateFormat::UnixEpoch => write!(f, "unix timestamp"),
            DateFormat::Rfc2822Like => write!(f, "RFC-2822"),
        }
    }
}

/// Zone dates are rendered in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DisplayZone {
    #[default]
    Local,
    Utc,
    Offset(FixedOffset),
    /// A zone name that could not be resolved. Dates keep their original offset.
    Unresolved(String),
}

impl FromStr for DisplayZone {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(match trimmed.to_ascii_lowercase().as_str() {
            "" | "local" => DisplayZone::Local,
            "utc" | "z" | "gmt" => DisplayZone::Utc,
            _ => match parse_offset(trimmed) {
                Some(offset) => DisplayZone::Offset(offset),
                None => DisplayZone::Unresolved(trimmed.to_string()),
            },
        })
    }
}

/// Parses `+09:00`, `-0530` or `+9` style offsets.
fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateWarning {
    #[error("failed to parse date '{raw}' as {format}")]
    Unparseable { raw: String, format: DateFormat },

    #[error("could not resolve time zone '{0}', showing the original offset")]
    UnresolvedZone(String),
}

/// Result of normalizing one timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDate {
    pub display: String,
    pub warnings: Vec<DateWarning>,
}

/// Parses a raw timestamp into an absolute instant.
pub fn parse_date(raw: &str, format: DateFormat) -> Result<DateTime<FixedOffset>, DateWarning> {
    let trimmed = raw.trim();
    let parsed = match format {
        DateFormat::Iso8601 => DateTime::parse_from_str(trimmed, ISO_8601_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(trimmed))
            .ok(),
        DateFormat::UnixEpoch => trimmed
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|dt| dt.fixed_offset()),
        DateFormat::Rfc2822Like => DateTime::parse_from_str(trimmed, RFC_2822_LIKE_FORMAT).ok(),
    };

    parsed.ok_or_else(|| DateWarning::Unparseable {
        raw: raw.to_string(),
        format,
    })
}

/// Renders an instant in the display zone, falling back to its own offset.
pub fn format_date(
    date: &DateTime<FixedOffset>,
    zone: &DisplayZone,
) -> (String, Option<DateWarning>) {
    match zone {
        DisplayZone::Local => (date.with_timezone(&Local).format(DISPLAY_FORMAT).to_string(), None),
        DisplayZone::Utc => (date.with_timezone(&Utc).format(DISPLAY_FORMAT).to_string(), None),
        DisplayZone::Offset(offset) => {
            (date.with_timezone(offset).format(DISPLAY_FORMAT).to_string(), None)
        }
        DisplayZone::Unresolved(name) => (
            date.format(DISPLAY_FORMAT).to_string(),
            Some(DateWarning::UnresolvedZone(name.clone())),
        ),
    }
}

/// Parses and renders a timestamp.
///
/// On parse failure the zone conversion is skipped and the raw input is shown as is,
/// or [`UNKNOWN_DATE`] when the input is blank.
pub fn normalize_date(raw: &str, format: DateFormat, zone: &DisplayZone) -> NormalizedDate {
    match parse_date(raw, format) {
        Ok(date) => {
            let (display, warning) = format_date(&date, zone);
            NormalizedDate {
                display,
                warnings: warning.into_iter().collect(),
            }
        }
        Err(warning) => {
            let trimmed = raw.trim();
            let display = if trimmed.is_empty() {
                UNKNOWN_DATE.to_string()
            } else {
                trimmed.to_string()
            };
            NormalizedDate {
                display,
                warnings: vec![warning],
            }
        }
    }
}
