use std::fmt;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A stored `ts_iso` value.
///
/// Rows written by this crate always carry an offset, but stores shared with
/// other tools may hold naive local strings. Those are read as UTC and remember
/// that they were naive so exports can render them the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    instant: DateTime<Utc>,
    zoned: bool,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn naive(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            zoned: false,
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::from(dt.with_timezone(&Utc)));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
            .map(|naive| Self::naive(naive.and_utc()))
            .ok_or_else(|| anyhow!("invalid timestamp '{value}'"))
    }

    pub fn instant(&self) -> DateTime<Utc> {
        self.instant
    }

    pub fn is_zoned(&self) -> bool {
        self.zoned
    }

    /// Fixed-width UTC form so that `ORDER BY ts_iso` agrees with time order.
    pub fn to_storage(&self) -> String {
        self.instant.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn to_export(&self) -> String {
        if self.zoned {
            self.instant.format("%Y-%m-%dT%H:%M:%S%z").to_string()
        } else {
            self.instant.format("%Y-%m-%dT%H:%M:%S").to_string()
        }
    }

    /// Signed minutes from `reference` to this timestamp.
    pub fn minutes_since(&self, reference: DateTime<Utc>) -> f64 {
        let delta = self.instant - reference;
        match delta.num_microseconds() {
            Some(micros) => micros as f64 / 60_000_000.0,
            None => delta.num_milliseconds() as f64 / 60_000.0,
        }
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(instant: DateTime<Utc>) -> Self {
        Self {
            instant,
            zoned: true,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_storage())
    }
}

pub fn parse_timestamp(value: &str, field: &str) -> Result<Timestamp> {
    Timestamp::parse(value).with_context(|| format!("failed to parse {field}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(value, field).map(|ts| ts.instant())
}

/// Wraps a conversion failure so it can be returned from a rusqlite row mapper.
pub fn conversion_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{err:#}"),
        )),
    )
}
