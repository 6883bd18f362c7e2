//! Partition key derivation
//!
//! Records are partitioned by local calendar month (`YYYY-MM`). The local
//! month is read after shifting the UTC instant by a fixed offset, so a
//! disclosure at `2024-01-31T15:30:00Z` belongs to `2024-02` at +09:00.
//! Queries rebuild the same keys from a local date range, so derivation
//! never uses the UTC calendar date.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{IndexError, Result};

/// Default UTC to local shift (JST)
pub const DEFAULT_LOCAL_OFFSET_HOURS: i32 = 9;

/// How far into the future a timestamp may be before it is rejected
const FUTURE_TOLERANCE_DAYS: i64 = 1;

/// Local calendar month key, always `YYYY-MM`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Build a key from a year and a 1-based month
    pub fn from_year_month(year: i32, month: u32) -> Result<Self> {
        if !(0..=9999).contains(&year) || !(1..=12).contains(&month) {
            return Err(IndexError::Validation(format!(
                "No partition for year {} month {}",
                year, month
            )));
        }
        Ok(Self(format!("{:04}-{:02}", year, month)))
    }

    /// Parse a `YYYY-MM` string
    pub fn parse(s: &str) -> Result<Self> {
        let b = s.as_bytes();
        let shaped = b.len() == 7 && b[4] == b'-' && all_digits(&b[0..4]) && all_digits(&b[5..7]);
        if !shaped {
            return Err(IndexError::Validation(format!(
                "Partition key must be YYYY-MM, got '{}'",
                s
            )));
        }
        Self::from_year_month(digits(&b[0..4]) as i32, digits(&b[5..7]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PartitionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PartitionKey {
    type Error = IndexError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PartitionKey> for String {
    fn from(key: PartitionKey) -> Self {
        key.0
    }
}

/// Derives partition keys with a fixed UTC offset
#[derive(Debug, Clone, Copy)]
pub struct PartitionKeyDeriver {
    offset: FixedOffset,
}

impl PartitionKeyDeriver {
    /// Create a deriver for a whole-hour offset east of UTC
    pub fn new(offset_hours: i32) -> Result<Self> {
        let offset = offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                IndexError::Config(format!("Local offset out of range: {} hours", offset_hours))
            })?;
        Ok(Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Partition key for an ISO-8601 timestamp, checked against the current clock
    pub fn derive_key(&self, timestamp: &str) -> Result<PartitionKey> {
        self.derive_key_at(timestamp, Utc::now())
    }

    /// Partition key for an ISO-8601 timestamp, checked against `now`
    pub fn derive_key_at(&self, timestamp: &str, now: DateTime<Utc>) -> Result<PartitionKey> {
        let instant = self.parse_timestamp_at(timestamp, now)?;
        Ok(self.key_for(instant))
    }

    /// Partition key for an already-validated instant
    pub fn key_for(&self, instant: DateTime<Utc>) -> PartitionKey {
        let local = instant.with_timezone(&self.offset);
        PartitionKey(format!("{:04}-{:02}", local.year(), local.month()))
    }

    /// Validate and parse a timestamp against the current clock
    pub fn parse_timestamp(&self, timestamp: &str) -> Result<DateTime<Utc>> {
        self.parse_timestamp_at(timestamp, Utc::now())
    }

    /// Validate and parse a timestamp.
    ///
    /// Accepts `YYYY-MM-DDTHH:MM:SS[.fff](Z|±HH:MM)` only. The written date
    /// must exist on the calendar, and the instant must fall within
    /// `[epoch, now + 1 day]`.
    pub fn parse_timestamp_at(&self, timestamp: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        check_timestamp_shape(timestamp)?;

        let b = timestamp.as_bytes();
        let written = NaiveDate::from_ymd_opt(digits(&b[0..4]) as i32, digits(&b[5..7]), digits(&b[8..10]))
            .ok_or_else(|| {
                IndexError::Validation(format!("Date does not exist: '{}'", &timestamp[..10]))
            })?;

        let parsed = DateTime::parse_from_rfc3339(timestamp).map_err(|e| {
            IndexError::Validation(format!("Unparseable timestamp '{}': {}", timestamp, e))
        })?;

        if parsed.date_naive() != written {
            return Err(IndexError::Validation(format!(
                "Timestamp '{}' normalizes to {}",
                timestamp,
                parsed.date_naive()
            )));
        }

        let instant = parsed.with_timezone(&Utc);
        if instant.timestamp() < 0 {
            return Err(IndexError::Validation(format!(
                "Timestamp '{}' is before the epoch",
                timestamp
            )));
        }
        if instant > now + Duration::days(FUTURE_TOLERANCE_DAYS) {
            return Err(IndexError::Validation(format!(
                "Timestamp '{}' is more than {} day(s) in the future",
                timestamp, FUTURE_TOLERANCE_DAYS
            )));
        }

        Ok(instant)
    }

    /// Partitions covering `[start, end]` (both `YYYY-MM-DD`), ascending
    pub fn expand_range(&self, start: &str, end: &str) -> Result<Vec<PartitionKey>> {
        expand_dates(parse_date(start)?, parse_date(end)?)
    }

    /// Exact UTC window for local days `[start, end]`, as
    /// `[start 00:00 local, day after end 00:00 local)`
    pub fn local_day_window(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let after_end = end
            .succ_opt()
            .ok_or_else(|| IndexError::Validation(format!("End date out of range: {}", end)))?;
        Ok((self.local_midnight(start)?, self.local_midnight(after_end)?))
    }

    fn local_midnight(&self, date: NaiveDate) -> Result<DateTime<Utc>> {
        let naive = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| IndexError::Internal(format!("No midnight for {}", date)))?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| IndexError::Internal(format!("Ambiguous local midnight for {}", date)))
    }
}

/// Parse a strict `YYYY-MM-DD` date
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let b = s.as_bytes();
    let shaped = b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && all_digits(&b[0..4])
        && all_digits(&b[5..7])
        && all_digits(&b[8..10]);
    if !shaped {
        return Err(IndexError::Validation(format!(
            "Date must be YYYY-MM-DD, got '{}'",
            s
        )));
    }
    NaiveDate::from_ymd_opt(digits(&b[0..4]) as i32, digits(&b[5..7]), digits(&b[8..10]))
        .ok_or_else(|| IndexError::Validation(format!("Date does not exist: '{}'", s)))
}

/// Month keys from `start`'s month through `end`'s month inclusive
pub fn expand_dates(start: NaiveDate, end: NaiveDate) -> Result<Vec<PartitionKey>> {
    if start > end {
        return Err(IndexError::Validation(format!(
            "Start date {} is after end date {}",
            start, end
        )));
    }

    let last = (end.year(), end.month());
    let (mut year, mut month) = (start.year(), start.month());
    let mut keys = Vec::new();
    while (year, month) <= last {
        keys.push(PartitionKey::from_year_month(year, month)?);
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    Ok(keys)
}

fn check_timestamp_shape(ts: &str) -> Result<()> {
    let bad = || {
        IndexError::Validation(format!(
            "Timestamp must be ISO-8601 with offset (YYYY-MM-DDTHH:MM:SSZ), got '{}'",
            ts
        ))
    };

    let b = ts.as_bytes();
    if b.len() < 20 {
        return Err(bad());
    }
    let head_ok = all_digits(&b[0..4])
        && b[4] == b'-'
        && all_digits(&b[5..7])
        && b[7] == b'-'
        && all_digits(&b[8..10])
        && b[10] == b'T'
        && all_digits(&b[11..13])
        && b[13] == b':'
        && all_digits(&b[14..16])
        && b[16] == b':'
        && all_digits(&b[17..19]);
    if !head_ok {
        return Err(bad());
    }

    let mut rest = &b[19..];
    if rest.first() == Some(&b'.') {
        let fraction = rest[1..].iter().take_while(|c| c.is_ascii_digit()).count();
        if fraction == 0 || fraction > 9 {
            return Err(bad());
        }
        rest = &rest[1 + fraction..];
    }

    let zone_ok = match rest {
        [b'Z'] => true,
        [sign, h1, h2, b':', m1, m2] => {
            (*sign == b'+' || *sign == b'-') && all_digits(&[*h1, *h2, *m1, *m2])
        }
        _ => false,
    };
    if zone_ok {
        Ok(())
    } else {
        Err(bad())
    }
}

fn all_digits(b: &[u8]) -> bool {
    b.iter().all(u8::is_ascii_digit)
}

/// Value of an all-digit slice; callers check shape first
fn digits(b: &[u8]) -> u32 {
    b.iter().fold(0, |acc, c| acc * 10 + u32::from(c - b'0'))
}
