//! 🗝️ Bucket keys: turning (locator, instant) into an address.
//!
//! Pure, deterministic, side-effect free. The calendar day is computed in ONE
//! fixed reference offset for the whole process (`aggregation.utc_offset_minutes`),
//! never per request. Month and day are zero padded so ids sort lexicographically.
//!
//! 📐 The daystamp is `YYYY-MMDD` (yes, one dash, the historical exports look
//! like that and we are not about to re-key a few million buckets over taste).
//! The bucket id is `"{locator}-{daystamp}"`: the daystamp suffix is fixed width,
//! so two distinct (locator, day) pairs can never collide even when a locator
//! contains dashes. 🦆

use std::fmt;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

const DAYSTAMP_FORMAT: &str = "%Y-%m%d";

/// 📅 A calendar day in the reference offset, e.g. `2020-0402`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayStamp(String);

impl DayStamp {
    /// 🔍 Parse operator input. Only the canonical zero-padded form is accepted,
    /// because `2020-42` parsing as "April 2nd" is a bug report waiting to happen.
    pub fn parse(raw: &str) -> Result<Self> {
        let date = NaiveDate::parse_from_str(raw, DAYSTAMP_FORMAT)
            .with_context(|| format!("💀 '{raw}' is not a daystamp. We expected YYYY-MMDD, like 2020-0402."))?;
        let canonical = Self::from_date(date);
        if canonical.0 != raw {
            bail!("💀 '{raw}' parses, but the canonical daystamp is '{}'. Zero padding is not optional.", canonical.0);
        }
        Ok(canonical)
    }

    pub(crate) fn from_date(date: NaiveDate) -> Self {
        Self(date.format(DAYSTAMP_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DayStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 🪪 The address of one bucket. Ordered by locator, then day.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub locator: String,
    pub daystamp: DayStamp,
}

impl BucketKey {
    pub fn new(locator: impl Into<String>, daystamp: DayStamp) -> Self {
        Self { locator: locator.into(), daystamp }
    }

    /// 🏷️ The stable identifier, `"{locator}-{daystamp}"`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.locator, self.daystamp)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.locator, self.daystamp)
    }
}

/// ⏰ The one and only reference clock. Built once from config, cloned freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayClock {
    offset: FixedOffset,
}

impl DayClock {
    /// 🔧 `utc_offset_minutes` east of UTC. Anything a real time zone can't be is rejected.
    pub fn new(utc_offset_minutes: i32) -> Result<Self> {
        let offset = utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .with_context(|| {
                format!("💀 A UTC offset of {utc_offset_minutes} minutes is not a place on this planet. Pick something within ±23:59.")
            })?;
        Ok(Self { offset })
    }

    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// 📅 Which calendar day `at` falls on, in the reference offset.
    pub fn daystamp(&self, at: DateTime<Utc>) -> DayStamp {
        DayStamp::from_date(at.with_timezone(&self.offset).date_naive())
    }

    /// 🗝️ `key(locator, timestamp)`.
    pub fn key(&self, locator: &str, at: DateTime<Utc>) -> BucketKey {
        BucketKey::new(locator, self.daystamp(at))
    }
}

impl Default for DayClock {
    fn default() -> Self {
        Self::utc()
    }
}
