//! Packed 16-bit date and time codes.
//!
//! Dates pack `(year - 1980) << 9 | month << 5 | day`; times pack
//! `hour << 11 | minute << 5 | second / 2`. A date code of zero never comes
//! out of [`DateCode::new`], which lets the record table use it as the
//! free-slot marker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

const EPOCH_YEAR: u32 = 1980;
const MAX_YEAR: u32 = EPOCH_YEAR + 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DateCode(pub u16);

impl DateCode {
    /// Pack a calendar date. `None` outside 1980..=2107 or for impossible
    /// month/day numbers.
    #[must_use]
    pub fn new(year: u32, month: u32, day: u32) -> Option<Self> {
        if !(EPOCH_YEAR..=MAX_YEAR).contains(&year)
            || !(1..=12).contains(&month)
            || !(1..=31).contains(&day)
        {
            return None;
        }
        let packed = ((year - EPOCH_YEAR) << 9) | (month << 5) | day;
        u16::try_from(packed).ok().map(Self)
    }

    #[must_use]
    pub fn year(self) -> u32 {
        u32::from(self.0 >> 9) + EPOCH_YEAR
    }

    #[must_use]
    pub fn month(self) -> u32 {
        u32::from((self.0 >> 5) & 0x0F)
    }

    #[must_use]
    pub fn day(self) -> u32 {
        u32::from(self.0 & 0x1F)
    }

    #[must_use]
    pub fn is_unset(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TimeCode(pub u16);

impl TimeCode {
    /// Pack a wall-clock time. Seconds are stored in 2-second units.
    #[must_use]
    pub fn new(hour: u32, minute: u32, second: u32) -> Option<Self> {
        if hour > 23 || minute > 59 || second > 59 {
            return None;
        }
        let packed = (hour << 11) | (minute << 5) | (second / 2);
        u16::try_from(packed).ok().map(Self)
    }

    #[must_use]
    pub fn hour(self) -> u32 {
        u32::from(self.0 >> 11)
    }

    #[must_use]
    pub fn minute(self) -> u32 {
        u32::from((self.0 >> 5) & 0x3F)
    }

    #[must_use]
    pub fn second(self) -> u32 {
        u32::from(self.0 & 0x1F) * 2
    }
}

/// A date code paired with a time code, as stored in the superblock and in
/// every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    pub date: DateCode,
    pub time: TimeCode,
}

impl Timestamp {
    /// Current UTC wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        Self::from_unix_secs(secs)
    }

    /// Convert seconds since the Unix epoch (UTC). Instants before 1980 clamp
    /// to 1980-01-01 00:00:00, instants after 2107 clamp to the last
    /// representable day.
    #[must_use]
    pub fn from_unix_secs(secs: u64) -> Self {
        let days = secs / 86_400;
        let rem = secs % 86_400;
        let (year, month, day) = civil_from_days(days);

        let date = if year < u64::from(EPOCH_YEAR) {
            return Self::epoch();
        } else if year > u64::from(MAX_YEAR) {
            DateCode::new(MAX_YEAR, 12, 31)
        } else {
            u32::try_from(year)
                .ok()
                .and_then(|year| DateCode::new(year, month, day))
        };

        // rem < 86_400 so each component fits comfortably.
        let hour = u32::try_from(rem / 3600).unwrap_or(0);
        let minute = u32::try_from((rem % 3600) / 60).unwrap_or(0);
        let second = u32::try_from(rem % 60).unwrap_or(0);

        Self {
            date: date.unwrap_or_default(),
            time: TimeCode::new(hour, minute, second).unwrap_or_default(),
        }
    }

    fn epoch() -> Self {
        Self {
            date: DateCode::new(EPOCH_YEAR, 1, 1).unwrap_or_default(),
            time: TimeCode::default(),
        }
    }
}

/// Gregorian date for a day count since 1970-01-01.
fn civil_from_days(days: u64) -> (u64, u32, u32) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z % 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (
        year,
        u32::try_from(month).unwrap_or(1),
        u32::try_from(day).unwrap_or(1),
    )
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.time.hour(),
            self.time.minute(),
            self.time.second()
        )
    }
}
