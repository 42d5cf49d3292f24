//! FAT date and time words
//!
//! Dates count years from 1980 in the top seven bits; times have
//! two-second resolution. Entries written without a clock carry zero
//! words, which decode to the Unix epoch.

use chrono::{NaiveDate, NaiveDateTime};

/// Decode a FAT date/time pair.
pub fn decode(date: u16, time: u16) -> NaiveDateTime {
    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0xF) as u32;
    let day = (date & 0x1F) as u32;

    let hours = (time >> 11) as u32;
    let minutes = ((time >> 5) & 0x3F) as u32;
    let seconds = ((time & 0x1F) * 2) as u32;

    if month == 0 || day == 0 {
        return NaiveDateTime::UNIX_EPOCH;
    }

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hours, minutes, seconds))
        .unwrap_or(NaiveDateTime::UNIX_EPOCH)
}
