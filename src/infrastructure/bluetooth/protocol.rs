//! Current Time Service Protocol
//!
//! This module contains the wire-level definitions for pushing wall-clock
//! time to the watch: the standard CTS service/characteristic UUIDs and the
//! fixed 10-byte Current Time payload codec.

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use uuid::{uuid, Uuid};

/// Standard Current Time Service UUID
pub const CURRENT_TIME_SERVICE_UUID: Uuid = uuid!("00001805-0000-1000-8000-00805f9b34fb");

/// Current Time characteristic UUID - where the time payload is written
pub const CURRENT_TIME_CHAR_UUID: Uuid = uuid!("00002a2b-0000-1000-8000-00805f9b34fb");

/// Standard Battery Service UUID (capability detection only)
pub const BATTERY_SERVICE_UUID: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

/// Standard Device Information Service UUID (capability detection only)
pub const DEVICE_INFORMATION_SERVICE_UUID: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");

/// Size of the Current Time payload in bytes
pub const TIME_SYNC_PAYLOAD_LEN: usize = 10;

/// Adjust-reason byte of the Current Time payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustReason {
    /// Host-initiated time update
    ManualUpdate,
}

impl AdjustReason {
    pub fn as_byte(&self) -> u8 {
        match self {
            Self::ManualUpdate => 0x00,
        }
    }
}

/// The fixed-layout Current Time payload.
///
/// # Payload Structure (10 bytes)
///
/// ```text
/// [0-1] : Year (u16 little-endian, full 4-digit year)
/// [2]   : Month (1-12)
/// [3]   : Day of month (1-31)
/// [4]   : Hour (0-23)
/// [5]   : Minute (0-59)
/// [6]   : Second (0-59)
/// [7]   : Day of week (1 = Monday .. 7 = Sunday)
/// [8]   : Fractional second in 1/256 units (unused, always 0)
/// [9]   : Adjust reason (0 = manual update)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncPayload {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// 1 = Monday .. 7 = Sunday
    pub day_of_week: u8,
    pub fractions256: u8,
    pub adjust_reason: AdjustReason,
}

impl TimeSyncPayload {
    /// Build a payload from the current local wall-clock time.
    pub fn now() -> Self {
        Self::from_naive(Local::now().naive_local())
    }

    /// Build a payload from a naive local timestamp.
    pub fn from_naive(dt: NaiveDateTime) -> Self {
        Self {
            year: dt.year() as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            day_of_week: cts_weekday(dt.weekday().num_days_from_sunday() as u8),
            fractions256: 0,
            adjust_reason: AdjustReason::ManualUpdate,
        }
    }

    /// Encode into the 10-byte wire layout.
    pub fn to_bytes(&self) -> [u8; TIME_SYNC_PAYLOAD_LEN] {
        let year = self.year.to_le_bytes();
        [
            year[0],
            year[1],
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.day_of_week,
            self.fractions256,
            self.adjust_reason.as_byte(),
        ]
    }
}

/// Map a zero-indexed Sunday-first weekday to the CTS 1 = Monday .. 7 = Sunday
/// numbering. Sunday (0) must become 7, never 0.
fn cts_weekday(days_from_sunday: u8) -> u8 {
    if days_from_sunday == 0 {
        7
    } else {
        days_from_sunday
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_known_timestamp_encoding() {
        // 2025-03-07 14:05:09 is a Friday; year 2025 = 0x07E9 little-endian
        let payload = TimeSyncPayload::from_naive(naive(2025, 3, 7, 14, 5, 9));
        assert_eq!(
            payload.to_bytes(),
            [0xE9, 0x07, 0x03, 0x07, 0x0E, 0x05, 0x09, 0x05, 0x00, 0x00]
        );
    }

    #[test]
    fn test_sunday_maps_to_seven() {
        // 2025-03-09 is a Sunday
        let payload = TimeSyncPayload::from_naive(naive(2025, 3, 9, 0, 0, 0));
        assert_eq!(payload.day_of_week, 7);
        assert_ne!(payload.to_bytes()[7], 0);
    }

    #[test]
    fn test_monday_maps_to_one() {
        // 2025-03-10 is a Monday
        let payload = TimeSyncPayload::from_naive(naive(2025, 3, 10, 23, 59, 59));
        assert_eq!(payload.day_of_week, 1);
    }

    #[test]
    fn test_payload_length() {
        assert_eq!(TimeSyncPayload::now().to_bytes().len(), TIME_SYNC_PAYLOAD_LEN);
    }

    #[test]
    fn test_adjust_reason_byte() {
        assert_eq!(AdjustReason::ManualUpdate.as_byte(), 0x00);
    }
}
