use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::calendar::{self, CalendarStatus};
use crate::day::DayKey;

/// Unix milliseconds.
pub type Ms = i64;

/// One of the two daily transport windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Slot {
    Morning,
    Evening,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Morning, Slot::Evening];

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Morning => "MORNING",
            Slot::Evening => "EVENING",
        }
    }

    /// Lowercase form used in human-readable messages.
    pub fn label(&self) -> &'static str {
        match self {
            Slot::Morning => "morning",
            Slot::Evening => "evening",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TripType {
    HomeToAirport,
    AirportToHome,
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::HomeToAirport => "HOME_TO_AIRPORT",
            TripType::AirportToHome => "AIRPORT_TO_HOME",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
        }
    }

    /// Active bookings occupy slot capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled) | (Confirmed, Completed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

fn enum_key(s: &str) -> String {
    s.trim().to_ascii_uppercase().replace('-', "_")
}

impl FromStr for Slot {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match enum_key(s).as_str() {
            "MORNING" => Ok(Slot::Morning),
            "EVENING" => Ok(Slot::Evening),
            _ => Err(ParseEnumError { kind: "slot", value: s.to_string() }),
        }
    }
}

impl FromStr for TripType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match enum_key(s).as_str() {
            "HOME_TO_AIRPORT" => Ok(TripType::HomeToAirport),
            "AIRPORT_TO_HOME" => Ok(TripType::AirportToHome),
            _ => Err(ParseEnumError { kind: "trip type", value: s.to_string() }),
        }
    }
}

impl FromStr for BookingStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match enum_key(s).as_str() {
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCELLED" | "CANCELED" => Ok(BookingStatus::Cancelled),
            "COMPLETED" => Ok(BookingStatus::Completed),
            _ => Err(ParseEnumError { kind: "booking status", value: s.to_string() }),
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Availability ─────────────────────────────────────────────

/// Capacity ledger entry for one day. Occupancy is not stored here; it is
/// always recounted from the booking ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRecord {
    pub morning_open: bool,
    pub evening_open: bool,
    pub max_per_slot: u32,
}

impl AvailabilityRecord {
    pub fn open(max_per_slot: u32) -> Self {
        Self {
            morning_open: true,
            evening_open: true,
            max_per_slot,
        }
    }

    pub fn is_open(&self, slot: Slot) -> bool {
        match slot {
            Slot::Morning => self.morning_open,
            Slot::Evening => self.evening_open,
        }
    }

    pub fn any_open(&self) -> bool {
        self.morning_open || self.evening_open
    }

    pub fn patched(&self, patch: &AvailabilityPatch) -> Self {
        Self {
            morning_open: patch.morning_open.unwrap_or(self.morning_open),
            evening_open: patch.evening_open.unwrap_or(self.evening_open),
            max_per_slot: patch.max_per_slot.unwrap_or(self.max_per_slot),
        }
    }
}

/// Partial administrative override; `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvailabilityPatch {
    pub morning_open: Option<bool>,
    pub evening_open: Option<bool>,
    pub max_per_slot: Option<u32>,
}

impl AvailabilityPatch {
    pub fn slot(slot: Slot, open: bool) -> Self {
        match slot {
            Slot::Morning => Self { morning_open: Some(open), ..Self::default() },
            Slot::Evening => Self { evening_open: Some(open), ..Self::default() },
        }
    }

    pub fn capacity(max_per_slot: u32) -> Self {
        Self { max_per_slot: Some(max_per_slot), ..Self::default() }
    }
}

// ── Bookings ─────────────────────────────────────────────────

/// Customer-supplied part of a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub trip_type: TripType,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub number: String,
    pub day: DayKey,
    pub slot: Slot,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub pickup_location: String,
    pub dropoff_location: String,
    pub trip_type: TripType,
    pub price: i64,
    pub status: BookingStatus,
    pub created_at: Ms,
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// First persisted availability record for a day.
    DayProvisioned {
        day: DayKey,
        record: AvailabilityRecord,
    },
    AvailabilityUpdated {
        day: DayKey,
        record: AvailabilityRecord,
    },
    /// Replaces every record held for the day (primary + quarantined).
    DuplicatesMerged {
        day: DayKey,
        record: AvailabilityRecord,
    },
    BookingPlaced {
        booking: BookingRecord,
    },
    BookingStatusChanged {
        number: String,
        day: DayKey,
        slot: Slot,
        status: BookingStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A day's availability as seen by read paths, with live occupancy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityView {
    pub day: DayKey,
    pub record: AvailabilityRecord,
    pub morning_active: u32,
    pub evening_active: u32,
    /// False for a materialized default that was never written.
    pub provisioned: bool,
    /// Unrepaired duplicate records held for this day.
    pub duplicates: usize,
}

impl AvailabilityView {
    pub fn active(&self, slot: Slot) -> u32 {
        match slot {
            Slot::Morning => self.morning_active,
            Slot::Evening => self.evening_active,
        }
    }

    pub fn remaining(&self, slot: Slot) -> u32 {
        self.record.max_per_slot.saturating_sub(self.active(slot))
    }

    /// Open flag and spare capacity.
    pub fn admissible(&self, slot: Slot) -> bool {
        self.record.is_open(slot) && self.remaining(slot) > 0
    }

    pub fn current_bookings(&self) -> u32 {
        self.morning_active + self.evening_active
    }

    pub fn status(&self) -> CalendarStatus {
        calendar::project(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RangeReport {
    pub created: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub day: DayKey,
    /// Number of records collapsed into one.
    pub merged: usize,
    pub record: AvailabilityRecord,
}
