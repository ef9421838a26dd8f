use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use tracing::warn;

use crate::day::DayKey;
use crate::model::*;

/// Every booking ever placed for one (day, slot), in admission order.
#[derive(Debug, Default)]
pub struct SlotLedger {
    bookings: Vec<BookingRecord>,
}

impl SlotLedger {
    /// The admission authority: PENDING + CONFIRMED rows, recounted every time.
    pub fn count_active(&self) -> u32 {
        self.bookings.iter().filter(|b| b.status.is_active()).count() as u32
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn insert(&mut self, booking: BookingRecord) {
        self.bookings.push(booking);
    }

    pub fn get(&self, number: &str) -> Option<&BookingRecord> {
        self.bookings.iter().find(|b| b.number == number)
    }

    pub fn set_status(&mut self, number: &str, status: BookingStatus) -> Option<BookingStatus> {
        let booking = self.bookings.iter_mut().find(|b| b.number == number)?;
        Some(std::mem::replace(&mut booking.status, status))
    }

    pub fn iter(&self) -> impl Iterator<Item = &BookingRecord> {
        self.bookings.iter()
    }
}

/// The availability side of a day.
#[derive(Debug)]
pub struct AvailabilityCell {
    pub record: AvailabilityRecord,
    /// False until the record has been written to the log.
    pub provisioned: bool,
    /// Extra records for the same day found in a legacy log. Non-empty means
    /// the day is quarantined until `repair_duplicates` runs.
    pub duplicates: Vec<AvailabilityRecord>,
}

/// All mutable state for one day.
///
/// Lock order, everywhere: `morning` → `evening` → `availability`.
#[derive(Debug)]
pub struct DayState {
    pub day: DayKey,
    pub morning: RwLock<SlotLedger>,
    pub evening: RwLock<SlotLedger>,
    pub availability: RwLock<AvailabilityCell>,
}

pub type SharedDayState = Arc<DayState>;

impl DayState {
    fn new(day: DayKey, record: AvailabilityRecord) -> Self {
        Self {
            day,
            morning: RwLock::new(SlotLedger::default()),
            evening: RwLock::new(SlotLedger::default()),
            availability: RwLock::new(AvailabilityCell {
                record,
                provisioned: false,
                duplicates: Vec::new(),
            }),
        }
    }

    pub fn ledger(&self, slot: Slot) -> &RwLock<SlotLedger> {
        match slot {
            Slot::Morning => &self.morning,
            Slot::Evening => &self.evening,
        }
    }
}

/// In-memory index over days and booking numbers. Keyed by `DayKey`, so a
/// day can never hold two `DayState`s.
pub struct DayStore {
    days: DashMap<DayKey, SharedDayState>,
    /// Booking number → where the booking lives.
    numbers: DashMap<String, (DayKey, Slot)>,
}

impl Default for DayStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DayStore {
    pub fn new() -> Self {
        Self {
            days: DashMap::new(),
            numbers: DashMap::new(),
        }
    }

    // ── Days ─────────────────────────────────────────────────

    pub fn get_day(&self, day: &DayKey) -> Option<SharedDayState> {
        self.days.get(day).map(|e| e.value().clone())
    }

    /// Return the day's state, creating an unprovisioned one holding `default`.
    pub fn day_or_insert(&self, day: DayKey, default: AvailabilityRecord) -> SharedDayState {
        self.days
            .entry(day)
            .or_insert_with(|| Arc::new(DayState::new(day, default)))
            .value()
            .clone()
    }

    pub fn day_count(&self) -> usize {
        self.days.len()
    }

    /// All known days, ascending.
    pub fn day_keys(&self) -> Vec<DayKey> {
        let mut keys: Vec<DayKey> = self.days.iter().map(|e| *e.key()).collect();
        keys.sort();
        keys
    }

    // ── Booking numbers ──────────────────────────────────────

    pub fn locate_booking(&self, number: &str) -> Option<(DayKey, Slot)> {
        self.numbers.get(number).map(|e| *e.value())
    }

    /// Claim a booking number. False if it is already taken.
    pub fn reserve_number(&self, number: &str, day: DayKey, slot: Slot) -> bool {
        match self.numbers.entry(number.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert((day, slot));
                true
            }
        }
    }

    pub fn release_number(&self, number: &str) {
        self.numbers.remove(number);
    }

    pub fn booking_count(&self) -> usize {
        self.numbers.len()
    }

    // ── Replay ───────────────────────────────────────────────

    /// Apply a logged event during startup. The store is not shared yet, so
    /// every `try_*` lock succeeds immediately.
    pub fn replay_event(&self, event: &Event, default: AvailabilityRecord) {
        match event {
            Event::DayProvisioned { day, record } => {
                let state = self.day_or_insert(*day, default);
                let mut cell = state.availability.try_write().expect("replay: uncontended write");
                if cell.provisioned {
                    warn!("duplicate availability record for {day} in log; day quarantined");
                    cell.duplicates.push(*record);
                } else {
                    cell.record = *record;
                    cell.provisioned = true;
                }
            }
            Event::AvailabilityUpdated { day, record } => {
                let state = self.day_or_insert(*day, default);
                let mut cell = state.availability.try_write().expect("replay: uncontended write");
                cell.record = *record;
                cell.provisioned = true;
            }
            Event::DuplicatesMerged { day, record } => {
                let state = self.day_or_insert(*day, default);
                let mut cell = state.availability.try_write().expect("replay: uncontended write");
                cell.record = *record;
                cell.provisioned = true;
                cell.duplicates.clear();
            }
            Event::BookingPlaced { booking } => {
                let state = self.day_or_insert(booking.day, default);
                let mut ledger = state
                    .ledger(booking.slot)
                    .try_write()
                    .expect("replay: uncontended write");
                self.numbers
                    .insert(booking.number.clone(), (booking.day, booking.slot));
                ledger.insert(booking.clone());
            }
            Event::BookingStatusChanged { number, day, slot, status } => {
                if let Some(state) = self.get_day(day) {
                    let mut ledger = state.ledger(*slot).try_write().expect("replay: uncontended write");
                    if ledger.set_status(number, *status).is_none() {
                        warn!("status change for unknown booking {number} in log");
                    }
                }
            }
        }
    }
}
