use tracing::info;

use crate::day::DayKey;
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, SlotLedger};

impl Engine {
    /// PENDING + CONFIRMED bookings for the slot. Zero for an unknown day.
    pub async fn count_active(&self, day: DayKey, slot: Slot) -> u32 {
        match self.store.get_day(&day) {
            Some(state) => state.ledger(slot).read().await.count_active(),
            None => 0,
        }
    }

    /// Log and store a fresh booking under a ledger lock the caller already
    /// holds. `Conflict` if the number is taken.
    pub(super) async fn insert_booking(
        &self,
        ledger: &mut SlotLedger,
        booking: BookingRecord,
    ) -> Result<BookingRecord, EngineError> {
        if !self.store.reserve_number(&booking.number, booking.day, booking.slot) {
            return Err(EngineError::Conflict(format!("booking number {} already exists", booking.number)));
        }
        let event = Event::BookingPlaced { booking: booking.clone() };
        if let Err(e) = self.wal_append(&event).await {
            self.store.release_number(&booking.number);
            return Err(e);
        }
        ledger.insert(booking.clone());
        Ok(booking)
    }

    /// Both slots of a day, oldest first.
    pub async fn list_by_day(&self, day: DayKey) -> Vec<BookingRecord> {
        let Some(state) = self.store.get_day(&day) else {
            return Vec::new();
        };
        let morning = state.morning.read().await;
        let evening = state.evening.read().await;
        let mut out: Vec<BookingRecord> = morning.iter().chain(evening.iter()).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.number.cmp(&b.number)));
        out
    }

    /// Newest bookings first, across all days.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<BookingRecord>, EngineError> {
        if limit > MAX_RECENT_LIMIT {
            return Err(EngineError::LimitExceeded("listing limit too large"));
        }
        let mut out = Vec::new();
        for day in self.store.day_keys() {
            out.extend(self.list_by_day(day).await);
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.number.cmp(&a.number)));
        out.truncate(limit);
        Ok(out)
    }

    pub async fn get_booking(&self, number: &str) -> Result<BookingRecord, EngineError> {
        let not_found = || EngineError::NotFound(format!("booking {number}"));
        let (day, slot) = self.store.locate_booking(number).ok_or_else(not_found)?;
        let state = self.store.get_day(&day).ok_or_else(not_found)?;
        let ledger = state.ledger(slot).read().await;
        ledger.get(number).cloned().ok_or_else(not_found)
    }

    /// Operator status change. Leaving an active status frees the seat.
    pub async fn transition_booking(
        &self,
        number: &str,
        status: BookingStatus,
    ) -> Result<BookingRecord, EngineError> {
        let not_found = || EngineError::NotFound(format!("booking {number}"));
        let (day, slot) = self.store.locate_booking(number).ok_or_else(not_found)?;
        let state = self.store.get_day(&day).ok_or_else(not_found)?;

        let _gate = self.compaction_gate.read().await;
        let mut ledger = state.ledger(slot).write().await;
        let from = ledger.get(number).ok_or_else(not_found)?.status;
        if !from.can_transition_to(status) {
            return Err(EngineError::InvalidTransition { from, to: status });
        }

        let event = Event::BookingStatusChanged {
            number: number.to_string(),
            day,
            slot,
            status,
        };
        self.wal_append(&event).await?;
        ledger.set_status(number, status);

        info!("booking {number} ({day} {}): {from} -> {status}", slot.label());
        ledger.get(number).cloned().ok_or_else(not_found)
    }

    pub async fn confirm_booking(&self, number: &str) -> Result<BookingRecord, EngineError> {
        self.transition_booking(number, BookingStatus::Confirmed).await
    }

    pub async fn cancel_booking(&self, number: &str) -> Result<BookingRecord, EngineError> {
        self.transition_booking(number, BookingStatus::Cancelled).await
    }

    pub async fn complete_booking(&self, number: &str) -> Result<BookingRecord, EngineError> {
        self.transition_booking(number, BookingStatus::Completed).await
    }
}
