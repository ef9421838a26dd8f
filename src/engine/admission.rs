use std::time::Duration;

use tracing::{debug, warn};

use crate::day::{DateLike, DayKey};
use crate::limits::*;
use crate::model::*;
use crate::observability::{ADMISSION_RETRIES_TOTAL, ADMISSIONS_TOTAL};

use super::validate::{booking_number, now_ms, validate_request};
use super::{AvailabilityCell, Engine, EngineError, SlotLedger};

/// The admission rule on its own: quarantine, then flag, then capacity.
pub(super) fn check_admissible(
    cell: &AvailabilityCell,
    ledger: &SlotLedger,
    day: DayKey,
    slot: Slot,
) -> Result<(), EngineError> {
    if !cell.duplicates.is_empty() {
        return Err(EngineError::DuplicateDay(day));
    }
    if !cell.record.is_open(slot) {
        return Err(EngineError::SlotClosed { day, slot });
    }
    let max = cell.record.max_per_slot;
    if ledger.count_active() >= max {
        return Err(EngineError::SlotFull { day, slot, max });
    }
    Ok(())
}

pub(super) fn outcome_label(result: &Result<BookingRecord, EngineError>) -> &'static str {
    match result {
        Ok(_) => "admitted",
        Err(EngineError::SlotClosed { .. }) => "slot_closed",
        Err(EngineError::SlotFull { .. }) => "slot_full",
        Err(EngineError::DuplicateDay(_)) => "duplicate_day",
        Err(EngineError::Transient(_)) => "transient",
        Err(_) => "error",
    }
}

impl Engine {
    /// Book one seat in `slot` on the day `date` falls on, or say why not.
    ///
    /// Requests for the same (day, slot) serialize on that slot's ledger
    /// lock, so the capacity check and the insert it guards are atomic.
    /// Log failures are retried with backoff; rejections are returned as-is.
    pub async fn attempt_book(
        &self,
        date: DateLike,
        slot: Slot,
        request: BookingRequest,
    ) -> Result<BookingRecord, EngineError> {
        validate_request(&request)?;
        let day = self.day_key(date)?;

        let mut attempt = 0u32;
        let result = loop {
            match self.admit(day, slot, &request).await {
                Err(e) if e.is_transient() && attempt < MAX_TRANSIENT_RETRIES => {
                    let delay = Duration::from_millis(RETRY_BASE_DELAY_MS << attempt);
                    attempt += 1;
                    metrics::counter!(ADMISSION_RETRIES_TOTAL).increment(1);
                    debug!("admission {day} {}: {e}; retry {attempt} in {delay:?}", slot.label());
                    tokio::time::sleep(delay).await;
                }
                result => break result,
            }
        };

        metrics::counter!(ADMISSIONS_TOTAL, "outcome" => outcome_label(&result)).increment(1);
        match &result {
            Ok(booking) => debug!("admitted {} for {day} {}", booking.number, slot.label()),
            // Stays blocked until repair_duplicates runs
            Err(e @ EngineError::DuplicateDay(_)) => warn!("admission {day} {} blocked: {e}", slot.label()),
            Err(e) if e.is_rejection() => debug!("rejected {day} {}: {e}", slot.label()),
            Err(e) if e.is_transient() => warn!("admission {day} {} gave up after {attempt} retries: {e}", slot.label()),
            Err(e) => debug!("admission {day} {} failed: {e}", slot.label()),
        }
        result
    }

    /// One pass under the (day, slot) critical section.
    async fn admit(&self, day: DayKey, slot: Slot, request: &BookingRequest) -> Result<BookingRecord, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let state = self.store.day_or_insert(day, self.default_record());
        let mut ledger = state.ledger(slot).write().await;
        let cell = self.provisioned_read(&state).await?;

        check_admissible(&cell, &ledger, day, slot)?;
        if ledger.len() >= MAX_BOOKINGS_PER_SLOT {
            return Err(EngineError::LimitExceeded("too many bookings for slot"));
        }

        let mut last_conflict = None;
        for _ in 0..MAX_NUMBER_ATTEMPTS {
            let booking = BookingRecord {
                number: booking_number(day),
                day,
                slot,
                name: request.name.trim().to_string(),
                phone: request.phone.trim().to_string(),
                email: request.email.as_ref().map(|e| e.trim().to_string()),
                pickup_location: request.pickup_location.trim().to_string(),
                dropoff_location: request.dropoff_location.trim().to_string(),
                trip_type: request.trip_type,
                price: request.price,
                status: BookingStatus::Pending,
                created_at: now_ms(),
            };
            match self.insert_booking(&mut ledger, booking).await {
                Err(e @ EngineError::Conflict(_)) => last_conflict = Some(e),
                other => return other,
            }
        }
        Err(last_conflict.unwrap_or_else(|| EngineError::Conflict("could not allocate a booking number".into())))
    }
}
