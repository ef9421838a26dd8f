use tracing::{info, warn};

use crate::day::{DayKey, DayRange};
use crate::limits::*;
use crate::model::*;

use super::validate::{validate_capacity, validate_record};
use super::{AvailabilityCell, DayState, Engine, EngineError, SlotLedger};

pub(super) fn view_from(
    day: DayKey,
    morning: &SlotLedger,
    evening: &SlotLedger,
    cell: &AvailabilityCell,
) -> AvailabilityView {
    AvailabilityView {
        day,
        record: cell.record,
        morning_active: morning.count_active(),
        evening_active: evening.count_active(),
        provisioned: cell.provisioned,
        duplicates: cell.duplicates.len(),
    }
}

/// Pick the surviving record among a day's duplicates: the first one (log
/// order) with any slot open, otherwise the first one.
pub fn merge_duplicates(candidates: &[AvailabilityRecord]) -> Option<AvailabilityRecord> {
    candidates
        .iter()
        .find(|r| r.any_open())
        .or_else(|| candidates.first())
        .copied()
}

/// The first slot whose active count would exceed `max_per_slot`.
fn check_occupancy(
    day: DayKey,
    record: &AvailabilityRecord,
    morning: &SlotLedger,
    evening: &SlotLedger,
) -> Result<(), EngineError> {
    for (slot, ledger) in [(Slot::Morning, morning), (Slot::Evening, evening)] {
        let active = ledger.count_active();
        if active > record.max_per_slot {
            return Err(EngineError::CapacityBelowOccupancy {
                day,
                slot,
                active,
                requested: record.max_per_slot,
            });
        }
    }
    Ok(())
}

impl Engine {
    /// The day's record with live counts. A day nobody configured yields the
    /// default record; nothing is written or inserted.
    pub async fn get_or_default(&self, day: DayKey) -> AvailabilityView {
        match self.store.get_day(&day) {
            Some(state) => Self::snapshot(&state).await,
            None => AvailabilityView {
                day,
                record: self.default_record(),
                morning_active: 0,
                evening_active: 0,
                provisioned: false,
                duplicates: 0,
            },
        }
    }

    pub(super) async fn snapshot(state: &DayState) -> AvailabilityView {
        let morning = state.morning.read().await;
        let evening = state.evening.read().await;
        let cell = state.availability.read().await;
        view_from(state.day, &morning, &evening, &cell)
    }

    /// Create-or-update. Fields left `None` in the patch keep their value.
    pub async fn upsert_availability(
        &self,
        day: DayKey,
        patch: AvailabilityPatch,
    ) -> Result<AvailabilityView, EngineError> {
        if let Some(max) = patch.max_per_slot {
            validate_capacity(max)?;
        }

        let _gate = self.compaction_gate.read().await;
        let state = self.store.day_or_insert(day, self.default_record());
        let morning = state.morning.read().await;
        let evening = state.evening.read().await;
        let mut cell = state.availability.write().await;

        if !cell.duplicates.is_empty() {
            return Err(EngineError::DuplicateDay(day));
        }
        let next = cell.record.patched(&patch);
        check_occupancy(day, &next, &morning, &evening)?;

        if cell.provisioned && next == cell.record {
            return Ok(view_from(day, &morning, &evening, &cell));
        }

        let event = if cell.provisioned {
            Event::AvailabilityUpdated { day, record: next }
        } else {
            Event::DayProvisioned { day, record: next }
        };
        self.wal_append(&event).await?;
        cell.record = next;
        cell.provisioned = true;

        info!(
            "availability {day}: morning={} evening={} max_per_slot={}",
            next.morning_open, next.evening_open, next.max_per_slot
        );
        Ok(view_from(day, &morning, &evening, &cell))
    }

    /// Strict insert: the day must not have a persisted record yet.
    pub async fn create_availability(
        &self,
        day: DayKey,
        record: AvailabilityRecord,
    ) -> Result<AvailabilityView, EngineError> {
        validate_record(&record)?;

        let _gate = self.compaction_gate.read().await;
        let state = self.store.day_or_insert(day, self.default_record());
        let morning = state.morning.read().await;
        let evening = state.evening.read().await;
        let mut cell = state.availability.write().await;

        if cell.provisioned {
            return Err(EngineError::DuplicateDay(day));
        }
        check_occupancy(day, &record, &morning, &evening)?;

        self.wal_append(&Event::DayProvisioned { day, record }).await?;
        cell.record = record;
        cell.provisioned = true;

        info!("availability {day} created (max_per_slot={})", record.max_per_slot);
        Ok(view_from(day, &morning, &evening, &cell))
    }

    /// Provision every day in `[start, end]` that has no persisted record.
    /// Existing records are left alone and counted as skipped.
    pub async fn initialize_range(
        &self,
        start: DayKey,
        end: DayKey,
        defaults: AvailabilityRecord,
    ) -> Result<RangeReport, EngineError> {
        validate_record(&defaults)?;
        let range = DayRange::new(start, end)
            .ok_or_else(|| EngineError::InvalidInput(format!("range start {start} is after end {end}")))?;
        if range.len_days() > MAX_RANGE_DAYS {
            return Err(EngineError::LimitExceeded("range too long"));
        }

        let mut report = RangeReport::default();
        for day in range.iter() {
            let _gate = self.compaction_gate.read().await;
            let state = self.store.day_or_insert(day, self.default_record());
            let morning = state.morning.read().await;
            let evening = state.evening.read().await;
            let mut cell = state.availability.write().await;

            if cell.provisioned {
                report.skipped += 1;
                continue;
            }

            let mut record = defaults;
            let busiest = morning.count_active().max(evening.count_active());
            if busiest > record.max_per_slot {
                warn!("{day} already holds {busiest} active bookings; provisioning with that capacity");
                record.max_per_slot = busiest;
            }
            self.wal_append(&Event::DayProvisioned { day, record }).await?;
            cell.record = record;
            cell.provisioned = true;
            report.created += 1;
        }

        info!(
            "initialized {start}..={end}: {} created, {} skipped",
            report.created, report.skipped
        );
        Ok(report)
    }

    /// Collapse every quarantined day's records into one.
    pub async fn repair_duplicates(&self) -> Result<Vec<RepairReport>, EngineError> {
        let mut reports = Vec::new();
        for day in self.store.day_keys() {
            let Some(state) = self.store.get_day(&day) else {
                continue;
            };
            let _gate = self.compaction_gate.read().await;
            let morning = state.morning.read().await;
            let evening = state.evening.read().await;
            let mut cell = state.availability.write().await;
            if cell.duplicates.is_empty() {
                continue;
            }

            let mut candidates = Vec::with_capacity(1 + cell.duplicates.len());
            candidates.push(cell.record);
            candidates.extend_from_slice(&cell.duplicates);
            let Some(mut record) = merge_duplicates(&candidates) else {
                continue;
            };
            let busiest = morning.count_active().max(evening.count_active());
            record.max_per_slot = record.max_per_slot.max(busiest);

            self.wal_append(&Event::DuplicatesMerged { day, record }).await?;
            cell.record = record;
            cell.duplicates.clear();

            info!("merged {} availability records for {day}", candidates.len());
            reports.push(RepairReport {
                day,
                merged: candidates.len(),
                record,
            });
        }
        Ok(reports)
    }
}
