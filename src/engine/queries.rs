use crate::day::{DayKey, DayRange};
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// One view per day in `[start, end]`, days nobody configured included.
    pub async fn calendar(&self, start: DayKey, end: DayKey) -> Result<Vec<AvailabilityView>, EngineError> {
        let range = DayRange::new(start, end)
            .ok_or_else(|| EngineError::InvalidInput(format!("range start {start} is after end {end}")))?;
        if range.len_days() > MAX_RANGE_DAYS {
            return Err(EngineError::LimitExceeded("calendar range too long"));
        }
        let mut out = Vec::with_capacity(range.len_days());
        for day in range.iter() {
            out.push(self.get_or_default(day).await);
        }
        Ok(out)
    }

    /// Days with anything in memory, ascending.
    pub fn known_days(&self) -> Vec<DayKey> {
        self.store.day_keys()
    }

    pub fn booking_count(&self) -> usize {
        self.store.booking_count()
    }
}
