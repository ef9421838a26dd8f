use tokio::sync::oneshot;
use tracing::info;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Rewrite the WAL as the minimal event list that rebuilds current state.
    ///
    /// Quarantined records are written back as extra `DayProvisioned` events
    /// so a restart quarantines the day again. Bookings keep their current
    /// status in the rewritten `BookingPlaced`.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        let mut events = Vec::new();
        for day in self.store.day_keys() {
            let Some(state) = self.store.get_day(&day) else {
                continue;
            };
            let morning = state.morning.read().await;
            let evening = state.evening.read().await;
            let cell = state.availability.read().await;

            if cell.provisioned {
                events.push(Event::DayProvisioned { day, record: cell.record });
                for record in &cell.duplicates {
                    events.push(Event::DayProvisioned { day, record: *record });
                }
            }
            for booking in morning.iter().chain(evening.iter()) {
                events.push(Event::BookingPlaced { booking: booking.clone() });
            }
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Transient("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Transient("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Transient(e.to_string()))?;

        info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
