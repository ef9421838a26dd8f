mod admission;
mod availability;
mod bookings;
mod compaction;
mod error;
mod queries;
mod store;
mod validate;

pub use availability::merge_duplicates;
pub use error::EngineError;
pub use store::{AvailabilityCell, DayState, DayStore, SharedDayState, SlotLedger};

use std::io;
use std::path::PathBuf;

use chrono_tz::Tz;
use tokio::sync::{RwLock, RwLockReadGuard, mpsc, oneshot};
use tracing::{error, info, warn};

use crate::day::{DateLike, DayKey};
use crate::model::*;
use crate::wal::Wal;

/// Per-ledger knobs fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Reference timezone for turning timestamps into days.
    pub timezone: Tz,
    /// Capacity of a day nobody has configured yet.
    pub default_max_per_slot: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::Asia::Seoul,
            default_max_per_slot: 10,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL. Appends that arrive while a flush is
/// pending are drained into one batch and share a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut pending = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = pending {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Append and fsync a whole batch. On any failure the batch is cut back
/// off the log, so events whose callers saw an error never replay.
fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &result {
        if let Err(rollback_err) = wal.rollback() {
            error!("{}: rollback after failed append ({e}) failed: {rollback_err}", wal.path().display());
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// One booking ledger: the availability and booking stores plus the
/// admission logic, backed by a single WAL file.
pub struct Engine {
    pub(super) store: DayStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared from log append to in-memory apply;
    /// compaction takes it exclusively so its snapshot misses nothing.
    pub(super) compaction_gate: RwLock<()>,
    settings: EngineSettings,
    #[cfg(test)]
    pub(super) inject_wal_failures: std::sync::atomic::AtomicU32,
}

impl Engine {
    pub fn new(wal_path: PathBuf, settings: EngineSettings) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_tail {
            warn!(
                "{}: truncating torn or corrupt tail after byte {}",
                wal_path.display(),
                replay.valid_len
            );
            Wal::truncate(&wal_path, replay.valid_len)?;
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = DayStore::new();
        let default = AvailabilityRecord::open(settings.default_max_per_slot);
        for event in &replay.events {
            store.replay_event(event, default);
        }
        if !replay.events.is_empty() {
            info!(
                "{}: replayed {} events ({} days, {} bookings)",
                wal_path.display(),
                replay.events.len(),
                store.day_count(),
                store.booking_count()
            );
        }

        Ok(Self {
            store,
            wal_tx,
            compaction_gate: RwLock::new(()),
            settings,
            #[cfg(test)]
            inject_wal_failures: std::sync::atomic::AtomicU32::new(0),
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Normalize a caller-supplied date onto this ledger's calendar.
    pub fn day_key(&self, input: DateLike) -> Result<DayKey, EngineError> {
        Ok(DayKey::normalize(input, &self.settings.timezone)?)
    }

    /// Parse and normalize a textual date.
    pub fn parse_day(&self, input: &str) -> Result<DayKey, EngineError> {
        Ok(DayKey::parse(input, &self.settings.timezone)?)
    }

    pub(super) fn default_record(&self) -> AvailabilityRecord {
        AvailabilityRecord::open(self.settings.default_max_per_slot)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            if self
                .inject_wal_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EngineError::Transient("injected WAL failure".into()));
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Transient("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Transient("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Transient(e.to_string()))
    }

    /// Read the day's availability, writing the default record to the log
    /// first if the day was never provisioned. Callers already holding a
    /// ledger lock keep lock order since availability is always taken last.
    pub(super) async fn provisioned_read<'a>(
        &self,
        state: &'a DayState,
    ) -> Result<RwLockReadGuard<'a, AvailabilityCell>, EngineError> {
        {
            let cell = state.availability.read().await;
            if cell.provisioned {
                return Ok(cell);
            }
        }
        {
            let mut cell = state.availability.write().await;
            if !cell.provisioned {
                let event = Event::DayProvisioned {
                    day: state.day,
                    record: cell.record,
                };
                self.wal_append(&event).await?;
                cell.provisioned = true;
            }
        }
        Ok(state.availability.read().await)
    }
}
