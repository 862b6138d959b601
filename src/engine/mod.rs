mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{Schedule, day_availability, weekday_name};
pub use conflict::now_ms;
pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::journal::Journal;
use crate::model::*;
use crate::notify::NotificationQueue;

pub type SharedFacilityState = Arc<RwLock<FacilityState>>;

// ── Group-commit journal channel ─────────────────────────

pub(super) enum JournalCommand {
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

/// Background task that owns the journal and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn journal_writer_loop(mut journal: Journal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let JournalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut journal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(JournalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Flush what we have before handling anything else.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut journal, &batch);
        metrics::histogram!(crate::observability::JOURNAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!(batch = batch.len(), "journal flush failed: {e}");
        }
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut journal, cmd);
        }
    }
}

fn flush_batch(
    journal: &mut Journal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = journal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    let result = match append_err {
        Some(e) => Err(e),
        None => journal.flush_sync(),
    };
    if result.is_err() {
        // Nothing in this batch is acknowledged; cut it back out so later records stay readable.
        if let Err(e) = journal.rollback() {
            tracing::error!("journal rollback failed, refusing further writes: {e}");
        }
    }
    result
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(journal: &mut Journal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Journal::write_snapshot(journal.path(), &events)
                .and_then(|()| journal.swap_snapshot());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(journal.appends_since_compact());
        }
        JournalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Booking engine: facilities with their bookings, site settings, and the journal writer.
pub struct Engine {
    pub(super) facilities: DashMap<Ulid, SharedFacilityState>,
    pub(super) journal_tx: mpsc::Sender<JournalCommand>,
    /// Reverse lookup: booking id → facility id.
    pub(super) booking_index: DashMap<Ulid, Ulid>,
    pub(super) settings: RwLock<SiteSettings>,
    pub(super) schedule: Schedule,
    pub(super) notifications: NotificationQueue,
    /// Mutations hold this shared; compaction holds it exclusively.
    pub(super) gate: RwLock<()>,
}

/// Apply an event to a facility's state (no locking; caller holds the lock).
fn apply_to_facility(fs: &mut FacilityState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated { booking } | Event::BookingUpdated { booking } => {
            index.insert(booking.id, booking.facility_id);
            fs.upsert_booking(booking.clone());
        }
        Event::FacilityUpdated { facility } => {
            fs.facility = facility.clone();
        }
        // Created/Deleted are handled at the map level, settings outside facilities.
        Event::FacilityCreated { .. } | Event::FacilityDeleted { .. } | Event::SettingsUpdated { .. } => {}
    }
}

/// Facility an event belongs to, for events applied inside a facility.
fn event_facility_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { booking } | Event::BookingUpdated { booking } => Some(booking.facility_id),
        Event::FacilityUpdated { facility } => Some(facility.id),
        Event::FacilityCreated { .. } | Event::FacilityDeleted { .. } | Event::SettingsUpdated { .. } => None,
    }
}

impl Engine {
    /// Replay the journal at `journal_path` and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(
        journal_path: PathBuf,
        schedule: Schedule,
        notifications: NotificationQueue,
    ) -> io::Result<Self> {
        let (journal, events) = Journal::recover(&journal_path)?;

        let index = DashMap::new();
        let mut states: HashMap<Ulid, FacilityState> = HashMap::new();
        let mut settings = SiteSettings::default();
        for event in &events {
            match event {
                Event::FacilityCreated { facility } => {
                    states.insert(facility.id, FacilityState::new(facility.clone()));
                }
                Event::FacilityDeleted { id } => {
                    if let Some(fs) = states.remove(id) {
                        for b in &fs.bookings {
                            index.remove(&b.id);
                        }
                    }
                }
                Event::SettingsUpdated { settings: s } => settings = s.clone(),
                other => {
                    if let Some(fid) = event_facility_id(other)
                        && let Some(fs) = states.get_mut(&fid)
                    {
                        apply_to_facility(fs, other, &index);
                    }
                }
            }
        }
        tracing::info!(
            path = %journal_path.display(),
            events = events.len(),
            facilities = states.len(),
            bookings = index.len(),
            "journal replayed"
        );

        let (journal_tx, journal_rx) = mpsc::channel(4096);
        tokio::spawn(journal_writer_loop(journal, journal_rx));

        let facilities = DashMap::new();
        for (id, fs) in states {
            facilities.insert(id, Arc::new(RwLock::new(fs)));
        }
        metrics::gauge!(crate::observability::FACILITIES_ACTIVE).set(facilities.len() as f64);

        Ok(Self {
            facilities,
            journal_tx,
            booking_index: index,
            settings: RwLock::new(settings),
            schedule,
            notifications,
            gate: RwLock::new(()),
        })
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Write event to the journal via the background group-commit writer.
    async fn journal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::JournalError("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::JournalError("journal writer dropped response".into()))?
            .map_err(|e| EngineError::JournalError(e.to_string()))
    }

    pub fn get_facility_state(&self, id: &Ulid) -> Option<SharedFacilityState> {
        self.facilities.get(id).map(|e| e.value().clone())
    }

    pub fn facility_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_index.get(booking_id).map(|e| *e.value())
    }

    /// Journal-append + apply in one call. The caller holds the facility write lock.
    pub(super) async fn persist_and_apply(
        &self,
        fs: &mut FacilityState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.journal_append(event).await?;
        apply_to_facility(fs, event, &self.booking_index);
        Ok(())
    }

    /// Acquire a facility's write lock, failing if it was deleted while we waited.
    pub(super) async fn lock_facility(
        &self,
        id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<FacilityState>, EngineError> {
        let fs = self.get_facility_state(id).ok_or(EngineError::NotFound(*id))?;
        let guard = fs.write_owned().await;
        if !self.facilities.contains_key(id) {
            return Err(EngineError::NotFound(*id));
        }
        Ok(guard)
    }

    /// Lookup booking → facility, then acquire that facility's write lock.
    pub(super) async fn lock_booking_facility(
        &self,
        booking_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<FacilityState>, EngineError> {
        let facility_id = self
            .facility_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let guard = self.lock_facility(&facility_id).await?;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(*booking_id));
        }
        Ok(guard)
    }
}
