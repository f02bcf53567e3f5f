mod admission;
mod assignment;
mod availability;
mod catalog;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;

pub use availability::available_rooms;
pub use error::EngineError;
pub use lifecycle::{can_transition, successors};

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{
    mpsc, oneshot, Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
    RwLockReadGuard,
};
use ulid::Ulid;

use crate::config::EngineSettings;
use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type SharedBooking = Arc<Mutex<Booking>>;

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// Booking engine for one property.
///
/// Lock order: commit gate (shared), then the booking mutex, then room write
/// locks in ascending room id. Every check-then-act on a room runs under that
/// room's write lock, from the conflict check through the WAL append and the
/// in-memory apply.
pub struct Engine {
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) settings: EngineSettings,
    /// Mutations hold it shared; compaction holds it exclusively while snapshotting.
    pub(super) commit_gate: RwLock<()>,
    /// Serializes catalog writes that span several entries (room numbers, thumbnails).
    pub(super) catalog_lock: Mutex<()>,
    pub(super) users: DashMap<Ulid, User>,
    pub(super) room_types: DashMap<Ulid, RoomType>,
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    /// Room type → rooms index.
    pub(super) rooms_by_type: DashMap<Ulid, Vec<Ulid>>,
    pub(super) room_numbers: DashMap<String, Ulid>,
    pub(super) bookings: DashMap<Ulid, SharedBooking>,
    pub(super) reviews: DashMap<Ulid, Review>,
    pub(super) images: DashMap<Ulid, RoomImage>,
}

/// Write guards over a sorted, deduplicated set of rooms.
pub(super) struct RoomGuards {
    guards: Vec<OwnedRwLockWriteGuard<RoomState>>,
}

impl RoomGuards {
    pub(super) fn none() -> Self {
        Self { guards: Vec::new() }
    }

    pub(super) fn get(&self, id: &Ulid) -> Option<&RoomState> {
        self.guards.iter().find(|g| g.id == *id).map(|g| &**g)
    }

    pub(super) fn get_mut(&mut self, id: &Ulid) -> Option<&mut RoomState> {
        self.guards.iter_mut().find(|g| g.id == *id).map(|g| &mut **g)
    }

    /// Move a booking's footprint from its old record to its new one.
    /// Rooms not held by this guard set are left alone.
    pub(super) fn reindex(&mut self, old: Option<&Booking>, new: Option<&Booking>) {
        if let Some(old) = old
            && let Some(room_id) = old.room_id
            && let Some(rs) = self.get_mut(&room_id)
        {
            unindex_booking(rs, old.id);
        }
        if let Some(new) = new
            && let Some(room_id) = new.room_id
            && let Some(rs) = self.get_mut(&room_id)
        {
            index_booking(rs, new);
        }
    }
}

fn index_booking(rs: &mut RoomState, booking: &Booking) {
    rs.bookings.insert(booking.id);
    if let Some((_, span)) = booking.footprint() {
        rs.insert_interval(Interval {
            booking_id: booking.id,
            span,
        });
    }
}

fn unindex_booking(rs: &mut RoomState, booking_id: Ulid) {
    rs.remove_interval(booking_id);
    rs.bookings.remove(&booking_id);
}

impl Engine {
    pub fn new(wal_path: PathBuf, settings: EngineSettings) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            wal_tx,
            settings,
            commit_gate: RwLock::new(()),
            catalog_lock: Mutex::new(()),
            users: DashMap::new(),
            room_types: DashMap::new(),
            rooms: DashMap::new(),
            rooms_by_type: DashMap::new(),
            room_numbers: DashMap::new(),
            bookings: DashMap::new(),
            reviews: DashMap::new(),
            images: DashMap::new(),
        };

        // We're the sole owner of every Arc here, so try_* always succeeds instantly.
        // Never use blocking_* here: this may run inside an async context
        // (lazy property creation).
        for event in &events {
            engine.replay_event(event);
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events: {} rooms, {} bookings",
                events.len(),
                engine.rooms.len(),
                engine.bookings.len()
            );
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::RoomActiveSet { id, active } => {
                if let Some(rs) = self.get_room(id) {
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    guard.active = *active;
                }
            }
            Event::RoomDeleted { id } => {
                if let Some(rs) = self.get_room(id) {
                    let guard = rs.try_read().expect("replay: uncontended read");
                    self.forget_room(&guard);
                }
            }
            Event::BookingWritten { booking } => {
                let old = self.bookings.get(&booking.id).map(|e| {
                    e.value()
                        .try_lock()
                        .expect("replay: uncontended lock")
                        .clone()
                });
                let mut room_ids: Vec<Ulid> = Vec::new();
                room_ids.extend(old.as_ref().and_then(|b| b.room_id));
                room_ids.extend(booking.room_id);
                room_ids.sort();
                room_ids.dedup();
                let mut guards = RoomGuards::none();
                for rid in room_ids {
                    if let Some(rs) = self.get_room(&rid) {
                        guards
                            .guards
                            .push(rs.try_write_owned().expect("replay: uncontended write"));
                    }
                }
                guards.reindex(old.as_ref(), Some(booking));
                match self.bookings.get(&booking.id) {
                    Some(slot) => {
                        *slot.value().try_lock().expect("replay: uncontended lock") = booking.clone();
                    }
                    None => {
                        self.bookings
                            .insert(booking.id, Arc::new(Mutex::new(booking.clone())));
                    }
                }
            }
            Event::BookingDeleted { id } => {
                if let Some((_, slot)) = self.bookings.remove(id) {
                    let booking = slot.try_lock().expect("replay: uncontended lock").clone();
                    if let Some(room_id) = booking.room_id
                        && let Some(rs) = self.get_room(&room_id)
                    {
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        unindex_booking(&mut guard, *id);
                    }
                }
                self.reviews.remove(id);
            }
            Event::ReviewSubmitted { review } => {
                if let Some(slot) = self.bookings.get(&review.booking_id) {
                    slot.value()
                        .try_lock()
                        .expect("replay: uncontended lock")
                        .is_reviewed = true;
                }
                self.reviews.insert(review.booking_id, review.clone());
            }
            Event::RoomCreated { .. }
            | Event::UserRegistered { .. }
            | Event::RoomTypeSaved { .. }
            | Event::ImageAdded { .. }
            | Event::ThumbnailSet { .. } => self.apply_catalog(event),
        }
    }

    /// Apply an event that only touches catalog maps (no booking or room locks needed).
    pub(super) fn apply_catalog(&self, event: &Event) {
        match event {
            Event::UserRegistered { id, name } => {
                self.users.insert(
                    *id,
                    User {
                        id: *id,
                        name: name.clone(),
                    },
                );
            }
            Event::RoomTypeSaved { room_type } => {
                self.room_types.insert(room_type.id, room_type.clone());
            }
            Event::RoomCreated {
                id,
                room_type_id,
                number,
                active,
            } => {
                let rs = RoomState::new(*id, *room_type_id, number.clone(), *active);
                self.rooms.insert(*id, Arc::new(RwLock::new(rs)));
                self.rooms_by_type.entry(*room_type_id).or_default().push(*id);
                self.room_numbers.insert(number.clone(), *id);
            }
            Event::ImageAdded { image } => {
                if image.is_thumbnail {
                    self.clear_thumbnails(image.room_type_id);
                }
                self.images.insert(image.id, image.clone());
            }
            Event::ThumbnailSet { id, room_type_id } => {
                self.clear_thumbnails(*room_type_id);
                if let Some(mut img) = self.images.get_mut(id) {
                    img.is_thumbnail = true;
                }
            }
            _ => {}
        }
    }

    fn clear_thumbnails(&self, room_type_id: Ulid) {
        for mut img in self.images.iter_mut() {
            if img.room_type_id == room_type_id {
                img.is_thumbnail = false;
            }
        }
    }

    /// Drop a room from every index. Caller holds the room's lock.
    pub(super) fn forget_room(&self, rs: &RoomState) {
        self.rooms.remove(&rs.id);
        if let Some(mut ids) = self.rooms_by_type.get_mut(&rs.room_type_id) {
            ids.retain(|r| *r != rs.id);
        }
        self.room_numbers.remove(&rs.number);
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    // ── Locking ──────────────────────────────────────────

    async fn bounded<T>(&self, what: &'static str, fut: impl Future<Output = T>) -> Result<T, EngineError> {
        tokio::time::timeout(self.settings.lock_timeout, fut)
            .await
            .map_err(|_| EngineError::TransientStorageError(what))
    }

    /// Shared pass through the commit gate. Held for the whole mutation.
    pub(super) async fn enter(&self) -> Result<RwLockReadGuard<'_, ()>, EngineError> {
        self.bounded("commit gate busy (compaction running)", self.commit_gate.read())
            .await
    }

    /// Lock a booking. Fails with NotFound if it was deleted while we waited.
    pub(super) async fn lock_booking(&self, id: Ulid) -> Result<OwnedMutexGuard<Booking>, EngineError> {
        let slot = self.get_booking_slot(&id).ok_or(EngineError::NotFound(id))?;
        let guard = self
            .bounded("booking lock timed out", slot.clone().lock_owned())
            .await?;
        if !self
            .bookings
            .get(&id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), &slot))
        {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    /// Write-lock a set of rooms in ascending id order.
    pub(super) async fn write_rooms(
        &self,
        ids: impl IntoIterator<Item = Ulid>,
    ) -> Result<RoomGuards, EngineError> {
        let mut ids: Vec<Ulid> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
            let guard = self
                .bounded("room lock timed out", rs.clone().write_owned())
                .await?;
            if !self.rooms.get(&id).is_some_and(|e| Arc::ptr_eq(e.value(), &rs)) {
                return Err(EngineError::NotFound(id));
            }
            guards.push(guard);
        }
        Ok(RoomGuards { guards })
    }

    pub(super) async fn read_room(
        &self,
        id: &Ulid,
    ) -> Result<Option<OwnedRwLockReadGuard<RoomState>>, EngineError> {
        let Some(rs) = self.get_room(id) else {
            return Ok(None);
        };
        let guard = self.bounded("room lock timed out", rs.read_owned()).await?;
        Ok(Some(guard))
    }

    /// WAL-append a booking record, then apply it to the booking and its room index.
    pub(super) async fn commit_booking(
        &self,
        current: &mut Booking,
        next: Booking,
        rooms: &mut RoomGuards,
    ) -> Result<(), EngineError> {
        let event = Event::BookingWritten {
            booking: next.clone(),
        };
        self.wal_append(&event).await?;
        rooms.reindex(Some(&*current), Some(&next));
        *current = next;
        Ok(())
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub(super) fn get_booking_slot(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn get_room_type(&self, id: &Ulid) -> Option<RoomType> {
        self.room_types.get(id).map(|e| e.value().clone())
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }
}

/// Run `op`, retrying transient storage errors up to `attempts` times in total
/// with a short linear backoff. Business-rule errors are returned immediately.
pub async fn retry_transient<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < attempts => {
                metrics::counter!(crate::observability::TRANSIENT_RETRIES_TOTAL).increment(1);
                tracing::debug!("transient error on attempt {attempt}/{attempts}: {e}");
                tokio::time::sleep(std::time::Duration::from_millis(10 * attempt as u64)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
