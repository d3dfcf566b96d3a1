mod assignment;
mod availability;
mod bookings;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod waitlist;
#[cfg(test)]
mod tests;

pub use assignment::{BucketState, Reservation};
use assignment::BucketGuard;
pub use availability::rank_candidates;
pub use error::EngineError;
pub use lifecycle::{check_transition, TableEffect};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock, RwLockReadGuard};
use ulid::Ulid;

use crate::calendar::Calendar;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRestaurant = Arc<RwLock<RestaurantState>>;
pub type SharedTable = Arc<RwLock<TableState>>;
pub type SharedBooking = Arc<Mutex<Booking>>;
pub type SharedEntry = Arc<Mutex<WaitlistEntry>>;
pub type SharedBucket = Arc<Mutex<BucketState>>;

#[derive(Debug, Clone)]
pub struct RestaurantState {
    pub restaurant: Restaurant,
    pub calendar: Calendar,
    /// Table ids in the order they were added.
    pub tables: Vec<Ulid>,
}

/// Tuning for the per-bucket reservation lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// How long one attempt waits for a bucket lock.
    pub lock_timeout: Duration,
    /// Attempts before `EngineError::Contention` is surfaced.
    pub lock_attempts: u32,
    /// Base backoff between attempts; doubles per attempt.
    pub lock_backoff: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(250),
            lock_attempts: 5,
            lock_backoff: Duration::from_millis(10),
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    /// Start copying every flushed append aside so the compacted log can
    /// carry events the snapshot may have missed.
    BeginCompact {
        response: oneshot::Sender<()>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is already queued, then
/// fsync once for the whole batch and answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    // Appends flushed since the current compaction's snapshot point.
    let mut tail: Option<Vec<Event>> = None;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                if result.is_ok()
                    && let Some(tail) = tail.as_mut()
                {
                    tail.extend(batch.iter().map(|(event, _)| event.clone()));
                }
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, &mut tail, other);
                }
            }
            other => handle_non_append(&mut wal, &mut tail, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partial bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
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

fn handle_non_append(wal: &mut Wal, tail: &mut Option<Vec<Event>>, cmd: WalCommand) {
    match cmd {
        WalCommand::BeginCompact { response } => {
            *tail = Some(Vec::new());
            let _ = response.send(());
        }
        WalCommand::Compact { mut events, response } => {
            events.extend(tail.take().unwrap_or_default());
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

// ── State mutations shared by live operations and replay ────────────

/// Record that `booking` holds `ts` and apply the table's new status.
pub(super) fn hold_table(ts: &mut TableState, booking: &Booking, status: Option<TableStatus>) {
    ts.insert_allocation(Allocation {
        booking_id: booking.id,
        span: booking.span(),
        seated: booking.status == BookingStatus::Seated,
        walk_in: booking.is_walk_in,
    });
    if let Some(s) = status {
        ts.table.status = s;
    }
}

pub(super) fn release_table(ts: &mut TableState, booking_id: Ulid, status: Option<TableStatus>) {
    ts.remove_allocation(booking_id);
    if let Some(s) = status {
        ts.table.status = s;
    }
}

/// Apply a status change to a booking and, if it holds one, its table.
pub(super) fn apply_status_change(
    booking: &mut Booking,
    table: Option<&mut TableState>,
    status: BookingStatus,
    table_status: Option<TableStatus>,
) {
    booking.status = status;
    let Some(ts) = table else { return };
    if status.is_terminal() {
        ts.remove_allocation(booking.id);
    } else if status == BookingStatus::Seated
        && let Some(a) = ts.allocation_mut(booking.id)
    {
        a.seated = true;
    }
    if let Some(s) = table_status {
        ts.table.status = s;
    }
}

/// Held from a WAL append until its effect is applied in memory.
/// Compaction takes the gate exclusively to find a point where every
/// logged event is also visible in memory.
pub(super) type Applied<'a> = RwLockReadGuard<'a, ()>;

/// An id reserved by an in-flight create. Released on drop.
pub(super) struct IdClaim<'a> {
    claims: &'a DashMap<Ulid, ()>,
    id: Ulid,
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.id);
    }
}

pub struct Engine {
    pub(super) restaurants: DashMap<Ulid, SharedRestaurant>,
    pub(super) tables: DashMap<Ulid, SharedTable>,
    pub(super) bookings: DashMap<Ulid, SharedBooking>,
    pub(super) waitlist: DashMap<Ulid, SharedEntry>,
    /// Serialization point for reservations and waitlist priority, per bucket.
    pub(super) buckets: DashMap<BucketKey, SharedBucket>,
    /// Last `priority_order` issued per bucket. Outlives the bucket so
    /// numbering never restarts.
    pub(super) issued_priority: DashMap<BucketKey, u32>,
    /// Ids whose create is between its existence check and its insert.
    pub(super) claims: DashMap<Ulid, ()>,
    pub(super) commit_gate: RwLock<()>,
    /// One compaction at a time.
    pub(super) compacting: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) settings: EngineSettings,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, settings: EngineSettings) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            restaurants: DashMap::new(),
            tables: DashMap::new(),
            bookings: DashMap::new(),
            waitlist: DashMap::new(),
            buckets: DashMap::new(),
            issued_priority: DashMap::new(),
            claims: DashMap::new(),
            commit_gate: RwLock::new(()),
            compacting: Mutex::new(()),
            wal_tx,
            notify,
            settings,
        };

        // We're the sole owner of every lock here, so try_* always succeeds.
        // Never block: this may run inside an async context (lazy tenant creation).
        for event in &events {
            engine.replay(event);
        }
        engine.prune_idle_buckets();

        Ok(engine)
    }

    fn replay(&self, event: &Event) {
        match event {
            Event::RestaurantCreated { restaurant } => {
                let rs = RestaurantState {
                    restaurant: restaurant.clone(),
                    calendar: Calendar::new(),
                    tables: Vec::new(),
                };
                self.restaurants.insert(restaurant.id, Arc::new(RwLock::new(rs)));
            }
            Event::SlotDurationChanged {
                restaurant_id,
                slot_duration_minutes,
            } => {
                if let Some(rs) = self.get_restaurant(restaurant_id) {
                    let mut g = rs.try_write().expect("replay: uncontended write");
                    g.restaurant.slot_duration_minutes = *slot_duration_minutes;
                }
            }
            Event::WeeklyHoursSet { restaurant_id, hours } => {
                if let Some(rs) = self.get_restaurant(restaurant_id) {
                    let mut g = rs.try_write().expect("replay: uncontended write");
                    g.calendar.set_weekly(*hours);
                }
            }
            Event::DateOverrideSet {
                restaurant_id,
                date,
                hours,
            } => {
                if let Some(rs) = self.get_restaurant(restaurant_id) {
                    let mut g = rs.try_write().expect("replay: uncontended write");
                    g.calendar.set_override(*date, *hours);
                }
            }
            Event::DateOverrideRemoved { restaurant_id, date } => {
                if let Some(rs) = self.get_restaurant(restaurant_id) {
                    let mut g = rs.try_write().expect("replay: uncontended write");
                    g.calendar.remove_override(*date);
                }
            }
            Event::TableAdded { table } => {
                if let Some(rs) = self.get_restaurant(&table.restaurant_id) {
                    let mut g = rs.try_write().expect("replay: uncontended write");
                    if !g.tables.contains(&table.id) {
                        g.tables.push(table.id);
                    }
                }
                self.tables
                    .insert(table.id, Arc::new(RwLock::new(TableState::new(table.clone()))));
            }
            Event::TableStatusChanged { table_id, status } => {
                if let Some(ts) = self.get_table(table_id) {
                    ts.try_write().expect("replay: uncontended write").table.status = *status;
                }
            }
            Event::BookingCreated {
                booking,
                table_status,
            } => self.replay_booking(booking, *table_status),
            Event::TableAssigned {
                booking_id,
                table_id,
                method,
                table_status,
                released,
            } => {
                let Some(b) = self.get_booking(booking_id) else { return };
                let mut booking = b.try_lock().expect("replay: uncontended lock");
                if let Some(old) = booking.table_id
                    && let Some(ts) = self.get_table(&old)
                {
                    let mut g = ts.try_write().expect("replay: uncontended write");
                    let status = released.filter(|r| r.table_id == old).map(|r| r.status);
                    release_table(&mut g, booking.id, status);
                }
                booking.table_id = Some(*table_id);
                booking.assignment_method = *method;
                if let Some(ts) = self.get_table(table_id) {
                    let mut g = ts.try_write().expect("replay: uncontended write");
                    hold_table(&mut g, &booking, *table_status);
                }
            }
            Event::BookingStatusChanged {
                booking_id,
                status,
                table_status,
            } => {
                let Some(b) = self.get_booking(booking_id) else { return };
                let mut booking = b.try_lock().expect("replay: uncontended lock");
                let table = booking.table_id.and_then(|id| self.get_table(&id));
                let mut guard = table
                    .as_ref()
                    .map(|ts| ts.try_write().expect("replay: uncontended write"));
                apply_status_change(&mut booking, guard.as_deref_mut(), *status, *table_status);
            }
            Event::WaitlistEnqueued { entry } => {
                let bucket = self.bucket(entry.bucket());
                let mut queue = bucket.try_lock().expect("replay: uncontended lock");
                self.note_priority(entry.bucket(), entry.priority_order);
                if entry.status == WaitlistStatus::Waiting {
                    queue.push(entry.priority_order, entry.id);
                } else {
                    queue.remove(entry.priority_order);
                }
                self.waitlist
                    .insert(entry.id, Arc::new(Mutex::new(entry.clone())));
            }
            Event::WaitlistPromoted {
                entry_id,
                booking,
                table_status,
            } => {
                if let Some(e) = self.get_entry(entry_id) {
                    let mut entry = e.try_lock().expect("replay: uncontended lock");
                    entry.status = WaitlistStatus::Promoted;
                    entry.booking_id = Some(booking.id);
                    self.replay_dequeue(&entry);
                }
                self.replay_booking(booking, *table_status);
            }
            Event::WaitlistCancelled { entry_id } => {
                if let Some(e) = self.get_entry(entry_id) {
                    let mut entry = e.try_lock().expect("replay: uncontended lock");
                    entry.status = WaitlistStatus::Cancelled;
                    self.replay_dequeue(&entry);
                }
            }
        }
    }

    fn replay_dequeue(&self, entry: &WaitlistEntry) {
        if let Some(bucket) = self.buckets.get(&entry.bucket()) {
            bucket
                .try_lock()
                .expect("replay: uncontended lock")
                .remove(entry.priority_order);
        }
    }

    fn replay_booking(&self, booking: &Booking, table_status: Option<TableStatus>) {
        if booking.holds_table()
            && let Some(ts) = booking.table_id.and_then(|id| self.get_table(&id))
        {
            let mut g = ts.try_write().expect("replay: uncontended write");
            hold_table(&mut g, booking, table_status);
        }
        self.bookings
            .insert(booking.id, Arc::new(Mutex::new(booking.clone())));
    }

    /// Write event to WAL via the background group-commit writer. The
    /// returned guard must be held until the event is applied in memory and
    /// dropped before anything else is awaited.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<Applied<'_>, EngineError> {
        let applied = self.commit_gate.read().await;
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
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        Ok(applied)
    }

    /// Reserve `id` for a create until the returned claim drops. Fails if
    /// the id names any existing record or another create holds it.
    pub(super) fn claim_id(&self, id: Ulid) -> Result<IdClaim<'_>, EngineError> {
        match self.claims.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(v) => {
                v.insert(());
            }
        }
        let claim = IdClaim {
            claims: &self.claims,
            id,
        };
        if self.restaurants.contains_key(&id)
            || self.tables.contains_key(&id)
            || self.bookings.contains_key(&id)
            || self.waitlist.contains_key(&id)
        {
            return Err(EngineError::AlreadyExists(id));
        }
        Ok(claim)
    }

    /// Broadcast a committed event to the restaurant's subscribers.
    pub(super) fn publish(&self, restaurant_id: Ulid, event: &Event) {
        self.notify.send(restaurant_id, event);
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn get_restaurant(&self, id: &Ulid) -> Option<SharedRestaurant> {
        self.restaurants.get(id).map(|e| e.value().clone())
    }

    pub fn get_table(&self, id: &Ulid) -> Option<SharedTable> {
        self.tables.get(id).map(|e| e.value().clone())
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn get_entry(&self, id: &Ulid) -> Option<SharedEntry> {
        self.waitlist.get(id).map(|e| e.value().clone())
    }

    pub(super) fn restaurant(&self, id: &Ulid) -> Result<SharedRestaurant, EngineError> {
        self.get_restaurant(id).ok_or(EngineError::NotFound(*id))
    }

    pub(super) fn table(&self, id: &Ulid) -> Result<SharedTable, EngineError> {
        self.get_table(id).ok_or(EngineError::NotFound(*id))
    }

    pub(super) fn booking(&self, id: &Ulid) -> Result<SharedBooking, EngineError> {
        self.get_booking(id).ok_or(EngineError::NotFound(*id))
    }

    pub(super) fn entry(&self, id: &Ulid) -> Result<SharedEntry, EngineError> {
        self.get_entry(id).ok_or(EngineError::NotFound(*id))
    }

    /// Get or create the lock + waitlist queue for a bucket.
    pub(super) fn bucket(&self, key: BucketKey) -> SharedBucket {
        self.buckets.entry(key).or_default().value().clone()
    }

    /// Next `priority_order` for a bucket. Caller holds the bucket lock.
    pub(super) fn next_priority(&self, key: BucketKey) -> u32 {
        self.issued_priority.get(&key).map_or(1, |p| *p + 1)
    }

    pub(super) fn note_priority(&self, key: BucketKey, priority: u32) {
        self.issued_priority
            .entry(key)
            .and_modify(|p| *p = (*p).max(priority))
            .or_insert(priority);
    }

    /// Release a bucket lock and forget the bucket if nobody else holds or
    /// waits on it and nothing is queued in it.
    pub(super) fn unlock_bucket(&self, key: BucketKey, guard: BucketGuard) {
        drop(guard);
        self.buckets.remove_if(&key, |_, bucket| is_idle(bucket));
    }

    /// Drop every idle bucket. Returns how many remain.
    pub fn prune_idle_buckets(&self) -> usize {
        self.buckets.retain(|_, bucket| !is_idle(bucket));
        self.buckets.len()
    }

    /// Subscribe to every committed event for a restaurant.
    pub fn subscribe(&self, restaurant_id: Ulid) -> tokio::sync::broadcast::Receiver<Event> {
        self.notify.subscribe(restaurant_id)
    }
}

/// No outside handle and an empty queue. Runs under the map's shard lock,
/// so no new handle can be taken while this is checked.
fn is_idle(bucket: &SharedBucket) -> bool {
    Arc::strong_count(bucket) == 1 && bucket.try_lock().is_ok_and(|q| q.is_empty())
}
