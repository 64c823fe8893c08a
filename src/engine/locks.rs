//! Locks serializing conflicting steps of a concurrent build.
//!
//! Two levels:
//! - the [`AggregatorLock`], a reentrant read/write lock: aggregating steps
//!   hold the write side, every other step holds the read side
//! - one [`ReentrantLock`] per unit, so a forked lifecycle on a unit cannot
//!   interleave with another step of that unit
//!
//! Reentrancy is by lane. A lane is one worker of the coordinator; forked
//! executions run on the lane of the step that forked them. Every holder is
//! recorded as an [`OwnerToken`] so contention can be reported by step.
//!
//! Acquisition always tries first without waiting. On contention it logs
//! the current holder, then waits for a release notification.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Identifies one worker of the coordinator.
pub type LaneId = u64;

/// Who holds, or wants, a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct OwnerToken {
    pub lane: LaneId,
    pub unit: String,
    pub step: String,
}

impl OwnerToken {
    pub fn new(lane: LaneId, unit: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            lane,
            unit: unit.into(),
            step: step.into(),
        }
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.step, self.unit)
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Per-unit lock
// ============================================================================

#[derive(Debug, Default)]
struct UnitLockState {
    holder: Option<OwnerToken>,
    depth: usize,
}

/// Mutual exclusion for one unit, reentrant per lane.
#[derive(Debug)]
pub struct ReentrantLock {
    unit: String,
    state: Mutex<UnitLockState>,
    released: Notify,
}

impl ReentrantLock {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            state: Mutex::new(UnitLockState::default()),
            released: Notify::new(),
        }
    }

    /// The outermost current holder.
    pub fn owner(&self) -> Option<OwnerToken> {
        guard(&self.state).holder.clone()
    }

    pub fn is_locked(&self) -> bool {
        guard(&self.state).holder.is_some()
    }

    pub fn try_lock(self: &Arc<Self>, owner: &OwnerToken) -> Option<UnitGuard> {
        let mut state = guard(&self.state);
        let acquired = match &state.holder {
            None => {
                state.holder = Some(owner.clone());
                state.depth = 1;
                true
            }
            Some(holder) if holder.lane == owner.lane => {
                state.depth += 1;
                true
            }
            Some(_) => false,
        };
        acquired.then(|| UnitGuard {
            lock: Arc::clone(self),
        })
    }

    pub async fn lock(self: &Arc<Self>, owner: &OwnerToken) -> UnitGuard {
        if let Some(acquired) = self.try_lock(owner) {
            return acquired;
        }
        match self.owner() {
            Some(holder) => tracing::warn!(
                unit = %self.unit,
                holder = %holder,
                waiting = %owner.step,
                "Step {} is already running on unit {}; {} is blocked until it is done",
                holder.step,
                self.unit,
                owner.step
            ),
            None => tracing::warn!(
                unit = %self.unit,
                waiting = %owner.step,
                "A step is already running on unit {}; {} is blocked until it is done",
                self.unit,
                owner.step
            ),
        }
        loop {
            // Registered before the retry so a release in between is not missed.
            let released = self.released.notified();
            if let Some(acquired) = self.try_lock(owner) {
                return acquired;
            }
            released.await;
        }
    }

    fn unlock(&self) {
        let mut state = guard(&self.state);
        state.depth = state.depth.saturating_sub(1);
        if state.depth == 0 {
            state.holder = None;
            drop(state);
            self.released.notify_waiters();
        }
    }
}

/// Held per-unit lock; released on drop.
#[derive(Debug)]
pub struct UnitGuard {
    lock: Arc<ReentrantLock>,
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

// ============================================================================
// Aggregator lock
// ============================================================================

/// Side of the aggregator lock a step needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// A step confined to its own unit.
    Read,
    /// An aggregating step.
    Write,
}

#[derive(Debug, Default)]
struct AggregatorState {
    writer: Option<OwnerToken>,
    write_depth: usize,
    readers: HashMap<LaneId, (usize, OwnerToken)>,
    waiting_writers: usize,
}

impl AggregatorState {
    fn try_acquire(&mut self, owner: &OwnerToken, access: Access) -> bool {
        match access {
            Access::Write => match &self.writer {
                Some(writer) if writer.lane == owner.lane => {
                    self.write_depth += 1;
                    true
                }
                Some(_) => false,
                None if self.readers.keys().any(|lane| *lane != owner.lane) => false,
                None => {
                    self.writer = Some(owner.clone());
                    self.write_depth = 1;
                    true
                }
            },
            Access::Read => {
                let reentrant = self.readers.contains_key(&owner.lane)
                    || self.writer.as_ref().is_some_and(|w| w.lane == owner.lane);
                if !reentrant && (self.writer.is_some() || self.waiting_writers > 0) {
                    return false;
                }
                self.readers
                    .entry(owner.lane)
                    .or_insert_with(|| (0, owner.clone()))
                    .0 += 1;
                true
            }
        }
    }

    fn release(&mut self, lane: LaneId, access: Access) {
        match access {
            Access::Write => {
                self.write_depth = self.write_depth.saturating_sub(1);
                if self.write_depth == 0 {
                    self.writer = None;
                }
            }
            Access::Read => {
                if let Some(entry) = self.readers.get_mut(&lane) {
                    entry.0 -= 1;
                    if entry.0 == 0 {
                        self.readers.remove(&lane);
                    }
                }
            }
        }
    }
}

/// Build-wide read/write lock, reentrant per lane.
///
/// Readers yield to waiting writers so an aggregating step is not starved
/// by a steady stream of ordinary steps.
#[derive(Debug, Default)]
pub struct AggregatorLock {
    state: Mutex<AggregatorState>,
    released: Notify,
}

/// Keeps the waiting-writer count accurate even if the wait is cancelled.
struct PendingWrite<'a>(&'a AggregatorLock);

impl Drop for PendingWrite<'_> {
    fn drop(&mut self) {
        guard(&self.0.state).waiting_writers -= 1;
        self.0.released.notify_waiters();
    }
}

impl AggregatorLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The aggregating step currently holding the write side.
    pub fn writer(&self) -> Option<OwnerToken> {
        guard(&self.state).writer.clone()
    }

    pub fn reader_count(&self) -> usize {
        guard(&self.state).readers.len()
    }

    pub fn has_waiting_writer(&self) -> bool {
        guard(&self.state).waiting_writers > 0
    }

    pub fn try_acquire(self: &Arc<Self>, owner: &OwnerToken, access: Access) -> Option<AggregatorGuard> {
        let acquired = guard(&self.state).try_acquire(owner, access);
        acquired.then(|| AggregatorGuard {
            lock: Arc::clone(self),
            lane: owner.lane,
            access,
        })
    }

    pub async fn acquire(self: &Arc<Self>, owner: &OwnerToken, access: Access) -> AggregatorGuard {
        if let Some(acquired) = self.try_acquire(owner, access) {
            return acquired;
        }
        self.report_contention(owner, access);

        let _pending = (access == Access::Write).then(|| {
            guard(&self.state).waiting_writers += 1;
            PendingWrite(&**self)
        });
        loop {
            let released = self.released.notified();
            if let Some(acquired) = self.try_acquire(owner, access) {
                return acquired;
            }
            released.await;
        }
    }

    fn report_contention(&self, owner: &OwnerToken, access: Access) {
        let state = guard(&self.state);
        match (&state.writer, access) {
            (Some(writer), _) => tracing::warn!(
                holder = %writer,
                waiting = %owner,
                "The aggregating step {} is already running in this parallel build; aggregating steps need exclusive access to every unit, so {} is blocked until it is done",
                writer.step,
                owner.step
            ),
            (None, Access::Write) => tracing::warn!(
                readers = state.readers.len(),
                waiting = %owner,
                "Aggregating step {} waits for {} running step(s) to finish",
                owner.step,
                state.readers.len()
            ),
            (None, Access::Read) => tracing::warn!(
                waiting = %owner,
                "An aggregating step is queued in this parallel build; {} is blocked until it is done",
                owner.step
            ),
        }
    }

    fn release(&self, lane: LaneId, access: Access) {
        guard(&self.state).release(lane, access);
        self.released.notify_waiters();
    }
}

/// Held side of the aggregator lock; released on drop.
#[derive(Debug)]
pub struct AggregatorGuard {
    lock: Arc<AggregatorLock>,
    lane: LaneId,
    access: Access,
}

impl AggregatorGuard {
    pub fn access(&self) -> Access {
        self.access
    }
}

impl Drop for AggregatorGuard {
    fn drop(&mut self) {
        self.lock.release(self.lane, self.access);
    }
}

// ============================================================================
// Lock table
// ============================================================================

/// Session-wide locks: the aggregator lock plus one lock per unit.
#[derive(Debug, Default)]
pub struct LockTable {
    aggregator: Arc<AggregatorLock>,
    units: Mutex<HashMap<String, Arc<ReentrantLock>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregator(&self) -> &Arc<AggregatorLock> {
        &self.aggregator
    }

    /// The lock of `unit`, created on first use.
    pub fn unit_lock(&self, unit: &str) -> Arc<ReentrantLock> {
        let mut units = guard(&self.units);
        Arc::clone(
            units
                .entry(unit.to_string())
                .or_insert_with(|| Arc::new(ReentrantLock::new(unit))),
        )
    }

    /// Acquire the aggregator side, then the unit lock.
    pub async fn acquire(&self, owner: &OwnerToken, aggregating: bool) -> StepLock {
        let access = if aggregating {
            Access::Write
        } else {
            Access::Read
        };
        let aggregator = self.aggregator.acquire(owner, access).await;
        let unit = self.unit_lock(&owner.unit).lock(owner).await;
        StepLock {
            unit: Some(unit),
            aggregator: Some(aggregator),
        }
    }
}

/// Locks held by one running step.
#[derive(Debug, Default)]
pub struct StepLock {
    unit: Option<UnitGuard>,
    aggregator: Option<AggregatorGuard>,
}

impl StepLock {
    /// Nothing held; used when the build runs one unit at a time.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.aggregator.is_some()
    }
}

impl Drop for StepLock {
    fn drop(&mut self) {
        // Reverse acquisition order.
        self.unit.take();
        self.aggregator.take();
    }
}
