use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::time::{Duration, Instant};

/// Counters describing the traffic a link has seen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Items stored by the upstream side
    pub accepted: u64,
    /// Items handed to the downstream side
    pub delivered: u64,
    /// Items left staged in the slot at shutdown and dropped
    pub discarded: u64,
}

impl LinkStats {
    /// Number of items currently staged in the slot (always 0 or 1)
    pub fn occupancy(&self) -> u64 {
        self.accepted - self.delivered - self.discarded
    }
}

struct Slot<T> {
    payload: Option<T>,
    closed: bool,
    stats: LinkStats,
}

/// A single-slot handoff between two adjacent stages.
///
/// The slot holds at most one item. `put` blocks while the slot is occupied
/// and `take` blocks while it is empty, which gives each link backpressure in
/// both directions. Closing the link wakes every waiter: a blocked `put` gets
/// its item back, and `take` still hands out an item that was already staged
/// before returning `None`.
///
/// The lock is only held while the slot state is inspected or changed, never
/// while user code runs.
pub struct Link<T> {
    slot: Mutex<Slot<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> Link<T> {
    /// Create an empty, open link
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                payload: None,
                closed: false,
                stats: LinkStats::default(),
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Store an item, blocking until the slot is free.
    ///
    /// Returns the item in `Err` if the link is closed.
    pub fn put(&self, item: T) -> Result<(), T> {
        let mut slot = self.slot.lock();
        while slot.payload.is_some() && !slot.closed {
            self.not_full.wait(&mut slot);
        }
        if slot.closed {
            return Err(item);
        }

        slot.payload = Some(item);
        slot.stats.accepted += 1;
        drop(slot);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Take the staged item, blocking until one is available.
    ///
    /// Returns `None` once the link is closed and empty.
    pub fn take(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        while slot.payload.is_none() && !slot.closed {
            self.not_empty.wait(&mut slot);
        }
        self.take_locked(slot)
    }

    /// Like [`take`](Self::take), but gives up after `timeout`
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while slot.payload.is_none() && !slot.closed {
            if self.not_empty.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        self.take_locked(slot)
    }

    fn take_locked(&self, mut slot: MutexGuard<'_, Slot<T>>) -> Option<T> {
        let item = slot.payload.take()?;
        slot.stats.delivered += 1;
        drop(slot);
        self.not_full.notify_one();
        Some(item)
    }

    /// Close the link and wake every waiter on both sides.
    ///
    /// Closing is idempotent. An item already staged can still be taken; if
    /// nobody takes it, [`discard_staged`](Self::discard_staged) drops it.
    pub fn close(&self) {
        let mut slot = self.slot.lock();
        slot.closed = true;
        drop(slot);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Drop the item left in a closed link, if any.
    ///
    /// Returns `true` when an item was discarded. Open links are untouched.
    pub fn discard_staged(&self) -> bool {
        let mut slot = self.slot.lock();
        if !slot.closed {
            return false;
        }
        let staged = slot.payload.take();
        if staged.is_some() {
            slot.stats.discarded += 1;
        }
        drop(slot);

        // the item's destructor runs outside the lock
        let discarded = staged.is_some();
        drop(staged);
        discarded
    }

    /// Whether the slot currently holds an undelivered item
    pub fn is_occupied(&self) -> bool {
        self.slot.lock().payload.is_some()
    }

    /// Whether the link has been closed
    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    /// Snapshot of the link's counters
    pub fn stats(&self) -> LinkStats {
        self.slot.lock().stats
    }
}

impl<T> Default for Link<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("Link")
            .field("occupied", &slot.payload.is_some())
            .field("closed", &slot.closed)
            .field("stats", &slot.stats)
            .finish()
    }
}
