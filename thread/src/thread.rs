// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The thread descriptor.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use fixed_point::Fixed;
use spin::Mutex;

use crate::sync::Lock;

/// The value written into a thread's stack-overflow canary. If this value
/// is ever found to have changed, the thread has overflowed its stack.
const STACK_MAGIC: u32 = 0xcd6a_bf4b;

/// A unique, never-reused identifier for a thread.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    pub(crate) const fn new(id: u64) -> ThreadId {
        ThreadId(id)
    }

    /// Returns the raw numeric identifier.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// The lifecycle state of a thread, matching the states and transitions
/// a thread may be observed in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThreadState {
    /// Eligible to run, waiting for the scheduler to pick it.
    Ready,
    /// Currently executing on the (single) CPU.
    Running,
    /// Waiting on a lock, a timer, or another blocking condition.
    Blocked,
    /// Has exited and is waiting for its resources to be reclaimed.
    Dying,
}

/// A thread descriptor.
///
/// Fields that the scheduler or a [`Lock`] may mutate concurrently with
/// the thread itself running are wrapped in atomics or [`Mutex`]; the
/// single-CPU assumption means these are never contended across cores,
/// only against interrupt handlers, which is why they're still protected
/// rather than left as plain fields.
pub struct Thread {
    id: ThreadId,
    name: String,
    state: Mutex<ThreadState>,

    /// The priority set by the thread itself (or its creator), ignoring
    /// any donation. This is what `set_priority` changes and what
    /// `effective_priority` falls back to once donation ends.
    base_priority: AtomicI32,
    /// The priority actually used for scheduling decisions: the maximum
    /// of `base_priority` and every priority donated to this thread.
    effective_priority: AtomicI32,

    /// The lock this thread is blocked waiting to acquire, if any.
    pub(crate) wait_on_lock: Mutex<Option<Arc<Lock>>>,
    /// Locks currently held by this thread, used to recompute
    /// `effective_priority` when one of them is released.
    pub(crate) locks_held: Mutex<Vec<Arc<Lock>>>,

    /// MLFQ niceness, in `[-20, 20]`. Lower is friendlier to other
    /// threads (gets a lower priority).
    nice: AtomicI32,
    /// MLFQ recent CPU usage, decayed once a second.
    recent_cpu: Mutex<Fixed>,

    /// Ticks this thread has run for during its current scheduling quantum.
    pub(crate) ticks_this_quantum: AtomicU64,

    magic: u32,
}

impl Thread {
    pub(crate) fn new(id: ThreadId, name: String, priority: i32) -> Thread {
        Thread {
            id,
            name,
            state: Mutex::new(ThreadState::Ready),
            base_priority: AtomicI32::new(priority),
            effective_priority: AtomicI32::new(priority),
            wait_on_lock: Mutex::new(None),
            locks_held: Mutex::new(Vec::new()),
            nice: AtomicI32::new(0),
            recent_cpu: Mutex::new(Fixed::ZERO),
            ticks_this_quantum: AtomicU64::new(0),
            magic: STACK_MAGIC,
        }
    }

    /// Returns this thread's identifier.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Returns this thread's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ThreadState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        *self.state.lock() = state;
    }

    /// Returns the priority used for scheduling decisions: the larger of
    /// the thread's own priority and anything donated to it.
    pub fn effective_priority(&self) -> i32 {
        self.effective_priority.load(Ordering::SeqCst)
    }

    pub(crate) fn set_effective_priority(&self, priority: i32) {
        self.effective_priority.store(priority, Ordering::SeqCst);
    }

    /// Returns the priority the thread was assigned, ignoring donation.
    pub fn base_priority(&self) -> i32 {
        self.base_priority.load(Ordering::SeqCst)
    }

    /// Sets the thread's own priority. If the thread is not currently the
    /// target of a donation, this also becomes the effective priority.
    ///
    /// Returns the new effective priority, so the caller can decide
    /// whether to yield (if this thread is running and a higher-priority
    /// thread is now ready, or if its own priority just dropped below
    /// that of the head of the ready queue).
    pub fn set_priority(&self, priority: i32) -> i32 {
        self.base_priority.store(priority, Ordering::SeqCst);
        let donated_max = self
            .locks_held
            .lock()
            .iter()
            .filter_map(|lock| lock.max_waiter_priority())
            .max();
        let effective = match donated_max {
            Some(donated) if donated > priority => donated,
            _ => priority,
        };
        self.effective_priority.store(effective, Ordering::SeqCst);
        effective
    }

    /// Returns the MLFQ niceness.
    pub fn nice(&self) -> i32 {
        self.nice.load(Ordering::SeqCst)
    }

    /// Sets the MLFQ niceness. Callers in MLFQ mode should recompute the
    /// thread's priority afterwards.
    pub fn set_nice(&self, nice: i32) {
        self.nice.store(nice.clamp(-20, 20), Ordering::SeqCst);
    }

    /// Returns the MLFQ recent CPU usage.
    pub fn recent_cpu(&self) -> Fixed {
        *self.recent_cpu.lock()
    }

    pub(crate) fn set_recent_cpu(&self, value: Fixed) {
        *self.recent_cpu.lock() = value;
    }

    pub(crate) fn increment_recent_cpu(&self) {
        let mut cpu = self.recent_cpu.lock();
        *cpu = *cpu + 1;
    }

    /// Asserts the stack-overflow canary is intact.
    ///
    /// # Panics
    ///
    /// Panics if the canary has been overwritten, which indicates the
    /// thread's stack has overflowed into adjacent memory.
    pub fn check_stack_canary(&self) {
        assert_eq!(self.magic, STACK_MAGIC, "thread {:?} stack overflowed", self.id);
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("effective_priority", &self.effective_priority())
            .finish()
    }
}
