// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The scheduler: thread creation, the ready queue, and the timer tick
//! handler that drives both time-slice preemption and (when enabled)
//! multi-level feedback queue priority recomputation.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use fixed_point::Fixed;
use spin::Mutex;

use crate::thread::{Thread, ThreadId, ThreadState};
use crate::{PRI_DEFAULT, PRI_MAX, PRI_MIN, TIMER_FREQ, TIME_SLICE};

struct Sleeper {
    id: ThreadId,
    wake_at: u64,
}

/// Idle/kernel/user tick counters, kept for the same reason the original
/// scheduler keeps them: cheap, and useful for `load_avg` sanity checks
/// and diagnostics.
#[derive(Default)]
pub struct Stats {
    pub idle_ticks: AtomicU64,
    pub kernel_ticks: AtomicU64,
    pub user_ticks: AtomicU64,
}

/// The scheduler: owns every thread the kernel knows about, the queue of
/// threads ready to run, and the single currently-running thread.
///
/// Single-CPU only: there is exactly one `current`
/// thread and no cross-core synchronisation.
pub struct Scheduler {
    threads: Mutex<BTreeMap<ThreadId, Arc<Thread>>>,
    ready: Mutex<VecDeque<ThreadId>>,
    sleeping: Mutex<VecDeque<Sleeper>>,
    current: Mutex<Option<ThreadId>>,
    idle: Mutex<Option<ThreadId>>,
    next_id: AtomicU64,
    ticks: AtomicU64,
    mlfqs: AtomicBool,
    load_avg: Mutex<Fixed>,
    need_resched: AtomicBool,
    pub stats: Stats,
}

impl Scheduler {
    /// Creates a scheduler with no threads yet.
    pub const fn new() -> Scheduler {
        Scheduler {
            threads: Mutex::new(BTreeMap::new()),
            ready: Mutex::new(VecDeque::new()),
            sleeping: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            idle: Mutex::new(None),
            next_id: AtomicU64::new(1),
            ticks: AtomicU64::new(0),
            mlfqs: AtomicBool::new(false),
            load_avg: Mutex::new(Fixed::ZERO),
            need_resched: AtomicBool::new(false),
            stats: Stats {
                idle_ticks: AtomicU64::new(0),
                kernel_ticks: AtomicU64::new(0),
                user_ticks: AtomicU64::new(0),
            },
        }
    }

    /// Creates the idle thread and enables (or disables) MLFQ mode.
    /// Mirrors the original kernel's `-o mlfqs` boot argument.
    pub fn init(&self, mlfqs: bool) -> Arc<Thread> {
        self.mlfqs.store(mlfqs, Ordering::SeqCst);
        let idle = self.spawn_internal(String::from("idle"), PRI_MIN, false);
        *self.idle.lock() = Some(idle.id());
        *self.current.lock() = Some(idle.id());
        idle.set_state(ThreadState::Running);
        idle
    }

    /// Returns whether MLFQ scheduling is active.
    pub fn is_mlfqs(&self) -> bool {
        self.mlfqs.load(Ordering::SeqCst)
    }

    /// Returns the current `load_avg`, the exponential moving average of
    /// the number of ready-or-running threads.
    pub fn load_avg(&self) -> Fixed {
        *self.load_avg.lock()
    }

    /// Returns the total number of timer ticks seen since boot.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn spawn_internal(&self, name: String, priority: i32, inherit_mlfqs: bool) -> Arc<Thread> {
        let id = ThreadId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let thread = Arc::new(Thread::new(id, name, priority));

        if inherit_mlfqs && self.is_mlfqs() {
            if let Some(parent) = self.current() {
                thread.set_nice(parent.nice());
                thread.set_recent_cpu(parent.recent_cpu());
                self.recompute_mlfq_priority(&thread);
            }
        }

        self.threads.lock().insert(id, thread.clone());
        thread
    }

    /// Creates a new thread and makes it ready to run.
    ///
    /// In MLFQ mode the child inherits its parent's `nice` and
    /// `recent_cpu`, and its priority is derived from those before it is
    /// first enqueued, matching the donation-free MLFQ model.
    pub fn spawn(&self, name: &str, priority: i32) -> Arc<Thread> {
        let thread = self.spawn_internal(String::from(name), priority, true);
        self.ready.lock().push_back(thread.id());
        self.yield_if_preempted();
        thread
    }

    /// Returns the thread currently running, if the scheduler has started.
    pub fn current(&self) -> Option<Arc<Thread>> {
        let id = (*self.current.lock())?;
        self.threads.lock().get(&id).cloned()
    }

    /// Looks up a thread by id.
    pub fn get(&self, id: ThreadId) -> Option<Arc<Thread>> {
        self.threads.lock().get(&id).cloned()
    }

    /// Picks the ready thread with the highest effective priority,
    /// breaking ties in FIFO order (earliest-enqueued wins), matching
    /// the original scheduler's `list_max` over the ready list.
    fn pick_next(&self) -> Option<ThreadId> {
        let ready = self.ready.lock();
        let threads = self.threads.lock();
        ready
            .iter()
            .max_by_key(|id| threads.get(id).map(|t| t.effective_priority()).unwrap_or(PRI_MIN))
            .copied()
    }

    /// Marks the current thread as blocked and switches to the next
    /// ready thread (or the idle thread, if none is ready).
    pub fn block_current(&self) {
        if let Some(current) = self.current() {
            current.set_state(ThreadState::Blocked);
        }
        self.schedule();
    }

    /// Moves a blocked thread back onto the ready queue.
    pub fn unblock(&self, id: ThreadId) {
        if let Some(thread) = self.get(id) {
            thread.set_state(ThreadState::Ready);
            self.ready.lock().push_back(id);
            self.yield_if_preempted();
        }
    }

    /// Voluntarily gives up the CPU, re-queueing the current thread as
    /// ready and switching to whichever thread is now highest priority
    /// (which may be the same thread again).
    pub fn yield_now(&self) {
        if let Some(current) = self.current() {
            current.set_state(ThreadState::Ready);
            self.ready.lock().push_back(current.id());
        }
        self.schedule();
    }

    /// Terminates the current thread. It is removed from the thread
    /// table once this call returns to the scheduler (there is no
    /// separate destruction queue here: with no other core racing to
    /// dereference it, dropping the `Arc` once unscheduled is enough).
    pub fn exit_current(&self) {
        if let Some(current) = self.current() {
            current.set_state(ThreadState::Dying);
            self.threads.lock().remove(&current.id());
        }
        self.schedule();
    }

    /// Puts the current thread to sleep until `wake_at` ticks have
    /// elapsed, then switches away.
    ///
    /// Inserted in wake-tick order (ascending) rather than appended, so
    /// the sleep queue stays sorted by wake-up tick; `tick()` relies on
    /// this to stop waking threads as soon as it reaches one that isn't
    /// due yet, instead of scanning every sleeper on every tick.
    pub fn sleep_until(&self, wake_at: u64) {
        if let Some(current) = self.current() {
            current.set_state(ThreadState::Blocked);
            let mut sleeping = self.sleeping.lock();
            let index = sleeping.iter().position(|s| s.wake_at > wake_at).unwrap_or(sleeping.len());
            sleeping.insert(index, Sleeper { id: current.id(), wake_at });
        }
        self.schedule();
    }

    /// Sets a thread's own priority, recomputing its effective priority
    /// from any donations still outstanding, and preempts the current
    /// thread if this makes a ready thread outrank it.
    ///
    /// Has no effect in MLFQ mode, where priority is derived rather than
    /// assigned directly.
    pub fn set_priority(&self, id: ThreadId, priority: i32) {
        if self.is_mlfqs() {
            return;
        }
        if let Some(thread) = self.get(id) {
            thread.set_priority(priority.clamp(PRI_MIN, PRI_MAX));
            self.yield_if_preempted();
        }
    }

    /// Sets a thread's niceness and, in MLFQ mode, immediately
    /// recomputes its priority.
    pub fn set_nice(&self, id: ThreadId, nice: i32) {
        if let Some(thread) = self.get(id) {
            thread.set_nice(nice);
            if self.is_mlfqs() {
                self.recompute_mlfq_priority(&thread);
                self.yield_if_preempted();
            }
        }
    }

    /// Called by a lock, once released, or by `unblock`, to check
    /// whether a now-ready thread outranks the thread currently running;
    /// if so, marks a reschedule as needed. The actual switch happens
    /// the next time the caller lets the scheduler run (typically the
    /// next timer tick, or an explicit `yield_now`).
    pub fn yield_if_preempted(&self) {
        let current_priority = self.current().map(|t| t.effective_priority()).unwrap_or(PRI_MIN);
        if let Some(next) = self.pick_next() {
            if let Some(next_thread) = self.get(next) {
                if next_thread.effective_priority() > current_priority {
                    self.need_resched.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    /// No-op hook for a ready thread whose priority just changed via
    /// donation: with an argmax-scan ready queue there is no ordered
    /// position to fix up, but the hook exists so a future ordered-queue
    /// implementation has a single place to do so.
    pub fn reposition_ready(&self, _id: ThreadId) {}

    /// Returns whether a reschedule is pending (a higher-priority thread
    /// became ready since the current thread last yielded voluntarily).
    pub fn needs_reschedule(&self) -> bool {
        self.need_resched.load(Ordering::SeqCst)
    }

    /// Advances the tick counter, wakes sleepers whose deadline has
    /// passed, and (in MLFQ mode) updates `recent_cpu`/`load_avg`/
    /// thread priorities on their prescribed schedules. Returns whether
    /// the timer interrupt handler should trigger a reschedule.
    pub fn tick(&self) -> bool {
        let ticks = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;

        let mut sleeping = self.sleeping.lock();
        let mut woken = VecDeque::new();
        while let Some(s) = sleeping.front() {
            if s.wake_at > ticks {
                break;
            }
            woken.push_back(sleeping.pop_front().unwrap().id);
        }
        drop(sleeping);
        for id in woken {
            self.unblock(id);
        }

        if self.is_mlfqs() {
            if let Some(current) = self.current() {
                let idle = *self.idle.lock();
                if idle != Some(current.id()) {
                    current.increment_recent_cpu();
                }
            }
            if ticks % TIMER_FREQ == 0 {
                self.recompute_load_avg();
                let threads: Vec<Arc<Thread>> = self.threads.lock().values().cloned().collect();
                for thread in &threads {
                    self.recompute_recent_cpu(thread);
                }
            }
            if ticks % 4 == 0 {
                let threads: Vec<Arc<Thread>> = self.threads.lock().values().cloned().collect();
                for thread in &threads {
                    self.recompute_mlfq_priority(thread);
                }
                self.yield_if_preempted();
            }
        }

        if let Some(current) = self.current() {
            let used = current.ticks_this_quantum.fetch_add(1, Ordering::SeqCst) + 1;
            if used >= TIME_SLICE {
                self.need_resched.store(true, Ordering::SeqCst);
            }
        }

        self.needs_reschedule()
    }

    fn recompute_load_avg(&self) {
        let running_is_idle = match (self.current(), *self.idle.lock()) {
            (Some(current), Some(idle)) => current.id() == idle,
            _ => false,
        };
        let ready_threads = self.ready.lock().len() as i32 + if running_is_idle { 0 } else { 1 };
        let fifty_nine_sixtieths = Fixed::from_int(59).div_int(60);
        let one_sixtieth = Fixed::from_int(1).div_int(60);
        let mut load_avg = self.load_avg.lock();
        *load_avg = fifty_nine_sixtieths.mul(*load_avg) + one_sixtieth.mul(Fixed::from_int(ready_threads));
    }

    fn recompute_recent_cpu(&self, thread: &Arc<Thread>) {
        let load_avg = self.load_avg();
        let two = Fixed::from_int(2);
        let coefficient = (two * load_avg).div(two * load_avg + 1);
        let recomputed = coefficient.mul(thread.recent_cpu()) + thread.nice();
        thread.set_recent_cpu(recomputed);
    }

    fn recompute_mlfq_priority(&self, thread: &Arc<Thread>) {
        let penalty = thread.recent_cpu().to_int_trunc() / 4;
        let niceness_penalty = thread.nice() * 2;
        let priority = (PRI_MAX - penalty - niceness_penalty).clamp(PRI_MIN, PRI_MAX);
        thread.set_priority(priority);
    }

    /// Switches away from the current thread to whichever ready thread
    /// is now highest priority, or the idle thread if none is ready.
    ///
    /// This performs the scheduler-side bookkeeping; the actual register
    /// and stack-pointer swap is [`crate::context::switch_stack`], called by
    /// the kernel once it has stashed the outgoing thread's saved stack
    /// pointer.
    pub fn schedule(&self) {
        self.need_resched.store(false, Ordering::SeqCst);
        let next = self.pick_next().or_else(|| *self.idle.lock());
        if let Some(next) = next {
            if let Some(thread) = self.get(next) {
                thread.check_stack_canary();
                self.ready.lock().retain(|id| *id != next);
                thread.set_state(ThreadState::Running);
                thread.ticks_this_quantum.store(0, Ordering::SeqCst);
            }
            *self.current.lock() = Some(next);
        }
    }
}

impl Default for Scheduler {
    fn default() -> Scheduler {
        Scheduler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn higher_priority_thread_runs_first() {
        let sched = Scheduler::new();
        sched.init(false);
        let low = sched.spawn("low", 10);
        let high = sched.spawn("high", 20);
        sched.schedule();
        assert_eq!(sched.current().unwrap().id(), high.id());
        let _ = low;
    }

    #[test]
    fn mlfq_priority_falls_with_recent_cpu() {
        let sched = Scheduler::new();
        sched.init(true);
        let t = sched.spawn("t", PRI_DEFAULT);
        t.set_recent_cpu(Fixed::from_int(100));
        sched.recompute_mlfq_priority(&t);
        assert!(t.effective_priority() < PRI_DEFAULT);
    }

    /// The MLFQ load-average scenario from the spec's testable-properties
    /// section: three always-ready threads push `load_avg` up from zero
    /// over 60 seconds of ticks, converging toward `ready_count = 3`.
    ///
    /// The exact figure is the q17.14 recurrence's fixed point reached
    /// after 60 one-second recomputes, not a loose tolerance band: with
    /// `load_avg` starting at zero and `ready_threads` pinned at 3 the
    /// whole run (nothing here ever calls `schedule()`, so `current`
    /// stays the idle thread throughout, and the idle thread never
    /// contributes to `ready_threads`), the sequence is deterministic.
    #[test]
    fn mlfq_load_average_rises_toward_ready_thread_count() {
        let sched = Scheduler::new();
        sched.init(true);
        sched.spawn("a", PRI_DEFAULT);
        sched.spawn("b", PRI_DEFAULT);
        sched.spawn("c", PRI_DEFAULT);

        for _ in 0..60 * TIMER_FREQ {
            sched.tick();
        }

        let scaled = (sched.load_avg() * Fixed::from_int(100)).to_int_round();
        assert_eq!(scaled, 190);
        assert!(sched.load_avg() < Fixed::from_int(3));
    }

    #[test]
    fn set_priority_is_idempotent() {
        let sched = Scheduler::new();
        sched.init(false);
        let t = sched.spawn("t", 10);
        sched.set_priority(t.id(), 25);
        let once = t.effective_priority();
        sched.set_priority(t.id(), 25);
        assert_eq!(t.effective_priority(), once);
    }
}
