// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! A lock that donates its waiters' priorities to its holder.
//!
//! This is the mechanism behind priority donation: if a high-priority
//! thread blocks on a lock held by a lower-priority thread, the holder
//! would otherwise never get scheduled ahead of medium-priority threads
//! to finish its critical section and release the lock — classic
//! priority inversion. [`Lock::acquire`] instead raises the holder's
//! effective priority to match, and does so transitively if the holder
//! is itself blocked on another lock.

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::scheduler::Scheduler;
use crate::thread::{Thread, ThreadState};

/// A mutually-exclusive lock whose acquisition donates priority.
pub struct Lock {
    holder: Mutex<Option<Arc<Thread>>>,
    waiters: Mutex<Vec<Arc<Thread>>>,
}

impl Lock {
    /// Creates a new, unheld lock.
    pub fn new() -> Arc<Lock> {
        Arc::new(Lock {
            holder: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
        })
    }

    /// Returns the thread currently holding the lock, if any.
    pub fn holder(&self) -> Option<Arc<Thread>> {
        self.holder.lock().clone()
    }

    pub(crate) fn max_waiter_priority(&self) -> Option<i32> {
        self.waiters.lock().iter().map(|t| t.effective_priority()).max()
    }

    /// Blocks the calling thread until the lock is free, then takes it.
    ///
    /// `thread` must be the thread currently selected to run by
    /// `scheduler`; this is the scheduler's single-CPU assumption at
    /// work — there is never a second thread concurrently calling
    /// `acquire`.
    pub fn acquire(self: &Arc<Self>, thread: &Arc<Thread>, scheduler: &Scheduler) {
        loop {
            let mut holder = self.holder.lock();
            match holder.clone() {
                None => {
                    *holder = Some(thread.clone());
                    drop(holder);
                    thread.locks_held.lock().push(self.clone());
                    return;
                }
                Some(h) if Arc::ptr_eq(&h, thread) => {
                    panic!("thread {:?} tried to re-acquire a lock it already holds", thread.id());
                }
                Some(_) => {
                    drop(holder);
                    *thread.wait_on_lock.lock() = Some(self.clone());
                    self.waiters.lock().push(thread.clone());
                    donate_priority_chain(thread, scheduler);
                    thread.set_state(ThreadState::Blocked);
                    scheduler.block_current();
                    // Woken by `release`; loop around to actually take
                    // the lock (which `release` left free for us, but
                    // another thread could in principle race us to it
                    // were this multi-core).
                }
            }
        }
    }

    /// Releases the lock, waking the highest-priority waiter if any, and
    /// restoring the releasing thread's priority to whatever it's
    /// otherwise entitled to.
    pub fn release(self: &Arc<Self>, thread: &Arc<Thread>, scheduler: &Scheduler) {
        thread.locks_held.lock().retain(|l| !Arc::ptr_eq(l, self));
        thread.set_priority(thread.base_priority());
        *self.holder.lock() = None;

        let mut waiters = self.waiters.lock();
        let next = waiters
            .iter()
            .enumerate()
            .max_by_key(|(_, t)| t.effective_priority())
            .map(|(i, _)| i);
        let woken = next.map(|i| waiters.remove(i));
        drop(waiters);

        if let Some(woken) = woken {
            *woken.wait_on_lock.lock() = None;
            scheduler.unblock(woken.id());
        }
        scheduler.yield_if_preempted();
    }
}

/// Walks the chain of locks a thread is blocked on, raising each holder's
/// effective priority to match, as long as doing so actually raises it.
fn donate_priority_chain(thread: &Arc<Thread>, scheduler: &Scheduler) {
    let mut current = thread.clone();
    loop {
        let lock = match current.wait_on_lock.lock().clone() {
            Some(lock) => lock,
            None => return,
        };
        let holder = match lock.holder() {
            Some(holder) => holder,
            None => return,
        };
        if current.effective_priority() <= holder.effective_priority() {
            return;
        }
        holder.set_effective_priority(current.effective_priority());
        scheduler.reposition_ready(holder.id());
        current = holder;
    }
}
