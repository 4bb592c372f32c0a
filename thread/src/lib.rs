// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The preemptive thread scheduler.
//!
//! Every thread has a base priority and, when it is the target of a
//! priority donation, a (possibly higher) effective priority. The
//! scheduler always runs the ready thread with the highest effective
//! priority; [`sync::Lock`] implements the donation chain that keeps a
//! high-priority thread from starving behind a low-priority lock holder.
//!
//! When multi-level feedback queue scheduling is enabled (see
//! [`scheduler::Scheduler::init`]), priorities are instead derived from
//! each thread's recent CPU usage and niceness, recomputed on a fixed
//! schedule, and donation is disabled for the duration.

#![no_std]

extern crate alloc;

pub mod context;
pub mod scheduler;
pub mod sync;
pub mod thread;

pub use fixed_point::Fixed;
pub use scheduler::Scheduler;
pub use thread::{Thread, ThreadId, ThreadState};

/// The lowest priority a thread may have.
pub const PRI_MIN: i32 = 0;
/// The highest priority a thread may have.
pub const PRI_MAX: i32 = 63;
/// The priority assigned to a thread unless told otherwise.
pub const PRI_DEFAULT: i32 = 31;
/// The number of timer ticks a thread runs before the scheduler
/// preempts it in favour of another ready thread of the same priority.
pub const TIME_SLICE: u64 = 4;
/// The number of timer ticks in one second, used to pace the MLFQ
/// `load_avg`/`recent_cpu` recomputation.
pub const TIMER_FREQ: u64 = 100;
