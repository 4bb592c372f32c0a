// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! A user process: the state that exists once per address space rather
//! than once per thread (a process may in principle own more than one
//! thread, though the test programs this kernel runs are all
//! single-threaded).
//!
//! This ties together the collaborators `vm` and `thread` each treat as
//! someone else's problem: the supplemental page table, the open-file
//! table, and the thread(s) running in this address space.

use alloc::boxed::Box;
use alloc::sync::Arc;
use spin::Mutex;
use thread::ThreadId;
use vm::{BackingFile, HardwareMap, Spt, VmSystem};

use crate::error::KernelError;
use crate::fd::Table;

/// A user process: one supplemental page table, one file-descriptor
/// table, and the thread (or threads) executing in this address space.
pub struct Process {
    pub main_thread: ThreadId,
    pub spt: Spt,
    pub fds: Table<Mutex<Box<dyn BackingFile>>>,
}

impl Process {
    /// Creates a process with empty memory and a fresh fd table, about
    /// to run as `main_thread`.
    pub fn new(main_thread: ThreadId) -> Process {
        Process {
            main_thread,
            spt: Spt::new(),
            fds: Table::new(),
        }
    }

    /// Builds a fork child: the child's resident pages are eagerly
    /// copied into freshly claimed frames, non-resident pages are
    /// re-registered lazily, and the fd table's aliases are preserved
    /// (see [`Spt::fork_from`] and [`Table::fork`]).
    pub fn fork(&self, new_thread: ThreadId, vm: &mut VmSystem, hw: &mut dyn HardwareMap) -> Result<Process, KernelError> {
        Ok(Process {
            main_thread: new_thread,
            spt: self.spt.fork_from(vm, hw)?,
            fds: self.fds.fork(),
        })
    }

    /// Tears down this process's address space: every page is
    /// destroyed (dirty file-backed pages written back), and every
    /// frame it held is returned to the pool.
    pub fn exit(&mut self, vm: &mut VmSystem, hw: &mut dyn HardwareMap) {
        self.spt.destroy(vm, hw);
    }
}

/// Wraps [`Arc<Mutex<Process>>`] so callers that need a handle to a
/// process (rather than exclusive access to its fields) have a single
/// type to pass around — the same shape `thread::Thread` uses for its
/// own descriptor.
pub type ProcessHandle = Arc<Mutex<Process>>;
