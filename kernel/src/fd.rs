// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The per-process file-descriptor table.
//!
//! Grounded in the original kernel's `fd_util.c`: a resizable array of
//! open-file handles, doubling when it overflows, with entries 0 and 1
//! reserved for stdin/stdout and the lowest free index handed out on
//! allocation. Because this crate has no concrete file type of its own
//! (the file system is out of scope), the table is generic over whatever
//! handle type the syscall layer actually uses.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::KernelError;

const DEFAULT_SIZE: usize = 64;

/// A file descriptor: an index into a [`Table`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct Fd(pub usize);

/// Standard input's reserved descriptor.
pub const STDIN: Fd = Fd(0);
/// Standard output's reserved descriptor.
pub const STDOUT: Fd = Fd(1);

enum Slot<F> {
    Empty,
    Stdio,
    Open(Arc<F>),
}

// `Arc<F>::clone` never needs `F: Clone`, but `#[derive(Clone)]` would
// add that bound anyway; a handwritten impl keeps `Table<F>::fork`
// working for handle types (like a boxed trait object) that aren't
// themselves `Clone`.
impl<F> Clone for Slot<F> {
    fn clone(&self) -> Slot<F> {
        match self {
            Slot::Empty => Slot::Empty,
            Slot::Stdio => Slot::Stdio,
            Slot::Open(file) => Slot::Open(file.clone()),
        }
    }
}

/// A process's table of open file handles.
///
/// `dup2`-aliased descriptors share the same `Arc<F>`; closing one alias
/// just drops that slot's reference, leaving the others (and the
/// underlying handle, while any alias remains) intact.
pub struct Table<F> {
    slots: Vec<Slot<F>>,
    next_fd: usize,
}

impl<F> Table<F> {
    /// Creates a table with the two standard-stream sentinels already
    /// installed at fds 0 and 1.
    pub fn new() -> Table<F> {
        let mut slots = vec![Slot::Empty; 0];
        slots.resize_with(DEFAULT_SIZE, || Slot::Empty);
        slots[STDIN.0] = Slot::Stdio;
        slots[STDOUT.0] = Slot::Stdio;
        Table { slots, next_fd: 2 }
    }

    /// Installs `file` at the lowest free descriptor, growing the table
    /// if necessary, and returns that descriptor.
    pub fn allocate(&mut self, file: Arc<F>) -> Fd {
        let fd = self.next_fd;
        self.ensure_capacity(fd);
        self.slots[fd] = Slot::Open(file);
        self.next_fd = self.find_next_free(fd);
        Fd(fd)
    }

    /// Returns the handle at `fd`, if it's open and non-sentinel.
    pub fn get(&self, fd: Fd) -> Option<Arc<F>> {
        match self.slots.get(fd.0)? {
            Slot::Open(file) => Some(file.clone()),
            Slot::Empty | Slot::Stdio => None,
        }
    }

    /// Closes `fd`: sentinels are left untouched (they are never really
    /// closed, only aliased), a non-sentinel slot is emptied and its
    /// reference dropped.
    pub fn close(&mut self, fd: Fd) {
        if let Some(slot) = self.slots.get_mut(fd.0) {
            if matches!(slot, Slot::Open(_)) {
                *slot = Slot::Empty;
                if fd.0 < self.next_fd {
                    self.next_fd = fd.0;
                }
            }
        }
    }

    /// Closes `newfd`, then aliases it to whatever `oldfd` currently
    /// refers to (sentinel or open handle alike), growing the table if
    /// `newfd` is beyond its current capacity.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::NotFound`] if `oldfd` isn't open.
    pub fn dup2(&mut self, oldfd: Fd, newfd: Fd) -> Result<Fd, KernelError> {
        if oldfd == newfd {
            return Ok(newfd);
        }
        let source = self.slots.get(oldfd.0).cloned().ok_or(KernelError::NotFound)?;
        if matches!(source, Slot::Empty) {
            return Err(KernelError::NotFound);
        }

        self.close(newfd);
        self.ensure_capacity(newfd.0);
        self.slots[newfd.0] = source;
        if newfd.0 == self.next_fd {
            self.next_fd = self.find_next_free(newfd.0);
        }
        Ok(newfd)
    }

    /// Builds a copy of this table for a forked child: sentinels are
    /// shared (there is only ever one stdin/stdout), every other open
    /// handle is cloned (an `Arc` bump, mirroring the original's
    /// `file_dup2`/`file_duplicate` distinction between aliases of the
    /// same underlying file and genuinely separate opens — since this
    /// table already stores handles behind `Arc`, both cases reduce to
    /// cloning the `Arc`, which preserves aliasing exactly as the parent
    /// had it).
    pub fn fork(&self) -> Table<F> {
        Table {
            slots: self.slots.clone(),
            next_fd: self.next_fd,
        }
    }

    fn ensure_capacity(&mut self, fd: usize) {
        while self.slots.len() <= fd {
            let new_size = (self.slots.len() * 2).max(DEFAULT_SIZE);
            self.slots.resize_with(new_size, || Slot::Empty);
        }
    }

    fn find_next_free(&mut self, start: usize) -> usize {
        loop {
            if let Some(i) = self.slots[start..].iter().position(|s| matches!(s, Slot::Empty)) {
                return start + i;
            }
            self.ensure_capacity(self.slots.len());
        }
    }
}

impl<F> Default for Table<F> {
    fn default() -> Table<F> {
        Table::new()
    }
}
