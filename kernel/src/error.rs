// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The kernel-wide error type.
//!
//! `vm` and `thread` each define the narrower error sets their own
//! operations can fail with ([`vm::VmError`]); [`KernelError`] is the
//! superset a caller two layers up — a syscall handler, say — actually
//! needs to report to a user process, with `From` conversions from the
//! lower layers so `?` still works across the boundary.

use core::fmt;

/// Something that went wrong somewhere in the kernel, in terms a
/// syscall handler can translate into a process exit status.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KernelError {
    /// The frame pool and swap were both exhausted, or a small-object
    /// allocation failed.
    OutOfMemory,
    /// A user pointer fell outside the user range, targeted a read-only
    /// page with a write, or had no mapping and wasn't a stack-growth
    /// request.
    InvalidAccess,
    /// A disk read or write returned fewer bytes than requested.
    IoFailure,
    /// A file could not be opened or created.
    FileSystemFailure,
    /// An SPT insertion collided with an existing page at the same
    /// address.
    AlreadyPresent,
    /// An SPT lookup, or a file-descriptor lookup, found nothing.
    NotFound,
    /// An anonymous page needed to be swapped out but no swap slot was
    /// free.
    OutOfSwap,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::OutOfMemory => "out of memory",
            KernelError::InvalidAccess => "invalid memory access",
            KernelError::IoFailure => "I/O failure",
            KernelError::FileSystemFailure => "file system failure",
            KernelError::AlreadyPresent => "already present",
            KernelError::NotFound => "not found",
            KernelError::OutOfSwap => "out of swap space",
        };
        f.write_str(msg)
    }
}

impl From<vm::VmError> for KernelError {
    fn from(e: vm::VmError) -> KernelError {
        match e {
            vm::VmError::OutOfMemory => KernelError::OutOfMemory,
            vm::VmError::OutOfSwap => KernelError::OutOfSwap,
            vm::VmError::InvalidAccess => KernelError::InvalidAccess,
            vm::VmError::AlreadyMapped => KernelError::AlreadyPresent,
            vm::VmError::NotMapped => KernelError::NotFound,
            vm::VmError::ShortTransfer => KernelError::IoFailure,
        }
    }
}

/// The exit status a user process receives when the kernel terminates
/// it involuntarily (an unhandled fault or a propagated [`KernelError`]).
pub const FATAL_EXIT_STATUS: i32 = -1;
