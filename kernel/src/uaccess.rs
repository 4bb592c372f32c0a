// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Validated access to user memory.
//!
//! Grounded in the original kernel's `validate.c`: rather than walking
//! the page tables to check every user pointer a syscall receives
//! before touching it, the original installs a one-byte load/store
//! whose instruction address the page-fault handler recognises, so a
//! bad pointer faults into a controlled "return -1" path instead of
//! crashing the kernel. That trick lives on the other side of this
//! crate's boundary (the fault handler is wired up by the out-of-scope
//! IDT setup); what this module owns is the *contract*: a safe-looking
//! API that turns a stray user pointer into [`KernelError::InvalidAccess`]
//! instead of undefined behaviour, expressed as a trait so it can be
//! exercised without real hardware traps.

use alloc::string::String;
use alloc::vec::Vec;
use memlayout::USERSPACE;
use x86_64::VirtAddr;

use crate::error::KernelError;

/// Validated reads and writes into a user process's address space.
pub trait UserMemory {
    /// Copies `len` bytes starting at `src` out of user memory.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::InvalidAccess`] if any byte of the range
    /// falls outside [`memlayout::USERSPACE`] or is unmapped.
    fn copy_from_user(&self, src: VirtAddr, len: usize) -> Result<Vec<u8>, KernelError>;

    /// Copies `data` into user memory starting at `dst`.
    fn copy_to_user(&mut self, dst: VirtAddr, data: &[u8]) -> Result<(), KernelError>;

    /// Copies a NUL-terminated string out of user memory, up to
    /// `max_len` bytes (not including the terminator).
    fn copy_user_string(&self, src: VirtAddr, max_len: usize) -> Result<String, KernelError> {
        let mut out = Vec::new();
        let mut addr = src;
        while out.len() < max_len {
            let byte = self.copy_from_user(addr, 1)?;
            if byte[0] == 0 {
                return String::from_utf8(out).map_err(|_| KernelError::InvalidAccess);
            }
            out.push(byte[0]);
            addr = addr + 1u64;
        }
        Err(KernelError::InvalidAccess)
    }
}

/// Returns whether the inclusive-exclusive byte range `[addr, addr+len)`
/// lies entirely within the user half of the address space. Every
/// [`UserMemory`] implementation should reject a range this rejects
/// before attempting the underlying access.
pub fn range_in_userspace(addr: VirtAddr, len: usize) -> bool {
    if len == 0 {
        return USERSPACE.contains_addr(addr);
    }
    match addr.as_u64().checked_add(len as u64 - 1) {
        Some(last) => USERSPACE.contains_addr(addr) && USERSPACE.contains_addr(VirtAddr::new(last)),
        None => false,
    }
}
