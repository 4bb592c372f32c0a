// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The page-fault and "kill this process" paths.
//!
//! Grounded in the original kernel's `exception.c`: a page fault reads
//! `CR2` for the faulting address and the error code's `P`/`W`/`U` bits,
//! then either resolves it (lazy load, stack growth, swap-in) or kills
//! the faulting process with exit status −1. Registering this as the
//! actual `#PF` IDT handler is out of this crate's scope (GDT/IDT setup
//! is a collaborator, per the kernel's design); this module is the part
//! of the story that *is* in scope — what happens once the vector and
//! error code have been decoded.

use vm::{handle_page_fault, HardwareMap, VmError, VmSystem};
use x86_64::VirtAddr;

use crate::error::{KernelError, FATAL_EXIT_STATUS};
use crate::process::Process;

/// Resolves a page fault for `process`, or reports the exit status the
/// kernel should terminate it with.
///
/// `user` and `write` are the error code's `U` and `W` bits; `rsp` is
/// the user stack pointer saved in the trap frame. On success the
/// faulting instruction can simply be retried.
pub fn handle_fault(
    process: &mut Process,
    vm: &mut VmSystem,
    hw: &mut dyn HardwareMap,
    fault_addr: VirtAddr,
    rsp: VirtAddr,
    user: bool,
    write: bool,
) -> Result<(), i32> {
    handle_page_fault(&mut process.spt, vm, hw, fault_addr, rsp, user, write).map_err(|e| exit_status_for(e))
}

/// Maps a [`VmError`] surfacing out of the fault handler to the process
/// exit status the syscall/exception layer reports it with. Every fault
/// this kernel cannot resolve kills the process the same way; the
/// conversion exists so callers elsewhere in the kernel that already
/// think in [`KernelError`] terms can reuse it.
pub fn exit_status_for(e: VmError) -> i32 {
    let _: KernelError = e.into();
    FATAL_EXIT_STATUS
}
