// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The hardware context switch.
//!
//! [`Scheduler::schedule`](crate::scheduler::Scheduler::schedule) decides
//! *which* thread runs next; this module performs the actual switch: save
//! the outgoing thread's callee-saved registers onto its own stack, swap
//! stack pointers, and restore the incoming thread's. A thread that has
//! never run before is instead entered through [`start_thread`], which
//! unwinds into its entry point rather than returning into a previous
//! `switch_stack` call.

use core::arch::global_asm;

extern "sysv64" {
    /// Switches from the stack at `current_stack_pointer` to the stack at
    /// `new_stack_pointer`, saving the caller's callee-saved registers
    /// onto the current stack first and restoring the callee's from the
    /// new one. Returns (on the *new* stack, once it's switched back to
    /// again) as an ordinary function return.
    ///
    /// # Safety
    ///
    /// Both pointers must reference stacks prepared by this module: a
    /// stack either mid-`switch_stack`, or freshly set up by
    /// [`prepare_kernel_stack`].
    pub fn switch_stack(current_stack_pointer: *mut u64, new_stack_pointer: *const u64);

    /// Entered by a thread the first time it runs: pops the entry point
    /// and argument pushed by [`prepare_kernel_stack`] and calls it. Never
    /// returns; if the entry point returns, the thread must instead call
    /// [`crate::scheduler::Scheduler::exit_current`].
    pub fn start_thread() -> !;
}

global_asm!(
    r#"
.global switch_stack
switch_stack:
    push rbp
    push rbx
    push r12
    push r13
    push r14
    push r15
    mov [rdi], rsp
    mov rsp, rsi
    pop r15
    pop r14
    pop r13
    pop r12
    pop rbx
    pop rbp
    ret

.global start_thread
start_thread:
    pop rdi
    call rdi
    ud2
"#
);

/// Lays out a brand-new kernel stack so that the first `switch_stack`
/// into it lands in [`start_thread`], which then calls `entry` with no
/// arguments.
///
/// `stack_top` must be the highest address of a stack allocation at
/// least large enough for the pushes below (a handful of machine words).
///
/// # Safety
///
/// `stack_top` must be 16-byte aligned and point one-past-the-end of a
/// writable stack allocation that outlives the thread.
pub unsafe fn prepare_kernel_stack(stack_top: *mut u64, entry: extern "C" fn() -> !) -> *mut u64 {
    let mut sp = stack_top;

    sp = sp.offset(-1);
    *sp = entry as usize as u64; // Popped by `start_thread`.

    // `switch_stack` expects to restore rbp, rbx, r12-r15 in that push
    // order; zero-initialise them for a thread that has never run.
    for _ in 0..6 {
        sp = sp.offset(-1);
        *sp = 0;
    }

    sp
}
