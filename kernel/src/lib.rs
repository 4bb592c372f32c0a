// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Wires the scheduler and virtual memory manager into a bootable
//! kernel.
//!
//! `thread` and `vm` are hardware-agnostic on their own; this crate
//! supplies the missing pieces — a real page-table adapter, a kernel
//! heap, per-process file descriptors and user-memory validation — and
//! owns the fixed order a machine actually has to bring them up in.
//! GDT/IDT/PIC setup and the file system itself are out of scope (per
//! design): `exception::handle_fault` is the shape the real `#PF`
//! handler calls into once that wiring exists elsewhere.

#![no_std]
#![cfg_attr(test, no_main)]
#![feature(custom_test_frameworks)]
#![feature(alloc_error_handler)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::panic::PanicInfo;
use spin::Mutex;
use thread::{Scheduler, ThreadId};
use vm::{SwapDisk, VmSystem};
use x86_64::instructions::port::Port;

pub mod allocator;
pub mod error;
pub mod exception;
pub mod fd;
pub mod hw;
pub mod process;
pub mod uaccess;

pub use error::KernelError;
pub use process::{Process, ProcessHandle};

/// Everything the kernel keeps exactly one of: the scheduler, the frame
/// and swap managers, and the table of live processes keyed by their
/// main thread.
///
/// Bringing this up is [`Kernel::init`]'s job, in the fixed order the
/// subsystems actually depend on each other: the frame pool and swap
/// table are plain `alloc`-backed structures, so the kernel heap must
/// already exist, and the scheduler's idle thread must exist before
/// anything can legally call [`Scheduler::block_current`] or
/// [`Scheduler::yield_now`].
pub struct Kernel {
    pub scheduler: Scheduler,
    pub vm: Mutex<VmSystem>,
    pub processes: Mutex<BTreeMap<ThreadId, ProcessHandle>>,
}

impl Kernel {
    /// Brings up the scheduler and virtual memory manager against
    /// `frame_count` physical frames and `swap_slots` page-sized swap
    /// slots backed by `disk`. The caller has already initialised the
    /// kernel heap (see [`allocator::init`]) and the page-table adapter
    /// (see [`hw::PageTableMap`]) by this point — both are needed before
    /// any of `thread` or `vm`'s `alloc`-backed structures can exist.
    ///
    /// Mirrors the boot order: tid allocator and run queues come up
    /// first (the idle thread has to exist before anything blocks or
    /// yields), then the frame table, then swap, then (elsewhere, once
    /// a file system driver is wired in) the root directory.
    pub fn init(mlfqs: bool, frame_count: usize, swap_slots: usize, disk: Arc<Mutex<dyn SwapDisk>>) -> Kernel {
        let scheduler = Scheduler::new();
        scheduler.init(mlfqs);
        let vm = VmSystem::new(frame_count, swap_slots, disk);
        Kernel {
            scheduler,
            vm: Mutex::new(vm),
            processes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers `process`, running as `thread`, under the kernel's
    /// process table.
    pub fn insert_process(&self, thread: ThreadId, process: Process) -> ProcessHandle {
        let handle = Arc::new(Mutex::new(process));
        self.processes.lock().insert(thread, handle.clone());
        handle
    }

    /// Looks up the process running as `thread`, if it's still alive.
    pub fn process_of(&self, thread: ThreadId) -> Option<ProcessHandle> {
        self.processes.lock().get(&thread).cloned()
    }

    /// Removes and returns the process running as `thread`, if any. The
    /// caller is responsible for calling [`Process::exit`] on it (this
    /// function only unregisters it; it does not hold the
    /// [`vm::HardwareMap`] the caller must tear it down against).
    pub fn remove_process(&self, thread: ThreadId) -> Option<ProcessHandle> {
        self.processes.lock().remove(&thread)
    }
}

/// Halts the CPU in a loop of the `hlt` instruction, used once there is
/// nothing left for this core to schedule.
pub fn halt_loop() -> ! {
    loop {
        x86_64::instructions::hlt();
    }
}

/// A test function, wrapped so the runner can print its name before and
/// its result after running it.
pub trait Testable {
    fn run(&self);
}

impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        serial::print!("{}...\t", core::any::type_name::<T>());
        self();
        serial::println!("[ok]");
    }
}

/// The entry point `#[test_case]` functions are collected into.
pub fn test_runner(tests: &[&dyn Testable]) {
    serial::println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

/// The panic handler installed while running the custom test harness:
/// reports the panic over the serial port and exits QEMU with a
/// distinct failure code, rather than looping forever.
pub fn test_panic_handler(info: &PanicInfo) -> ! {
    serial::println!("[failed]\n");
    serial::println!("Error: {}\n", info);
    exit_qemu(QemuExitCode::Failed);
    halt_loop()
}

/// The two exit codes QEMU's `isa-debug-exit` device understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

/// Tells QEMU to exit with `exit_code` via the `isa-debug-exit` I/O
/// port, as configured in this crate's `Cargo.toml`.
pub fn exit_qemu(exit_code: QemuExitCode) {
    unsafe {
        let mut port = Port::new(0xf4);
        port.write(exit_code as u32);
    }
}

#[cfg(test)]
use bootloader::{entry_point, BootInfo};

#[cfg(test)]
entry_point!(test_kernel_main);

#[cfg(test)]
fn test_kernel_main(_boot_info: &'static BootInfo) -> ! {
    test_main();
    halt_loop();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    test_panic_handler(info)
}
