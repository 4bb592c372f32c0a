// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Exercises `kernel::process::Process` together with `vm`'s page fault
//! handler and `kernel::fd::Table` — the scenarios that need more than
//! one crate at once (a lazily loaded page brought in through a
//! process's own supplemental page table, then carried across a fork).
//! Donation and MLFQ are covered entirely inside `thread`'s own test
//! module, and swap/mmap entirely inside `vm`'s, so they aren't repeated
//! here.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use spin::Mutex;
use vm::{BackingFile, HardwareMap, SwapDisk, VmError, VmSystem};
use x86_64::VirtAddr;

use kernel::fd::Table;
use kernel::hw::{BootInfoFrameAllocator, PageTableMap};
use kernel::process::Process;
use kernel::{allocator, halt_loop};

entry_point!(main);

fn main(boot_info: &'static BootInfo) -> ! {
    let physical_memory_offset = VirtAddr::new(boot_info.physical_memory_offset);
    let frame_allocator = unsafe { BootInfoFrameAllocator::init(&boot_info.memory_map) };
    let mut hw = unsafe { PageTableMap::new(physical_memory_offset, frame_allocator, x86_64::PhysAddr::new(0)) };
    let (mapper, frame_allocator) = hw.mapper_and_allocator_mut();
    allocator::init(mapper, frame_allocator).expect("heap initialisation failed");

    test_main();
    halt_loop();
}

/// An in-memory stand-in for the disk this kernel has no driver for.
struct MemDisk {
    sectors: BTreeMap<u64, [u8; vm::DISK_SECTOR_SIZE]>,
}

impl MemDisk {
    fn new() -> MemDisk {
        MemDisk { sectors: BTreeMap::new() }
    }
}

impl SwapDisk for MemDisk {
    fn read_sector(&mut self, sector: u64, buf: &mut [u8; vm::DISK_SECTOR_SIZE]) {
        *buf = self.sectors.get(&sector).copied().unwrap_or([0; vm::DISK_SECTOR_SIZE]);
    }
    fn write_sector(&mut self, sector: u64, buf: &[u8; vm::DISK_SECTOR_SIZE]) {
        self.sectors.insert(sector, *buf);
    }
}

/// A page table stand-in that just remembers which addresses are
/// mapped, for exercising `Process`/`vm` plumbing without real hardware.
struct FakeHardware {
    present: BTreeMap<u64, bool>,
}

impl FakeHardware {
    fn new() -> FakeHardware {
        FakeHardware { present: BTreeMap::new() }
    }
}

impl HardwareMap for FakeHardware {
    fn map(&mut self, va: VirtAddr, _frame_index: usize, writable: bool) -> Result<(), VmError> {
        self.present.insert(va.as_u64(), writable);
        Ok(())
    }
    fn unmap(&mut self, va: VirtAddr) {
        self.present.remove(&va.as_u64());
    }
    fn is_present(&self, va: VirtAddr) -> bool {
        self.present.contains_key(&va.as_u64())
    }
    fn is_writable(&self, va: VirtAddr) -> bool {
        self.present.get(&va.as_u64()).copied().unwrap_or(false)
    }
    fn is_dirty(&self, _va: VirtAddr) -> bool {
        false
    }
    fn clear_dirty(&mut self, _va: VirtAddr) {}
    fn is_accessed(&self, _va: VirtAddr) -> bool {
        true
    }
    fn clear_accessed(&mut self, _va: VirtAddr) {}
}

struct FakeFile {
    bytes: alloc::vec::Vec<u8>,
}

impl BackingFile for FakeFile {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> usize {
        let offset = offset as usize;
        if offset >= self.bytes.len() {
            return 0;
        }
        let n = buf.len().min(self.bytes.len() - offset);
        buf[..n].copy_from_slice(&self.bytes[offset..offset + n]);
        n
    }
    fn write_at(&mut self, _offset: u64, buf: &[u8]) -> usize {
        buf.len()
    }
    fn reopen(&self) -> Box<dyn BackingFile> {
        Box::new(FakeFile { bytes: self.bytes.clone() })
    }
}

fn fake_vm() -> VmSystem {
    VmSystem::new(4, 4, Arc::new(Mutex::new(MemDisk::new())))
}

#[test_case]
fn lazy_page_resolves_and_survives_a_fork() {
    let mut vm = fake_vm();
    let mut hw = FakeHardware::new();

    let thread_a = thread::Scheduler::new().spawn("a", thread::PRI_DEFAULT).id();
    let mut parent = Process::new(thread_a);
    let va = VirtAddr::new(0x40_0000);
    parent
        .spt
        .alloc_page_with_initializer(va, true, vm::page::TargetKind::Anon, vm::page::LoadAux::zeroed())
        .unwrap();

    kernel::exception::handle_fault(&mut parent, &mut vm, &mut hw, va, va, true, false).unwrap();
    assert!(parent.spt.find_page(va).unwrap().lock().frame.is_some());

    let child_thread = thread_a;
    let child = parent.fork(child_thread, &mut vm, &mut hw).unwrap();
    assert!(child.spt.find_page(va).is_some());
}

#[test_case]
fn kernel_address_fault_is_reported_fatal() {
    let mut vm = fake_vm();
    let mut hw = FakeHardware::new();
    let thread_a = thread::Scheduler::new().spawn("b", thread::PRI_DEFAULT).id();
    let mut process = Process::new(thread_a);

    let kernel_addr = VirtAddr::new(0xffff_8000_0000_0000);
    let result = kernel::exception::handle_fault(&mut process, &mut vm, &mut hw, kernel_addr, kernel_addr, true, false);
    assert_eq!(result, Err(kernel::error::FATAL_EXIT_STATUS));
}

#[test_case]
fn fd_table_aliases_survive_a_fork() {
    let mut table: Table<Mutex<Box<dyn BackingFile>>> = Table::new();
    let file: Box<dyn BackingFile> = Box::new(FakeFile { bytes: alloc::vec![1, 2, 3] });
    let fd = table.allocate(Arc::new(Mutex::new(file)));

    let child = table.fork();
    let handle = child.get(fd).unwrap();
    let mut buf = [0u8; 3];
    assert_eq!(handle.lock().read_at(0, &mut buf), 3);
    assert_eq!(buf, [1, 2, 3]);
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kernel::test_panic_handler(info)
}
