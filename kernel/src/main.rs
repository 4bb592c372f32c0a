// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

#![no_std]
#![no_main]

use bootloader::{entry_point, BootInfo};
use core::panic::PanicInfo;
use x86_64::VirtAddr;

use kernel::hw::{BootInfoFrameAllocator, PageTableMap};
use kernel::{allocator, halt_loop};

entry_point!(kmain);

fn kmain(boot_info: &'static BootInfo) -> ! {
    let physical_memory_offset = VirtAddr::new(boot_info.physical_memory_offset);
    let frame_allocator = unsafe { BootInfoFrameAllocator::init(&boot_info.memory_map) };
    let mut hw = unsafe { PageTableMap::new(physical_memory_offset, frame_allocator, pool_base()) };

    let (mapper, frame_allocator) = hw.mapper_and_allocator_mut();
    allocator::init(mapper, frame_allocator).expect("heap initialisation failed");

    serial::println!("kernel: heap ready ({})", pretty::Bytes::from_u64(allocator::KERNEL_HEAP_SIZE));
    serial::println!("kernel: GDT/IDT, disk, and file system are out of scope for this build");

    halt_loop();
}

/// Placeholder until a real physical-memory reservation scheme exists:
/// a full boot sequence carves a pool of usable frames for
/// [`vm::FrameTable`] out of the regions the bootloader reports, which
/// this build doesn't do yet since there is no disk driver to page
/// against and so nothing yet needs the pool wired to real memory.
fn pool_base() -> x86_64::PhysAddr {
    x86_64::PhysAddr::new(0)
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial::println!("{}", info);
    halt_loop()
}
