// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The kernel heap.
//!
//! Every dynamic structure in `thread` and `vm` (the all-threads map,
//! the ready queue, the SPT, frame back-pointers) lives behind
//! `alloc::sync::Arc` and friends, so this crate needs a real global
//! allocator before any of that code runs. Maps a fixed virtual range for
//! the heap and hands it to a global allocator, the same way prior
//! freestanding-kernel allocator modules in this codebase's lineage do;
//! this one uses `linked_list_allocator` rather than a hand-rolled
//! bump/fixed-size-block allocator, since heap strategy is incidental to
//! the scheduler and virtual memory subsystems this kernel implements.

use linked_list_allocator::LockedHeap;
use x86_64::structures::paging::mapper::MapToError;
use x86_64::structures::paging::{FrameAllocator, Mapper, Page, PageTableFlags, Size4KiB};
use x86_64::VirtAddr;

/// The virtual address the kernel heap starts at.
pub const KERNEL_HEAP_START: u64 = 0x_4444_4444_0000;
/// The size, in bytes, of the kernel heap.
pub const KERNEL_HEAP_SIZE: u64 = 1024 * 1024;

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Maps the kernel heap's virtual range to freshly allocated physical
/// frames and hands it to the global allocator.
pub fn init(
    mapper: &mut impl Mapper<Size4KiB>,
    frame_allocator: &mut impl FrameAllocator<Size4KiB>,
) -> Result<(), MapToError<Size4KiB>> {
    let heap_start = VirtAddr::new(KERNEL_HEAP_START);
    let heap_end = heap_start + (KERNEL_HEAP_SIZE - 1);
    let page_range = Page::range_inclusive(Page::containing_address(heap_start), Page::containing_address(heap_end));

    for page in page_range {
        let frame = frame_allocator.allocate_frame().ok_or(MapToError::FrameAllocationFailed)?;
        let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        unsafe { mapper.map_to(page, frame, flags, frame_allocator)?.flush() };
    }

    unsafe {
        ALLOCATOR.lock().init(KERNEL_HEAP_START as usize, KERNEL_HEAP_SIZE as usize);
    }
    Ok(())
}

#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("allocation error: {:?}", layout)
}
