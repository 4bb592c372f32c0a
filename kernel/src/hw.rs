// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The real [`vm::HardwareMap`]: a thin shim over `x86_64`'s
//! [`OffsetPageTable`], set up the same way every bootloader-crate
//! kernel does — read `Cr3`, reinterpret the active PML4 through the
//! physical-memory offset the bootloader identity-mapped. `vm` is
//! deliberately ignorant of real page tables — it only knows the
//! [`vm::HardwareMap`] trait — so this is the only place in the crate
//! that touches `Cr3`, `PageTableFlags`, or a frame allocator.

use bootloader::bootinfo::{MemoryMap, MemoryRegionType};
use vm::VmError;
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::{
    FrameAllocator, Mapper, OffsetPageTable, Page, PageTable, PageTableFlags, PhysFrame, Size4KiB,
};
use x86_64::{PhysAddr, VirtAddr};

/// A physical frame allocator that hands out frames from the
/// bootloader's memory map, in order, and never reuses one. Used only
/// to supply intermediate page-table frames to [`Mapper::map_to`]; the
/// user frame pool itself is [`vm::FrameTable`]'s own bookkeeping, not
/// this allocator's.
pub struct BootInfoFrameAllocator {
    memory_map: &'static MemoryMap,
    next: usize,
}

impl BootInfoFrameAllocator {
    /// # Safety
    ///
    /// The caller must guarantee that every frame marked `Usable` in
    /// `memory_map` is actually unused.
    pub unsafe fn init(memory_map: &'static MemoryMap) -> BootInfoFrameAllocator {
        BootInfoFrameAllocator { memory_map, next: 0 }
    }

    fn usable_frames(&self) -> impl Iterator<Item = PhysFrame> + '_ {
        self.memory_map
            .iter()
            .filter(|r| r.region_type == MemoryRegionType::Usable)
            .flat_map(|r| (r.range.start_addr()..r.range.end_addr()).step_by(4096))
            .map(|addr| PhysFrame::containing_address(PhysAddr::new(addr)))
    }
}

unsafe impl FrameAllocator<Size4KiB> for BootInfoFrameAllocator {
    fn allocate_frame(&mut self) -> Option<PhysFrame> {
        let frame = self.usable_frames().nth(self.next);
        self.next += 1;
        frame
    }
}

/// Implements [`vm::HardwareMap`] over the live PML4, plus a contiguous
/// block of physical memory reserved at boot for the user frame pool.
///
/// `vm::FrameTable` addresses frames by a plain index; this adapter's
/// job is the one piece of real hardware knowledge `vm` never needs:
/// frame `i`'s physical address is `pool_base + i * PGSIZE`, so "claim
/// frame `i`" and "map this virtual page to frame `i`" are both just
/// arithmetic on that base, not a second allocator.
pub struct PageTableMap<'a> {
    mapper: OffsetPageTable<'a>,
    frame_allocator: BootInfoFrameAllocator,
    pool_base: PhysAddr,
}

impl<'a> PageTableMap<'a> {
    /// # Safety
    ///
    /// `physical_memory_offset` must be the address at which the
    /// bootloader identity-mapped all physical memory, and `pool_base`
    /// must point to `frame_count * PGSIZE` bytes of physical memory
    /// reserved exclusively for the user frame pool (not handed out by
    /// `frame_allocator` for anything else).
    pub unsafe fn new(
        physical_memory_offset: VirtAddr,
        frame_allocator: BootInfoFrameAllocator,
        pool_base: PhysAddr,
    ) -> PageTableMap<'a> {
        let level_4_table = active_level_4_table(physical_memory_offset);
        let mapper = OffsetPageTable::new(level_4_table, physical_memory_offset);
        PageTableMap {
            mapper,
            frame_allocator,
            pool_base,
        }
    }

    fn frame_for(&self, frame_index: usize) -> PhysFrame {
        PhysFrame::containing_address(self.pool_base + (frame_index * vm::PGSIZE) as u64)
    }

    /// Exposes the underlying mapper and frame allocator together (as a
    /// pair of disjoint borrows) so the kernel heap can be mapped
    /// through the same page tables and frame pool this adapter
    /// otherwise keeps to itself.
    pub fn mapper_and_allocator_mut(&mut self) -> (&mut OffsetPageTable<'a>, &mut BootInfoFrameAllocator) {
        (&mut self.mapper, &mut self.frame_allocator)
    }
}

unsafe fn active_level_4_table(physical_memory_offset: VirtAddr) -> &'static mut PageTable {
    let (level_4_table_frame, _) = Cr3::read();
    let phys = level_4_table_frame.start_address();
    let virt = physical_memory_offset + phys.as_u64();
    &mut *virt.as_mut_ptr::<PageTable>()
}

impl<'a> vm::HardwareMap for PageTableMap<'a> {
    fn map(&mut self, va: VirtAddr, frame_index: usize, writable: bool) -> Result<(), VmError> {
        let page = Page::<Size4KiB>::containing_address(va);
        let frame = self.frame_for(frame_index);
        let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
        if writable {
            flags |= PageTableFlags::WRITABLE;
        }
        unsafe {
            self.mapper
                .map_to(page, frame, flags, &mut self.frame_allocator)
                .map_err(|_| VmError::OutOfMemory)?
                .flush();
        }
        Ok(())
    }

    fn unmap(&mut self, va: VirtAddr) {
        let page = Page::<Size4KiB>::containing_address(va);
        if let Ok((_, flush)) = self.mapper.unmap(page) {
            flush.flush();
        }
    }

    fn is_present(&self, va: VirtAddr) -> bool {
        self.flags(va).map(|f| f.contains(PageTableFlags::PRESENT)).unwrap_or(false)
    }

    fn is_writable(&self, va: VirtAddr) -> bool {
        self.flags(va).map(|f| f.contains(PageTableFlags::WRITABLE)).unwrap_or(false)
    }

    fn is_dirty(&self, va: VirtAddr) -> bool {
        self.flags(va).map(|f| f.contains(PageTableFlags::DIRTY)).unwrap_or(false)
    }

    fn clear_dirty(&mut self, va: VirtAddr) {
        self.set_flag(va, PageTableFlags::DIRTY, false);
    }

    fn is_accessed(&self, va: VirtAddr) -> bool {
        self.flags(va).map(|f| f.contains(PageTableFlags::ACCESSED)).unwrap_or(false)
    }

    fn clear_accessed(&mut self, va: VirtAddr) {
        self.set_flag(va, PageTableFlags::ACCESSED, false);
    }
}

impl<'a> PageTableMap<'a> {
    fn flags(&self, va: VirtAddr) -> Option<PageTableFlags> {
        use x86_64::structures::paging::mapper::Translate;
        match self.mapper.translate(va) {
            x86_64::structures::paging::mapper::TranslateResult::Mapped { flags, .. } => Some(flags),
            _ => None,
        }
    }

    fn set_flag(&mut self, va: VirtAddr, flag: PageTableFlags, value: bool) {
        let page = Page::<Size4KiB>::containing_address(va);
        if let Some(mut flags) = self.flags(va) {
            flags.set(flag, value);
            unsafe {
                // `update_flags` only rewrites the flags bits of an
                // already-present entry; it cannot fail for a page this
                // function was only ever asked about because `vm` just
                // found it mapped.
                let _ = self.mapper.update_flags(page, flags);
            }
        }
    }
}
