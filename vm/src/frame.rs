// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The frame table: the pool of physical frames pages are claimed into,
//! and the clock (second-chance) algorithm used to pick an eviction
//! victim when the pool is exhausted.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use bitmap_index::Bitmap;
use spin::Mutex;
use x86_64::VirtAddr;

use crate::collab::HardwareMap;
use crate::page::{self, Page};
use crate::swap::SwapTable;
use crate::{VmError, PGSIZE};

/// A physical frame: in a real kernel, a page-sized chunk of physical
/// memory; here, an index into [`FrameTable`]'s own byte storage, which
/// plays the role of physical memory for this crate's purposes (and lets
/// the frame table be exercised without a real MMU).
pub struct Frame {
    pub index: usize,
}

/// The pool of physical frames, and the back-pointer from each occupied
/// frame to the page currently resident in it (needed both to find an
/// eviction victim's page and, per the design this crate generalizes
/// from, to let a frame and its page reference each other without a
/// separate arena: the back-pointer is an ordinary `Arc`, not a raw
/// index or pointer, so it can't dangle).
pub struct FrameTable {
    free: Bitmap,
    owner: Vec<Option<Arc<Mutex<Page>>>>,
    storage: Vec<[u8; PGSIZE]>,
    clock_hand: usize,
}

impl FrameTable {
    /// Creates a frame table with `capacity` frames, all free.
    pub fn new(capacity: usize) -> FrameTable {
        FrameTable {
            free: Bitmap::new_set(capacity),
            owner: vec![None; capacity],
            storage: vec![[0u8; PGSIZE]; capacity],
            clock_hand: 0,
        }
    }

    /// Returns the number of frames in the pool.
    pub fn capacity(&self) -> usize {
        self.owner.len()
    }

    /// Returns the number of frames currently free.
    pub fn free_count(&self) -> usize {
        self.free.count_set()
    }

    /// Claims a frame for `page`, evicting another page if the pool is
    /// full. On success, returns a handle to the claimed frame; the
    /// caller is responsible for calling [`page::swap_in`] to populate it
    /// and for installing the hardware mapping.
    pub fn alloc(
        &mut self,
        page: Arc<Mutex<Page>>,
        hw: &mut dyn HardwareMap,
        swap: &mut SwapTable,
    ) -> Result<Arc<Mutex<Frame>>, VmError> {
        let index = match self.free.next_set() {
            Some(index) => {
                self.free.unset(index);
                index
            }
            None => self.evict(hw, swap)?,
        };
        self.owner[index] = Some(page);
        Ok(Arc::new(Mutex::new(Frame { index })))
    }

    /// Returns the byte contents of `frame`.
    pub fn bytes(&self, frame: &Frame) -> &[u8; PGSIZE] {
        &self.storage[frame.index]
    }

    /// Returns the mutable byte contents of `frame`.
    pub fn bytes_mut(&mut self, frame: &Frame) -> &mut [u8; PGSIZE] {
        &mut self.storage[frame.index]
    }

    /// Releases `frame` back to the free pool without writing its
    /// contents anywhere (used when a page is destroyed outright, not
    /// evicted).
    pub fn free(&mut self, frame: &Frame) {
        self.owner[frame.index] = None;
        self.free.set(frame.index);
    }

    /// Picks a victim frame with a clock sweep over accessed bits,
    /// writes its page's contents out via [`page::swap_out`], clears its
    /// hardware mapping, and returns the now-free frame's index.
    ///
    /// The clock hand advances across calls rather than restarting from
    /// zero, so repeated evictions don't all re-examine (and give a
    /// second chance to) the same early frames.
    fn evict(&mut self, hw: &mut dyn HardwareMap, swap: &mut SwapTable) -> Result<usize, VmError> {
        let capacity = self.capacity();
        if capacity == 0 {
            return Err(VmError::OutOfMemory);
        }

        let victim = loop {
            let idx = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % capacity;
            let va = match &self.owner[idx] {
                Some(page) => page.lock().va,
                None => continue,
            };
            if hw.is_accessed(va) {
                hw.clear_accessed(va);
                continue;
            }
            break idx;
        };

        let page_arc = self.owner[victim].take().expect("victim frame must be occupied");
        let dirty = {
            let page = page_arc.lock();
            hw.is_dirty(page.va)
        };
        {
            let mut page = page_arc.lock();
            let bytes = self.storage[victim];
            page::swap_out(&mut page, &bytes, dirty, swap)?;
            hw.unmap(page.va);
        }
        // `page::swap_out` clears `page.frame`; the frame slot itself is
        // handed back to the caller to reuse immediately, so it is not
        // also pushed onto the free bitmap here.

        Ok(victim)
    }

    /// Finds the frame index currently backing `va`, if any thread's
    /// frame table owns a frame mapped there. Used by tests and by the
    /// fault handler's "is this address already resident" fast path.
    pub fn owner_of(&self, va: VirtAddr) -> Option<usize> {
        self.owner.iter().position(|o| {
            o.as_ref().map(|p| p.lock().va == va).unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{LoadAux, TargetKind};
    use crate::swap::tests::fake_swap_table;

    struct FakeHardware {
        present: Vec<(VirtAddr, bool, bool)>, // (va, dirty, accessed)
    }

    impl FakeHardware {
        fn new() -> FakeHardware {
            FakeHardware { present: Vec::new() }
        }
        fn entry(&mut self, va: VirtAddr) -> &mut (VirtAddr, bool, bool) {
            if !self.present.iter().any(|(a, _, _)| *a == va) {
                self.present.push((va, false, false));
            }
            self.present.iter_mut().find(|(a, _, _)| *a == va).unwrap()
        }
    }

    impl HardwareMap for FakeHardware {
        fn map(&mut self, va: VirtAddr, _frame_index: usize, _writable: bool) -> Result<(), VmError> {
            self.entry(va);
            Ok(())
        }
        fn unmap(&mut self, va: VirtAddr) {
            self.present.retain(|(a, _, _)| *a != va);
        }
        fn is_present(&self, va: VirtAddr) -> bool {
            self.present.iter().any(|(a, _, _)| *a == va)
        }
        fn is_writable(&self, _va: VirtAddr) -> bool {
            true
        }
        fn is_dirty(&self, va: VirtAddr) -> bool {
            self.present.iter().any(|(a, d, _)| *a == va && *d)
        }
        fn clear_dirty(&mut self, va: VirtAddr) {
            self.entry(va).1 = false;
        }
        fn is_accessed(&self, va: VirtAddr) -> bool {
            self.present.iter().any(|(a, _, ac)| *a == va && *ac)
        }
        fn clear_accessed(&mut self, va: VirtAddr) {
            self.entry(va).2 = false;
        }
    }

    fn claim(table: &mut FrameTable, hw: &mut FakeHardware, swap: &mut SwapTable, va: VirtAddr) -> Arc<Mutex<Page>> {
        let page = Arc::new(Mutex::new(Page::new_uninit(va, true, TargetKind::Anon, LoadAux::zeroed())));
        let frame = table.alloc(page.clone(), hw, swap).unwrap();
        {
            let mut p = page.lock();
            let f = frame.lock();
            let bytes = table.bytes_mut(&f);
            page::swap_in(&mut p, bytes, swap).unwrap();
            p.frame = Some(frame.clone());
        }
        hw.map(va, frame.lock().index, true).unwrap();
        page
    }

    #[test]
    fn allocates_from_free_pool_first() {
        let mut table = FrameTable::new(2);
        let mut hw = FakeHardware::new();
        let mut swap = fake_swap_table(4);
        claim(&mut table, &mut hw, &mut swap, VirtAddr::new(0x1000));
        assert_eq!(table.free_count(), 1);
    }

    #[test]
    fn evicts_unaccessed_frame_when_pool_is_full() {
        let mut table = FrameTable::new(1);
        let mut hw = FakeHardware::new();
        let mut swap = fake_swap_table(4);
        let first = claim(&mut table, &mut hw, &mut swap, VirtAddr::new(0x1000));
        assert_eq!(table.free_count(), 0);

        let _second = claim(&mut table, &mut hw, &mut swap, VirtAddr::new(0x2000));
        // Evicting the only frame must have dropped its hardware mapping.
        assert!(!hw.is_present(VirtAddr::new(0x1000)));
        assert!(first.lock().frame.is_none());
    }

    #[test]
    fn accessed_frame_gets_a_second_chance() {
        let mut table = FrameTable::new(2);
        let mut hw = FakeHardware::new();
        let mut swap = fake_swap_table(4);
        claim(&mut table, &mut hw, &mut swap, VirtAddr::new(0x1000));
        claim(&mut table, &mut hw, &mut swap, VirtAddr::new(0x2000));
        hw.entry(VirtAddr::new(0x1000)).2 = true; // mark accessed

        claim(&mut table, &mut hw, &mut swap, VirtAddr::new(0x3000));
        // 0x1000 was accessed so should survive this single eviction pass
        // (its accessed bit is cleared instead), while 0x2000 is evicted.
        assert!(hw.is_present(VirtAddr::new(0x1000)));
        assert!(!hw.is_present(VirtAddr::new(0x2000)));
    }

    /// Spec scenario: claim ten more anonymous pages than a small frame
    /// pool can hold, forcing repeated evictions to swap, then bring the
    /// earliest-claimed (and by now long since evicted) pages back and
    /// check their contents survived the round trip.
    #[test]
    fn pages_evicted_under_pool_pressure_survive_the_round_trip_through_swap() {
        const POOL: usize = 4;
        const COUNT: usize = POOL + 10;

        let mut table = FrameTable::new(POOL);
        let mut hw = FakeHardware::new();
        let mut swap = fake_swap_table(COUNT);

        let pages: Vec<Arc<Mutex<Page>>> = (0..COUNT)
            .map(|i| {
                let va = VirtAddr::new(0x1000 * (i as u64 + 1));
                let page = claim(&mut table, &mut hw, &mut swap, va);
                let frame = page.lock().frame.clone().unwrap();
                table.bytes_mut(&frame.lock())[0] = i as u8;
                page
            })
            .collect();

        // The pool only holds POOL frames, so every earlier page must have
        // been evicted to swap by the time the last one is claimed.
        assert_eq!(table.free_count(), 0);
        for page in &pages[..COUNT - POOL] {
            assert!(page.lock().frame.is_none());
        }

        // Bring every page back in and check its byte survived.
        for (i, page) in pages.iter().enumerate() {
            let va = page.lock().va;
            if page.lock().frame.is_none() {
                let frame = table.alloc(page.clone(), &mut hw, &mut swap).unwrap();
                let mut p = page.lock();
                let f = frame.lock();
                let bytes = table.bytes_mut(&f);
                page::swap_in(&mut p, bytes, &mut swap).unwrap();
                p.frame = Some(frame.clone());
                drop(p);
                hw.map(va, frame.lock().index, true).unwrap();
            }
            let frame = page.lock().frame.clone().unwrap();
            assert_eq!(table.bytes(&frame.lock())[0], i as u8, "page {i} lost its contents across swap");
        }
    }
}
