// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Memory-mapped files: `mmap`/`munmap`.
//!
//! A mapping spans a whole number of pages; the last page's tail past
//! the file's length is zero-filled, matching the original's handling of
//! a mapping whose length isn't a multiple of the page size. A mapping
//! either registers every one of its pages or none of them — if any
//! target address already has a page, the whole call fails without
//! touching the supplemental page table.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;
use x86_64::VirtAddr;

use crate::collab::{BackingFile, HardwareMap};
use crate::page::{LoadAux, PageKind, TargetKind};
use crate::spt::Spt;
use crate::{VmError, VmSystem, PGSIZE};

/// Maps `length` bytes of `file`, starting at its current position, into
/// the page-aligned range starting at `addr`. Returns `addr` back on
/// success, for symmetry with callers that generate `addr` themselves.
pub fn do_mmap(
    spt: &mut Spt,
    addr: VirtAddr,
    length: usize,
    writable: bool,
    file: Box<dyn BackingFile>,
) -> Result<VirtAddr, VmError> {
    if length == 0 || addr.as_u64() % PGSIZE as u64 != 0 {
        return Err(VmError::NotMapped);
    }

    let num_pages = (length + PGSIZE - 1) / PGSIZE;
    for i in 0..num_pages {
        let va = addr + (i * PGSIZE) as u64;
        if spt.find_page(va).is_some() {
            return Err(VmError::AlreadyMapped);
        }
    }

    let shared_file = Arc::new(Mutex::new(file));
    for i in 0..num_pages {
        let va = addr + (i * PGSIZE) as u64;
        let remaining = length - i * PGSIZE;
        let read_bytes = remaining.min(PGSIZE);
        spt.alloc_page_with_initializer(
            va,
            writable,
            TargetKind::File,
            LoadAux {
                file: Some(shared_file.clone()),
                offset: (i * PGSIZE) as u64,
                read_bytes,
                mmap_index: Some(i),
            },
        )?;
    }

    Ok(addr)
}

/// Returns the index of `page` within its `mmap` mapping, whether it's
/// still uninitialized or has already been claimed.
fn mmap_index_of(page: &crate::page::Page) -> Option<usize> {
    match &page.kind {
        PageKind::Uninit(u) => u.aux.mmap_index,
        PageKind::File(f) => Some(f.mmap_index),
        PageKind::Anon(_) => None,
    }
}

/// Unmaps every page belonging to the mapping that starts at `addr`,
/// writing back any that are resident and dirty.
pub fn do_munmap(spt: &mut Spt, vm: &mut VmSystem, hw: &mut dyn HardwareMap, addr: VirtAddr) -> Result<(), VmError> {
    let first = spt.find_page(addr).ok_or(VmError::NotMapped)?;
    if mmap_index_of(&first.lock()) != Some(0) {
        return Err(VmError::NotMapped);
    }

    let mut to_remove = Vec::new();
    let mut i = 0;
    loop {
        let va = addr + (i * PGSIZE) as u64;
        let page = match spt.find_page(va) {
            Some(page) => page,
            None => break,
        };
        if mmap_index_of(&page.lock()) != Some(i) {
            break;
        }
        to_remove.push(va);
        i += 1;
    }

    for va in to_remove {
        if let Some(page_arc) = spt.remove_page(va) {
            let mut page = page_arc.lock();
            if let Some(frame) = page.frame.take() {
                if hw.is_dirty(va) {
                    let bytes = *vm.frames.bytes(&frame.lock());
                    crate::page::swap_out(&mut page, &bytes, true, &mut vm.swap)?;
                }
                hw.unmap(va);
                vm.frames.free(&frame.lock());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameTable;
    use crate::swap::tests::fake_swap_table;

    struct FakeHardware {
        dirty: Vec<VirtAddr>,
    }
    impl HardwareMap for FakeHardware {
        fn map(&mut self, _va: VirtAddr, _frame_index: usize, _writable: bool) -> Result<(), VmError> {
            Ok(())
        }
        fn unmap(&mut self, _va: VirtAddr) {}
        fn is_present(&self, _va: VirtAddr) -> bool {
            true
        }
        fn is_writable(&self, _va: VirtAddr) -> bool {
            true
        }
        fn is_dirty(&self, va: VirtAddr) -> bool {
            self.dirty.contains(&va)
        }
        fn clear_dirty(&mut self, _va: VirtAddr) {}
        fn is_accessed(&self, _va: VirtAddr) -> bool {
            false
        }
        fn clear_accessed(&mut self, _va: VirtAddr) {}
    }

    struct FakeFile {
        data: Vec<u8>,
    }
    impl BackingFile for FakeFile {
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> usize {
            let offset = offset as usize;
            if offset >= self.data.len() {
                return 0;
            }
            let n = buf.len().min(self.data.len() - offset);
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
            n
        }
        fn write_at(&mut self, offset: u64, buf: &[u8]) -> usize {
            let offset = offset as usize;
            if offset + buf.len() > self.data.len() {
                self.data.resize(offset + buf.len(), 0);
            }
            self.data[offset..offset + buf.len()].copy_from_slice(buf);
            buf.len()
        }
        fn reopen(&self) -> Box<dyn BackingFile> {
            Box::new(FakeFile { data: self.data.clone() })
        }
    }

    #[test]
    fn mmap_registers_one_page_per_chunk() {
        let mut spt = Spt::new();
        let file = Box::new(FakeFile { data: alloc::vec![1u8; PGSIZE + 10] });
        let addr = VirtAddr::new(0x4000_0000);
        do_mmap(&mut spt, addr, PGSIZE + 10, true, file).unwrap();
        assert_eq!(spt.len(), 2);
    }

    #[test]
    fn mmap_rejects_overlapping_range() {
        let mut spt = Spt::new();
        let addr = VirtAddr::new(0x4000_0000);
        spt.alloc_page_with_initializer(addr, true, TargetKind::Anon, LoadAux::zeroed()).unwrap();

        let file = Box::new(FakeFile { data: alloc::vec![0u8; PGSIZE] });
        let result = do_mmap(&mut spt, addr, PGSIZE, true, file);
        assert_eq!(result, Err(VmError::AlreadyMapped));
    }

    #[test]
    fn munmap_removes_every_page_of_the_mapping() {
        let mut spt = Spt::new();
        let mut vm = VmSystem {
            frames: FrameTable::new(4),
            swap: fake_swap_table(4),
        };
        let mut hw = FakeHardware { dirty: Vec::new() };
        let file = Box::new(FakeFile { data: alloc::vec![3u8; PGSIZE * 2] });
        let addr = VirtAddr::new(0x5000_0000);
        do_mmap(&mut spt, addr, PGSIZE * 2, true, file).unwrap();
        assert_eq!(spt.len(), 2);

        do_munmap(&mut spt, &mut vm, &mut hw, addr).unwrap();
        assert_eq!(spt.len(), 0);
    }

    /// A backing file whose clones (via `reopen`) all observe the same
    /// underlying storage, as the real file system's reopen of an inode
    /// does — unlike [`FakeFile`], whose `reopen` snapshots its data, so
    /// it can't be used to check that a write survives across `munmap`
    /// and a fresh `mmap` of the same file.
    struct SharedFile {
        data: Arc<Mutex<Vec<u8>>>,
    }
    impl BackingFile for SharedFile {
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> usize {
            let data = self.data.lock();
            let offset = offset as usize;
            if offset >= data.len() {
                return 0;
            }
            let n = buf.len().min(data.len() - offset);
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            n
        }
        fn write_at(&mut self, offset: u64, buf: &[u8]) -> usize {
            let mut data = self.data.lock();
            let offset = offset as usize;
            if offset + buf.len() > data.len() {
                data.resize(offset + buf.len(), 0);
            }
            data[offset..offset + buf.len()].copy_from_slice(buf);
            buf.len()
        }
        fn reopen(&self) -> Box<dyn BackingFile> {
            Box::new(SharedFile { data: self.data.clone() })
        }
    }

    /// Spec scenario: modify a writable mmap'd page, `munmap` it (which
    /// must write the modification back), then `mmap` the same file at
    /// the same offset again — the modification is still there.
    #[test]
    fn mmap_modify_munmap_remmap_round_trips() {
        let backing = Arc::new(Mutex::new(alloc::vec![0u8; PGSIZE]));
        let mut spt = Spt::new();
        let mut vm = VmSystem {
            frames: FrameTable::new(4),
            swap: fake_swap_table(4),
        };
        let mut hw = FakeHardware { dirty: Vec::new() };
        let addr = VirtAddr::new(0x6000_0000);

        let file = Box::new(SharedFile { data: backing.clone() });
        do_mmap(&mut spt, addr, PGSIZE, true, file).unwrap();
        spt.claim_page(addr, &mut vm, &mut hw).unwrap();

        {
            let page = spt.find_page(addr).unwrap();
            let page = page.lock();
            let frame = page.frame.as_ref().unwrap();
            vm.frames.bytes_mut(&frame.lock())[5] = 0x7a;
        }
        hw.dirty.push(addr);

        do_munmap(&mut spt, &mut vm, &mut hw, addr).unwrap();
        assert_eq!(backing.lock()[5], 0x7a);

        let file_again = Box::new(SharedFile { data: backing.clone() });
        do_mmap(&mut spt, addr, PGSIZE, true, file_again).unwrap();
        spt.claim_page(addr, &mut vm, &mut hw).unwrap();

        let page = spt.find_page(addr).unwrap();
        let page = page.lock();
        let frame = page.frame.as_ref().unwrap();
        assert_eq!(vm.frames.bytes(&frame.lock())[5], 0x7a);
    }
}
