// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The page descriptor and its per-kind dispatch.
//!
//! A page is always exactly one of three kinds, and which kind it is can
//! change exactly once: every page starts out [`PageKind::Uninit`] and
//! transmutes into either [`PageKind::Anon`] or [`PageKind::File`] the
//! first time it's claimed. This is expressed as a Rust enum rather than
//! a table of function pointers per page — the dispatch the original
//! implementation does through a `page_operations` vtable is instead an
//! exhaustive `match` in [`swap_in`]/[`swap_out`]/[`destroy`], which the
//! compiler checks covers every kind.

use alloc::sync::Arc;
use spin::Mutex;
use x86_64::VirtAddr;

use crate::collab::zero_fill;
use crate::frame::Frame;
use crate::swap::SwapTable;
use crate::{VmError, PGSIZE};

/// Which kind of page an uninitialized page will become once claimed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TargetKind {
    Anon,
    File,
}

/// The arguments needed to lazily load a page's initial contents,
/// whatever kind it becomes.
#[derive(Clone)]
pub struct LoadAux {
    /// The file to read from, for a page that will become file-backed or
    /// whose anonymous contents are initialised from an executable
    /// segment. `None` for a page that is simply demand-zeroed (e.g. a
    /// stack page).
    pub file: Option<Arc<Mutex<alloc::boxed::Box<dyn crate::BackingFile>>>>,
    pub offset: u64,
    /// Bytes to read from `file` before zero-filling the rest of the page.
    pub read_bytes: usize,
    /// If this page is part of an `mmap`, the index of this page within
    /// the mapping (page 0, 1, 2, ...), used by `munmap` to find every
    /// page belonging to a mapping.
    pub mmap_index: Option<usize>,
}

impl LoadAux {
    /// A page with no backing file, demand-zeroed on first access.
    pub fn zeroed() -> LoadAux {
        LoadAux {
            file: None,
            offset: 0,
            read_bytes: 0,
            mmap_index: None,
        }
    }
}

/// An uninitialized page: exists in the address space, but has never
/// been faulted in.
pub struct UninitPage {
    pub target: TargetKind,
    pub aux: LoadAux,
}

/// A page backed by swap, not any file.
pub struct AnonPage {
    /// The swap slot this page's contents were last written to, if it has
    /// ever been evicted.
    pub swap_slot: Option<usize>,
}

/// A page backed by a file: `mmap`'d memory, or a lazily-loaded segment
/// of an executable.
pub struct FileBackedPage {
    pub file: Arc<Mutex<alloc::boxed::Box<dyn crate::BackingFile>>>,
    pub offset: u64,
    pub read_bytes: usize,
    /// The index of this page within its `mmap` mapping; `munmap` walks
    /// forward from index 0 to find every page belonging to the mapping.
    pub mmap_index: usize,
}

/// The tagged union of what a page currently is.
pub enum PageKind {
    Uninit(UninitPage),
    Anon(AnonPage),
    File(FileBackedPage),
}

/// A page descriptor: a virtual address, whether it's writable, which
/// frame (if any) currently backs it, and what kind of page it is.
pub struct Page {
    pub va: VirtAddr,
    pub writable: bool,
    pub frame: Option<Arc<Mutex<Frame>>>,
    pub kind: PageKind,
}

impl Page {
    /// Creates a new, not-yet-resident uninitialized page.
    pub fn new_uninit(va: VirtAddr, writable: bool, target: TargetKind, aux: LoadAux) -> Page {
        Page {
            va,
            writable,
            frame: None,
            kind: PageKind::Uninit(UninitPage { target, aux }),
        }
    }

    /// Creates an already-resident anonymous page (used for fork copies
    /// and other eagerly-populated pages).
    pub fn new_anon(va: VirtAddr, writable: bool, frame: Arc<Mutex<Frame>>) -> Page {
        Page {
            va,
            writable,
            frame: Some(frame),
            kind: PageKind::Anon(AnonPage { swap_slot: None }),
        }
    }
}

/// Brings `page` into `frame_bytes`, loading or zero-filling its content
/// as appropriate, and transmuting it from [`PageKind::Uninit`] into its
/// target kind if this is the first time it has been claimed.
///
/// Mirrors `uninit_initialize`: if the page is still uninitialized, the
/// init arguments are read out *before* the kind is overwritten, since
/// assigning the target kind destroys the `Uninit` payload they live in.
pub fn swap_in(page: &mut Page, frame_bytes: &mut [u8; PGSIZE], swap: &mut SwapTable) -> Result<(), VmError> {
    match &page.kind {
        PageKind::Uninit(uninit) => {
            let target = uninit.target;
            let aux = uninit.aux.clone();

            if let Some(file) = &aux.file {
                let n = file.lock().read_at(aux.offset, &mut frame_bytes[..aux.read_bytes]);
                if n != aux.read_bytes {
                    return Err(VmError::ShortTransfer);
                }
            }
            zero_fill(frame_bytes, aux.read_bytes);

            page.kind = match target {
                TargetKind::Anon => PageKind::Anon(AnonPage { swap_slot: None }),
                TargetKind::File => PageKind::File(FileBackedPage {
                    file: aux.file.expect("file-backed page requires a file"),
                    offset: aux.offset,
                    read_bytes: aux.read_bytes,
                    mmap_index: aux.mmap_index.unwrap_or(0),
                }),
            };
            Ok(())
        }
        PageKind::Anon(anon) => {
            if let Some(slot) = anon.swap_slot {
                swap.read_page(slot, frame_bytes);
                swap.free_slot(slot);
                if let PageKind::Anon(anon) = &mut page.kind {
                    anon.swap_slot = None;
                }
            } else {
                zero_fill(frame_bytes, 0);
            }
            Ok(())
        }
        PageKind::File(file_page) => {
            let n = file_page
                .file
                .lock()
                .read_at(file_page.offset, &mut frame_bytes[..file_page.read_bytes]);
            if n != file_page.read_bytes {
                return Err(VmError::ShortTransfer);
            }
            zero_fill(frame_bytes, file_page.read_bytes);
            Ok(())
        }
    }
}

/// Persists `frame_bytes` for `page` before the frame holding them is
/// reused for something else (eviction). An anonymous page always writes
/// out to swap; a file-backed page writes back to its file only if the
/// hardware dirty bit says it was modified, matching the original's
/// evict-time dirty check (which `swap_out` alone, unlike `destroy`,
/// cannot skip: a clean evicted page must still be re-readable later, so
/// its mapping is cleared but its content is left on file/disk as-is).
pub fn swap_out(
    page: &mut Page,
    frame_bytes: &[u8; PGSIZE],
    dirty: bool,
    swap: &mut SwapTable,
) -> Result<(), VmError> {
    match &mut page.kind {
        PageKind::Uninit(_) => {
            unreachable!("an uninitialized page is never resident and so is never evicted")
        }
        PageKind::Anon(anon) => {
            let slot = swap.alloc_slot().ok_or(VmError::OutOfSwap)?;
            swap.write_page(slot, frame_bytes);
            anon.swap_slot = Some(slot);
            Ok(())
        }
        PageKind::File(file_page) => {
            if dirty {
                let n = file_page
                    .file
                    .lock()
                    .write_at(file_page.offset, &frame_bytes[..file_page.read_bytes]);
                if n != file_page.read_bytes {
                    return Err(VmError::ShortTransfer);
                }
            }
            Ok(())
        }
    }
    .map(|()| {
        page.frame = None;
    })
}

/// Releases any resources held directly by `page` (its swap slot, if
/// any) when its owning address space is torn down. A file-backed page's
/// content is flushed by the caller beforehand if it's still resident and
/// dirty (the same write-back `swap_out` performs); `destroy` itself
/// never writes to the file, only frees bookkeeping state.
pub fn destroy(page: &mut Page, swap: &mut SwapTable) {
    match &page.kind {
        PageKind::Anon(anon) => {
            if let Some(slot) = anon.swap_slot {
                swap.free_slot(slot);
            }
        }
        PageKind::Uninit(_) | PageKind::File(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::tests::fake_swap_table;

    #[test]
    fn zero_fill_uninit_anon_page_reads_as_zero() {
        let mut page = Page::new_uninit(VirtAddr::new(0x1000), true, TargetKind::Anon, LoadAux::zeroed());
        let mut bytes = [0xffu8; PGSIZE];
        let mut swap = fake_swap_table(4);
        swap_in(&mut page, &mut bytes, &mut swap).unwrap();
        assert!(bytes.iter().all(|&b| b == 0));
        assert!(matches!(page.kind, PageKind::Anon(_)));
    }

    #[test]
    fn anon_round_trips_through_swap() {
        let mut page = Page::new_uninit(VirtAddr::new(0x2000), true, TargetKind::Anon, LoadAux::zeroed());
        let mut bytes = [0u8; PGSIZE];
        let mut swap = fake_swap_table(4);
        swap_in(&mut page, &mut bytes, &mut swap).unwrap();
        bytes[0] = 0x42;

        swap_out(&mut page, &bytes, true, &mut swap).unwrap();
        assert!(page.frame.is_none());

        let mut restored = [0u8; PGSIZE];
        swap_in(&mut page, &mut restored, &mut swap).unwrap();
        assert_eq!(restored[0], 0x42);
    }
}
