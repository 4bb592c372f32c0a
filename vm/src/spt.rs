// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The supplemental page table: per-process bookkeeping of every virtual
//! page that exists, whether or not it's currently resident.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::Mutex;
use x86_64::VirtAddr;

use crate::collab::HardwareMap;
use crate::page::{self, LoadAux, Page, PageKind, TargetKind};
use crate::{VmError, VmSystem, PGSIZE};

/// Every virtual page a process has, keyed by its (page-aligned) address.
pub struct Spt {
    pages: BTreeMap<VirtAddr, Arc<Mutex<Page>>>,
}

impl Spt {
    /// Creates an empty supplemental page table.
    pub fn new() -> Spt {
        Spt {
            pages: BTreeMap::new(),
        }
    }

    /// Returns the page at `va`, if the table has one registered there.
    pub fn find_page(&self, va: VirtAddr) -> Option<Arc<Mutex<Page>>> {
        self.pages.get(&va).cloned()
    }

    /// Returns the number of pages registered, resident or not.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Registers a new, not-yet-resident page at `va`.
    ///
    /// # Errors
    ///
    /// Returns [`VmError::AlreadyMapped`] if `va` already has a page.
    pub fn alloc_page_with_initializer(
        &mut self,
        va: VirtAddr,
        writable: bool,
        target: TargetKind,
        aux: LoadAux,
    ) -> Result<(), VmError> {
        if self.pages.contains_key(&va) {
            return Err(VmError::AlreadyMapped);
        }
        self.pages
            .insert(va, Arc::new(Mutex::new(Page::new_uninit(va, writable, target, aux))));
        Ok(())
    }

    /// Brings the page at `va` into a physical frame and installs its
    /// hardware mapping, claiming a frame from `vm` (possibly evicting
    /// another page) if it is not already resident.
    pub fn claim_page(&mut self, va: VirtAddr, vm: &mut VmSystem, hw: &mut dyn HardwareMap) -> Result<(), VmError> {
        let page_arc = self.find_page(va).ok_or(VmError::NotMapped)?;

        if page_arc.lock().frame.is_some() {
            return Ok(());
        }

        let frame = vm.frames.alloc(page_arc.clone(), hw, &mut vm.swap)?;
        let writable = {
            let mut page = page_arc.lock();
            let result = {
                let bytes = vm.frames.bytes_mut(&frame.lock());
                page::swap_in(&mut page, bytes, &mut vm.swap)
            };
            if let Err(e) = result {
                vm.frames.free(&frame.lock());
                return Err(e);
            }
            page.frame = Some(frame.clone());
            page.writable
        };
        hw.map(va, frame.lock().index, writable)?;
        Ok(())
    }

    /// Removes and returns the page at `va`, if any, without freeing its
    /// frame or swap slot — callers that actually want to tear a page
    /// down should use [`Spt::destroy`] instead.
    pub fn remove_page(&mut self, va: VirtAddr) -> Option<Arc<Mutex<Page>>> {
        self.pages.remove(&va)
    }

    /// Tears down every page in the table: evicted pages' swap slots are
    /// freed, resident pages' frames are freed (without writing them
    /// back — a process that is exiting has no further use for its own
    /// memory, though a dirty file-backed page is still flushed, since
    /// other processes may have the same file mapped).
    pub fn destroy(&mut self, vm: &mut VmSystem, hw: &mut dyn HardwareMap) {
        for (va, page_arc) in core::mem::take(&mut self.pages) {
            let mut page = page_arc.lock();
            if let Some(frame) = page.frame.take() {
                if let PageKind::File(_) = &page.kind {
                    if hw.is_dirty(va) {
                        let bytes = *vm.frames.bytes(&frame.lock());
                        let _ = page::swap_out(&mut page, &bytes, true, &mut vm.swap);
                    }
                }
                hw.unmap(va);
                vm.frames.free(&frame.lock());
            }
            page::destroy(&mut page, &mut vm.swap);
        }
    }

    /// Builds a child table that is a fork of `self`: resident pages are
    /// eagerly copied into freshly-claimed frames (the child must not
    /// share physical memory with the parent), while pages that are not
    /// currently resident are re-registered as uninitialized pages with
    /// the same lazy-load arguments, to be faulted in independently by
    /// the child later.
    pub fn fork_from(&self, vm: &mut VmSystem, hw: &mut dyn HardwareMap) -> Result<Spt, VmError> {
        let mut child = Spt::new();

        for (va, page_arc) in &self.pages {
            let page = page_arc.lock();
            match &page.kind {
                PageKind::Uninit(uninit) => {
                    child.alloc_page_with_initializer(*va, page.writable, uninit.target, uninit.aux.clone())?;
                }
                PageKind::Anon(_) if page.frame.is_some() => {
                    let mut bytes = [0u8; PGSIZE];
                    if let Some(frame) = &page.frame {
                        bytes = *vm.frames.bytes(&frame.lock());
                    }
                    child.alloc_page_with_initializer(*va, page.writable, TargetKind::Anon, LoadAux::zeroed())?;
                    child.claim_page(*va, vm, hw)?;
                    if let Some(child_page) = child.find_page(*va) {
                        let child_page = child_page.lock();
                        if let Some(frame) = &child_page.frame {
                            *vm.frames.bytes_mut(&frame.lock()) = bytes;
                        }
                    }
                }
                PageKind::Anon(_) => {
                    child.alloc_page_with_initializer(*va, page.writable, TargetKind::Anon, LoadAux::zeroed())?;
                }
                PageKind::File(file_page) => {
                    child.alloc_page_with_initializer(
                        *va,
                        page.writable,
                        TargetKind::File,
                        LoadAux {
                            file: Some(file_page.file.clone()),
                            offset: file_page.offset,
                            read_bytes: file_page.read_bytes,
                            mmap_index: Some(file_page.mmap_index),
                        },
                    )?;
                }
            }
        }

        Ok(child)
    }
}

impl Default for Spt {
    fn default() -> Spt {
        Spt::new()
    }
}
