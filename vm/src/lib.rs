// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Demand-paged virtual memory.
//!
//! Three components cooperate here:
//!
//! - The supplemental page table ([`spt::Spt`]) records, per process,
//!   which virtual pages exist and what backs them, independent of
//!   whether they're currently resident.
//! - The page dispatcher ([`page`]) is the per-kind behaviour of a page:
//!   how to bring it into a frame, how to evict it, how to destroy it.
//!   Rather than a table of function pointers per page (as the system
//!   this was modelled on does), each behaviour is a `match` arm over
//!   [`page::PageKind`] — idiomatic Rust's tagged union takes the place
//!   of a hand-rolled vtable.
//! - The frame and swap manager ([`frame`], [`swap`]) owns physical
//!   frames and swap slots, and picks eviction victims with a clock
//!   (second-chance) sweep over accessed bits.
//!
//! The disk, file system, and hardware page tables this crate depends on
//! are out of scope; [`collab`] defines the traits it expects them to
//! satisfy, so the crate can be exercised against fakes in tests and
//! against real drivers from the `kernel` crate.

#![no_std]

extern crate alloc;

pub mod collab;
pub mod fault;
pub mod frame;
pub mod mmap;
pub mod page;
pub mod spt;
pub mod swap;

pub use collab::{BackingFile, HardwareMap, SwapDisk, VmError};
pub use fault::handle_page_fault;
pub use frame::FrameTable;
pub use page::{Page, PageKind};
pub use spt::Spt;
pub use swap::SwapTable;

/// The size, in bytes, of a virtual memory page and a physical frame.
pub const PGSIZE: usize = 4096;
/// The size, in bytes, of one disk sector.
pub const DISK_SECTOR_SIZE: usize = 512;
/// The number of disk sectors a single page occupies in swap.
pub const SECTORS_PER_PAGE: usize = PGSIZE / DISK_SECTOR_SIZE;

/// Bundles the two global collaborators a running kernel has exactly one
/// of: the frame table and the swap table. Each process's [`Spt`] is kept
/// separate, since every process has its own.
pub struct VmSystem {
    pub frames: FrameTable,
    pub swap: SwapTable,
}

impl VmSystem {
    /// Creates a system with `frame_count` physical frames and
    /// `swap_slots` page-sized swap slots backed by `disk`.
    pub fn new(
        frame_count: usize,
        swap_slots: usize,
        disk: alloc::sync::Arc<spin::Mutex<dyn SwapDisk>>,
    ) -> VmSystem {
        VmSystem {
            frames: FrameTable::new(frame_count),
            swap: SwapTable::new(swap_slots, disk),
        }
    }
}
