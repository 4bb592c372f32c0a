// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Constants describing the parts of the virtual address space the
//! scheduler and virtual memory manager care about.
//!
//! This is a deliberately small slice of a full kernel's memory layout
//! crate: just enough to know where a user stack starts, how far it is
//! allowed to grow, and where the kernel's own stacks live.

#![no_std]

use x86_64::VirtAddr;

/// The first half of virtual memory, used by userspace processes.
pub const USERSPACE: VirtAddrRange = VirtAddrRange::new(USERSPACE_START, USERSPACE_END);
const USERSPACE_START: VirtAddr = const_virt_addr(0x20_0000_u64);
const USERSPACE_END: VirtAddr = const_virt_addr(0x7fff_ffff_ffff_u64);

/// The highest address in a user stack, one page below the top of
/// userspace. Each user thread's stack grows downward from here.
pub const USER_STACK_TOP: VirtAddr = const_virt_addr(0x7fff_ffff_f000_u64);

/// The largest a single user stack is allowed to grow to, measured
/// downward from [`USER_STACK_TOP`]. A fault below this window is a
/// genuine access violation, not a stack-growth request.
pub const USER_STACK_LIMIT: u64 = 1024 * 1024;

/// The region used for kernel stacks, one per kernel thread.
pub const KERNEL_STACK: VirtAddrRange = VirtAddrRange::new(KERNEL_STACK_START, KERNEL_STACK_END);
const KERNEL_STACK_START: VirtAddr = const_virt_addr(0xffff_8000_5555_0000_u64);
const KERNEL_STACK_END: VirtAddr = const_virt_addr(0xffff_8000_5d5c_ffff_u64);

/// Returns whether `addr` falls within the stack-growth window below
/// [`USER_STACK_TOP`]: at or above `USER_STACK_TOP - USER_STACK_LIMIT`,
/// and at or below `USER_STACK_TOP`.
pub fn in_stack_growth_window(addr: VirtAddr) -> bool {
    let low = USER_STACK_TOP - USER_STACK_LIMIT;
    addr >= low && addr <= USER_STACK_TOP
}

/// Represents a contiguous, inclusive range of virtual addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VirtAddrRange {
    first: VirtAddr,
    last: VirtAddr,
}

impl VirtAddrRange {
    /// Returns a new range, from `start` to `end` (inclusive).
    ///
    /// # Panics
    ///
    /// Panics if `start` is not smaller than `end`.
    pub const fn new(start: VirtAddr, end: VirtAddr) -> Self {
        if start.as_u64() >= end.as_u64() {
            panic!("invalid virtual address range: start is not smaller than end");
        }

        VirtAddrRange {
            first: start,
            last: end,
        }
    }

    /// Returns the first address in the range.
    pub const fn start(&self) -> VirtAddr {
        self.first
    }

    /// Returns the last address in the range.
    pub const fn end(&self) -> VirtAddr {
        self.last
    }

    /// Returns the number of addresses in the range.
    pub const fn size(&self) -> u64 {
        (self.last.as_u64() + 1u64) - self.first.as_u64()
    }

    /// Returns whether `other` lies entirely within (or equals) this range.
    pub const fn contains(&self, other: &VirtAddrRange) -> bool {
        self.first.as_u64() <= other.first.as_u64() && other.last.as_u64() <= self.last.as_u64()
    }

    /// Returns whether `addr` lies within this range.
    pub const fn contains_addr(&self, addr: VirtAddr) -> bool {
        self.first.as_u64() <= addr.as_u64() && addr.as_u64() <= self.last.as_u64()
    }
}

/// Builds a canonical virtual address at compile time, sign-extending a
/// 48-bit address into a 64-bit one as the hardware requires.
const fn const_virt_addr(addr: u64) -> VirtAddr {
    let top_bits = (addr & 0xffff_8000_0000_0000u64) >> 47;
    match top_bits {
        0 => unsafe { VirtAddr::new_unsafe(addr) },
        0x1ffff => unsafe { VirtAddr::new_unsafe(addr) },
        1 => VirtAddr::new_truncate(addr),
        _ => panic!("invalid virtual address"),
    }
}
