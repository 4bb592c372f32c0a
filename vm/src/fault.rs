// Copyright 2026 The Meridian Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The page fault handler.

use memlayout::{in_stack_growth_window, USERSPACE};
use x86_64::VirtAddr;

use crate::collab::HardwareMap;
use crate::page::TargetKind;
use crate::spt::Spt;
use crate::{VmError, VmSystem, PGSIZE};

/// Handles a page fault at `fault_addr`.
///
/// `user` is the hardware fault error code's "user" bit: a fault that
/// didn't originate from user-mode code, or that targets an address
/// outside the user half of the address space, is never something this
/// handler can resolve — the caller should treat it as a kernel bug
/// (panic) rather than routing it here in the first place, but it is
/// rejected here too in case it slips through. `write` is whether the
/// faulting access was a write. `user_stack_pointer` is the stack
/// pointer saved in the trap frame, used by the stack-growth heuristic
/// below.
///
/// On success, the faulting page is resident and mapped; the caller
/// should simply resume the faulting instruction. On failure, the
/// caller should terminate the process that faulted.
pub fn handle_page_fault(
    spt: &mut Spt,
    vm: &mut VmSystem,
    hw: &mut dyn HardwareMap,
    fault_addr: VirtAddr,
    user_stack_pointer: VirtAddr,
    user: bool,
    write: bool,
) -> Result<(), VmError> {
    if !user || !USERSPACE.contains_addr(fault_addr) {
        return Err(VmError::InvalidAccess);
    }

    let page_va = VirtAddr::new(fault_addr.as_u64() & !(PGSIZE as u64 - 1));

    match spt.find_page(page_va) {
        Some(page) => {
            if write && !page.lock().writable {
                return Err(VmError::InvalidAccess);
            }
        }
        None => {
            // A fault at an address with no page registered is only
            // legitimate if it's a stack-growth request: within the
            // window below the stack's starting address, and no more
            // than 8 bytes below the saved stack pointer (the deepest a
            // `push`/`call` can reach past `rsp` before adjusting it).
            let looks_like_stack_growth = in_stack_growth_window(fault_addr)
                && fault_addr.as_u64() + 8 >= user_stack_pointer.as_u64();
            if !looks_like_stack_growth {
                return Err(VmError::InvalidAccess);
            }
            spt.alloc_page_with_initializer(page_va, true, TargetKind::Anon, crate::page::LoadAux::zeroed())?;
        }
    }

    spt.claim_page(page_va, vm, hw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameTable;
    use crate::page::LoadAux;
    use crate::swap::tests::fake_swap_table;
    use memlayout::USER_STACK_TOP;

    struct FakeHardware;
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
        fn is_dirty(&self, _va: VirtAddr) -> bool {
            false
        }
        fn clear_dirty(&mut self, _va: VirtAddr) {}
        fn is_accessed(&self, _va: VirtAddr) -> bool {
            false
        }
        fn clear_accessed(&mut self, _va: VirtAddr) {}
    }

    fn fake_vm() -> VmSystem {
        VmSystem {
            frames: FrameTable::new(8),
            swap: fake_swap_table(8),
        }
    }

    #[test]
    fn faulting_on_a_registered_page_claims_it() {
        let mut spt = Spt::new();
        let mut vm = fake_vm();
        let mut hw = FakeHardware;
        let va = VirtAddr::new(0x40_0000);
        spt.alloc_page_with_initializer(va, true, TargetKind::Anon, LoadAux::zeroed()).unwrap();

        handle_page_fault(&mut spt, &mut vm, &mut hw, va, VirtAddr::new(0x40_0000), true, false).unwrap();
        assert!(spt.find_page(va).unwrap().lock().frame.is_some());
    }

    #[test]
    fn stack_growth_within_window_creates_a_page() {
        let mut spt = Spt::new();
        let mut vm = fake_vm();
        let mut hw = FakeHardware;
        let rsp = USER_STACK_TOP - 16u64;

        handle_page_fault(&mut spt, &mut vm, &mut hw, rsp, rsp, true, true).unwrap();
        assert_eq!(spt.len(), 1);
    }

    #[test]
    fn wild_address_is_rejected() {
        let mut spt = Spt::new();
        let mut vm = fake_vm();
        let mut hw = FakeHardware;

        let result = handle_page_fault(&mut spt, &mut vm, &mut hw, VirtAddr::new(0xdead_0000), VirtAddr::new(0x7fff_0000), true, false);
        assert_eq!(result, Err(VmError::InvalidAccess));
    }

    /// Spec scenario: one byte below the stack-growth window's floor is a
    /// genuine access violation, not a stack-growth request — even though
    /// the saved stack pointer sits right above the faulting address, the
    /// same way a too-deep `push` immediately below a 1 MiB stack would.
    #[test]
    fn fault_one_byte_below_the_growth_window_is_rejected() {
        let mut spt = Spt::new();
        let mut vm = fake_vm();
        let mut hw = FakeHardware;

        let addr = USER_STACK_TOP - 1024 * 1024 - 1u64;
        let rsp = addr + 4u64;
        let result = handle_page_fault(&mut spt, &mut vm, &mut hw, addr, rsp, true, true);
        assert_eq!(result, Err(VmError::InvalidAccess));
        assert!(spt.is_empty());
    }
}
