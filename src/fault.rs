//! Memory-fault classification and handling (spec §4.8).
//!
//! Grounded almost directly on `mm_c_handler` in
//! `examples/original_source/kernel/src/mpu.c`: same CFSR bit names, same
//! stack-overflow-vs-kill-thread decision, same "idle/main is fatal to the
//! whole process" rule.

use crate::tcb::{IDLE_SLOT, MAIN_SLOT};
use crate::KernelState;

/// Configurable Fault Status Register bits (Armv7-M), named exactly as
/// `mpu.c` names them.
const MSTKERR: u32 = 1 << 4;
const MUNSTKERR: u32 = 1 << 3;
const DACCVIOL: u32 = 1 << 1;
const IACCVIOL: u32 = 1 << 0;
const MMARVALID: u32 = 1 << 7;

/// What the memory-fault handler decided to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultOutcome {
    /// Stack overflow, or a fault while running idle/main: abort the process.
    AbortProcess,
    /// Ordinary access violation in a user thread: kill only that thread.
    KillCurrentThread,
}

/// Classify a CFSR snapshot and the faulting unprivileged SP, and decide the
/// outcome (spec §4.8). Does not itself call `sys_exit`/`thread_kill` — the
/// platform-level fault vector does that with the returned [`FaultOutcome`],
/// keeping this function pure and host-testable.
pub fn classify_and_handle(state: &KernelState, cfsr: u32, faulting_psp: u32) -> FaultOutcome {
    #[cfg(feature = "log")]
    {
        log::debug!("memory protection fault, cfsr={cfsr:#x}");
        if cfsr & MSTKERR != 0 {
            log::warn!("stacking error");
        }
        if cfsr & MUNSTKERR != 0 {
            log::warn!("unstacking error");
        }
        if cfsr & DACCVIOL != 0 {
            log::warn!("data access violation");
        }
        if cfsr & IACCVIOL != 0 {
            log::warn!("instruction access violation");
        }
        if cfsr & MMARVALID != 0 {
            log::warn!("faulting address valid");
        }
    }

    let running = state.tcbs.running;
    let process_bottom = state.tcbs.tcbs[running as usize].unpriv_stack.base;

    // The pre-fault exception frame has already been pushed, potentially
    // clobbering whatever sits just below the thread's stack window — this
    // case is unrecoverable (spec §4.8, §7).
    if faulting_psp < process_bottom {
        return FaultOutcome::AbortProcess;
    }

    if running == IDLE_SLOT || running == MAIN_SLOT {
        return FaultOutcome::AbortProcess;
    }

    FaultOutcome::KillCurrentThread
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcb::StackWindow;

    fn state_with_running(slot: u8, stack_base: u32) -> KernelState {
        let mut state = KernelState::new();
        state.tcbs.running = slot;
        state.tcbs.tcbs[slot as usize].unpriv_stack = StackWindow { base: stack_base, size: 256 };
        state
    }

    /// Scenario S5 from spec §8.
    #[test]
    fn s5_stack_overflow_is_fatal() {
        let state = state_with_running(3, 0x2000_0100);
        let outcome = classify_and_handle(&state, MSTKERR, 0x2000_0050);
        assert_eq!(outcome, FaultOutcome::AbortProcess);
    }

    #[test]
    fn ordinary_violation_in_user_thread_kills_only_that_thread() {
        let state = state_with_running(3, 0x2000_0000);
        let outcome = classify_and_handle(&state, DACCVIOL, 0x2000_0080);
        assert_eq!(outcome, FaultOutcome::KillCurrentThread);
    }

    #[test]
    fn violation_while_running_idle_aborts_process() {
        let state = state_with_running(IDLE_SLOT, 0x2000_0000);
        let outcome = classify_and_handle(&state, IACCVIOL, 0x2000_0080);
        assert_eq!(outcome, FaultOutcome::AbortProcess);
    }

    #[test]
    fn violation_while_running_main_aborts_process() {
        let state = state_with_running(MAIN_SLOT, 0x2000_0000);
        let outcome = classify_and_handle(&state, IACCVIOL, 0x2000_0080);
        assert_eq!(outcome, FaultOutcome::AbortProcess);
    }
}
