//! Liu-Layland utilization-bound admission test (spec §4.1).
//!
//! Values match `ub_table` in `syscall_thread.c` of the original C kernel
//! (`n * (2^(1/n) - 1)`, precomputed rather than calling `powf` at runtime).

use crate::error::{KernelError, Result};
use crate::tcb::{TcbTable, IDLE_SLOT};

/// `LL[n]` for `n` in `0..=31`. `LL[0] == 0.0`, `LL[1] == 1.0`.
pub const LL: [f32; 32] = [
    0.000, 1.000, 0.8284, 0.7798, 0.7568, 0.7435, 0.7348, 0.7286, 0.7241, 0.7205, 0.7177, 0.7155,
    0.7136, 0.7119, 0.7106, 0.7094, 0.7083, 0.7075, 0.7066, 0.7059, 0.7052, 0.7047, 0.7042,
    0.7037, 0.7033, 0.7028, 0.7025, 0.7021, 0.7018, 0.7015, 0.7012, 0.7009,
];

/// Admit (or reject) a proposed `(priority, C, T)` user thread against the
/// `max_threads` cap `thread_init` configured (spec §4.1: "all user slots
/// are full" is relative to the configured cap, not the slot table's
/// hardware capacity).
///
/// Idle-thread creation bypasses this entirely (spec §4.1: "the idle thread
/// is exempt"); callers creating the idle thread must not call `admit`.
pub fn admit(table: &TcbTable, max_threads: usize, priority: u8, c: u32, t: u32) -> Result<()> {
    if t == 0 {
        return Err(KernelError::ZeroPeriod);
    }
    if priority as usize >= IDLE_SLOT as usize {
        return Err(KernelError::CapacityExceeded);
    }
    if table.priority_in_use(priority) {
        return Err(KernelError::DuplicatePriority);
    }
    if table.non_init_user_count() >= max_threads {
        return Err(KernelError::CapacityExceeded);
    }

    let u_new = c as f32 / t as f32;
    let u_sum = table.utilization_sum() + u_new;
    let n = table.non_init_user_count() + 1;
    let bound = LL[n.min(LL.len() - 1)];

    if u_sum > bound {
        return Err(KernelError::NotSchedulable);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcb::{ThreadState, MAX_USER_THREADS};

    /// Scenario S1 from spec §8.
    #[test]
    fn s1_ub_rejection() {
        let mut table = TcbTable::new();
        // thread_init(max=3, stack=256, idle=none, per-thread, max_mutexes=0)
        admit(&table, 3, 0, 1, 2).expect("U=0.5 accepted");
        table.tcbs[0].state = ThreadState::Runnable;
        table.tcbs[0].budget = 1;
        table.tcbs[0].period = 2;

        let err = admit(&table, 3, 1, 2, 3).expect_err("U_sum=1.167 > LL(2)=0.828");
        assert_eq!(err, KernelError::NotSchedulable);
    }

    #[test]
    fn zero_period_rejected() {
        let table = TcbTable::new();
        assert_eq!(admit(&table, MAX_USER_THREADS, 0, 1, 0), Err(KernelError::ZeroPeriod));
    }

    #[test]
    fn duplicate_priority_rejected() {
        let mut table = TcbTable::new();
        table.tcbs[3].state = ThreadState::Runnable;
        table.tcbs[3].priority = 3;
        table.tcbs[3].budget = 1;
        table.tcbs[3].period = 100;
        assert_eq!(
            admit(&table, MAX_USER_THREADS, 3, 1, 100),
            Err(KernelError::DuplicatePriority)
        );
    }

    #[test]
    fn idle_and_main_slots_rejected_as_user_priority() {
        let table = TcbTable::new();
        assert_eq!(
            admit(&table, MAX_USER_THREADS, IDLE_SLOT, 1, 10),
            Err(KernelError::CapacityExceeded)
        );
    }

    /// The `thread_init`-configured cap, not the hardware slot table size,
    /// is what "all user slots are full" is measured against (spec §4.1,
    /// the bug this regresses: `thread_init(max=3, ...)` must reject a 4th
    /// thread even though the table has room for up to `MAX_USER_THREADS`).
    #[test]
    fn configured_cap_rejects_before_table_capacity() {
        let mut table = TcbTable::new();
        for slot in 0..3u8 {
            table.tcbs[slot as usize].state = ThreadState::Runnable;
            table.tcbs[slot as usize].priority = slot;
            table.tcbs[slot as usize].budget = 1;
            table.tcbs[slot as usize].period = 1000;
        }
        assert_eq!(admit(&table, 3, 3, 1, 1000), Err(KernelError::CapacityExceeded));
        assert_eq!(admit(&table, MAX_USER_THREADS, 3, 1, 1000), Ok(()));
    }
}
