//! Priority-ceiling-protocol mutexes (spec §3.3, §4.5).
//!
//! `syscall_mutex.h` is `#include`d by the original `syscall_thread.c` but
//! was not itself retrieved into `examples/original_source/` — this module
//! is built from spec.md's own description of the table (ceiling, owner,
//! sequence id, global locked bitmap, `system_ceiling`) rather than a source
//! file to imitate directly.

use crate::error::{KernelError, Result};
use crate::tcb::TcbTable;

/// Maximum number of mutexes (`thread_init`'s `max_mutexes` ceiling, spec §6).
pub const MAX_MUTEXES: usize = 32;

/// Sentinel for "no mutex locked" — `system_ceiling == INFINITY` (spec §3.3).
/// `255` is safe: priorities only range `0..=15` (spec §6).
pub const INFINITY: u8 = u8::MAX;

/// A single PCP mutex.
#[derive(Clone, Copy, Debug)]
pub struct Mutex {
    /// Ceiling: highest static priority of any thread permitted to lock it.
    pub max_prior: u8,
    pub owner: Option<u8>,
    pub locked: bool,
    pub seq: u32,
}

impl Mutex {
    pub const fn empty() -> Self {
        Mutex { max_prior: INFINITY, owner: None, locked: false, seq: 0 }
    }
}

/// Result of a single lock attempt (spec §4.5's retry loop is driven by the
/// caller — see [`crate::syscall::mutex_lock`] — not by this module, so the
/// scheduling logic here stays host-testable without a scheduler in hand).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// Caller must set the thread blocked, pend the scheduler, and retry.
    Blocked,
    /// Already owned by the calling thread; warn-and-return, no-op (spec §4.5,
    /// §9 open question: no reference count).
    AlreadyOwned,
}

pub struct MutexTable {
    pub mutexes: [Mutex; MAX_MUTEXES],
    pub count: usize,
    /// Minimum `max_prior` among currently-locked mutexes, or [`INFINITY`].
    pub system_ceiling: u8,
}

impl MutexTable {
    pub const fn new() -> Self {
        MutexTable {
            mutexes: [Mutex::empty(); MAX_MUTEXES],
            count: 0,
            system_ceiling: INFINITY,
        }
    }

    pub fn init(&mut self, max_prior: u8) -> Result<usize> {
        if self.count >= MAX_MUTEXES {
            return Err(KernelError::CapacityExceeded);
        }
        let idx = self.count;
        self.mutexes[idx] = Mutex { max_prior, owner: None, locked: false, seq: 0 };
        self.count += 1;
        Ok(idx)
    }

    fn recompute_ceiling(&mut self) {
        self.system_ceiling = self.mutexes[..self.count]
            .iter()
            .filter(|m| m.locked)
            .map(|m| m.max_prior)
            .min()
            .unwrap_or(INFINITY);
    }

    /// TCB index of the thread currently holding the mutex whose ceiling
    /// equals `system_ceiling` — the "highest locker" of spec §4.4 step 4 and
    /// §4.5. `None` if nothing is locked.
    pub fn highest_locker(&self) -> Option<u8> {
        self.mutexes[..self.count]
            .iter()
            .find(|m| m.locked && m.max_prior == self.system_ceiling)
            .and_then(|m| m.owner)
    }

    /// `true` if `slot` currently owns any locked mutex (used by
    /// `wait_until_next_period` and kill-while-holding checks, spec §4.6/§4.7).
    pub fn thread_holds_any(&self, slot: u8) -> bool {
        self.mutexes[..self.count]
            .iter()
            .any(|m| m.locked && m.owner == Some(slot))
    }

    /// One lock attempt for `running` on mutex `idx` (spec §4.5).
    pub fn try_lock(&mut self, idx: usize, table: &mut TcbTable, running: u8) -> Result<LockOutcome> {
        let c = table.tcbs[running as usize].priority;
        let ceiling = self.mutexes[idx].max_prior;

        if ceiling > c {
            return Err(KernelError::InsufficientCeiling);
        }

        if self.mutexes[idx].locked && self.mutexes[idx].owner == Some(running) {
            return Ok(LockOutcome::AlreadyOwned);
        }

        let highest_locker = self.highest_locker();
        if self.system_ceiling <= c && highest_locker != Some(running) {
            table.tcbs[running as usize].blocked = true;
            return Ok(LockOutcome::Blocked);
        }

        self.mutexes[idx].locked = true;
        self.mutexes[idx].owner = Some(running);
        self.mutexes[idx].seq = self.mutexes[idx].seq.wrapping_add(1);
        table.tcbs[running as usize].blocked = false;
        self.recompute_ceiling();

        let tcb = &mut table.tcbs[running as usize];
        tcb.eff_priority = tcb.eff_priority.min(ceiling);

        Ok(LockOutcome::Acquired)
    }

    /// Release `idx`, held by `running` (spec §4.5). Returns
    /// [`KernelError::NotOwner`] if `running` does not hold it — a contract
    /// violation, fatal to the caller per spec §7.
    pub fn unlock(&mut self, idx: usize, table: &mut TcbTable, running: u8) -> Result<()> {
        if !self.mutexes[idx].locked {
            return Ok(()); // warn-and-return, spec §4.5
        }
        if self.mutexes[idx].owner != Some(running) {
            return Err(KernelError::NotOwner);
        }

        self.mutexes[idx].locked = false;
        self.mutexes[idx].owner = None;
        self.recompute_ceiling();

        table.tcbs[running as usize].eff_priority = table.tcbs[running as usize].priority;
        Ok(())
    }
}

impl Default for MutexTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcb::ThreadState;

    fn runnable(table: &mut TcbTable, slot: u8, priority: u8) {
        table.tcbs[slot as usize].state = ThreadState::Runnable;
        table.tcbs[slot as usize].priority = priority;
        table.tcbs[slot as usize].eff_priority = priority;
    }

    /// Scenario S3 from spec §8.
    #[test]
    fn s3_priority_inheritance() {
        let mut table = TcbTable::new();
        runnable(&mut table, 2, 2); // L
        runnable(&mut table, 0, 0); // H
        runnable(&mut table, 1, 1); // middle, unused directly here

        let mut mutexes = MutexTable::new();
        let m = mutexes.init(0).unwrap();

        // L locks M.
        assert_eq!(mutexes.try_lock(m, &mut table, 2).unwrap(), LockOutcome::Acquired);
        assert_eq!(mutexes.system_ceiling, 0);
        assert_eq!(table.tcbs[2].eff_priority, 0, "L inherits the ceiling immediately");

        // H attempts to lock M: blocks, since system_ceiling(0) <= H's priority(0)
        // and H is not the highest locker.
        assert_eq!(mutexes.try_lock(m, &mut table, 0).unwrap(), LockOutcome::Blocked);
        assert!(table.tcbs[0].blocked);

        // L releases M.
        mutexes.unlock(m, &mut table, 2).unwrap();
        assert_eq!(mutexes.system_ceiling, INFINITY);
        assert_eq!(table.tcbs[2].eff_priority, 2, "L's effective priority is relinquished");

        // H now proceeds.
        assert_eq!(mutexes.try_lock(m, &mut table, 0).unwrap(), LockOutcome::Acquired);
    }

    /// Scenario S4 from spec §8.
    #[test]
    fn s4_ceiling_violation_kills_caller() {
        let mut table = TcbTable::new();
        runnable(&mut table, 5, 5);
        let mut mutexes = MutexTable::new();
        let m = mutexes.init(1).unwrap();
        let err = mutexes.try_lock(m, &mut table, 5).unwrap_err();
        assert_eq!(err, KernelError::InsufficientCeiling);
    }

    #[test]
    fn reentrant_lock_is_a_noop() {
        let mut table = TcbTable::new();
        runnable(&mut table, 2, 2);
        let mut mutexes = MutexTable::new();
        let m = mutexes.init(2).unwrap();
        assert_eq!(mutexes.try_lock(m, &mut table, 2).unwrap(), LockOutcome::Acquired);
        assert_eq!(mutexes.try_lock(m, &mut table, 2).unwrap(), LockOutcome::AlreadyOwned);
    }

    #[test]
    fn unlock_by_non_owner_is_a_contract_violation() {
        let mut table = TcbTable::new();
        runnable(&mut table, 2, 2);
        runnable(&mut table, 3, 3);
        let mut mutexes = MutexTable::new();
        let m = mutexes.init(3).unwrap();
        mutexes.try_lock(m, &mut table, 2).unwrap();
        assert_eq!(mutexes.unlock(m, &mut table, 3), Err(KernelError::NotOwner));
    }

    #[test]
    fn nested_lock_by_ceiling_holder_succeeds() {
        let mut table = TcbTable::new();
        runnable(&mut table, 2, 2);
        let mut mutexes = MutexTable::new();
        let a = mutexes.init(0).unwrap();
        let b = mutexes.init(0).unwrap();
        assert_eq!(mutexes.try_lock(a, &mut table, 2).unwrap(), LockOutcome::Acquired);
        // same thread, already the highest locker (system_ceiling == 0 == its ceiling)
        assert_eq!(mutexes.try_lock(b, &mut table, 2).unwrap(), LockOutcome::Acquired);
    }
}
