//! Preemptive, priority-driven real-time microkernel core: RMS scheduling
//! with PCP mutexes, per-thread MPU protection, for a single-core Cortex-M
//! with two stack pointers (privileged/unprivileged).
//!
//! This crate implements only the threading subsystem (thread lifecycle,
//! the RMS+PCP scheduler, tick accounting, MPU region programming, and the
//! system-call surface driving them). Device drivers, the SVC demultiplexer,
//! the kernel entry sequence, and a heap-break allocator are explicitly out
//! of scope and are the concern of a platform crate built on top of this
//! one — `demos/` shows two such platforms.
//!
//! Grown out of a much smaller teaching sample (`ThreadsState`/
//! `create_thread`/`SysTick`, once this crate's whole `lib.rs`): the same
//! "TCBs in a fixed array, priority slot equals index" shape, generalized to
//! two stacks per thread, PCP mutexes, and MPU-backed per-thread protection.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod admission;
pub mod context;
pub mod error;
pub mod fault;
pub mod mpu;
pub mod mutex;
pub mod sched;
pub mod syscall;
pub mod tcb;
pub mod time;
pub mod uart;

pub use error::{KernelError, Result};
pub use tcb::ThreadState;

use mutex::MutexTable;
use tcb::TcbTable;

/// Reserved priority slot for the idle thread (spec §6).
pub const IDLE_PRIORITY_SLOT: u8 = tcb::IDLE_SLOT;
/// Reserved priority slot for the fallback-main thread (spec §6).
pub const MAIN_PRIORITY_SLOT: u8 = tcb::MAIN_SLOT;
/// `thread_init`'s `max_threads` ceiling (spec §6).
pub const MAX_USER_THREADS: usize = tcb::MAX_USER_THREADS;
/// `thread_init`'s `max_mutexes` ceiling (spec §6).
pub const MAX_MUTEXES: usize = mutex::MAX_MUTEXES;
/// Minimum MPU region size in bytes (spec §3.4).
pub const MIN_REGION_SIZE: u32 = mpu::MIN_REGION_SIZE;

/// Per-thread vs. kernel-aggregate MPU programming for regions 6/7 (spec
/// §4.4 step 6, §6 `thread_init`'s `protection_mode`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtectionMode {
    /// Regions 6/7 track the currently-running thread's own stack windows.
    PerThread,
    /// Regions 6/7 cover the aggregate kernel stack range for every thread.
    KernelOnly,
}

/// The single kernel-wide mutable aggregate (spec §9 "global mutable
/// state"): the TCB table, the mutex table, and the handful of scalars the
/// scheduler and syscall surface need. Mutated only from privileged
/// (interrupt or supervisor-call) context, per spec §5.
pub struct KernelState {
    pub tcbs: TcbTable,
    pub mutexes: MutexTable,
    /// Ticks since `scheduler_start` (spec §6 `get_time`).
    pub sys_ticks: u32,
    pub protection_mode: ProtectionMode,
    /// Was the outgoing thread inside a supervisor call when preempted?
    /// Round-tripped through `schedule` (spec §4.4 steps 2, 7).
    pub pending_svc_state: bool,
    /// Base address of the aggregate unprivileged kernel-stack range, used
    /// by `ProtectionMode::KernelOnly` (spec §4.4 step 6).
    pub kernel_unpriv_stacks_low: u32,
    /// Base address of the aggregate privileged kernel-stack range.
    pub kernel_priv_stacks_low: u32,
    /// Size in bytes of each aggregate kernel-stack range.
    pub kernel_stacks_size: u32,
    /// `thread_init`'s `max_threads` — the configured cap on live (non-INIT)
    /// user TCBs, enforced by [`crate::admission::admit`]. `0` until
    /// `thread_init` runs, which refuses every `thread_create`.
    pub max_threads: usize,
    /// `thread_init`'s `stack_size`, rounded up to a power of two: the
    /// per-thread stack window size every `thread_create`d thread gets
    /// (spec §4.2).
    pub stack_size_bytes: u32,
    /// `thread_init` has run.
    pub inited: bool,
    /// `scheduler_start` has run; `thread_create` must refuse to run after
    /// this (spec §1 Non-goals: "no dynamic thread creation after the
    /// scheduler starts").
    pub scheduler_started: bool,
}

impl KernelState {
    pub const fn new() -> Self {
        KernelState {
            tcbs: TcbTable::new(),
            mutexes: MutexTable::new(),
            sys_ticks: 0,
            protection_mode: ProtectionMode::PerThread,
            pending_svc_state: false,
            kernel_unpriv_stacks_low: 0,
            kernel_priv_stacks_low: 0,
            kernel_stacks_size: MIN_REGION_SIZE,
            max_threads: 0,
            stack_size_bytes: MIN_REGION_SIZE,
            inited: false,
            scheduler_started: false,
        }
    }
}

impl Default for KernelState {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide kernel state (spec §9: "Represent them as a single
/// statically-allocated aggregate behind a privileged-access discipline").
static mut KERNEL_STATE: KernelState = KernelState::new();

/// Access the single kernel-global state.
///
/// # Safety
/// Caller must be in privileged context with the discipline spec §5
/// describes: either already non-reentrant (an ISR/supervisor-call body
/// that does not itself get preempted by another user of this function), or
/// have interrupts disabled around any multi-word update.
pub unsafe fn global_state() -> &'static mut KernelState {
    unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_STATE) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_state_starts_uninitialized() {
        let state = KernelState::new();
        assert!(!state.inited);
        assert!(!state.scheduler_started);
        assert_eq!(state.sys_ticks, 0);
        assert_eq!(state.mutexes.system_ceiling, mutex::INFINITY);
    }
}
