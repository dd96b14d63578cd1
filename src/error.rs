//! Kernel error taxonomy.
//!
//! Internal, fallible operations return [`KernelError`]; the public syscall
//! surface in [`crate::syscall`] collapses these to the `0`/`-1` convention
//! of the original C interface (errors never cross a thread boundary, see
//! spec §7).

use core::fmt;

/// Everything that can go wrong inside the kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelError {
    /// `thread_create` would push utilization over the Liu-Layland bound.
    NotSchedulable,
    /// `thread_create` priority collides with an existing non-INIT user TCB.
    DuplicatePriority,
    /// TCB table or mutex table is full.
    CapacityExceeded,
    /// `T == 0` in `thread_create`.
    ZeroPeriod,
    /// `thread_create` called after `scheduler_start` (spec §1 Non-goals: no
    /// dynamic thread creation once the scheduler is running).
    SchedulerAlreadyStarted,
    /// Requested stack does not fit the configured window.
    StackTooSmall,
    /// `thread_create` called before `thread_init`.
    NotInitialized,
    /// `mutex_lock` by a thread whose static priority is numerically greater
    /// than the mutex's ceiling.
    InsufficientCeiling,
    /// `mutex_unlock` by a thread that is not the current owner.
    NotOwner,
    /// `thread_kill` (or a fault) on a thread that still holds a mutex.
    KilledWhileHolding,
    /// MPU region number out of range.
    BadRegion,
    /// MPU region base address is not aligned to its size.
    Misaligned,
    /// MPU region size is below the 32-byte minimum.
    RegionTooSmall,
    /// UART ring buffer has no room for another byte.
    RingBufferFull,
    /// UART ring buffer has no byte to hand back.
    RingBufferEmpty,
}

impl KernelError {
    /// The `-1`-convention code this error maps to at the syscall boundary.
    ///
    /// Every error currently maps to the same sentinel; kept as a method
    /// (rather than a bare constant) so a future caller can match on
    /// `KernelError` before throwing it away.
    pub const fn as_syscall_code(self) -> i32 {
        -1
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::NotSchedulable => "task set would violate the Liu-Layland bound",
            KernelError::DuplicatePriority => "priority already in use by a non-INIT thread",
            KernelError::CapacityExceeded => "table is at capacity",
            KernelError::ZeroPeriod => "period T must be nonzero",
            KernelError::SchedulerAlreadyStarted => "thread_create called after scheduler_start",
            KernelError::StackTooSmall => "stack smaller than minimum region size",
            KernelError::NotInitialized => "thread_create called before thread_init",
            KernelError::InsufficientCeiling => "mutex ceiling lower than locking thread's priority",
            KernelError::NotOwner => "unlock attempted by non-owner",
            KernelError::KilledWhileHolding => "thread terminated while holding a mutex",
            KernelError::BadRegion => "invalid MPU region number",
            KernelError::Misaligned => "MPU region base not aligned to its size",
            KernelError::RegionTooSmall => "MPU region smaller than 32 bytes",
            KernelError::RingBufferFull => "ring buffer full",
            KernelError::RingBufferEmpty => "ring buffer empty",
        };
        f.write_str(msg)
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;
