//! The public system-call surface (spec §6): `thread_init`, `thread_create`,
//! `scheduler_start`, `thread_kill`, `wait_until_next_period`,
//! `mutex_init`/`lock`/`unlock`, `get_time`, `get_priority`, `thread_time`,
//! and `sys_exit` (spec §6 "Exit codes", supplemented from
//! `examples/original_source/kernel/src/syscall.c`).
//!
//! Each call here is the body a platform's SVC demultiplexer dispatches
//! into; none of them touch the demultiplexer itself (out of scope, spec
//! §1). Every call is expressed in terms of [`crate::tcb`], [`crate::mutex`],
//! [`crate::admission`], [`crate::context`], and [`crate::sched`] rather than
//! duplicating their logic.

use crate::admission;
use crate::context;
use crate::error::{KernelError, Result};
use crate::mpu;
use crate::mutex::LockOutcome;
use crate::sched;
use crate::tcb::{StackWindow, Tcb, ThreadState, IDLE_SLOT, MAIN_SLOT, NUM_SLOTS};
use crate::uart::UartPort;
use crate::{KernelState, ProtectionMode};

/// Arguments to `thread_init` (spec §6's row: "max_threads ≤ 14,
/// stack_size (words), idle_fn-or-none, protection_mode, max_mutexes ≤ 32").
pub struct InitConfig {
    pub max_threads: usize,
    /// Uniform per-thread stack size, in words, applied to every thread's
    /// two stacks (spec §4.2: "sized as the initialization-time
    /// `stack_size` rounded up to the next power-of-two bytes").
    pub stack_size_words: usize,
    /// Custom idle-thread body, or `None` for the default wait-for-event
    /// loop (spec §6's "idle_fn-or-none").
    pub idle_fn: Option<extern "C" fn(u32) -> !>,
    pub protection_mode: ProtectionMode,
    pub max_mutexes: usize,
}

/// Per-slot capacity reserved in the stack arena, in bytes: an upper bound
/// any `thread_init`-configured `stack_size` must fit inside, and (since
/// it is itself a power of two) an alignment large enough that slot `i`'s
/// base (`arena_base + i * STACK_SLOT_BYTES`) is always aligned to
/// whatever smaller power-of-two region size the configured `stack_size`
/// rounds up to (spec §3.4's region-alignment invariant).
///
/// This is the runtime analogue of the linker-placed, per-thread-indexed
/// stack pool `original_source/kernel/src/syscall_thread.c`'s
/// `sys_thread_init` slices out of `__thread_u_stacks_low`/
/// `__thread_k_stacks_low`: rather than a linker script, this crate
/// reserves one fixed, over-aligned static arena and hands each priority
/// slot a same-sized, aligned window out of it — callers no longer supply
/// their own (arbitrarily-aligned) stack buffers to `thread_create`.
const STACK_SLOT_WORDS: usize = 128;
const STACK_SLOT_BYTES: u32 = (STACK_SLOT_WORDS * 4) as u32;

#[repr(align(512))]
struct StackArena([u32; STACK_SLOT_WORDS * NUM_SLOTS]);

static mut UNPRIV_STACK_ARENA: StackArena = StackArena([0; STACK_SLOT_WORDS * NUM_SLOTS]);
static mut PRIV_STACK_ARENA: StackArena = StackArena([0; STACK_SLOT_WORDS * NUM_SLOTS]);

/// This priority slot's full reserved window (`STACK_SLOT_WORDS` long) out
/// of `arena`. Callers then take the configured-`stack_size`-sized prefix
/// they actually need.
///
/// # Safety
/// Must only be called under the privileged-context, non-reentrant
/// discipline spec §5 requires; slots are disjoint, so two calls for
/// different `slot`s never alias, but two concurrent calls for the *same*
/// slot would.
unsafe fn arena_slot(arena: *mut StackArena, slot: u8) -> &'static mut [u32] {
    let start = slot as usize * STACK_SLOT_WORDS;
    unsafe { &mut (*arena).0[start..start + STACK_SLOT_WORDS] }
}

/// The idle thread's body: wait for an event, forever. Matches the
/// teacher's own idle thread (`init()`'s `|| loop { __CORTEXM_THREADS_wfe(); }`).
extern "C" fn idle_entry(_arg: u32) -> ! {
    loop {
        unsafe {
            context::wait_for_event();
        }
    }
}

/// `thread_init` (spec §6). Must run exactly once, before any
/// `thread_create`/`scheduler_start`.
pub fn thread_init(state: &mut KernelState, config: InitConfig) -> Result<()> {
    if config.max_threads > crate::MAX_USER_THREADS {
        return Err(KernelError::CapacityExceeded);
    }
    if config.max_mutexes > crate::MAX_MUTEXES {
        return Err(KernelError::CapacityExceeded);
    }

    let stack_bytes = (config.stack_size_words as u32)
        .saturating_mul(4)
        .next_power_of_two();
    // "−1 if stacks would not fit" (spec §6): the configured size must fit
    // the reserved per-slot arena window and clear the MPU's 32-byte floor
    // (spec §3.4), mirroring `sys_thread_init`'s
    // `stack_size_bytes > user_stack_thresh || ... > kernel_stack_thresh` check.
    if stack_bytes > STACK_SLOT_BYTES || stack_bytes < mpu::MIN_REGION_SIZE {
        return Err(KernelError::StackTooSmall);
    }

    state.protection_mode = config.protection_mode;
    state.max_threads = config.max_threads;
    state.stack_size_bytes = stack_bytes;
    // Safety: arena addresses only, not yet touched by any thread.
    unsafe {
        state.kernel_unpriv_stacks_low = core::ptr::addr_of!(UNPRIV_STACK_ARENA) as u32;
        state.kernel_priv_stacks_low = core::ptr::addr_of!(PRIV_STACK_ARENA) as u32;
    }
    state.kernel_stacks_size = STACK_SLOT_BYTES * NUM_SLOTS as u32;
    state.inited = true;

    let entry_pc = config.idle_fn.map(|f| f as usize as u32).unwrap_or(idle_entry as usize as u32);
    spawn(state, IDLE_SLOT, entry_pc, 0, IDLE_SLOT, 0, 0)?;
    state.tcbs.tcbs[IDLE_SLOT as usize].state = ThreadState::Runnable;
    Ok(())
}

/// Shared stack-synthesis + TCB population, used by both the idle spawn in
/// `thread_init` and user `thread_create` (spec §4.2). Takes each stack
/// window out of the kernel-owned arena at index `slot` rather than a
/// caller-supplied buffer, so every thread's stacks are always
/// size-aligned (spec §3.4) regardless of what the caller passes in.
fn spawn(state: &mut KernelState, slot: u8, entry_pc: u32, arg: u32, priority: u8, c: u32, t: u32) -> Result<()> {
    let stack_words = (state.stack_size_bytes / 4) as usize;
    // Safety: `slot` is synthesized only here, under §5's privileged,
    // non-reentrant discipline; no other code touches these arenas.
    let unpriv_stack = unsafe { &mut arena_slot(core::ptr::addr_of_mut!(UNPRIV_STACK_ARENA), slot)[..stack_words] };
    let priv_stack = unsafe { &mut arena_slot(core::ptr::addr_of_mut!(PRIV_STACK_ARENA), slot)[..stack_words] };

    let unpriv_base = unpriv_stack.as_ptr() as u32;
    let priv_base = priv_stack.as_ptr() as u32;

    // Kill stub: a returning thread function re-enters `thread_kill` via the
    // same entry point used for an explicit call (spec §4.2: "return link
    // pointing to an internal self-kill stub").
    let kill_stub_lr = thread_kill_trampoline as usize as u32;

    let unpriv_sp = unsafe {
        context::synthesize_unprivileged_frame(unpriv_stack, entry_pc, arg, kill_stub_lr)
    };
    let priv_sp = unsafe { context::synthesize_privileged_context(priv_stack, unpriv_sp) };

    state.tcbs.tcbs[slot as usize] = Tcb {
        unpriv_sp,
        priv_sp,
        unpriv_stack: StackWindow { base: unpriv_base, size: state.stack_size_bytes },
        priv_stack: StackWindow { base: priv_base, size: state.stack_size_bytes },
        priority,
        eff_priority: priority,
        period: t,
        budget: c,
        duration: 0,
        total_ticks: 0,
        period_ct: 0,
        in_svc: false,
        state: ThreadState::Init,
        blocked: false,
    };
    Ok(())
}

/// `scheduler_start` (spec §6): starts the tick at `CPU_CLK_HZ / frequency`,
/// pends the scheduler for the first dispatch, and returns only once every
/// user thread has exited. The caller (the platform's reset handler) is
/// itself the fallback-main "thread" of spec §3.2 slot `MAIN_SLOT` — it owns
/// no synthesized context because it is the literal stack the hardware
/// already runs on, so there is nothing for the scheduler to switch away
/// from until the idle/user threads exist.
///
/// # Safety
/// Must be called once, in privileged mode, after every `thread_create` the
/// caller intends to make (spec §1 Non-goals: threads must be declared
/// before `scheduler_start`), with exclusive access to `syst`.
#[cfg(not(test))]
pub unsafe fn scheduler_start(
    state: &mut KernelState,
    syst: &mut cortex_m::peripheral::SYST,
    frequency: u32,
) -> i32 {
    if state.scheduler_started {
        return -1;
    }
    state.scheduler_started = true;
    unsafe {
        crate::time::start(syst, frequency);
    }
    sched::pend_scheduler();

    while state.tcbs.user_count > 0 {
        unsafe {
            context::wait_for_event();
        }
    }
    0
}

/// Host-test stand-in: no real tick source to start, and looping on
/// `user_count` here would hang a test that never spawns a thread. Tests
/// that care about the "returns only when all user threads have exited"
/// contract exercise `user_count` bookkeeping directly instead (see
/// `thread_kill_frees_the_slot`).
#[cfg(test)]
pub fn scheduler_start(state: &mut KernelState, frequency: u32) -> i32 {
    let _ = frequency;
    if state.scheduler_started {
        return -1;
    }
    state.scheduler_started = true;
    0
}

/// `thread_create` (spec §6, §4.1, §4.2). Stacks are no longer supplied by
/// the caller: each priority slot draws its two stacks from the
/// kernel-owned arena `thread_init` sized, so every thread's stack base is
/// guaranteed aligned to the configured region size (spec §3.4) — see
/// `spawn`/`arena_slot`.
pub fn thread_create(
    state: &mut KernelState,
    entry_pc: u32,
    arg: u32,
    priority: u8,
    c: u32,
    t: u32,
) -> Result<()> {
    if !state.inited {
        return Err(KernelError::NotInitialized);
    }
    if state.scheduler_started {
        return Err(KernelError::SchedulerAlreadyStarted);
    }
    admission::admit(&state.tcbs, state.max_threads, priority, c, t)?;
    spawn(state, priority, entry_pc, arg, priority, c, t)?;
    state.tcbs.tcbs[priority as usize].state = ThreadState::Runnable;
    state.tcbs.user_count += 1;
    Ok(())
}

/// Re-entered when a thread function returns instead of calling
/// `thread_kill` itself (spec §4.2's synthesized kill stub). Not meant to be
/// called directly by application code.
extern "C" fn thread_kill_trampoline() -> ! {
    unsafe {
        thread_kill(crate::global_state());
    }
    loop {
        unsafe { context::wait_for_event() };
    }
}

/// `thread_kill` (spec §4.7). Idle respawns itself; main exits the process;
/// any other thread goes to INIT and frees its priority slot. A thread that
/// still holds a mutex is a contract violation (spec §7: "fatal to the
/// offending thread; main and idle are fatal to the whole process").
pub fn thread_kill(state: &mut KernelState) {
    let running = state.tcbs.running;

    if state.mutexes.thread_holds_any(running) {
        #[cfg(feature = "log")]
        log::error!("thread {running} killed while still holding a mutex");
        if running == IDLE_SLOT || running == MAIN_SLOT {
            sys_exit(state, -1);
            return;
        }
        state.tcbs.tcbs[running as usize].state = ThreadState::Init;
        state.tcbs.user_count = state.tcbs.user_count.saturating_sub(1);
        sched::pend_scheduler();
        return;
    }

    if running == IDLE_SLOT {
        #[cfg(feature = "log")]
        log::warn!("idle thread killed, respawning");
        state.tcbs.tcbs[IDLE_SLOT as usize].state = ThreadState::Runnable;
        state.tcbs.tcbs[IDLE_SLOT as usize].duration = 0;
        sched::pend_scheduler();
        return;
    }

    if running == MAIN_SLOT {
        sys_exit(state, 0);
        return;
    }

    state.tcbs.tcbs[running as usize].state = ThreadState::Init;
    state.tcbs.user_count = state.tcbs.user_count.saturating_sub(1);
    sched::pend_scheduler();
}

/// `wait_until_next_period` (spec §4.6). Warns (does not abort) if the
/// caller still holds a mutex — spec.md states only "warn if violated" here,
/// unlike the fatal contract violations of §4.5/§4.7.
pub fn wait_until_next_period(state: &mut KernelState) {
    let running = state.tcbs.running;
    if state.mutexes.thread_holds_any(running) {
        #[cfg(feature = "log")]
        log::warn!("thread {running} waited for next period while holding a mutex");
    }
    state.tcbs.tcbs[running as usize].state = ThreadState::Waiting;
    sched::pend_scheduler();
}

/// `mutex_init` (spec §6).
pub fn mutex_init(state: &mut KernelState, max_prior: u8) -> Result<usize> {
    state.mutexes.init(max_prior)
}

/// `mutex_lock` (spec §4.5): exactly one acquisition attempt. On
/// `Blocked`, the calling thread is already marked `blocked` and the
/// scheduler is pended, but this call returns immediately rather than
/// spinning — PendSV is the lowest-priority exception (spec §4.4/§5) and
/// cannot preempt the still-running supervisor-call context that invoked
/// this function, so a loop here would never yield and the scheduler it
/// just pended would never get to run.
///
/// The retry itself (spec §4.5: "retry acquisition after each scheduler
/// run") is therefore the caller's responsibility: the SVC demultiplexer
/// (out of scope, spec §1) must arrange for this same call to be re-issued
/// when the blocked thread is next scheduled in — e.g. by leaving its
/// stacked return PC pointing at the `svc` instruction itself rather than
/// past it, so resuming the thread re-executes the lock request — and keep
/// reissuing it until the outcome is no longer `Blocked`.
pub fn mutex_lock(state: &mut KernelState, idx: usize) -> Result<LockOutcome> {
    let running = state.tcbs.running;
    let outcome = state.mutexes.try_lock(idx, &mut state.tcbs, running)?;
    if outcome == LockOutcome::Blocked {
        sched::pend_scheduler();
    }
    Ok(outcome)
}

/// `mutex_unlock` (spec §4.5).
pub fn mutex_unlock(state: &mut KernelState, idx: usize) -> Result<()> {
    let running = state.tcbs.running;
    let result = state.mutexes.unlock(idx, &mut state.tcbs, running);
    sched::pend_scheduler();
    result
}

/// `get_time` (spec §6): ticks since `scheduler_start`.
pub fn get_time(state: &KernelState) -> u32 {
    state.sys_ticks
}

/// `get_priority` (spec §6): the running thread's effective priority.
pub fn get_priority(state: &KernelState) -> u8 {
    state.tcbs.tcbs[state.tcbs.running as usize].eff_priority
}

/// `thread_time` (spec §6): the running thread's cumulative CPU ticks.
pub fn thread_time(state: &KernelState) -> u32 {
    state.tcbs.tcbs[state.tcbs.running as usize].total_ticks
}

/// `sys_exit` (spec §6 "Exit codes", supplemented from
/// `original_source/kernel/src/syscall.c`): display `status`, flush the
/// UART, disable interrupts, halt. The seven-segment display write is out
/// of scope (spec §1) and left to `display_status`, a platform hook that
/// defaults to doing nothing.
pub fn sys_exit(state: &mut KernelState, status: i32) {
    display_status(status);
    #[cfg(feature = "log")]
    log::info!("sys_exit({status})");
    let _ = state;
    #[cfg(not(test))]
    unsafe {
        context::disable_interrupts();
        loop {
            context::wait_for_event();
        }
    }
}

/// Out-of-scope display hook (spec §1: "a seven-segment LED" driver is an
/// external collaborator). Overridden by a platform crate that has one.
#[allow(unused_variables)]
fn display_status(status: i32) {}

/// Flush pending output through a platform's UART port before halting
/// (spec §6: `sys_exit` "writes it to the standard output, flushes").
pub fn flush_uart<P: UartPort>(port: &mut P) {
    port.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::INFINITY;

    fn fresh_state() -> KernelState {
        let mut state = KernelState::new();
        thread_init(
            &mut state,
            InitConfig {
                max_threads: 14,
                stack_size_words: 32,
                idle_fn: None,
                protection_mode: ProtectionMode::PerThread,
                max_mutexes: 4,
            },
        )
        .unwrap();
        state
    }

    #[test]
    fn thread_init_spawns_runnable_idle() {
        let state = fresh_state();
        assert_eq!(state.tcbs.tcbs[IDLE_SLOT as usize].state, ThreadState::Runnable);
        assert_eq!(state.tcbs.tcbs[IDLE_SLOT as usize].priority, IDLE_SLOT);
    }

    #[test]
    fn thread_create_rejects_after_scheduler_start() {
        let mut state = fresh_state();
        state.scheduler_started = true;
        let err = thread_create(&mut state, 0, 0, 0, 1, 4).unwrap_err();
        assert_eq!(err, KernelError::SchedulerAlreadyStarted);
    }

    #[test]
    fn thread_create_rejects_before_thread_init() {
        let mut state = KernelState::new();
        let err = thread_create(&mut state, 0, 0, 0, 1, 4).unwrap_err();
        assert_eq!(err, KernelError::NotInitialized);
    }

    #[test]
    fn thread_create_populates_tcb_and_admits() {
        let mut state = fresh_state();
        thread_create(&mut state, 0x1000, 7, 0, 1, 4).unwrap();
        let tcb = &state.tcbs.tcbs[0];
        assert_eq!(tcb.state, ThreadState::Runnable);
        assert_eq!(tcb.period, 4);
        assert_eq!(tcb.budget, 1);
        assert_eq!(state.tcbs.user_count, 1);
    }

    #[test]
    fn thread_create_respects_configured_cap() {
        let mut state = KernelState::new();
        thread_init(
            &mut state,
            InitConfig {
                max_threads: 1,
                stack_size_words: 32,
                idle_fn: None,
                protection_mode: ProtectionMode::PerThread,
                max_mutexes: 4,
            },
        )
        .unwrap();
        thread_create(&mut state, 0x1000, 0, 0, 1, 10).unwrap();
        let err = thread_create(&mut state, 0x1000, 0, 1, 1, 10).unwrap_err();
        assert_eq!(err, KernelError::CapacityExceeded);
    }

    #[test]
    fn thread_kill_frees_the_slot() {
        let mut state = fresh_state();
        thread_create(&mut state, 0x1000, 0, 3, 1, 10).unwrap();
        state.tcbs.running = 3;
        thread_kill(&mut state);
        assert_eq!(state.tcbs.tcbs[3].state, ThreadState::Init);
        assert_eq!(state.tcbs.user_count, 0);
    }

    #[test]
    fn thread_kill_while_holding_mutex_is_fatal_to_the_thread() {
        let mut state = fresh_state();
        thread_create(&mut state, 0x1000, 0, 3, 1, 10).unwrap();
        let m = mutex_init(&mut state, 3).unwrap();
        state.tcbs.running = 3;
        state.mutexes.try_lock(m, &mut state.tcbs, 3).unwrap();
        thread_kill(&mut state);
        assert_eq!(state.tcbs.tcbs[3].state, ThreadState::Init);
    }

    #[test]
    fn mutex_lock_unlock_round_trip_resets_ceiling() {
        let mut state = fresh_state();
        let m = mutex_init(&mut state, 5).unwrap();
        state.tcbs.tcbs[5].state = ThreadState::Running;
        state.tcbs.tcbs[5].priority = 5;
        state.tcbs.tcbs[5].eff_priority = 5;
        state.tcbs.running = 5;
        assert_eq!(mutex_lock(&mut state, m).unwrap(), LockOutcome::Acquired);
        assert_eq!(state.mutexes.system_ceiling, 5);
        mutex_unlock(&mut state, m).unwrap();
        assert_eq!(state.mutexes.system_ceiling, INFINITY);
    }

    #[test]
    fn mutex_lock_returns_blocked_instead_of_spinning() {
        let mut state = fresh_state();
        let m = mutex_init(&mut state, 0).unwrap();
        // Low-priority holder at slot 2 already owns the mutex.
        state.tcbs.tcbs[2].state = ThreadState::Running;
        state.tcbs.tcbs[2].priority = 2;
        state.tcbs.tcbs[2].eff_priority = 2;
        state.tcbs.running = 2;
        assert_eq!(mutex_lock(&mut state, m).unwrap(), LockOutcome::Acquired);

        // Higher-priority thread at slot 0 attempts the same mutex: a single
        // call returns `Blocked` immediately rather than looping.
        state.tcbs.tcbs[0].state = ThreadState::Running;
        state.tcbs.tcbs[0].priority = 0;
        state.tcbs.tcbs[0].eff_priority = 0;
        state.tcbs.running = 0;
        assert_eq!(mutex_lock(&mut state, m).unwrap(), LockOutcome::Blocked);
        assert!(state.tcbs.tcbs[0].blocked);
    }

    #[test]
    fn scheduler_start_is_idempotent() {
        let mut state = fresh_state();
        assert_eq!(scheduler_start(&mut state, 1000), 0);
        assert!(state.scheduler_started);
        assert_eq!(scheduler_start(&mut state, 1000), -1, "already started");
    }

    #[test]
    fn get_time_and_thread_time_read_through() {
        let mut state = fresh_state();
        state.sys_ticks = 42;
        state.tcbs.running = IDLE_SLOT;
        state.tcbs.tcbs[IDLE_SLOT as usize].total_ticks = 7;
        assert_eq!(get_time(&state), 42);
        assert_eq!(thread_time(&state), 7);
        assert_eq!(get_priority(&state), IDLE_SLOT);
    }
}
