//! Synthesized initial thread contexts and the context-switch primitive
//! (spec §4.2, §9 "pointer-graph rework", "dynamic dispatch / thread entry").
//!
//! The stack-slot layout below is the teacher's `create_tcb` in
//! `examples/sjp27-cortexm-threads/src/lib.rs` (xPSR, PC, LR, R12, R3..R0,
//! then R7..R4/R11..R8 — hardware-stacked exception frame followed by the
//! extra callee-saved set) generalized to two stacks per thread instead of
//! one, per spec §4.2: an unprivileged exception frame synthesized at the
//! top of the user stack, and a privileged saved-context synthesized at the
//! top of the kernel stack whose `r14` is the processor's
//! "return-to-unprivileged, use PSP" magic value.

/// Initial xPSR: thumb bit set, nothing else (spec §4.2).
pub const XPSR_INIT: u32 = 0x0100_0000;
/// EXC_RETURN value: return to Thread mode, use PSP, no FP context.
pub const LR_RETURN_TO_USER_PSP: u32 = 0xFFFF_FFFD;

/// The 8 words a Cortex-M exception pushes onto the unprivileged stack
/// (`r0, r1, r2, r3, r12, lr, pc, xpsr`), in ascending-address order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// The callee-saved set plus the unprivileged stack pointer, saved atop the
/// privileged stack while a thread is not running (spec §3.1's
/// "privileged-stack pointer ... points to the saved callee-set").
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SavedContext {
    pub psp: u32,
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    pub r14: u32,
}

/// Write a synthesized unprivileged exception frame at the top of `stack`
/// (spec §4.2: "argument in r0, `fn` as program counter, xPSR = thumb,
/// return link pointing to an internal self-kill stub").
///
/// Returns the stack pointer value (the frame's address) to install as
/// `unpriv_sp` / the TCB's user stack pointer.
///
/// # Safety
/// `stack` must be entirely within the thread's assigned unprivileged stack
/// window and at least one `ExceptionFrame` in length.
pub unsafe fn synthesize_unprivileged_frame(
    stack: &mut [u32],
    entry_pc: u32,
    arg: u32,
    kill_stub_lr: u32,
) -> u32 {
    let words = core::mem::size_of::<ExceptionFrame>() / 4;
    let top = stack.len() - words;
    let frame = &mut stack[top] as *mut u32 as *mut ExceptionFrame;
    core::ptr::write(
        frame,
        ExceptionFrame {
            r0: arg,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: kill_stub_lr,
            pc: entry_pc,
            xpsr: XPSR_INIT,
        },
    );
    frame as u32
}

/// Write a synthesized privileged saved-context at the top of `priv_stack`
/// (spec §4.2: "callee-saved registers zeroed, r14 set to the ...
/// return-to-unprivileged ... magic value, and the slot holding the
/// unprivileged SP initialized to the top of the synthesized unprivileged
/// frame").
///
/// Returns the stack pointer value to install as the TCB's
/// `priv_stack_ptr` — what the scheduler hands back on first dispatch.
///
/// # Safety
/// `priv_stack` must be entirely within the thread's assigned privileged
/// stack window and at least one `SavedContext` in length.
pub unsafe fn synthesize_privileged_context(priv_stack: &mut [u32], unpriv_sp: u32) -> u32 {
    let words = core::mem::size_of::<SavedContext>() / 4;
    let top = priv_stack.len() - words;
    let ctx = &mut priv_stack[top] as *mut u32 as *mut SavedContext;
    core::ptr::write(
        ctx,
        SavedContext {
            psp: unpriv_sp,
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
            r14: LR_RETURN_TO_USER_PSP,
        },
    );
    ctx as u32
}

// Tiny asm primitives: kept from the teacher, which compiles them via the
// `cc` build-dependency (see `build.rs`) rather than inline `asm!`, so that
// `cpsid`/`cpsie`/`wfe` are callable from ordinary (non-naked) Rust. Under
// `cfg(test)` (host-side scheduling-logic tests, see `lib.rs`) these are
// stubbed out entirely so the test harness doesn't need an ARM toolchain.
#[cfg(not(test))]
extern "C" {
    fn __cortexm_threads_cpsid();
    fn __cortexm_threads_cpsie();
    fn __cortexm_threads_wfe();
}

/// Disable interrupts. Used to bracket the short multi-word updates to
/// kernel-global state spec §5 calls out ("interrupts selectively disabled
/// around non-reentrant updates").
///
/// # Safety
/// Must be paired with [`enable_interrupts`]; must not be called from a
/// context that is itself non-interruptible in a way the caller doesn't
/// expect (e.g. already inside an ISR prologue).
#[inline(always)]
pub unsafe fn disable_interrupts() {
    #[cfg(not(test))]
    __cortexm_threads_cpsid();
}

/// # Safety
/// See [`disable_interrupts`].
#[inline(always)]
pub unsafe fn enable_interrupts() {
    #[cfg(not(test))]
    __cortexm_threads_cpsie();
}

/// Wait for event; used by the default idle thread.
///
/// # Safety
/// Only meaningful on target hardware; a no-op shim is substituted under
/// `cfg(test)` so host-side scheduling-logic tests don't need the `cc`-built
/// primitive linked in.
#[inline(always)]
pub unsafe fn wait_for_event() {
    #[cfg(not(test))]
    __cortexm_threads_wfe();
}

/// The PendSV handler: Cortex-M's tail-chained, lowest-priority exception,
/// pended by the tick handler and by any syscall body that needs to
/// reschedule (spec §4.4's entry point).
///
/// Handler mode always runs off `MSP`, which on entry is still the
/// preempted thread's own privileged stack (the previous dispatch of this
/// same handler left it there via `msr msp, r0`). The body saves the
/// unprivileged stack pointer (`psp`) plus the remaining callee-saved
/// registers (`r4`-`r11`) and `lr` atop that privileged stack — the exact
/// 10-word, `{{psp, r4..r11, r14}}` layout [`SavedContext`] and
/// [`synthesize_privileged_context`] write — then calls
/// [`crate::sched::schedule_from_isr`] with the resulting pointer. That
/// call returns the chosen thread's own `priv_sp`; `MSP` is retargeted to
/// it (switching privileged stacks), its saved set is popped, `psp` is
/// restored, and `bx lr` returns via the popped `r14` (EXC_RETURN),
/// resuming unprivileged execution off the chosen thread's `psp`.
///
/// Naked-asm shape (save-call-restore around a Rust dispatch function)
/// follows `examples/other_examples/..bern-rtos..-scheduler.rs`'s `PendSV`,
/// trimmed of its FPU lazy-stacking branch (this MCU class, spec §1's
/// "single-core microcontroller with an MPU", is not assumed to have a
/// float unit); the explicit `psp`-plus-callee-set save/restore and the
/// `msr msp` stack retarget are this crate's own two-stack generalization
/// of the teacher's single-stack `PendSV` (spec §3.1/§4.2's two-stack TCB).
///
/// # Safety
/// Must only ever be installed as the PendSV vector; never call directly.
#[cfg(all(not(test), target_arch = "arm"))]
#[no_mangle]
#[naked]
pub unsafe extern "C" fn PendSV() {
    core::arch::asm!(
        "mrs r1, psp",
        "stmdb sp!, {{r1, r4-r11, r14}}",
        "mov r0, sp",
        "bl {dispatch}",
        "ldmia r0!, {{r1, r4-r11, r14}}",
        "msr msp, r0",
        "msr psp, r1",
        "bx lr",
        dispatch = sym crate::sched::schedule_from_isr,
        options(noreturn),
    );
}
