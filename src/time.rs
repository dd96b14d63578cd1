//! SysTick timer control (spec §4.3, §6 `scheduler_start`).
//!
//! `examples/original_source/kernel/src/timer.c`'s `timer_start`/`timer_stop`
//! poke a raw `sys_tick_reg_map` by hand; this expansion uses
//! `cortex_m::peripheral::SYST` instead, the idiomatic Rust equivalent the
//! teacher's own doc example already reaches for
//! (`examples/sjp27-cortexm-threads/src/lib.rs`'s module doc:
//! `syst.set_clock_source`/`set_reload`/`enable_counter`/`enable_interrupt`).

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;

/// Core clock assumption carried over from `timer.c`'s comment ("derived
/// from a 16MHz clock and intended sys_tick_irq firing frequency").
pub const CPU_CLK_HZ: u32 = 16_000_000;

/// SysTick reload value's maximum (24-bit down-counter).
pub const MAX_RELOAD: u32 = 0x00FF_FFFF;

/// Start the tick at `CPU_CLK_HZ / frequency` (spec §6's
/// `scheduler_start(frequency)` contract).
///
/// # Safety
/// Must run once, in privileged mode, before any thread depends on tick
/// accounting having begun.
pub unsafe fn start(syst: &mut SYST, frequency: u32) {
    let reload = (CPU_CLK_HZ / frequency).saturating_sub(1).min(MAX_RELOAD);
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(reload);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();
}

/// Stop the tick (used by fault/exit paths that must not take another tick
/// while winding down).
///
/// # Safety
/// See [`start`].
pub unsafe fn stop(syst: &mut SYST) {
    syst.disable_interrupt();
    syst.disable_counter();
}
