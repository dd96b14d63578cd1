//! Single periodic thread on an STM32F3 Discovery board. Device drivers
//! (GPIO, UART) are out of scope for this crate (spec §1); this demo only
//! wires up the threading core itself.

#![no_std]
#![no_main]

extern crate panic_halt;

use cortex_m_rt::{entry, exception};
use cortexm_threads::syscall::{self, InitConfig};
use cortexm_threads::{global_state, ProtectionMode};

static mut TICKS_SEEN: u32 = 0;

extern "C" fn periodic(_arg: u32) -> ! {
    loop {
        unsafe {
            core::ptr::write_volatile(core::ptr::addr_of_mut!(TICKS_SEEN), TICKS_SEEN.wrapping_add(1));
        }
        syscall::wait_until_next_period(unsafe { global_state() });
    }
}

#[entry]
fn main() -> ! {
    let state = unsafe { global_state() };
    syscall::thread_init(
        state,
        InitConfig {
            max_threads: 14,
            stack_size_words: 128,
            idle_fn: None,
            protection_mode: ProtectionMode::KernelOnly,
            max_mutexes: 0,
        },
    )
    .expect("thread_init");

    syscall::thread_create(state, periodic as usize as u32, 0, 0, 1, 10).expect("thread_create");

    let cp = cortex_m::Peripherals::take().unwrap();
    let mut syst = cp.SYST;
    unsafe { syscall::scheduler_start(state, &mut syst, 1000) };

    syscall::sys_exit(state, 0);
    loop {
        cortex_m::asm::wfi();
    }
}

#[exception]
fn SysTick() {
    cortexm_threads::sched::tick(unsafe { global_state() });
}
