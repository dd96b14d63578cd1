//! Two periodic threads under QEMU's `mps2-an385` (Cortex-M4) machine,
//! wired up exactly as `cortexm-threads` expects: `SysTick` feeds
//! `sched::tick`, `PendSV` is supplied by the crate itself, `scheduler_start`
//! blocks the reset handler until both threads have exited.

#![no_std]
#![no_main]

extern crate panic_semihosting;

use cortex_m_rt::{entry, exception};
use cortex_m_semihosting::hprintln;
use cortexm_threads::syscall::{self, InitConfig};
use cortexm_threads::{global_state, ProtectionMode};

extern "C" fn thread_a(_arg: u32) -> ! {
    loop {
        let _ = hprintln!("thread A tick={}", syscall::get_time(unsafe { global_state() }));
        syscall::wait_until_next_period(unsafe { global_state() });
    }
}

extern "C" fn thread_b(_arg: u32) -> ! {
    loop {
        let _ = hprintln!("thread B tick={}", syscall::get_time(unsafe { global_state() }));
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
            max_mutexes: 4,
        },
    )
    .expect("thread_init");

    syscall::thread_create(state, thread_a as usize as u32, 0, 0, 1, 4).expect("thread_create A");
    syscall::thread_create(state, thread_b as usize as u32, 0, 1, 2, 8).expect("thread_create B");

    let cp = cortex_m::Peripherals::take().unwrap();
    let mut syst = cp.SYST;
    unsafe { syscall::scheduler_start(state, &mut syst, 1000) };

    let _ = hprintln!("all threads exited");
    syscall::sys_exit(state, 0);
    loop {
        cortex_m::asm::wfi();
    }
}

#[exception]
fn SysTick() {
    cortexm_threads::sched::tick(unsafe { global_state() });
}
