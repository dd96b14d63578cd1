//! MPU region programming (spec §3.4, §4.2 step 6, §4.4 step 6).
//!
//! Register layout and bit constants are carried over directly from
//! `examples/original_source/kernel/src/mpu.c`'s `mpu_t`/`RASR_*`/`RBAR_*`
//! definitions; region reads/writes go through `core::ptr::read_volatile`/
//! `write_volatile` the same way the teacher pokes the NVIC ICSR register in
//! `examples/sjp27-cortexm-threads/src/lib.rs`'s `SysTick`, rather than
//! through `cortex_m::peripheral::MPU` — the C source's exact bit packing is
//! easier to keep faithful to against a plain register struct than against
//! whatever field names a given `cortex_m` release happens to expose.

use crate::error::{KernelError, Result};

/// MPU register block base address (Armv7-M System Control Space).
const MPU_BASE: usize = 0xE000_ED90;
/// Maximum valid region number (8 regions, spec §3.4).
const REGION_NUMBER_MAX: u32 = 7;
/// Minimum region size in bytes (spec §3.4).
pub const MIN_REGION_SIZE: u32 = 32;

#[repr(C)]
struct MpuRegs {
    typer: u32,
    ctrl: u32,
    rnr: u32,
    rbar: u32,
    rasr: u32,
}

const CTRL_ENABLE_BG_REGION: u32 = 1 << 2;
const CTRL_ENABLE_PROTECTION: u32 = 1 << 0;

const RASR_XN: u32 = 1 << 28;
const RASR_AP_USER_READ_ONLY: u32 = 0b10 << 24;
const RASR_AP_USER_READ_WRITE: u32 = 0b11 << 24;
const RASR_SIZE_MASK: u32 = 0b111110;
const RASR_ENABLE: u32 = 1 << 0;

unsafe fn regs() -> *mut MpuRegs {
    MPU_BASE as *mut MpuRegs
}

/// `mm_enable_mpu` (spec §4.4 step 6 precondition, kept from `mpu.c`).
///
/// # Safety
/// Must run in privileged mode before any thread resumes unprivileged
/// execution expecting region protection to be active.
pub unsafe fn enable(enable: bool) {
    let r = regs();
    if enable {
        core::ptr::write_volatile(
            &mut (*r).ctrl,
            core::ptr::read_volatile(&(*r).ctrl) | CTRL_ENABLE_PROTECTION | CTRL_ENABLE_BG_REGION,
        );
    } else {
        core::ptr::write_volatile(
            &mut (*r).ctrl,
            core::ptr::read_volatile(&(*r).ctrl) & !CTRL_ENABLE_PROTECTION,
        );
    }
}

/// `mm_region_enable` (spec §4.4 step 6, §7 "Hard errors").
///
/// # Safety
/// `base_address` must genuinely back a region of `1 << size_log2` bytes the
/// caller intends to grant/deny user access to.
pub unsafe fn region_enable(
    region_number: u32,
    base_address: u32,
    size_log2: u8,
    execute: bool,
    user_write_access: bool,
) -> Result<()> {
    if region_number > REGION_NUMBER_MAX {
        #[cfg(feature = "log")]
        log::warn!("mpu: invalid region number {region_number}");
        return Err(KernelError::BadRegion);
    }
    if base_address & ((1u32 << size_log2).wrapping_sub(1)) != 0 {
        #[cfg(feature = "log")]
        log::warn!("mpu: region {region_number} base {base_address:#x} misaligned to 1<<{size_log2}");
        return Err(KernelError::Misaligned);
    }
    if size_log2 < 5 {
        #[cfg(feature = "log")]
        log::warn!("mpu: region {region_number} size_log2={size_log2} below minimum");
        return Err(KernelError::RegionTooSmall);
    }

    let r = regs();
    core::ptr::write_volatile(&mut (*r).rnr, region_number);
    core::ptr::write_volatile(&mut (*r).rbar, base_address);

    let size = ((size_log2 as u32 - 1) << 1) & RASR_SIZE_MASK;
    let ap = if user_write_access { RASR_AP_USER_READ_WRITE } else { RASR_AP_USER_READ_ONLY };
    let xn = if execute { 0 } else { RASR_XN };
    core::ptr::write_volatile(&mut (*r).rasr, size | ap | xn | RASR_ENABLE);

    Ok(())
}

/// `mm_region_disable`.
///
/// # Safety
/// See [`region_enable`].
pub unsafe fn region_disable(region_number: u32) {
    let r = regs();
    core::ptr::write_volatile(&mut (*r).rnr, region_number & 0xFF);
    let rasr = core::ptr::read_volatile(&(*r).rasr);
    core::ptr::write_volatile(&mut (*r).rasr, rasr & !RASR_ENABLE);
}

/// `mm_log2ceil_size` — the exact ceiling loop from `mpu.c`, not
/// `u32::leading_zeros`, so rounding matches the original bit-for-bit
/// (`n == 0` rounds to `0`, spec §4.2's "rounded up to the next power-of-two").
pub fn log2_ceil(n: u32) -> u32 {
    let mut ret = 0u32;
    while n > (1u32 << ret) {
        ret += 1;
    }
    ret
}

/// Region size (bytes) for a stack window of `size_log2`.
pub fn region_bytes(size_log2: u32) -> u32 {
    1u32 << size_log2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log2_ceil_matches_c_source() {
        assert_eq!(log2_ceil(0), 0);
        assert_eq!(log2_ceil(1), 0);
        assert_eq!(log2_ceil(2), 1);
        assert_eq!(log2_ceil(3), 2);
        assert_eq!(log2_ceil(32), 5);
        assert_eq!(log2_ceil(33), 6);
        assert_eq!(log2_ceil(256), 8);
    }
}
