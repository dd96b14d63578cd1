//! Compiles the tiny CPSID/CPSIE/WFE assembly primitives used by
//! `src/context.rs`. Only runs for Cortex-M targets; host `cargo test` builds
//! (where `src/context.rs` substitutes no-op shims, see `cfg(test)` there)
//! skip it entirely so the test harness doesn't need an ARM toolchain.

fn main() {
    let target = std::env::var("TARGET").unwrap_or_default();
    if !target.starts_with("thumbv") {
        return;
    }

    cc::Build::new()
        .file("asm/primitives.s")
        .compile("cortexm_threads_primitives");

    println!("cargo:rerun-if-changed=asm/primitives.s");
}
