use std::env;

/// Exposes the CPU's M-profile architecture version. This isn't available in
/// rustc's standard environment.
///
/// This will set either `cfg(armv7m)` or `cfg(armv8m)` depending on the value
/// of the `TARGET` environment variable.
pub fn expose_m_profile() {
    let target = env::var("TARGET").unwrap();

    if target.starts_with("thumbv7m") || target.starts_with("thumbv7em") {
        println!("cargo:rustc-cfg=armv7m");
    } else if target.starts_with("thumbv8m") {
        println!("cargo:rustc-cfg=armv8m");
    } else {
        println!("Don't know the target {}", target);
        std::process::exit(1);
    }
}

/// Exposes the board type from the `HUBRIS_BOARD` envvar into
/// `cfg(target_board="...")`.
pub fn expose_target_board() {
    if let Ok(board) = env::var("HUBRIS_BOARD") {
        println!("cargo:rustc-cfg=target_board=\"{}\"", board);
    }
    println!("cargo:rerun-if-env-changed=HUBRIS_BOARD");
}

/// Kernel build-time configuration, resolved from environment variables so
/// that it can be baked into `const` items instead of parsed at runtime.
pub struct KernelConfig {
    pub num_user_tasks: u32,
    pub enable_stack_dump: bool,
    pub kernel_interrupt_priority: u8,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    println!("cargo:rerun-if-env-changed={}", name);
    match env::var(name) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            println!("bad value for {}", name);
            std::process::exit(1);
        }),
        Err(_) => default,
    }
}

/// Reads `KERN_NUM_TASKS` / `KERN_ENABLE_STACK_DUMP` /
/// `KERN_INTERRUPT_PRIORITY` and writes them as `const` items to
/// `$OUT_DIR/kernel_config.rs`, for the kernel to `include!`.
pub fn expose_kernel_config(out_dir: &std::path::Path) -> KernelConfig {
    let cfg = KernelConfig {
        num_user_tasks: env_or("KERN_NUM_TASKS", 2),
        enable_stack_dump: env_or("KERN_ENABLE_STACK_DUMP", 1u32) != 0,
        kernel_interrupt_priority: env_or("KERN_INTERRUPT_PRIORITY", 0xFFu32) as u8,
    };

    let dest = out_dir.join("kernel_config.rs");
    let contents = format!(
        "pub const NUM_OF_USER_TASKS: usize = {};\n\
         pub const ENABLE_STACK_DUMP: bool = {};\n\
         pub const KERNEL_INTERRUPT_PRIORITY: u8 = {};\n",
        cfg.num_user_tasks, cfg.enable_stack_dump, cfg.kernel_interrupt_priority,
    );
    std::fs::write(dest, contents).unwrap();

    cfg
}
