use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let target = env::var("TARGET").unwrap();
    if target.starts_with("thumbv") {
        build_util::expose_m_profile();
    }

    let out = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    build_util::expose_kernel_config(&out);
    Ok(())
}
