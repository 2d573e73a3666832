//! Build script: embeds the git hash and checks the whisper toolchain.
//!
//! whisper-rs-sys compiles whisper.cpp with cmake. A missing cmake shows up as a
//! wall of unrelated linker noise, so we warn up front with a readable message.
//! A requested GPU toolkit that is missing stops the build.

use std::process::Command;

fn main() {
    // Embed git short hash for version string
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    if cfg!(feature = "whisper") {
        check_cmake();
    }
    if cfg!(feature = "cuda") {
        check_tool("nvcc", "--version", "CUDA toolkit", "https://developer.nvidia.com/cuda-downloads");
    }
    if cfg!(feature = "vulkan") {
        check_tool("vulkaninfo", "--summary", "Vulkan SDK", "https://vulkan.lunarg.com/");
    }
}

fn check_cmake() {
    if Command::new("cmake").arg("--version").output().is_err() {
        println!("cargo::warning=cmake not found; whisper-rs needs it to build whisper.cpp");
        println!("cargo::warning=Install cmake, or build without verification: --no-default-features --features cli");
    }
}

fn check_tool(tool: &str, version_arg: &str, what: &str, url: &str) {
    match Command::new(tool).arg(version_arg).output() {
        Ok(out) if out.status.success() => {
            println!("cargo::warning={} detected", what);
        }
        _ => {
            panic!(
                "\n\n`{}` not found: {} is not installed.\nInstall: {}\nOr build without GPU support: cargo build --release\n",
                tool, what, url
            );
        }
    }
}
