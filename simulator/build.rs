//! Build script for retro-display-simulator.
//!
//! On Windows, links against a vendored SDL2 (`vendor/sdl2/` next to the
//! library crate) and drops SDL2.dll beside the built binary.

use std::path::{Path, PathBuf};
use std::{env, fs};

fn main() {
    if env::var("CARGO_CFG_TARGET_OS").unwrap_or_default() != "windows" {
        return;
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let sdl2_dir = manifest_dir.parent().unwrap().join("vendor").join("sdl2");
    println!("cargo:rerun-if-changed={}", sdl2_dir.display());

    if !sdl2_dir.exists() {
        println!("cargo:warning=SDL2 not found at {}, expecting a system install", sdl2_dir.display());
        return;
    }
    println!("cargo:rustc-link-search=native={}", sdl2_dir.display());

    // OUT_DIR is target/<profile>/build/<pkg>-<hash>/out
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    if let Some(profile_dir) = profile_dir(&out_dir) {
        let dll = profile_dir.join("SDL2.dll");
        if !dll.exists()
            && let Err(e) = fs::copy(sdl2_dir.join("SDL2.dll"), &dll)
        {
            println!("cargo:warning=could not copy SDL2.dll: {e}");
        }
    }
}

fn profile_dir(out_dir: &Path) -> Option<&Path> {
    out_dir
        .ancestors()
        .find(|p| p.file_name().is_some_and(|n| n == "release" || n == "debug"))
}
