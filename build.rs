use std::env;
use std::path::{Path, PathBuf};

const WATCHED: [&str; 4] = ["FFMPEG_DIR", "VCPKG_ROOT", "VCPKGRS_TRIPLET", "VCPKGRS_DYNAMIC"];

fn main() {
    for name in WATCHED {
        println!("cargo:rerun-if-env-changed={name}");
    }

    // ffmpeg-sys-next finds FFmpeg through pkg-config everywhere except
    // Windows, where it needs FFMPEG_DIR or a vcpkg install.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("windows") || env::var_os("FFMPEG_DIR").is_some() {
        return;
    }

    match env::var_os("VCPKG_ROOT") {
        Some(root) => report_vcpkg(Path::new(&root)),
        None => warn("FFMPEG_DIR is not set; point it at an FFmpeg install (or set VCPKG_ROOT for a vcpkg one)"),
    }
}

fn report_vcpkg(root: &Path) {
    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| String::from("x64-windows"));
    let install: PathBuf = [root, Path::new("installed"), Path::new(&triplet)].iter().collect();

    if !install.is_dir() {
        warn(&format!("no vcpkg FFmpeg found under {}", install.display()));
        return;
    }

    warn(&format!("using vcpkg FFmpeg at {0}; set FFMPEG_DIR={0} to silence this", install.display()));
    if triplet.ends_with("-static") || env::var_os("VCPKGRS_DYNAMIC").is_some() {
        return;
    }
    warn("dynamic vcpkg triplet detected; set VCPKGRS_DYNAMIC=1");
}

fn warn(message: &str) {
    println!("cargo:warning={message}");
}
