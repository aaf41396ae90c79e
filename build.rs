//! Hints for locating the FFmpeg libraries linked by the CFR encoder.

use std::{env, path::PathBuf};

const WATCHED_VARIABLES: [&str; 3] = ["FFMPEG_DIR", "VCPKG_ROOT", "VCPKGRS_TRIPLET"];

fn main() {
    for variable in WATCHED_VARIABLES {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    // Other targets find FFmpeg through pkg-config.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("windows")
        || env::var_os("FFMPEG_DIR").is_some()
    {
        return;
    }

    let Ok(vcpkg_root) = env::var("VCPKG_ROOT") else {
        println!(
            "cargo:warning=mcap-video links FFmpeg; set FFMPEG_DIR (or VCPKG_ROOT with an ffmpeg install) on Windows."
        );
        return;
    };
    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let install = PathBuf::from(vcpkg_root).join("installed").join(triplet);
    if install.join("include").join("libavcodec").exists() {
        println!(
            "cargo:warning=Using FFmpeg from {0}; set FFMPEG_DIR={0} to silence this.",
            install.display()
        );
    } else {
        println!(
            "cargo:warning=No FFmpeg headers under {}; the build will likely fail to link.",
            install.display()
        );
    }
}
