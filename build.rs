use std::env;
use std::path::PathBuf;

// ffmpeg-sys-next discovers FFmpeg through pkg-config on unix. On Windows the
// libraries usually come from vcpkg, so point the user at FFMPEG_DIR early.
fn main() {
    for var in ["FFMPEG_DIR", "VCPKG_ROOT", "VCPKGRS_TRIPLET"] {
        println!("cargo:rerun-if-env-changed={var}");
    }

    if env::var("CARGO_CFG_TARGET_OS").unwrap_or_default() != "windows" {
        return;
    }
    if env::var_os("FFMPEG_DIR").is_some() {
        return;
    }

    let Ok(vcpkg_root) = env::var("VCPKG_ROOT") else {
        println!("cargo:warning=FFMPEG_DIR is not set; alphacut needs FFmpeg development libraries.");
        return;
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let candidate = PathBuf::from(vcpkg_root).join("installed").join(triplet);
    if candidate.exists() {
        println!(
            "cargo:warning=Found vcpkg FFmpeg at {}; set FFMPEG_DIR to it for a reproducible build.",
            candidate.display(),
        );
    } else {
        println!(
            "cargo:warning=VCPKG_ROOT is set but {} does not exist.",
            candidate.display(),
        );
    }
}
