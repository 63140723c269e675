//! Stamps the binary with the commit it was built from.
//!
//! `LIFEHOOK_BUILD` in the build environment wins (for packaged builds
//! without a checkout); otherwise `git describe` is used when available.

use std::env;
use std::process::Command;

fn describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_owned())
}

fn main() {
    println!("cargo:rerun-if-env-changed=LIFEHOOK_BUILD");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/index");

    let build = match env::var("LIFEHOOK_BUILD") {
        Ok(pinned) if !pinned.is_empty() => Some(pinned),
        _ => describe(),
    };
    if let Some(build) = build {
        println!("cargo:rustc-env=LIFEHOOK_BUILD={build}");
    }
}
