//! Build script that records build metadata for `--version`.
//!
//! Exposes:
//! - `AUTOPIM_GIT_REV`: short git revision, or "release" outside a checkout

use std::process::Command;

fn main() {
    let git_rev = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|rev| rev.trim().to_string())
        .filter(|rev| !rev.is_empty())
        .unwrap_or_else(|| "release".to_string());

    println!("cargo:rustc-env=AUTOPIM_GIT_REV={}", git_rev);

    // Tell Cargo to rerun if build.rs or the checked out commit changes
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
