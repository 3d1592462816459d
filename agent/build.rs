//! Build script for servicesync
//! Stamps the binary with the commit and build time reported by `--version`
//! and `GET /version`

use chrono::Utc;
use std::process::Command;

fn main() {
    // Container builds usually have no .git, so CI can pass the hash in
    let git_hash = std::env::var("SERVICESYNC_GIT_HASH")
        .ok()
        .filter(|hash| !hash.trim().is_empty())
        .or_else(|| {
            Command::new("git")
                .args(["rev-parse", "--short", "HEAD"])
                .output()
                .ok()
                .filter(|output| output.status.success())
                .and_then(|output| String::from_utf8(output.stdout).ok())
                .map(|s| s.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let build_time = Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    println!("cargo:rustc-env=BUILD_TIME={}", build_time);

    println!("cargo:rerun-if-env-changed=SERVICESYNC_GIT_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");
}
