//! Stamps `--version` output with the source revision and build date.
//!
//! `SOURCE_DATE_EPOCH` pins the date for reproducible builds; otherwise the
//! current UTC date is used. Outside a git checkout the revision is
//! `unknown`.

use std::process::Command;

use chrono::{DateTime, Utc};

fn revision() -> Option<String> {
    let out = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=10"])
        .output()
        .ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_owned())
        .filter(|rev| !rev.is_empty())
}

fn build_date() -> String {
    let pinned = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|secs| secs.parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    pinned.unwrap_or_else(Utc::now).format("%Y-%m-%d").to_string()
}

fn main() {
    println!("cargo::rerun-if-env-changed=SOURCE_DATE_EPOCH");
    let head = std::path::Path::new("../../.git/HEAD");
    if head.exists() {
        println!("cargo::rerun-if-changed={}", head.display());
    }

    let rev = revision().unwrap_or_else(|| "unknown".to_owned());
    println!("cargo::rustc-env=RANKIO_GIT_HASH={rev}");
    println!("cargo::rustc-env=RANKIO_BUILD_DATE={}", build_date());
}
