// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Embeds the version reported by `langiq --version`.
//!
//! Uses `git describe --tags --always --dirty` when building from a checkout
//! (e.g. `0.4.0-2-g1f0c9e3-dirty`) and `CARGO_PKG_VERSION` otherwise.

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");

    let version = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|desc| desc.trim().trim_start_matches('v').to_string())
        .filter(|desc| !desc.is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo:rustc-env=LANGIQ_VERSION={version}");
}
