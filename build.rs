use std::process::Command;

/// Exports `STARFEED_VERSION`: the package version, with the short commit
/// appended when built from a git checkout.
fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    let package = std::env::var("CARGO_PKG_VERSION").unwrap_or_default();
    let commit = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let version = match commit {
        Some(commit) => format!("{}+{}", package, commit),
        None => package,
    };
    println!("cargo:rustc-env=STARFEED_VERSION={}", version);
}
