use std::process::Command;

/// Exposes `RULESET_MANAGER_VERSION`, used in the HTTP user agent.
///
/// Inside a git checkout the version comes from the closest tag. Builds from
/// a packaged crate have no `.git` and use the manifest version instead.
fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let version = git_version().unwrap_or_else(|| {
        std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0-unknown".to_string())
    });

    println!("cargo:rustc-env=RULESET_MANAGER_VERSION={}", version);
}

fn git_version() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let described = String::from_utf8(output.stdout).ok()?;
    let described = described.trim();
    let version = described.strip_prefix('v').unwrap_or(described);
    (!version.is_empty()).then(|| version.to_string())
}
