use std::process::Command;

/// Short commit id from `BYTEWATT_BUILD_SHA` or the local git checkout
fn commit_sha() -> Option<String> {
    if let Ok(sha) = std::env::var("BYTEWATT_BUILD_SHA") {
        let sha = sha.trim();
        if !sha.is_empty() {
            return Some(sha.chars().take(10).collect());
        }
    }
    let output = Command::new("git")
        .args(["rev-parse", "--short=10", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}

fn main() {
    let version = env!("CARGO_PKG_VERSION");

    // Tagged releases report the bare version; everything else carries the commit
    let tagged = std::env::var("BYTEWATT_RELEASE").is_ok_and(|v| v == "1" || v == "true");
    let app_version = match commit_sha() {
        Some(sha) if !tagged => format!("{}+{}", version, sha),
        _ => version.to_string(),
    };
    println!("cargo:rustc-env=APP_VERSION={}", app_version);

    for var in ["BYTEWATT_RELEASE", "BYTEWATT_BUILD_SHA"] {
        println!("cargo:rerun-if-env-changed={}", var);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
}
