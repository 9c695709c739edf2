use std::process::Command;

fn main() {
    // Tell Cargo to rerun this build script if git HEAD changes
    println!("cargo:rerun-if-changed=../.git/HEAD");

    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=BLOCKMESH_GIT_HASH={}", git_hash);
    println!(
        "cargo:rustc-env=BLOCKMESH_BUILD_DATE={}",
        chrono::Utc::now().format("%Y-%m-%d")
    );
}
