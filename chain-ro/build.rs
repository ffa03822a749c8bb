use std::process::Command;

use anyhow::Result as AnyResult;
use chrono::Utc;

fn git(args: &[&str]) -> String {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() -> AnyResult<()> {
    println!(
        "cargo:rustc-env=COMMIT_SHA={}",
        git(&["rev-parse", "--short", "HEAD"])
    );
    println!(
        "cargo:rustc-env=COMMIT_DATE={}",
        git(&["log", "-1", "--format=%cd", "--date=short"])
    );
    println!("cargo:rustc-env=TARGET={}", std::env::var("TARGET")?);
    println!(
        "cargo:rustc-env=BUILD_DATE={}",
        Utc::now().format("%Y-%m-%d")
    );
    Ok(())
}
