//! Stamps the binary with the commit and build time reported by `/health`.

use std::process::Command;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

fn main() {
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let sha = match git(&["rev-parse", "--short=10", "HEAD"]) {
        Some(sha) if !sha.is_empty() => sha,
        _ => "unknown".to_string(),
    };
    let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
        .is_some_and(|changes| !changes.is_empty());
    stamp("GIT_SHA", if dirty { format!("{sha}-dirty") } else { sha });

    let built_at = source_date().unwrap_or_else(OffsetDateTime::now_utc);
    stamp(
        "BUILD_DATE",
        built_at.format(&Rfc3339).unwrap_or_else(|_| "unknown-date".to_string()),
    );
}

fn stamp(key: &str, value: String) {
    println!("cargo:rustc-env={key}={value}");
}

/// Trimmed stdout of a successful `git` invocation.
fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout).ok().map(|s| s.trim().to_string())
}

/// Reproducible builds pin the timestamp through `SOURCE_DATE_EPOCH`.
fn source_date() -> Option<OffsetDateTime> {
    let secs = std::env::var("SOURCE_DATE_EPOCH").ok()?.parse::<i64>().ok()?;
    OffsetDateTime::from_unix_timestamp(secs).ok()
}
