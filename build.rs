use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn main() {
    let commit = git(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".to_string());
    let dirty = git(&["status", "--porcelain"]).is_some();

    println!(
        "cargo:rustc-env=HOMEPORT_COMMIT={}{}",
        commit,
        if dirty { "-dirty" } else { "" }
    );
    println!(
        "cargo:rustc-env=HOMEPORT_BUILT_AT={}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M UTC")
    );

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}
