/// Common test utilities
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT: AtomicU32 = AtomicU32::new(0);

/// Creates a per-test scratch directory
pub fn create_temp_dir() -> PathBuf {
    let n = NEXT.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!("jitdiff-test-{}-{}", std::process::id(), n));
    fs::create_dir_all(&dir).expect("Failed to create temp directory");
    dir
}

/// Writes `contents` to `dir/name` and returns the path
pub fn write_file(dir: &PathBuf, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("Failed to write test file");
    path
}

/// Cleans up a scratch directory
pub fn cleanup_dir(dir: &PathBuf) {
    if let Err(e) = fs::remove_dir_all(dir) {
        eprintln!("Warning: Failed to cleanup dir {}: {}", dir.display(), e);
    }
}

/// Runs the built `jitdiff` binary
pub fn jitdiff(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_jitdiff"))
        .args(args)
        .output()
        .expect("Failed to run jitdiff")
}
