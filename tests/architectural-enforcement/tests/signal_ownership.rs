//! Integration Test: Signal Ownership
//!
//! **Policy**: Only `process.rs` may send `SIGKILL`. Everything else stops
//! clients through `process::terminate`, which tries `SIGTERM` first and
//! always reaps.

use std::path::Path;

use architectural_enforcement::scan;

fn sends_sigkill(code: &str) -> bool {
    code.contains("Signal::SIGKILL") || code.contains("libc::SIGKILL")
}

fn is_process_module(path: &Path) -> bool {
    path.ends_with("core/src/process.rs")
}

#[test]
fn test_sigkill_only_in_process_module() {
    let violations = scan(sends_sigkill, is_process_module);

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: SIGKILL sent outside process.rs!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use process::terminate or process::terminate_all");

        panic!(
            "\nFound {} SIGKILL violation(s).\nFix these before merging!",
            violations.len()
        );
    }
}

#[test]
fn test_process_module_does_escalate() {
    let source = std::fs::read_to_string(
        architectural_enforcement::workspace_root().join("switchboard/core/src/process.rs"),
    )
    .unwrap();
    assert!(source.lines().any(sends_sigkill));
}

#[test]
fn test_sigkill_detection() {
    assert!(sends_sigkill("signal::kill(pid, Signal::SIGKILL)"));
    assert!(!sends_sigkill("signal::kill(pid, Signal::SIGTERM)"));
    assert!(!sends_sigkill(""));
}
