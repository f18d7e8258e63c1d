//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call `std::thread::sleep`.
//! Every wait goes through `ShutdownToken::sleep`, a timed POSIX call or
//! a condition variable, so shutdown is never stuck behind a sleep.
//! **Exceptions**: test code

use architectural_enforcement::{code_part, scan};

fn is_thread_sleep(code: &str) -> bool {
    code.contains("thread::sleep(") || code.contains("std::thread::sleep")
}

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations = scan(is_thread_sleep, |_| false);

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: thread::sleep found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ Use instead:");
        eprintln!("  - ShutdownToken::sleep (returns early on cancel)");
        eprintln!("  - sem_timedwait / mq_timedreceive / poll with a tick");
        eprintln!("  - Condvar::wait_for");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

#[test]
fn test_sleep_detection() {
    assert!(is_thread_sleep("    std::thread::sleep(Duration::from_millis(10));"));
    assert!(is_thread_sleep("thread::sleep(tick);"));
    assert!(!is_thread_sleep("    if token.sleep(tick) {"));
    assert!(!is_thread_sleep(code_part("let x = 1; // thread::sleep(d)")));
}
