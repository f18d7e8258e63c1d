//! Architectural Enforcement Integration Tests
//!
//! Source-level checks that keep the waiting and signalling rules intact:
//! - No `thread::sleep` in production code (every wait observes the shutdown token)
//! - Only the process module may escalate to `SIGKILL`
//!
//! The helpers here scan production sources line by line. Test modules are
//! skipped from the first `#[cfg(test)]` to the end of the file.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["switchboard/core/src", "switchboard/daemon/src"];

/// Workspace root, independent of the working directory the tests run in
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The trimmed source line
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// The code part of a line, without any `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Production lines of a source file: everything before `#[cfg(test)]`
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, line))
        .collect()
}

/// Every `.rs` file under the production directories
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                files.push(entry.into_path());
            }
        }
    }
    files.sort();
    files
}

/// Scan production code for lines whose code part matches `is_violation`
///
/// Files for which `exempt` returns true are skipped.
pub fn scan(is_violation: impl Fn(&str) -> bool, exempt: impl Fn(&Path) -> bool) -> Vec<Violation> {
    let mut violations = Vec::new();
    for path in production_files() {
        if exempt(&path) {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        for (line, text) in production_lines(&content) {
            if is_violation(code_part(text)) {
                violations.push(Violation {
                    path: path.clone(),
                    line,
                    text: text.trim().to_string(),
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let x = 1; // thread::sleep(d)"), "let x = 1; ");
        assert_eq!(code_part("/// doc"), "");
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn a() {}\n\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        let lines = production_lines(content);
        assert_eq!(lines, vec![(1, "fn a() {}"), (2, "")]);
    }

    #[test]
    fn test_production_sources_are_found() {
        let files = production_files();
        assert!(files.iter().any(|p| p.ends_with("core/src/lib.rs")));
        assert!(files.iter().any(|p| p.ends_with("daemon/src/main.rs")));
    }
}
