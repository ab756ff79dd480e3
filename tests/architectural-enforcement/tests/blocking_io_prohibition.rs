//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async code in the gateway core and daemon MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, `tokio::process`, async `reqwest`.
//! **Acceptable**: blocking calls inside plain `fn`s that run before the
//! runtime serves traffic (config loading), and test code.

use architectural_enforcement::{production_sources, FnKind, SourceFile};

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O:");
        eprintln!("  - std::fs::read(), std::fs::write(), std::fs::File");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - std::process::Command::output()");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::write().await");
        eprintln!("  - tokio::net::UnixListener::bind() / accept().await");
        eprintln!("  - reqwest::Client::send().await");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (config loading before serving)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all blocking I/O calls in production code
fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();
    for file in production_sources() {
        check_file(&file, &mut violations);
    }
    violations
}

/// Blocking pattern found on a line, if any
fn blocking_pattern(code: &str) -> Option<&'static str> {
    if code.contains("reqwest::blocking") {
        return Some("Blocking HTTP client");
    }
    if code.contains("std::fs::") || code.trim_start().starts_with("use std::fs") {
        return Some("Blocking file I/O");
    }
    if code.contains("std::net::") || code.trim_start().starts_with("use std::net") {
        return Some("Blocking network I/O");
    }
    if code.contains("std::process::Command") {
        return Some("Blocking process I/O");
    }
    if code.contains("std::io::stdin()") {
        return Some("Blocking stdin");
    }
    None
}

fn check_file(file: &SourceFile, violations: &mut Vec<String>) {
    for idx in 0..file.lines.len() {
        let Some(kind) = blocking_pattern(file.code(idx)) else {
            continue;
        };

        // Module-level imports leak into every function, so they always count
        if file.enclosing_fn(idx) == Some(FnKind::Sync) && !file.code(idx).contains("use ") {
            continue;
        }

        violations.push(format!("{kind}: {}", file.describe(idx)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn violations_in(source: &str) -> Vec<String> {
        let file = SourceFile::from_source(PathBuf::from("x.rs"), source);
        let mut violations = Vec::new();
        check_file(&file, &mut violations);
        violations
    }

    #[test]
    fn test_blocking_read_in_async_fn_is_flagged() {
        let violations = violations_in(
            "pub async fn bad() {\n    let c = std::fs::read_to_string(\"f\")?;\n}\n",
        );
        assert_eq!(violations.len(), 1);
        assert!(violations[0].starts_with("Blocking file I/O"));
    }

    #[test]
    fn test_blocking_read_in_sync_fn_is_allowed() {
        let violations = violations_in(
            "pub fn load_config() {\n    let c = std::fs::read_to_string(\"f\")?;\n}\n",
        );
        assert!(violations.is_empty());
    }

    #[test]
    fn test_module_import_is_flagged() {
        let violations = violations_in("use std::fs;\n\nfn helper() {}\n");
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_test_module_is_ignored() {
        let violations = violations_in(
            "fn ok() {}\n#[cfg(test)]\nmod tests {\n    async fn t() { std::fs::read(\"x\"); }\n}\n",
        );
        assert!(violations.is_empty());
    }

    #[test]
    fn test_commented_out_call_is_ignored() {
        let violations =
            violations_in("async fn f() {\n    // std::fs::read(\"x\") would block here\n}\n");
        assert!(violations.is_empty());
    }
}
