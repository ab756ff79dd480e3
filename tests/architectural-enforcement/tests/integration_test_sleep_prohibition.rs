//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the gateway core and daemon MUST NOT call sleep.
//! Waiting happens on I/O, timers tied to a deadline, or channels.
//! **Exceptions**: exponential backoff between retry attempts, test code.

use architectural_enforcement::{production_sources, SourceFile};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Exponential backoff in retry logic");
        eprintln!("  - Test code (#[cfg(test)] modules)");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - Sleep to 'wait' for a breaker or bucket (compute the deadline)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// The retry module must keep its backoff sleeps recognisable
#[test]
fn test_retry_backoff_is_recognised() {
    let retry = production_sources()
        .into_iter()
        .find(|file| file.path.ends_with("resilience/retry.rs"))
        .expect("retry module should exist");

    let sleeps: Vec<usize> = (0..retry.lines.len())
        .filter(|&idx| is_sleep_call(retry.code(idx)))
        .collect();

    assert!(!sleeps.is_empty(), "retry should back off between attempts");
    for idx in sleeps {
        assert!(
            is_backoff_context(&retry.lines, idx),
            "unrecognised sleep: {}",
            retry.describe(idx)
        );
    }
}

/// Find all sleep() calls in production code
fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();
    for file in production_sources() {
        check_file(&file, &mut violations);
    }
    violations
}

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(")
}

fn check_file(file: &SourceFile, violations: &mut Vec<String>) {
    for idx in 0..file.lines.len() {
        if !is_sleep_call(file.code(idx)) {
            continue;
        }

        if is_backoff_context(&file.lines, idx) || is_interval_pattern(&file.lines, idx) {
            continue;
        }

        violations.push(file.describe(idx));
    }
}

/// Check if sleep is used for exponential backoff (acceptable for retry logic)
fn is_backoff_context(lines: &[String], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(15)..std::cmp::min(current_idx + 5, lines.len());

    let mut has_backoff_calc = false;
    let mut has_retry_context = false;

    for line in &lines[context_range] {
        let line = line.to_lowercase();

        // Growth of the delay: shift, pow, doubling or a multiplier
        if line.contains("<<")
            || line.contains("pow")
            || line.contains("* 2")
            || line.contains("mul_f64")
            || line.contains("next_delay")
        {
            has_backoff_calc = true;
        }

        if line.contains("retry") || line.contains("backoff") || line.contains("attempt") {
            has_retry_context = true;
        }
    }

    has_backoff_calc && has_retry_context
}

/// Check if this is tokio::time::interval pattern (acceptable for periodic tasks)
fn is_interval_pattern(lines: &[String], current_idx: usize) -> bool {
    let before = current_idx.saturating_sub(20)..current_idx;
    let after = current_idx..std::cmp::min(current_idx + 5, lines.len());

    lines[before]
        .iter()
        .any(|line| line.contains("interval.tick()") || line.contains("tokio::time::interval"))
        || lines[after].iter().any(|line| line.contains("interval.tick()"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_plain_sleep_is_not_backoff() {
        let code = owned(&[
            "async fn wait_for_pool() {",
            "    tokio::time::sleep(Duration::from_millis(10)).await;",
            "}",
        ]);
        assert!(!is_backoff_context(&code, 1));
        assert!(!is_interval_pattern(&code, 1));
    }

    #[test]
    fn test_backoff_detection() {
        let code = owned(&[
            "loop {",
            "    let backoff = self.jittered(delay);",
            "    tracing::debug!(attempt, \"Transient error, retrying\");",
            "    tokio::time::sleep(backoff).await;",
            "    delay = self.next_delay(delay);",
            "}",
        ]);
        assert!(is_backoff_context(&code, 3));
    }

    #[test]
    fn test_interval_detection() {
        let code = owned(&[
            "let mut interval = tokio::time::interval(period);",
            "loop {",
            "    interval.tick().await;",
            "    tokio::time::sleep(jitter).await;",
            "}",
        ]);
        assert!(is_interval_pattern(&code, 3));
    }
}
