//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! on the gateway sources:
//! - No sleep() calls outside retry backoff
//! - No blocking I/O inside async code
//!
//! The helpers here read production sources and answer "what function is
//! this line in" questions with line-oriented heuristics. They are not a
//! parser; they only need to be right for code formatted by rustfmt.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["gateway/core/src", "gateway/daemon/src"];

/// Workspace root, resolved from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

/// One production source file, with `#[cfg(test)]` modules cut off
pub struct SourceFile {
    /// Path for reporting
    pub path: PathBuf,
    /// Lines up to (not including) the first `#[cfg(test)]`
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Read a file; unreadable files yield `None`
    #[must_use]
    pub fn read(path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        Some(Self::from_source(path.to_path_buf(), &content))
    }

    /// Build from in-memory source
    #[must_use]
    pub fn from_source(path: PathBuf, content: &str) -> Self {
        let all: Vec<&str> = content.lines().collect();
        let end = all
            .windows(2)
            .position(|pair| {
                pair[0].trim() == "#[cfg(test)]"
                    && pair[1].trim_start().starts_with("mod ")
                    && pair[1].trim_end().ends_with('{')
            })
            .unwrap_or(all.len());
        let lines = all[..end].iter().map(|line| (*line).to_string()).collect();
        Self { path, lines }
    }

    /// Line with any trailing `//` comment removed
    #[must_use]
    pub fn code(&self, idx: usize) -> &str {
        let line = &self.lines[idx];
        line.split("//").next().unwrap_or(line)
    }

    /// Kind of the nearest function signature at or above `idx`
    #[must_use]
    pub fn enclosing_fn(&self, idx: usize) -> Option<FnKind> {
        self.lines[..=idx].iter().rev().find_map(|line| fn_kind(line))
    }

    /// `path:line - text` for violation reports
    #[must_use]
    pub fn describe(&self, idx: usize) -> String {
        format!(
            "{}:{} - {}",
            self.path.display(),
            idx + 1,
            self.lines[idx].trim()
        )
    }
}

/// Sync or async function
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FnKind {
    /// Plain `fn`
    Sync,
    /// `async fn`
    Async,
}

/// Classify a line as a function signature, ignoring visibility and qualifiers
#[must_use]
pub fn fn_kind(line: &str) -> Option<FnKind> {
    let mut rest = line.trim();
    let mut is_async = false;
    loop {
        if let Some(after) = rest.strip_prefix("fn ") {
            return (!after.is_empty()).then_some(if is_async {
                FnKind::Async
            } else {
                FnKind::Sync
            });
        }
        let word_end = rest.find(' ')?;
        let word = &rest[..word_end];
        match word {
            "async" => is_async = true,
            "pub" | "const" | "unsafe" | "extern" => {}
            w if w.starts_with("pub(") => {}
            _ => return None,
        }
        rest = rest[word_end..].trim_start();
    }
}

/// Every `.rs` file under the production roots
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    PRODUCTION_DIRS
        .iter()
        .map(|dir| root.join(dir))
        .filter(|dir| dir.exists())
        .flat_map(|dir| walkdir::WalkDir::new(dir).into_iter().filter_map(Result::ok))
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .filter_map(|entry| SourceFile::read(entry.path()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_kind() {
        assert_eq!(fn_kind("fn main() {"), Some(FnKind::Sync));
        assert_eq!(fn_kind("    pub fn load(path: &Path) -> Result<()> {"), Some(FnKind::Sync));
        assert_eq!(fn_kind("pub(crate) async fn route(&self) {"), Some(FnKind::Async));
        assert_eq!(fn_kind("    async fn handle("), Some(FnKind::Async));
        assert_eq!(fn_kind("let f = fn_ptr;"), None);
        assert_eq!(fn_kind("// fn commented()"), None);
    }

    #[test]
    fn test_test_modules_are_cut() {
        let file = SourceFile::from_source(
            PathBuf::from("x.rs"),
            "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n",
        );
        assert_eq!(file.lines.len(), 1);
    }

    #[test]
    fn test_enclosing_fn() {
        let file = SourceFile::from_source(
            PathBuf::from("x.rs"),
            "pub fn load() {\n    read();\n}\n\npub async fn run() {\n    serve().await;\n}\n",
        );
        assert_eq!(file.enclosing_fn(1), Some(FnKind::Sync));
        assert_eq!(file.enclosing_fn(5), Some(FnKind::Async));
    }

    #[test]
    fn test_production_dirs_exist() {
        let root = workspace_root();
        for dir in PRODUCTION_DIRS {
            assert!(root.join(dir).exists(), "missing production dir {dir}");
        }
    }
}
