//! Stack-detection heuristic for C6 image selection (§9 Open Question,
//! resolved in DESIGN.md): inspects a session workspace for Bun vs Python
//! markers, defaulting to Bun when neither is present.

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stack {
    Bun,
    Python,
}

/// Bun markers take precedence over Python markers when both are present
/// (a Python repo embedding a `package.json` for tooling is more common
/// than the reverse), and absence of either defaults to Bun.
pub fn detect_stack(workspace_path: &Path) -> Stack {
    if workspace_path.join("bun.lockb").exists() || workspace_path.join("package.json").exists() {
        return Stack::Bun;
    }
    if workspace_path.join("pyproject.toml").exists() || workspace_path.join("requirements.txt").exists() {
        return Stack::Python;
    }
    Stack::Bun
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_to_bun_when_no_markers_present() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_stack(dir.path()), Stack::Bun);
    }

    #[test]
    fn detects_python_from_pyproject() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pyproject.toml"), "[project]").unwrap();
        assert_eq!(detect_stack(dir.path()), Stack::Python);
    }

    #[test]
    fn bun_markers_take_precedence_over_python() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        fs::write(dir.path().join("requirements.txt"), "flask").unwrap();
        assert_eq!(detect_stack(dir.path()), Stack::Bun);
    }
}
