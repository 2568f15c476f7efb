//! Path normalization and workspace-escape rejection for extracted paths.
//!
//! Adapted from the workspace security module's traversal/bounds checks,
//! narrowed to pure string validation: the extractor never touches the
//! filesystem, it only decides which candidate paths are safe to hand to
//! the workspace writer.

const DEFAULT_BLOCKED_PREFIXES: &[&str] = &[
    "etc/", "sys/", "proc/", "root/", "boot/", "dev/", "bin/", "sbin/", "usr/", "lib/",
];

pub struct PathPolicy {
    blocked_prefixes: Vec<String>,
}

impl Default for PathPolicy {
    fn default() -> Self {
        Self { blocked_prefixes: DEFAULT_BLOCKED_PREFIXES.iter().map(|s| s.to_string()).collect() }
    }
}

impl PathPolicy {
    pub fn new(blocked_prefixes: Vec<String>) -> Self {
        Self { blocked_prefixes }
    }

    /// Normalize a raw extracted path: forward slashes, strip a leading
    /// `/`, reject any `..` segment, reject blocked system prefixes.
    /// Returns the normalized path or a rejection reason.
    pub fn normalize(&self, raw: &str) -> Result<String, String> {
        let raw = raw.replace('\\', "/");
        let trimmed = raw.trim_start_matches('/');

        if trimmed.is_empty() {
            return Err("empty path".to_string());
        }

        let segments: Vec<&str> = trimmed.split('/').collect();
        if segments.iter().any(|s| *s == "..") {
            return Err("path traversal: contains '..'".to_string());
        }
        if segments.iter().any(|s| s.is_empty() && segments.len() > 1) {
            return Err("path contains an empty segment".to_string());
        }

        let normalized = segments.join("/");

        for blocked in &self.blocked_prefixes {
            if normalized.starts_with(blocked.as_str()) {
                return Err(format!("path is under blocked system directory: {blocked}"));
            }
        }

        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_leading_slash() {
        let policy = PathPolicy::default();
        assert_eq!(policy.normalize("/src/a.txt").unwrap(), "src/a.txt");
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        let policy = PathPolicy::default();
        assert!(policy.normalize("../etc/passwd").is_err());
        assert!(policy.normalize("a/../../b").is_err());
    }

    #[test]
    fn rejects_blocked_system_prefix() {
        let policy = PathPolicy::default();
        assert!(policy.normalize("etc/passwd").is_err());
    }

    #[test]
    fn allows_ordinary_relative_path() {
        let policy = PathPolicy::default();
        assert_eq!(policy.normalize("cmd/main.go").unwrap(), "cmd/main.go");
    }
}
