//! Artifact Extractor: deterministic parsing of free-form LLM output into
//! named files.
//!
//! Four recognizers run in priority order over the response text, left to
//! right, consuming matched spans so a fenced block is never claimed by more
//! than one recognizer. Path safety reuses the traversal/bounds checks the
//! workspace security module applies elsewhere in the stack, narrowed here
//! to pure string normalization since the extractor has no filesystem
//! access of its own — it only decides which candidate paths are safe to
//! hand to the workspace writer.

mod path_policy;
mod recognizers;

pub use path_policy::PathPolicy;

use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub content: String,
    pub language_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractorWarning {
    Parse(String),
    Policy(String),
    Duplicate(String),
}

pub struct ExtractionResult {
    pub artifacts: Vec<Artifact>,
    pub warnings: Vec<ExtractorWarning>,
}

/// Apply all four recognizers in priority order and return deduplicated,
/// path-safe artifacts plus warnings for dropped candidates.
pub fn extract(response: &str, policy: &PathPolicy) -> ExtractionResult {
    let (raw, parse_failures) = recognizers::recognize_all(response);

    let mut seen = std::collections::HashSet::new();
    let mut artifacts = Vec::new();
    let mut warnings: Vec<ExtractorWarning> =
        parse_failures.into_iter().map(ExtractorWarning::Parse).collect();

    for candidate in raw {
        match policy.normalize(&candidate.path) {
            Ok(normalized) => {
                if !seen.insert(normalized.clone()) {
                    warnings.push(ExtractorWarning::Duplicate(normalized));
                    continue;
                }
                artifacts.push(Artifact {
                    path: normalized,
                    content: candidate.content,
                    language_hint: candidate.language_hint,
                });
            }
            Err(reason) => {
                debug!(path = %candidate.path, reason = %reason, "artifact path rejected by policy");
                warnings.push(ExtractorWarning::Policy(format!("{}: {reason}", candidate.path)));
            }
        }
    }

    ExtractionResult { artifacts, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_marker_extracts_file() {
        let response = "File: src/a.txt\n\n```\nhello\n```\n";
        let result = extract(response, &PathPolicy::default());
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].path, "src/a.txt");
        assert_eq!(result.artifacts[0].content, "hello\n");
    }

    #[test]
    fn fence_tag_line_path_is_recognized() {
        let response = "```go cmd/main.go\npackage main\n```\n";
        let result = extract(response, &PathPolicy::default());
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].path, "cmd/main.go");
        assert_eq!(result.artifacts[0].content, "package main\n");
    }

    #[test]
    fn duplicate_path_keeps_first_occurrence() {
        let response = "File: a.txt\n\n```\nfirst\n```\n\nFile: a.txt\n\n```\nsecond\n```\n";
        let result = extract(response, &PathPolicy::default());
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].content, "first\n");
        assert!(result.warnings.iter().any(|w| matches!(w, ExtractorWarning::Duplicate(_))));
    }

    #[test]
    fn unterminated_fence_is_dropped_with_parse_warning() {
        let response = "File: a.txt\n\n```\nhello\n";
        let result = extract(response, &PathPolicy::default());
        assert!(result.artifacts.is_empty());
        assert!(result.warnings.iter().any(|w| matches!(w, ExtractorWarning::Parse(_))));
    }

    #[test]
    fn traversal_path_is_dropped_with_policy_warning() {
        let response = "File: ../etc/passwd\n\n```\nmalicious\n```\n";
        let result = extract(response, &PathPolicy::default());
        assert!(result.artifacts.is_empty());
        assert!(result.warnings.iter().any(|w| matches!(w, ExtractorWarning::Policy(_))));
    }
}
