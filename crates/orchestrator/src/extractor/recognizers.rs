//! The four path recognizers, applied in priority order against each fenced
//! code block found in the response, left to right, non-overlapping.

use once_cell::sync::Lazy;
use regex::Regex;

pub struct RawArtifact {
    pub path: String,
    pub content: String,
    pub language_hint: Option<String>,
}

static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:File|Path|FILE):\s*(\S+)$").unwrap());
static SAVE_AS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)save (?:as|the following (?:file|code) as)\s+(\S+)").unwrap());
static FILENAME_COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^#\s*filename:\s*(\S+)$").unwrap());
static SLASH_COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^//\s*(\S+\.\S+)$").unwrap());
static HASH_COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#\s*(\S+\.\S+)$").unwrap());
static BARE_PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S+\.\S+$").unwrap());

/// Returns recognized artifacts plus one parse-failure message per
/// unterminated fence encountered. Scanning stops at the first unterminated
/// fence since everything after it is ambiguous.
pub fn recognize_all(response: &str) -> (Vec<RawArtifact>, Vec<String>) {
    let lines: Vec<&str> = response.split('\n').collect();
    let mut artifacts = Vec::new();
    let mut parse_warnings = Vec::new();
    let mut i = 0usize;

    while i < lines.len() {
        if !is_fence_open(lines[i]) {
            i += 1;
            continue;
        }

        let tag = lines[i].trim_start_matches("```").trim().to_string();
        let close = (i + 1..lines.len()).find(|&j| lines[j] == "```");

        let Some(close) = close else {
            parse_warnings.push(format!("unterminated fence starting at line {}", i + 1));
            break;
        };

        let content = if close > i + 1 { format!("{}\n", lines[i + 1..close].join("\n")) } else { String::new() };

        let path = recognize_path_marker(&lines, i)
            .or_else(|| recognize_fence_tag(&tag))
            .or_else(|| recognize_first_line_marker(&content))
            .or_else(|| recognize_save_as(&lines, i));

        if let Some((path, lang)) = path {
            artifacts.push(RawArtifact { path, content, language_hint: lang });
        }

        i = close + 1;
    }

    (artifacts, parse_warnings)
}

fn is_fence_open(line: &str) -> bool {
    line.trim_end().starts_with("```")
}

fn recognize_path_marker(lines: &[&str], fence_line: usize) -> Option<(String, Option<String>)> {
    let trimmed = nearest_preceding_nonblank(lines, fence_line)?;
    MARKER_RE.captures(trimmed).map(|c| (c[1].to_string(), None))
}

fn recognize_save_as(lines: &[&str], fence_line: usize) -> Option<(String, Option<String>)> {
    let trimmed = nearest_preceding_nonblank(lines, fence_line)?;
    SAVE_AS_RE.captures(trimmed).map(|c| (c[1].trim_end_matches(['.', ':', ',']).to_string(), None))
}

fn nearest_preceding_nonblank<'a>(lines: &[&'a str], fence_line: usize) -> Option<&'a str> {
    let mut j = fence_line;
    while j > 0 {
        j -= 1;
        let trimmed = lines[j].trim();
        if !trimmed.is_empty() {
            return Some(trimmed);
        }
    }
    None
}

fn recognize_fence_tag(tag: &str) -> Option<(String, Option<String>)> {
    if tag.is_empty() {
        return None;
    }
    if let Some(idx) = tag.find(char::is_whitespace) {
        let lang = &tag[..idx];
        let rest = tag[idx..].trim();
        if BARE_PATH_RE.is_match(rest) {
            return Some((rest.to_string(), Some(lang.to_string())));
        }
        return None;
    }
    if BARE_PATH_RE.is_match(tag) {
        return Some((tag.to_string(), None));
    }
    None
}

fn recognize_first_line_marker(content: &str) -> Option<(String, Option<String>)> {
    let first_line = content.lines().next()?.trim();
    if let Some(c) = FILENAME_COMMENT_RE.captures(first_line) {
        return Some((c[1].to_string(), None));
    }
    if let Some(c) = SLASH_COMMENT_RE.captures(first_line) {
        return Some((c[1].to_string(), None));
    }
    if let Some(c) = HASH_COMMENT_RE.captures(first_line) {
        return Some((c[1].to_string(), None));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_tag_with_bare_path_no_lang() {
        let (artifacts, _) = recognize_all("```src/main.rs\nfn main() {}\n```\n");
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, "src/main.rs");
        assert_eq!(artifacts[0].language_hint, None);
    }

    #[test]
    fn fence_without_any_path_marker_yields_no_artifact() {
        let (artifacts, _) = recognize_all("```\nprint('hi')\n```\n");
        assert!(artifacts.is_empty());
    }

    #[test]
    fn save_as_prose_precedes_fence() {
        let (artifacts, _) = recognize_all("Save the following file as config/app.yaml:\n\n```\nkey: value\n```\n");
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, "config/app.yaml");
    }
}
