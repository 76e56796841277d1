use anyhow::Result;
use codeclaw_storage::FindingLayer;
use regex::Regex;

use super::{splice, Hit, Span, TextPass};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootKind {
    Project,
    Home,
}

/// Rewrites absolute paths under known roots: project paths become
/// `./rest` (`[PROJECT]` for the root itself), home paths become `~/rest`.
pub struct PathAnonymizer {
    /// Longest first, so nested roots win over their parents
    roots: Vec<(String, RootKind)>,
    candidates: Regex,
}

/// Characters that may continue a path component
fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '@' | '+' | '%' | '~')
}

/// Characters that end a path inside prose or code
fn ends_path(c: char) -> bool {
    c.is_whitespace()
        || matches!(
            c,
            '"' | '\'' | '`' | '<' | '>' | '|' | ',' | ';' | ':' | '(' | ')' | '[' | ']' | '{' | '}'
        )
}

fn normalize_root(root: &str) -> Option<String> {
    let trimmed = root.trim().trim_end_matches('/');
    // A bare "/" would swallow every absolute path
    if trimmed.len() < 2 || !trimmed.starts_with('/') {
        return None;
    }
    Some(trimmed.to_string())
}

impl PathAnonymizer {
    /// Returns `None` when there are no usable roots
    ///
    /// # Errors
    ///
    /// Returns an error if the root alternation cannot be compiled
    pub fn new<'a>(
        project_roots: impl IntoIterator<Item = &'a str>,
        home: Option<&str>,
    ) -> Result<Option<Self>> {
        let mut roots: Vec<(String, RootKind)> = project_roots
            .into_iter()
            .filter_map(normalize_root)
            .map(|r| (r, RootKind::Project))
            .collect();
        if let Some(home) = home.and_then(normalize_root) {
            roots.push((home, RootKind::Home));
        }
        if roots.is_empty() {
            return Ok(None);
        }

        // Project roots take precedence over an identical home root
        roots.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        roots.dedup_by(|later, earlier| later.0 == earlier.0);

        let pattern = roots
            .iter()
            .map(|(root, _)| regex::escape(root))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Some(Self {
            candidates: Regex::new(&pattern)?,
            roots,
        }))
    }

    /// Longest root that starts at `pos` and ends on a path boundary
    fn root_at(&self, text: &str, pos: usize) -> Option<&(String, RootKind)> {
        let before = text[..pos].chars().next_back();
        if before.is_some_and(is_path_char) {
            return None;
        }
        self.roots.iter().find(|(root, _)| {
            text[pos..].starts_with(root.as_str())
                && !text[pos + root.len()..]
                    .chars()
                    .next()
                    .is_some_and(|c| c != '/' && is_path_char(c))
        })
    }
}

impl TextPass for PathAnonymizer {
    fn layer(&self) -> FindingLayer {
        FindingLayer::Path
    }

    fn apply(&self, text: &str) -> (String, Vec<Hit>) {
        let mut spans = Vec::new();
        let mut pos = 0;

        while let Some(candidate) = self.candidates.find_at(text, pos) {
            let start = candidate.start();
            let Some((root, kind)) = self.root_at(text, start) else {
                // Advance one character past the rejected candidate
                pos = start + text[start..].chars().next().map_or(1, char::len_utf8);
                continue;
            };

            let after_root = start + root.len();
            let rest_len = text[after_root..]
                .find(ends_path)
                .unwrap_or(text.len() - after_root);
            let end = after_root + rest_len;
            let rest = text[after_root..end].trim_end_matches(['.', '/']);
            let end = after_root + rest.len();

            let replacement = match (kind, rest.is_empty()) {
                (RootKind::Project, true) => "[PROJECT]".to_string(),
                (RootKind::Project, false) => format!(".{rest}"),
                (RootKind::Home, _) => format!("~{rest}"),
            };
            let label = match kind {
                RootKind::Project => "project_path",
                RootKind::Home => "home_path",
            };
            spans.push(Span {
                start,
                end,
                kind: label.to_string(),
                replacement,
            });
            pos = end;
        }

        splice(text, spans)
    }
}
