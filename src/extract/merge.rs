//! Merge strategies for splicing a code fragment into an existing file

/// Combine the active file content with a newly proposed fragment.
///
/// Implementations return the full new file content. They never fail: a
/// fragment they cannot place is treated as a full replacement.
pub trait MergeStrategy: Send + Sync {
    fn merge(&self, existing: &str, fragment: &str) -> String;
}

/// Tokens that mark a fragment as a member to splice rather than a new file
const SPLICE_TOKENS: [&str; 4] = ["function", "event", "enum", "mapping"];

/// Textual splice before the final closing brace.
///
/// Does not parse the language: nested braces or braces inside string
/// literals can produce a wrong placement.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpliceMerge;

impl MergeStrategy for SpliceMerge {
    fn merge(&self, existing: &str, fragment: &str) -> String {
        if !SPLICE_TOKENS.iter().any(|token| fragment.contains(token)) {
            return fragment.to_string();
        }

        let existing = existing.trim_end();
        let Some(brace) = existing.rfind('}') else {
            return fragment.to_string();
        };
        let (head, _) = existing.split_at(brace);
        format!("{}\n\n    {}\n}}", head.trim_end(), fragment.trim())
    }
}
