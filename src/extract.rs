//! Response-to-action extraction
//!
//! A single forward scan over the lines of an assistant response that
//! classifies them into [`Action`]s: prose lines become messages, fenced
//! Solidity blocks become file creations, edits, or illustrative
//! suggestion messages. The scan is pure: the active contract content it
//! merges against comes in through [`ParserContext`], never from the store.

mod action;
mod merge;


pub use action::Action;
pub use merge::{MergeStrategy, SpliceMerge};

/// Path used for the active contract when the client names none
pub const DEFAULT_CONTRACT_PATH: &str = "contracts/Contract.sol";

/// Opening fence for a block in the target language
const CODE_FENCE_OPEN: &str = "```solidity";
const CODE_FENCE: &str = "```";

/// Lines that announce illustrative code. Emitted, then consumed.
const SUGGESTION_KEYWORDS: [&str; 6] = [
    "suggestion:",
    "idea:",
    "you could:",
    "consider:",
    "recommendation:",
    "proposal:",
];

/// Lines that announce an edit of the active contract. Still emitted as prose.
const EDIT_KEYWORDS: [&str; 6] = ["edit", "modify", "update", "change", "add", "include"];

/// Per-response parser context.
///
/// Rebuilt from the chat session (or the client's editor state) at the start
/// of every turn; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserContext {
    pub is_editing_mode: bool,
    pub active_contract_path: String,
    pub active_contract_content: Option<String>,
    pub is_contract_complete: bool,
}

impl Default for ParserContext {
    fn default() -> Self {
        Self {
            is_editing_mode: false,
            active_contract_path: DEFAULT_CONTRACT_PATH.to_string(),
            active_contract_content: None,
            is_contract_complete: false,
        }
    }
}

impl ParserContext {
    /// Context for a turn against an existing contract
    pub fn editing(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            is_editing_mode: true,
            active_contract_path: path.into(),
            active_contract_content: Some(content.into()),
            is_contract_complete: true,
        }
    }

    fn active_content(&self) -> Option<&str> {
        self.active_contract_content
            .as_deref()
            .filter(|content| !content.is_empty())
    }
}

/// What the prose before a code block said about it.
///
/// Ordered so that a stronger announcement wins when several precede one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
enum BlockIntent {
    #[default]
    Plain,
    Edit,
    Suggestion,
}

#[derive(Debug)]
enum ScanState {
    Scanning { intent: BlockIntent },
    InCodeBlock { intent: BlockIntent, buffer: String },
}

fn contains_any(line: &str, keywords: &[&str]) -> bool {
    let lower = line.to_lowercase();
    keywords.iter().any(|keyword| lower.contains(keyword))
}

/// Turns assistant text into an ordered list of [`Action`]s
#[derive(Debug, Clone, Default)]
pub struct ActionExtractor<M = SpliceMerge> {
    merge: M,
}

impl ActionExtractor<SpliceMerge> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<M: MergeStrategy> ActionExtractor<M> {
    pub fn with_merge(merge: M) -> Self {
        Self { merge }
    }

    /// Extract actions without touching the caller's context
    pub fn extract(&self, response: &str, ctx: &ParserContext) -> Vec<Action> {
        let mut ctx = ctx.clone();
        self.extract_with_context(response, &mut ctx)
    }

    /// Extract actions, leaving `ctx` holding the active contract as of the
    /// end of the response.
    pub fn extract_with_context(&self, response: &str, ctx: &mut ParserContext) -> Vec<Action> {
        let editing = ctx.is_editing_mode || ctx.is_contract_complete;
        let mut actions = Vec::new();
        let mut state = ScanState::Scanning {
            intent: BlockIntent::Plain,
        };

        for line in response.split('\n') {
            state = match state {
                ScanState::Scanning { intent } => {
                    if contains_any(line, &SUGGESTION_KEYWORDS) {
                        actions.push(Action::message(line.trim()));
                        ScanState::Scanning {
                            intent: intent.max(BlockIntent::Suggestion),
                        }
                    } else {
                        let intent = if contains_any(line, &EDIT_KEYWORDS) {
                            intent.max(BlockIntent::Edit)
                        } else {
                            intent
                        };
                        if line.starts_with(CODE_FENCE_OPEN) {
                            ScanState::InCodeBlock {
                                intent,
                                buffer: String::new(),
                            }
                        } else {
                            let text = line.trim();
                            if !text.is_empty() {
                                actions.push(Action::message(text));
                            }
                            ScanState::Scanning { intent }
                        }
                    }
                }
                ScanState::InCodeBlock { intent, mut buffer } => {
                    if line.starts_with(CODE_FENCE_OPEN) {
                        // A second opening fence restarts the block
                        ScanState::InCodeBlock {
                            intent,
                            buffer: String::new(),
                        }
                    } else if line.starts_with(CODE_FENCE) {
                        if let Some(action) = self.classify_block(buffer.trim(), intent, editing, ctx) {
                            actions.push(action);
                        }
                        ScanState::Scanning {
                            intent: BlockIntent::Plain,
                        }
                    } else {
                        buffer.push_str(line);
                        buffer.push('\n');
                        ScanState::InCodeBlock { intent, buffer }
                    }
                }
            };
        }

        if let ScanState::InCodeBlock { buffer, .. } = &state {
            if !buffer.trim().is_empty() {
                tracing::debug!(
                    discarded_bytes = buffer.len(),
                    "Unterminated code block discarded"
                );
            }
        }

        actions
    }

    fn classify_block(
        &self,
        code: &str,
        intent: BlockIntent,
        editing: bool,
        ctx: &mut ParserContext,
    ) -> Option<Action> {
        if code.is_empty() {
            return None;
        }

        if intent == BlockIntent::Suggestion {
            return Some(Action::message(format!(
                "Example code:\n{CODE_FENCE_OPEN}\n{code}\n{CODE_FENCE}"
            )));
        }

        let path = ctx.active_contract_path.clone();

        if editing || intent == BlockIntent::Edit {
            if let Some(existing) = ctx.active_content() {
                if !code.starts_with("//") {
                    let merged = self.merge.merge(existing, code);
                    ctx.active_contract_content = Some(merged.clone());
                    return Some(Action::EditFile {
                        path,
                        replacement: merged,
                    });
                }
            }

            let action = if ctx.active_content().is_some() {
                Action::EditFile {
                    path,
                    replacement: code.to_string(),
                }
            } else {
                Action::CreateFile {
                    path,
                    content: code.to_string(),
                }
            };
            ctx.active_contract_content = Some(code.to_string());
            ctx.is_contract_complete = true;
            return Some(action);
        }

        ctx.active_contract_content = Some(code.to_string());
        ctx.is_contract_complete = true;
        Some(Action::CreateFile {
            path,
            content: code.to_string(),
        })
    }
}
