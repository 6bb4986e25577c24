//! Per-chat versioned virtual file store
//!
//! Maps a logical file name to its active [`FileVersion`] plus a bounded
//! FIFO history of strictly prior versions. All lookups go through
//! [`logical_name`], so `Token_1699.sol` and `Token.sol` address the same
//! entry.


use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Maximum number of prior versions kept per logical file
pub const MAX_HISTORY: usize = 5;

/// Extension re-appended by [`logical_name`]
pub const CANONICAL_EXTENSION: &str = "sol";

/// Language recorded when a writer does not name one
pub const DEFAULT_LANGUAGE: &str = "solidity";

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

/// Accepts integral or fractional epoch milliseconds
pub(crate) fn deserialize_millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Millis {
        Int(i64),
        Float(f64),
    }

    Ok(match Millis::deserialize(deserializer)? {
        Millis::Int(ms) => ms,
        #[allow(clippy::cast_possible_truncation)]
        Millis::Float(ms) => ms as i64,
    })
}

/// One immutable snapshot of a file's content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileVersion {
    pub content: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Milliseconds since the Unix epoch, never decreasing within an entry
    #[serde(deserialize_with = "deserialize_millis")]
    pub timestamp: i64,
}

/// Active version of a logical file plus its prior versions, oldest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub active: FileVersion,
    pub history: Vec<FileVersion>,
}

/// What a [`VersionedFileStore::put`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Updated,
    /// Content matched the active version; only the timestamp moved
    Unchanged,
}

/// Canonicalize a physical path to the store's lookup key.
///
/// Takes the base name, drops the extension and any trailing `_<suffix>`
/// token, then re-appends `.sol`.
pub fn logical_name(path: &str) -> String {
    let base = path.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(path);
    let stem = match base.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => base,
    };
    let stem = match stem.rsplit_once('_') {
        Some((head, _suffix)) if !head.is_empty() => head,
        _ => stem,
    };
    format!("{stem}.{CANONICAL_EXTENSION}")
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Versioned file store owned by one chat session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionedFileStore {
    entries: BTreeMap<String, FileEntry>,
}

impl VersionedFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `content` as the active version of `name`.
    ///
    /// Differing content pushes the previous active version onto the
    /// history (evicting the oldest past [`MAX_HISTORY`]). Equal content
    /// only refreshes the active timestamp.
    pub fn put(&mut self, name: &str, content: &str, language: &str) -> PutOutcome {
        self.put_at(name, content, language, now_millis())
    }

    fn put_at(&mut self, name: &str, content: &str, language: &str, now: i64) -> PutOutcome {
        let key = logical_name(name);
        match self.entries.get_mut(&key) {
            None => {
                self.entries.insert(
                    key,
                    FileEntry {
                        active: FileVersion {
                            content: content.to_string(),
                            language: language.to_string(),
                            timestamp: now,
                        },
                        history: Vec::new(),
                    },
                );
                PutOutcome::Created
            }
            Some(entry) => {
                let timestamp = now.max(entry.active.timestamp);
                if entry.active.content == content {
                    entry.active.timestamp = timestamp;
                    return PutOutcome::Unchanged;
                }
                let previous = std::mem::replace(
                    &mut entry.active,
                    FileVersion {
                        content: content.to_string(),
                        language: language.to_string(),
                        timestamp,
                    },
                );
                entry.history.push(previous);
                if entry.history.len() > MAX_HISTORY {
                    let excess = entry.history.len() - MAX_HISTORY;
                    entry.history.drain(..excess);
                }
                PutOutcome::Updated
            }
        }
    }

    /// Active version (`version == None`) or `history[version]`.
    ///
    /// Out-of-range indices report absence rather than failing.
    pub fn get(&self, name: &str, version: Option<usize>) -> Option<&FileVersion> {
        let entry = self.entries.get(&logical_name(name))?;
        match version {
            None => Some(&entry.active),
            Some(index) => entry.history.get(index),
        }
    }

    /// Remove the active entry and its history. Returns whether anything was removed.
    pub fn delete(&mut self, name: &str) -> bool {
        self.entries.remove(&logical_name(name)).is_some()
    }

    pub fn history_of(&self, name: &str) -> &[FileVersion] {
        self.entries
            .get(&logical_name(name))
            .map_or(&[], |entry| entry.history.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(logical name, entry)` pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// Rebuild a store from persisted parts.
    ///
    /// Keys are re-normalized; history beyond [`MAX_HISTORY`] keeps the newest
    /// versions. History for a name without an active version is dropped.
    pub fn from_parts(
        active: impl IntoIterator<Item = (String, FileVersion)>,
        history: BTreeMap<String, Vec<FileVersion>>,
    ) -> Self {
        let mut normalized_history: BTreeMap<String, Vec<FileVersion>> = BTreeMap::new();
        for (name, versions) in history {
            normalized_history
                .entry(logical_name(&name))
                .or_default()
                .extend(versions);
        }

        let mut entries = BTreeMap::new();
        for (name, version) in active {
            let key = logical_name(&name);
            let mut prior = normalized_history.remove(&key).unwrap_or_default();
            if prior.len() > MAX_HISTORY {
                let excess = prior.len() - MAX_HISTORY;
                prior.drain(..excess);
            }
            entries.insert(
                key,
                FileEntry {
                    active: version,
                    history: prior,
                },
            );
        }
        Self { entries }
    }
}
