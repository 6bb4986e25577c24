//! Durable chat records
//!
//! One JSON file per chat at `<base>/<wallet>/<chat_id>.json`. Writes go to a
//! temp file that is renamed over the target so a crash never leaves a
//! half-written record.

use super::{ChatMessage, ChatSession};
use crate::llm::LlmMessage;
use crate::store::{FileVersion, VersionedFileStore};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Folder prefix for `virtualFiles` keys
const FILES_FOLDER: &str = "contracts";

/// Durable storage error
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    #[default]
    Chat,
}

/// Accepts RFC 3339 and offset-less ISO 8601 timestamps (read as UTC)
fn deserialize_datetime<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Serialized form of a [`ChatSession`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: String,
    pub name: String,
    pub wallet_address: String,
    #[serde(deserialize_with = "deserialize_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_datetime")]
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(rename = "type", default)]
    pub record_type: RecordType,
    /// Active file versions keyed `"<folder>/<logical name>"`
    #[serde(rename = "virtualFiles", default)]
    pub virtual_files: BTreeMap<String, FileVersion>,
    /// Prior versions, oldest first, keyed like `virtual_files`
    #[serde(rename = "fileHistory", default)]
    pub file_history: BTreeMap<String, Vec<FileVersion>>,
    /// Raw conversation sent to the model
    #[serde(default)]
    pub history: Vec<LlmMessage>,
}

impl ChatSession {
    pub fn to_record(&self) -> ChatRecord {
        let mut virtual_files = BTreeMap::new();
        let mut file_history = BTreeMap::new();
        for (name, entry) in self.store.iter() {
            let key = format!("{FILES_FOLDER}/{name}");
            if !entry.history.is_empty() {
                file_history.insert(key.clone(), entry.history.clone());
            }
            virtual_files.insert(key, entry.active.clone());
        }

        ChatRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            wallet_address: self.wallet_address.clone(),
            created_at: self.created_at,
            last_accessed: self.last_accessed,
            messages: self.messages.clone(),
            record_type: RecordType::Chat,
            virtual_files,
            file_history,
            history: self.history.clone(),
        }
    }

    pub fn from_record(record: ChatRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            wallet_address: record.wallet_address,
            created_at: record.created_at,
            last_accessed: record.last_accessed,
            messages: record.messages,
            store: VersionedFileStore::from_parts(record.virtual_files, record.file_history),
            history: record.history,
        }
    }
}

/// File-per-chat storage rooted at one directory
#[derive(Debug, Clone)]
pub struct ChatStorage {
    base: PathBuf,
}

impl ChatStorage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn chat_path(&self, wallet: &str, chat_id: &str) -> PathBuf {
        self.base.join(wallet).join(format!("{chat_id}.json"))
    }

    pub fn save(&self, record: &ChatRecord) -> Result<(), PersistError> {
        let path = self.chat_path(&record.wallet_address, &record.id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let temp_path = path.with_extension("json.tmp");

        {
            let file = File::create(&temp_path)?;
            let writer = BufWriter::new(file);
            serde_json::to_writer_pretty(writer, record)?;
        }

        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    /// Remove a chat file; a file that is already gone is not an error
    pub fn remove(&self, wallet: &str, chat_id: &str) -> Result<(), PersistError> {
        match fs::remove_file(self.chat_path(wallet, chat_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load_file(path: &Path) -> Result<ChatRecord, PersistError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Load every readable chat under the base directory.
    ///
    /// Unreadable or corrupt files are logged and skipped. Only a failure to
    /// list the base directory itself is an error.
    pub fn load_all(&self) -> Result<Vec<ChatRecord>, PersistError> {
        fs::create_dir_all(&self.base)?;
        let mut records = Vec::new();

        for wallet_entry in fs::read_dir(&self.base)? {
            let wallet_dir = match wallet_entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable wallet entry");
                    continue;
                }
            };
            if !wallet_dir.is_dir() {
                continue;
            }
            let Some(wallet) = wallet_dir.file_name().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };

            let chat_entries = match fs::read_dir(&wallet_dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(wallet = %wallet, error = %e, "Skipping unreadable wallet directory");
                    continue;
                }
            };

            for chat_entry in chat_entries.flatten() {
                let path = chat_entry.path();
                if path.extension().and_then(|s| s.to_str()) != Some("json") {
                    continue;
                }
                match Self::load_file(&path) {
                    Ok(mut record) => {
                        // The directory is authoritative for ownership
                        record.wallet_address.clone_from(&wallet);
                        records.push(record);
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping corrupt chat file");
                    }
                }
            }
        }

        Ok(records)
    }
}
