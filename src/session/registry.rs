//! Registry of chat sessions keyed by wallet address
//!
//! Loaded eagerly from [`ChatStorage`] at startup; every mutation goes through
//! [`SessionRegistry::mutate_chat`], which persists the chat afterwards.
//! Persistence failures are logged and the in-memory state stays
//! authoritative.

use super::{ChatMessage, ChatRecord, ChatSession, ChatStorage, PersistError};
use crate::error::ChatError;
use crate::llm::LlmMessage;
use crate::store::{FileVersion, PutOutcome};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Name given to the chat created for a wallet with none
pub const DEFAULT_CHAT_NAME: &str = "Main Chat";

type WalletChats = Arc<Mutex<HashMap<String, ChatSession>>>;

pub struct SessionRegistry {
    storage: ChatStorage,
    wallets: RwLock<HashMap<String, WalletChats>>,
}

impl SessionRegistry {
    /// Load every chat under the storage root
    pub fn load(storage: ChatStorage) -> Result<Self, PersistError> {
        let mut wallets: HashMap<String, HashMap<String, ChatSession>> = HashMap::new();
        let mut count = 0usize;
        for record in storage.load_all()? {
            let chat = ChatSession::from_record(record);
            wallets
                .entry(chat.wallet_address.clone())
                .or_default()
                .insert(chat.id.clone(), chat);
            count += 1;
        }

        tracing::info!(
            base = %storage.base().display(),
            wallets = wallets.len(),
            chats = count,
            "Loaded chat sessions"
        );

        Ok(Self {
            storage,
            wallets: RwLock::new(
                wallets
                    .into_iter()
                    .map(|(wallet, chats)| (wallet, Arc::new(Mutex::new(chats))))
                    .collect(),
            ),
        })
    }

    fn wallet(&self, wallet: &str) -> Option<WalletChats> {
        self.wallets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(wallet)
            .cloned()
    }

    fn wallet_or_create(&self, wallet: &str) -> WalletChats {
        if let Some(chats) = self.wallet(wallet) {
            return chats;
        }
        self.wallets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(wallet.to_string())
            .or_default()
            .clone()
    }

    fn persist(&self, chat: &ChatSession) {
        if let Err(e) = self.storage.save(&chat.to_record()) {
            tracing::error!(
                wallet = %chat.wallet_address,
                chat_id = %chat.id,
                error = %e,
                "Failed to persist chat"
            );
        }
    }

    /// Create a chat, named `Chat N` (N = existing count + 1) when unnamed
    pub fn create_chat(&self, wallet: &str, name: Option<&str>) -> ChatRecord {
        let chats = self.wallet_or_create(wallet);
        let mut chats = chats.lock().unwrap_or_else(PoisonError::into_inner);

        let id = uuid::Uuid::new_v4().to_string();
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => format!("Chat {}", chats.len() + 1),
        };
        let chat = ChatSession::new(id.clone(), name, wallet);
        self.persist(&chat);
        let record = chat.to_record();
        chats.insert(id, chat);

        tracing::info!(wallet = %wallet, chat_id = %record.id, name = %record.name, "Created chat");
        record
    }

    /// List a wallet's chats, oldest first
    pub fn list_chats(&self, wallet: &str) -> Vec<ChatRecord> {
        let Some(chats) = self.wallet(wallet) else {
            return Vec::new();
        };
        let chats = chats.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<ChatRecord> = chats.values().map(ChatSession::to_record).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// List a wallet's chats, creating [`DEFAULT_CHAT_NAME`] first if it has none
    pub fn ensure_default_chat(&self, wallet: &str) -> Vec<ChatRecord> {
        let chats = self.list_chats(wallet);
        if !chats.is_empty() {
            return chats;
        }
        self.create_chat(wallet, Some(DEFAULT_CHAT_NAME));
        self.list_chats(wallet)
    }

    pub fn chat_record(&self, wallet: &str, chat_id: &str) -> Result<ChatRecord, ChatError> {
        self.with_chat(wallet, chat_id, ChatSession::to_record)
    }

    /// Delete a chat from disk and memory
    pub fn delete_chat(&self, wallet: &str, chat_id: &str) -> Result<(), ChatError> {
        let chats = self
            .wallet(wallet)
            .ok_or_else(|| ChatError::chat_not_found(wallet, chat_id))?;
        let mut chats = chats.lock().unwrap_or_else(PoisonError::into_inner);
        if !chats.contains_key(chat_id) {
            return Err(ChatError::chat_not_found(wallet, chat_id));
        }

        self.storage.remove(wallet, chat_id).map_err(|e| {
            tracing::error!(wallet = %wallet, chat_id = %chat_id, error = %e, "Failed to delete chat file");
            ChatError::persistence(format!("Failed to delete chat {chat_id}: {e}"))
        })?;
        chats.remove(chat_id);

        tracing::info!(wallet = %wallet, chat_id = %chat_id, "Deleted chat");
        Ok(())
    }

    /// Read access to one chat
    pub fn with_chat<R>(
        &self,
        wallet: &str,
        chat_id: &str,
        f: impl FnOnce(&ChatSession) -> R,
    ) -> Result<R, ChatError> {
        let chats = self
            .wallet(wallet)
            .ok_or_else(|| ChatError::chat_not_found(wallet, chat_id))?;
        let chats = chats.lock().unwrap_or_else(PoisonError::into_inner);
        let chat = chats
            .get(chat_id)
            .ok_or_else(|| ChatError::chat_not_found(wallet, chat_id))?;
        Ok(f(chat))
    }

    /// Mutate one chat and persist it
    pub fn mutate_chat<R>(
        &self,
        wallet: &str,
        chat_id: &str,
        f: impl FnOnce(&mut ChatSession) -> R,
    ) -> Result<R, ChatError> {
        let chats = self
            .wallet(wallet)
            .ok_or_else(|| ChatError::chat_not_found(wallet, chat_id))?;
        let mut chats = chats.lock().unwrap_or_else(PoisonError::into_inner);
        let chat = chats
            .get_mut(chat_id)
            .ok_or_else(|| ChatError::chat_not_found(wallet, chat_id))?;
        let result = f(chat);
        chat.touch();
        self.persist(chat);
        Ok(result)
    }

    pub fn append_message(&self, wallet: &str, chat_id: &str, message: ChatMessage) -> Result<(), ChatError> {
        self.mutate_chat(wallet, chat_id, |chat| chat.add_message(message))
    }

    pub fn append_history(&self, wallet: &str, chat_id: &str, entry: LlmMessage) -> Result<(), ChatError> {
        self.mutate_chat(wallet, chat_id, |chat| chat.add_history(entry))
    }

    pub fn history(&self, wallet: &str, chat_id: &str) -> Result<Vec<LlmMessage>, ChatError> {
        self.with_chat(wallet, chat_id, |chat| chat.history.clone())
    }

    pub fn put_file(
        &self,
        wallet: &str,
        chat_id: &str,
        path: &str,
        content: &str,
        language: &str,
    ) -> Result<PutOutcome, ChatError> {
        self.mutate_chat(wallet, chat_id, |chat| chat.put_file(path, content, language))
    }

    pub fn get_file(
        &self,
        wallet: &str,
        chat_id: &str,
        path: &str,
        version: Option<usize>,
    ) -> Result<Option<FileVersion>, ChatError> {
        self.with_chat(wallet, chat_id, |chat| chat.get_file(path, version).cloned())
    }

    pub fn delete_file(&self, wallet: &str, chat_id: &str, path: &str) -> Result<bool, ChatError> {
        self.mutate_chat(wallet, chat_id, |chat| chat.delete_file(path))
    }

    pub fn file_history(&self, wallet: &str, chat_id: &str, path: &str) -> Result<Vec<FileVersion>, ChatError> {
        self.with_chat(wallet, chat_id, |chat| chat.file_history(path).to_vec())
    }
}
