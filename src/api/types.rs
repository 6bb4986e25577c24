//! API request and response types

use crate::error::ChatError;
use crate::runtime::{ClientContext, Request};
use crate::session::ChatRecord;
use serde::{Deserialize, Serialize};

/// Raw inbound WebSocket message: `{type, content, context?, chat_id?, path?, version?, language?}`
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type", default = "default_message_type")]
    pub kind: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub context: Option<ClientContext>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub version: Option<usize>,
    #[serde(default)]
    pub language: Option<String>,
}

fn default_message_type() -> String {
    "message".to_string()
}

impl ClientMessage {
    /// Parse a text frame into a request for the session worker
    pub fn parse(text: &str) -> Result<Request, ChatError> {
        let message: ClientMessage =
            serde_json::from_str(text).map_err(|_| ChatError::invalid_input("Invalid message format"))?;
        message.into_request()
    }

    pub fn into_request(self) -> Result<Request, ChatError> {
        if self.kind == "create_context" {
            return Ok(Request::CreateChat { name: self.content });
        }

        let chat_id = self
            .chat_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ChatError::invalid_input("No chat_id provided"))?;

        match self.kind.as_str() {
            "message" => Ok(Request::Chat {
                chat_id,
                text: self.content.unwrap_or_default(),
                context: self.context.unwrap_or_default(),
            }),
            "save_file" => Ok(Request::SaveFile {
                chat_id,
                path: required_path(self.path)?,
                content: self.content.unwrap_or_default(),
                language: self.language,
            }),
            "get_file_version" => Ok(Request::GetFileVersion {
                chat_id,
                path: required_path(self.path)?,
                version: self.version,
            }),
            "get_file_history" => Ok(Request::GetFileHistory {
                chat_id,
                path: required_path(self.path)?,
            }),
            "delete_file" => Ok(Request::DeleteFile {
                chat_id,
                path: required_path(self.path)?,
            }),
            "switch_context" => Ok(Request::SwitchChat { chat_id }),
            "delete_context" => Ok(Request::DeleteChat { chat_id }),
            other => Err(ChatError::invalid_input(format!("Unknown message type: {other}"))),
        }
    }
}

fn required_path(path: Option<String>) -> Result<String, ChatError> {
    path.filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ChatError::invalid_input("No path provided for file"))
}

/// Query string of the WebSocket endpoint
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub wallet_address: Option<String>,
}

/// Request to create a chat
#[derive(Debug, Default, Deserialize)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// Response with a list of chats
#[derive(Debug, Serialize)]
pub struct ChatListResponse {
    pub chats: Vec<ChatRecord>,
    /// Whether an agent connection is open for the wallet
    pub connected: bool,
}

/// Response with a single chat
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub chat: ChatRecord,
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
