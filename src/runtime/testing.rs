//! Test utilities and mock implementations for runtime testing

use super::traits::LlmClient;
use super::{ClientContext, EventKind, Request, RuntimeConfig, ServerEvent, SessionRuntime};
use crate::llm::{ContentBlock, LlmError, LlmRequest, LlmResponse, Usage};
use crate::session::{ChatStorage, SessionRegistry};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful text reply
    pub fn queue_text(&self, text: &str) {
        self.responses.lock().unwrap().push_back(Ok(LlmResponse {
            content: vec![ContentBlock::text(text)],
            end_turn: true,
            usage: Usage::default(),
        }));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Mock LLM client that sleeps before answering
pub struct DelayedMockLlmClient {
    inner: MockLlmClient,
    delay: Duration,
}

impl DelayedMockLlmClient {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MockLlmClient::new("slow-model"),
            delay,
        }
    }

    pub fn queue_text(&self, text: &str) {
        self.inner.queue_text(text);
    }
}

#[async_trait]
impl LlmClient for DelayedMockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        tokio::time::sleep(self.delay).await;
        self.inner.complete(request).await
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A running session worker on a temporary chat directory
pub struct TestSession {
    pub registry: Arc<SessionRegistry>,
    pub requests: mpsc::Sender<Request>,
    pub events: mpsc::Receiver<ServerEvent>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<()>,
    pub wallet: String,
    _dir: TempDir,
}

impl TestSession {
    pub fn start<L: LlmClient + 'static>(llm: L, config: RuntimeConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::load(ChatStorage::new(dir.path())).unwrap());
        let (request_tx, request_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let wallet = "0xabc".to_string();

        let runtime = SessionRuntime::new(
            wallet.clone(),
            Arc::clone(&registry),
            llm,
            config,
            request_rx,
            event_tx,
            cancel.clone(),
        );
        let handle = tokio::spawn(runtime.run());

        Self {
            registry,
            requests: request_tx,
            events: event_rx,
            cancel,
            handle,
            wallet,
            _dir: dir,
        }
    }

    pub async fn next(&mut self) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Consume the handshake and return the default chat's id
    pub async fn handshake(&mut self) -> String {
        let loaded = self.next().await;
        assert_eq!(loaded.kind, EventKind::ContextsLoaded);
        loaded.content[0]["id"].as_str().unwrap().to_string()
    }

    pub async fn send(&self, request: Request) {
        self.requests.send(request).await.unwrap();
    }

    pub async fn chat(&self, chat_id: &str, text: &str) {
        self.send(Request::Chat {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            context: ClientContext::default(),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::llm::{LlmConfig, MessageRole, ModelRegistry};
    use crate::runtime::RuntimeManager;
    use crate::session::Sender;
    use crate::state_machine::{PREAMBLE_MESSAGE, READY_MESSAGE};
    use serde_json::json;

    const EXISTING: &str = "contract C {\n    uint256 balance;\n}";

    fn error_kind(event: &ServerEvent) -> Option<ErrorKind> {
        event.metadata.as_ref().and_then(|m| m.kind)
    }

    #[tokio::test]
    async fn test_mock_llm_client() {
        let mock = MockLlmClient::new("test-model");
        mock.queue_text("Hello");

        let request = LlmRequest {
            system: String::new(),
            messages: vec![],
            max_tokens: Some(100),
            temperature: None,
        };

        let response = mock.complete(&request).await.unwrap();
        assert_eq!(response.text(), "Hello");

        // Second call should fail (no more responses)
        assert!(mock.complete(&request).await.is_err());
        assert_eq!(mock.recorded_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_handshake_creates_main_chat() {
        let mut session = TestSession::start(MockLlmClient::new("m"), RuntimeConfig::immediate());

        let loaded = session.next().await;
        assert_eq!(loaded.kind, EventKind::ContextsLoaded);
        assert_eq!(loaded.content.as_array().unwrap().len(), 1);
        assert_eq!(loaded.content[0]["name"], json!("Main Chat"));
        assert_eq!(session.registry.list_chats(&session.wallet).len(), 1);
    }

    #[tokio::test]
    async fn test_turn_creates_contract() {
        let llm = Arc::new(MockLlmClient::new("m"));
        llm.queue_text("I'll add checkBalance.\n```solidity\ncontract C { function checkBalance() public {} }\n```");
        let mut session = TestSession::start(Arc::clone(&llm), RuntimeConfig::immediate());
        let chat_id = session.handshake().await;

        session.chat(&chat_id, "add checkBalance").await;

        let preamble = session.next().await;
        assert_eq!(preamble.content, json!(PREAMBLE_MESSAGE));
        let prose = session.next().await;
        assert_eq!(prose.kind, EventKind::Message);
        assert_eq!(prose.content, json!("I'll add checkBalance."));
        let create = session.next().await;
        assert_eq!(create.kind, EventKind::FileCreate);
        assert_eq!(create.content, json!("contract C { function checkBalance() public {} }"));
        let metadata = create.metadata.unwrap();
        assert_eq!(metadata.path.as_deref(), Some("contracts/Contract.sol"));
        assert_eq!(metadata.language.as_deref(), Some("solidity"));
        assert_eq!(metadata.chat_id.as_deref(), Some(chat_id.as_str()));

        // Written through to the store under its logical name
        let stored = session
            .registry
            .get_file(&session.wallet, &chat_id, "Contract.sol", None)
            .unwrap()
            .unwrap();
        assert_eq!(stored.content, "contract C { function checkBalance() public {} }");

        // Transcript: the user line plus every emitted event
        let record = session.registry.chat_record(&session.wallet, &chat_id).unwrap();
        assert_eq!(record.messages.len(), 4);
        assert_eq!(record.messages[0].sender, Sender::User);
        assert_eq!(record.messages[3].kind.as_deref(), Some("file_create"));

        let history = session.registry.history(&session.wallet, &chat_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[1].role, MessageRole::Assistant);

        let requests = llm.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages.len(), 1);
        assert_eq!(requests[0].max_tokens, Some(4096));
    }

    #[tokio::test]
    async fn test_turn_splices_fragment_into_stored_contract() {
        let llm = Arc::new(MockLlmClient::new("m"));
        llm.queue_text("Add this:\n```solidity\nfunction checkBalance() public view returns (uint256) { return balance; }\n```");
        let mut session = TestSession::start(Arc::clone(&llm), RuntimeConfig::immediate());
        let chat_id = session.handshake().await;
        session
            .registry
            .put_file(&session.wallet, &chat_id, "contracts/Contract.sol", EXISTING, "solidity")
            .unwrap();

        session.chat(&chat_id, "add a balance getter").await;

        assert_eq!(session.next().await.content, json!(PREAMBLE_MESSAGE));
        assert_eq!(session.next().await.content, json!("Add this:"));
        let edit = session.next().await;
        assert_eq!(edit.kind, EventKind::CodeEdit);
        let expected = "contract C {\n    uint256 balance;\n\n    function checkBalance() public view returns (uint256) { return balance; }\n}";
        assert_eq!(edit.content, json!(expected));

        let stored = session
            .registry
            .get_file(&session.wallet, &chat_id, "contracts/Contract.sol", None)
            .unwrap()
            .unwrap();
        assert_eq!(stored.content, expected);
        assert_eq!(
            session.registry.file_history(&session.wallet, &chat_id, "Contract.sol").unwrap().len(),
            1
        );

        // The stored contract is shown to the model
        assert!(llm.recorded_requests()[0].system.contains("uint256 balance;"));
    }

    #[tokio::test]
    async fn test_client_code_overrides_store() {
        let llm = Arc::new(MockLlmClient::new("m"));
        llm.queue_text("```solidity\nevent Paid(uint256 amount);\n```");
        let mut session = TestSession::start(Arc::clone(&llm), RuntimeConfig::immediate());
        let chat_id = session.handshake().await;

        session
            .send(Request::Chat {
                chat_id: chat_id.clone(),
                text: "emit an event".to_string(),
                context: ClientContext {
                    current_file: Some("contracts/Token.sol".to_string()),
                    current_code: Some(EXISTING.to_string()),
                    ..ClientContext::default()
                },
            })
            .await;

        assert_eq!(session.next().await.content, json!(PREAMBLE_MESSAGE));
        let edit = session.next().await;
        assert_eq!(edit.kind, EventKind::CodeEdit);
        assert_eq!(edit.metadata.unwrap().path.as_deref(), Some("contracts/Token.sol"));
        assert_eq!(
            edit.content,
            json!("contract C {\n    uint256 balance;\n\n    event Paid(uint256 amount);\n}")
        );
        assert!(llm.recorded_requests()[0].system.contains("contracts/Token.sol"));
    }

    #[tokio::test]
    async fn test_blank_client_code_falls_back_to_file_system() {
        let llm = Arc::new(MockLlmClient::new("m"));
        llm.queue_text("```solidity\nevent Paid(uint256 amount);\n```");
        let mut session = TestSession::start(Arc::clone(&llm), RuntimeConfig::immediate());
        let chat_id = session.handshake().await;

        session
            .send(Request::Chat {
                chat_id: chat_id.clone(),
                text: "emit an event".to_string(),
                context: ClientContext {
                    current_file: Some("contracts/Token.sol".to_string()),
                    current_code: Some(String::new()),
                    file_system: [("contracts/Token.sol".to_string(), json!({ "content": EXISTING }))]
                        .into_iter()
                        .collect(),
                },
            })
            .await;

        assert_eq!(session.next().await.content, json!(PREAMBLE_MESSAGE));
        let edit = session.next().await;
        assert_eq!(edit.kind, EventKind::CodeEdit);
        assert_eq!(
            edit.content,
            json!("contract C {\n    uint256 balance;\n\n    event Paid(uint256 amount);\n}")
        );
    }

    #[tokio::test]
    async fn test_blank_message_skips_model() {
        let llm = Arc::new(MockLlmClient::new("m"));
        let mut session = TestSession::start(Arc::clone(&llm), RuntimeConfig::immediate());
        let chat_id = session.handshake().await;

        session.chat(&chat_id, "   ").await;

        let reply = session.next().await;
        assert_eq!(reply.kind, EventKind::Message);
        assert_eq!(reply.content, json!(READY_MESSAGE));
        assert!(llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_model_failure_emits_single_error() {
        let llm = Arc::new(MockLlmClient::new("m"));
        llm.queue_error(LlmError::server_error("overloaded"));
        llm.queue_text("Recovered.");
        let mut session = TestSession::start(Arc::clone(&llm), RuntimeConfig::immediate());
        let chat_id = session.handshake().await;

        session.chat(&chat_id, "first").await;
        let error = session.next().await;
        assert_eq!(error.kind, EventKind::Error);
        assert_eq!(error_kind(&error), Some(ErrorKind::UpstreamFailure));
        assert!(error.content.as_str().unwrap().contains("overloaded"));

        // Only the user entry made it into the history
        let history = session.registry.history(&session.wallet, &chat_id).unwrap();
        assert_eq!(history.len(), 1);

        // The session is still usable
        session.chat(&chat_id, "second").await;
        assert_eq!(session.next().await.content, json!(PREAMBLE_MESSAGE));
        assert_eq!(session.next().await.content, json!("Recovered."));
        assert_eq!(llm.recorded_requests()[1].messages.len(), 2);
    }

    #[tokio::test]
    async fn test_model_timeout_is_upstream_failure() {
        let llm = DelayedMockLlmClient::new(Duration::from_secs(2));
        llm.queue_text("too late");
        let config = RuntimeConfig {
            llm_timeout: Duration::from_millis(50),
            ..RuntimeConfig::immediate()
        };
        let mut session = TestSession::start(llm, config);
        let chat_id = session.handshake().await;

        session.chat(&chat_id, "hello").await;
        let error = session.next().await;
        assert_eq!(error_kind(&error), Some(ErrorKind::UpstreamFailure));
        assert!(error.content.as_str().unwrap().contains("did not respond"));
    }

    #[tokio::test]
    async fn test_cancel_stops_in_flight_turn() {
        let llm = DelayedMockLlmClient::new(Duration::from_secs(30));
        let mut session = TestSession::start(llm, RuntimeConfig::default());
        let chat_id = session.handshake().await;

        session.chat(&chat_id, "hello").await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.cancel.cancel();

        let handle = session.handle;
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("runtime did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_pending_writes() {
        let llm = Arc::new(MockLlmClient::new("m"));
        llm.queue_text("Intro.\n```solidity\ncontract A {}\n```");
        let config = RuntimeConfig {
            emit_delay: Duration::from_millis(500),
            ..RuntimeConfig::immediate()
        };
        let mut session = TestSession::start(Arc::clone(&llm), config);
        let chat_id = session.handshake().await;

        session.chat(&chat_id, "write a contract").await;
        assert_eq!(session.next().await.content, json!(PREAMBLE_MESSAGE));
        assert_eq!(session.next().await.content, json!("Intro."));
        session.cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), &mut session.handle)
            .await
            .expect("runtime did not stop")
            .unwrap();
        assert!(session.events.recv().await.is_none());
        assert!(session
            .registry
            .get_file(&session.wallet, &chat_id, "Contract.sol", None)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_chat_is_not_found() {
        let mut session = TestSession::start(MockLlmClient::new("m"), RuntimeConfig::immediate());
        session.handshake().await;

        session.chat("missing", "hello").await;
        let error = session.next().await;
        assert_eq!(error_kind(&error), Some(ErrorKind::NotFound));
        assert_eq!(error.metadata.unwrap().chat_id.as_deref(), Some("missing"));
    }

    #[tokio::test]
    async fn test_rejected_message_keeps_session_open() {
        let llm = Arc::new(MockLlmClient::new("m"));
        let mut session = TestSession::start(Arc::clone(&llm), RuntimeConfig::immediate());
        let chat_id = session.handshake().await;

        session
            .send(Request::Rejected(crate::error::ChatError::invalid_input("Invalid message format")))
            .await;
        let error = session.next().await;
        assert_eq!(error.content, json!("Invalid message format"));
        assert_eq!(error_kind(&error), Some(ErrorKind::InvalidInput));

        session.chat(&chat_id, "").await;
        assert_eq!(session.next().await.content, json!(READY_MESSAGE));
    }

    #[tokio::test]
    async fn test_file_requests() {
        let mut session = TestSession::start(MockLlmClient::new("m"), RuntimeConfig::immediate());
        let chat_id = session.handshake().await;

        for content in ["v1", "v2"] {
            session
                .send(Request::SaveFile {
                    chat_id: chat_id.clone(),
                    path: "contracts/Token_1699.sol".to_string(),
                    content: content.to_string(),
                    language: None,
                })
                .await;
            let saved = session.next().await;
            assert_eq!(saved.kind, EventKind::FileSaved);
            assert_eq!(saved.content, json!("File saved successfully: contracts/Token_1699.sol"));
        }

        session
            .send(Request::GetFileVersion {
                chat_id: chat_id.clone(),
                path: "Token.sol".to_string(),
                version: None,
            })
            .await;
        let version = session.next().await;
        assert_eq!(version.kind, EventKind::FileVersion);
        assert_eq!(version.content, json!("v2"));
        assert!(version.metadata.unwrap().timestamp.is_some());

        session
            .send(Request::GetFileVersion {
                chat_id: chat_id.clone(),
                path: "Token.sol".to_string(),
                version: Some(0),
            })
            .await;
        assert_eq!(session.next().await.content, json!("v1"));

        session
            .send(Request::GetFileHistory {
                chat_id: chat_id.clone(),
                path: "Token.sol".to_string(),
            })
            .await;
        let history = session.next().await;
        assert_eq!(history.kind, EventKind::FileHistory);
        assert_eq!(history.content[0]["content"], json!("v1"));

        session
            .send(Request::DeleteFile {
                chat_id: chat_id.clone(),
                path: "Token.sol".to_string(),
            })
            .await;
        assert_eq!(session.next().await.kind, EventKind::FileDelete);

        session
            .send(Request::GetFileVersion {
                chat_id: chat_id.clone(),
                path: "Token.sol".to_string(),
                version: None,
            })
            .await;
        let missing = session.next().await;
        assert_eq!(missing.content, json!("File version not found: Token.sol"));
        assert_eq!(error_kind(&missing), Some(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_chat_requests() {
        let mut session = TestSession::start(MockLlmClient::new("m"), RuntimeConfig::immediate());
        session.handshake().await;

        session.send(Request::CreateChat { name: None }).await;
        let created = session.next().await;
        assert_eq!(created.kind, EventKind::ContextCreated);
        assert_eq!(created.content["name"], json!("Chat 2"));
        let chat_id = created.content["id"].as_str().unwrap().to_string();

        session.send(Request::SwitchChat { chat_id: chat_id.clone() }).await;
        let switched = session.next().await;
        assert_eq!(switched.kind, EventKind::ContextSwitched);
        assert_eq!(switched.content["id"], json!(chat_id));

        session.send(Request::DeleteChat { chat_id: chat_id.clone() }).await;
        assert_eq!(session.next().await.kind, EventKind::ContextDeleted);

        session.send(Request::DeleteChat { chat_id }).await;
        assert_eq!(error_kind(&session.next().await), Some(ErrorKind::NotFound));
        assert_eq!(session.registry.list_chats(&session.wallet).len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_previous_worker() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(SessionRegistry::load(ChatStorage::new(dir.path())).unwrap());
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new("m"));
        let manager = RuntimeManager::new(Arc::clone(&registry), llm, RuntimeConfig::immediate());

        let mut first = manager.connect("0xabc").await;
        assert_eq!(first.events.recv().await.unwrap().kind, EventKind::ContextsLoaded);

        let mut second = manager.connect("0xabc").await;
        assert_eq!(second.events.recv().await.unwrap().kind, EventKind::ContextsLoaded);

        // The first worker was cancelled and dropped its sender
        let closed = tokio::time::timeout(Duration::from_secs(5), first.events.recv())
            .await
            .unwrap();
        assert!(closed.is_none());

        // A stale disconnect leaves the new connection alone
        manager.disconnect("0xabc", first.id).await;
        assert!(manager.is_connected("0xabc").await);
        manager.disconnect("0xabc", second.id).await;
        assert!(!manager.is_connected("0xabc").await);

        // Only one default chat despite two handshakes
        assert_eq!(registry.list_chats("0xabc").len(), 1);
    }

    #[tokio::test]
    async fn test_production_client_without_keys_reports_upstream_failure() {
        let registry = Arc::new(ModelRegistry::new(&LlmConfig::default()));
        let llm = crate::runtime::RegistryLlmClient::new(registry, "claude-3.5-sonnet".to_string());
        let mut session = TestSession::start(llm, RuntimeConfig::immediate());
        let chat_id = session.handshake().await;

        session.chat(&chat_id, "hello").await;
        assert_eq!(error_kind(&session.next().await), Some(ErrorKind::UpstreamFailure));
    }
}
