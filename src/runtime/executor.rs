//! Session runtime executor

use super::traits::LlmClient;
use super::{ClientContext, EventKind, EventMetadata, Request, RuntimeConfig, ServerEvent};

use crate::error::ChatError;
use crate::extract::{Action, ActionExtractor, ParserContext, DEFAULT_CONTRACT_PATH};
use crate::llm::{LlmError, LlmMessage, LlmRequest};
use crate::session::{ChatMessage, SessionRegistry, Sender as TranscriptSender};
use crate::state_machine::{transition, Effect, Event, Pause, TurnState};
use crate::store::DEFAULT_LANGUAGE;
use crate::system_prompt::build_system_prompt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The chat a turn runs against, plus its parser context
struct Turn {
    chat_id: String,
    parser: ParserContext,
}

/// Worker for one connected wallet
pub struct SessionRuntime<L: LlmClient> {
    wallet: String,
    registry: Arc<SessionRegistry>,
    llm: L,
    extractor: ActionExtractor,
    config: RuntimeConfig,
    requests: mpsc::Receiver<Request>,
    events: mpsc::Sender<ServerEvent>,
    cancel: CancellationToken,
    state: TurnState,
    turn: Option<Turn>,
}

impl<L: LlmClient + 'static> SessionRuntime<L> {
    pub fn new(
        wallet: String,
        registry: Arc<SessionRegistry>,
        llm: L,
        config: RuntimeConfig,
        requests: mpsc::Receiver<Request>,
        events: mpsc::Sender<ServerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            wallet,
            registry,
            llm,
            extractor: ActionExtractor::new(),
            config,
            requests,
            events,
            cancel,
            state: TurnState::Idle,
            turn: None,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(wallet = %self.wallet, "Starting session runtime");

        let chats = self.registry.ensure_default_chat(&self.wallet);
        match serde_json::to_value(&chats) {
            Ok(content) => self.send(ServerEvent::new(EventKind::ContextsLoaded, content)).await,
            Err(e) => tracing::error!(error = %e, "Failed to serialize chat list"),
        }

        // One request at a time: a turn runs to completion before the next is read
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                request = self.requests.recv() => match request {
                    Some(request) => self.handle_request(request).await,
                    None => break,
                },
            }
        }

        tracing::info!(wallet = %self.wallet, "Session runtime stopped");
    }

    #[allow(clippy::too_many_lines)]
    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::Chat { chat_id, text, context } => self.run_turn(chat_id, text, &context).await,
            Request::SaveFile {
                chat_id,
                path,
                content,
                language,
            } => {
                let language = language.as_deref().unwrap_or(DEFAULT_LANGUAGE);
                let event = self
                    .registry
                    .put_file(&self.wallet, &chat_id, &path, &content, language)
                    .map(|outcome| {
                        tracing::info!(wallet = %self.wallet, chat_id = %chat_id, path = %path, ?outcome, "File saved");
                        ServerEvent::new(EventKind::FileSaved, format!("File saved successfully: {path}"))
                            .with_metadata(EventMetadata::for_path(path.clone()))
                            .with_chat_id(chat_id.clone())
                    });
                self.reply(&chat_id, event).await;
            }
            Request::GetFileVersion { chat_id, path, version } => {
                let event = self
                    .registry
                    .get_file(&self.wallet, &chat_id, &path, version)
                    .and_then(|file| {
                        let file = file.ok_or_else(|| ChatError::not_found(format!("File version not found: {path}")))?;
                        Ok(ServerEvent::new(EventKind::FileVersion, file.content).with_metadata(EventMetadata {
                            path: Some(path.clone()),
                            chat_id: Some(chat_id.clone()),
                            version,
                            timestamp: Some(file.timestamp),
                            language: Some(file.language),
                            kind: None,
                        }))
                    });
                self.reply(&chat_id, event).await;
            }
            Request::GetFileHistory { chat_id, path } => {
                let event = self
                    .registry
                    .file_history(&self.wallet, &chat_id, &path)
                    .and_then(|history| {
                        serde_json::to_value(history)
                            .map_err(|e| ChatError::persistence(format!("Failed to encode file history: {e}")))
                    })
                    .map(|content| {
                        ServerEvent::new(EventKind::FileHistory, content)
                            .with_metadata(EventMetadata::for_path(path.clone()))
                            .with_chat_id(chat_id.clone())
                    });
                self.reply(&chat_id, event).await;
            }
            Request::DeleteFile { chat_id, path } => {
                let event = self
                    .registry
                    .delete_file(&self.wallet, &chat_id, &path)
                    .and_then(|deleted| {
                        if deleted {
                            Ok(ServerEvent::from_action(&Action::DeleteFile { path: path.clone() }).with_chat_id(chat_id.clone()))
                        } else {
                            Err(ChatError::not_found(format!("File not found: {path}")))
                        }
                    });
                self.reply(&chat_id, event).await;
            }
            Request::CreateChat { name } => {
                let record = self.registry.create_chat(&self.wallet, name.as_deref());
                let chat_id = record.id.clone();
                match serde_json::to_value(&record) {
                    Ok(content) => {
                        self.send(ServerEvent::new(EventKind::ContextCreated, content).with_chat_id(chat_id))
                            .await;
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to serialize chat record"),
                }
            }
            Request::SwitchChat { chat_id } => {
                let event = self.registry.chat_record(&self.wallet, &chat_id).and_then(|record| {
                    serde_json::to_value(&record)
                        .map_err(|e| ChatError::persistence(format!("Failed to encode chat: {e}")))
                        .map(|content| ServerEvent::new(EventKind::ContextSwitched, content).with_chat_id(chat_id.clone()))
                });
                self.send(event.unwrap_or_else(|e| ServerEvent::error(&e))).await;
            }
            Request::DeleteChat { chat_id } => {
                let event = self
                    .registry
                    .delete_chat(&self.wallet, &chat_id)
                    .map(|()| ServerEvent::new(EventKind::ContextDeleted, chat_id.clone()).with_chat_id(chat_id.clone()));
                self.send(event.unwrap_or_else(|e| ServerEvent::error(&e))).await;
            }
            Request::Rejected(error) => {
                tracing::debug!(wallet = %self.wallet, error = %error, "Rejected inbound message");
                self.send(ServerEvent::error(&error)).await;
            }
        }
    }

    /// Send a request's outcome, tagging errors with the chat they concern
    async fn reply(&self, chat_id: &str, event: Result<ServerEvent, ChatError>) {
        let event = event.unwrap_or_else(|e| ServerEvent::error(&e).with_chat_id(chat_id));
        self.send(event).await;
    }

    async fn send(&self, event: ServerEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!(wallet = %self.wallet, "Client gone, dropping event");
        }
    }

    // ========================================================================
    // Turns
    // ========================================================================

    async fn run_turn(&mut self, chat_id: String, text: String, context: &ClientContext) {
        if let Err(e) = self.registry.chat_record(&self.wallet, &chat_id) {
            self.send(ServerEvent::error(&e).with_chat_id(chat_id)).await;
            return;
        }

        let parser = self.parser_context(&chat_id, context);
        tracing::info!(
            wallet = %self.wallet,
            chat_id = %chat_id,
            path = %parser.active_contract_path,
            editing = parser.is_editing_mode,
            "Starting turn"
        );
        self.turn = Some(Turn { chat_id, parser });

        if let Err(e) = self.process_event(Event::UserMessage { text }).await {
            tracing::error!(wallet = %self.wallet, error = %e, "Turn aborted");
        }

        if !self.state.is_idle() {
            tracing::warn!(wallet = %self.wallet, state = self.state.name(), "Turn ended outside idle");
        }
        self.turn = None;
        self.state = TurnState::Idle;
    }

    /// The client's editor state wins over the stored contract
    fn parser_context(&self, chat_id: &str, context: &ClientContext) -> ParserContext {
        let client_file = context
            .current_file
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty());
        let path = client_file.unwrap_or(DEFAULT_CONTRACT_PATH).to_string();

        let content = context
            .current_code
            .clone()
            .filter(|code| !code.trim().is_empty())
            .or_else(|| {
                context
                    .file_content(&path)
                    .filter(|code| !code.trim().is_empty())
                    .map(str::to_string)
            })
            .or_else(|| {
                self.registry
                    .get_file(&self.wallet, chat_id, &path, None)
                    .ok()
                    .flatten()
                    .map(|file| file.content)
                    .filter(|code| !code.trim().is_empty())
            });

        match content {
            Some(content) => ParserContext::editing(path, content),
            None => ParserContext {
                is_editing_mode: client_file.is_some(),
                active_contract_path: path,
                ..ParserContext::default()
            },
        }
    }

    async fn process_event(&mut self, event: Event) -> Result<(), String> {
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            // Pure state transition
            let result = match transition(&self.state, current_event) {
                Ok(r) => r,
                Err(e) => {
                    let error = ChatError::from(e);
                    self.emit(ServerEvent::error(&error)).await;
                    return Err(error.message);
                }
            };

            tracing::debug!(from = self.state.name(), to = result.new_state.name(), "Turn transition");
            self.state = result.new_state;

            for effect in result.effects {
                // A newer connection owns the session now
                if self.cancel.is_cancelled() {
                    tracing::info!(wallet = %self.wallet, state = self.state.name(), "Turn abandoned after cancellation");
                    return Ok(());
                }
                if let Some(generated_event) = self.execute_effect(effect).await? {
                    events_to_process.push(generated_event);
                }
            }
        }

        Ok(())
    }

    fn turn(&self) -> Result<&Turn, String> {
        self.turn.as_ref().ok_or_else(|| "No turn in progress".to_string())
    }

    /// Execute an effect and optionally return a generated event
    async fn execute_effect(&mut self, effect: Effect) -> Result<Option<Event>, String> {
        match effect {
            Effect::RecordUserMessage { text } => {
                let chat_id = self.turn()?.chat_id.clone();
                self.record(&chat_id, ChatMessage::user(text.clone()));
                if let Err(e) = self.registry.append_history(&self.wallet, &chat_id, LlmMessage::user(text)) {
                    tracing::warn!(chat_id = %chat_id, error = %e, "Failed to record history");
                }
                Ok(None)
            }

            Effect::RequestModel => Ok(Some(self.request_model().await?)),

            Effect::RecordAssistantReply { text } => {
                let chat_id = self.turn()?.chat_id.clone();
                if let Err(e) = self
                    .registry
                    .append_history(&self.wallet, &chat_id, LlmMessage::assistant(text))
                {
                    tracing::warn!(chat_id = %chat_id, error = %e, "Failed to record history");
                }
                Ok(None)
            }

            Effect::ExtractActions { text } => {
                let turn = self.turn.as_mut().ok_or_else(|| "No turn in progress".to_string())?;
                let actions = self.extractor.extract_with_context(&text, &mut turn.parser);
                tracing::info!(chat_id = %turn.chat_id, actions = actions.len(), "Extracted actions");
                Ok(Some(Event::ActionsExtracted { actions }))
            }

            Effect::Emit(event) => {
                self.emit(event).await;
                Ok(None)
            }

            Effect::ApplyAction(action) => {
                let chat_id = self.turn()?.chat_id.clone();
                // Write through before the client sees the event
                match self.apply_action(&chat_id, &action) {
                    Ok(()) => self.emit(ServerEvent::from_action(&action)).await,
                    Err(e) => {
                        tracing::warn!(chat_id = %chat_id, error = %e, "Failed to apply action");
                        self.emit(ServerEvent::error(&e)).await;
                    }
                }
                Ok(Some(Event::ActionEmitted))
            }

            Effect::Pause(pause) => {
                let duration = match pause {
                    Pause::AfterPreamble => self.config.preamble_pause,
                    Pause::BetweenActions => self.config.emit_delay,
                };
                if !duration.is_zero() {
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => {}
                        () = tokio::time::sleep(duration) => {}
                    }
                }
                Ok(None)
            }
        }
    }

    /// Call the model, racing cancellation and the turn deadline
    async fn request_model(&self) -> Result<Event, String> {
        let turn = self.turn()?;
        let history = self
            .registry
            .history(&self.wallet, &turn.chat_id)
            .map_err(|e| e.to_string())?;

        let active = turn
            .parser
            .active_contract_content
            .as_deref()
            .map(|content| (turn.parser.active_contract_path.as_str(), content));
        let request = LlmRequest {
            system: build_system_prompt(active),
            messages: history,
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
        };

        let start = Instant::now();
        let result = tokio::select! {
            biased;

            () = self.cancel.cancelled() => {
                tracing::info!(chat_id = %turn.chat_id, "LLM request cancelled");
                Err(LlmError::cancelled())
            }

            result = tokio::time::timeout(self.config.llm_timeout, self.llm.complete(&request)) => {
                result.unwrap_or_else(|_| Err(LlmError::timeout(self.config.llm_timeout)))
            }
        };

        Ok(match result {
            Ok(response) => Event::ModelResponse { text: response.text() },
            Err(e) => {
                tracing::warn!(
                    chat_id = %turn.chat_id,
                    model = %self.llm.model_id(),
                    kind = ?e.kind,
                    duration_ms = %start.elapsed().as_millis(),
                    error = %e,
                    "LLM request failed"
                );
                Event::ModelFailed { error: e.into() }
            }
        })
    }

    /// Write file actions through to the store
    fn apply_action(&self, chat_id: &str, action: &Action) -> Result<(), ChatError> {
        match action {
            Action::Message { .. } => Ok(()),
            Action::CreateFile { path, content } => self
                .registry
                .put_file(&self.wallet, chat_id, path, content, DEFAULT_LANGUAGE)
                .map(|_| ()),
            Action::EditFile { path, replacement } => self
                .registry
                .put_file(&self.wallet, chat_id, path, replacement, DEFAULT_LANGUAGE)
                .map(|_| ()),
            Action::DeleteFile { path } => self.registry.delete_file(&self.wallet, chat_id, path).map(|_| ()),
        }
    }

    /// Record a turn event in the transcript, then send it
    async fn emit(&self, event: ServerEvent) {
        let Some(turn) = &self.turn else {
            self.send(event).await;
            return;
        };
        let chat_id = turn.chat_id.clone();
        self.record(
            &chat_id,
            ChatMessage::new(TranscriptSender::Ai, event.transcript_text(), Some(event.kind.as_str())),
        );
        self.send(event.with_chat_id(chat_id)).await;
    }

    fn record(&self, chat_id: &str, message: ChatMessage) {
        if let Err(e) = self.registry.append_message(&self.wallet, chat_id, message) {
            tracing::warn!(chat_id = %chat_id, error = %e, "Failed to record transcript entry");
        }
    }
}
