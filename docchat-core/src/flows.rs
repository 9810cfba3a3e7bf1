//! The flows that mediate every backend call: upload, embedding, chat and
//! settings. Each flow validates the envelope defensively, commits through
//! the session store only, and guards itself with a single advisory busy
//! flag so at most one of its calls is in flight.
//!
//! Flows that can complete after a document switch capture the session's
//! document token at issue time and drop mismatched completions instead of
//! committing them into the wrong document's session.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::protocol::{endpoints, timeouts, Backend, Payload, RequestMessage};
use crate::session::{ChatMessage, DocConfigPatch, Role, SharedSession, UploadedFile};

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// Fresh document activated; dependent session state was reset.
    Replaced {
        file_name: String,
        tmp_file_path: String,
    },
    /// Previously seen document re-activated; its prior state resumes.
    Switched {
        file_name: String,
        tmp_file_path: String,
    },
    /// No file selected, or the name is not in the uploaded list.
    NoFile,
    /// An upload is already in flight.
    Busy,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EmbedOutcome {
    Completed,
    AlreadyEmbedded,
    NoDocument,
    Busy,
    /// The active document changed while indexing ran; nothing committed.
    Stale,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    /// Assistant turn appended after the optimistic user turn.
    Answered(ChatMessage),
    EmptyInput,
    Busy,
    /// The answer arrived after a document switch and was dropped.
    Stale,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsOutcome {
    Applied,
    Ignored,
    Stale,
    Failed(String),
}

/// Orchestrates uploading a document, fresh or from the uploaded list.
pub struct UploadFlow {
    session: SharedSession,
    backend: Arc<dyn Backend>,
    uploading: AtomicBool,
}

impl UploadFlow {
    pub fn new(session: SharedSession, backend: Arc<dyn Backend>) -> Self {
        Self {
            session,
            backend,
            uploading: AtomicBool::new(false),
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst)
    }

    /// Fresh-upload path: ships the file and on success replaces the active
    /// document, resetting language, embedding flag and chat history.
    pub async fn upload_new(&self, path: &Path) -> UploadOutcome {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            return UploadOutcome::NoFile;
        };
        let file_name = file_name.to_string();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "upload rejected before sending");
                return UploadOutcome::Failed(format!("cannot read {}: {err}", path.display()));
            }
        };
        if self.uploading.swap(true, Ordering::SeqCst) {
            return UploadOutcome::Busy;
        }

        let response = self.send_file(&file_name, bytes).await;
        let outcome = match accept_upload(&response) {
            Ok((name, tmp_file_path)) => {
                let mut session = self.session.lock();
                session.replace_document(&name, &tmp_file_path);
                if session.add_uploaded_if_absent(UploadedFile {
                    name: name.clone(),
                    source_path: path.to_path_buf(),
                }) {
                    debug!(file = %name, "recorded new uploaded file");
                }
                info!(file = %name, "upload complete");
                UploadOutcome::Replaced {
                    file_name: name,
                    tmp_file_path,
                }
            }
            Err(message) => UploadOutcome::Failed(message),
        };

        self.uploading.store(false, Ordering::SeqCst);
        outcome
    }

    /// History-switch path: re-sends the stored file but patches only the
    /// document identity. Language, embedding flag and chat history are
    /// intentionally left as they were for that document.
    pub async fn reopen(&self, name: &str) -> UploadOutcome {
        let Some(record) = self.session.lock().find_uploaded(name).cloned() else {
            return UploadOutcome::NoFile;
        };
        let bytes = match fs::read(&record.source_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(path = %record.source_path.display(), error = %err, "reopen rejected before sending");
                return UploadOutcome::Failed(format!(
                    "cannot read {}: {err}",
                    record.source_path.display()
                ));
            }
        };
        if self.uploading.swap(true, Ordering::SeqCst) {
            return UploadOutcome::Busy;
        }

        let response = self.send_file(&record.name, bytes).await;
        let outcome = match accept_upload(&response) {
            Ok((name, tmp_file_path)) => {
                self.session.lock().switch_document(&name, &tmp_file_path);
                UploadOutcome::Switched {
                    file_name: name,
                    tmp_file_path,
                }
            }
            Err(message) => UploadOutcome::Failed(message),
        };

        self.uploading.store(false, Ordering::SeqCst);
        outcome
    }

    async fn send_file(&self, file_name: &str, bytes: Vec<u8>) -> RequestMessage {
        let payload = Payload::File {
            field: "file".to_string(),
            file_name: file_name.to_string(),
            bytes,
        };
        self.backend
            .send(payload, endpoints::UPLOAD, Some(timeouts::UPLOAD))
            .await
    }
}

fn accept_upload(response: &RequestMessage) -> Result<(String, String), String> {
    if !response.state {
        return Err(response.failure_message());
    }
    match (response.str_arg("file_name"), response.str_arg("tmp_file_path")) {
        (Some(name), Some(tmp)) => Ok((name.to_string(), tmp.to_string())),
        _ => Err("backend reported success without file_name/tmp_file_path".to_string()),
    }
}

/// One-shot, idempotent trigger for backend-side indexing of the active
/// document.
pub struct EmbeddingTrigger {
    session: SharedSession,
    backend: Arc<dyn Backend>,
    embedding: AtomicBool,
}

impl EmbeddingTrigger {
    pub fn new(session: SharedSession, backend: Arc<dyn Backend>) -> Self {
        Self {
            session,
            backend,
            embedding: AtomicBool::new(false),
        }
    }

    pub fn is_embedding(&self) -> bool {
        self.embedding.load(Ordering::SeqCst)
    }

    pub async fn embed(&self) -> EmbedOutcome {
        let token = {
            let session = self.session.lock();
            let config = session.config();
            if config.is_embedded {
                return EmbedOutcome::AlreadyEmbedded;
            }
            if !config.has_document() {
                return EmbedOutcome::NoDocument;
            }
            session.doc_token()
        };
        if self.embedding.swap(true, Ordering::SeqCst) {
            return EmbedOutcome::Busy;
        }

        let response = self
            .backend
            .send(Payload::Empty, endpoints::EMBEDDING, None)
            .await;
        let outcome = if response.state {
            let mut session = self.session.lock();
            if session.doc_token() != token {
                warn!("embedding finished for a document that is no longer active; dropped");
                EmbedOutcome::Stale
            } else {
                session.mark_embedded();
                info!("document embedded");
                EmbedOutcome::Completed
            }
        } else {
            // Leaves is_embedded false so the user can retry.
            EmbedOutcome::Failed(response.failure_message())
        };

        self.embedding.store(false, Ordering::SeqCst);
        outcome
    }
}

/// Conversation flow. The user's turn is recorded before the backend
/// answers and is never rolled back, whatever the outcome.
pub struct ChatFlow {
    session: SharedSession,
    backend: Arc<dyn Backend>,
    thinking: AtomicBool,
}

impl ChatFlow {
    pub fn new(session: SharedSession, backend: Arc<dyn Backend>) -> Self {
        Self {
            session,
            backend,
            thinking: AtomicBool::new(false),
        }
    }

    pub fn is_thinking(&self) -> bool {
        self.thinking.load(Ordering::SeqCst)
    }

    pub async fn send_user_message(&self, text: &str) -> ChatOutcome {
        let text = text.trim();
        if text.is_empty() {
            return ChatOutcome::EmptyInput;
        }
        if self.thinking.swap(true, Ordering::SeqCst) {
            return ChatOutcome::Busy;
        }

        let token = {
            let mut session = self.session.lock();
            session.push_chat(ChatMessage {
                role: Role::Human,
                message: text.to_string(),
            });
            session.doc_token()
        };

        let payload = Payload::Json(json!({ "question": text }));
        let response = self
            .backend
            .send(payload, endpoints::CHAT, Some(timeouts::CHAT))
            .await;
        let outcome = match accept_chat(&response) {
            Ok(answer) => {
                let mut session = self.session.lock();
                if session.doc_token() != token {
                    warn!("chat answer arrived after a document switch; dropped");
                    ChatOutcome::Stale
                } else {
                    session.push_chat(answer.clone());
                    ChatOutcome::Answered(answer)
                }
            }
            Err(message) => ChatOutcome::Failed(message),
        };

        self.thinking.store(false, Ordering::SeqCst);
        outcome
    }
}

fn accept_chat(response: &RequestMessage) -> Result<ChatMessage, String> {
    if !response.state {
        return Err(response.failure_message());
    }
    let role = response.str_arg("role").and_then(Role::parse);
    let message = response.str_arg("message");
    match (role, message) {
        (Some(role), Some(message)) => Ok(ChatMessage {
            role,
            message: message.to_string(),
        }),
        _ => Err("backend reply lacked a well-typed role/message".to_string()),
    }
}

/// Language and model configuration. These are confirm-through-backend
/// patches; neither keeps a busy flag because the UI issues them one at a
/// time from modal prompts.
pub struct SettingsFlow {
    session: SharedSession,
    backend: Arc<dyn Backend>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelSelection {
    pub embedding_model_name: String,
    pub embedding_model_api_key: String,
    pub llm_name: String,
    pub llm_api_key: String,
}

impl SettingsFlow {
    pub fn new(session: SharedSession, backend: Arc<dyn Backend>) -> Self {
        Self { session, backend }
    }

    /// Language belongs to the active document, so a completion that lands
    /// after a document switch is dropped.
    pub async fn set_language(&self, language: &str) -> SettingsOutcome {
        if language.is_empty() {
            return SettingsOutcome::Ignored;
        }
        let token = self.session.lock().doc_token();

        // The backend schema spells the field "lanuage", like the route.
        let payload = Payload::Json(json!({ "lanuage": language }));
        let response = self
            .backend
            .send(payload, endpoints::SET_LANGUAGE, Some(timeouts::SET_LANGUAGE))
            .await;
        if !response.state {
            return SettingsOutcome::Failed(response.failure_message());
        }

        let mut session = self.session.lock();
        if session.doc_token() != token {
            warn!("language confirmation arrived after a document switch; dropped");
            return SettingsOutcome::Stale;
        }
        session.patch(DocConfigPatch {
            language: Some(language.to_string()),
            ..Default::default()
        });
        info!(language, "document language set");
        SettingsOutcome::Applied
    }

    /// Model selections outlive document switches, so no token check here.
    pub async fn set_models(&self, selection: ModelSelection) -> SettingsOutcome {
        let payload = Payload::Json(json!({
            "embedding_model_name": selection.embedding_model_name,
            // Wire name fixed by the backend schema.
            "EmbeddingModelAPIKey": selection.embedding_model_api_key,
            "llm_name": selection.llm_name,
            "llm_api_key": selection.llm_api_key,
        }));
        let response = self
            .backend
            .send(payload, endpoints::SET_MODELS, Some(timeouts::SET_MODELS))
            .await;
        if !response.state {
            return SettingsOutcome::Failed(response.failure_message());
        }

        self.session.lock().patch(DocConfigPatch {
            embedding_model_name: Some(selection.embedding_model_name),
            embedding_model_api_key: Some(selection.embedding_model_api_key),
            llm_name: Some(selection.llm_name),
            llm_api_key: Some(selection.llm_api_key),
            ..Default::default()
        });
        SettingsOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{Map, Value};
    use tokio::sync::Notify;

    use crate::session::{shared, DocConfig, Session};

    fn ok_envelope(args: &[(&str, Value)]) -> RequestMessage {
        let mut addition_args = Map::new();
        for (key, value) in args {
            addition_args.insert((*key).to_string(), value.clone());
        }
        RequestMessage {
            source: "test".into(),
            state: true,
            message: String::new(),
            addition_args,
        }
    }

    fn fail_envelope(message: &str) -> RequestMessage {
        RequestMessage {
            source: "test".into(),
            state: false,
            message: message.into(),
            addition_args: Map::new(),
        }
    }

    /// Scripted backend: pops one canned envelope per call and records the
    /// endpoints it was asked to hit.
    struct ScriptedBackend {
        responses: Mutex<VecDeque<RequestMessage>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<RequestMessage>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn send(
            &self,
            _payload: Payload,
            endpoint: &str,
            _timeout: Option<Duration>,
        ) -> RequestMessage {
            self.calls.lock().push(endpoint.to_string());
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| fail_envelope("script exhausted"))
        }
    }

    /// Backend that parks every call until released, for interleaving tests.
    struct GatedBackend {
        calls: AtomicUsize,
        release: Notify,
        response: RequestMessage,
    }

    impl GatedBackend {
        fn new(response: RequestMessage) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                release: Notify::new(),
                response,
            })
        }

        async fn wait_for_call(&self) {
            while self.calls.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait]
    impl Backend for GatedBackend {
        async fn send(
            &self,
            _payload: Payload,
            _endpoint: &str,
            _timeout: Option<Duration>,
        ) -> RequestMessage {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            self.response.clone()
        }
    }

    fn session_with_document(name: &str) -> SharedSession {
        let mut session = Session::with_defaults();
        session.replace_document(name, format!("files/Temp/{name}"));
        shared(session)
    }

    fn write_pdf(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, b"%PDF-1.7 test bytes").unwrap();
        path
    }

    #[tokio::test]
    async fn fresh_upload_replaces_document_and_resets_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(&dir, "report.pdf");
        let session = shared(Session::with_defaults());
        session.lock().push_chat(ChatMessage {
            role: Role::Human,
            message: "stale".into(),
        });
        let backend = ScriptedBackend::new(vec![ok_envelope(&[
            ("file_name", Value::String("report.pdf".into())),
            ("tmp_file_path", Value::String("files/Temp/report.pdf".into())),
        ])]);
        let flow = UploadFlow::new(session.clone(), backend.clone());

        let outcome = flow.upload_new(&path).await;

        assert_eq!(
            outcome,
            UploadOutcome::Replaced {
                file_name: "report.pdf".into(),
                tmp_file_path: "files/Temp/report.pdf".into(),
            }
        );
        let config = session.lock().snapshot();
        assert_eq!(config.file_name, "report.pdf");
        assert_eq!(config.tmp_file_path, "files/Temp/report.pdf");
        assert!(!config.is_embedded);
        assert!(config.chat_history.is_empty());
        assert_eq!(session.lock().uploaded_files().len(), 1);
        assert_eq!(backend.calls(), vec![endpoints::UPLOAD.to_string()]);
        assert!(!flow.is_uploading());
    }

    #[tokio::test]
    async fn failed_upload_leaves_session_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(&dir, "report.pdf");
        let session = shared(Session::with_defaults());
        let backend = ScriptedBackend::new(vec![fail_envelope("disk full")]);
        let flow = UploadFlow::new(session.clone(), backend);

        let outcome = flow.upload_new(&path).await;

        assert_eq!(outcome, UploadOutcome::Failed("disk full".into()));
        let config = session.lock().snapshot();
        assert_eq!(config, DocConfig::with_defaults());
        assert!(session.lock().uploaded_files().is_empty());
    }

    #[tokio::test]
    async fn upload_with_malformed_success_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pdf(&dir, "report.pdf");
        let session = shared(Session::with_defaults());
        // state=true but tmp_file_path is a number: type-contract violation.
        let backend = ScriptedBackend::new(vec![ok_envelope(&[
            ("file_name", Value::String("report.pdf".into())),
            ("tmp_file_path", Value::Number(7.into())),
        ])]);
        let flow = UploadFlow::new(session.clone(), backend);

        assert!(matches!(flow.upload_new(&path).await, UploadOutcome::Failed(_)));
        assert!(!session.lock().config().has_document());
    }

    #[tokio::test]
    async fn unreadable_path_issues_no_backend_call() {
        let session = shared(Session::with_defaults());
        let backend = ScriptedBackend::new(vec![]);
        let flow = UploadFlow::new(session, backend.clone());

        let outcome = flow.upload_new(Path::new("/no/such/file.pdf")).await;

        assert!(matches!(outcome, UploadOutcome::Failed(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn reopen_keeps_language_embedding_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = write_pdf(&dir, "a.pdf");
        let path_b = write_pdf(&dir, "b.pdf");
        let session = shared(Session::with_defaults());
        let backend = ScriptedBackend::new(vec![
            ok_envelope(&[
                ("file_name", Value::String("a.pdf".into())),
                ("tmp_file_path", Value::String("files/Temp/a.pdf".into())),
            ]),
            ok_envelope(&[
                ("file_name", Value::String("b.pdf".into())),
                ("tmp_file_path", Value::String("files/Temp/b.pdf".into())),
            ]),
            ok_envelope(&[
                ("file_name", Value::String("a.pdf".into())),
                ("tmp_file_path", Value::String("files/Temp/a.pdf".into())),
            ]),
        ]);
        let flow = UploadFlow::new(session.clone(), backend);

        flow.upload_new(&path_a).await;
        flow.upload_new(&path_b).await;
        session.lock().patch(DocConfigPatch {
            language: Some("English".into()),
            is_embedded: Some(true),
            ..Default::default()
        });
        session.lock().push_chat(ChatMessage {
            role: Role::Assistant,
            message: "about b.pdf".into(),
        });

        let outcome = flow.reopen("a.pdf").await;

        assert_eq!(
            outcome,
            UploadOutcome::Switched {
                file_name: "a.pdf".into(),
                tmp_file_path: "files/Temp/a.pdf".into(),
            }
        );
        // Only the document identity changed; everything else resumed.
        let config = session.lock().snapshot();
        assert_eq!(config.file_name, "a.pdf");
        assert_eq!(config.language, "English");
        assert!(config.is_embedded);
        assert_eq!(config.chat_history.len(), 1);
        assert_eq!(session.lock().uploaded_files().len(), 2);
    }

    #[tokio::test]
    async fn reopen_of_unknown_name_is_rejected() {
        let session = shared(Session::with_defaults());
        let backend = ScriptedBackend::new(vec![]);
        let flow = UploadFlow::new(session, backend.clone());

        assert_eq!(flow.reopen("never-seen.pdf").await, UploadOutcome::NoFile);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn second_embed_while_pending_sends_nothing() {
        let session = session_with_document("a.pdf");
        let backend = GatedBackend::new(ok_envelope(&[]));
        let trigger = Arc::new(EmbeddingTrigger::new(session, backend.clone()));

        let first = tokio::spawn({
            let trigger = trigger.clone();
            async move { trigger.embed().await }
        });
        backend.wait_for_call().await;

        assert_eq!(trigger.embed().await, EmbedOutcome::Busy);

        backend.release.notify_one();
        assert_eq!(first.await.unwrap(), EmbedOutcome::Completed);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn embed_is_idempotent_once_completed() {
        let session = session_with_document("a.pdf");
        let backend = ScriptedBackend::new(vec![ok_envelope(&[])]);
        let trigger = EmbeddingTrigger::new(session.clone(), backend.clone());

        assert_eq!(trigger.embed().await, EmbedOutcome::Completed);
        assert!(session.lock().config().is_embedded);
        assert_eq!(trigger.embed().await, EmbedOutcome::AlreadyEmbedded);
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn embed_without_document_is_a_noop() {
        let session = shared(Session::with_defaults());
        let backend = ScriptedBackend::new(vec![]);
        let trigger = EmbeddingTrigger::new(session, backend.clone());

        assert_eq!(trigger.embed().await, EmbedOutcome::NoDocument);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_embed_leaves_retry_possible() {
        let session = session_with_document("a.pdf");
        let backend = ScriptedBackend::new(vec![
            fail_envelope("index build failed"),
            ok_envelope(&[]),
        ]);
        let trigger = EmbeddingTrigger::new(session.clone(), backend);

        assert_eq!(
            trigger.embed().await,
            EmbedOutcome::Failed("index build failed".into())
        );
        assert!(!session.lock().config().is_embedded);
        assert_eq!(trigger.embed().await, EmbedOutcome::Completed);
    }

    #[tokio::test]
    async fn embed_completion_after_document_switch_is_dropped() {
        let session = session_with_document("a.pdf");
        let backend = GatedBackend::new(ok_envelope(&[]));
        let trigger = Arc::new(EmbeddingTrigger::new(session.clone(), backend.clone()));

        let pending = tokio::spawn({
            let trigger = trigger.clone();
            async move { trigger.embed().await }
        });
        backend.wait_for_call().await;
        session
            .lock()
            .replace_document("b.pdf", "files/Temp/b.pdf");
        backend.release.notify_one();

        assert_eq!(pending.await.unwrap(), EmbedOutcome::Stale);
        assert!(!session.lock().config().is_embedded);
    }

    #[tokio::test]
    async fn chat_round_trip_appends_both_turns_in_order() {
        let session = session_with_document("a.pdf");
        let backend = ScriptedBackend::new(vec![ok_envelope(&[
            ("role", Value::String("assistant".into())),
            ("message", Value::String("hello".into())),
        ])]);
        let flow = ChatFlow::new(session.clone(), backend);

        let outcome = flow.send_user_message("hi").await;

        assert_eq!(
            outcome,
            ChatOutcome::Answered(ChatMessage {
                role: Role::Assistant,
                message: "hello".into(),
            })
        );
        let history = session.lock().snapshot().chat_history;
        assert_eq!(
            history,
            vec![
                ChatMessage {
                    role: Role::Human,
                    message: "hi".into(),
                },
                ChatMessage {
                    role: Role::Assistant,
                    message: "hello".into(),
                },
            ]
        );
        assert!(!flow.is_thinking());
    }

    #[tokio::test]
    async fn whitespace_message_never_mutates_history_or_calls_backend() {
        let session = session_with_document("a.pdf");
        let backend = ScriptedBackend::new(vec![]);
        let flow = ChatFlow::new(session.clone(), backend.clone());

        assert_eq!(flow.send_user_message("   \n\t").await, ChatOutcome::EmptyInput);
        assert!(session.lock().snapshot().chat_history.is_empty());
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_chat_keeps_the_user_turn() {
        let session = session_with_document("a.pdf");
        let backend = ScriptedBackend::new(vec![fail_envelope("model not configured")]);
        let flow = ChatFlow::new(session.clone(), backend);

        let outcome = flow.send_user_message("hi").await;

        assert_eq!(outcome, ChatOutcome::Failed("model not configured".into()));
        let history = session.lock().snapshot().chat_history;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Human);
    }

    #[tokio::test]
    async fn chat_answer_with_unknown_role_is_a_failure() {
        let session = session_with_document("a.pdf");
        let backend = ScriptedBackend::new(vec![ok_envelope(&[
            ("role", Value::String("system".into())),
            ("message", Value::String("hello".into())),
        ])]);
        let flow = ChatFlow::new(session.clone(), backend);

        assert!(matches!(
            flow.send_user_message("hi").await,
            ChatOutcome::Failed(_)
        ));
        assert_eq!(session.lock().snapshot().chat_history.len(), 1);
    }

    #[tokio::test]
    async fn chat_answer_after_document_switch_is_dropped() {
        let session = session_with_document("a.pdf");
        let backend = GatedBackend::new(ok_envelope(&[
            ("role", Value::String("assistant".into())),
            ("message", Value::String("about the old document".into())),
        ]));
        let flow = Arc::new(ChatFlow::new(session.clone(), backend.clone()));

        let pending = tokio::spawn({
            let flow = flow.clone();
            async move { flow.send_user_message("hi").await }
        });
        backend.wait_for_call().await;
        session
            .lock()
            .replace_document("b.pdf", "files/Temp/b.pdf");
        backend.release.notify_one();

        assert_eq!(pending.await.unwrap(), ChatOutcome::Stale);
        // The optimistic user turn belonged to the old document and was
        // cleared by the switch; the stale answer must not reappear.
        assert!(session.lock().snapshot().chat_history.is_empty());
    }

    #[tokio::test]
    async fn set_language_patches_on_success_only() {
        let session = session_with_document("a.pdf");
        let backend = ScriptedBackend::new(vec![ok_envelope(&[]), fail_envelope("unsupported")]);
        let flow = SettingsFlow::new(session.clone(), backend);

        assert_eq!(flow.set_language("English").await, SettingsOutcome::Applied);
        assert_eq!(session.lock().config().language, "English");

        assert_eq!(
            flow.set_language("Klingon").await,
            SettingsOutcome::Failed("unsupported".into())
        );
        assert_eq!(session.lock().config().language, "English");
    }

    #[tokio::test]
    async fn empty_language_selection_is_ignored() {
        let session = session_with_document("a.pdf");
        let backend = ScriptedBackend::new(vec![]);
        let flow = SettingsFlow::new(session, backend.clone());

        assert_eq!(flow.set_language("").await, SettingsOutcome::Ignored);
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn set_models_patches_all_four_fields() {
        let session = session_with_document("a.pdf");
        let backend = ScriptedBackend::new(vec![ok_envelope(&[])]);
        let flow = SettingsFlow::new(session.clone(), backend);

        let outcome = flow
            .set_models(ModelSelection {
                embedding_model_name: "OpenAIEmbeddings".into(),
                embedding_model_api_key: "sk-embed".into(),
                llm_name: "gpt-4".into(),
                llm_api_key: "sk-llm".into(),
            })
            .await;

        assert_eq!(outcome, SettingsOutcome::Applied);
        let config = session.lock().snapshot();
        assert_eq!(config.embedding_model_name, "OpenAIEmbeddings");
        assert_eq!(config.embedding_model_api_key, "sk-embed");
        assert_eq!(config.llm_name, "gpt-4");
        assert_eq!(config.llm_api_key, "sk-llm");
    }
}
