use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::options;

/// Identity token for one activation of a document. A fresh token is minted
/// every time the active document is replaced or switched, so a completion
/// that captured an older token can be recognized as stale.
pub type DocumentId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

impl Role {
    /// Parses a role string from the backend. The QA graph labels assistant
    /// turns "ai", the history format says "assistant"; both are accepted.
    pub fn parse(value: &str) -> Option<Role> {
        match value {
            "human" => Some(Role::Human),
            "assistant" | "ai" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One turn of the conversation. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub message: String,
}

/// The canonical record of the active document session. Exactly one exists
/// at a time; it is replaced wholesale on a fresh upload and field-patched
/// for same-document updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocConfig {
    pub file_name: String,
    pub tmp_file_path: String,
    pub language: String,
    pub embedding_model_name: String,
    pub embedding_model_api_key: String,
    pub llm_name: String,
    pub llm_api_key: String,
    pub is_embedded: bool,
    pub chat_history: Vec<ChatMessage>,
}

impl DocConfig {
    /// Empty session with the stock model defaults selected.
    pub fn with_defaults() -> Self {
        Self {
            file_name: String::new(),
            tmp_file_path: String::new(),
            language: String::new(),
            embedding_model_name: options::default_embedding_model().to_string(),
            embedding_model_api_key: String::new(),
            llm_name: options::default_llm().to_string(),
            llm_api_key: String::new(),
            is_embedded: false,
            chat_history: Vec::new(),
        }
    }

    /// Both identity fields empty means "no document loaded".
    pub fn has_document(&self) -> bool {
        !self.tmp_file_path.is_empty()
    }
}

/// Field-wise patch applied by [`Session::patch`]. `chat_history` is
/// deliberately absent: history is append-only via [`Session::push_chat`].
#[derive(Debug, Clone, Default)]
pub struct DocConfigPatch {
    pub file_name: Option<String>,
    pub tmp_file_path: Option<String>,
    pub language: Option<String>,
    pub embedding_model_name: Option<String>,
    pub embedding_model_api_key: Option<String>,
    pub llm_name: Option<String>,
    pub llm_api_key: Option<String>,
    pub is_embedded: Option<bool>,
}

/// A previously uploaded file, remembered across document switches so it
/// can be re-sent from its local source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub name: String,
    pub source_path: PathBuf,
}

/// Single source of truth for the session. All cross-component effects go
/// through this store; flows validate, the store only mutates.
pub struct Session {
    config: DocConfig,
    uploaded: Vec<UploadedFile>,
    doc_token: DocumentId,
}

impl Session {
    pub fn new(config: DocConfig) -> Self {
        Self {
            config,
            uploaded: Vec::new(),
            doc_token: Uuid::new_v4(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DocConfig::with_defaults())
    }

    pub fn config(&self) -> &DocConfig {
        &self.config
    }

    pub fn snapshot(&self) -> DocConfig {
        self.config.clone()
    }

    /// Token of the current document activation; captured by flows at call
    /// time and compared again before committing a completion.
    pub fn doc_token(&self) -> DocumentId {
        self.doc_token
    }

    /// Applies only the fields present in the patch. No validation happens
    /// here; callers validate before patching.
    pub fn patch(&mut self, patch: DocConfigPatch) {
        let DocConfigPatch {
            file_name,
            tmp_file_path,
            language,
            embedding_model_name,
            embedding_model_api_key,
            llm_name,
            llm_api_key,
            is_embedded,
        } = patch;
        if let Some(value) = file_name {
            self.config.file_name = value;
        }
        if let Some(value) = tmp_file_path {
            self.config.tmp_file_path = value;
        }
        if let Some(value) = language {
            self.config.language = value;
        }
        if let Some(value) = embedding_model_name {
            self.config.embedding_model_name = value;
        }
        if let Some(value) = embedding_model_api_key {
            self.config.embedding_model_api_key = value;
        }
        if let Some(value) = llm_name {
            self.config.llm_name = value;
        }
        if let Some(value) = llm_api_key {
            self.config.llm_api_key = value;
        }
        if let Some(value) = is_embedded {
            self.config.is_embedded = value;
        }
    }

    /// Fresh-document activation: the dependent fields (language, embedding
    /// flag, chat history) are reset because they belong to the document,
    /// not the session.
    pub fn replace_document(
        &mut self,
        file_name: impl Into<String>,
        tmp_file_path: impl Into<String>,
    ) -> DocumentId {
        self.config.file_name = file_name.into();
        self.config.tmp_file_path = tmp_file_path.into();
        self.config.language.clear();
        self.config.is_embedded = false;
        self.config.chat_history.clear();
        self.doc_token = Uuid::new_v4();
        debug!(file = %self.config.file_name, "activated fresh document");
        self.doc_token
    }

    /// History-switch activation: only the document identity changes. The
    /// prior language, embedding flag and chat history resume as they were,
    /// trusting the backend to restore per-document state deterministically.
    pub fn switch_document(
        &mut self,
        file_name: impl Into<String>,
        tmp_file_path: impl Into<String>,
    ) -> DocumentId {
        self.config.file_name = file_name.into();
        self.config.tmp_file_path = tmp_file_path.into();
        self.doc_token = Uuid::new_v4();
        debug!(file = %self.config.file_name, "switched to previously uploaded document");
        self.doc_token
    }

    pub fn mark_embedded(&mut self) {
        self.config.is_embedded = true;
    }

    pub fn push_chat(&mut self, message: ChatMessage) {
        self.config.chat_history.push(message);
    }

    /// Appends to the uploaded-file list unless a record with the same name
    /// exists. Returns true when the record was new.
    pub fn add_uploaded_if_absent(&mut self, file: UploadedFile) -> bool {
        if self.uploaded.iter().any(|f| f.name == file.name) {
            return false;
        }
        self.uploaded.push(file);
        true
    }

    pub fn uploaded_files(&self) -> &[UploadedFile] {
        &self.uploaded
    }

    pub fn find_uploaded(&self, name: &str) -> Option<&UploadedFile> {
        self.uploaded.iter().find(|f| f.name == name)
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

pub fn shared(session: Session) -> SharedSession {
    Arc::new(Mutex::new(session))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_stock_models_and_no_document() {
        let config = DocConfig::with_defaults();
        assert!(!config.has_document());
        assert_eq!(config.embedding_model_name, options::default_embedding_model());
        assert_eq!(config.llm_name, options::default_llm());
        assert!(config.chat_history.is_empty());
        assert!(!config.is_embedded);
    }

    #[test]
    fn patch_touches_only_given_fields() {
        let mut session = Session::with_defaults();
        session.push_chat(ChatMessage {
            role: Role::Human,
            message: "hi".into(),
        });
        session.patch(DocConfigPatch {
            language: Some("English".into()),
            ..Default::default()
        });
        assert_eq!(session.config().language, "English");
        assert_eq!(session.config().chat_history.len(), 1);
        assert_eq!(session.config().llm_name, options::default_llm());
    }

    #[test]
    fn replace_document_resets_dependent_state_and_token() {
        let mut session = Session::with_defaults();
        session.patch(DocConfigPatch {
            language: Some("Chinese".into()),
            is_embedded: Some(true),
            ..Default::default()
        });
        session.push_chat(ChatMessage {
            role: Role::Human,
            message: "old".into(),
        });
        let before = session.doc_token();

        session.replace_document("report.pdf", "files/Temp/report.pdf");

        let config = session.config();
        assert_eq!(config.file_name, "report.pdf");
        assert_eq!(config.tmp_file_path, "files/Temp/report.pdf");
        assert!(config.language.is_empty());
        assert!(!config.is_embedded);
        assert!(config.chat_history.is_empty());
        assert_ne!(session.doc_token(), before);
    }

    #[test]
    fn switch_document_preserves_dependent_state() {
        let mut session = Session::with_defaults();
        session.replace_document("a.pdf", "files/Temp/a.pdf");
        session.patch(DocConfigPatch {
            language: Some("English".into()),
            is_embedded: Some(true),
            ..Default::default()
        });
        session.push_chat(ChatMessage {
            role: Role::Assistant,
            message: "kept".into(),
        });

        session.switch_document("b.pdf", "files/Temp/b.pdf");

        let config = session.config();
        assert_eq!(config.file_name, "b.pdf");
        assert_eq!(config.language, "English");
        assert!(config.is_embedded);
        assert_eq!(config.chat_history.len(), 1);
    }

    #[test]
    fn uploaded_list_deduplicates_by_name() {
        let mut session = Session::with_defaults();
        let record = UploadedFile {
            name: "a.pdf".into(),
            source_path: PathBuf::from("/tmp/a.pdf"),
        };
        assert!(session.add_uploaded_if_absent(record.clone()));
        assert!(!session.add_uploaded_if_absent(UploadedFile {
            name: "a.pdf".into(),
            source_path: PathBuf::from("/elsewhere/a.pdf"),
        }));
        assert_eq!(session.uploaded_files(), &[record]);
    }

    #[test]
    fn role_parse_accepts_backend_spellings() {
        assert_eq!(Role::parse("human"), Some(Role::Human));
        assert_eq!(Role::parse("assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse("ai"), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
    }
}
