//! Session and state coordination for the docchat client.
//!
//! Everything that must stay consistent across asynchronous backend calls
//! lives here: the canonical document session ([`Session`]), the flows that
//! mediate every backend call through the uniform result envelope
//! ([`RequestMessage`]), and the page-navigation state machine for the
//! viewer ([`ViewerState`]). Transport and rendering are trait seams
//! ([`Backend`], [`DocumentViewer`]) implemented by sibling crates.

pub mod config;
pub mod flows;
pub mod options;
pub mod protocol;
pub mod session;
pub mod viewer;

pub use config::{AppConfig, ConfigError};
pub use flows::{
    ChatFlow, ChatOutcome, EmbedOutcome, EmbeddingTrigger, ModelSelection, SettingsFlow,
    SettingsOutcome, UploadFlow, UploadOutcome,
};
pub use protocol::{endpoints, timeouts, Backend, Payload, RequestMessage};
pub use session::{
    shared, ChatMessage, DocConfig, DocConfigPatch, DocumentId, Role, Session, SharedSession,
    UploadedFile,
};
pub use viewer::{
    DocumentViewer, LinkTarget, OpenedDocument, PageLink, ViewerCapability, ViewerError,
    ViewerState,
};
