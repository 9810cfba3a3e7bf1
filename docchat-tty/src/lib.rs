//! Terminal input mapping and text drawing for the docchat client.
//!
//! [`EventMapper`] turns crossterm key events into [`UiEvent`]s. Normal
//! mode handles navigation directly; everything that needs typed input
//! (chat text, a file path, a page number, a language, the model settings
//! wizard) runs through a modal prompt whose buffer is echoed via
//! [`EventMapper::pending_input`].

use std::io::{self, Write};

use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use docchat_core::flows::ModelSelection;
use docchat_core::session::{ChatMessage, Role};

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    NextPage,
    PrevPage,
    ZoomIn,
    ZoomOut,
    JumpToPage(u32),
    Embed,
    /// 1-based index into the uploaded-file history list.
    SwitchHistory { index: usize },
    /// 1-based index into the current page's link list.
    FollowLink { index: usize },
    SubmitChat(String),
    SubmitPath(String),
    SubmitLanguage(String),
    SubmitModels(ModelSelection),
    PromptChanged,
    PromptCancelled,
    Quit,
    None,
}

/// Stages of the model settings wizard; each Enter advances one field.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptKind {
    Chat,
    Path,
    PageJump,
    Language,
    EmbeddingModel,
    EmbeddingKey {
        embedding_model: String,
    },
    LlmName {
        embedding_model: String,
        embedding_key: String,
    },
    LlmKey {
        embedding_model: String,
        embedding_key: String,
        llm_name: String,
    },
}

impl PromptKind {
    fn label(&self) -> &'static str {
        match self {
            PromptKind::Chat => "ask",
            PromptKind::Path => "open",
            PromptKind::PageJump => "page",
            PromptKind::Language => "language",
            PromptKind::EmbeddingModel => "embedding model",
            PromptKind::EmbeddingKey { .. } => "embedding api key",
            PromptKind::LlmName { .. } => "llm",
            PromptKind::LlmKey { .. } => "llm api key",
        }
    }
}

#[derive(Debug, Default)]
pub struct EventMapper {
    pending_count: Option<usize>,
    pending_digits: String,
    prompt: Option<PromptKind>,
    buffer: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_prompt(&self) -> bool {
        self.prompt.is_some()
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match self.prompt {
            Some(_) => self.map_event_prompt(event),
            None => self.map_event_normal(event),
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Char(c), KeyModifiers::NONE) if c.is_ascii_digit() => {
                    if let Some(digit) = c.to_digit(10) {
                        self.push_digit(digit as usize);
                    }
                    UiEvent::None
                }
                (KeyCode::Char('j'), KeyModifiers::NONE) | (KeyCode::Down, KeyModifiers::NONE) => {
                    self.reset_count();
                    UiEvent::NextPage
                }
                (KeyCode::Char('k'), KeyModifiers::NONE) | (KeyCode::Up, KeyModifiers::NONE) => {
                    self.reset_count();
                    UiEvent::PrevPage
                }
                (KeyCode::Char('+'), _) => {
                    self.reset_count();
                    UiEvent::ZoomIn
                }
                (KeyCode::Char('-'), _) => {
                    self.reset_count();
                    UiEvent::ZoomOut
                }
                (KeyCode::Char('g'), KeyModifiers::NONE) => {
                    self.reset_count();
                    self.begin_prompt(PromptKind::PageJump)
                }
                (KeyCode::Char('i'), KeyModifiers::NONE) | (KeyCode::Enter, KeyModifiers::NONE) => {
                    self.reset_count();
                    self.begin_prompt(PromptKind::Chat)
                }
                (KeyCode::Char('o'), KeyModifiers::NONE) => {
                    self.reset_count();
                    self.begin_prompt(PromptKind::Path)
                }
                (KeyCode::Char('l'), KeyModifiers::NONE) => {
                    self.reset_count();
                    self.begin_prompt(PromptKind::Language)
                }
                (KeyCode::Char('m'), KeyModifiers::NONE) => {
                    self.reset_count();
                    self.begin_prompt(PromptKind::EmbeddingModel)
                }
                (KeyCode::Char('e'), KeyModifiers::NONE) => {
                    self.reset_count();
                    UiEvent::Embed
                }
                (KeyCode::Char('r'), KeyModifiers::NONE) => {
                    let index = self.take_count();
                    UiEvent::SwitchHistory { index }
                }
                (KeyCode::Char('f'), KeyModifiers::NONE) => {
                    let index = self.take_count();
                    UiEvent::FollowLink { index }
                }
                (KeyCode::Char('q'), _) => {
                    self.reset_count();
                    UiEvent::Quit
                }
                _ => {
                    self.reset_count();
                    UiEvent::None
                }
            },
            _ => UiEvent::None,
        }
    }

    fn map_event_prompt(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent {
                code, modifiers, ..
            }) => match (code, modifiers) {
                (KeyCode::Esc, _) => {
                    self.end_prompt();
                    UiEvent::PromptCancelled
                }
                (KeyCode::Enter, _) => self.submit_prompt(),
                (KeyCode::Backspace, _) => {
                    self.buffer.pop();
                    UiEvent::PromptChanged
                }
                (KeyCode::Char(c), mods) if mods.is_empty() || mods == KeyModifiers::SHIFT => {
                    self.buffer.push(c);
                    UiEvent::PromptChanged
                }
                _ => UiEvent::None,
            },
            _ => UiEvent::None,
        }
    }

    fn submit_prompt(&mut self) -> UiEvent {
        let input = self.buffer.clone();
        let kind = self.prompt.clone().expect("prompt mode without a kind");
        self.end_prompt();
        match kind {
            PromptKind::Chat => UiEvent::SubmitChat(input),
            PromptKind::Path => UiEvent::SubmitPath(input),
            PromptKind::Language => UiEvent::SubmitLanguage(input),
            // A non-numeric page entry is silently ignored.
            PromptKind::PageJump => match input.trim().parse::<u32>() {
                Ok(page) => UiEvent::JumpToPage(page),
                Err(_) => UiEvent::None,
            },
            PromptKind::EmbeddingModel => self.begin_prompt(PromptKind::EmbeddingKey {
                embedding_model: input,
            }),
            PromptKind::EmbeddingKey { embedding_model } => {
                self.begin_prompt(PromptKind::LlmName {
                    embedding_model,
                    embedding_key: input,
                })
            }
            PromptKind::LlmName {
                embedding_model,
                embedding_key,
            } => self.begin_prompt(PromptKind::LlmKey {
                embedding_model,
                embedding_key,
                llm_name: input,
            }),
            PromptKind::LlmKey {
                embedding_model,
                embedding_key,
                llm_name,
            } => UiEvent::SubmitModels(ModelSelection {
                embedding_model_name: embedding_model,
                embedding_model_api_key: embedding_key,
                llm_name,
                llm_api_key: input,
            }),
        }
    }

    fn begin_prompt(&mut self, kind: PromptKind) -> UiEvent {
        self.prompt = Some(kind);
        self.buffer.clear();
        UiEvent::PromptChanged
    }

    fn end_prompt(&mut self) {
        self.prompt = None;
        self.buffer.clear();
    }

    fn push_digit(&mut self, digit: usize) {
        let current = self.pending_count.unwrap_or(0);
        let next = current.saturating_mul(10).saturating_add(digit);
        self.pending_count = Some(next);
        if let Some(c) = char::from_digit(digit as u32, 10) {
            self.pending_digits.push(c);
        }
    }

    fn take_count(&mut self) -> usize {
        let count = self
            .pending_count
            .take()
            .filter(|&count| count > 0)
            .unwrap_or(1);
        self.pending_digits.clear();
        count
    }

    fn reset_count(&mut self) {
        self.pending_count = None;
        self.pending_digits.clear();
    }

    /// What the status line echoes while input is being collected.
    pub fn pending_input(&self) -> Option<String> {
        if let Some(kind) = &self.prompt {
            return Some(format!("{}> {}", kind.label(), self.buffer));
        }
        if self.pending_digits.is_empty() {
            None
        } else {
            Some(self.pending_digits.clone())
        }
    }
}

pub fn write_status_line<W: Write>(writer: &mut W, label: &str) -> io::Result<()> {
    write!(writer, "{}", label)?;
    writer.flush()
}

/// Formats the conversation as plain wrapped lines, newest last. Markdown in
/// assistant turns is shown verbatim.
pub fn format_transcript(history: &[ChatMessage], width: usize) -> Vec<String> {
    let width = width.max(8);
    let mut lines = Vec::new();
    for turn in history {
        let prefix = match turn.role {
            Role::Human => "you> ",
            Role::Assistant => "doc> ",
        };
        let indent = " ".repeat(prefix.len());
        for (i, line) in wrap_text(&turn.message, width.saturating_sub(prefix.len())).into_iter().enumerate() {
            if i == 0 {
                lines.push(format!("{prefix}{line}"));
            } else {
                lines.push(format!("{indent}{line}"));
            }
        }
    }
    lines
}

fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for raw_line in text.lines() {
        if raw_line.is_empty() {
            lines.push(String::new());
            continue;
        }
        let mut current = String::new();
        for word in raw_line.split_whitespace() {
            if current.is_empty() {
                current = word.to_string();
            } else if current.chars().count() + 1 + word.chars().count() <= width {
                current.push(' ');
                current.push_str(word);
            } else {
                lines.push(std::mem::take(&mut current));
                current = word.to_string();
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}
