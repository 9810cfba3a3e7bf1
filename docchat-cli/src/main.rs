use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::cursor;
use crossterm::event;
use crossterm::style::Print;
use crossterm::terminal::{self, Clear, ClearType};
use directories::ProjectDirs;
use docchat_core::flows::{
    ChatFlow, ChatOutcome, EmbedOutcome, EmbeddingTrigger, SettingsFlow, SettingsOutcome,
    UploadFlow, UploadOutcome,
};
use docchat_core::session::{shared, Session, SharedSession};
use docchat_core::viewer::{LinkTarget, OpenedDocument, ViewerCapability, ViewerState};
use docchat_core::AppConfig;
use docchat_http::HttpBackend;
use docchat_tty::{format_transcript, write_status_line, EventMapper, UiEvent};
use tokio::sync::mpsc;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "docchat",
    version,
    about = "chat with a PDF through a document-QA backend, from the terminal"
)]
struct Args {
    /// Backend base URL (overrides the config file)
    #[arg(short = 'b', long = "backend-url")]
    backend_url: Option<String>,

    /// Config file path (defaults to the platform config directory)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// PDF to upload on startup
    file: Option<PathBuf>,
}

struct RawModeGuard;

impl RawModeGuard {
    fn new() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let mut stdout = io::stdout();
        let _ = crossterm::execute!(stdout, cursor::Show);
    }
}

/// Completion of a spawned backend call, delivered to the event loop so all
/// session effects are applied on the one logical UI thread.
enum FlowDone {
    Upload(UploadOutcome),
    Embed(EmbedOutcome),
    Chat(ChatOutcome),
    Language(SettingsOutcome),
    Models(SettingsOutcome),
    DocumentFetched {
        tmp_file_path: String,
        opened: Result<OpenedDocument>,
    },
}

struct App {
    session: SharedSession,
    backend: Arc<HttpBackend>,
    upload: Arc<UploadFlow>,
    embedding: Arc<EmbeddingTrigger>,
    chat: Arc<ChatFlow>,
    settings: Arc<SettingsFlow>,
    viewer: ViewerCapability,
    viewer_state: ViewerState,
    opened: Option<OpenedDocument>,
    status: Option<String>,
    tx: mpsc::UnboundedSender<FlowDone>,
}

enum LoopAction {
    Continue,
    ContinueRedraw,
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "docchat", "docchat")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let config_path = args
        .config
        .unwrap_or_else(|| project_dirs.config_dir().join("docchat.toml"));
    let mut config = AppConfig::load(&config_path)
        .with_context(|| format!("bad config at {}", config_path.display()))?;
    if let Some(backend_url) = args.backend_url {
        config.backend_url = backend_url;
    }

    let session = shared(Session::new(config.initial_doc_config()));
    let backend = Arc::new(HttpBackend::new(&config.backend_url));
    let backend_dyn: Arc<dyn docchat_core::Backend> = backend.clone();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut app = App {
        upload: Arc::new(UploadFlow::new(session.clone(), backend_dyn.clone())),
        embedding: Arc::new(EmbeddingTrigger::new(session.clone(), backend_dyn.clone())),
        chat: Arc::new(ChatFlow::new(session.clone(), backend_dyn.clone())),
        settings: Arc::new(SettingsFlow::new(session.clone(), backend_dyn)),
        viewer: docchat_pdf::probe(),
        viewer_state: ViewerState::new(),
        opened: None,
        status: None,
        session,
        backend,
        tx,
    };

    if let Some(file) = args.file {
        app.spawn_upload(file);
    }

    let _raw = RawModeGuard::new()?;
    let mut stdout = io::stdout();
    crossterm::execute!(stdout, cursor::Hide)?;
    let mut mapper = EventMapper::new();
    let mut dirty = true;

    loop {
        while let Ok(done) = rx.try_recv() {
            app.apply_done(done);
            dirty = true;
        }

        // A flow in flight mutates the session from another task (e.g. the
        // optimistic chat turn); keep repainting until it completes.
        if app.upload.is_uploading() || app.embedding.is_embedding() || app.chat.is_thinking() {
            dirty = true;
        }

        if dirty {
            redraw(&mut stdout, &app, mapper.pending_input().as_deref())?;
            dirty = false;
        }

        if event::poll(Duration::from_millis(100))? {
            let ev = event::read()?;
            let ui_event = mapper.map_event(ev);
            match app.handle_event(ui_event) {
                LoopAction::ContinueRedraw => dirty = true,
                LoopAction::Continue => {}
                LoopAction::Quit => break,
            }
        }
    }

    crossterm::execute!(stdout, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    Ok(())
}

impl App {
    fn handle_event(&mut self, event: UiEvent) -> LoopAction {
        match event {
            UiEvent::NextPage => {
                self.viewer_state.next();
                LoopAction::ContinueRedraw
            }
            UiEvent::PrevPage => {
                self.viewer_state.prev();
                LoopAction::ContinueRedraw
            }
            UiEvent::ZoomIn => {
                self.viewer_state.zoom_in();
                LoopAction::ContinueRedraw
            }
            UiEvent::ZoomOut => {
                self.viewer_state.zoom_out();
                LoopAction::ContinueRedraw
            }
            UiEvent::JumpToPage(page) => {
                self.viewer_state.jump_to(page);
                LoopAction::ContinueRedraw
            }
            UiEvent::Embed => {
                if self.embedding.is_embedding() {
                    return self.notify("embedding is already running");
                }
                let embedding = self.embedding.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(FlowDone::Embed(embedding.embed().await));
                });
                self.notify("building the vector index...")
            }
            UiEvent::SubmitChat(text) => {
                if self.chat.is_thinking() {
                    return self.notify("still waiting for the previous answer");
                }
                let chat = self.chat.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(FlowDone::Chat(chat.send_user_message(&text).await));
                });
                LoopAction::ContinueRedraw
            }
            UiEvent::SubmitPath(path) => {
                let path = path.trim();
                if path.is_empty() {
                    return LoopAction::ContinueRedraw;
                }
                if self.upload.is_uploading() {
                    return self.notify("an upload is already running");
                }
                self.spawn_upload(PathBuf::from(path));
                self.notify("uploading...")
            }
            UiEvent::SwitchHistory { index } => {
                let name = {
                    let session = self.session.lock();
                    session
                        .uploaded_files()
                        .get(index.saturating_sub(1))
                        .map(|f| f.name.clone())
                };
                let Some(name) = name else {
                    return self.notify("no such history entry");
                };
                if self.session.lock().config().file_name == name {
                    return self.notify("that document is already active");
                }
                if self.upload.is_uploading() {
                    return self.notify("an upload is already running");
                }
                let upload = self.upload.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(FlowDone::Upload(upload.reopen(&name).await));
                });
                self.notify("reopening...")
            }
            UiEvent::SubmitLanguage(language) => {
                let settings = self.settings.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(FlowDone::Language(
                        settings.set_language(language.trim()).await,
                    ));
                });
                LoopAction::ContinueRedraw
            }
            UiEvent::SubmitModels(selection) => {
                let settings = self.settings.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(FlowDone::Models(settings.set_models(selection).await));
                });
                self.notify("configuring models...")
            }
            UiEvent::FollowLink { index } => self.follow_link(index),
            UiEvent::PromptChanged | UiEvent::PromptCancelled => LoopAction::ContinueRedraw,
            UiEvent::Quit => LoopAction::Quit,
            UiEvent::None => LoopAction::Continue,
        }
    }

    fn spawn_upload(&mut self, path: PathBuf) {
        if self.upload.is_uploading() {
            self.status = Some("an upload is already running".to_string());
            return;
        }
        let upload = self.upload.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(FlowDone::Upload(upload.upload_new(&path).await));
        });
    }

    /// Link interception: in-document targets navigate, absolute external
    /// URLs are kept away from the page state and handed to the system
    /// opener, fragments keep their default (no-op) handling.
    fn follow_link(&mut self, index: usize) -> LoopAction {
        let Some(opened) = &self.opened else {
            return self.notify("no document loaded");
        };
        let link = opened
            .links_on_page(self.viewer_state.current_page())
            .nth(index.saturating_sub(1))
            .cloned();
        match link {
            Some(link) => match link.target {
                LinkTarget::Page(page) => {
                    self.viewer_state.on_item_click(page);
                    LoopAction::ContinueRedraw
                }
                LinkTarget::External(url) => {
                    let shown = url.as_str().to_string();
                    if let Err(err) = open_external(url.as_str()) {
                        warn!(url = %shown, error = %err, "failed to launch opener");
                        return self.notify(&format!("could not open {shown}"));
                    }
                    self.notify(&format!("opened {shown}"))
                }
                LinkTarget::Fragment(_) => LoopAction::Continue,
            },
            None => self.notify("no such link on this page"),
        }
    }

    fn apply_done(&mut self, done: FlowDone) {
        match done {
            FlowDone::Upload(outcome) => self.apply_upload(outcome),
            FlowDone::Embed(outcome) => {
                self.status = Some(match outcome {
                    EmbedOutcome::Completed => "vector index ready".to_string(),
                    EmbedOutcome::AlreadyEmbedded => "document is already indexed".to_string(),
                    EmbedOutcome::NoDocument => "upload a document first".to_string(),
                    EmbedOutcome::Busy => "embedding is already running".to_string(),
                    EmbedOutcome::Stale => {
                        "indexing finished for a previous document; ignored".to_string()
                    }
                    EmbedOutcome::Failed(message) => message,
                });
            }
            FlowDone::Chat(outcome) => {
                self.status = match outcome {
                    ChatOutcome::Answered(_) => None,
                    ChatOutcome::EmptyInput | ChatOutcome::Busy => None,
                    ChatOutcome::Stale => {
                        Some("an answer for a previous document was discarded".to_string())
                    }
                    ChatOutcome::Failed(message) => Some(message),
                };
            }
            FlowDone::Language(outcome) => {
                self.status = Some(match outcome {
                    SettingsOutcome::Applied => "document language set".to_string(),
                    SettingsOutcome::Ignored => "no language given".to_string(),
                    SettingsOutcome::Stale => {
                        "language confirmation for a previous document; ignored".to_string()
                    }
                    SettingsOutcome::Failed(message) => message,
                });
            }
            FlowDone::Models(outcome) => {
                self.status = Some(match outcome {
                    SettingsOutcome::Applied => "models configured".to_string(),
                    SettingsOutcome::Ignored | SettingsOutcome::Stale => "ignored".to_string(),
                    SettingsOutcome::Failed(message) => message,
                });
            }
            FlowDone::DocumentFetched {
                tmp_file_path,
                opened,
            } => {
                // A fetch that finishes after another document became active
                // must not feed the controller.
                if self.session.lock().config().tmp_file_path != tmp_file_path {
                    return;
                }
                match opened {
                    Ok(document) => {
                        self.viewer_state.on_document_loaded(document.page_count);
                        self.opened = Some(document);
                    }
                    Err(err) => {
                        warn!(error = %format!("{err:#}"), "viewer could not open document");
                        self.status = Some("viewer could not open the document".to_string());
                    }
                }
            }
        }
    }

    fn apply_upload(&mut self, outcome: UploadOutcome) {
        match outcome {
            UploadOutcome::Replaced {
                file_name,
                tmp_file_path,
            }
            | UploadOutcome::Switched {
                file_name,
                tmp_file_path,
            } => {
                self.status = Some(format!("loaded {file_name}"));
                self.opened = None;
                self.viewer_state.on_document_loaded(0);
                self.spawn_fetch(tmp_file_path);
            }
            UploadOutcome::NoFile => {
                self.status = Some("no file selected".to_string());
            }
            UploadOutcome::Busy => {
                self.status = Some("an upload is already running".to_string());
            }
            UploadOutcome::Failed(message) => {
                self.status = Some(message);
            }
        }
    }

    fn spawn_fetch(&self, tmp_file_path: String) {
        if !self.viewer.is_ready() {
            return;
        }
        let backend = self.backend.clone();
        let viewer = self.viewer.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let opened = match backend.fetch_document(&tmp_file_path).await {
                Ok(bytes) => viewer.open(&bytes).map_err(Into::into),
                Err(err) => Err(err),
            };
            let _ = tx.send(FlowDone::DocumentFetched {
                tmp_file_path,
                opened,
            });
        });
    }

    fn notify(&mut self, message: &str) -> LoopAction {
        self.status = Some(message.to_string());
        LoopAction::ContinueRedraw
    }
}

fn redraw(stdout: &mut io::Stdout, app: &App, pending_input: Option<&str>) -> Result<()> {
    let (cols, rows) = terminal::size()?;
    let cols = cols.max(20) as usize;
    let rows = rows.max(8);

    let config = app.session.lock().snapshot();
    let uploaded: Vec<String> = app
        .session
        .lock()
        .uploaded_files()
        .iter()
        .map(|f| f.name.clone())
        .collect();

    crossterm::queue!(stdout, Clear(ClearType::All), cursor::MoveTo(0, 0))?;

    let title = if config.has_document() {
        config.file_name.clone()
    } else {
        "no document loaded (o to upload)".to_string()
    };
    crossterm::queue!(stdout, Print(truncate(&title, cols)))?;

    let mut info = format!(
        "page {}/{}  zoom {:.0}%",
        app.viewer_state.current_page(),
        app.viewer_state.num_pages(),
        app.viewer_state.scale() * 100.0
    );
    if config.is_embedded {
        info.push_str("  [indexed]");
    }
    if !config.language.is_empty() {
        info.push_str(&format!("  lang: {}", config.language));
    }
    if !app.viewer.is_ready() {
        info.push_str("  viewer unavailable");
    }
    crossterm::queue!(stdout, cursor::MoveTo(0, 1), Print(truncate(&info, cols)))?;

    let mut row = 3u16;
    if !uploaded.is_empty() {
        let history = uploaded
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{}. {}", i + 1, name))
            .collect::<Vec<_>>()
            .join("  ");
        crossterm::queue!(
            stdout,
            cursor::MoveTo(0, row),
            Print(truncate(&format!("history: {history}  (Nr reopens)"), cols))
        )?;
        row += 1;
    }

    if let Some(opened) = &app.opened {
        let links: Vec<String> = opened
            .links_on_page(app.viewer_state.current_page())
            .enumerate()
            .map(|(i, link)| {
                let label = match &link.target {
                    LinkTarget::Page(page) => format!("p.{page}"),
                    LinkTarget::External(url) => url.as_str().to_string(),
                    LinkTarget::Fragment(fragment) => format!("#{fragment}"),
                };
                format!("{}. {}", i + 1, label)
            })
            .collect();
        if !links.is_empty() {
            crossterm::queue!(
                stdout,
                cursor::MoveTo(0, row),
                Print(truncate(&format!("links: {}  (Nf follows)", links.join("  ")), cols))
            )?;
            row += 1;
        }
    }

    row += 1;
    let transcript_rows = rows.saturating_sub(row + 2) as usize;
    let lines = format_transcript(&config.chat_history, cols);
    let start = lines.len().saturating_sub(transcript_rows);
    for line in &lines[start..] {
        crossterm::queue!(stdout, cursor::MoveTo(0, row), Print(truncate(line, cols)))?;
        row += 1;
    }

    let status_row = rows.saturating_sub(1);
    let status = pending_input
        .map(str::to_string)
        .or_else(|| app.status.clone())
        .unwrap_or_else(|| {
            "i ask  o open  e index  l language  m models  j/k pages  q quit".to_string()
        });
    crossterm::queue!(
        stdout,
        cursor::MoveTo(0, status_row),
        Clear(ClearType::CurrentLine)
    )?;
    stdout.flush()?;
    write_status_line(stdout, &truncate(&status, cols))?;
    Ok(())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(width.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}

/// Opens an absolute external URL in the system browser. Intercepted links
/// never reach the page-navigation state.
fn open_external(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    let mut command = {
        let mut c = Command::new("open");
        c.arg(url);
        c
    };
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", "", url]);
        c
    };
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut command = {
        let mut c = Command::new("xdg-open");
        c.arg(url);
        c
    };
    command
        .spawn()
        .with_context(|| format!("failed to open {url}"))?;
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "docchat.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // File only: console output would tear the raw-mode UI.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
