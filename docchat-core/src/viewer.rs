use std::sync::Arc;

use thiserror::Error;
use url::Url;

pub const MIN_SCALE: f32 = 0.5;
pub const MAX_SCALE: f32 = 3.0;
pub const SCALE_STEP: f32 = 0.1;
pub const DEFAULT_SCALE: f32 = 1.5;

/// Page-navigation state machine for the viewer.
///
/// Pages are 1-based; `num_pages == 0` means no document is loaded and
/// every transition is a silent no-op. Out-of-range requests are ignored,
/// not errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewerState {
    current_page: u32,
    num_pages: u32,
    scale: f32,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self {
            current_page: 1,
            num_pages: 0,
            scale: DEFAULT_SCALE,
        }
    }
}

impl ViewerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Called once per loaded document with the viewer-reported page count.
    pub fn on_document_loaded(&mut self, num_pages: u32) {
        self.num_pages = num_pages;
        self.current_page = 1;
    }

    pub fn prev(&mut self) {
        self.jump_to(self.current_page.saturating_sub(1));
    }

    pub fn next(&mut self) {
        self.jump_to(self.current_page.saturating_add(1));
    }

    pub fn jump_to(&mut self, page: u32) {
        if page >= 1 && page <= self.num_pages {
            self.current_page = page;
        }
    }

    /// Internal document-link navigation. The target came from the
    /// document's own link table, so it is trusted without a bounds
    /// re-check; only the impossible page 0 is ignored.
    pub fn on_item_click(&mut self, page: u32) {
        if page != 0 {
            self.current_page = page;
        }
    }

    pub fn zoom_in(&mut self) {
        self.set_scale(self.scale + SCALE_STEP);
    }

    pub fn zoom_out(&mut self) {
        self.set_scale(self.scale - SCALE_STEP);
    }

    fn set_scale(&mut self, scale: f32) {
        self.scale = scale.clamp(MIN_SCALE, MAX_SCALE);
    }
}

/// Where a document hyperlink leads once classified by the interceptor.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkTarget {
    /// In-document destination; navigated via [`ViewerState::on_item_click`].
    Page(u32),
    /// Absolute external URL; page navigation is suppressed and the URL is
    /// handed to the system opener instead.
    External(Url),
    /// In-page fragment, left to default handling.
    Fragment(String),
}

impl LinkTarget {
    /// Classifies a raw href the way the click interceptor does. Anything
    /// that is neither an absolute http(s) URL nor a fragment returns
    /// `None` and keeps its default handling.
    pub fn classify(href: &str) -> Option<LinkTarget> {
        if let Some(fragment) = href.strip_prefix('#') {
            return Some(LinkTarget::Fragment(fragment.to_string()));
        }
        match Url::parse(href) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                Some(LinkTarget::External(url))
            }
            _ => None,
        }
    }
}

/// One hyperlink extracted from the document, anchored to the page it sits on.
#[derive(Debug, Clone, PartialEq)]
pub struct PageLink {
    pub source_page: u32,
    pub target: LinkTarget,
}

/// What the viewer reports after opening the fetched document bytes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpenedDocument {
    pub page_count: u32,
    pub links: Vec<PageLink>,
}

impl OpenedDocument {
    pub fn links_on_page(&self, page: u32) -> impl Iterator<Item = &PageLink> {
        self.links.iter().filter(move |link| link.source_page == page)
    }
}

#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("viewer backend is unavailable")]
    Unavailable,
    #[error("failed to open document: {0}")]
    Open(String),
}

/// Rendering-capability seam. Implementations read document structure (page
/// count, link targets); rasterization is not this client's concern.
pub trait DocumentViewer: Send + Sync {
    fn open(&self, bytes: &[u8]) -> Result<OpenedDocument, ViewerError>;
}

/// Lifecycle of the rendering capability. `Unavailable` is a valid state
/// the UI renders as such; the transition to `Ready` happens at most once,
/// when the provider probe succeeds at startup.
#[derive(Clone)]
pub enum ViewerCapability {
    Unavailable,
    Ready(Arc<dyn DocumentViewer>),
}

impl ViewerCapability {
    pub fn is_ready(&self) -> bool {
        matches!(self, ViewerCapability::Ready(_))
    }

    pub fn open(&self, bytes: &[u8]) -> Result<OpenedDocument, ViewerError> {
        match self {
            ViewerCapability::Unavailable => Err(ViewerError::Unavailable),
            ViewerCapability::Ready(viewer) => viewer.open(bytes),
        }
    }
}
