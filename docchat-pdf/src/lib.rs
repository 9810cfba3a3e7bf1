//! pdfium-backed implementation of the viewer seam.
//!
//! Only document structure is read here: the page count that drives the
//! navigation controller and the link targets behind in-document
//! navigation and external-URL interception. Rasterization is not this
//! client's concern.

use docchat_core::viewer::ViewerCapability;

#[cfg(feature = "pdf")]
use std::sync::Arc;

#[cfg(feature = "pdf")]
use docchat_core::viewer::{
    DocumentViewer, LinkTarget, OpenedDocument, PageLink, ViewerError,
};
#[cfg(feature = "pdf")]
use pdfium_render::prelude::*;
#[cfg(feature = "pdf")]
use tracing::warn;

/// Probes the rendering capability once at startup. A missing pdfium
/// dynamic library is not an error: the client stays usable and the viewer
/// pane reports itself unavailable.
pub fn probe() -> ViewerCapability {
    #[cfg(feature = "pdf")]
    {
        match PdfiumViewer::bind() {
            Ok(viewer) => return ViewerCapability::Ready(Arc::new(viewer)),
            Err(err) => warn!(error = %err, "pdfium unavailable, viewer disabled"),
        }
    }
    ViewerCapability::Unavailable
}

#[cfg(feature = "pdf")]
pub struct PdfiumViewer {
    pdfium: Pdfium,
}

#[cfg(feature = "pdf")]
impl PdfiumViewer {
    fn bind() -> Result<Self, ViewerError> {
        let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|err| ViewerError::Open(err.to_string()))?;
        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }

    fn link_target(link: &PdfLink<'_>) -> Option<LinkTarget> {
        if let Some(action) = link.action() {
            match action.action_type() {
                PdfActionType::GoToDestinationInSameDocument => {
                    if let Some(local) = action.as_local_destination_action() {
                        if let Ok(destination) = local.destination() {
                            if let Ok(page_index) = destination.page_index() {
                                // pdfium pages are 0-based, the viewer's are 1-based.
                                return Some(LinkTarget::Page(u32::from(page_index) + 1));
                            }
                        }
                    }
                }
                PdfActionType::Uri => {
                    if let Some(uri_action) = action.as_uri_action() {
                        if let Ok(uri) = uri_action.uri() {
                            return LinkTarget::classify(&uri);
                        }
                    }
                }
                _ => {}
            }
        }

        if let Some(destination) = link.destination() {
            if let Ok(page_index) = destination.page_index() {
                return Some(LinkTarget::Page(u32::from(page_index) + 1));
            }
        }

        None
    }
}

#[cfg(feature = "pdf")]
impl DocumentViewer for PdfiumViewer {
    fn open(&self, bytes: &[u8]) -> Result<OpenedDocument, ViewerError> {
        let document = self
            .pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|err| ViewerError::Open(err.to_string()))?;

        let page_count = u32::from(document.pages().len());
        let mut links = Vec::new();
        for (index, page) in document.pages().iter().enumerate() {
            for link in page.links().iter() {
                if let Some(target) = Self::link_target(&link) {
                    links.push(PageLink {
                        source_page: index as u32 + 1,
                        target,
                    });
                }
            }
        }

        Ok(OpenedDocument { page_count, links })
    }
}
