//! Boundary between the orchestrator and the platform that actually saves files.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::message::Message;
use crate::orchestrator::BatchReport;

/// Identifier the download service hands out for each accepted download.
pub type DownloadId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    Url(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub source: DownloadSource,
    /// Explicit relative destination; `None` lets the service pick one.
    pub filename: Option<String>,
}

impl DownloadRequest {
    pub fn url<S: Into<String>>(url: S) -> Self {
        Self {
            source: DownloadSource::Url(url.into()),
            filename: None,
        }
    }

    pub fn bytes<S: Into<String>>(data: Vec<u8>, filename: S) -> Self {
        Self {
            source: DownloadSource::Bytes(data),
            filename: Some(filename.into()),
        }
    }

    /// Human-readable target for log lines.
    pub fn describe(&self) -> &str {
        match (&self.source, &self.filename) {
            (DownloadSource::Url(url), _) => url,
            (DownloadSource::Bytes(_), Some(name)) => name,
            (DownloadSource::Bytes(_), None) => "<bytes>",
        }
    }
}

/// Answer to a rename event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilenameSuggestion {
    KeepDefault,
    Rename(String),
}

/// Retrieves image bytes for archive mode.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// The platform download mechanism.
///
/// After `download` returns an id, the service reports the proposed file name
/// through [`HostEvent::DeterminingFilename`] carrying that id, and waits for
/// the reply before choosing a destination.
#[async_trait]
pub trait DownloadService: Send + Sync {
    async fn download(&self, request: DownloadRequest) -> Result<DownloadId>;
}

/// Inbound events consumed by [`crate::orchestrator::Orchestrator::run`].
#[derive(Debug)]
pub enum HostEvent {
    DownloadImages {
        message: Message,
        ack: Option<oneshot::Sender<BatchReport>>,
    },
    DeterminingFilename {
        id: DownloadId,
        suggested: String,
        reply: oneshot::Sender<FilenameSuggestion>,
    },
}

#[async_trait]
impl<T: DownloadService + ?Sized> DownloadService for std::sync::Arc<T> {
    async fn download(&self, request: DownloadRequest) -> Result<DownloadId> {
        (**self).download(request).await
    }
}
