use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::archive::ZipArchiveBuilder;
use crate::error::{Error, Result};
use crate::host::{
    DownloadId, DownloadRequest, DownloadService, FilenameSuggestion, HostEvent, ImageFetcher,
};
use crate::message::{DownloadOptions, Message};
use crate::naming::{archive_path, entry_name, generate_path, site_of, today};
use crate::registry::TaskRegistry;
use crate::state::{TaskId, TaskState};
use crate::utils::get_filename_from_url;

/// Outcome of one batch, sent back as the acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub total: usize,
    pub placed: usize,
    pub failed: usize,
    /// Relative path of the archive handed to the download service.
    pub archive: Option<String>,
}

struct Inner<F, S> {
    fetcher: F,
    service: S,
    registry: Mutex<TaskRegistry>,
}

/// Drives bulk downloads and answers the download service's rename events.
pub struct Orchestrator<F, S> {
    inner: Arc<Inner<F, S>>,
}

impl<F, S> Clone for Orchestrator<F, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F, S> Orchestrator<F, S>
where
    F: ImageFetcher + 'static,
    S: DownloadService + 'static,
{
    pub fn new(fetcher: F, service: S) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                service,
                registry: Mutex::new(TaskRegistry::new()),
            }),
        }
    }

    pub async fn active_tasks(&self) -> usize {
        self.inner.registry.lock().await.len()
    }

    /// Consumes host events until every sender is dropped.
    pub async fn run(self, mut events: mpsc::Receiver<HostEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        debug!("Host event channel closed");
    }

    pub async fn handle(&self, event: HostEvent) {
        match event {
            HostEvent::DownloadImages { message, ack } => {
                let this = self.clone();
                tokio::spawn(async move {
                    let report = this.handle_message(message).await;
                    if let Some(ack) = ack {
                        let _ = ack.send(report);
                    }
                });
            }
            HostEvent::DeterminingFilename {
                id,
                suggested,
                reply,
            } => self.determine_filename(id, &suggested, reply).await,
        }
    }

    async fn handle_message(&self, message: Message) -> BatchReport {
        let Message::DownloadImages {
            images_to_download,
            options,
        } = message;
        let total = images_to_download.len();
        match self.begin_download(images_to_download, options).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Batch aborted");
                BatchReport {
                    total,
                    failed: total,
                    ..BatchReport::default()
                }
            }
        }
    }

    /// Downloads every image of one request. Per-image failures are logged and
    /// counted; the batch always runs to the end.
    pub async fn begin_download(
        &self,
        images: Vec<String>,
        options: DownloadOptions,
    ) -> Result<BatchReport> {
        if images.is_empty() {
            warn!("Download request without images ignored");
            return Ok(BatchReport::default());
        }

        let zip = options.zip_download;
        let total = images.len();
        let task = self.inner.registry.lock().await.insert(images, options);
        info!(task, images = total, zip, "Batch started");

        let report = if zip {
            self.download_archive(task).await?
        } else {
            self.download_direct(task).await?
        };

        info!(
            task,
            placed = report.placed,
            failed = report.failed,
            archive = report.archive.as_deref().unwrap_or("-"),
            "Batch finished"
        );
        Ok(report)
    }

    async fn snapshot(&self, task: TaskId) -> Result<(Vec<String>, DownloadOptions)> {
        let registry = self.inner.registry.lock().await;
        let task = registry.get(task).ok_or(Error::UnknownTask(task))?;
        Ok((task.images().to_vec(), task.options().clone()))
    }

    async fn advance(&self, task: TaskId) -> Result<TaskState> {
        self.inner.registry.lock().await.advance(task)
    }

    async fn download_archive(&self, task: TaskId) -> Result<BatchReport> {
        let (images, options) = self.snapshot(task).await?;
        let mut report = BatchReport {
            total: images.len(),
            ..BatchReport::default()
        };
        let mut builder = ZipArchiveBuilder::new();
        let mut broken = false;

        for url in &images {
            if broken {
                report.failed += 1;
                self.advance(task).await?;
                continue;
            }

            match self.inner.fetcher.fetch(url).await {
                Ok(data) => {
                    let name = {
                        let registry = self.inner.registry.lock().await;
                        let current = registry.get(task).ok_or(Error::UnknownTask(task))?;
                        let path = generate_path(current, &get_filename_from_url(url));
                        entry_name(&path).to_string()
                    };
                    match builder.append(&name, &data) {
                        Ok(()) => report.placed += 1,
                        Err(e) => {
                            error!(
                                task,
                                url = %url,
                                error = %e,
                                "Archive is unusable, skipping the rest"
                            );
                            report.failed += 1;
                            broken = true;
                        }
                    }
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Fetch failed, image skipped");
                    report.failed += 1;
                }
            }
            self.advance(task).await?;
        }

        if broken {
            report.failed += report.placed;
            report.placed = 0;
            return Ok(report);
        }
        if builder.is_empty() {
            warn!(task, "No image could be fetched, archive not created");
            return Ok(report);
        }

        let entries = builder.len();
        let bytes = match builder.finish() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(task, error = %e, "Archive could not be finalized");
                report.failed += report.placed;
                report.placed = 0;
                return Ok(report);
            }
        };

        let path = archive_path(&site_of(options.active_tab_origin.as_deref()), &today());
        let size = bytes.len();
        match self
            .inner
            .service
            .download(DownloadRequest::bytes(bytes, path.clone()))
            .await
        {
            Ok(id) => {
                info!(task, download = id, entries, size, path = %path, "Archive download started");
                report.archive = Some(path);
            }
            Err(e) => {
                error!(task, path = %path, error = %e, "Archive download rejected");
                report.failed += report.placed;
                report.placed = 0;
            }
        }
        Ok(report)
    }

    async fn download_direct(&self, task: TaskId) -> Result<BatchReport> {
        let (images, _) = self.snapshot(task).await?;
        let mut report = BatchReport {
            total: images.len(),
            ..BatchReport::default()
        };

        for url in images {
            // Lock held across the request so a rename event racing the
            // returned id still finds it tracked.
            let requested = {
                let mut registry = self.inner.registry.lock().await;
                self.inner
                    .service
                    .download(DownloadRequest::url(url.clone()))
                    .await
                    .map(|id| (id, registry.track(id, task)))
            };

            match requested {
                Ok((id, done)) => {
                    debug!(task, download = id, url = %url, "Waiting for rename event");
                    if done.await.is_ok() {
                        report.placed += 1;
                    } else {
                        warn!(task, download = id, url = %url, "Rename event never answered");
                        report.failed += 1;
                        self.advance(task).await?;
                    }
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Download rejected, image skipped");
                    report.failed += 1;
                    self.advance(task).await?;
                }
            }
        }
        Ok(report)
    }

    /// Answers a rename event through `reply`. Downloads this orchestrator did
    /// not start keep the service's own name.
    pub async fn determine_filename(
        &self,
        id: DownloadId,
        suggested: &str,
        reply: oneshot::Sender<FilenameSuggestion>,
    ) {
        let (suggestion, done) = self.resolve_rename(id, suggested).await;
        if reply.send(suggestion).is_err() {
            warn!(download = id, "Rename reply dropped by the download service");
        }
        // The batch moves on only after the service has its answer.
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    async fn resolve_rename(
        &self,
        id: DownloadId,
        suggested: &str,
    ) -> (FilenameSuggestion, Option<oneshot::Sender<()>>) {
        let mut registry = self.inner.registry.lock().await;
        let Some(pending) = registry.take_pending(id) else {
            debug!(download = id, suggested, "Rename event for untracked download");
            return (FilenameSuggestion::KeepDefault, None);
        };

        let Some(task) = registry.get(pending.task) else {
            warn!(download = id, task = pending.task, "Rename event for a retired task");
            return (FilenameSuggestion::KeepDefault, Some(pending.done));
        };

        let path = generate_path(task, suggested);
        if let Err(e) = registry.advance(pending.task) {
            error!(download = id, error = %e, "Task progress out of sync");
        }
        debug!(download = id, path = %path, "Rename suggested");
        (FilenameSuggestion::Rename(path), Some(pending.done))
    }
}
