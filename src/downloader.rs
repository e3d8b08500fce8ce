use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::StreamExt;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use reqwest::Client;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::host::{
    DownloadId, DownloadRequest, DownloadService, DownloadSource, FilenameSuggestion, HostEvent,
};
use crate::utils::{get_filename_from_url, get_unique_filepath, resolve_relative};

#[derive(Default)]
struct Totals {
    files: AtomicUsize,
    bytes: AtomicU64,
    failures: AtomicUsize,
}

/// Saves downloads below a local directory, asking the orchestrator for each
/// file's final name the way a browser's download manager does.
pub struct LocalDownloadService {
    client: Client,
    download_dir: PathBuf,
    events: mpsc::Sender<HostEvent>,
    next_id: AtomicU64,
    progress: ProgressBar,
    totals: Arc<Totals>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
}

pub fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

impl LocalDownloadService {
    pub fn new(
        client: Client,
        download_dir: PathBuf,
        events: mpsc::Sender<HostEvent>,
        progress: ProgressBar,
    ) -> Self {
        progress.set_message("Saved: 0 files | 0 B");
        Self {
            client,
            download_dir,
            events,
            next_id: AtomicU64::new(0),
            progress,
            totals: Arc::new(Totals::default()),
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn saved_files(&self) -> usize {
        self.totals.files.load(Ordering::Relaxed)
    }

    pub fn saved_bytes(&self) -> u64 {
        self.totals.bytes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> usize {
        self.totals.failures.load(Ordering::Relaxed)
    }

    /// Waits for every file started so far to be written.
    pub async fn wait_idle(&self) {
        loop {
            let jobs: Vec<_> = std::mem::take(&mut *self.jobs.lock().await);
            if jobs.is_empty() {
                break;
            }
            for job in jobs {
                if let Err(e) = job.await {
                    warn!(error = %e, "Download job panicked");
                }
            }
        }
        self.progress.finish_with_message(format!(
            "Saved: {} files | {}",
            self.saved_files(),
            HumanBytes(self.saved_bytes())
        ));
    }
}

#[async_trait]
impl DownloadService for LocalDownloadService {
    async fn download(&self, request: DownloadRequest) -> Result<DownloadId> {
        let suggested = match (&request.source, &request.filename) {
            (DownloadSource::Url(url), _) => {
                Url::parse(url).map_err(|e| Error::rejected(url.as_str(), e))?;
                get_filename_from_url(url)
            }
            (DownloadSource::Bytes(_), Some(name)) => {
                name.rsplit('/').next().unwrap_or(name).to_string()
            }
            (DownloadSource::Bytes(_), None) => format!("download_{}", uuid::Uuid::new_v4()),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(download = id, request = request.describe(), "Download accepted");

        let job = Job {
            id,
            request,
            suggested,
            client: self.client.clone(),
            download_dir: self.download_dir.clone(),
            events: self.events.clone(),
            progress: self.progress.clone(),
            totals: self.totals.clone(),
        };
        self.jobs.lock().await.push(tokio::spawn(job.run()));
        Ok(id)
    }
}

struct Job {
    id: DownloadId,
    request: DownloadRequest,
    suggested: String,
    client: Client,
    download_dir: PathBuf,
    events: mpsc::Sender<HostEvent>,
    progress: ProgressBar,
    totals: Arc<Totals>,
}

impl Job {
    async fn run(self) {
        let suggestion = self.ask_filename().await;
        let relative = match suggestion {
            FilenameSuggestion::Rename(path) => path,
            FilenameSuggestion::KeepDefault => self
                .request
                .filename
                .clone()
                .unwrap_or_else(|| self.suggested.clone()),
        };
        let written = match reserve(&resolve_relative(&self.download_dir, &relative)).await {
            Ok(target) => {
                let saved = match &self.request.source {
                    DownloadSource::Url(url) => save_url(&self.client, url, &target).await,
                    DownloadSource::Bytes(data) => save_bytes(data, &target).await,
                };
                if saved.is_err() {
                    let _ = fs::remove_file(&target).await;
                    let _ = fs::remove_file(part_path(&target)).await;
                }
                saved.map(|size| (target, size))
            }
            Err(e) => Err(e),
        };

        match written {
            Ok((target, size)) => {
                let files = self.totals.files.fetch_add(1, Ordering::Relaxed) + 1;
                let bytes = self.totals.bytes.fetch_add(size, Ordering::Relaxed) + size;
                self.progress
                    .set_message(format!("Saved: {} files | {}", files, HumanBytes(bytes)));
                info!(download = self.id, path = %target.display(), size, "Saved");
            }
            Err(e) => {
                self.totals.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    download = self.id,
                    request = self.request.describe(),
                    error = %e,
                    "Download failed"
                );
            }
        }
    }

    async fn ask_filename(&self) -> FilenameSuggestion {
        let (reply, answer) = oneshot::channel();
        let event = HostEvent::DeterminingFilename {
            id: self.id,
            suggested: self.suggested.clone(),
            reply,
        };
        if self.events.send(event).await.is_err() {
            return FilenameSuggestion::KeepDefault;
        }
        answer.await.unwrap_or(FilenameSuggestion::KeepDefault)
    }
}

async fn ensure_parent(target: &Path) -> anyhow::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .context("Failed to create destination directory")?;
    }
    Ok(())
}

/// Claims a free file name next to `path` so concurrent jobs never share one.
async fn reserve(path: &Path) -> anyhow::Result<PathBuf> {
    ensure_parent(path).await?;
    loop {
        let candidate = get_unique_filepath(path);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e).context("Failed to create destination file"),
        }
    }
}

async fn save_bytes(data: &[u8], target: &Path) -> anyhow::Result<u64> {
    fs::write(target, data).await.context("Failed to write file")?;
    Ok(data.len() as u64)
}

fn part_path(target: &Path) -> PathBuf {
    let mut path = target.as_os_str().to_os_string();
    path.push(".part");
    PathBuf::from(path)
}

async fn save_url(client: &Client, url: &str, target: &Path) -> anyhow::Result<u64> {
    let part_filepath = part_path(target);

    let response = client.get(url).send().await.context("Failed to send request")?;
    if !response.status().is_success() {
        return Err(anyhow!("HTTP {} from {}", response.status(), url));
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&part_filepath)
        .await
        .context("Failed to open partial file")?;

    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(item) = stream.next().await {
        let chunk = item.context("Error while downloading chunk")?;
        file.write_all(&chunk).await.context("Error while writing to file")?;
        written += chunk.len() as u64;
    }

    file.flush().await.context("Failed to flush file")?;
    drop(file);

    fs::rename(&part_filepath, target)
        .await
        .context("Failed to rename partial file")?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Answers rename events with a fixed suggestion.
    fn responder(suggestion: FilenameSuggestion) -> mpsc::Sender<HostEvent> {
        let (tx, mut rx) = mpsc::channel::<HostEvent>(8);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let HostEvent::DeterminingFilename { reply, .. } = event {
                    let _ = reply.send(suggestion.clone());
                }
            }
        });
        tx
    }

    fn service(dir: &Path, events: mpsc::Sender<HostEvent>) -> LocalDownloadService {
        let client = crate::fetcher::build_client(Duration::from_secs(1));
        LocalDownloadService::new(client, dir.to_path_buf(), events, ProgressBar::hidden())
    }

    #[tokio::test]
    async fn bytes_land_at_explicit_name_when_default_kept() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), responder(FilenameSuggestion::KeepDefault));

        let first = svc
            .download(DownloadRequest::bytes(b"zip".to_vec(), "QhromaLabs/site/2024-01-01.zip"))
            .await
            .unwrap();
        let second = svc
            .download(DownloadRequest::bytes(b"zip2".to_vec(), "QhromaLabs/site/2024-01-01.zip"))
            .await
            .unwrap();
        assert_ne!(first, second);
        svc.wait_idle().await;

        let base = dir.path().join("QhromaLabs/site");
        let mut saved = vec![
            std::fs::read(base.join("2024-01-01.zip")).unwrap(),
            std::fs::read(base.join("2024-01-01_1.zip")).unwrap(),
        ];
        saved.sort();
        assert_eq!(saved, vec![b"zip".to_vec(), b"zip2".to_vec()]);
        assert_eq!(svc.saved_files(), 2);
        assert_eq!(svc.saved_bytes(), 7);
    }

    #[tokio::test]
    async fn rename_suggestion_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(
            dir.path(),
            responder(FilenameSuggestion::Rename("A\\b//c.bin".to_string())),
        );

        svc.download(DownloadRequest::bytes(vec![1, 2, 3], "ignored.bin"))
            .await
            .unwrap();
        svc.wait_idle().await;

        assert_eq!(std::fs::read(dir.path().join("A/b/c.bin")).unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_names_stay_inside_download_dir() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("downloads");

        let svc = service(&root, responder(FilenameSuggestion::KeepDefault));
        svc.download(DownloadRequest::bytes(b"zip".to_vec(), ""))
            .await
            .unwrap();
        svc.wait_idle().await;

        let svc = service(&root, responder(FilenameSuggestion::Rename("..".to_string())));
        svc.download(DownloadRequest::bytes(b"up".to_vec(), "a.bin"))
            .await
            .unwrap();
        svc.wait_idle().await;

        let outside: Vec<_> = std::fs::read_dir(parent.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(outside, vec![std::ffi::OsString::from("downloads")]);

        let mut inside: Vec<_> = std::fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        inside.sort();
        assert_eq!(inside.len(), 2);
        for path in &inside {
            let name = path.file_name().unwrap().to_string_lossy();
            assert!(name.starts_with("download_"), "{name}");
        }
        let mut saved: Vec<_> = inside.iter().map(|p| std::fs::read(p).unwrap()).collect();
        saved.sort();
        assert_eq!(saved, vec![b"up".to_vec(), b"zip".to_vec()]);
    }

    #[tokio::test]
    async fn malformed_url_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), responder(FilenameSuggestion::KeepDefault));

        let err = svc.download(DownloadRequest::url("::nope::")).await.unwrap_err();
        assert!(matches!(err, Error::DownloadRejected { .. }));
        svc.wait_idle().await;
        assert_eq!(svc.saved_files(), 0);
    }

    #[tokio::test]
    async fn unreachable_url_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), responder(FilenameSuggestion::KeepDefault));

        svc.download(DownloadRequest::url("http://127.0.0.1:9/a.jpg"))
            .await
            .unwrap();
        svc.wait_idle().await;
        assert_eq!(svc.saved_files(), 0);
        assert_eq!(svc.failures(), 1);
    }
}
