use anyhow::{bail, Context, Result};
use indicatif::HumanBytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::downloader::{spinner, LocalDownloadService};
use crate::fetcher::{build_client, HttpFetcher};
use crate::host::HostEvent;
use crate::message::Message;
use crate::orchestrator::{BatchReport, Orchestrator};

/// Image URLs from a list file, one per line. Blank lines and `#` comments are skipped.
pub async fn read_tasks_file(input: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(input)
        .await
        .context(format!("Failed to open input file: {:?}", input))?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let mut urls = vec![];
    while let Some(line) = lines.next_line().await? {
        let raw = line.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        urls.push(raw.to_string());
    }
    Ok(urls)
}

pub async fn load_message(path: &Path) -> Result<Message> {
    let raw = fs::read_to_string(path)
        .await
        .context(format!("Failed to read message file: {:?}", path))?;
    match Message::parse(&raw)? {
        Some(message) => Ok(message),
        None => bail!("{:?} is not a downloadImages message", path),
    }
}

/// Runs one batch against the local download directory and waits until every
/// file has been written.
pub async fn run_downloads(
    message: Message,
    output: PathBuf,
    connect_timeout: Duration,
) -> Result<BatchReport> {
    if !output.exists() {
        fs::create_dir_all(&output)
            .await
            .context("Failed to create output directory")?;
    }

    let client = build_client(connect_timeout);
    let (events, rx) = mpsc::channel(64);
    let service = Arc::new(LocalDownloadService::new(
        client.clone(),
        output.clone(),
        events.clone(),
        spinner(),
    ));
    let orchestrator = Orchestrator::new(HttpFetcher::new(client), service.clone());
    let runner = tokio::spawn(orchestrator.run(rx));

    let (ack, done) = oneshot::channel();
    events
        .send(HostEvent::DownloadImages {
            message,
            ack: Some(ack),
        })
        .await
        .context("Orchestrator is not running")?;
    let report = done
        .await
        .context("Orchestrator stopped before acknowledging the batch")?;

    service.wait_idle().await;
    runner.abort();

    info!(output = %output.display(), "All downloads settled");
    println!(
        "Summary: Images: {}/{} | Failed: {} | Saved: {} files, {}",
        report.placed,
        report.total,
        report.failed + service.failures(),
        service.saved_files(),
        HumanBytes(service.saved_bytes())
    );
    if let Some(archive) = &report.archive {
        println!("Archive: {}", output.join(archive).display());
    }
    Ok(report)
}
