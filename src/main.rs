use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use imgdl::cli::Mode;
use imgdl::commands;
use imgdl::message::{DownloadOptions, Message};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Image URLs to download (if provided, tasks-file is ignored)
    #[arg(index = 1)]
    urls: Vec<String>,

    /// Path to the file containing image URLs (one per line)
    #[arg(short = 't', long = "tasks-file", default_value = "download.txt")]
    tasks_file: PathBuf,

    /// JSON `downloadImages` message to replay (overrides URLs and tasks-file)
    #[arg(short = 'm', long)]
    message: Option<PathBuf>,

    /// Directory to save downloaded files
    #[arg(short = 'd', long = "download-dir", default_value = "downloads")]
    download_dir: PathBuf,

    /// Save one ZIP archive or one file per image
    #[arg(long, value_enum, default_value = "auto")]
    mode: Mode,

    /// Page the images were found on; names the site folder
    #[arg(short = 'o', long)]
    origin: Option<String>,

    /// Connection timeout in seconds
    #[arg(long = "connect-timeout", default_value_t = 10)]
    connect_timeout: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = Args::parse();

    // Output dir might not exist yet, so we resolve it relative to current dir
    if args.download_dir.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            args.download_dir = cwd.join(&args.download_dir);
        }
    }

    // Single logical thread: every suspension point is a fetch or a download acknowledgement.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        let message = build_message(&args).await?;
        commands::run_downloads(
            message,
            args.download_dir.clone(),
            Duration::from_secs(args.connect_timeout),
        )
        .await?;
        Ok(())
    })
}

async fn build_message(args: &Args) -> Result<Message> {
    let Message::DownloadImages {
        images_to_download,
        mut options,
    } = if let Some(path) = &args.message {
        commands::load_message(path).await?
    } else {
        let images_to_download = if args.urls.is_empty() {
            commands::read_tasks_file(&args.tasks_file).await?
        } else {
            args.urls.clone()
        };
        Message::DownloadImages {
            images_to_download,
            options: DownloadOptions::default(),
        }
    };

    if images_to_download.is_empty() {
        bail!("No image URLs to download");
    }
    if let Some(origin) = &args.origin {
        options.active_tab_origin = Some(origin.clone());
    }
    args.mode.apply(&mut options);

    Ok(Message::DownloadImages {
        images_to_download,
        options,
    })
}
