use std::path::PathBuf;
use std::time::{Duration, Instant};

use airlift::progress::format_bytes;
use airlift::{GlobalOptions, ProgressChannel, ProgressEvent, Updater};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "airlift")]
#[command(about = "Mirror-based asset synchronization")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full synchronization pass
    Sync {
        /// Directory to update (defaults to the current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Compute and print the pending changes without applying them
    Check {
        /// Directory to update (defaults to the current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let options = GlobalOptions::load(&cli.config)
        .with_context(|| format!("failed to load '{}'", cli.config.display()))?;

    match cli.command {
        Commands::Sync { dir } => sync(options, dir).await,
        Commands::Check { dir } => check(options, dir).await,
    }
}

async fn sync(options: GlobalOptions, dir: Option<PathBuf>) -> Result<()> {
    let update_dir = resolve_update_dir(&options, dir)?;
    info!("updating directory: {}", update_dir.display());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping workers");
                cancel.cancel();
            }
        });
    }

    let (reporter, channel) = ProgressChannel::new();
    let logger = tokio::spawn(render_progress(channel));

    let updater = Updater::new(options, update_dir);
    let report = updater.run(&reporter, &cancel).await?;

    drop(reporter);
    let _ = logger.await;

    if report.up_to_date {
        println!("Everything is already up to date.");
    } else {
        println!(
            "Updated {} files ({}), deleted {} files and {} folders in {:.1}s",
            report.files_downloaded,
            format_bytes(report.bytes_downloaded),
            report.files_deleted,
            report.folders_deleted,
            (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0
        );
    }
    Ok(())
}

async fn check(options: GlobalOptions, dir: Option<PathBuf>) -> Result<()> {
    let update_dir = resolve_update_dir(&options, dir)?;

    let (reporter, channel) = ProgressChannel::new();
    let logger = tokio::spawn(render_progress(channel));

    let updater = Updater::new(options, update_dir);
    let diff = updater.check(&reporter).await?;

    drop(reporter);
    let _ = logger.await;

    if diff.is_empty() {
        println!("Everything is already up to date.");
        return Ok(());
    }
    for path in &diff.old_files {
        println!("delete file:   {path}");
    }
    for path in &diff.old_folders {
        println!("delete folder: {path}");
    }
    for path in &diff.new_folders {
        println!("create folder: {path}");
    }
    for (path, meta) in &diff.new_files {
        println!("download:      {path} ({})", format_bytes(meta.length));
    }
    println!(
        "{} files to download ({})",
        diff.new_files.len(),
        format_bytes(diff.total_new_bytes())
    );
    Ok(())
}

fn resolve_update_dir(options: &GlobalOptions, dir: Option<PathBuf>) -> Result<PathBuf> {
    let base = match dir {
        Some(dir) => dir,
        None => std::env::current_dir().context("cannot determine the working directory")?,
    };
    Ok(if options.base_path.is_empty() {
        base
    } else {
        base.join(&options.base_path)
    })
}

/// Render progress events as log lines, throttling the chunk stream.
async fn render_progress(mut channel: ProgressChannel) {
    let mut last_render = Instant::now() - Duration::from_secs(1);

    while let Some(event) = channel.recv().await {
        match event {
            ProgressEvent::ScanStarted { total_files } => {
                info!("checking {total_files} local files");
            }
            ProgressEvent::DiffCompleted {
                old_files,
                old_folders,
                new_files,
                new_folders,
            } => {
                info!(
                    "diff: {old_files} old files, {old_folders} old folders, \
                     {new_files} new files, {new_folders} new folders"
                );
            }
            ProgressEvent::Chunk {
                path,
                received,
                total,
                batch_received,
                batch_total,
                batch_rate,
                ..
            } => {
                if last_render.elapsed() < Duration::from_millis(400) {
                    continue;
                }
                last_render = Instant::now();
                let file_percent = received as f64 / total.max(1) as f64 * 100.0;
                let batch_percent = batch_received as f64 / batch_total.max(1) as f64 * 100.0;
                info!(
                    "{path}: {file_percent:.1}%  total {batch_percent:.1}%  {}/s",
                    format_bytes(batch_rate)
                );
            }
            ProgressEvent::SourceFallback { path, url, error } => {
                warn!("{path}: {url} failed ({error}), trying next source");
            }
            ProgressEvent::DownloadCompleted {
                path,
                completed,
                total,
            } => {
                info!("downloaded ({completed}/{total}): {path}");
            }
            ProgressEvent::BatchCompleted { files, bytes } => {
                info!("downloaded {files} files, {}", format_bytes(bytes));
            }
            _ => {}
        }
    }
}
