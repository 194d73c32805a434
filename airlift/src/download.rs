//! Concurrent multi-source download pipeline
//!
//! A fixed pool of worker tasks drains a shared queue. Each file is tried
//! against its mirror URLs in order, with a fixed-delay retry loop per URL
//! nested inside the fallback loop. Batch counters live under a single lock
//! so the derived percentages stay consistent across workers.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::diff::file_time_from_millis;
use crate::error::{Result, UpdateError};
use crate::hash::buffer_size_for;
use crate::http;
use crate::progress::ProgressReporter;
use crate::speed::SpeedSampler;

/// Per-file sampling window and first-sample backdate, in milliseconds.
const SAMPLING_PERIOD_MS: u64 = 3000;

/// One file to fetch, with its fallback mirrors in priority order
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Expected file length in bytes
    pub length: u64,
    /// Server-declared mtime in ms, -1 when unknown
    pub modified: i64,
    /// Candidate URLs; the first is primary, the rest are fallbacks
    pub urls: Vec<String>,
    pub destination: PathBuf,
    /// Path relative to the update root, used in progress events
    pub relative_path: String,
}

/// Scheduler tunables, usually derived from [`crate::GlobalOptions`]
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Worker task count
    pub threads: usize,
    /// Attempts per URL before moving to the next mirror
    pub retry_times: u32,
    /// Cache-busting query parameter name
    pub no_cache: Option<String>,
    /// Per-chunk read timeout in milliseconds
    pub read_timeout_ms: u64,
}

/// Batch counters shared by every worker.
///
/// Grouped under one lock rather than scattered atomics so that percentages
/// derived from several fields never mix states.
#[derive(Default)]
struct BatchCounters {
    total_bytes_downloaded: u64,
    downloaded_count: usize,
    samplers: Vec<Arc<Mutex<SpeedSampler>>>,
}

struct BatchState {
    queue: Mutex<VecDeque<DownloadTask>>,
    counters: Mutex<BatchCounters>,
    first_error: Mutex<Option<UpdateError>>,
    total_files: usize,
    total_bytes: u64,
}

/// Worker-pool downloader for the `new_files` half of a diff
pub struct DownloadScheduler {
    client: Client,
    options: DownloadOptions,
}

impl DownloadScheduler {
    pub fn new(client: Client, options: DownloadOptions) -> Self {
        Self { client, options }
    }

    /// Drain every task and return once all workers have exited.
    ///
    /// The first non-cancellation failure cancels the siblings and is
    /// returned to the caller; an externally cancelled batch returns
    /// [`UpdateError::Cancelled`].
    pub async fn run(
        &self,
        tasks: Vec<DownloadTask>,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let total_files = tasks.len();
        let total_bytes = tasks.iter().map(|t| t.length).sum();
        reporter.batch_started(total_files, total_bytes);

        let state = Arc::new(BatchState {
            queue: Mutex::new(tasks.into()),
            counters: Mutex::new(BatchCounters::default()),
            first_error: Mutex::new(None),
            total_files,
            total_bytes,
        });

        let workers = self.options.threads.max(1).min(total_files);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let worker = Worker {
                client: self.client.clone(),
                options: self.options.clone(),
                state: Arc::clone(&state),
                reporter: reporter.clone(),
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                let mut slot = state.first_error.lock();
                if slot.is_none() {
                    *slot = Some(UpdateError::Internal(format!("download worker died: {e}")));
                }
            }
        }

        if let Some(error) = state.first_error.lock().take() {
            return Err(error);
        }
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }

        let (files, bytes) = {
            let counters = state.counters.lock();
            (counters.downloaded_count, counters.total_bytes_downloaded)
        };
        reporter.batch_completed(files, bytes);
        Ok(())
    }
}

struct Worker {
    client: Client,
    options: DownloadOptions,
    state: Arc<BatchState>,
    reporter: ProgressReporter,
    cancel: CancellationToken,
}

impl Worker {
    /// Pop-download-repeat until the queue is empty or the batch dies.
    async fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let task = self.state.queue.lock().pop_front();
            let Some(task) = task else { break };

            match self.download_one(&task).await {
                Ok(()) => {}
                // cancellation is a clean early exit, not a reportable error
                Err(UpdateError::Cancelled) => break,
                Err(e) => {
                    let mut slot = self.state.first_error.lock();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                    drop(slot);
                    self.cancel.cancel();
                    break;
                }
            }
        }
    }

    async fn download_one(&self, task: &DownloadTask) -> Result<()> {
        let sampler = Arc::new(Mutex::new(SpeedSampler::new(
            SAMPLING_PERIOD_MS,
            SAMPLING_PERIOD_MS,
        )));
        self.state.counters.lock().samplers.push(Arc::clone(&sampler));

        debug!(
            "request {} ({} candidate urls) -> {}",
            task.relative_path,
            task.urls.len(),
            task.destination.display()
        );
        self.reporter.download_started(&task.relative_path, task.length);

        let outcome = self.fetch_with_fallback(task, &sampler).await;

        let completed = {
            let mut counters = self.state.counters.lock();
            counters.samplers.retain(|s| !Arc::ptr_eq(s, &sampler));
            if outcome.is_ok() {
                counters.downloaded_count += 1;
            }
            counters.downloaded_count
        };

        if outcome.is_ok() {
            self.reporter
                .download_completed(&task.relative_path, completed, self.state.total_files);
        }
        outcome
    }

    /// Outer loop over mirror URLs; transport and status failures fall
    /// through to the next URL, anything else aborts the file.
    async fn fetch_with_fallback(
        &self,
        task: &DownloadTask,
        sampler: &Arc<Mutex<SpeedSampler>>,
    ) -> Result<()> {
        let mut last_error = None;

        for url in &task.urls {
            match self.fetch_with_retries(url, task, sampler).await {
                Ok(()) => {
                    if task.modified != -1 {
                        filetime::set_file_mtime(
                            &task.destination,
                            file_time_from_millis(task.modified),
                        )?;
                    }
                    return Ok(());
                }
                Err(e) if e.is_fallback_worthy() => {
                    warn!("source failed for {}: {e}", task.relative_path);
                    self.reporter
                        .source_fallback(&task.relative_path, url, &e.to_string());
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| UpdateError::Config("no download sources configured".into())))
    }

    /// Inner loop: fixed-delay retries against a single URL.
    async fn fetch_with_retries(
        &self,
        url: &str,
        task: &DownloadTask,
        sampler: &Arc<Mutex<SpeedSampler>>,
    ) -> Result<()> {
        let attempts = self.options.retry_times.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.fetch_once(url, task, sampler).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!("{e}; retrying ({attempt}/{attempts})");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(UpdateError::Cancelled),
                        _ = tokio::time::sleep(http::RETRY_DELAY) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(
        &self,
        url: &str,
        task: &DownloadTask,
        sampler: &Arc<Mutex<SpeedSampler>>,
    ) -> Result<()> {
        let link = http::apply_no_cache(url, self.options.no_cache.as_deref())?;

        if let Some(parent) = task.destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut received: u64 = 0;
        let result = self.stream_to_file(&link, task, sampler, &mut received).await;
        if result.is_err() {
            // roll the abandoned bytes back out of the aggregate so a retry
            // or fallback does not double-count them
            self.state.counters.lock().total_bytes_downloaded -= received;
        }
        result
    }

    async fn stream_to_file(
        &self,
        link: &str,
        task: &DownloadTask,
        sampler: &Arc<Mutex<SpeedSampler>>,
        received: &mut u64,
    ) -> Result<()> {
        let read_timeout = Duration::from_millis(self.options.read_timeout_ms);

        // waiting for response headers obeys the same timeout and
        // cancellation rules as every later chunk read
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(UpdateError::Cancelled),
            sent = tokio::time::timeout(read_timeout, self.client.get(link).send()) => match sent {
                Err(_) => {
                    return Err(UpdateError::ConnectionTimeout {
                        url: link.to_string(),
                        message: format!("no response within {}ms", self.options.read_timeout_ms),
                    })
                }
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(UpdateError::from_reqwest(link, e)),
            }
        };
        let response = http::ensure_success(link, response).await?;

        let file = tokio::fs::File::create(&task.destination).await?;
        let mut writer =
            tokio::io::BufWriter::with_capacity(buffer_size_for(task.length), file);
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Err(UpdateError::Cancelled),
                next = tokio::time::timeout(read_timeout, stream.next()) => match next {
                    Err(_) => {
                        return Err(UpdateError::ConnectionTimeout {
                            url: link.to_string(),
                            message: format!(
                                "no data within {}ms",
                                self.options.read_timeout_ms
                            ),
                        })
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => return Err(UpdateError::from_reqwest(link, e)),
                    Ok(Some(Ok(bytes))) => bytes,
                }
            };

            writer.write_all(&chunk).await?;
            let len = chunk.len() as u64;
            *received += len;

            let (batch_received, batch_rate) = {
                let mut counters = self.state.counters.lock();
                counters.total_bytes_downloaded += len;
                sampler.lock().sample(len);
                let rate: u64 = counters.samplers.iter().map(|s| s.lock().speed()).sum();
                (counters.total_bytes_downloaded, rate)
            };
            let file_rate = sampler.lock().speed();

            self.reporter.chunk(
                &task.relative_path,
                len,
                *received,
                task.length,
                file_rate,
                batch_received,
                self.state.total_bytes,
                batch_rate,
            );
        }

        writer.flush().await?;
        Ok(())
    }
}
