//! Progress reporting for scan and download phases
//!
//! Events flow through an unbounded channel; sends are fire-and-forget and a
//! closed receiver is never an error, so workers can report without caring
//! whether anyone is listening.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Progress event types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    /// Diff scan started; `total_files` is the local file count
    ScanStarted { total_files: u64 },
    /// One local path visited during diffing
    FileScanned { path: String },
    /// Diff pass finished
    DiffCompleted {
        old_files: usize,
        old_folders: usize,
        new_files: usize,
        new_folders: usize,
    },
    /// Download batch started
    BatchStarted { total_files: usize, total_bytes: u64 },
    /// One file's download started
    DownloadStarted { path: String, length: u64 },
    /// One response chunk arrived
    Chunk {
        path: String,
        chunk_bytes: u64,
        received: u64,
        total: u64,
        /// smoothed per-file rate, bytes per sampling period
        file_rate: u64,
        batch_received: u64,
        batch_total: u64,
        /// sum of all active samplers' cached rates
        batch_rate: u64,
    },
    /// A mirror failed and the next one will be tried
    SourceFallback {
        path: String,
        url: String,
        error: String,
    },
    /// One file finished downloading
    DownloadCompleted {
        path: String,
        completed: usize,
        total: usize,
    },
    /// The whole batch finished
    BatchCompleted { files: usize, bytes: u64 },
}

/// Receiving end of the progress stream
pub struct ProgressChannel {
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressChannel {
    /// Create a connected reporter/channel pair.
    pub fn new() -> (ProgressReporter, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ProgressReporter::new(Some(sender)), Self { receiver })
    }

    /// Receive the next progress event.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    /// Receive without blocking.
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Sending end of the progress stream; cheap to clone into workers
#[derive(Clone)]
pub struct ProgressReporter {
    sender: Option<mpsc::UnboundedSender<ProgressEvent>>,
    session_id: Uuid,
}

impl ProgressReporter {
    fn new(sender: Option<mpsc::UnboundedSender<ProgressEvent>>) -> Self {
        Self {
            sender,
            session_id: Uuid::new_v4(),
        }
    }

    /// A reporter that drops every event.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn send(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    pub fn scan_started(&self, total_files: u64) {
        self.send(ProgressEvent::ScanStarted { total_files });
    }

    pub fn file_scanned(&self, path: &Path) {
        self.send(ProgressEvent::FileScanned {
            path: path.display().to_string(),
        });
    }

    pub fn diff_completed(
        &self,
        old_files: usize,
        old_folders: usize,
        new_files: usize,
        new_folders: usize,
    ) {
        self.send(ProgressEvent::DiffCompleted {
            old_files,
            old_folders,
            new_files,
            new_folders,
        });
    }

    pub fn batch_started(&self, total_files: usize, total_bytes: u64) {
        self.send(ProgressEvent::BatchStarted {
            total_files,
            total_bytes,
        });
    }

    pub fn download_started(&self, path: &str, length: u64) {
        self.send(ProgressEvent::DownloadStarted {
            path: path.to_string(),
            length,
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn chunk(
        &self,
        path: &str,
        chunk_bytes: u64,
        received: u64,
        total: u64,
        file_rate: u64,
        batch_received: u64,
        batch_total: u64,
        batch_rate: u64,
    ) {
        self.send(ProgressEvent::Chunk {
            path: path.to_string(),
            chunk_bytes,
            received,
            total,
            file_rate,
            batch_received,
            batch_total,
            batch_rate,
        });
    }

    pub fn source_fallback(&self, path: &str, url: &str, error: &str) {
        self.send(ProgressEvent::SourceFallback {
            path: path.to_string(),
            url: url.to_string(),
            error: error.to_string(),
        });
    }

    pub fn download_completed(&self, path: &str, completed: usize, total: usize) {
        self.send(ProgressEvent::DownloadCompleted {
            path: path.to_string(),
            completed,
            total,
        });
    }

    pub fn batch_completed(&self, files: usize, bytes: u64) {
        self.send(ProgressEvent::BatchCompleted { files, bytes });
    }
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (reporter, mut channel) = ProgressChannel::new();

        reporter.batch_started(2, 100);
        reporter.download_started("a.txt", 60);

        match channel.recv().await.unwrap() {
            ProgressEvent::BatchStarted {
                total_files,
                total_bytes,
            } => {
                assert_eq!(total_files, 2);
                assert_eq!(total_bytes, 100);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        match channel.recv().await.unwrap() {
            ProgressEvent::DownloadStarted { path, length } => {
                assert_eq!(path, "a.txt");
                assert_eq!(length, 60);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_closed_channel_is_silent() {
        let (reporter, channel) = ProgressChannel::new();
        drop(channel);
        // must not panic or error
        reporter.batch_completed(0, 0);
    }

    #[test]
    fn test_disabled_reporter() {
        let reporter = ProgressReporter::disabled();
        reporter.scan_started(10);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }
}
