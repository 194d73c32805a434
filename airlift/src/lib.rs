//! Airlift engine library
//!
//! A client-side asset synchronization engine: given a local directory tree
//! and a server-declared manifest, it computes the minimal set of filesystem
//! changes (two diff modes, scoped by glob/regex rules) and downloads the
//! missing content from one or more mirror URLs with retry, fallback and a
//! fixed worker pool.

pub mod cache;
pub mod config;
pub mod diff;
pub mod download;
pub mod error;
pub mod hash;
pub mod http;
pub mod manifest;
pub mod matcher;
pub mod progress;
pub mod remote;
pub mod speed;
pub mod updater;

// Re-export main types and functions
pub use cache::VersionCache;
pub use config::{GlobalOptions, ServerList};
pub use diff::{common_mode_diff, once_mode_diff, DiffOptions, Difference, NewFileMeta};
pub use download::{DownloadOptions, DownloadScheduler, DownloadTask};
pub use error::{Result, UpdateError};
pub use manifest::Metadata;
pub use matcher::PathMatcher;
pub use progress::{ProgressChannel, ProgressEvent, ProgressReporter};
pub use remote::{HashAlgorithm, RemoteNode};
pub use speed::SpeedSampler;
pub use updater::{UpdateReport, Updater};

/// Run a full update pass against `update_dir` using `options`.
pub async fn run_update(
    options: GlobalOptions,
    update_dir: impl Into<std::path::PathBuf>,
    reporter: &ProgressReporter,
) -> Result<UpdateReport> {
    let cancel = tokio_util::sync::CancellationToken::new();
    Updater::new(options, update_dir).run(reporter, &cancel).await
}

// Test modules
#[cfg(test)]
mod diff_tests;
