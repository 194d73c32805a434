//! End-to-end update orchestration
//!
//! One run fetches the server metadata and structure, consults the version
//! cache, diffs both modes against the update directory, applies deletions
//! and folder creations, downloads the new files and finally persists the
//! structure fingerprint.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::cache::VersionCache;
use crate::config::GlobalOptions;
use crate::diff::{common_mode_diff, once_mode_diff, DiffOptions, Difference};
use crate::download::{DownloadOptions, DownloadScheduler, DownloadTask};
use crate::error::{Result, UpdateError};
use crate::http;
use crate::manifest::{self, Metadata};
use crate::progress::ProgressReporter;
use crate::remote::RemoteNode;

/// Summary of one update run
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// The version cache short-circuited the run
    pub up_to_date: bool,
    pub files_deleted: usize,
    pub folders_deleted: usize,
    pub folders_created: usize,
    pub files_downloaded: usize,
    pub bytes_downloaded: u64,
}

impl UpdateReport {
    fn new(session_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            started_at,
            finished_at: started_at,
            up_to_date: false,
            files_deleted: 0,
            folders_deleted: 0,
            folders_created: 0,
            files_downloaded: 0,
            bytes_downloaded: 0,
        }
    }
}

/// Drives a whole update pass against one directory
pub struct Updater {
    options: GlobalOptions,
    update_dir: PathBuf,
}

impl Updater {
    pub fn new(options: GlobalOptions, update_dir: impl Into<PathBuf>) -> Self {
        Self {
            options,
            update_dir: update_dir.into(),
        }
    }

    /// Compute the pending changes without applying anything.
    pub async fn check(&self, reporter: &ProgressReporter) -> Result<Difference> {
        self.options.validate()?;
        let client = http::build_client(self.options.http_connect_timeout)?;
        let (metadata, _raw, remote) = self.fetch_remote(&client).await?;
        self.compute_diff(&metadata, remote, reporter).await
    }

    /// Run the full synchronization pass.
    pub async fn run(
        &self,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<UpdateReport> {
        let started_at = Utc::now();
        let mut report = UpdateReport::new(reporter.session_id(), started_at);

        self.options.validate()?;
        let client = http::build_client(self.options.http_connect_timeout)?;

        info!("fetching server metadata");
        let (metadata, raw_structure, remote) = self.fetch_remote(&client).await?;

        let cache = VersionCache::new(&self.update_dir, &self.options.version_cache);
        if !cache.is_outdated(&raw_structure) {
            info!("structure fingerprint unchanged, nothing to do");
            report.up_to_date = true;
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let diff = self.compute_diff(&metadata, remote, reporter).await?;
        info!(
            "diff complete: {} old files, {} old folders, {} new files, {} new folders",
            diff.old_files.len(),
            diff.old_folders.len(),
            diff.new_files.len(),
            diff.new_folders.len()
        );
        for path in &diff.old_files {
            debug!("old file: {path}");
        }
        for path in &diff.old_folders {
            debug!("old folder: {path}");
        }
        for path in diff.new_files.keys() {
            debug!("new file: {path}");
        }
        for path in &diff.new_folders {
            debug!("new folder: {path}");
        }

        self.apply_deletions(&diff).await?;

        let tasks = self.build_tasks(&diff, &metadata);
        if !tasks.is_empty() {
            info!("downloading {} files", tasks.len());
        }
        let scheduler = DownloadScheduler::new(
            client,
            DownloadOptions {
                threads: self.options.effective_threads(),
                retry_times: self.options.retry_times,
                no_cache: self.options.no_cache.clone(),
                read_timeout_ms: self.options.http_read_timeout,
            },
        );
        scheduler.run(tasks, reporter, cancel).await?;

        cache.store(&raw_structure)?;

        report.files_deleted = diff.old_files.len();
        report.folders_deleted = diff.old_folders.len();
        report.folders_created = diff.new_folders.len();
        report.files_downloaded = diff.new_files.len();
        report.bytes_downloaded = diff.total_new_bytes();
        report.finished_at = Utc::now();
        Ok(report)
    }

    async fn fetch_remote(
        &self,
        client: &reqwest::Client,
    ) -> Result<(Metadata, String, Vec<RemoteNode>)> {
        let servers = self.options.server.urls();
        let no_cache = self.options.no_cache.as_deref();
        let metadata = manifest::fetch_metadata(
            client,
            &servers,
            no_cache,
            self.options.http_read_timeout,
            self.options.retry_times,
        )
        .await?;
        let (raw, remote) = manifest::fetch_structure(
            client,
            &metadata,
            no_cache,
            self.options.http_read_timeout,
            self.options.retry_times,
        )
        .await?;
        Ok((metadata, raw, remote))
    }

    /// Run both diff modes off the async runtime and merge the results.
    async fn compute_diff(
        &self,
        metadata: &Metadata,
        remote: Vec<RemoteNode>,
        reporter: &ProgressReporter,
    ) -> Result<Difference> {
        info!("calculating file differences");
        tokio::fs::create_dir_all(&self.update_dir).await?;
        reporter.scan_started(count_files(&self.update_dir));

        let update_dir = self.update_dir.clone();
        let common_options = DiffOptions {
            patterns: metadata.common_mode.clone(),
            check_modified: self.options.check_modified,
            hash_algorithm: metadata.hash_algorithm,
        };
        let once_options = DiffOptions {
            patterns: metadata.once_mode.clone(),
            check_modified: self.options.check_modified,
            hash_algorithm: metadata.hash_algorithm,
        };
        let scan_reporter = reporter.clone();

        let diff = tokio::task::spawn_blocking(move || -> Result<Difference> {
            let mut on_scan = |path: &Path| scan_reporter.file_scanned(path);
            let mut diff = common_mode_diff(&update_dir, &remote, &common_options, &mut on_scan)?;
            diff += once_mode_diff(&update_dir, &remote, &once_options, &mut on_scan)?;
            Ok(diff)
        })
        .await
        .map_err(|e| UpdateError::Internal(format!("diff task died: {e}")))??;

        reporter.diff_completed(
            diff.old_files.len(),
            diff.old_folders.len(),
            diff.new_files.len(),
            diff.new_folders.len(),
        );
        Ok(diff)
    }

    /// Delete old entries and create the empty new folders.
    async fn apply_deletions(&self, diff: &Difference) -> Result<()> {
        for rel in &diff.old_files {
            let path = self.update_dir.join(rel);
            if path.exists() {
                tokio::fs::remove_file(&path).await?;
            }
        }
        for rel in &diff.old_folders {
            let path = self.update_dir.join(rel);
            if path.exists() {
                tokio::fs::remove_dir_all(&path).await?;
            }
        }
        for rel in &diff.new_folders {
            tokio::fs::create_dir_all(self.update_dir.join(rel)).await?;
        }
        Ok(())
    }

    fn build_tasks(&self, diff: &Difference, metadata: &Metadata) -> Vec<DownloadTask> {
        diff.new_files
            .iter()
            .map(|(rel, meta)| DownloadTask {
                length: meta.length,
                modified: meta.modified,
                urls: metadata
                    .assets_dir_urls
                    .iter()
                    .map(|base| format!("{base}{rel}"))
                    .collect(),
                destination: self.update_dir.join(rel),
                relative_path: rel.clone(),
            })
            .collect()
    }
}

/// Count regular files under a directory, for scan progress totals.
fn count_files(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_count_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), b"b").unwrap();

        assert_eq!(count_files(dir.path()), 2);
    }

    #[test]
    fn test_build_tasks_fan_out_mirrors() {
        let options = GlobalOptions {
            server: crate::config::ServerList::One("http://a/index.json".into()),
            ..GlobalOptions::default()
        };
        let updater = Updater::new(options, "/tmp/update");

        let mut diff = Difference::default();
        diff.new_files.insert(
            "mods/a.jar".into(),
            crate::diff::NewFileMeta {
                length: 10,
                modified: -1,
            },
        );
        let metadata = Metadata {
            common_mode: vec![],
            once_mode: vec![],
            structure_file_urls: vec![],
            assets_dir_urls: vec!["http://a/res/".into(), "http://b/res/".into()],
            hash_algorithm: crate::remote::HashAlgorithm::Sha1,
        };

        let tasks = updater.build_tasks(&diff, &metadata);
        assert_eq!(tasks.len(), 1);
        assert_eq!(
            tasks[0].urls,
            vec!["http://a/res/mods/a.jar", "http://b/res/mods/a.jar"]
        );
        assert!(tasks[0].destination.ends_with("mods/a.jar"));
    }
}
