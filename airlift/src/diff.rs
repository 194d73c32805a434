//! Tree difference calculation between a local directory and the remote tree
//!
//! Two modes exist. Common mode is a full two-way comparison: in-scope files
//! that differ from the remote are replaced and in-scope local files with no
//! remote counterpart are deleted. Once mode only fills in paths that do not
//! exist locally yet; it never deletes and never touches an existing path.
//!
//! A directory participates either directly (it matches a rule itself, which
//! puts its whole subtree in scope) or indirectly (some descendant file
//! matches, which only permits recursion). Both walks are synchronous
//! blocking filesystem work; async callers should wrap them in
//! `tokio::task::spawn_blocking`.

use std::collections::HashMap;
use std::fs;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, UpdateError};
use crate::hash;
use crate::matcher::PathMatcher;
use crate::remote::{HashAlgorithm, RemoteNode};

/// Local/remote mtimes within this window count as unmodified.
///
/// The tolerance absorbs mtime-resolution differences across filesystems.
const MTIME_TOLERANCE_MS: i64 = 5000;

/// Expected metadata for a file that needs downloading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFileMeta {
    pub length: u64,
    /// Milliseconds since the epoch, -1 when the server did not declare one
    pub modified: i64,
}

/// Filesystem mutations computed by a diff pass
///
/// Paths are `/`-separated and relative to the update root. A path present
/// in both `old_files` and `new_files` is a stale file that gets deleted and
/// re-downloaded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Difference {
    /// Directories to delete; their files are already listed in `old_files`
    pub old_folders: Vec<String>,
    pub old_files: Vec<String>,
    /// Directories to create empty
    pub new_folders: Vec<String>,
    pub new_files: HashMap<String, NewFileMeta>,
}

impl Difference {
    pub fn is_empty(&self) -> bool {
        self.old_folders.is_empty()
            && self.old_files.is_empty()
            && self.new_folders.is_empty()
            && self.new_files.is_empty()
    }

    /// Total bytes the download phase is expected to transfer.
    pub fn total_new_bytes(&self) -> u64 {
        self.new_files.values().map(|meta| meta.length).sum()
    }
}

impl AddAssign for Difference {
    /// Merging concatenates the delete lists and unions the download map.
    fn add_assign(&mut self, other: Difference) {
        self.old_folders.extend(other.old_folders);
        self.old_files.extend(other.old_files);
        self.new_folders.extend(other.new_folders);
        self.new_files.extend(other.new_files);
    }
}

/// Options shared by both diff modes
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Glob rules, or regexes when prefixed with `@`
    pub patterns: Vec<String>,
    /// Trust close mtimes instead of hashing every candidate
    pub check_modified: bool,
    pub hash_algorithm: HashAlgorithm,
}

/// Full two-way comparison restricted to the configured rule set.
pub fn common_mode_diff(
    local_root: &Path,
    remote: &[RemoteNode],
    options: &DiffOptions,
    mut on_scan: impl FnMut(&Path),
) -> Result<Difference> {
    let mut walk = DiffWalk::new(options)?;
    walk.find_new_common(local_root, remote, "", &mut on_scan)?;
    walk.find_old(local_root, remote, "", &mut on_scan)?;
    Ok(walk.result)
}

/// Additive-only comparison: create what is missing, never touch the rest.
pub fn once_mode_diff(
    local_root: &Path,
    remote: &[RemoteNode],
    options: &DiffOptions,
    mut on_scan: impl FnMut(&Path),
) -> Result<Difference> {
    let mut walk = DiffWalk::new(options)?;
    walk.find_new_once(local_root, remote, "", &mut on_scan)?;
    Ok(walk.result)
}

struct DiffWalk<'a> {
    options: &'a DiffOptions,
    matcher: PathMatcher,
    result: Difference,
}

impl<'a> DiffWalk<'a> {
    fn new(options: &'a DiffOptions) -> Result<Self> {
        Ok(Self {
            matcher: PathMatcher::new(&options.patterns)?,
            options,
            result: Difference::default(),
        })
    }

    /// Walk the remote tree looking for files to create or replace.
    fn find_new_common(
        &mut self,
        local_dir: &Path,
        remote: &[RemoteNode],
        rel: &str,
        on_scan: &mut dyn FnMut(&Path),
    ) -> Result<()> {
        for node in remote {
            // may not exist locally
            let local = local_dir.join(node.name());
            let child_rel = join_rel(rel, node.name());
            let direct = self.matcher.matches(&child_rel)?;
            let indirect = self.indirect_matches_remote(node, rel)?;

            debug!("N: {} {}", match_flag(direct, indirect), child_rel);
            on_scan(&local);

            if !direct && !indirect {
                continue;
            }

            if local.exists() {
                match node {
                    RemoteNode::Directory { children, .. } => {
                        if local.is_file() {
                            // a file cannot become a directory in place
                            self.mark_as_old(&local, &child_rel)?;
                            self.mark_as_new(node, &child_rel);
                        } else {
                            self.find_new_common(&local, children, &child_rel, on_scan)?;
                        }
                    }
                    RemoteNode::File { hash, modified, .. } => {
                        if local.is_file() {
                            self.compare_single_file(&local, node, hash, *modified, &child_rel)?;
                        } else {
                            self.mark_as_old(&local, &child_rel)?;
                            self.mark_as_new(node, &child_rel);
                        }
                    }
                }
            } else {
                debug!("missing locally, schedule download: {}", child_rel);
                self.mark_as_new(node, &child_rel);
            }
        }
        Ok(())
    }

    /// Compare two files at the same path and record a replace on mismatch.
    fn compare_single_file(
        &mut self,
        local: &Path,
        node: &RemoteNode,
        remote_hash: &str,
        remote_modified: i64,
        rel: &str,
    ) -> Result<()> {
        let mut up_to_date = false;

        if self.options.check_modified {
            let local_modified = mtime_millis(local)?;
            up_to_date = (local_modified - remote_modified).abs() < MTIME_TOLERANCE_MS;
        }

        if !up_to_date {
            let local_hash = hash::hash_file(local, self.options.hash_algorithm)?;
            if local_hash != remote_hash {
                debug!(
                    "hash mismatch at {}: local {} remote {}",
                    rel, local_hash, remote_hash
                );
                self.mark_as_old(local, rel)?;
                self.mark_as_new(node, rel);
            } else if self.options.check_modified && remote_modified != -1 {
                // stamp the server mtime so the next run takes the fast path
                filetime::set_file_mtime(local, file_time_from_millis(remote_modified))?;
            }
        }
        Ok(())
    }

    /// Sweep the local tree for in-scope entries with no remote counterpart.
    ///
    /// Required because the first pass only visits nodes present in the
    /// remote tree; local-only files are invisible to it.
    fn find_old(
        &mut self,
        local_dir: &Path,
        remote: &[RemoteNode],
        rel: &str,
        on_scan: &mut dyn FnMut(&Path),
    ) -> Result<()> {
        for (name, local) in list_dir(local_dir)? {
            let child_rel = join_rel(rel, &name);
            let node = remote.iter().find(|n| n.name() == name);
            let direct = self.matcher.matches(&child_rel)?;
            let indirect = self.indirect_matches_local(&local, &child_rel)?;

            debug!("O: {} {}", match_flag(direct, indirect), child_rel);
            on_scan(&local);

            if direct {
                match node {
                    Some(RemoteNode::Directory { children, .. }) if local.is_dir() => {
                        self.find_old(&local, children, &child_rel, on_scan)?;
                    }
                    Some(_) => {}
                    None => self.mark_as_old(&local, &child_rel)?,
                }
            } else if indirect {
                // only a directory can match indirectly; without a remote
                // counterpart there is nothing to compare against
                if let Some(RemoteNode::Directory { children, .. }) = node {
                    self.find_old(&local, children, &child_rel, on_scan)?;
                }
            }
        }
        Ok(())
    }

    /// Walk the remote tree creating only what does not exist locally.
    fn find_new_once(
        &mut self,
        local_dir: &Path,
        remote: &[RemoteNode],
        rel: &str,
        on_scan: &mut dyn FnMut(&Path),
    ) -> Result<()> {
        for node in remote {
            let local = local_dir.join(node.name());
            let child_rel = join_rel(rel, node.name());
            let direct = self.matcher.matches(&child_rel)?;
            let indirect = self.indirect_matches_remote(node, rel)?;

            debug!("N: {} {}", match_flag(direct, indirect), child_rel);
            on_scan(&local);

            if !direct && !indirect {
                continue;
            }

            if local.exists() {
                // an existing path is never touched in once mode, whatever
                // its type or content
                if let RemoteNode::Directory { children, .. } = node {
                    if local.is_dir() {
                        self.find_new_once(&local, children, &child_rel, on_scan)?;
                    }
                }
            } else {
                self.mark_as_new(node, &child_rel);
            }
        }
        Ok(())
    }

    /// Record a local entry (recursively, for directories) for deletion.
    fn mark_as_old(&mut self, path: &Path, rel: &str) -> Result<()> {
        if path.is_dir() {
            for (name, child) in list_dir(path)? {
                let child_rel = join_rel(rel, &name);
                if child.is_dir() {
                    self.mark_as_old(&child, &child_rel)?;
                } else {
                    self.result.old_files.push(child_rel);
                }
            }
            self.result.old_folders.push(rel.to_string());
        } else {
            self.result.old_files.push(rel.to_string());
        }
        Ok(())
    }

    /// Record a remote subtree for creation.
    fn mark_as_new(&mut self, node: &RemoteNode, rel: &str) {
        match node {
            RemoteNode::Directory { children, .. } => {
                self.result.new_folders.push(rel.to_string());
                for child in children {
                    self.mark_as_new(child, &join_rel(rel, child.name()));
                }
            }
            RemoteNode::File {
                length, modified, ..
            } => {
                self.result.new_files.insert(
                    rel.to_string(),
                    NewFileMeta {
                        length: *length,
                        modified: *modified,
                    },
                );
            }
        }
    }

    /// Whether some descendant file of a remote node matches the rules.
    fn indirect_matches_remote(&self, node: &RemoteNode, parent_rel: &str) -> Result<bool> {
        let path = join_rel(parent_rel, node.name());
        match node {
            RemoteNode::Directory { children, .. } => {
                for child in children {
                    if self.indirect_matches_remote(child, &path)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            RemoteNode::File { .. } => self.matcher.matches(&path),
        }
    }

    /// Whether some descendant file of a local entry matches the rules.
    fn indirect_matches_local(&self, path: &Path, rel: &str) -> Result<bool> {
        if path.is_dir() {
            for (name, child) in list_dir(path)? {
                if self.indirect_matches_local(&child, &join_rel(rel, &name))? {
                    return Ok(true);
                }
            }
            Ok(false)
        } else {
            self.matcher.matches(rel)
        }
    }
}

fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn match_flag(direct: bool, indirect: bool) -> char {
    if direct {
        '+'
    } else if indirect {
        '-'
    } else {
        ' '
    }
}

/// List a directory's entries sorted by name for a stable visit order.
fn list_dir(path: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries =
        fs::read_dir(path).map_err(|e| UpdateError::scan_error(path, e.to_string()))?;
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| UpdateError::scan_error(path, e.to_string()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        out.push((name, entry.path()));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

fn mtime_millis(path: &Path) -> Result<i64> {
    let metadata =
        fs::metadata(path).map_err(|e| UpdateError::scan_error(path, e.to_string()))?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    Ok(mtime.unix_seconds() * 1000 + i64::from(mtime.nanoseconds()) / 1_000_000)
}

pub(crate) fn file_time_from_millis(millis: i64) -> FileTime {
    FileTime::from_unix_time(millis / 1000, ((millis % 1000) * 1_000_000) as u32)
}
