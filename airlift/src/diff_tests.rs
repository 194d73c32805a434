//! Diff behaviour tests covering both calculators
//!
//! Fixtures build a real temp directory for the local side and an in-memory
//! tree for the remote side, the same shapes the engine sees in production.

use std::fs;
use std::path::Path;

use filetime::FileTime;
use tempfile::TempDir;

use crate::diff::{common_mode_diff, once_mode_diff, DiffOptions, Difference};
use crate::hash::sha1_hex;
use crate::remote::{HashAlgorithm, RemoteNode};

fn dir(name: &str, children: Vec<RemoteNode>) -> RemoteNode {
    RemoteNode::Directory {
        name: name.to_string(),
        children,
    }
}

/// A remote file descriptor whose length and hash mirror `content`.
fn file(name: &str, content: &str) -> RemoteNode {
    RemoteNode::File {
        name: name.to_string(),
        length: content.len() as u64,
        hash: sha1_hex(content.as_bytes()),
        modified: -1,
    }
}

fn file_raw(name: &str, length: u64, hash: &str, modified: i64) -> RemoteNode {
    RemoteNode::File {
        name: name.to_string(),
        length,
        hash: hash.to_string(),
        modified,
    }
}

fn options(patterns: &[&str]) -> DiffOptions {
    DiffOptions {
        patterns: patterns.iter().map(|s| s.to_string()).collect(),
        check_modified: false,
        hash_algorithm: HashAlgorithm::Sha1,
    }
}

fn write_local(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn common(root: &Path, remote: &[RemoteNode], opts: &DiffOptions) -> Difference {
    common_mode_diff(root, remote, opts, |_| {}).unwrap()
}

fn once(root: &Path, remote: &[RemoteNode], opts: &DiffOptions) -> Difference {
    once_mode_diff(root, remote, opts, |_| {}).unwrap()
}

#[test]
fn scenario_a_missing_file_is_downloaded() {
    let root = TempDir::new().unwrap();
    let remote = vec![file_raw("a.txt", 10, "H", 1_700_000_000_000)];

    let diff = common(root.path(), &remote, &options(&["a.txt"]));

    assert_eq!(diff.new_files.len(), 1);
    let meta = &diff.new_files["a.txt"];
    assert_eq!(meta.length, 10);
    assert_eq!(meta.modified, 1_700_000_000_000);
    assert!(diff.old_files.is_empty());
    assert!(diff.old_folders.is_empty());
    assert!(diff.new_folders.is_empty());
}

#[test]
fn scenario_b_local_only_file_is_deleted() {
    let root = TempDir::new().unwrap();
    write_local(root.path(), "old.txt", "stale");

    let diff = common(root.path(), &[], &options(&["*"]));

    assert_eq!(diff.old_files, vec!["old.txt"]);
    assert!(diff.old_folders.is_empty());
    assert!(diff.new_files.is_empty());
    assert!(diff.new_folders.is_empty());
}

#[test]
fn identical_trees_yield_empty_diff() {
    let root = TempDir::new().unwrap();
    write_local(root.path(), "a.txt", "hello");
    write_local(root.path(), "sub/b.txt", "world");
    let remote = vec![
        file("a.txt", "hello"),
        dir("sub", vec![file("b.txt", "world")]),
    ];

    let diff = common(root.path(), &remote, &options(&["*"]));

    assert!(diff.is_empty());
}

#[test]
fn out_of_scope_rules_yield_empty_diff() {
    // the trees disagree everywhere, but nothing is in scope
    let root = TempDir::new().unwrap();
    write_local(root.path(), "extra.txt", "local only");
    write_local(root.path(), "stale.bin", "old bytes");
    let remote = vec![file("stale.bin", "new bytes"), file("missing.txt", "x")];

    let diff = common(root.path(), &remote, &options(&["does-not-exist.xyz"]));

    assert!(diff.is_empty());
}

#[test]
fn type_mismatch_forces_replace() {
    // remote declares a/b as a file, locally a/b is a directory
    let root = TempDir::new().unwrap();
    write_local(root.path(), "a/b/c.txt", "nested");
    let remote = vec![dir("a", vec![file("b", "file content")])];

    let diff = common(root.path(), &remote, &options(&["*"]));

    assert!(diff.old_files.contains(&"a/b/c.txt".to_string()));
    assert!(diff.old_folders.contains(&"a/b".to_string()));
    assert!(diff.new_files.contains_key("a/b"));
}

#[test]
fn modified_file_is_marked_old_and_new() {
    let root = TempDir::new().unwrap();
    write_local(root.path(), "mods/core.jar", "version 1");
    let remote = vec![dir("mods", vec![file("core.jar", "version 2")])];

    let diff = common(root.path(), &remote, &options(&["*"]));

    // stale content is expressed as delete-then-redownload
    assert_eq!(diff.old_files, vec!["mods/core.jar"]);
    assert!(diff.new_files.contains_key("mods/core.jar"));
    assert!(diff.old_folders.is_empty());
}

#[test]
fn once_mode_never_deletes_or_overwrites() {
    let root = TempDir::new().unwrap();
    write_local(root.path(), "junk.txt", "local only");
    write_local(root.path(), "cfg.yml", "user edited");
    let remote = vec![file("cfg.yml", "server default")];

    let diff = once(root.path(), &remote, &options(&["*"]));

    assert!(diff.old_files.is_empty());
    assert!(diff.old_folders.is_empty());
    assert!(diff.new_files.is_empty());
    assert!(diff.new_folders.is_empty());
}

#[test]
fn scenario_c_once_mode_preserves_existing_file() {
    let root = TempDir::new().unwrap();
    write_local(root.path(), "cfg.yml", "user edited");
    let remote = vec![file("cfg.yml", "completely different")];

    let diff = once(root.path(), &remote, &options(&["cfg.yml"]));

    assert!(diff.is_empty());
}

#[test]
fn once_mode_ignores_type_mismatch() {
    let root = TempDir::new().unwrap();
    fs::create_dir(root.path().join("cfg")).unwrap();
    let remote = vec![file("cfg", "a file remotely")];

    let diff = once(root.path(), &remote, &options(&["*"]));

    assert!(diff.is_empty());
}

#[test]
fn once_mode_fills_in_missing_entries_only() {
    let root = TempDir::new().unwrap();
    write_local(root.path(), "settings/a.yml", "mine");
    let remote = vec![dir(
        "settings",
        vec![file("a.yml", "server version"), file("b.yml", "default")],
    )];

    let diff = once(root.path(), &remote, &options(&["*"]));

    assert_eq!(diff.new_files.len(), 1);
    assert!(diff.new_files.contains_key("settings/b.yml"));
    assert!(diff.old_files.is_empty());
    assert!(diff.new_folders.is_empty());
}

#[test]
fn once_mode_downloads_missing_subtree() {
    let root = TempDir::new().unwrap();
    let remote = vec![dir(
        "defaults",
        vec![file("a.yml", "a"), file("b.yml", "b")],
    )];

    let diff = once(root.path(), &remote, &options(&["defaults/**"]));

    assert_eq!(diff.new_folders, vec!["defaults"]);
    assert_eq!(diff.new_files.len(), 2);
    assert!(diff.new_files.contains_key("defaults/a.yml"));
    assert!(diff.new_files.contains_key("defaults/b.yml"));
}

#[test]
fn merge_is_union_for_disjoint_rule_sets() {
    let root = TempDir::new().unwrap();
    write_local(root.path(), "gone.txt", "local only");
    let remote = vec![file("common.txt", "c"), file("once.txt", "o")];

    let mut merged = common(root.path(), &remote, &options(&["common.txt", "gone.txt"]));
    merged += once(root.path(), &remote, &options(&["once.txt"]));

    assert!(merged.new_files.contains_key("common.txt"));
    assert!(merged.new_files.contains_key("once.txt"));
    assert_eq!(merged.old_files, vec!["gone.txt"]);
}

#[test]
fn indirect_match_only_creates_path_folders() {
    let root = TempDir::new().unwrap();
    let remote = vec![dir("wrap", vec![file("inner.txt", "payload")])];

    // the rule names the descendant, not the directory
    let diff = common(root.path(), &remote, &options(&["wrap/inner.txt"]));

    assert_eq!(diff.new_folders, vec!["wrap"]);
    assert_eq!(diff.new_files.len(), 1);
    assert!(diff.new_files.contains_key("wrap/inner.txt"));
    assert!(diff.old_files.is_empty());
}

#[test]
fn indirect_match_recurses_without_touching_existing_directory() {
    let root = TempDir::new().unwrap();
    write_local(root.path(), "wrap/inner.txt", "stale");
    let remote = vec![dir("wrap", vec![file("inner.txt", "fresh")])];

    let diff = common(root.path(), &remote, &options(&["wrap/inner.txt"]));

    // the directory itself matches only indirectly and stays untouched
    assert!(diff.new_folders.is_empty());
    assert!(diff.old_folders.is_empty());
    assert_eq!(diff.old_files, vec!["wrap/inner.txt"]);
    assert!(diff.new_files.contains_key("wrap/inner.txt"));
}

#[test]
fn scenario_e_mtime_shortcut_wins_over_hashing() {
    let root = TempDir::new().unwrap();
    write_local(root.path(), "a.txt", "local content");
    let local_path = root.path().join("a.txt");
    filetime::set_file_mtime(&local_path, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();

    // hash differs, but the mtimes are 3 seconds apart
    let remote = vec![file_raw(
        "a.txt",
        13,
        &sha1_hex(b"something else"),
        1_700_000_003_000,
    )];
    let opts = DiffOptions {
        check_modified: true,
        ..options(&["a.txt"])
    };

    let diff = common(root.path(), &remote, &opts);

    assert!(diff.is_empty());
}

#[test]
fn matching_hash_restamps_local_mtime() {
    let root = TempDir::new().unwrap();
    write_local(root.path(), "a.txt", "hello");
    let local_path = root.path().join("a.txt");
    filetime::set_file_mtime(&local_path, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();

    // same content, but the mtimes are far apart: hash check passes and the
    // local mtime is aligned to the server's for future fast-path runs
    let remote = vec![file_raw("a.txt", 5, &sha1_hex(b"hello"), 1_600_000_000_000)];
    let opts = DiffOptions {
        check_modified: true,
        ..options(&["a.txt"])
    };

    let diff = common(root.path(), &remote, &opts);

    assert!(diff.is_empty());
    let metadata = fs::metadata(&local_path).unwrap();
    let mtime = FileTime::from_last_modification_time(&metadata);
    assert_eq!(mtime.unix_seconds(), 1_600_000_000);
}

#[test]
fn regex_rules_scope_the_walk() {
    let root = TempDir::new().unwrap();
    write_local(root.path(), "mods/old.jar", "x");
    write_local(root.path(), "notes.txt", "keep me");
    let remote = vec![dir("mods", vec![file("new.jar", "y")])];

    let diff = common(root.path(), &remote, &options(&["@mods/.+\\.jar"]));

    assert_eq!(diff.old_files, vec!["mods/old.jar"]);
    assert!(diff.new_files.contains_key("mods/new.jar"));
    // notes.txt is out of scope and untouched
    assert!(!diff.old_files.contains(&"notes.txt".to_string()));
}
