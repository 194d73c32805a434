//! In-memory model of the server-declared file tree
//!
//! The tree arrives as a JSON array of nodes; a node with a `children` field
//! is a directory, anything else is a file descriptor. The parsed tree is
//! never mutated.

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};

/// Hash algorithms a server manifest can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Sha1,
    Md5,
    Crc32,
}

impl HashAlgorithm {
    /// Parse the manifest spelling; unknown values return `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sha1" => Some(Self::Sha1),
            "md5" => Some(Self::Md5),
            "crc32" => Some(Self::Crc32),
            _ => None,
        }
    }

    /// Suffix appended to the asset dir name to form the structure file name.
    pub fn structure_suffix(&self) -> &'static str {
        match self {
            Self::Sha1 => ".json",
            Self::Md5 => "_md5.json",
            Self::Crc32 => "_crc32.json",
        }
    }
}

/// One node of the remote tree
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteNode {
    Directory {
        name: String,
        children: Vec<RemoteNode>,
    },
    File {
        name: String,
        length: u64,
        hash: String,
        /// Milliseconds since the epoch, -1 when the server did not declare one
        modified: i64,
    },
}

impl RemoteNode {
    pub fn name(&self) -> &str {
        match self {
            Self::Directory { name, .. } | Self::File { name, .. } => name,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }

    /// Look up a direct child by name; files have no children.
    pub fn child(&self, name: &str) -> Option<&RemoteNode> {
        match self {
            Self::Directory { children, .. } => children.iter().find(|c| c.name() == name),
            Self::File { .. } => None,
        }
    }
}

/// Wire representation; `modified` is in seconds and may be absent.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNode {
    Directory {
        name: String,
        children: Vec<RawNode>,
    },
    File {
        name: String,
        length: u64,
        hash: String,
        #[serde(default)]
        modified: Option<i64>,
    },
}

impl From<RawNode> for RemoteNode {
    fn from(raw: RawNode) -> Self {
        match raw {
            RawNode::Directory { name, children } => Self::Directory {
                name,
                children: children.into_iter().map(Self::from).collect(),
            },
            RawNode::File {
                name,
                length,
                hash,
                modified,
            } => Self::File {
                name,
                length,
                hash,
                // the wire carries seconds
                modified: modified.map(|s| s * 1000).unwrap_or(-1),
            },
        }
    }
}

/// Parse the structure document into a remote tree.
///
/// Malformed JSON is a fatal decode error, never retried.
pub fn parse_structure(raw: &str) -> Result<Vec<RemoteNode>> {
    let nodes: Vec<RawNode> = serde_json::from_str(raw)
        .map_err(|e| UpdateError::decode_error("structure file", e.to_string()))?;
    Ok(nodes.into_iter().map(RemoteNode::from).collect())
}
