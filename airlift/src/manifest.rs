//! Server metadata and structure manifest handling
//!
//! The index document names the asset directory, the hash algorithm and the
//! pattern lists for both sync modes. From it and the configured server URLs
//! this module derives per-mirror structure-file URLs and assets base URLs.

use reqwest::Client;
use serde::Deserialize;

use crate::error::{Result, UpdateError};
use crate::http;
use crate::remote::{self, HashAlgorithm, RemoteNode};

/// Parsed server index metadata
#[derive(Debug, Clone)]
pub struct Metadata {
    /// Patterns for the full two-way sync
    pub common_mode: Vec<String>,
    /// Patterns for the additive-only sync
    pub once_mode: Vec<String>,
    /// Structure file URL per configured server, in server order
    pub structure_file_urls: Vec<String>,
    /// Assets base URL per configured server, each ending with `/`
    pub assets_dir_urls: Vec<String>,
    pub hash_algorithm: HashAlgorithm,
}

#[derive(Debug, Deserialize)]
struct RawIndex {
    #[serde(default = "default_update")]
    update: String,
    #[serde(default)]
    hash_algorithm: Option<String>,
    common_mode: Vec<String>,
    once_mode: Vec<String>,
}

fn default_update() -> String {
    "res".to_string()
}

/// Fetch and parse the index document from the first reachable server.
pub async fn fetch_metadata(
    client: &Client,
    servers: &[String],
    no_cache: Option<&str>,
    read_timeout_ms: u64,
    retry_times: u32,
) -> Result<Metadata> {
    let raw =
        http::fetch_text_multiple(client, servers, no_cache, read_timeout_ms, retry_times).await?;
    let index: RawIndex = serde_json::from_str(&raw)
        .map_err(|e| UpdateError::decode_error("index file", e.to_string()))?;

    let hash_algorithm = index
        .hash_algorithm
        .as_deref()
        .and_then(HashAlgorithm::parse)
        .unwrap_or(HashAlgorithm::Sha1);

    let suffix = hash_algorithm.structure_suffix();
    let mut structure_file_urls = Vec::with_capacity(servers.len());
    let mut assets_dir_urls = Vec::with_capacity(servers.len());

    for server in servers {
        let base = base_url(server);
        // an `update` value carrying a query string is used verbatim
        let structure = if index.update.contains('?') {
            format!("{base}{}", index.update)
        } else {
            format!("{base}{}{suffix}", index.update)
        };
        structure_file_urls.push(structure);
        assets_dir_urls.push(format!("{base}{}/", find_source(&index.update)));
    }

    Ok(Metadata {
        common_mode: index.common_mode,
        once_mode: index.once_mode,
        structure_file_urls,
        assets_dir_urls,
        hash_algorithm,
    })
}

/// Fetch the structure document and parse it into a remote tree.
///
/// Returns the raw text too; the version cache fingerprints it.
pub async fn fetch_structure(
    client: &Client,
    metadata: &Metadata,
    no_cache: Option<&str>,
    read_timeout_ms: u64,
    retry_times: u32,
) -> Result<(String, Vec<RemoteNode>)> {
    let raw = http::fetch_text_multiple(
        client,
        &metadata.structure_file_urls,
        no_cache,
        read_timeout_ms,
        retry_times,
    )
    .await?;
    let tree = remote::parse_structure(&raw)?;
    Ok((raw, tree))
}

/// Everything up to and including the last `/` of an index URL.
fn base_url(url: &str) -> String {
    match url.rfind('/') {
        Some(i) => url[..=i].to_string(),
        None => url.to_string(),
    }
}

/// Resolve the assets directory from the `update` field.
///
/// A `?source=<dir>` parameter overrides the directory; otherwise any query
/// string is stripped.
fn find_source(update: &str) -> &str {
    let Some((path, query)) = update.split_once('?') else {
        return update;
    };
    if !query.is_empty() {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                if key == "source" && !value.is_empty() {
                    return value;
                }
            }
        }
    }
    path
}
