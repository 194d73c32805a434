//! Global configuration loaded from a YAML config file

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};

/// One server URL or a list of equivalent mirrors, tried in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerList {
    One(String),
    Many(Vec<String>),
}

impl ServerList {
    /// Flatten into an ordered URL list.
    pub fn urls(&self) -> Vec<String> {
        match self {
            Self::One(url) => vec![url.clone()],
            Self::Many(urls) => urls.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(url) => url.is_empty(),
            Self::Many(urls) => urls.is_empty(),
        }
    }
}

/// Options for a whole update run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GlobalOptions {
    /// Server index URLs; multiple entries are fallback mirrors
    pub server: ServerList,
    /// Subdirectory under the working directory to update
    pub base_path: String,
    /// Version fingerprint file name; empty disables the cache
    pub version_cache: String,
    /// Cache-busting query parameter name, appended to every request
    pub no_cache: Option<String>,
    /// Use the mtime shortcut before falling back to full hashing
    pub check_modified: bool,
    /// HTTP connect timeout in milliseconds
    pub http_connect_timeout: u64,
    /// HTTP read timeout in milliseconds, enforced per chunk
    pub http_read_timeout: u64,
    /// Download worker count; 0 derives it from the CPU count
    pub download_threads: usize,
    /// Attempts per URL before falling back to the next mirror
    pub retry_times: u32,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            server: ServerList::Many(Vec::new()),
            base_path: String::new(),
            version_cache: String::new(),
            no_cache: None,
            check_modified: false,
            http_connect_timeout: 5000,
            http_read_timeout: 10000,
            download_threads: 4,
            retry_times: 5,
        }
    }
}

impl GlobalOptions {
    /// Load and validate options from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            UpdateError::Config(format!("cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate options from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let options: Self = serde_yaml::from_str(content)
            .map_err(|e| UpdateError::Config(format!("cannot decode config file: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.is_empty() {
            return Err(UpdateError::Config(
                "'server' must name at least one index URL".into(),
            ));
        }
        Ok(())
    }

    /// Worker count with the 0 = auto rule applied.
    pub fn effective_threads(&self) -> usize {
        if self.download_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.download_threads
        }
    }
}
