//! Shared types used across all pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Which flavour of the site a pipeline run publishes.
///
/// Set once per run. Draft builds get a different base URL, are masked from
/// crawlers, go to their own destination, and never touch the remote
/// precompressed cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Production,
    Draft,
}

impl BuildMode {
    pub fn is_draft(self) -> bool {
        matches!(self, BuildMode::Draft)
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Production => write!(f, "production"),
            BuildMode::Draft => write!(f, "draft"),
        }
    }
}

/// Where a mode's output tree is mirrored to.
///
/// An empty `host` means the destination lives on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Destination {
    /// SSH host (`user@host` or an alias from `~/.ssh/config`). Empty = local.
    #[serde(default)]
    pub host: String,
    /// Absolute directory on the host that receives the mirrored tree.
    pub path: String,
}

impl Destination {
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
        }
    }

    pub fn local(path: impl Into<String>) -> Self {
        Self::new("", path)
    }

    pub fn is_local(&self) -> bool {
        self.host.is_empty()
    }

    pub fn path_buf(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    /// True when both destinations could write into the same files: same host
    /// and one path equal to, or nested inside, the other.
    pub fn overlaps(&self, other: &Destination) -> bool {
        if self.host != other.host {
            return false;
        }
        let a = Path::new(self.path.trim_end_matches('/'));
        let b = Path::new(other.path.trim_end_matches('/'));
        a.starts_with(b) || b.starts_with(a)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}:{}", self.host, self.path)
        }
    }
}
