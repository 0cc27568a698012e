//! Publish configuration module.
//!
//! Handles loading, validating, and merging `publish.toml`. Stock defaults
//! are overridden by whatever the user file specifies; everything is optional.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [site]
//! source = "."               # Generator site root (the content tree)
//! config = "config.toml"     # Generator configuration document
//! output = "public"          # Output tree, removed and rebuilt every run
//! generator = "hugo"         # Generator program
//! generator_args = []        # Extra arguments passed to every build
//! base_url_key = "baseURL"   # Key rewritten for draft builds
//!
//! [draft]
//! base_url = "https://draft.example.com/"
//! build_drafts = true        # Ask the generator to render draft content
//! robots = """
//! User-agent: *
//! Disallow: /
//! """
//!
//! [destinations.production]
//! host = ""                  # SSH host; empty = local filesystem
//! path = "/var/www/html"
//!
//! [destinations.draft]
//! host = ""
//! path = "/var/www/draft"
//!
//! [derive]
//! backend = "rust"           # "rust" (in-process) or "cwebp" (external)
//! quality = 80               # Lossy WebP quality for JPEG sources (1-100)
//! cwebp = "cwebp"            # Program used by the cwebp backend
//!
//! [processing]
//! max_processes = 4          # Max parallel transcodes (omit for auto = CPU cores)
//!
//! [mirror]
//! include_hidden = [".well-known"]
//! rsync = "rsync"
//! ssh = "ssh"
//!
//! [remote]
//! timeout_secs = 600         # Kill any remote call that runs longer
//!
//! [refresh]
//! stale_suffix = ".gz"
//! extensions = ["html", "css", "xml", "ico", "svg", "json"]
//! level = 9
//!
//! [[patches]]
//! file = "index.xml"
//! old = "&amp;amp;"
//! new = "&amp;"
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse: override just the values you want. Tables merge
//! key-by-key; arrays (including `[[patches]]`) replace the stock value
//! wholesale.
//!
//! Unknown keys are rejected to catch typos early.

use crate::patch::PatchRule;
use crate::types::{BuildMode, Destination};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default name of the publish configuration file.
pub const CONFIG_FILENAME: &str = "publish.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Publish configuration loaded from `publish.toml`.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PublishConfig {
    /// Generator invocation and the locations it reads and writes.
    pub site: SiteSection,
    /// Draft-only overrides.
    pub draft: DraftConfig,
    /// One mirror target per build mode.
    pub destinations: DestinationsConfig,
    /// WebP derivation settings.
    pub derive: DeriveConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
    /// Mirror selection and transport programs.
    pub mirror: MirrorConfig,
    /// Settings shared by every remote call.
    pub remote: RemoteConfig,
    /// Remote precompressed-artifact regeneration.
    pub refresh: RefreshConfig,
    /// Ordered output patch rules.
    pub patches: Vec<PatchRule>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            site: SiteSection::default(),
            draft: DraftConfig::default(),
            destinations: DestinationsConfig::default(),
            derive: DeriveConfig::default(),
            processing: ProcessingConfig::default(),
            mirror: MirrorConfig::default(),
            remote: RemoteConfig::default(),
            refresh: RefreshConfig::default(),
            patches: PatchRule::stock(),
        }
    }
}

impl PublishConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        if self.site.base_url_key.trim().is_empty() {
            return invalid("site.base_url_key must not be empty".into());
        }
        if self.site.generator.trim().is_empty() {
            return invalid("site.generator must not be empty".into());
        }
        if self.site.output.trim().is_empty() {
            return invalid("site.output must not be empty".into());
        }
        let base_url = &self.draft.base_url;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return invalid(format!(
                "draft.base_url must be an http(s) URL, got {base_url:?}"
            ));
        }
        for (mode, dest) in [
            ("production", &self.destinations.production),
            ("draft", &self.destinations.draft),
        ] {
            if dest.path.trim().is_empty() {
                return invalid(format!("destinations.{mode}.path must not be empty"));
            }
        }
        if self
            .destinations
            .production
            .overlaps(&self.destinations.draft)
        {
            return invalid(format!(
                "destinations.production ({}) and destinations.draft ({}) must not overlap",
                self.destinations.production, self.destinations.draft
            ));
        }
        if self.derive.quality == 0 || self.derive.quality > 100 {
            return invalid("derive.quality must be 1-100".into());
        }
        for dir in &self.mirror.include_hidden {
            if !dir.starts_with('.') || dir.len() < 2 || dir.contains('/') {
                return invalid(format!(
                    "mirror.include_hidden entries must be top-level dot-directories, got {dir:?}"
                ));
            }
        }
        if self.remote.timeout_secs == 0 {
            return invalid("remote.timeout_secs must be greater than zero".into());
        }
        if !self.refresh.stale_suffix.starts_with('.') || self.refresh.stale_suffix.len() < 2 {
            return invalid("refresh.stale_suffix must look like \".gz\"".into());
        }
        if self.refresh.extensions.is_empty() {
            return invalid("refresh.extensions must not be empty".into());
        }
        for ext in &self.refresh.extensions {
            if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                return invalid(format!(
                    "refresh.extensions entries must be bare alphanumeric extensions, got {ext:?}"
                ));
            }
        }
        if !(1..=9).contains(&self.refresh.level) {
            return invalid("refresh.level must be 1-9".into());
        }
        for (i, rule) in self.patches.iter().enumerate() {
            if let Err(msg) = rule.validate() {
                return invalid(format!("patches[{i}]: {msg}"));
            }
        }
        Ok(())
    }

    /// The mirror target for a build mode. Modes never share a destination.
    pub fn destination(&self, mode: BuildMode) -> &Destination {
        match mode {
            BuildMode::Production => &self.destinations.production,
            BuildMode::Draft => &self.destinations.draft,
        }
    }
}

/// Generator invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteSection {
    /// Generator site root. Relative paths resolve against the directory
    /// holding `publish.toml`.
    pub source: String,
    /// Generator configuration document, mutated only inside a config scope.
    pub config: String,
    /// Output tree written by the generator.
    pub output: String,
    /// Generator program.
    pub generator: String,
    /// Extra arguments appended to every generator invocation.
    pub generator_args: Vec<String>,
    /// Top-level key holding the site base URL.
    pub base_url_key: String,
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            source: ".".to_string(),
            config: "config.toml".to_string(),
            output: "public".to_string(),
            generator: "hugo".to_string(),
            generator_args: Vec::new(),
            base_url_key: "baseURL".to_string(),
        }
    }
}

/// Absolute locations the pipeline works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitePaths {
    pub source: PathBuf,
    pub config: PathBuf,
    pub output: PathBuf,
}

impl SiteSection {
    /// Resolve `source`, `config` and `output` against `root`.
    pub fn paths(&self, root: &Path) -> SitePaths {
        SitePaths {
            source: root.join(&self.source),
            config: root.join(&self.config),
            output: root.join(&self.output),
        }
    }
}

/// Draft-only overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DraftConfig {
    /// Base URL written into the generator config for the draft build.
    pub base_url: String,
    /// Ask the generator to render content marked as draft.
    pub build_drafts: bool,
    /// Contents that replace the generated `robots.txt`.
    pub robots: String,
}

/// Stricter robots policy served by draft deployments.
pub const DRAFT_ROBOTS: &str = "User-agent: *\nDisallow: /\n";

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            base_url: "https://draft.example.com/".to_string(),
            build_drafts: true,
            robots: DRAFT_ROBOTS.to_string(),
        }
    }
}

/// Mirror destinations, one per mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DestinationsConfig {
    pub production: Destination,
    pub draft: Destination,
}

impl Default for DestinationsConfig {
    fn default() -> Self {
        Self {
            production: Destination::local("/var/www/html"),
            draft: Destination::local("/var/www/draft"),
        }
    }
}

/// Which codec implementation derives WebP assets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeriveBackend {
    /// In-process: `image` decodes, libwebp (via `webp`) encodes.
    #[default]
    Rust,
    /// One external `cwebp` process per image.
    Cwebp,
}

/// WebP derivation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeriveConfig {
    pub backend: DeriveBackend,
    /// Lossy encoding quality for JPEG sources (1 = worst, 100 = best).
    pub quality: u32,
    /// Program used by the `cwebp` backend.
    pub cwebp: String,
}

impl Default for DeriveConfig {
    fn default() -> Self {
        Self {
            backend: DeriveBackend::Rust,
            quality: 80,
            cwebp: "cwebp".to_string(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel transcodes.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Mirror selection and transport programs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    /// Top-level hidden directories that are mirrored even though every
    /// other dot-entry is skipped.
    pub include_hidden: Vec<String>,
    pub rsync: String,
    pub ssh: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            include_hidden: vec![".well-known".to_string()],
            rsync: "rsync".to_string(),
            ssh: "ssh".to_string(),
        }
    }
}

/// Settings shared by every remote call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Wall-clock limit for a single remote call.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self { timeout_secs: 600 }
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }
}

/// Remote precompressed-artifact regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefreshConfig {
    /// Suffix of precompressed artifacts. Every `*.<ext><suffix>` for the
    /// whitelisted extensions is deleted first.
    pub stale_suffix: String,
    /// Extensions (without dot) that get a precompressed sibling.
    pub extensions: Vec<String>,
    /// gzip compression level.
    pub level: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            stale_suffix: ".gz".to_string(),
            extensions: ["html", "css", "xml", "ico", "svg", "json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            level: 9,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(PublishConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<PublishConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: PublishConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the given `publish.toml` path.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result. A missing file yields the stock defaults.
pub fn load_config(path: &Path) -> Result<PublishConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `publish.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# sitepub Configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Relative paths resolve against the directory holding this file.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Site generator
# ---------------------------------------------------------------------------
[site]
# Generator site root (the content tree). Never modified.
source = "."

# Generator configuration document. Draft builds rewrite its base URL for the
# duration of the build and restore the original bytes afterwards.
config = "config.toml"

# Output tree. Removed and rebuilt from scratch on every run.
output = "public"

# Generator program and extra arguments for every build.
generator = "hugo"
generator_args = []

# Top-level key in the generator config that holds the site base URL.
base_url_key = "baseURL"

# ---------------------------------------------------------------------------
# Draft builds
# ---------------------------------------------------------------------------
[draft]
# Base URL used while building the draft site.
base_url = "https://draft.example.com/"

# Ask the generator to render content marked as draft.
build_drafts = true

# Replaces the generated robots.txt in draft builds.
robots = """
User-agent: *
Disallow: /
"""

# ---------------------------------------------------------------------------
# Mirror destinations (one per mode, must not overlap)
# ---------------------------------------------------------------------------
[destinations.production]
# SSH host, e.g. "deploy@web1". Empty means the local filesystem.
host = ""
path = "/var/www/html"

[destinations.draft]
host = ""
path = "/var/www/draft"

# ---------------------------------------------------------------------------
# WebP derivation
# ---------------------------------------------------------------------------
[derive]
# "rust" encodes in-process; "cwebp" runs one cwebp process per image.
backend = "rust"

# Lossy quality for JPEG sources (1 = worst, 100 = best). PNG is lossless.
quality = 80

# Program used by the cwebp backend.
cwebp = "cwebp"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel transcodes.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Mirroring
# ---------------------------------------------------------------------------
[mirror]
# Hidden top-level directories that are always mirrored. Every other
# dot-entry in the output tree is skipped.
include_hidden = [".well-known"]

rsync = "rsync"
ssh = "ssh"

# ---------------------------------------------------------------------------
# Remote calls
# ---------------------------------------------------------------------------
[remote]
# Any single remote call running longer than this is killed and the
# publish aborts.
timeout_secs = 600

# ---------------------------------------------------------------------------
# Precompressed cache refresh (production only)
# ---------------------------------------------------------------------------
[refresh]
# Suffix of the precompressed siblings. Every remote `*.<ext><suffix>` for
# the extensions below is deleted before regeneration; other compressed
# files the site ships (a .tar.gz download) are left alone.
stale_suffix = ".gz"

# Files with these extensions get a precompressed sibling.
extensions = ["html", "css", "xml", "ico", "svg", "json"]

# gzip compression level (1-9).
level = 9

# ---------------------------------------------------------------------------
# Output patches, applied in order after WebP derivation.
# A rule whose text is not found is skipped.
# ---------------------------------------------------------------------------
[[patches]]
file = "index.xml"
old = "&amp;amp;"
new = "&amp;"

[[patches]]
file = "404.html"
old = '<html lang="">'
new = '<html lang="en">'
"##
}
