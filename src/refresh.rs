//! Remote precompressed-artifact regeneration.
//!
//! Stage 6, production only, and only after a successful mirror. The remote
//! artifact set is rebuilt from scratch every run in two commands:
//!
//! 1. delete every `*.<ext><stale_suffix>` file for the whitelisted
//!    extensions (`*.html.gz`, `*.css.gz`, ...)
//! 2. gzip every whitelisted text file, keeping the original
//!
//! The delete step clears the whole artifact set unconditionally, so a
//! compressed copy of a page that was removed or changed in this publish
//! cannot survive it. Compressed files the site ships itself, such as a
//! `.tar.gz` download, are not artifacts and are left alone. The second
//! command only runs once the first has succeeded.

use crate::config::RefreshConfig;
use crate::exec::shell_quote;
use crate::mirror::{Transport, TransportError};
use crate::types::Destination;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("removing stale artifacts: {0}")]
    Clear(#[source] TransportError),
    #[error("regenerating artifacts: {0}")]
    Compress(#[source] TransportError),
}

/// `-name` alternatives for every whitelisted extension, each followed by
/// `suffix`.
fn name_patterns(config: &RefreshConfig, suffix: &str) -> String {
    config
        .extensions
        .iter()
        .map(|ext| format!("-name {}", shell_quote(&format!("*.{ext}{suffix}"))))
        .collect::<Vec<_>>()
        .join(" -o ")
}

/// Command that deletes every stale artifact under `path`.
pub fn clear_command(path: &str, config: &RefreshConfig) -> String {
    format!(
        "find {} -type f \\( {} \\) -delete",
        shell_quote(path),
        name_patterns(config, &config.stale_suffix),
    )
}

/// Command that writes a compressed sibling for every whitelisted file
/// under `path`.
pub fn compress_command(path: &str, config: &RefreshConfig) -> String {
    format!(
        "find {} -type f \\( {} \\) -exec gzip -{} -k -f {{}} +",
        shell_quote(path),
        name_patterns(config, ""),
        config.level,
    )
}

/// Clear and regenerate the artifact set at `dest`.
pub fn refresh(
    transport: &dyn Transport,
    dest: &Destination,
    config: &RefreshConfig,
) -> Result<(), RefreshError> {
    info!(destination = %dest, "refreshing precompressed artifacts");
    transport
        .exec(&dest.host, &clear_command(&dest.path, config))
        .map_err(RefreshError::Clear)?;
    transport
        .exec(&dest.host, &compress_command(&dest.path, config))
        .map_err(RefreshError::Compress)?;
    Ok(())
}
