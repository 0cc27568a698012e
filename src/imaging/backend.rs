//! WebP encoding backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the codec boundary: given a source path and
//! the desired form, produce the sibling file or report failure.
//!
//! Two implementations ship:
//! - [`RustBackend`](super::rust_backend::RustBackend): in-process, `image`
//!   decodes and libwebp (through the `webp` crate) encodes.
//! - [`CwebpBackend`](super::cwebp_backend::CwebpBackend): one external
//!   `cwebp` process per file.

use super::params::WebpParams;
use crate::exec::ExecError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Trait for WebP encoding backends.
///
/// `Sync` so one backend can be shared across the rayon pool.
pub trait ImageBackend: Sync {
    /// Encode `params.source` into `params.output`, overwriting any
    /// existing file there.
    fn encode_webp(&self, params: &WebpParams) -> Result<(), BackendError>;
}
