//! WebP encoding for derived assets.
//!
//! | Backend | Decode | Encode |
//! |---|---|---|
//! | [`RustBackend`] | `image` | libwebp via `webp` |
//! | [`CwebpBackend`] | `cwebp` | `cwebp` |
//!
//! The module is split into:
//! - **Parameters**: what to encode and where the sibling goes
//! - **Backend**: [`ImageBackend`] trait + the two implementations

pub mod backend;
pub mod cwebp_backend;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend};
pub use cwebp_backend::CwebpBackend;
pub use params::{DERIVED_EXTENSION, Encoding, Quality, WebpParams, derived_path};
pub use rust_backend::RustBackend;

use crate::config::{DeriveBackend, DeriveConfig};

/// Build the backend selected in `[derive]`.
pub fn backend_for(config: &DeriveConfig) -> Box<dyn ImageBackend> {
    match config.backend {
        DeriveBackend::Rust => Box::new(RustBackend::new()),
        DeriveBackend::Cwebp => Box::new(CwebpBackend::new(&config.cwebp)),
    }
}
