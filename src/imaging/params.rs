//! Parameter types for WebP derivation.
//!
//! These structs describe *what* to encode, not *how*. They are the interface
//! between the [`derive`](crate::derive) stage (which decides which files get
//! a WebP sibling and in what form) and the [`backend`](super::backend)
//! (which does the pixel work). This separation allows swapping backends
//! (e.g. for testing with a mock) without changing the stage logic.

use std::path::{Path, PathBuf};

/// Extension appended to a source file name to form its derived sibling.
pub const DERIVED_EXTENSION: &str = "webp";

/// Quality setting for lossy WebP encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

/// Which WebP flavour to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Pixel-exact; used for PNG sources.
    Lossless,
    /// Used for JPEG sources, which are already lossy.
    Lossy(Quality),
}

/// Everything one derivation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebpParams {
    pub source: PathBuf,
    pub output: PathBuf,
    pub encoding: Encoding,
}

impl WebpParams {
    /// Params for `source`, if its extension calls for a derived asset.
    ///
    /// `*.png` → lossless, `*.jpg`/`*.jpeg` → lossy; matching is
    /// case-insensitive. Anything else yields `None`.
    pub fn for_source(source: &Path, quality: Quality) -> Option<Self> {
        let ext = source.extension()?.to_str()?.to_ascii_lowercase();
        let encoding = match ext.as_str() {
            "png" => Encoding::Lossless,
            "jpg" | "jpeg" => Encoding::Lossy(quality),
            _ => return None,
        };
        Some(Self {
            source: source.to_path_buf(),
            output: derived_path(source),
            encoding,
        })
    }
}

/// `photo.png` → `photo.png.webp`. The original name is kept whole so a PNG
/// and a JPEG with the same stem never collide.
pub fn derived_path(source: &Path) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(".");
    name.push(DERIVED_EXTENSION);
    PathBuf::from(name)
}
