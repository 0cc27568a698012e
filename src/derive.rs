//! Derived WebP assets.
//!
//! Stage 2 of the publish pipeline. Walks the freshly built output tree and
//! writes a WebP sibling next to every raster image:
//!
//! ```text
//! public/
//! ├── images/
//! │   ├── logo.png
//! │   ├── logo.png.webp        # lossless
//! │   ├── photo.jpg
//! │   └── photo.jpg.webp       # lossy, [derive].quality
//! └── ...
//! ```
//!
//! Originals are never touched, so a server can pick between the two by
//! content negotiation. Existing `.webp` siblings are overwritten, which makes
//! re-running after an interrupted run safe.
//!
//! ## Failure policy
//!
//! Fail-fast: the first transcode that fails aborts the stage. Transcodes
//! already in flight on other workers finish, no new ones start, and the
//! pipeline stops before anything is published. A tree with some images
//! missing their sibling is never mirrored.
//!
//! ## Parallel Processing
//!
//! Transcodes are independent and run on a dedicated
//! [rayon](https://docs.rs/rayon) pool sized by `[processing]`. The call
//! returns only after every worker is done.

use crate::config::{ProcessingConfig, effective_threads};
use crate::imaging::{BackendError, Encoding, ImageBackend, Quality, WebpParams};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum DeriveError {
    #[error("cannot walk output tree: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("cannot start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("failed to derive {}: {source}", .path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: BackendError,
    },
}

/// What the stage produced.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DeriveReport {
    pub lossless: usize,
    pub lossy: usize,
}

impl DeriveReport {
    pub fn total(&self) -> usize {
        self.lossless + self.lossy
    }
}

/// Every derivation the tree calls for, in walk order.
pub fn plan(output_dir: &Path, quality: Quality) -> Result<Vec<WebpParams>, DeriveError> {
    let mut jobs = Vec::new();
    for entry in WalkDir::new(output_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(params) = WebpParams::for_source(entry.path(), quality) {
            jobs.push(params);
        }
    }
    Ok(jobs)
}

/// Derive a WebP sibling for every PNG and JPEG under `output_dir`.
pub fn derive(
    backend: &dyn ImageBackend,
    output_dir: &Path,
    quality: Quality,
    processing: &ProcessingConfig,
) -> Result<DeriveReport, DeriveError> {
    let jobs = plan(output_dir, quality)?;
    let threads = effective_threads(processing);
    info!(images = jobs.len(), threads, "deriving webp assets");

    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    pool.install(|| {
        jobs.par_iter().try_for_each(|params| {
            debug!(source = %params.source.display(), "encoding");
            backend
                .encode_webp(params)
                .map_err(|source| DeriveError::Encode {
                    path: params.source.clone(),
                    source,
                })
        })
    })?;

    let lossless = jobs
        .iter()
        .filter(|p| p.encoding == Encoding::Lossless)
        .count();
    Ok(DeriveReport {
        lossless,
        lossy: jobs.len() - lossless,
    })
}
