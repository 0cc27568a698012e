//! # sitepub
//!
//! Builds a static site and publishes it, in one of two modes:
//!
//! - **production**: the site as configured, mirrored to the production
//!   destination, with the remote precompressed cache regenerated afterwards
//! - **draft**: the same content rebuilt against a draft base URL, masked
//!   from crawlers, and mirrored to a separate draft destination
//!
//! # Architecture: Six-Stage Pipeline
//!
//! ```text
//! 1. Build     content/ + config  →  public/       (external generator)
//! 2. Derive    public/  →  *.png.webp, *.jpg.webp  (parallel, fail-fast)
//! 3. Patch     public/  →  known generator defects corrected
//! 4. Mask      public/  →  noindex everywhere, strict robots.txt  (draft)
//! 5. Mirror    public/  →  host:path, exact mirror
//! 6. Refresh   host:path  →  *.gz rebuilt from scratch  (production)
//! ```
//!
//! Every stage mutates the tree the previous one left, so stages never
//! overlap and the first failure ends the run. The run is one function,
//! [`pipeline::publish_with`], parameterized by [`types::BuildMode`]; there is
//! no separate draft code path.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | Stage ordering, failure propagation, progress events, exit codes |
//! | [`scope`] | Scoped mutation of the generator config, restored on every exit path |
//! | [`site`] | Stage 1: generator invocation (`Generator` trait, Hugo) |
//! | [`derive`] | Stage 2: WebP siblings for every PNG and JPEG |
//! | [`imaging`] | WebP codec backends (in-process and `cwebp`) |
//! | [`patch`] | Stage 3: exact substring corrections on generated files |
//! | [`mask`] | Stage 4: crawler masking for draft builds |
//! | [`mirror`] | Stage 5: exact mirror via rsync/ssh or the local filesystem |
//! | [`refresh`] | Stage 6: remote precompressed-artifact regeneration |
//! | [`exec`] | External process execution with timeouts |
//! | [`config`] | `publish.toml` loading, merging, and validation |
//! | [`types`] | Build mode and destination descriptors |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## The Config Document Is Never Left Mutated
//!
//! Draft builds rewrite the generator's base URL. The rewrite happens inside
//! a [`scope::ConfigScope`] guard that writes the original bytes back on
//! every exit path, panics included, and keeps an on-disk backup that
//! `sitepub restore-config` can recover after a hard kill.
//!
//! ## Content Comparison, Not Timestamps
//!
//! The output tree is rebuilt from scratch every run, so every file is new as
//! far as mtimes go. Mirroring compares content, which keeps a republish of
//! unchanged content down to zero transfers.
//!
//! ## A Draft Is Verified Before It Leaves
//!
//! After masking, the tree is scanned again; any page that still allows
//! indexing fails the run before anything is mirrored.

pub mod config;
pub mod derive;
pub mod exec;
pub mod imaging;
pub mod mask;
pub mod mirror;
pub mod output;
pub mod patch;
pub mod pipeline;
pub mod refresh;
pub mod scope;
pub mod site;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
