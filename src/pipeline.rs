//! The publish pipeline: one parameterized run for both build modes.
//!
//! ```text
//! 1. Build     generator → output/          (draft: inside a config scope)
//! 2. Derive    output/ → *.png.webp, *.jpg.webp
//! 3. Patch     output/ → corrected files
//! 4. Mask      output/ → noindex + robots.txt        (draft only)
//! 5. Mirror    output/ → destination for the mode
//! 6. Refresh   destination → *.gz regenerated         (production only)
//! ```
//!
//! Stages run strictly one after another on the same tree, and the first
//! failure ends the run. Nothing is retried. The collaborators (generator,
//! codec, transport) are passed in, so tests can stand in for all of them.
//!
//! Progress is reported as [`PublishEvent`]s over an optional channel; the
//! CLI renders them with [`crate::output`].

use crate::config::{PublishConfig, SitePaths};
use crate::derive::{self, DeriveError, DeriveReport};
use crate::imaging::{self, ImageBackend, Quality};
use crate::mask::{self, MaskError, MaskReport};
use crate::mirror::{self, DefaultTransport, MirrorStats, Selection, Transport, TransportError};
use crate::patch::{self, PatchError, PatchOutcome};
use crate::refresh::{self, RefreshError};
use crate::scope::ScopeError;
use crate::site::{self, Generator, HugoGenerator, SiteError};
use crate::types::{BuildMode, Destination};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{error, info};

/// A pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Build,
    Derive,
    Patch,
    Mask,
    Mirror,
    Refresh,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Build,
        Stage::Derive,
        Stage::Patch,
        Stage::Mask,
        Stage::Mirror,
        Stage::Refresh,
    ];

    /// 1-based position in the pipeline.
    pub fn number(self) -> usize {
        self as usize + 1
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Build => "build",
            Stage::Derive => "derive",
            Stage::Patch => "patch",
            Stage::Mask => "mask",
            Stage::Mirror => "mirror",
            Stage::Refresh => "refresh",
        }
    }

    /// Process exit code when this stage fails.
    pub fn exit_code(self) -> u8 {
        match self {
            Stage::Build => 10,
            Stage::Derive => 11,
            Stage::Patch => 12,
            Stage::Mask => 13,
            Stage::Mirror => 14,
            Stage::Refresh => 15,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Exit code for a config scope failure (including a failed restore).
pub const SCOPE_EXIT_CODE: u8 = 3;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("config scope failed: {0}")]
    Scope(#[source] ScopeError),
    #[error("build failed: {0}")]
    Build(#[source] SiteError),
    #[error("derive failed: {0}")]
    Derive(#[from] DeriveError),
    #[error("patch failed: {0}")]
    Patch(#[from] PatchError),
    #[error("mask failed: {0}")]
    Mask(#[from] MaskError),
    #[error("mirror failed: {0}")]
    Mirror(#[from] TransportError),
    #[error("refresh failed: {0}")]
    Refresh(#[from] RefreshError),
}

impl From<SiteError> for PublishError {
    fn from(e: SiteError) -> Self {
        match e {
            SiteError::Scope(scope) => PublishError::Scope(scope),
            other => PublishError::Build(other),
        }
    }
}

impl PublishError {
    /// The stage that failed. A scope failure happens around the build.
    pub fn stage(&self) -> Stage {
        match self {
            PublishError::Scope(_) | PublishError::Build(_) => Stage::Build,
            PublishError::Derive(_) => Stage::Derive,
            PublishError::Patch(_) => Stage::Patch,
            PublishError::Mask(_) => Stage::Mask,
            PublishError::Mirror(_) => Stage::Mirror,
            PublishError::Refresh(_) => Stage::Refresh,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            PublishError::Scope(_) => SCOPE_EXIT_CODE,
            other => other.stage().exit_code(),
        }
    }
}

/// Progress reported while the pipeline runs.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishEvent {
    StageStarted { stage: Stage, detail: String },
    StageSkipped { stage: Stage, reason: &'static str },
    Built { output: PathBuf },
    Derived(DeriveReport),
    Patched(Vec<PatchOutcome>),
    Masked(MaskReport),
    Mirrored { destination: Destination, stats: MirrorStats },
    Refreshed { destination: Destination },
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReport {
    pub mode: BuildMode,
    pub output: PathBuf,
    pub destination: Destination,
    pub derive: DeriveReport,
    pub patches: Vec<PatchOutcome>,
    /// Present for draft runs.
    pub mask: Option<MaskReport>,
    /// Absent when syncing was turned off.
    pub mirror: Option<MirrorStats>,
    pub refreshed: bool,
}

/// Per-run switches.
#[derive(Debug, Clone, Copy)]
pub struct PublishOptions {
    pub mode: BuildMode,
    /// Mirror (and refresh) after building. Off for local-only runs.
    pub sync: bool,
}

/// The external collaborators a run drives.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub generator: &'a dyn Generator,
    pub backend: &'a dyn ImageBackend,
    pub transport: &'a dyn Transport,
}

fn emit(events: &Option<Sender<PublishEvent>>, event: PublishEvent) {
    if let Some(tx) = events {
        // The receiver only renders progress; a closed channel is not a failure.
        let _ = tx.send(event);
    }
}

/// Run the pipeline with the collaborators selected by `config`.
///
/// Relative paths in `[site]` resolve against `root`.
pub fn publish(
    config: &PublishConfig,
    root: &Path,
    options: PublishOptions,
    events: Option<Sender<PublishEvent>>,
) -> Result<PublishReport, PublishError> {
    let generator = HugoGenerator::new(&config.site.generator, &config.site.generator_args);
    let backend = imaging::backend_for(&config.derive);
    let transport = DefaultTransport::new(&config.mirror, &config.remote);
    let collaborators = Collaborators {
        generator: &generator,
        backend: backend.as_ref(),
        transport: &transport,
    };
    publish_with(
        config,
        &config.site.paths(root),
        options,
        collaborators,
        events,
    )
}

/// Run the pipeline against explicit collaborators.
pub fn publish_with(
    config: &PublishConfig,
    paths: &SitePaths,
    options: PublishOptions,
    collaborators: Collaborators<'_>,
    events: Option<Sender<PublishEvent>>,
) -> Result<PublishReport, PublishError> {
    let result = run_stages(config, paths, options, collaborators, &events);
    if let Err(e) = &result {
        error!(stage = %e.stage(), "{e}");
    }
    result
}

fn run_stages(
    config: &PublishConfig,
    paths: &SitePaths,
    options: PublishOptions,
    collaborators: Collaborators<'_>,
    events: &Option<Sender<PublishEvent>>,
) -> Result<PublishReport, PublishError> {
    let mode = options.mode;
    let destination = config.destination(mode).clone();
    info!(%mode, destination = %destination, "publishing");

    // 1. Build
    emit(
        events,
        PublishEvent::StageStarted {
            stage: Stage::Build,
            detail: format!("{} ({mode})", paths.source.display()),
        },
    );
    let output = site::build_site(
        collaborators.generator,
        paths,
        mode,
        &config.draft,
        &config.site.base_url_key,
    )?;
    emit(events, PublishEvent::Built { output: output.clone() });

    // 2. Derive
    emit(
        events,
        PublishEvent::StageStarted {
            stage: Stage::Derive,
            detail: "webp siblings".into(),
        },
    );
    let derived = derive::derive(
        collaborators.backend,
        &output,
        Quality::new(config.derive.quality),
        &config.processing,
    )?;
    emit(events, PublishEvent::Derived(derived.clone()));

    // 3. Patch
    emit(
        events,
        PublishEvent::StageStarted {
            stage: Stage::Patch,
            detail: format!("{} rule(s)", config.patches.len()),
        },
    );
    let patches = patch::apply(&output, &config.patches)?;
    emit(events, PublishEvent::Patched(patches.clone()));

    // 4. Mask
    let masked = if mode.is_draft() {
        emit(
            events,
            PublishEvent::StageStarted {
                stage: Stage::Mask,
                detail: "noindex + robots.txt".into(),
            },
        );
        let report = mask::mask(&output, &config.draft.robots)?;
        emit(events, PublishEvent::Masked(report.clone()));
        Some(report)
    } else {
        emit(
            events,
            PublishEvent::StageSkipped {
                stage: Stage::Mask,
                reason: "production build",
            },
        );
        None
    };

    let mut report = PublishReport {
        mode,
        output: output.clone(),
        destination: destination.clone(),
        derive: derived,
        patches,
        mask: masked,
        mirror: None,
        refreshed: false,
    };

    if !options.sync {
        for stage in [Stage::Mirror, Stage::Refresh] {
            emit(
                events,
                PublishEvent::StageSkipped {
                    stage,
                    reason: "sync disabled",
                },
            );
        }
        return Ok(report);
    }

    // 5. Mirror
    emit(
        events,
        PublishEvent::StageStarted {
            stage: Stage::Mirror,
            detail: destination.to_string(),
        },
    );
    let stats = mirror::mirror(
        collaborators.transport,
        &output,
        &destination,
        &Selection::from_config(&config.mirror),
    )?;
    report.mirror = Some(stats);
    emit(
        events,
        PublishEvent::Mirrored {
            destination: destination.clone(),
            stats,
        },
    );

    // 6. Refresh
    if mode.is_draft() {
        emit(
            events,
            PublishEvent::StageSkipped {
                stage: Stage::Refresh,
                reason: "draft build",
            },
        );
        return Ok(report);
    }
    emit(
        events,
        PublishEvent::StageStarted {
            stage: Stage::Refresh,
            detail: destination.to_string(),
        },
    );
    refresh::refresh(collaborators.transport, &destination, &config.refresh)?;
    report.refreshed = true;
    emit(events, PublishEvent::Refreshed { destination });

    Ok(report)
}
