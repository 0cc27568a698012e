//! Static site generation.
//!
//! Stage 1 of the publish pipeline. The generator itself is an external
//! collaborator behind the [`Generator`] trait; [`HugoGenerator`] is the one
//! the CLI uses. [`build_site`] owns everything around it:
//!
//! - the output directory is removed first, so nothing from a previous run
//!   survives into this one
//! - draft builds run inside a [`ConfigScope`](crate::scope::ConfigScope)
//!   that points the base URL at the draft host for exactly the duration of
//!   the generator call
//! - production builds refuse to start (and refuse to finish) while the
//!   scope backup exists, since the document may then carry the draft URL
//! - a failed build removes whatever partial output it left, so no later
//!   stage can mistake it for a usable tree

use crate::config::{DraftConfig, SitePaths};
use crate::exec::{self, ExecError};
use crate::scope::{self, ScopeError};
use crate::types::BuildMode;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum SiteError {
    #[error(transparent)]
    Generator(#[from] ExecError),
    /// Failure reported by an in-process [`Generator`]. [`HugoGenerator`]
    /// fails through [`SiteError::Generator`]; this variant is for
    /// generators that do not run a child process, such as test stand-ins.
    #[error("generator reported an error: {0}")]
    Reported(String),
    #[error("cannot clear output directory {}: {source}", .path.display())]
    Clean {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("generator succeeded but produced no output at {}", .0.display())]
    MissingOutput(PathBuf),
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

/// Everything a generator needs for one build.
#[derive(Debug, Clone, Copy)]
pub struct BuildRequest<'a> {
    pub source: &'a Path,
    pub config: &'a Path,
    pub output: &'a Path,
    /// Render content marked as draft.
    pub include_drafts: bool,
}

/// An external static site generator.
pub trait Generator {
    /// Render `request.source` into `request.output`.
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), SiteError>;
}

/// Runs `hugo`.
#[derive(Debug, Clone)]
pub struct HugoGenerator {
    program: String,
    extra_args: Vec<String>,
}

impl HugoGenerator {
    pub fn new(program: impl Into<String>, extra_args: &[String]) -> Self {
        Self {
            program: program.into(),
            extra_args: extra_args.to_vec(),
        }
    }

    fn command(&self, request: &BuildRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--source")
            .arg(request.source)
            .arg("--config")
            .arg(request.config)
            .arg("--destination")
            .arg(request.output);
        if request.include_drafts {
            cmd.arg("--buildDrafts");
        }
        cmd.args(&self.extra_args);
        cmd
    }
}

impl Generator for HugoGenerator {
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), SiteError> {
        exec::run(&mut self.command(request), None)?;
        Ok(())
    }
}

/// Build the site for `mode` and return the output tree.
pub fn build_site(
    generator: &dyn Generator,
    paths: &SitePaths,
    mode: BuildMode,
    draft: &DraftConfig,
    base_url_key: &str,
) -> Result<PathBuf, SiteError> {
    if !mode.is_draft() {
        scope::ensure_unmodified(&paths.config)?;
    }
    clear_output(&paths.output)?;

    let request = BuildRequest {
        source: &paths.source,
        config: &paths.config,
        output: &paths.output,
        include_drafts: mode.is_draft() && draft.build_drafts,
    };
    info!(%mode, source = %paths.source.display(), "building site");

    let built = match mode {
        BuildMode::Production => generator
            .build(&request)
            .and_then(|()| scope::ensure_unmodified(&paths.config).map_err(SiteError::from)),
        BuildMode::Draft => scope::with_scope(
            &paths.config,
            |doc| scope::set_base_url(doc, base_url_key, &draft.base_url),
            || generator.build(&request),
        )
        .map_err(SiteError::from)
        .and_then(|inner| inner),
    };

    if let Err(e) = built {
        discard_output(&paths.output);
        return Err(e);
    }
    if !paths.output.is_dir() {
        return Err(SiteError::MissingOutput(paths.output.clone()));
    }
    Ok(paths.output.clone())
}

fn clear_output(output: &Path) -> Result<(), SiteError> {
    if !output.exists() {
        return Ok(());
    }
    fs::remove_dir_all(output).map_err(|source| SiteError::Clean {
        path: output.to_path_buf(),
        source,
    })
}

fn discard_output(output: &Path) {
    if !output.exists() {
        return;
    }
    if let Err(e) = fs::remove_dir_all(output) {
        warn!(output = %output.display(), "could not remove partial output: {e}");
    }
}
