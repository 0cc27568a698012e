//! Targeted text corrections on generated output.
//!
//! Stage 3 of the publish pipeline. Some generator versions emit small
//! defects (double-escaped entities in the feed, an empty `lang` attribute
//! on the 404 page). Each [`PatchRule`] names one output file and one exact
//! substring replacement.
//!
//! A rule whose file or substring is absent is a no-op: the defect it fixes
//! may simply not exist in this generator version. The file is then not
//! rewritten at all, so its bytes and mtime stay as the generator left them
//! (which also keeps the mirror from re-sending it). Read and write failures
//! are fatal.
//!
//! Rules are validated to be idempotent: `old` must be non-empty and must not
//! occur inside `new`, so a second application finds nothing to replace.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write patched {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One exact substring replacement in one output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchRule {
    /// Path relative to the output root, `/`-separated.
    pub file: String,
    pub old: String,
    pub new: String,
}

impl PatchRule {
    pub fn new(file: impl Into<String>, old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            old: old.into(),
            new: new.into(),
        }
    }

    /// The corrections applied when `publish.toml` defines no `[[patches]]`.
    pub fn stock() -> Vec<PatchRule> {
        vec![
            PatchRule::new("index.xml", "&amp;amp;", "&amp;"),
            PatchRule::new("404.html", r#"<html lang="">"#, r#"<html lang="en">"#),
        ]
    }

    /// Check the rule is well-formed and idempotent.
    pub fn validate(&self) -> Result<(), String> {
        let path = Path::new(&self.file);
        if self.file.is_empty() || path.is_absolute() {
            return Err(format!(
                "file must be a path relative to the output root, got {:?}",
                self.file
            ));
        }
        if path.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(format!("file must not contain `..` or `.`: {:?}", self.file));
        }
        if self.old.is_empty() {
            return Err("old must not be empty".into());
        }
        if self.new.contains(&self.old) {
            return Err(format!(
                "new contains old ({:?}), so applying the rule twice would change the file again",
                self.old
            ));
        }
        Ok(())
    }
}

/// Outcome of one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchOutcome {
    pub file: String,
    /// Occurrences replaced; 0 means the rule was a no-op.
    pub replaced: usize,
}

/// Apply `rules` in order to the tree at `output_dir`.
pub fn apply(output_dir: &Path, rules: &[PatchRule]) -> Result<Vec<PatchOutcome>, PatchError> {
    rules
        .iter()
        .map(|rule| apply_rule(output_dir, rule))
        .collect()
}

/// Apply a single rule. Missing file or missing substring leaves everything
/// untouched.
pub fn apply_rule(output_dir: &Path, rule: &PatchRule) -> Result<PatchOutcome, PatchError> {
    let path = output_dir.join(&rule.file);
    let noop = PatchOutcome {
        file: rule.file.clone(),
        replaced: 0,
    };

    if !path.is_file() {
        warn!(file = %rule.file, "patch target not generated, skipping");
        return Ok(noop);
    }
    let content = fs::read_to_string(&path).map_err(|source| PatchError::Read {
        path: path.clone(),
        source,
    })?;

    let replaced = content.matches(rule.old.as_str()).count();
    if replaced == 0 {
        debug!(file = %rule.file, "patch text not present, skipping");
        return Ok(noop);
    }

    let patched = content.replace(rule.old.as_str(), &rule.new);
    fs::write(&path, patched).map_err(|source| PatchError::Write {
        path: path.clone(),
        source,
    })?;
    debug!(file = %rule.file, replaced, "patched");
    Ok(PatchOutcome {
        file: rule.file.clone(),
        replaced,
    })
}
