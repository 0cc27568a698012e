//! Scoped mutation of the generator configuration document.
//!
//! Draft builds need the generator to see a different base URL, but the
//! document on disk must be byte-identical to its original state once the
//! build is over, whatever happened during it. [`ConfigScope`] is the guard
//! that makes this hold:
//!
//! - **Acquire**: read the original bytes, write them to a sidecar backup
//!   (`<document>.sitepub-backup`, created exclusively), then write the
//!   transformed document.
//! - **Release**: write the original bytes back and remove the backup.
//!   [`ConfigScope::restore`] does this explicitly and reports failure;
//!   `Drop` does it for every other exit path, panics included.
//!
//! The backup doubles as the single-writer lock: while it exists a second
//! scope on the same document refuses to start. If the process dies without
//! unwinding (SIGKILL, power loss) the backup is left behind and
//! [`recover`] puts it back.

use regex::Regex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info};

const BACKUP_SUFFIX: &str = "sitepub-backup";

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("cannot read config document {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "config document {path} is already being modified (backup {backup} exists); \
         run `sitepub restore-config` if no other publish is running"
    )]
    Busy { path: PathBuf, backup: PathBuf },
    #[error("cannot write backup {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot transform config document {path}: {reason}")]
    Transform { path: PathBuf, reason: String },
    #[error("cannot write transformed config document {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "FAILED TO RESTORE config document {path}: {source}; \
         the original is preserved at {backup}"
    )]
    Restore {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Path of the sidecar backup for a document.
pub fn backup_path(document: &Path) -> PathBuf {
    let mut name = document
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(BACKUP_SUFFIX);
    document.with_file_name(name)
}

/// Guard over a temporarily transformed document.
#[derive(Debug)]
pub struct ConfigScope {
    path: PathBuf,
    backup: PathBuf,
    original: Vec<u8>,
    restored: bool,
}

impl ConfigScope {
    /// Save the original bytes, then replace the document with
    /// `transform(original)`.
    ///
    /// If the transformation fails or the write fails the document is left
    /// untouched (or restored) and no backup remains.
    pub fn acquire<F>(path: &Path, transform: F) -> Result<Self, ScopeError>
    where
        F: FnOnce(&str) -> Result<String, String>,
    {
        let original = fs::read(path).map_err(|source| ScopeError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let backup = backup_path(path);

        write_exclusive(&backup, &original).map_err(|source| {
            if source.kind() == std::io::ErrorKind::AlreadyExists {
                ScopeError::Busy {
                    path: path.to_path_buf(),
                    backup: backup.clone(),
                }
            } else {
                ScopeError::Backup {
                    path: backup.clone(),
                    source,
                }
            }
        })?;

        // From here on the guard owns the backup: early returns go through Drop.
        let mut scope = Self {
            path: path.to_path_buf(),
            backup,
            original,
            restored: false,
        };

        let text = String::from_utf8_lossy(&scope.original).into_owned();
        let transformed = match transform(&text) {
            Ok(t) => t,
            Err(reason) => {
                scope.restore()?;
                return Err(ScopeError::Transform {
                    path: path.to_path_buf(),
                    reason,
                });
            }
        };

        if let Err(source) = fs::write(path, transformed.as_bytes()) {
            scope.restore()?;
            return Err(ScopeError::Write {
                path: path.to_path_buf(),
                source,
            });
        }

        debug!(path = %path.display(), "config document transformed");
        Ok(scope)
    }

    /// Write the original bytes back and drop the backup.
    pub fn restore(&mut self) -> Result<(), ScopeError> {
        if self.restored {
            return Ok(());
        }
        fs::write(&self.path, &self.original).map_err(|source| ScopeError::Restore {
            path: self.path.clone(),
            backup: self.backup.clone(),
            source,
        })?;
        self.restored = true;
        // The document is already correct; a stale backup only blocks the
        // next run and is reported there.
        if let Err(e) = fs::remove_file(&self.backup) {
            error!(backup = %self.backup.display(), "could not remove config backup: {e}");
        }
        debug!(path = %self.path.display(), "config document restored");
        Ok(())
    }
}

impl Drop for ConfigScope {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!("{e}");
        }
    }
}

/// Run `body` with the document transformed, restoring it on every exit path.
///
/// The outer `Result` carries scope failures (acquire or restore); a restore
/// failure wins over whatever `body` returned. The inner value is `body`'s
/// own result, returned untouched.
pub fn with_scope<T, E, F, B>(path: &Path, transform: F, body: B) -> Result<Result<T, E>, ScopeError>
where
    F: FnOnce(&str) -> Result<String, String>,
    B: FnOnce() -> Result<T, E>,
{
    let mut scope = ConfigScope::acquire(path, transform)?;
    let outcome = body();
    scope.restore()?;
    Ok(outcome)
}

/// Fail if a backup of `path` exists.
///
/// Builds that read the document without a scope call this: while a backup
/// is present the document may still hold a transformed value, either because
/// a scope is active on it or because a run died before restoring it.
pub fn ensure_unmodified(path: &Path) -> Result<(), ScopeError> {
    let backup = backup_path(path);
    if backup.exists() {
        return Err(ScopeError::Busy {
            path: path.to_path_buf(),
            backup,
        });
    }
    Ok(())
}

/// Put back a backup left behind by a run that died without unwinding.
///
/// Returns `true` when a backup was found and restored.
pub fn recover(path: &Path) -> Result<bool, ScopeError> {
    let backup = backup_path(path);
    if !backup.exists() {
        return Ok(false);
    }
    let original = fs::read(&backup).map_err(|source| ScopeError::Read {
        path: backup.clone(),
        source,
    })?;
    fs::write(path, &original).map_err(|source| ScopeError::Restore {
        path: path.to_path_buf(),
        backup: backup.clone(),
        source,
    })?;
    fs::remove_file(&backup).map_err(|source| ScopeError::Backup {
        path: backup.clone(),
        source,
    })?;
    info!(path = %path.display(), "restored config document from leftover backup");
    Ok(true)
}

fn write_exclusive(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Rewrite the top-level `key = "..."` assignment of a TOML document.
///
/// Only the value is replaced; every other byte, comments and layout
/// included, is preserved. Assignments inside `[tables]` are ignored. A
/// document without the key is an error so a draft can never be built
/// against the production URL.
pub fn set_base_url(document: &str, key: &str, url: &str) -> Result<String, String> {
    let pattern = format!(
        r#"^(?P<lead>[ \t]*{}[ \t]*=[ \t]*)(?:"[^"\n]*"|'[^'\n]*')"#,
        regex::escape(key)
    );
    let re = Regex::new(&pattern).map_err(|e| e.to_string())?;

    let mut offset = 0;
    for line in document.split_inclusive('\n') {
        if line.trim_start().starts_with('[') {
            break;
        }
        if let Some(caps) = re.captures(line) {
            let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
            let lead = caps.name("lead").map(|m| m.as_str()).unwrap_or_default();
            let mut out = String::with_capacity(document.len() + url.len());
            out.push_str(&document[..offset + whole.start]);
            out.push_str(lead);
            out.push_str(&toml_string(url));
            out.push_str(&document[offset + whole.end..]);
            return Ok(out);
        }
        offset += line.len();
    }
    Err(format!("no top-level `{key}` assignment found"))
}

fn toml_string(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
