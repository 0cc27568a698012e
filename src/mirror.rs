//! Exact-mirror synchronization of the output tree.
//!
//! Stage 5 of the publish pipeline. The destination ends up identical to the
//! selected part of the local tree: missing files are created, changed files
//! are replaced, and files that no longer exist locally are deleted.
//!
//! ## Selection
//!
//! Dot-entries (`.DS_Store`, editor swap files, VCS leftovers) are never
//! mirrored, with one exception: the top-level directories listed in
//! `[mirror].include_hidden` (by default `.well-known`) are mirrored with
//! everything inside them. Hidden entries on the destination are left alone
//! in the same way, so server-side files such as `.htaccess` survive.
//!
//! ## Change detection
//!
//! The pipeline rebuilds the output tree from scratch, so every file has a
//! fresh mtime on every run. Both transports therefore compare content, not
//! timestamps: an unchanged file is never re-sent, and mirroring an
//! unchanged tree twice reports zero transfers and zero deletions.
//!
//! ## Transports
//!
//! | Destination | Transport | Mirror | Exec |
//! |---|---|---|---|
//! | `host = ""` | [`LocalTransport`] | in-process copy, SHA-256 compare | `sh -c` |
//! | `host = "…"` | [`SshTransport`] | `rsync -a --checksum --delete` over ssh | `ssh host …` |
//!
//! [`DefaultTransport`] picks between them per destination.

use crate::config::{MirrorConfig, RemoteConfig};
use crate::exec::{self, ExecError};
use crate::types::Destination;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("cannot walk {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("local tree {} does not exist", .0.display())]
    MissingSource(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> TransportError + '_ {
    move |source| TransportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Counts reported by a mirror run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    /// Files created or replaced on the destination.
    pub transferred: usize,
    /// Files removed from the destination.
    pub deleted: usize,
}

impl MirrorStats {
    pub fn is_noop(&self) -> bool {
        self.transferred == 0 && self.deleted == 0
    }
}

/// Which entries of a tree take part in mirroring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    include_hidden: Vec<String>,
}

impl Selection {
    pub fn new(include_hidden: &[String]) -> Self {
        Self {
            include_hidden: include_hidden.to_vec(),
        }
    }

    pub fn from_config(config: &MirrorConfig) -> Self {
        Self::new(&config.include_hidden)
    }

    /// Whether `rel` (relative to the tree root) is mirrored.
    pub fn includes(&self, rel: &Path) -> bool {
        let mut components = rel.components().filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy()),
            _ => None,
        });
        let Some(first) = components.next() else {
            return true;
        };
        if first.starts_with('.') {
            return self.include_hidden.iter().any(|d| d.as_str() == first);
        }
        components.all(|name| !name.starts_with('.'))
    }

    /// rsync filter arguments expressing the same selection. Order matters:
    /// rsync applies the first matching rule.
    pub fn rsync_filters(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .include_hidden
            .iter()
            .map(|d| format!("--include=/{d}/***"))
            .collect();
        args.push("--exclude=.*".to_string());
        args
    }
}

/// The remote-execution collaborator.
pub trait Transport {
    /// Make `dest` an exact mirror of the selected part of `local`.
    fn mirror(
        &self,
        local: &Path,
        dest: &Destination,
        selection: &Selection,
    ) -> Result<MirrorStats, TransportError>;

    /// Run a shell command on `host` and return its stdout.
    fn exec(&self, host: &str, command: &str) -> Result<String, TransportError>;
}

// ============================================================================
// Local transport
// ============================================================================

/// Mirrors onto the local filesystem and runs commands through `sh -c`.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    timeout: Duration,
}

impl LocalTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(RemoteConfig::default().timeout())
    }
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn same_content(a: &Path, b: &Path) -> io::Result<bool> {
    let (ma, mb) = (fs::metadata(a)?, fs::metadata(b)?);
    if !mb.is_file() || ma.len() != mb.len() {
        return Ok(false);
    }
    Ok(hash_file(a)? == hash_file(b)?)
}

fn walk(
    root: &Path,
    selection: &Selection,
    contents_first: bool,
) -> impl Iterator<Item = Result<walkdir::DirEntry, TransportError>> {
    let root_buf = root.to_path_buf();
    let sel = selection.clone();
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .contents_first(contents_first)
        .into_iter()
        .filter_entry(move |e| {
            e.path()
                .strip_prefix(&root_buf)
                .map(|rel| sel.includes(rel))
                .unwrap_or(false)
        })
        .map(move |r| {
            r.map_err(|source| TransportError::Walk {
                path: source.path().map(Path::to_path_buf).unwrap_or_default(),
                source,
            })
        })
}

fn relative(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

impl Transport for LocalTransport {
    fn mirror(
        &self,
        local: &Path,
        dest: &Destination,
        selection: &Selection,
    ) -> Result<MirrorStats, TransportError> {
        if !local.is_dir() {
            return Err(TransportError::MissingSource(local.to_path_buf()));
        }
        let target = dest.path_buf();
        fs::create_dir_all(&target).map_err(io_err(&target))?;

        let mut stats = MirrorStats::default();
        let mut wanted: HashSet<PathBuf> = HashSet::new();

        for entry in walk(local, selection, false) {
            let entry = entry?;
            let rel = relative(local, entry.path());
            let to = target.join(&rel);
            wanted.insert(rel);

            if entry.file_type().is_dir() {
                if to.exists() && !to.is_dir() {
                    fs::remove_file(&to).map_err(io_err(&to))?;
                    stats.deleted += 1;
                }
                fs::create_dir_all(&to).map_err(io_err(&to))?;
                continue;
            }

            if to.is_dir() {
                fs::remove_dir_all(&to).map_err(io_err(&to))?;
                stats.deleted += 1;
            } else if to.exists() && same_content(entry.path(), &to).map_err(io_err(&to))? {
                continue;
            }
            fs::copy(entry.path(), &to).map_err(io_err(&to))?;
            debug!(file = %to.display(), "transferred");
            stats.transferred += 1;
        }

        // Deepest entries first so directories are empty by the time we see them.
        for entry in walk(&target, selection, true) {
            let entry = entry?;
            let rel = relative(&target, entry.path());
            if wanted.contains(&rel) {
                continue;
            }
            let path = entry.path();
            if entry.file_type().is_dir() {
                // Hidden entries are outside the selection and may keep it alive.
                let empty = fs::read_dir(path).map_err(io_err(path))?.next().is_none();
                if empty {
                    fs::remove_dir(path).map_err(io_err(path))?;
                }
            } else {
                fs::remove_file(path).map_err(io_err(path))?;
                debug!(file = %path.display(), "deleted");
                stats.deleted += 1;
            }
        }

        Ok(stats)
    }

    fn exec(&self, _host: &str, command: &str) -> Result<String, TransportError> {
        let out = exec::run(
            Command::new("sh").arg("-c").arg(command),
            Some(self.timeout),
        )?;
        Ok(out.stdout)
    }
}

// ============================================================================
// SSH transport
// ============================================================================

/// Mirrors with `rsync` over `ssh` and runs commands with `ssh`.
#[derive(Debug, Clone)]
pub struct SshTransport {
    rsync: String,
    ssh: String,
    timeout: Duration,
}

impl SshTransport {
    pub fn new(mirror: &MirrorConfig, remote: &RemoteConfig) -> Self {
        Self {
            rsync: mirror.rsync.clone(),
            ssh: mirror.ssh.clone(),
            timeout: remote.timeout(),
        }
    }

    /// ssh invocation that fails instead of prompting.
    fn ssh_command_line(&self) -> String {
        format!("{} -o BatchMode=yes", self.ssh)
    }

    fn rsync_command(&self, local: &Path, dest: &Destination, selection: &Selection) -> Command {
        let mut cmd = Command::new(&self.rsync);
        cmd.args([
            "--archive",
            "--checksum",
            "--delete",
            "--itemize-changes",
        ]);
        cmd.arg("--rsh").arg(self.ssh_command_line());
        cmd.args(selection.rsync_filters());
        // Trailing slashes: copy the contents of `local` into `path`.
        cmd.arg(format!("{}/", local.display()));
        cmd.arg(format!(
            "{}:{}/",
            dest.host,
            dest.path.trim_end_matches('/')
        ));
        cmd
    }

    fn ssh_command(&self, host: &str, command: &str) -> Command {
        let mut cmd = Command::new(&self.ssh);
        cmd.args(["-o", "BatchMode=yes", host, command]);
        cmd
    }
}

/// Count file transfers and deletions in `rsync --itemize-changes` output.
///
/// Transfers are items whose update type is `<`, `>` or `c` applied to a
/// file or symlink; attribute-only lines (`.f..t......`) and directory
/// creation are not transfers.
pub fn parse_itemized(output: &str) -> MirrorStats {
    let mut stats = MirrorStats::default();
    for line in output.lines() {
        if line.starts_with("*deleting") {
            stats.deleted += 1;
            continue;
        }
        let mut chars = line.chars();
        let (Some(update), Some(kind)) = (chars.next(), chars.next()) else {
            continue;
        };
        if matches!(update, '<' | '>' | 'c') && matches!(kind, 'f' | 'L') {
            stats.transferred += 1;
        }
    }
    stats
}

impl Transport for SshTransport {
    fn mirror(
        &self,
        local: &Path,
        dest: &Destination,
        selection: &Selection,
    ) -> Result<MirrorStats, TransportError> {
        if !local.is_dir() {
            return Err(TransportError::MissingSource(local.to_path_buf()));
        }
        let out = exec::run(
            &mut self.rsync_command(local, dest, selection),
            Some(self.timeout),
        )?;
        Ok(parse_itemized(&out.stdout))
    }

    fn exec(&self, host: &str, command: &str) -> Result<String, TransportError> {
        let out = exec::run(&mut self.ssh_command(host, command), Some(self.timeout))?;
        Ok(out.stdout)
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Local destinations go through [`LocalTransport`], everything else
/// through [`SshTransport`].
#[derive(Debug, Clone)]
pub struct DefaultTransport {
    local: LocalTransport,
    ssh: SshTransport,
}

impl DefaultTransport {
    pub fn new(mirror: &MirrorConfig, remote: &RemoteConfig) -> Self {
        Self {
            local: LocalTransport::new(remote.timeout()),
            ssh: SshTransport::new(mirror, remote),
        }
    }
}

impl Transport for DefaultTransport {
    fn mirror(
        &self,
        local: &Path,
        dest: &Destination,
        selection: &Selection,
    ) -> Result<MirrorStats, TransportError> {
        if dest.is_local() {
            self.local.mirror(local, dest, selection)
        } else {
            self.ssh.mirror(local, dest, selection)
        }
    }

    fn exec(&self, host: &str, command: &str) -> Result<String, TransportError> {
        if host.is_empty() {
            self.local.exec(host, command)
        } else {
            self.ssh.exec(host, command)
        }
    }
}

/// Mirror `local` to `dest`, logging the outcome.
pub fn mirror(
    transport: &dyn Transport,
    local: &Path,
    dest: &Destination,
    selection: &Selection,
) -> Result<MirrorStats, TransportError> {
    info!(destination = %dest, "mirroring");
    let stats = transport.mirror(local, dest, selection)?;
    info!(
        transferred = stats.transferred,
        deleted = stats.deleted,
        "mirror complete"
    );
    Ok(stats)
}
