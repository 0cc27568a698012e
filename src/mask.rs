//! Crawler masking for draft builds.
//!
//! Stage 4, draft mode only. A draft deployment is publicly reachable, so it
//! must tell crawlers to stay away before it leaves the machine:
//!
//! 1. `robots.txt` at the output root is replaced with the draft policy
//!    (`[draft].robots`, by default disallow everything).
//! 2. Every `*.html` file has each `index,follow` directive rewritten to
//!    `noindex`. Matching is case-insensitive, tolerates spaces after the
//!    comma, and leaves an existing `noindex,follow` alone.
//!
//! After rewriting, the tree is scanned again. Any HTML file still carrying
//! the directive fails the stage: publishing an unmasked draft is the one
//! mistake that cannot be taken back once a crawler has seen it.

use regex::bytes::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Name of the robots policy file at the output root.
pub const ROBOTS_FILE: &str = "robots.txt";

/// What the indexing directive becomes.
pub const NOINDEX: &str = "noindex";

static INDEX_FOLLOW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i-u)\bindex\s*,\s*follow\b").expect("directive pattern is valid")
});

#[derive(Error, Debug)]
pub enum MaskError {
    #[error("cannot walk output tree: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("cannot write {}: {source}", .path.display())]
    Robots {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write masked {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} HTML file(s) still allow indexing after masking, first: {}", .files.len(), .files[0].display())]
    Unmasked { files: Vec<PathBuf> },
}

/// What the stage changed.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MaskReport {
    pub html_files: usize,
    pub files_rewritten: usize,
    pub replacements: usize,
}

/// True if `html` carries an `index,follow` directive.
pub fn contains_index_directive(html: &[u8]) -> bool {
    INDEX_FOLLOW.is_match(html)
}

/// Replace every indexing directive in `html`, returning the new bytes and
/// the number of replacements. `None` when nothing matched.
pub fn mask_html(html: &[u8]) -> Option<(Vec<u8>, usize)> {
    let count = INDEX_FOLLOW.find_iter(html).count();
    if count == 0 {
        return None;
    }
    let masked = INDEX_FOLLOW.replace_all(html, NOINDEX.as_bytes()).into_owned();
    Some((masked, count))
}

fn is_html(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("html"))
}

fn html_files(output_dir: &Path) -> Result<Vec<PathBuf>, MaskError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(output_dir).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && is_html(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Overwrite `robots.txt` with `robots`.
pub fn write_robots(output_dir: &Path, robots: &str) -> Result<(), MaskError> {
    let path = output_dir.join(ROBOTS_FILE);
    fs::write(&path, robots).map_err(|source| MaskError::Robots { path, source })
}

/// HTML files under `output_dir` that still carry the directive.
pub fn unmasked_files(output_dir: &Path) -> Result<Vec<PathBuf>, MaskError> {
    let mut offenders = Vec::new();
    for path in html_files(output_dir)? {
        let bytes = fs::read(&path).map_err(|source| MaskError::Read {
            path: path.clone(),
            source,
        })?;
        if contains_index_directive(&bytes) {
            offenders.push(path);
        }
    }
    Ok(offenders)
}

/// Mask the draft tree at `output_dir` and verify the result.
pub fn mask(output_dir: &Path, robots: &str) -> Result<MaskReport, MaskError> {
    write_robots(output_dir, robots)?;

    let files = html_files(output_dir)?;
    let mut report = MaskReport {
        html_files: files.len(),
        ..MaskReport::default()
    };

    for path in &files {
        let bytes = fs::read(path).map_err(|source| MaskError::Read {
            path: path.clone(),
            source,
        })?;
        let Some((masked, count)) = mask_html(&bytes) else {
            continue;
        };
        fs::write(path, masked).map_err(|source| MaskError::Write {
            path: path.clone(),
            source,
        })?;
        debug!(file = %path.display(), count, "masked");
        report.files_rewritten += 1;
        report.replacements += count;
    }

    let offenders = unmasked_files(output_dir)?;
    if !offenders.is_empty() {
        return Err(MaskError::Unmasked { files: offenders });
    }

    info!(
        html_files = report.html_files,
        rewritten = report.files_rewritten,
        "draft output masked"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DRAFT_ROBOTS;
    use tempfile::TempDir;

    const PAGE: &str =
        r#"<head><meta name="robots" content="index,follow"><title>Hi</title></head>"#;

    #[test]
    fn mask_html_rewrites_directive() {
        let (out, n) = mask_html(PAGE.as_bytes()).unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<head><meta name="robots" content="noindex"><title>Hi</title></head>"#
        );
    }

    #[test]
    fn mask_html_is_case_and_space_insensitive() {
        let (out, n) = mask_html(b"INDEX, Follow / index ,follow").unwrap();
        assert_eq!(n, 2);
        assert_eq!(out, b"noindex / noindex");
    }

    #[test]
    fn mask_html_leaves_noindex_alone() {
        assert!(mask_html(br#"content="noindex,follow""#).is_none());
        assert!(mask_html(br#"content="noindex, nofollow""#).is_none());
    }

    #[test]
    fn mask_html_tolerates_invalid_utf8() {
        let mut html = PAGE.as_bytes().to_vec();
        html.extend_from_slice(b"\xff\xfe");
        let (out, _) = mask_html(&html).unwrap();
        assert!(!contains_index_directive(&out));
        assert!(out.ends_with(b"\xff\xfe"));
    }

    #[test]
    fn mask_rewrites_every_html_file_and_robots() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("posts/a")).unwrap();
        fs::write(root.join("index.html"), PAGE).unwrap();
        fs::write(root.join("posts/a/index.html"), PAGE).unwrap();
        fs::write(root.join("posts/plain.HTML"), "<p>no meta</p>").unwrap();
        fs::write(root.join("feed.xml"), "index,follow").unwrap();
        fs::write(root.join(ROBOTS_FILE), "User-agent: *\nAllow: /\n").unwrap();

        let report = mask(root, DRAFT_ROBOTS).unwrap();

        assert_eq!(
            report,
            MaskReport {
                html_files: 3,
                files_rewritten: 2,
                replacements: 2,
            }
        );
        assert!(unmasked_files(root).unwrap().is_empty());
        assert_eq!(fs::read_to_string(root.join(ROBOTS_FILE)).unwrap(), DRAFT_ROBOTS);
        // Only HTML is masked.
        assert_eq!(fs::read_to_string(root.join("feed.xml")).unwrap(), "index,follow");
        assert_eq!(
            fs::read_to_string(root.join("posts/plain.HTML")).unwrap(),
            "<p>no meta</p>"
        );
    }

    #[test]
    fn mask_creates_robots_when_generator_made_none() {
        let tmp = TempDir::new().unwrap();
        mask(tmp.path(), DRAFT_ROBOTS).unwrap();
        assert_eq!(
            fs::read_to_string(tmp.path().join(ROBOTS_FILE)).unwrap(),
            DRAFT_ROBOTS
        );
    }

    #[test]
    fn mask_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("index.html"), PAGE).unwrap();

        mask(tmp.path(), DRAFT_ROBOTS).unwrap();
        let once = fs::read(tmp.path().join("index.html")).unwrap();
        let second = mask(tmp.path(), DRAFT_ROBOTS).unwrap();

        assert_eq!(second.files_rewritten, 0);
        assert_eq!(fs::read(tmp.path().join("index.html")).unwrap(), once);
    }

    #[test]
    fn unmasked_files_lists_offenders() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.html"), PAGE).unwrap();
        fs::write(tmp.path().join("b.html"), "<p></p>").unwrap();
        let offenders = unmasked_files(tmp.path()).unwrap();
        assert_eq!(offenders, vec![tmp.path().join("a.html")]);
    }
}
