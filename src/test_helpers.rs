//! Shared test utilities for the sitepub test suite.
//!
//! Provides a fixture site on disk, image writers, and stand-ins for the
//! external collaborators (generator, transport) that record what the
//! pipeline asked of them.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! site_fixture(tmp.path());
//!
//! let generator = FakeGenerator::new();
//! let transport = RecordingTransport::new();
//! // ... run a stage or the whole pipeline ...
//! assert_eq!(generator.builds(), 1);
//! assert_eq!(transport.exec_calls().len(), 2);
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{ImageBuffer, ImageFormat, Rgb, Rgba};
use regex::Regex;
use walkdir::WalkDir;

use crate::exec::ExecError;
use crate::mirror::{MirrorStats, Selection, Transport, TransportError};
use crate::site::{BuildRequest, Generator, SiteError};
use crate::types::Destination;

// =========================================================================
// Images
// =========================================================================

/// Write a small RGBA PNG with a gradient so it is not trivially compressible.
pub fn write_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([(x * 16) as u8, (y * 16) as u8, 128, 255])
    });
    img.save_with_format(path, ImageFormat::Png).unwrap();
}

/// Write a small RGB JPEG.
pub fn write_jpeg(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 8) as u8, 64, (y * 8) as u8])
    });
    img.save_with_format(path, ImageFormat::Jpeg).unwrap();
}

// =========================================================================
// Fixture site
// =========================================================================

/// Production base URL written into the fixture's `config.toml`.
pub const FIXTURE_BASE_URL: &str = "https://example.com/";

/// `robots.txt` the fake generator emits.
pub const GENERATOR_ROBOTS: &str = "User-agent: *\nAllow: /\n";

/// Lay out a minimal generator site at `root`: one page, one PNG, a
/// `.well-known` entry and a stray dotfile under `static/`.
pub fn site_fixture(root: &Path) {
    fs::create_dir_all(root.join("content")).unwrap();
    fs::write(
        root.join("config.toml"),
        format!(
            "# Site configuration\n\
             baseURL = \"{FIXTURE_BASE_URL}\"\n\
             title = \"Field Notes\"\n\
             \n\
             [params]\n\
             baseURL = \"unrelated\"\n"
        ),
    )
    .unwrap();
    fs::write(root.join("content/_index.md"), "# Field Notes\n").unwrap();
    write_png(&root.join("static/img/logo.png"), 8, 8);
    fs::create_dir_all(root.join("static/.well-known")).unwrap();
    fs::write(
        root.join("static/.well-known/security.txt"),
        "Contact: mailto:security@example.com\n",
    )
    .unwrap();
    fs::write(root.join("static/.DS_Store"), "junk").unwrap();
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Relative paths of every file under `root`, sorted, `/`-separated.
pub fn tree_files(root: &Path) -> Vec<String> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

// =========================================================================
// Generator stand-in
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GeneratorBehavior {
    Render,
    Fail,
    NoOutput,
}

/// Renders the fixture site the way a real generator would: reads the base
/// URL from the config document, writes an index page carrying an
/// `index,follow` robots meta tag, a permissive `robots.txt`, and copies
/// `static/` into the output.
pub struct FakeGenerator {
    behavior: GeneratorBehavior,
    builds: AtomicUsize,
    last_request: Mutex<Option<(PathBuf, bool)>>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self::with(GeneratorBehavior::Render)
    }

    /// Writes a partial page, then reports an error.
    pub fn failing() -> Self {
        Self::with(GeneratorBehavior::Fail)
    }

    /// Reports success without writing anything.
    pub fn silent() -> Self {
        Self::with(GeneratorBehavior::NoOutput)
    }

    fn with(behavior: GeneratorBehavior) -> Self {
        Self {
            behavior,
            builds: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Number of times `build` was called.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Config path and draft flag of the most recent build.
    pub fn last_request(&self) -> Option<(PathBuf, bool)> {
        self.last_request.lock().unwrap().clone()
    }
}

impl Generator for FakeGenerator {
    fn build(&self, request: &BuildRequest<'_>) -> Result<(), SiteError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() =
            Some((request.config.to_path_buf(), request.include_drafts));

        match self.behavior {
            GeneratorBehavior::NoOutput => return Ok(()),
            GeneratorBehavior::Fail => {
                fs::create_dir_all(request.output).unwrap();
                fs::write(request.output.join("index.html"), "<html>").unwrap();
                return Err(SiteError::Reported(
                    "template: index.html:3: unexpected EOF".into(),
                ));
            }
            GeneratorBehavior::Render => {}
        }

        let config = fs::read_to_string(request.config).unwrap();
        let base_url = Regex::new(r#"(?m)^baseURL\s*=\s*"([^"]*)""#)
            .unwrap()
            .captures(&config)
            .map(|c| c[1].to_string())
            .unwrap_or_default();

        fs::create_dir_all(request.output).unwrap();
        fs::write(
            request.output.join("index.html"),
            format!(
                "<!DOCTYPE html>\n<html lang=\"en\"><head>\
                 <meta name=\"robots\" content=\"index,follow\">\
                 <link rel=\"canonical\" href=\"{base_url}\">\
                 </head><body><h1>Field Notes</h1></body></html>\n"
            ),
        )
        .unwrap();
        fs::write(request.output.join("robots.txt"), GENERATOR_ROBOTS).unwrap();

        let static_dir = request.source.join("static");
        if static_dir.is_dir() {
            copy_dir_recursive(&static_dir, request.output).unwrap();
        }
        Ok(())
    }
}

// =========================================================================
// Transport stand-in
// =========================================================================

/// Records every call instead of touching a remote host.
pub struct RecordingTransport {
    mirrors: Mutex<Vec<(PathBuf, Destination)>>,
    execs: Mutex<Vec<(String, String)>>,
    fail_mirror: bool,
    fail_exec_on: Option<String>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            mirrors: Mutex::new(Vec::new()),
            execs: Mutex::new(Vec::new()),
            fail_mirror: false,
            fail_exec_on: None,
        }
    }

    /// Every mirror call fails.
    pub fn failing_mirror() -> Self {
        Self {
            fail_mirror: true,
            ..Self::new()
        }
    }

    /// Exec fails for commands containing `needle`.
    pub fn failing_exec_on(needle: &str) -> Self {
        Self {
            fail_exec_on: Some(needle.to_string()),
            ..Self::new()
        }
    }

    pub fn mirror_calls(&self) -> Vec<(PathBuf, Destination)> {
        self.mirrors.lock().unwrap().clone()
    }

    pub fn exec_calls(&self) -> Vec<(String, String)> {
        self.execs.lock().unwrap().clone()
    }

    fn timeout(program: &str) -> TransportError {
        TransportError::Exec(ExecError::Timeout {
            program: program.to_string(),
            limit: Duration::from_secs(1),
        })
    }
}

impl Transport for RecordingTransport {
    fn mirror(
        &self,
        local: &Path,
        dest: &Destination,
        selection: &Selection,
    ) -> Result<MirrorStats, TransportError> {
        self.mirrors
            .lock()
            .unwrap()
            .push((local.to_path_buf(), dest.clone()));
        if self.fail_mirror {
            return Err(Self::timeout("rsync"));
        }
        let transferred = tree_files(local)
            .iter()
            .filter(|f| selection.includes(Path::new(f)))
            .count();
        Ok(MirrorStats {
            transferred,
            deleted: 0,
        })
    }

    fn exec(&self, host: &str, command: &str) -> Result<String, TransportError> {
        self.execs
            .lock()
            .unwrap()
            .push((host.to_string(), command.to_string()));
        match &self.fail_exec_on {
            Some(needle) if command.contains(needle.as_str()) => Err(Self::timeout("ssh")),
            _ => Ok(String::new()),
        }
    }
}
