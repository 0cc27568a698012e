//! External `cwebp` backend: one process per image.

use super::backend::{BackendError, ImageBackend};
use super::params::{Encoding, WebpParams};
use crate::exec;
use std::process::Command;

/// Runs `cwebp -quiet [-lossless | -q N] <source> -o <output>`.
pub struct CwebpBackend {
    program: String,
}

impl CwebpBackend {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, params: &WebpParams) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-quiet");
        match params.encoding {
            Encoding::Lossless => {
                cmd.arg("-lossless");
            }
            Encoding::Lossy(quality) => {
                cmd.arg("-q").arg(quality.value().to_string());
            }
        }
        cmd.arg(&params.source).arg("-o").arg(&params.output);
        cmd
    }
}

impl Default for CwebpBackend {
    fn default() -> Self {
        Self::new("cwebp")
    }
}

impl ImageBackend for CwebpBackend {
    fn encode_webp(&self, params: &WebpParams) -> Result<(), BackendError> {
        exec::run(&mut self.command(params), None)?;
        Ok(())
    }
}
