//! External process execution with an optional wall-clock limit.
//!
//! Every collaborator the pipeline shells out to (generator, `cwebp`,
//! `rsync`, `ssh`, `sh`) goes through [`run`]. Output is drained on helper
//! threads so a chatty child cannot block on a full pipe while we wait on it.
//! When the limit expires the child is killed and [`ExecError::Timeout`] is
//! returned; nothing is retried here.

use std::ffi::OsStr;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} did not finish within {}s and was killed", .limit.as_secs())]
    Timeout { program: String, limit: Duration },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("IO error while waiting for {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a successful run.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub stdout: String,
    pub stderr: String,
}

/// Render a command line for logs and error messages.
pub fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a: &OsStr| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run `cmd` to completion, killing it if it outlives `limit`.
///
/// A nonzero exit status is an error carrying the child's stderr.
pub fn run(cmd: &mut Command, limit: Option<Duration>) -> Result<Captured, ExecError> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(command = %describe(cmd), "spawning");

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match wait(&mut child, limit) {
        Ok(Some(status)) => status,
        Ok(None) => {
            // Reap the killed child before reporting so no zombie is left.
            let _ = child.kill();
            let _ = child.wait();
            return Err(ExecError::Timeout {
                program,
                limit: limit.unwrap_or_default(),
            });
        }
        Err(source) => return Err(ExecError::Io { program, source }),
    };

    let captured = Captured {
        stdout: join(stdout),
        stderr: join(stderr),
    };

    if !status.success() {
        return Err(ExecError::Failed {
            program,
            status,
            stderr: captured.stderr.trim().to_string(),
        });
    }
    Ok(captured)
}

/// Wait for exit. `Ok(None)` means the limit expired first.
fn wait(child: &mut Child, limit: Option<Duration>) -> std::io::Result<Option<ExitStatus>> {
    let Some(limit) = limit else {
        return child.wait().map(Some);
    };
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Quote a string for a POSIX shell by wrapping it in single quotes.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
