//! External image-builder subprocess contract
//!
//! The image builder is an opaque subprocess taking a build-context archive
//! and a destination reference. Its stdout is line-oriented progress text and
//! exit code 0 means success. The monitor polls the child on a fixed tick,
//! streaming stdout lines as they arrive and accumulating elapsed wait time
//! against a configured ceiling.
//!
//! On timeout the child is NOT terminated: the monitor reports
//! [`BuildOutcome::TimedOut`], the caller skips registry confirmation, and
//! the orphaned process is left to the environment's own lifecycle. This is
//! the documented contract, not an oversight.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::info;

/// Default builder program name, resolved via `PATH`.
pub const DEFAULT_PROGRAM: &str = "kaniko";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to start image builder '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to poll image builder: {0}")]
    Wait(#[source] std::io::Error),
}

/// Terminal result of one monitored build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Child exited with code 0
    Succeeded,
    /// Child exited with a nonzero code (or was killed by a signal)
    Failed(i32),
    /// Accumulated wait exceeded the ceiling; the child was abandoned
    TimedOut,
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildOutcome::Succeeded)
    }
}

/// Bounded-wait configuration for the poll loop.
#[derive(Debug, Clone, Copy)]
pub struct BuildMonitor {
    /// Sleep between polls
    pub wait_interval: Duration,
    /// Ceiling on accumulated wait time
    pub timeout: Duration,
}

impl BuildMonitor {
    pub fn new(wait_interval: Duration, timeout: Duration) -> Self {
        Self {
            wait_interval,
            timeout,
        }
    }

    /// Construct from the settings file's minute-denominated fields.
    pub fn from_minutes(wait_minutes: u64, timeout_minutes: u64) -> Self {
        Self {
            wait_interval: Duration::from_secs(wait_minutes * 60),
            timeout: Duration::from_secs(timeout_minutes * 60),
        }
    }
}

/// Invoker for the external image builder.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    program: PathBuf,
    monitor: BuildMonitor,
}

impl ImageBuilder {
    pub fn new(monitor: BuildMonitor) -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            monitor,
        }
    }

    /// Override the builder program, e.g. for a stub in tests.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// The bounded-wait configuration this builder runs under.
    pub fn monitor(&self) -> &BuildMonitor {
        &self.monitor
    }

    /// Build and push an image from a context tarball.
    ///
    /// `context` is the path of the tar.gz build context; `destination` is a
    /// full `registry/repo:tag` reference.
    pub fn build(&self, context: &Path, destination: &str) -> Result<BuildOutcome, BuildError> {
        let context_ref = format!("tar://{}", context.display());
        info!(
            program = %self.program.display(),
            context = %context_ref,
            destination,
            "invoking image builder"
        );
        let mut command = Command::new(&self.program);
        command
            .arg("--context")
            .arg(&context_ref)
            .arg("--destination")
            .arg(destination);
        run_monitored(command, &self.monitor, |line| info!(builder = line))
    }
}

/// Run a command under the bounded-wait monitor, streaming each stdout line
/// through `on_line` on every poll tick.
pub fn run_monitored(
    mut command: Command,
    monitor: &BuildMonitor,
    mut on_line: impl FnMut(&str),
) -> Result<BuildOutcome, BuildError> {
    command.stdout(Stdio::piped()).stderr(Stdio::null());
    let mut child = command.spawn().map_err(|source| BuildError::Spawn {
        program: format!("{:?}", command.get_program()),
        source,
    })?;

    // Reader thread decouples the child's stdout from the poll cadence.
    let (tx, rx) = mpsc::channel::<String>();
    if let Some(stdout) = child.stdout.take() {
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    }

    let start = Instant::now();
    loop {
        loop {
            match rx.try_recv() {
                Ok(line) => on_line(&line),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if let Some(status) = child.try_wait().map_err(BuildError::Wait)? {
            // Drain anything produced between the last tick and exit.
            while let Ok(line) = rx.try_recv() {
                on_line(&line);
            }
            let code = status.code().unwrap_or(-1);
            return Ok(if code == 0 {
                BuildOutcome::Succeeded
            } else {
                BuildOutcome::Failed(code)
            });
        }

        if start.elapsed() >= monitor.timeout {
            // The child keeps running; the caller abandons the wait.
            return Ok(BuildOutcome::TimedOut);
        }

        thread::sleep(monitor.wait_interval);
    }
}
