//! Worker stdio setup around the fork boundary.
//!
//! Three steps, run once per spawned worker:
//!
//! 1. [`setup_prefork`] — in the daemon, before fork: allocate a pty or
//!    pipe for stdout, a pipe for stdin (if connected) and a pipe for
//!    stderr (unless it is redirected into stdout).
//! 2. [`ChildPlan::apply`] — in the worker, after fork and before exec:
//!    close the daemon halves, configure the terminal, dup the worker halves
//!    onto slots 0/1/2.
//! 3. [`setup_parent`] — in the daemon, after fork: close the worker halves
//!    and register the daemon halves with the forwarding fabric.
//!
//! ```text
//!              stdin pair          stdout pair          stderr pair
//!   daemon:   [write] ──push      [read] ──pull        [read] ──pull
//!   worker:   [read] → fd 0       [write] → fd 1       [write] → fd 2
//! ```

mod child;
mod handle;
mod parent;
mod prefork;

pub use child::ChildPlan;
pub use handle::{Handle, HandlePair, Owner, PairKind, RawPair};
pub use parent::setup_parent;
pub use prefork::{PtySource, SystemPty, setup_prefork, setup_prefork_with};

use crate::config::ForwardConfig;

/// Stdio configuration for one spawned worker.
///
/// Built before fork with the requested flags; the allocator fills in the
/// descriptor pairs. The rewirer reads it (through a [`ChildPlan`]) in the
/// worker and the registrar consumes it in the daemon.
#[derive(Debug, Default)]
pub struct IoConfig {
    /// Use a pseudo-terminal for stdout. Cleared by the allocator when no
    /// pty can be had.
    pub use_pty: bool,
    /// Connect worker stdin to the fabric.
    pub connect_stdin: bool,
    /// Send worker stderr down the stdout descriptor.
    pub redirect_stderr_to_stdout: bool,
    stdin: Option<HandlePair>,
    stdout: Option<HandlePair>,
    stderr: Option<HandlePair>,
}

impl IoConfig {
    /// A pipe-only configuration with stdin disconnected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the per-worker flags from the job-wide configuration.
    pub fn from_forward_config(config: &ForwardConfig) -> Self {
        Self {
            use_pty: config.use_pty,
            connect_stdin: config.connect_stdin,
            redirect_stderr_to_stdout: config.redirect_stderr_to_stdout,
            ..Self::default()
        }
    }

    pub fn with_pty(mut self, use_pty: bool) -> Self {
        self.use_pty = use_pty;
        self
    }

    pub fn with_stdin(mut self, connect_stdin: bool) -> Self {
        self.connect_stdin = connect_stdin;
        self
    }

    pub fn with_stderr_to_stdout(mut self, redirect: bool) -> Self {
        self.redirect_stderr_to_stdout = redirect;
        self
    }

    pub fn stdin(&self) -> Option<&HandlePair> {
        self.stdin.as_ref()
    }

    pub fn stdout(&self) -> Option<&HandlePair> {
        self.stdout.as_ref()
    }

    pub fn stderr(&self) -> Option<&HandlePair> {
        self.stderr.as_ref()
    }

    /// Whether the allocator has run and filled every pair the flags ask for.
    pub fn is_provisioned(&self) -> bool {
        self.stdout.is_some()
            && (self.stdin.is_some() || !self.connect_stdin)
            && (self.stderr.is_some() || self.redirect_stderr_to_stdout)
    }
}
