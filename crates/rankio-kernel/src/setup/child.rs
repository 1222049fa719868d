//! Worker-side descriptor rewiring, run after fork and before exec.
//!
//! Everything here runs in a freshly forked child of a possibly
//! multi-threaded daemon, so it sticks to async-signal-safe calls: close,
//! dup2, open, tcgetattr/tcsetattr. No allocation, no logging.

use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::fcntl::{OFlag, open};
use nix::sys::stat::Mode;
use nix::sys::termios::{InputFlags, LocalFlags, OutputFlags, SetArg, tcgetattr, tcsetattr};
use nix::unistd::{close, dup2};
use rankio_types::StreamTag;

use super::IoConfig;
use super::handle::RawPair;
use crate::error::{IofError, IofResult, SetupStep};

const STDIN_FILENO: RawFd = 0;
const STDOUT_FILENO: RawFd = 1;
const STDERR_FILENO: RawFd = 2;

/// The descriptor numbers and flags a worker needs to rewire its stdio.
///
/// Captured from a provisioned [`IoConfig`] before fork. It is `Copy` so a
/// `pre_exec` closure can own it without borrowing the daemon's handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildPlan {
    use_pty: bool,
    redirect_stderr_to_stdout: bool,
    stdin: Option<RawPair>,
    stdout: RawPair,
    stderr: Option<RawPair>,
}

impl ChildPlan {
    /// Capture the plan from a provisioned configuration.
    pub fn new(io: &IoConfig) -> IofResult<Self> {
        let stdout = io
            .stdout()
            .ok_or(IofError::NotProvisioned(StreamTag::Stdout))?
            .raw();
        let stdin = if io.connect_stdin {
            Some(io.stdin().ok_or(IofError::NotProvisioned(StreamTag::Stdin))?.raw())
        } else {
            None
        };
        let stderr = if io.redirect_stderr_to_stdout {
            None
        } else {
            Some(io.stderr().ok_or(IofError::NotProvisioned(StreamTag::Stderr))?.raw())
        };

        Ok(Self {
            use_pty: io.use_pty,
            redirect_stderr_to_stdout: io.redirect_stderr_to_stdout,
            stdin,
            stdout,
            stderr,
        })
    }

    /// Rewire the calling process's standard slots.
    ///
    /// Must only be called in the forked worker. The daemon's own slots 0–2
    /// must have been open at allocation time, so that no allocated
    /// descriptor sits on a standard slot except by explicit dup.
    ///
    /// Any error means the worker image must not be exec'd.
    pub fn apply(&self) -> IofResult<()> {
        // Daemon-facing halves: the worker never touches them.
        if let Some(stdin) = self.stdin {
            close_unused(stdin.write)?;
        }
        close_unused(self.stdout.read)?;
        if let Some(stderr) = self.stderr {
            close_unused(stderr.read)?;
        }

        let out = self.stdout.write;
        if self.use_pty {
            raw_terminal(out)?;
        }
        if self.use_pty || out != STDOUT_FILENO {
            dup_onto(out, STDOUT_FILENO, SetupStep::DupStdout)?;
            if self.redirect_stderr_to_stdout {
                dup_onto(out, STDERR_FILENO, SetupStep::DupStderr)?;
            }
            close_original(out)?;
        }

        match self.stdin {
            Some(stdin) if stdin.read != STDIN_FILENO => {
                dup_onto(stdin.read, STDIN_FILENO, SetupStep::DupStdin)?;
                close_original(stdin.read)?;
            }
            Some(_) => {}
            None => null_stdin()?,
        }

        if let Some(stderr) = self.stderr
            && stderr.write != STDERR_FILENO
        {
            dup_onto(stderr.write, STDERR_FILENO, SetupStep::DupStderr)?;
            close_original(stderr.write)?;
        }

        Ok(())
    }

    /// Run [`apply`](Self::apply) in `cmd`'s child between fork and exec.
    pub fn install(self, cmd: &mut Command) -> &mut Command {
        // SAFETY: `apply` only performs async-signal-safe descriptor and
        // termios calls and builds its errors without allocating.
        unsafe { cmd.pre_exec(move || self.apply().map_err(io::Error::from)) }
    }
}

/// Turn off echo and line translation on the worker's terminal half, so the
/// pty carries bytes like a pipe while still looking like a terminal.
fn raw_terminal(fd: RawFd) -> IofResult<()> {
    // SAFETY: `fd` is the pty slave, open for the whole call.
    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut attrs = tcgetattr(fd).map_err(IofError::TerminalConfig)?;

    attrs.local_flags.remove(
        LocalFlags::ECHO
            | LocalFlags::ECHOE
            | LocalFlags::ECHOK
            | LocalFlags::ECHOCTL
            | LocalFlags::ECHOKE
            | LocalFlags::ECHONL,
    );
    attrs.input_flags.remove(
        InputFlags::ICRNL | InputFlags::INLCR | InputFlags::ISTRIP | InputFlags::INPCK | InputFlags::IXON,
    );
    attrs.output_flags.remove(OutputFlags::OCRNL | OutputFlags::ONLCR);

    tcsetattr(fd, SetArg::TCSANOW, &attrs).map_err(IofError::TerminalConfig)
}

/// Point stdin at the null device so reads see EOF at once.
fn null_stdin() -> IofResult<()> {
    let fd = open("/dev/null", OFlag::O_RDONLY, Mode::empty())
        .map_err(|source| IofError::PipeSetup { step: SetupStep::OpenNull, source })?;
    if fd != STDIN_FILENO {
        dup_onto(fd, STDIN_FILENO, SetupStep::DupNull)?;
        close_original(fd)?;
    }
    Ok(())
}

fn dup_onto(fd: RawFd, slot: RawFd, step: SetupStep) -> IofResult<()> {
    dup2(fd, slot)
        .map(|_| ())
        .map_err(|source| IofError::PipeSetup { step, source })
}

fn close_unused(fd: RawFd) -> IofResult<()> {
    close(fd).map_err(|source| IofError::PipeSetup { step: SetupStep::CloseUnused, source })
}

/// Close a descriptor after it was dup'd, unless it is itself a standard slot.
fn close_original(fd: RawFd) -> IofResult<()> {
    if fd <= STDERR_FILENO {
        return Ok(());
    }
    close(fd).map_err(|source| IofError::PipeSetup { step: SetupStep::CloseOriginal, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_prefork;

    #[test]
    fn plan_requires_provisioned_stdout() {
        let io = IoConfig::new();
        let err = ChildPlan::new(&io).unwrap_err();
        assert!(matches!(err, IofError::NotProvisioned(StreamTag::Stdout)));
    }

    #[test]
    fn plan_mirrors_provisioned_pairs() {
        let mut io = IoConfig::new().with_pty(false).with_stdin(true);
        setup_prefork(&mut io).unwrap();
        let plan = ChildPlan::new(&io).unwrap();

        assert_eq!(plan.stdout, io.stdout().unwrap().raw());
        assert_eq!(plan.stdin, Some(io.stdin().unwrap().raw()));
        assert_eq!(plan.stderr, Some(io.stderr().unwrap().raw()));
        assert!(!plan.use_pty);
    }

    #[test]
    fn plan_with_redirect_has_no_stderr() {
        let mut io = IoConfig::new().with_pty(false).with_stderr_to_stdout(true);
        setup_prefork(&mut io).unwrap();
        let plan = ChildPlan::new(&io).unwrap();
        assert_eq!(plan.stderr, None);
        assert!(plan.redirect_stderr_to_stdout);
    }

    #[cfg(feature = "pty")]
    #[test]
    fn raw_terminal_clears_echo_and_translation() {
        use crate::setup::PairKind;
        use std::os::fd::AsRawFd;

        let mut io = IoConfig::new().with_pty(true);
        setup_prefork(&mut io).unwrap();
        let pair = io.stdout().unwrap();
        if pair.kind() != PairKind::Pty {
            // No pty support in this environment.
            return;
        }

        raw_terminal(pair.write().as_raw_fd()).unwrap();

        let attrs = tcgetattr(pair.write()).unwrap();
        assert!(!attrs.local_flags.intersects(LocalFlags::ECHO | LocalFlags::ECHONL));
        assert!(!attrs.input_flags.intersects(InputFlags::ICRNL | InputFlags::IXON));
        assert!(!attrs.output_flags.contains(OutputFlags::ONLCR));
    }

    #[test]
    fn raw_terminal_on_pipe_is_terminal_config_error() {
        use std::os::fd::AsRawFd;

        let (read, _write) = nix::unistd::pipe().unwrap();
        let err = raw_terminal(read.as_raw_fd()).unwrap_err();
        assert!(matches!(err, IofError::TerminalConfig(_)));
    }
}
