//! Descriptor pair allocation, run in the daemon before fork.

use std::os::fd::{AsRawFd, OwnedFd};

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use rankio_types::StreamTag;

use super::IoConfig;
use super::handle::{HandlePair, PairKind};
use crate::error::{IofError, IofResult};

/// Source of pseudo-terminals.
///
/// Returns `(master, slave)`. The allocator treats any error as "no pty
/// available" and falls back to a pipe.
pub trait PtySource {
    fn open_pty(&self) -> Result<(OwnedFd, OwnedFd), Errno>;
}

/// Pseudo-terminals from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPty;

impl PtySource for SystemPty {
    #[cfg(feature = "pty")]
    fn open_pty(&self) -> Result<(OwnedFd, OwnedFd), Errno> {
        let pty = nix::pty::openpty(None, None)?;
        set_cloexec(&pty.master)?;
        set_cloexec(&pty.slave)?;
        Ok((pty.master, pty.slave))
    }

    #[cfg(not(feature = "pty"))]
    fn open_pty(&self) -> Result<(OwnedFd, OwnedFd), Errno> {
        Err(Errno::ENOSYS)
    }
}

/// Allocate the descriptor pairs `io` asks for, using system ptys.
pub fn setup_prefork(io: &mut IoConfig) -> IofResult<()> {
    setup_prefork_with(io, &SystemPty)
}

/// Allocate the descriptor pairs `io` asks for.
///
/// - stdout: a pty from `ptys` when `use_pty` is set; on any pty failure
///   `use_pty` is cleared and a pipe is used instead.
/// - stdin: a pipe when `connect_stdin` is set.
/// - stderr: a pipe unless `redirect_stderr_to_stdout` is set.
///
/// Failing to create a required pipe is [`IofError::DescriptorExhausted`]
/// and the spawn must be abandoned. Pairs already allocated by a failed
/// call are closed when `io` is dropped.
pub fn setup_prefork_with(io: &mut IoConfig, ptys: &dyn PtySource) -> IofResult<()> {
    io.stdout = None;
    if io.use_pty {
        match ptys.open_pty() {
            Ok((master, slave)) => {
                io.stdout = Some(HandlePair::outbound(PairKind::Pty, master, slave));
            }
            Err(e) => {
                tracing::warn!("pty unavailable ({}), falling back to pipe for stdout", e);
                io.use_pty = false;
            }
        }
    }

    if io.stdout.is_none() {
        let (read, write) = stream_pipe(StreamTag::Stdout)?;
        io.stdout = Some(HandlePair::outbound(PairKind::Pipe, read, write));
    }

    io.stdin = if io.connect_stdin {
        let (read, write) = stream_pipe(StreamTag::Stdin)?;
        Some(HandlePair::inbound(PairKind::Pipe, read, write))
    } else {
        None
    };

    io.stderr = if io.redirect_stderr_to_stdout {
        None
    } else {
        let (read, write) = stream_pipe(StreamTag::Stderr)?;
        Some(HandlePair::outbound(PairKind::Pipe, read, write))
    };

    Ok(())
}

/// A close-on-exec pipe, so no stray end leaks into any exec'd image.
fn stream_pipe(stream: StreamTag) -> IofResult<(OwnedFd, OwnedFd)> {
    cloexec_pipe().map_err(|source| {
        tracing::error!(%stream, "pipe allocation failed: {}", source);
        IofError::DescriptorExhausted { stream, source }
    })
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd), Errno> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd), Errno> {
    let (read, write) = nix::unistd::pipe()?;
    set_cloexec(&read)?;
    set_cloexec(&write)?;
    Ok((read, write))
}

fn set_cloexec(fd: &OwnedFd) -> Result<(), Errno> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map(|_| ())
}
