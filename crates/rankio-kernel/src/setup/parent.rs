//! Daemon-side registration, run after fork.

use rankio_types::{ProcessName, StreamTag};

use super::IoConfig;
use super::handle::{Handle, HandlePair};
use crate::error::{IofError, IofResult};
use crate::fabric::ForwardingFabric;

/// Close the worker's descriptor halves and hand the daemon's halves to the
/// fabric.
///
/// - stdin (if connected): daemon write end → `push(name, Stdin)`
/// - stdout: daemon read end → `pull(name, Stdout)`
/// - stderr (unless redirected into stdout): daemon read end →
///   `pull(name, Stderr)`
///
/// A refused registration is returned as [`IofError::Registration`] without
/// retrying; descriptors not yet registered are closed on return.
#[tracing::instrument(level = "debug", skip(io, fabric), fields(name = %name, pty = io.use_pty))]
pub fn setup_parent(
    name: &ProcessName,
    io: IoConfig,
    fabric: &dyn ForwardingFabric,
) -> IofResult<()> {
    if !io.is_provisioned() {
        let missing = if io.stdout.is_none() {
            StreamTag::Stdout
        } else if io.connect_stdin && io.stdin.is_none() {
            StreamTag::Stdin
        } else {
            StreamTag::Stderr
        };
        return Err(IofError::NotProvisioned(missing));
    }

    let IoConfig {
        connect_stdin,
        redirect_stderr_to_stdout,
        stdin,
        stdout,
        stderr,
        ..
    } = io;

    // Worker halves first: once closed here, the worker's exit is the only
    // thing keeping the pull sources from EOF.
    let stdin = stdin.filter(|_| connect_stdin).map(release_worker_half);
    let stdout = stdout.map(release_worker_half);
    let stderr = stderr.filter(|_| !redirect_stderr_to_stdout).map(release_worker_half);

    if let Some(daemon) = stdin {
        fabric
            .push(name, StreamTag::Stdin, daemon.into_fd())
            .map_err(registration_failed)?;
        tracing::debug!("stdin registered as push target");
    }

    if let Some(daemon) = stdout {
        fabric
            .pull(name, StreamTag::Stdout, daemon.into_fd())
            .map_err(registration_failed)?;
        tracing::debug!("stdout registered as pull source");
    }

    if let Some(daemon) = stderr {
        fabric
            .pull(name, StreamTag::Stderr, daemon.into_fd())
            .map_err(registration_failed)?;
        tracing::debug!("stderr registered as pull source");
    }

    Ok(())
}

/// Close the worker's half of `pair` and return the daemon's half.
fn release_worker_half(pair: HandlePair) -> Handle {
    let (worker, daemon) = pair.split();
    if let Err(e) = worker.close() {
        tracing::warn!("failed to close worker descriptor half: {}", e);
    }
    daemon
}

fn registration_failed(err: rankio_types::FabricError) -> IofError {
    tracing::error!("fabric registration failed: {}", err);
    IofError::Registration(err)
}
