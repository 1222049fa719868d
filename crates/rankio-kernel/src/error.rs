//! Errors raised while provisioning, rewiring and routing worker stdio.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use rankio_types::{FabricError, StreamTag};
use thiserror::Error;

/// Result type for stdio setup operations.
pub type IofResult<T> = Result<T, IofError>;

/// Where in the worker-side rewiring a descriptor operation failed.
///
/// Kept `Copy` and allocation-free: it is constructed between fork and exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    CloseUnused,
    DupStdout,
    DupStderr,
    DupStdin,
    OpenNull,
    DupNull,
    CloseOriginal,
}

impl std::fmt::Display for SetupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SetupStep::CloseUnused => "closing daemon-side descriptor",
            SetupStep::DupStdout => "dup onto stdout",
            SetupStep::DupStderr => "dup onto stderr",
            SetupStep::DupStdin => "dup onto stdin",
            SetupStep::OpenNull => "opening null device",
            SetupStep::DupNull => "dup null device onto stdin",
            SetupStep::CloseOriginal => "closing original descriptor",
        };
        f.write_str(s)
    }
}

/// Stdio setup errors.
///
/// Every variant is fatal to the operation that raised it; nothing here is
/// retried internally. Retry policy belongs to the spawn orchestrator.
#[derive(Debug, Error)]
pub enum IofError {
    /// No descriptors left to build a required pipe. Aborts the spawn
    /// before fork. A pty that cannot be opened is *not* this error; it
    /// falls back to a pipe.
    #[error("out of descriptors allocating {stream} pipe: {source}")]
    DescriptorExhausted {
        stream: StreamTag,
        #[source]
        source: Errno,
    },

    /// Reading or writing the worker terminal's attributes failed.
    #[error("failed to configure worker terminal: {0}")]
    TerminalConfig(#[source] Errno),

    /// Moving a descriptor onto a standard slot failed in the worker. The
    /// worker image must not be exec'd.
    #[error("worker pipe setup failed {step}: {source}")]
    PipeSetup {
        step: SetupStep,
        #[source]
        source: Errno,
    },

    /// A stream the configuration asks for was never provisioned.
    #[error("{0} descriptors were not provisioned")]
    NotProvisioned(StreamTag),

    /// The forwarding fabric refused a push or pull registration.
    #[error("fabric registration failed: {0}")]
    Registration(#[from] FabricError),

    /// An output file could not be created. Fatal for this worker only.
    #[error("cannot open output file {}: {source}", .path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The directory collaborator failed; its error is carried verbatim.
    #[error("cannot create output directory {}: {source}", .path.display())]
    DirCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl IofError {
    /// Stable status code for callers that switch on numeric results.
    pub fn status_code(&self) -> i32 {
        match self {
            IofError::DescriptorExhausted { .. } => -20,
            IofError::TerminalConfig(_) => -21,
            IofError::PipeSetup { .. } => -22,
            IofError::NotProvisioned(_) => -23,
            IofError::Registration(FabricError::AlreadyRegistered { .. }) => -24,
            IofError::Registration(FabricError::Rejected { .. }) => -25,
            IofError::FileOpen { .. } => -26,
            IofError::DirCreate { .. } => -27,
        }
    }

    /// The errno behind this error, when it came from a system call.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            IofError::DescriptorExhausted { source, .. }
            | IofError::PipeSetup { source, .. }
            | IofError::TerminalConfig(source) => Some(*source),
            _ => None,
        }
    }
}

impl From<IofError> for io::Error {
    fn from(err: IofError) -> Self {
        // Errno-backed variants must not allocate: they surface from
        // `Command::pre_exec` in the forked child.
        match err.errno() {
            Some(errno) => io::Error::from_raw_os_error(errno as i32),
            None => io::Error::other(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rankio_types::ProcessName;

    #[test]
    fn status_codes_are_distinct() {
        let name = ProcessName::new(1, 0);
        let errors = [
            IofError::DescriptorExhausted { stream: StreamTag::Stdout, source: Errno::EMFILE },
            IofError::TerminalConfig(Errno::ENOTTY),
            IofError::PipeSetup { step: SetupStep::DupStdout, source: Errno::EBADF },
            IofError::NotProvisioned(StreamTag::Stdin),
            IofError::Registration(FabricError::AlreadyRegistered { name, tag: StreamTag::Stdout }),
            IofError::Registration(FabricError::Rejected {
                name,
                tag: StreamTag::Stdout,
                reason: "closed".into(),
            }),
            IofError::FileOpen { path: "/x".into(), source: io::ErrorKind::NotFound.into() },
            IofError::DirCreate { path: "/x".into(), source: io::ErrorKind::NotFound.into() },
        ];
        let mut codes: Vec<i32> = errors.iter().map(IofError::status_code).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn errno_errors_convert_to_raw_os_error() {
        let err = IofError::PipeSetup { step: SetupStep::DupStdin, source: Errno::EBADF };
        let io_err: io::Error = err.into();
        assert_eq!(io_err.raw_os_error(), Some(Errno::EBADF as i32));
    }

    #[test]
    fn file_open_message_names_path() {
        let err = IofError::FileOpen {
            path: "/tmp/out/rank.3/stderr".into(),
            source: io::ErrorKind::PermissionDenied.into(),
        };
        assert!(err.to_string().contains("/tmp/out/rank.3/stderr"));
    }
}
