//! Stream tags — which standard channel a forwarded byte belongs to.

use serde::{Deserialize, Serialize};

/// Tag identifying one of a worker's standard streams.
///
/// `Merged` is only ever carried by an output sink that receives both
/// stdout and stderr of the same worker; descriptors are registered with
/// the fabric under `Stdin`, `Stdout` or `Stderr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTag {
    Stdin,
    Stdout,
    Stderr,
    Merged,
}

impl StreamTag {
    /// File name used for this stream under a rank output directory.
    ///
    /// A merged stream lands in the stdout file.
    pub fn file_name(&self) -> &'static str {
        match self {
            StreamTag::Stdin => "stdin",
            StreamTag::Stdout | StreamTag::Merged => "stdout",
            StreamTag::Stderr => "stderr",
        }
    }

    /// Whether bytes with this tag flow from the worker to the daemon.
    pub fn is_output(&self) -> bool {
        !matches!(self, StreamTag::Stdin)
    }
}

impl std::fmt::Display for StreamTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamTag::Stdin => write!(f, "stdin"),
            StreamTag::Stdout => write!(f, "stdout"),
            StreamTag::Stderr => write!(f, "stderr"),
            StreamTag::Merged => write!(f, "stdmerge"),
        }
    }
}
