//! Error contract of the forwarding fabric.
//!
//! The fabric itself (the component relaying bytes between daemons) lives
//! outside this workspace; these are the statuses it reports back when a
//! push or pull registration is refused.

use thiserror::Error;

use crate::name::ProcessName;
use crate::tag::StreamTag;

/// Result type for fabric registrations.
pub type FabricResult<T> = Result<T, FabricError>;

/// Why the fabric refused a registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FabricError {
    #[error("{name} already has a {tag} endpoint registered")]
    AlreadyRegistered { name: ProcessName, tag: StreamTag },
    #[error("fabric rejected {tag} endpoint for {name}: {reason}")]
    Rejected {
        name: ProcessName,
        tag: StreamTag,
        reason: String,
    },
}

impl FabricError {
    /// The worker the refused registration was for.
    pub fn name(&self) -> &ProcessName {
        match self {
            FabricError::AlreadyRegistered { name, .. } | FabricError::Rejected { name, .. } => {
                name
            }
        }
    }
}
