//! The forwarding fabric contract.
//!
//! The fabric relays bytes between daemons; this crate does not implement
//! it. The daemon-side registrar hands it descriptors through two calls:
//!
//! - **push**: the fabric writes to the descriptor (worker stdin).
//! - **pull**: the fabric reads from the descriptor whenever data is
//!   available and forwards it onward (worker stdout/stderr). End-of-stream
//!   on a pull source is the fabric's signal that the worker side is gone.

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::os::fd::OwnedFd;

use rankio_types::{FabricResult, ProcessName, StreamTag};

/// Registration interface of the forwarding fabric.
///
/// Both calls take ownership of the descriptor on success. Registering the
/// same `(name, tag)` twice is refused with
/// [`FabricError::AlreadyRegistered`](rankio_types::FabricError::AlreadyRegistered).
pub trait ForwardingFabric: Send + Sync {
    /// Register a descriptor the fabric writes worker input to.
    fn push(&self, name: &ProcessName, tag: StreamTag, fd: OwnedFd) -> FabricResult<()>;

    /// Register a descriptor the fabric reads worker output from.
    fn pull(&self, name: &ProcessName, tag: StreamTag, fd: OwnedFd) -> FabricResult<()>;
}
