//! Pure data types for rankio — process names, stream tags, fabric errors.
//!
//! This crate is a leaf dependency with no async runtime and no descriptor
//! handling. It exists so that fabric implementations and spawn
//! orchestrators can speak rankio's vocabulary without pulling in
//! rankio-kernel's `nix` dependency.

pub mod fabric;
pub mod name;
pub mod tag;

// Flat re-exports for convenience
pub use fabric::*;
pub use name::*;
pub use tag::*;
