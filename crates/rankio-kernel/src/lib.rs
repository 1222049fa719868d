//! rankio-kernel: stdio plumbing for workers spawned by a launch daemon.
//!
//! This crate provides:
//!
//! - **Setup**: descriptor provisioning before fork (`setup::prefork`), the
//!   worker-side rewiring run between fork and exec (`setup::child`), and
//!   the daemon-side registration of surviving descriptor ends with the
//!   forwarding fabric (`setup::parent`)
//! - **Fabric**: the push/pull contract the forwarding fabric implements,
//!   plus a recording fabric for tests
//! - **Sinks**: reference-counted output destinations with write handlers
//! - **Output**: per-rank output directories and file sinks
//! - **Reachable**: the local × remote weight matrix used by path selection
//! - **Config**: job-wide forwarding knobs loaded from TOML
//!
//! # Lifecycle
//!
//! ```text
//!   IoConfig ──▶ setup_prefork ──▶ fork ─┬─▶ ChildPlan::apply (worker) ──▶ exec
//!                                        └─▶ setup_parent (daemon) ──▶ fabric push/pull
//!                                                                         │
//!                              OutputRouter::setup_output_files ──▶ Sink ◀┘
//! ```

pub mod config;
pub mod error;
pub mod fabric;
pub mod output;
pub mod reachable;
pub mod setup;
pub mod sink;

pub use config::ForwardConfig;
pub use error::{IofError, IofResult};
pub use fabric::ForwardingFabric;
pub use output::{JobOutputAttrs, OutputChannel, OutputPolicy, OutputRouter, ProcOutput};
pub use reachable::{Reachability, ReachableError};
pub use setup::{ChildPlan, IoConfig, setup_parent, setup_prefork};
pub use sink::{Sink, WriteHandler};

// Vocabulary types, re-exported so embedders need a single dependency
pub use rankio_types::{FabricError, FabricResult, ProcessName, StreamTag};
