//! rankio-run: launch a single worker with stdio forwarding.
//!
//! A small local stand-in for the launch daemon. It provisions the worker's
//! descriptors, forks it with the rewirer installed, and relays what the
//! worker writes through [`LocalFabric`] to the console and/or per-rank
//! output files.

pub mod args;
pub mod fabric;
pub mod launch;

pub use args::{Invocation, LaunchOptions, parse_args};
pub use fabric::{ConsoleWriter, LocalFabric};
pub use launch::{exit_code, launch, launch_with};
