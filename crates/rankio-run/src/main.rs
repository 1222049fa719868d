//! rankio-run CLI entry point.
//!
//! Usage:
//!   rankio-run [OPTIONS] -- <command> [args...]

use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use rankio_kernel::ForwardConfig;
use rankio_run::{Invocation, parse_args};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> ExitCode {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = env::args().skip(1).collect();
    let config = ForwardConfig::load().context("Failed to load forwarding config")?;

    let opts = match parse_args(&args, config) {
        Ok(Invocation::Help) => {
            print_help();
            return Ok(ExitCode::SUCCESS);
        }
        Ok(Invocation::Version) => {
            println!(
                "rankio-run {} ({} {})",
                env!("CARGO_PKG_VERSION"),
                env!("RANKIO_GIT_HASH"),
                env!("RANKIO_BUILD_DATE")
            );
            return Ok(ExitCode::SUCCESS);
        }
        Ok(Invocation::Launch(opts)) => opts,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("Run 'rankio-run --help' for usage.");
            return Ok(ExitCode::FAILURE);
        }
    };

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(rankio_run::launch(&opts));
    // A stdin forwarder may still be blocked on our own stdin.
    rt.shutdown_background();

    let code = result?;
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)))
}

fn print_help() {
    println!(
        r#"rankio-run v{}

Launch one worker with forwarded stdio.

Usage:
  rankio-run [OPTIONS] -- <command> [args...]

Options:
  --pty                        Give the worker a pseudo-terminal for stdout
  --no-pty                     Use a pipe for stdout
  --stdin                      Forward our stdin to the worker
  --merge-fd                   Send worker stderr down its stdout descriptor
  --merge-file                 Write stderr into the stdout output file
  --output=<dir>[:opts]        Capture output under <dir>/<jobid>/rank.N/
                               opts: nojobid, nocopy
  --jobid=<n>                  Job id (default: 1)
  --np=<n>                     Workers in the job, sets rank padding (default: 1)
  --rank=<n>                   This worker's rank (default: 0)
  -h, --help                   Show this help
  -V, --version                Show version

Defaults come from $XDG_CONFIG_HOME/rankio/iof.toml.

Examples:
  rankio-run -- hostname
  rankio-run --np=16 --rank=3 --output=/tmp/run:nocopy -- ./solver
  echo data | rankio-run --stdin --no-pty -- wc -c
"#,
        env!("CARGO_PKG_VERSION")
    );
}
