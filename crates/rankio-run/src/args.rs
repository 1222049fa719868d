//! Command-line parsing.
//!
//! Flags override the loaded [`ForwardConfig`]; everything after `--` (or
//! after the first non-flag argument) is the worker command line.

use anyhow::{Context, Result, bail};
use rankio_kernel::ForwardConfig;

/// What the command line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Help,
    Version,
    Launch(LaunchOptions),
}

/// Everything needed to launch one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub forward: ForwardConfig,
    pub jobid: u32,
    pub num_procs: u32,
    pub rank: u32,
    pub command: Vec<String>,
}

/// Parse `args` (without the program name) on top of `base`.
pub fn parse_args(args: &[String], base: ForwardConfig) -> Result<Invocation> {
    let mut opts = LaunchOptions {
        forward: base,
        jobid: 1,
        num_procs: 1,
        rank: 0,
        command: Vec::new(),
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(Invocation::Help),
            "--version" | "-V" => return Ok(Invocation::Version),
            "--pty" => opts.forward.use_pty = true,
            "--no-pty" => opts.forward.use_pty = false,
            "--stdin" => opts.forward.connect_stdin = true,
            "--merge-fd" => opts.forward.redirect_stderr_to_stdout = true,
            "--merge-file" => opts.forward.merge_stderr_to_stdout = true,
            "--" => {
                opts.command.extend(iter.by_ref().cloned());
                break;
            }
            s if s.starts_with("--output=") => {
                opts.forward.output_to_file = Some(s["--output=".len()..].to_string());
            }
            s if s.starts_with("--jobid=") => opts.jobid = number(s, "--jobid=")?,
            s if s.starts_with("--np=") => opts.num_procs = number(s, "--np=")?,
            s if s.starts_with("--rank=") => opts.rank = number(s, "--rank=")?,
            s if s.starts_with('-') => bail!("Unknown option: {s}"),
            _ => {
                opts.command.push(arg.clone());
                opts.command.extend(iter.by_ref().cloned());
                break;
            }
        }
    }

    if opts.command.is_empty() {
        bail!("no worker command given");
    }
    if opts.rank >= opts.num_procs {
        bail!("--rank={} is outside a job of {} workers", opts.rank, opts.num_procs);
    }

    Ok(Invocation::Launch(opts))
}

fn number(arg: &str, prefix: &str) -> Result<u32> {
    let value = &arg[prefix.len()..];
    value
        .parse()
        .with_context(|| format!("{} expects a number, got {value:?}", prefix.trim_end_matches('=')))
}
