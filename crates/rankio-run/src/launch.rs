//! Spawning one worker end to end.

use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus};

use anyhow::{Context, Result};
use rankio_kernel::{
    ChildPlan, IoConfig, JobOutputAttrs, OutputRouter, ProcOutput, ProcessName, StreamTag, setup_parent,
    setup_prefork,
};
use tokio::runtime::Handle;

use crate::args::LaunchOptions;
use crate::fabric::LocalFabric;

/// Launch `opts.command` with forwarding to the terminal and wait for it.
///
/// Returns the worker's exit code.
pub async fn launch(opts: &LaunchOptions) -> Result<i32> {
    let fabric = LocalFabric::new(Handle::current());
    launch_with(opts, &fabric).await
}

/// Launch through a caller-supplied fabric.
#[tracing::instrument(level = "debug", skip(opts, fabric), fields(jobid = opts.jobid, rank = opts.rank))]
pub async fn launch_with(opts: &LaunchOptions, fabric: &LocalFabric) -> Result<i32> {
    let name = ProcessName::new(opts.jobid, opts.rank);

    let mut output = ProcOutput::new(name);
    if opts.forward.redirect_stderr_to_stdout {
        output.stderr = None;
    }
    let attrs = JobOutputAttrs::from_forward_config(&opts.forward, opts.num_procs);
    OutputRouter::new(&opts.forward)
        .setup_output_files(&attrs, &mut output)
        .context("Failed to set up output files")?;
    for tag in [StreamTag::Stdout, StreamTag::Stderr] {
        if let Some(sink) = output.sink_for(tag) {
            sink.on_release(|name, tag| tracing::debug!(%name, %tag, "output file closed"));
        }
    }
    fabric.route_output(&output);
    drop(output);

    let mut io = IoConfig::from_forward_config(&opts.forward);
    setup_prefork(&mut io).context("Failed to allocate worker descriptors")?;
    let plan = ChildPlan::new(&io)?;

    let (program, args) = opts
        .command
        .split_first()
        .context("no worker command given")?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    plan.install(&mut cmd);
    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn {program}"))?;
    tracing::debug!(%name, pid = child.id(), "worker spawned");

    if let Err(e) = setup_parent(&name, io, fabric) {
        abandon_worker(&name, child, fabric).await;
        return Err(e).context("Failed to register worker streams");
    }

    if opts.forward.connect_stdin {
        fabric.forward_stdin(&name, std::io::stdin());
    }

    let status = tokio::task::spawn_blocking(move || child.wait())
        .await
        .context("worker wait task failed")?
        .context("Failed to wait for worker")?;
    fabric.drain().await.context("Failed to relay worker output")?;

    tracing::debug!(%name, %status, "worker exited");
    Ok(exit_code(status))
}

/// Kill a worker whose streams could not all be registered, and wait out
/// the readers already started for the streams that were.
async fn abandon_worker(name: &ProcessName, mut child: Child, fabric: &LocalFabric) {
    if let Err(e) = child.kill() {
        tracing::warn!(%name, "failed to kill worker: {}", e);
    }
    match tokio::task::spawn_blocking(move || child.wait()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!(%name, "failed to reap worker: {}", e),
        Err(e) => tracing::warn!(%name, "worker wait task failed: {}", e),
    }
    if let Err(e) = fabric.drain().await {
        tracing::warn!(%name, "failed to drain worker output: {}", e);
    }
}

/// Shell-style exit code: the status, or 128 plus the terminating signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}
