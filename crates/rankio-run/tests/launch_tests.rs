//! Launching real workers through the local fabric.

use std::fs;
use std::sync::{Arc, Mutex};

use rankio_kernel::{ForwardConfig, ForwardingFabric, ProcessName, StreamTag};
use rankio_run::{ConsoleWriter, LaunchOptions, LocalFabric, launch_with};
use tempfile::TempDir;
use tokio::runtime::Handle;

type Captured = Arc<Mutex<Vec<(StreamTag, Vec<u8>)>>>;

fn capture() -> (LocalFabric, Captured) {
    let captured: Captured = Arc::default();
    let store = captured.clone();
    let console: ConsoleWriter = Arc::new(move |tag: StreamTag, data: &[u8]| {
        store.lock().unwrap().push((tag, data.to_vec()));
        Ok(())
    });
    (LocalFabric::with_console(Handle::current(), console), captured)
}

fn console_text(captured: &Captured, tag: StreamTag) -> String {
    let bytes: Vec<u8> = captured
        .lock()
        .unwrap()
        .iter()
        .filter(|(t, _)| *t == tag)
        .flat_map(|(_, d)| d.clone())
        .collect();
    String::from_utf8(bytes).unwrap()
}

fn sh(script: &str, forward: ForwardConfig) -> LaunchOptions {
    LaunchOptions {
        forward,
        jobid: 1,
        num_procs: 1,
        rank: 0,
        command: vec!["/bin/sh".into(), "-c".into(), script.into()],
    }
}

fn pipes() -> ForwardConfig {
    ForwardConfig::default().with_pty(false)
}

#[tokio::test(flavor = "multi_thread")]
async fn console_receives_both_streams() {
    let (fabric, captured) = capture();
    let code = launch_with(&sh("echo hello; echo oops >&2", pipes()), &fabric)
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(console_text(&captured, StreamTag::Stdout), "hello\n");
    assert_eq!(console_text(&captured, StreamTag::Stderr), "oops\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn exit_status_is_propagated() {
    let (fabric, _) = capture();
    let code = launch_with(&sh("exit 3", pipes()), &fabric).await.unwrap();
    assert_eq!(code, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn signal_death_maps_above_128() {
    let (fabric, _) = capture();
    let code = launch_with(&sh("kill -TERM $$", pipes()), &fabric).await.unwrap();
    assert_eq!(code, 128 + 15);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_program_is_an_error() {
    let (fabric, _) = capture();
    let mut opts = sh("", pipes());
    opts.command = vec!["/definitely/not/a/program".into()];
    assert!(launch_with(&opts, &fabric).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn fd_merge_sends_everything_down_stdout() {
    let (fabric, captured) = capture();
    let mut forward = pipes();
    forward.redirect_stderr_to_stdout = true;

    launch_with(&sh("echo a; echo b >&2; echo c", forward), &fabric)
        .await
        .unwrap();

    assert_eq!(console_text(&captured, StreamTag::Stdout), "a\nb\nc\n");
    assert_eq!(console_text(&captured, StreamTag::Stderr), "");
}

#[tokio::test(flavor = "multi_thread")]
async fn output_files_with_console_copy() {
    let tmp = TempDir::new().unwrap();
    let (fabric, captured) = capture();
    let forward = pipes().with_output_to_file(tmp.path().display().to_string());
    let mut opts = sh("echo to-file", forward);
    opts.jobid = 5;
    opts.num_procs = 200;
    opts.rank = 9;

    launch_with(&opts, &fabric).await.unwrap();

    let rank_dir = tmp.path().join("5").join("rank.09");
    assert_eq!(fs::read_to_string(rank_dir.join("stdout")).unwrap(), "to-file\n");
    assert_eq!(fs::read_to_string(rank_dir.join("stderr")).unwrap(), "");
    assert_eq!(console_text(&captured, StreamTag::Stdout), "to-file\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn nocopy_keeps_output_off_the_console() {
    let tmp = TempDir::new().unwrap();
    let (fabric, captured) = capture();
    let mut forward = pipes().with_output_to_file(format!("{}:nojobid,nocopy", tmp.path().display()));
    forward.merge_stderr_to_stdout = true;

    launch_with(&sh("echo out; echo err >&2", forward), &fabric)
        .await
        .unwrap();

    let stdout = fs::read_to_string(tmp.path().join("rank.0").join("stdout")).unwrap();
    assert!(stdout.contains("out\n") && stdout.contains("err\n"), "got {stdout:?}");
    assert!(!tmp.path().join("rank.0").join("stderr").exists());
    assert!(captured.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_registration_kills_worker_and_drains_readers() {
    let (fabric, _) = capture();
    // Claim the worker's stderr slot up front so registration fails after
    // stdout already has a reader running.
    let (r, w) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC).unwrap();
    fabric.pull(&ProcessName::new(1, 0), StreamTag::Stderr, r).unwrap();
    drop(w);

    let started = std::time::Instant::now();
    let err = launch_with(&sh("echo early; exec sleep 30", pipes()), &fabric)
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("already has a stderr endpoint"), "got {err:#}");
    assert!(started.elapsed() < std::time::Duration::from_secs(20));
    // Nothing left behind for a later drain.
    assert_eq!(fabric.drain().await.unwrap(), 0);
}
