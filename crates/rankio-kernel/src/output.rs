//! Output-file routing: per-rank directories and file sinks.
//!
//! When a job asks for output capture to files, each worker gets a
//! directory
//!
//! ```text
//!   <base>[/<local jobid>]/rank.<zero-padded vpid>/stdout
//!                                              /stderr
//! ```
//!
//! and a [`Sink`] per stream writing into it. With job-level stream merge,
//! stderr shares the stdout sink and there is only a `stdout` file.
//!
//! # Directive syntax
//!
//! `<path>[:<directive>[,<directive>...]]`, directives matched without
//! regard to case:
//!
//! | Directive | Effect |
//! |-----------|--------|
//! | `nojobid` | omit the job id path segment |
//! | `nocopy`  | do not also echo captured output to the console |
//!
//! Unrecognized directives are ignored.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use rankio_types::{ProcessName, StreamTag};

use crate::config::ForwardConfig;
use crate::error::{IofError, IofResult};
use crate::sink::{Sink, WriteHandler, verbatim_handler};

/// Where a job's captured output goes, parsed from its directive string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPolicy {
    pub base_dir: PathBuf,
    /// Include the local job id as a path segment.
    pub use_jobid: bool,
    /// Also copy captured output to the console.
    pub copy_to_console: bool,
}

impl OutputPolicy {
    /// Parse `<path>[:<directive>,...]`.
    ///
    /// Only the first `:` separates path from directives.
    pub fn parse(spec: &str) -> Self {
        let (path, directives) = match spec.split_once(':') {
            Some((path, directives)) => (path, directives),
            None => (spec, ""),
        };

        let mut policy = Self {
            base_dir: PathBuf::from(path),
            use_jobid: true,
            copy_to_console: true,
        };

        for directive in directives.split(',').map(str::trim) {
            if directive.eq_ignore_ascii_case("nojobid") {
                policy.use_jobid = false;
            } else if directive.eq_ignore_ascii_case("nocopy") {
                policy.copy_to_console = false;
            } else if !directive.is_empty() {
                tracing::debug!(directive, "ignoring unknown output directive");
            }
        }

        policy
    }

    /// The output directory for `name` in a job of `num_procs` workers.
    pub fn rank_dir(&self, name: &ProcessName, num_procs: u32) -> PathBuf {
        let rank = format!("rank.{:0width$}", name.vpid, width = rank_width(num_procs));
        if self.use_jobid {
            self.base_dir.join(name.local_jobid().to_string()).join(rank)
        } else {
            self.base_dir.join(rank)
        }
    }
}

/// Zero-padding width of the rank in directory names.
///
/// `1 + floor(log10(num_procs / 10))`, i.e. the number of decimal digits of
/// `num_procs / 10`. Jobs with fewer than 10 workers (where the log is
/// undefined) get width 1.
pub fn rank_width(num_procs: u32) -> usize {
    match num_procs / 10 {
        0 => 1,
        tens => tens.ilog10() as usize + 1,
    }
}

/// Creates output directories. Injected so the daemon can route directory
/// creation through its own utility.
pub trait DirCreator: Send + Sync {
    /// Create `path` and any missing parents with permission bits `mode`.
    fn create_dir_all(&self, path: &Path, mode: u32) -> io::Result<()>;
}

/// Directory creation on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsDirCreator;

impl DirCreator for FsDirCreator {
    fn create_dir_all(&self, path: &Path, mode: u32) -> io::Result<()> {
        std::fs::DirBuilder::new().recursive(true).mode(mode).create(path)
    }
}

/// The job attributes output routing reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobOutputAttrs {
    pub num_procs: u32,
    /// Directive string; `None` means no file capture.
    pub output_to_file: Option<String>,
    /// Put stderr in the stdout file.
    pub merge_stderr_to_stdout: bool,
}

impl JobOutputAttrs {
    pub fn from_forward_config(config: &ForwardConfig, num_procs: u32) -> Self {
        Self {
            num_procs,
            output_to_file: config.output_to_file.clone(),
            merge_stderr_to_stdout: config.merge_stderr_to_stdout,
        }
    }
}

/// One output stream of a worker as the daemon tracks it.
#[derive(Debug)]
pub struct OutputChannel {
    pub tag: StreamTag,
    pub sink: Option<Sink>,
}

impl OutputChannel {
    pub fn new(tag: StreamTag) -> Self {
        Self { tag, sink: None }
    }
}

/// Daemon-side output state for one worker.
#[derive(Debug)]
pub struct ProcOutput {
    pub name: ProcessName,
    /// Echo captured output to the console as well.
    pub copy_to_console: bool,
    pub stdout: Option<OutputChannel>,
    pub stderr: Option<OutputChannel>,
}

impl ProcOutput {
    /// A worker with both output streams forwarded and no sinks yet.
    pub fn new(name: ProcessName) -> Self {
        Self {
            name,
            copy_to_console: true,
            stdout: Some(OutputChannel::new(StreamTag::Stdout)),
            stderr: Some(OutputChannel::new(StreamTag::Stderr)),
        }
    }

    /// The sink bytes with `tag` go to, if any.
    pub fn sink_for(&self, tag: StreamTag) -> Option<&Sink> {
        let channel = match tag {
            StreamTag::Stdout | StreamTag::Merged => self.stdout.as_ref(),
            StreamTag::Stderr => self.stderr.as_ref(),
            StreamTag::Stdin => None,
        };
        channel.and_then(|c| c.sink.as_ref())
    }
}

/// Opens per-rank output files and wires them into sinks.
pub struct OutputRouter {
    dirs: Box<dyn DirCreator>,
    handler: WriteHandler,
    file_mode: u32,
    dir_mode: u32,
}

impl OutputRouter {
    /// A router on the local filesystem with the verbatim write handler.
    pub fn new(config: &ForwardConfig) -> Self {
        Self {
            dirs: Box::new(FsDirCreator),
            handler: verbatim_handler(),
            file_mode: config.output_file_mode,
            dir_mode: config.output_dir_mode,
        }
    }

    pub fn with_dir_creator(mut self, dirs: impl DirCreator + 'static) -> Self {
        self.dirs = Box::new(dirs);
        self
    }

    pub fn with_handler(mut self, handler: WriteHandler) -> Self {
        self.handler = handler;
        self
    }

    /// Set up file sinks for `proc` if the job captures output to files.
    ///
    /// Channels that already have a sink are left alone. On a file-open
    /// failure, sinks created before the failure stay in place and the
    /// error is returned; other workers are unaffected.
    #[tracing::instrument(level = "debug", skip(self, job, proc), fields(name = %proc.name))]
    pub fn setup_output_files(&self, job: &JobOutputAttrs, proc: &mut ProcOutput) -> IofResult<()> {
        let Some(spec) = job.output_to_file.as_deref() else {
            return Ok(());
        };

        let policy = OutputPolicy::parse(spec);
        if !policy.copy_to_console {
            proc.copy_to_console = false;
        }

        let outdir = policy.rank_dir(&proc.name, job.num_procs);
        self.dirs
            .create_dir_all(&outdir, self.dir_mode)
            .map_err(|source| {
                tracing::error!("cannot create {}: {}", outdir.display(), source);
                IofError::DirCreate { path: outdir.clone(), source }
            })?;

        let name = proc.name;

        if let Some(channel) = proc.stdout.as_mut()
            && channel.sink.is_none()
        {
            channel.sink = Some(self.open_sink(&outdir, name, StreamTag::Stdout)?);
        }

        if let Some(channel) = proc.stderr.as_mut()
            && channel.sink.is_none()
        {
            let sink = if job.merge_stderr_to_stdout {
                match proc.stdout.as_ref().and_then(|c| c.sink.as_ref()) {
                    Some(stdout) => {
                        let shared = stdout.share();
                        shared.set_tag(StreamTag::Merged);
                        shared
                    }
                    // No stdout stream to share: the combined file is still `stdout`.
                    None => self.open_sink(&outdir, name, StreamTag::Merged)?,
                }
            } else {
                self.open_sink(&outdir, name, StreamTag::Stderr)?
            };
            channel.sink = Some(sink);
        }

        Ok(())
    }

    fn open_sink(&self, outdir: &Path, name: ProcessName, tag: StreamTag) -> IofResult<Sink> {
        let path = outdir.join(tag.file_name());
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .mode(self.file_mode)
            .custom_flags(nix::libc::O_CLOEXEC)
            .open(&path)
            .map_err(|source| {
                tracing::error!("cannot open {}: {}", path.display(), source);
                IofError::FileOpen { path: path.clone(), source }
            })?;

        Ok(Sink::new(name, OwnedFd::from(file), tag, self.handler.clone()))
    }
}

impl std::fmt::Debug for OutputRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputRouter")
            .field("file_mode", &format_args!("{:o}", self.file_mode))
            .field("dir_mode", &format_args!("{:o}", self.dir_mode))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0, 1)]
    #[case::single(5, 1)]
    #[case::nine(9, 1)]
    #[case::ten(10, 1)]
    #[case::ninety_nine(99, 1)]
    #[case::hundred(100, 2)]
    #[case::nine_ninety_nine(999, 2)]
    #[case::thousand(1000, 3)]
    #[case::ten_thousand(10_000, 4)]
    #[case::max(u32::MAX, 9)]
    fn padding_width(#[case] num_procs: u32, #[case] width: usize) {
        assert_eq!(rank_width(num_procs), width);
    }

    #[rstest]
    #[case::plain("/out", true, true)]
    #[case::nojobid("/out:nojobid", false, true)]
    #[case::nocopy("/out:nocopy", true, false)]
    #[case::both("/out:nojobid,nocopy", false, false)]
    #[case::case_insensitive("/out:NoJobId,NOCOPY", false, false)]
    #[case::unknown_ignored("/out:verbose,nocopy", true, false)]
    #[case::empty_directives("/out:", true, true)]
    fn directive_parsing(#[case] spec: &str, #[case] use_jobid: bool, #[case] copy: bool) {
        let policy = OutputPolicy::parse(spec);
        assert_eq!(policy.base_dir, PathBuf::from("/out"));
        assert_eq!(policy.use_jobid, use_jobid);
        assert_eq!(policy.copy_to_console, copy);
    }

    #[test]
    fn rank_dir_pads_vpid() {
        let policy = OutputPolicy::parse("/out");
        let name = ProcessName::new(4, 7);
        assert_eq!(policy.rank_dir(&name, 1000), PathBuf::from("/out/4/rank.007"));
        assert_eq!(policy.rank_dir(&name, 5), PathBuf::from("/out/4/rank.7"));
    }

    #[test]
    fn rank_dir_without_jobid() {
        let policy = OutputPolicy::parse("/out:nojobid");
        let name = ProcessName::new(4, 12);
        assert_eq!(policy.rank_dir(&name, 200), PathBuf::from("/out/rank.12"));
    }

    #[test]
    fn rank_dir_uses_local_jobid() {
        let policy = OutputPolicy::parse("/out");
        let name = ProcessName::new((9 << 16) | 3, 0);
        assert_eq!(policy.rank_dir(&name, 1), PathBuf::from("/out/3/rank.0"));
    }

    #[test]
    fn padded_names_sort_numerically() {
        let policy = OutputPolicy::parse("/out:nojobid");
        let mut dirs: Vec<PathBuf> = (0..1000)
            .map(|vpid| policy.rank_dir(&ProcessName::new(1, vpid), 10_000))
            .collect();
        let numeric = dirs.clone();
        dirs.sort();
        assert_eq!(dirs, numeric);
    }

    #[test]
    fn no_directive_means_no_files() {
        let router = OutputRouter::new(&ForwardConfig::default());
        let mut proc = ProcOutput::new(ProcessName::new(1, 0));
        router.setup_output_files(&JobOutputAttrs::default(), &mut proc).unwrap();
        assert!(proc.sink_for(StreamTag::Stdout).is_none());
        assert!(proc.copy_to_console);
    }
}
