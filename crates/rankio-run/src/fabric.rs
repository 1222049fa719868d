//! An in-process forwarding fabric.
//!
//! Each pull source gets a blocking reader task that hands chunks to the
//! worker's output sink and, when console copy is on, to the console. Push
//! targets (worker stdin) are held until [`LocalFabric::forward_stdin`]
//! connects a reader to them.
//!
//! ```text
//!   worker fd ──▶ reader task ──┬──▶ Sink (rank file)
//!                               └──▶ ConsoleWriter
//! ```

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex};

use rankio_kernel::{FabricError, FabricResult, ForwardingFabric, ProcOutput, ProcessName, Sink, StreamTag};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Writes a chunk of worker output to the console.
pub type ConsoleWriter = Arc<dyn Fn(StreamTag, &[u8]) -> io::Result<()> + Send + Sync>;

/// Console writer for the launcher's own stdout/stderr.
pub fn terminal_console() -> ConsoleWriter {
    Arc::new(|tag: StreamTag, data: &[u8]| match tag {
        StreamTag::Stderr => {
            let mut err = io::stderr().lock();
            err.write_all(data)?;
            err.flush()
        }
        _ => {
            let mut out = io::stdout().lock();
            out.write_all(data)?;
            out.flush()
        }
    })
}

/// Where one worker's output goes.
#[derive(Debug, Clone)]
struct Route {
    copy_to_console: bool,
    stdout: Option<Sink>,
    stderr: Option<Sink>,
}

impl Route {
    fn sink_for(&self, tag: StreamTag) -> Option<Sink> {
        match tag {
            StreamTag::Stdout | StreamTag::Merged => self.stdout.as_ref().map(Sink::share),
            StreamTag::Stderr => self.stderr.as_ref().map(Sink::share),
            StreamTag::Stdin => None,
        }
    }
}

#[derive(Default)]
struct State {
    registered: HashSet<(ProcessName, StreamTag)>,
    routes: HashMap<ProcessName, Route>,
    stdin: HashMap<ProcessName, File>,
    readers: Vec<JoinHandle<io::Result<u64>>>,
}

/// Forwarding fabric that relays within the current process.
pub struct LocalFabric {
    runtime: Handle,
    console: ConsoleWriter,
    state: Mutex<State>,
}

impl LocalFabric {
    /// A fabric writing to the terminal, running readers on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self::with_console(runtime, terminal_console())
    }

    pub fn with_console(runtime: Handle, console: ConsoleWriter) -> Self {
        Self {
            runtime,
            console,
            state: Mutex::new(State::default()),
        }
    }

    /// Send `output`'s sinks the bytes its worker writes.
    ///
    /// Must be called before the worker's pull sources are registered;
    /// without a route, output goes to the console only.
    pub fn route_output(&self, output: &ProcOutput) {
        let route = Route {
            copy_to_console: output.copy_to_console,
            stdout: output.sink_for(StreamTag::Stdout).map(Sink::share),
            stderr: output.sink_for(StreamTag::Stderr).map(Sink::share),
        };
        self.lock().routes.insert(output.name, route);
    }

    /// Copy `input` into `name`'s stdin until either side closes.
    ///
    /// Returns false when no stdin push target is registered for `name`.
    pub fn forward_stdin<R>(&self, name: &ProcessName, mut input: R) -> bool
    where
        R: Read + Send + 'static,
    {
        let Some(mut target) = self.lock().stdin.remove(name) else {
            return false;
        };
        let name = *name;
        // Not tracked by drain(): the launcher's stdin may never reach EOF.
        self.runtime.spawn_blocking(move || match io::copy(&mut input, &mut target) {
            Ok(n) => tracing::debug!(%name, bytes = n, "stdin closed"),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!(%name, "worker closed stdin")
            }
            Err(e) => tracing::warn!(%name, "stdin forwarding failed: {}", e),
        });
        true
    }

    /// Wait for every pull source to reach end-of-stream, then drop the
    /// routes so their sinks close.
    pub async fn drain(&self) -> io::Result<u64> {
        let readers = std::mem::take(&mut self.lock().readers);
        let mut total = 0;
        let mut first_err = None;
        for reader in readers {
            match reader.await {
                Ok(Ok(n)) => total += n,
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(e) => {
                    first_err.get_or_insert(io::Error::other(e));
                }
            }
        }
        self.lock().routes.clear();
        match first_err {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    fn claim(&self, name: &ProcessName, tag: StreamTag) -> FabricResult<()> {
        if self.lock().registered.insert((*name, tag)) {
            Ok(())
        } else {
            Err(FabricError::AlreadyRegistered { name: *name, tag })
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ForwardingFabric for LocalFabric {
    fn push(&self, name: &ProcessName, tag: StreamTag, fd: OwnedFd) -> FabricResult<()> {
        if tag != StreamTag::Stdin {
            return Err(FabricError::Rejected {
                name: *name,
                tag,
                reason: "only stdin can be pushed".to_string(),
            });
        }
        self.claim(name, tag)?;
        self.lock().stdin.insert(*name, File::from(fd));
        tracing::debug!(%name, "stdin push target held");
        Ok(())
    }

    fn pull(&self, name: &ProcessName, tag: StreamTag, fd: OwnedFd) -> FabricResult<()> {
        if !tag.is_output() {
            return Err(FabricError::Rejected {
                name: *name,
                tag,
                reason: "stdin cannot be pulled".to_string(),
            });
        }
        self.claim(name, tag)?;

        let mut state = self.lock();
        let (sink, copy) = match state.routes.get(name) {
            Some(route) => {
                let sink = route.sink_for(tag);
                let copy = route.copy_to_console || sink.is_none();
                (sink, copy)
            }
            None => (None, true),
        };
        let console = copy.then(|| self.console.clone());
        let source = File::from(fd);
        let name = *name;

        let reader = self
            .runtime
            .spawn_blocking(move || relay(name, tag, source, sink, console));
        state.readers.push(reader);
        tracing::debug!(%name, %tag, "pull source reading");
        Ok(())
    }
}

/// Read `source` to end-of-stream, delivering each chunk.
///
/// A pty master reports `EIO` once the worker side has closed; that ends
/// the stream like EOF.
fn relay(
    name: ProcessName,
    tag: StreamTag,
    mut source: File,
    sink: Option<Sink>,
    console: Option<ConsoleWriter>,
) -> io::Result<u64> {
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => break,
            Err(e) => return Err(e),
        };
        let chunk = &buf[..n];
        if let Some(sink) = &sink {
            sink.deliver(chunk)?;
        }
        if let Some(console) = &console {
            console(tag, chunk)?;
        }
        total += n as u64;
    }
    tracing::debug!(%name, %tag, bytes = total, "pull source closed");
    Ok(total)
}
