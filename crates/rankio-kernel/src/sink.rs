//! Output sinks — destinations the fabric writes forwarded bytes to.
//!
//! A `Sink` is a cloneable, `Send + Sync` handle. Cloning shares the same
//! destination (the merged-output case, where stdout and stderr of one
//! worker land in one file); the descriptor is closed exactly once, when
//! the last handle is released.
//!
//! ```text
//!   stdout channel ──┐
//!                    ├──▶ Sink (Arc) ──▶ write handler ──▶ File
//!   stderr channel ──┘         └── last release ──▶ release hook, close
//! ```
//!
//! Release counting is the `Arc` strong count, so concurrent releases from
//! streams finishing at different times need no extra locking.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex};

use rankio_types::{ProcessName, StreamTag};

/// Called by the fabric for every chunk delivered to a sink.
pub type WriteHandler = Arc<dyn Fn(&Sink, &[u8]) -> io::Result<()> + Send + Sync>;

/// Hook run once when the last handle to a sink is released.
type ReleaseHook = Box<dyn FnOnce(&ProcessName, StreamTag) + Send>;

/// The default write handler: the bytes go to the sink's descriptor verbatim.
pub fn write_verbatim(sink: &Sink, data: &[u8]) -> io::Result<()> {
    sink.write_all(data)
}

/// The default handler as a [`WriteHandler`].
pub fn verbatim_handler() -> WriteHandler {
    Arc::new(write_verbatim)
}

struct SinkShared {
    name: ProcessName,
    fd: RawFd,
    tag: Mutex<StreamTag>,
    target: Mutex<File>,
    handler: WriteHandler,
    on_release: Mutex<Option<ReleaseHook>>,
}

/// Shared handle to one output destination.
#[derive(Clone)]
pub struct Sink {
    shared: Arc<SinkShared>,
}

impl Sink {
    /// Wrap `fd` as the destination for `name`'s `tag` stream.
    pub fn new(name: ProcessName, fd: OwnedFd, tag: StreamTag, handler: WriteHandler) -> Self {
        let raw = fd.as_raw_fd();
        tracing::debug!(%name, %tag, fd = raw, "sink created");
        Self {
            shared: Arc::new(SinkShared {
                name,
                fd: raw,
                tag: Mutex::new(tag),
                target: Mutex::new(File::from(fd)),
                handler,
                on_release: Mutex::new(None),
            }),
        }
    }

    /// Another handle to the same destination.
    pub fn share(&self) -> Sink {
        self.clone()
    }

    pub fn name(&self) -> ProcessName {
        self.shared.name
    }

    pub fn tag(&self) -> StreamTag {
        *self.shared.tag.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-tag the sink, e.g. as `Merged` once stderr shares it with stdout.
    pub fn set_tag(&self, tag: StreamTag) {
        *self.shared.tag.lock().unwrap_or_else(|e| e.into_inner()) = tag;
    }

    /// Number of live handles.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Whether two handles point at the same destination.
    pub fn same_sink(&self, other: &Sink) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Descriptor number of the destination (valid while any handle lives).
    pub fn raw_fd(&self) -> RawFd {
        self.shared.fd
    }

    /// Hand a forwarded chunk to the sink's write handler.
    pub fn deliver(&self, data: &[u8]) -> io::Result<()> {
        (self.shared.handler)(self, data)
    }

    /// Write `data` to the destination in one locked section, so chunks
    /// from streams sharing the sink never interleave mid-chunk.
    pub fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut target = self.shared.target.lock().unwrap_or_else(|e| e.into_inner());
        target.write_all(data)
    }

    /// Run `hook` when the last handle is released, just before the
    /// descriptor is closed. Replaces any earlier hook.
    pub fn on_release(&self, hook: impl FnOnce(&ProcessName, StreamTag) + Send + 'static) {
        *self.shared.on_release.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(hook));
    }

    /// Drop this handle. Returns true if it was the last one and the
    /// descriptor has been closed.
    pub fn release(self) -> bool {
        Arc::into_inner(self.shared).is_some()
    }
}

impl Drop for SinkShared {
    fn drop(&mut self) {
        let tag = *self.tag.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(hook) = self.on_release.get_mut().unwrap_or_else(|e| e.into_inner()).take() {
            hook(&self.name, tag);
        }
        tracing::debug!(name = %self.name, %tag, fd = self.fd, "sink released");
        // `target` closes the descriptor when dropped after this.
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink")
            .field("name", &self.shared.name)
            .field("tag", &self.tag())
            .field("fd", &self.shared.fd)
            .field("refs", &self.ref_count())
            .finish()
    }
}
