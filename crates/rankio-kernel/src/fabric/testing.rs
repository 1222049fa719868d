//! Recording fabric for tests.
//!
//! Keeps every registered descriptor so a test can read a worker's output
//! back (or write its input) exactly as the real fabric would.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::OwnedFd;
use std::sync::Mutex;

use rankio_types::{FabricError, FabricResult, ProcessName, StreamTag};

use super::ForwardingFabric;

/// Which fabric call a registration came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Push,
    Pull,
}

/// One accepted registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub direction: Direction,
    pub name: ProcessName,
    pub tag: StreamTag,
}

type Key = (Direction, ProcessName, StreamTag);

#[derive(Default)]
struct State {
    log: Vec<Registration>,
    seen: HashSet<Key>,
    endpoints: HashMap<Key, OwnedFd>,
    rejected: HashMap<StreamTag, String>,
}

/// Fabric that records registrations and holds on to the descriptors.
#[derive(Default)]
pub struct RecordingFabric {
    state: Mutex<State>,
}

impl RecordingFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every future registration under `tag`.
    pub fn reject(&self, tag: StreamTag, reason: impl Into<String>) {
        self.lock().rejected.insert(tag, reason.into());
    }

    /// Accepted registrations, in call order.
    pub fn registrations(&self) -> Vec<Registration> {
        self.lock().log.clone()
    }

    /// Take a pulled descriptor out of the fabric.
    pub fn take_pull(&self, name: &ProcessName, tag: StreamTag) -> Option<File> {
        self.take(Direction::Pull, name, tag)
    }

    /// Take a pushed descriptor out of the fabric.
    pub fn take_push(&self, name: &ProcessName, tag: StreamTag) -> Option<File> {
        self.take(Direction::Push, name, tag)
    }

    /// Read a pull source to end-of-stream, as the fabric would.
    ///
    /// A pty master reports `EIO` once the worker side is closed; that is
    /// treated as end-of-stream too.
    pub fn read_pull(&self, name: &ProcessName, tag: StreamTag) -> io::Result<Vec<u8>> {
        let mut source = self
            .take_pull(name, tag)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no {tag} pull for {name}")))?;

        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    fn take(&self, direction: Direction, name: &ProcessName, tag: StreamTag) -> Option<File> {
        self.lock()
            .endpoints
            .remove(&(direction, *name, tag))
            .map(File::from)
    }

    fn register(
        &self,
        direction: Direction,
        name: &ProcessName,
        tag: StreamTag,
        fd: OwnedFd,
    ) -> FabricResult<()> {
        let mut state = self.lock();
        if let Some(reason) = state.rejected.get(&tag) {
            return Err(FabricError::Rejected {
                name: *name,
                tag,
                reason: reason.clone(),
            });
        }

        let key = (direction, *name, tag);
        if !state.seen.insert(key) {
            return Err(FabricError::AlreadyRegistered { name: *name, tag });
        }

        state.endpoints.insert(key, fd);
        state.log.push(Registration {
            direction,
            name: *name,
            tag,
        });
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ForwardingFabric for RecordingFabric {
    fn push(&self, name: &ProcessName, tag: StreamTag, fd: OwnedFd) -> FabricResult<()> {
        self.register(Direction::Push, name, tag, fd)
    }

    fn pull(&self, name: &ProcessName, tag: StreamTag, fd: OwnedFd) -> FabricResult<()> {
        self.register(Direction::Pull, name, tag, fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn duplicate_registration_is_refused() {
        let fabric = RecordingFabric::new();
        let name = ProcessName::new(1, 0);
        let (r1, _w1) = nix::unistd::pipe().unwrap();
        let (r2, _w2) = nix::unistd::pipe().unwrap();

        fabric.pull(&name, StreamTag::Stdout, r1).unwrap();
        let err = fabric.pull(&name, StreamTag::Stdout, r2).unwrap_err();
        assert_eq!(err, FabricError::AlreadyRegistered { name, tag: StreamTag::Stdout });
        assert_eq!(fabric.registrations().len(), 1);
    }

    #[test]
    fn rejected_tag_reports_reason() {
        let fabric = RecordingFabric::new();
        fabric.reject(StreamTag::Stdin, "stdin forwarding disabled");
        let (_r, w) = nix::unistd::pipe().unwrap();

        let err = fabric.push(&ProcessName::new(1, 0), StreamTag::Stdin, w).unwrap_err();
        assert!(matches!(err, FabricError::Rejected { ref reason, .. } if reason == "stdin forwarding disabled"));
    }

    #[test]
    fn read_pull_replays_bytes_until_eof() {
        let fabric = RecordingFabric::new();
        let name = ProcessName::new(3, 4);
        let (r, w) = nix::unistd::pipe().unwrap();
        fabric.pull(&name, StreamTag::Stderr, r).unwrap();

        let mut writer = File::from(w);
        writer.write_all(b"abc").unwrap();
        drop(writer);

        assert_eq!(fabric.read_pull(&name, StreamTag::Stderr).unwrap(), b"abc");
        assert!(fabric.read_pull(&name, StreamTag::Stderr).is_err());
    }
}
