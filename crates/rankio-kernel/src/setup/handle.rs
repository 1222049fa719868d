//! Descriptor halves tagged with the side of the fork that owns them.
//!
//! Every pair the allocator creates has exactly one worker-owned half and
//! one daemon-owned half. Each side closes the half it does not own with a
//! single explicit call, which is what lets the other side see EOF.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};

use nix::errno::Errno;

/// Which side of the fork a descriptor half belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Kept by the spawned worker and moved onto one of its standard slots.
    Worker,
    /// Kept by the daemon and handed to the forwarding fabric.
    Daemon,
}

/// How a pair was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairKind {
    Pipe,
    /// Master (daemon) and slave (worker) of a pseudo-terminal.
    Pty,
}

/// One descriptor half and its owner.
#[derive(Debug)]
pub struct Handle {
    fd: OwnedFd,
    owner: Owner,
}

impl Handle {
    pub fn new(fd: OwnedFd, owner: Owner) -> Self {
        Self { fd, owner }
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Give up the ownership tag and take the descriptor.
    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }

    /// Close the descriptor now, reporting the result.
    ///
    /// Dropping a `Handle` also closes it, but silently.
    pub fn close(self) -> Result<(), Errno> {
        nix::unistd::close(self.fd.into_raw_fd())
    }
}

impl AsRawFd for Handle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for Handle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

/// A read end and a write end carrying one standard stream.
#[derive(Debug)]
pub struct HandlePair {
    kind: PairKind,
    read: Handle,
    write: Handle,
}

impl HandlePair {
    /// A pair carrying bytes into the worker (stdin): the worker reads.
    pub fn inbound(kind: PairKind, read: OwnedFd, write: OwnedFd) -> Self {
        Self {
            kind,
            read: Handle::new(read, Owner::Worker),
            write: Handle::new(write, Owner::Daemon),
        }
    }

    /// A pair carrying bytes out of the worker (stdout/stderr): the worker
    /// writes.
    pub fn outbound(kind: PairKind, read: OwnedFd, write: OwnedFd) -> Self {
        Self {
            kind,
            read: Handle::new(read, Owner::Daemon),
            write: Handle::new(write, Owner::Worker),
        }
    }

    pub fn kind(&self) -> PairKind {
        self.kind
    }

    pub fn read(&self) -> &Handle {
        &self.read
    }

    pub fn write(&self) -> &Handle {
        &self.write
    }

    pub fn worker_half(&self) -> &Handle {
        if self.read.owner == Owner::Worker { &self.read } else { &self.write }
    }

    pub fn daemon_half(&self) -> &Handle {
        if self.read.owner == Owner::Daemon { &self.read } else { &self.write }
    }

    /// Separate the pair into `(worker half, daemon half)`.
    pub fn split(self) -> (Handle, Handle) {
        match self.read.owner {
            Owner::Worker => (self.read, self.write),
            Owner::Daemon => (self.write, self.read),
        }
    }

    /// Raw `(read, write)` descriptor numbers, for use after fork.
    pub(crate) fn raw(&self) -> RawPair {
        RawPair {
            read: self.read.as_raw_fd(),
            write: self.write.as_raw_fd(),
        }
    }
}

/// Descriptor numbers of a pair as seen by a forked child.
///
/// The child inherits the numbers, not the ownership; it closes and dups
/// by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPair {
    pub read: RawFd,
    pub write: RawFd,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (OwnedFd, OwnedFd) {
        nix::unistd::pipe().unwrap()
    }

    #[test]
    fn inbound_pair_gives_read_end_to_worker() {
        let (r, w) = pipe();
        let (r_raw, w_raw) = (r.as_raw_fd(), w.as_raw_fd());
        let pair = HandlePair::inbound(PairKind::Pipe, r, w);
        assert_eq!(pair.worker_half().as_raw_fd(), r_raw);
        assert_eq!(pair.daemon_half().as_raw_fd(), w_raw);
    }

    #[test]
    fn outbound_split_returns_worker_first() {
        let (r, w) = pipe();
        let (r_raw, w_raw) = (r.as_raw_fd(), w.as_raw_fd());
        let (worker, daemon) = HandlePair::outbound(PairKind::Pipe, r, w).split();
        assert_eq!(worker.owner(), Owner::Worker);
        assert_eq!(worker.as_raw_fd(), w_raw);
        assert_eq!(daemon.owner(), Owner::Daemon);
        assert_eq!(daemon.as_raw_fd(), r_raw);
    }

    #[test]
    fn closing_write_half_gives_reader_eof() {
        use std::io::Read;

        let (r, w) = pipe();
        let (worker, daemon) = HandlePair::outbound(PairKind::Pipe, r, w).split();
        worker.close().unwrap();
        let mut reader = std::fs::File::from(daemon.into_fd());
        let mut buf = Vec::new();
        assert_eq!(reader.read_to_end(&mut buf).unwrap(), 0);
    }
}
