//! The cooperative-cancellation channel co-located with each lease file.
//!
//! A single datagram sent to `<id>.sock` asks the owner to shut down; the
//! payload is irrelevant. The endpoint is optional: owners may run without
//! one, and senders must treat a refused or missing endpoint as the intent
//! having succeeded (the owner is already gone).

use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

/// Owner-side abort endpoint, bound at `<id>.sock` next to the lease file.
///
/// The socket file is unlinked when the listener drops, so a completed
/// lease leaves nothing behind.
#[derive(Debug)]
pub struct AbortListener {
    socket: UnixDatagram,
    path: PathBuf,
}

impl AbortListener {
    /// Bind the endpoint, replacing any residue a crashed predecessor left
    /// at the same path.
    pub fn bind(path: &Path) -> io::Result<Self> {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let socket = UnixDatagram::bind(path)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve when any datagram arrives. Must run inside a tokio runtime.
    pub async fn recv(&self) -> io::Result<()> {
        let cloned = self.socket.try_clone()?;
        let socket = tokio::net::UnixDatagram::from_std(cloned)?;
        let mut buf = [0u8; 8];
        socket.recv(&mut buf).await.map(|_| ())
    }

    /// Non-blocking poll for an abort request.
    pub fn try_recv(&self) -> io::Result<bool> {
        let mut buf = [0u8; 8];
        match self.socket.recv(&mut buf) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Drop for AbortListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Fire one abort datagram at an endpoint path.
///
/// Callers own the error policy: the supervisor logs failures at debug and
/// moves on, since a dead owner cannot refuse anything it still needs.
pub fn send_abort(path: &Path) -> io::Result<()> {
    let socket = UnixDatagram::unbound()?;
    socket.send_to(b"abort", path).map(|_| ())
}
