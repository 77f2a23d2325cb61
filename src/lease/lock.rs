//! Non-blocking exclusive advisory locks over `flock(2)`.
//!
//! The advisory lock is the single synchronization primitive of the lease
//! protocol. Correctness rests on the kernel releasing it when the holding
//! process dies, which is exactly what distinguishes crash residue from a
//! live owner.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    // SAFETY: flock only inspects the descriptor, which `file` keeps valid
    // for the duration of the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), operation) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Try to take the exclusive lock without blocking.
///
/// `Ok(true)` means the lock is now held via `file`'s descriptor and stays
/// held until [`unlock`] or until every duplicate of the descriptor closes.
/// `Ok(false)` means another process holds it.
pub fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    match flock(file, libc::LOCK_EX | libc::LOCK_NB) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

/// Release a lock previously taken through `file`'s descriptor.
pub fn unlock(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_UN)
}

/// Probe whether the file is currently unlocked.
///
/// Attempts a non-blocking exclusive lock and releases it immediately on
/// success; succeeding proves nobody held it at that instant. `Ok(false)`
/// means some process holds the lock.
pub fn probe_unlocked(file: &File) -> io::Result<bool> {
    if try_lock_exclusive(file)? {
        unlock(file)?;
        Ok(true)
    } else {
        Ok(false)
    }
}
