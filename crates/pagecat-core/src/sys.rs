//! Thin libc veneer for the handful of system queries the engine needs.
//!
//! Every wrapper returns `io::Result` carrying the raw errno, so callers can
//! decide which failures are fatal. Only the sequential-access advice and the
//! block-size probe are allowed to fail quietly; that policy lives in the
//! callers, not here.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, IntoRawFd, OwnedFd, RawFd};

/// Page size assumed when `sysconf(_SC_PAGESIZE)` is unavailable.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Raw `sysconf(_SC_PAGESIZE)`; `None` when the query reports failure.
#[must_use]
pub fn query_page_size() -> Option<usize> {
    // SAFETY: sysconf has no memory-safety preconditions.
    let ret = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if ret <= 0 { None } else { Some(ret as usize) }
}

/// Page size with the 4096-byte fallback applied.
#[must_use]
pub fn page_size() -> usize {
    query_page_size().unwrap_or(DEFAULT_PAGE_SIZE)
}

/// `fstat(fd).st_blksize`, the filesystem's preferred I/O block size.
///
/// A reported size of zero is returned as-is; filtering is the advisor's job.
pub fn preferred_block_size(fd: BorrowedFd<'_>) -> io::Result<u64> {
    let mut st = std::mem::MaybeUninit::<libc::stat>::zeroed();
    // SAFETY: `st` is a writable `stat` and `fd` is a live descriptor.
    let rc = unsafe { libc::fstat(fd.as_raw_fd(), st.as_mut_ptr()) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fstat succeeded, so the struct is fully initialized.
    let st = unsafe { st.assume_init() };
    Ok(u64::try_from(st.st_blksize).unwrap_or(0))
}

/// `posix_fadvise(fd, 0, 0, POSIX_FADV_SEQUENTIAL)` for the whole file.
///
/// posix_fadvise reports failure through its return value, not errno.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub fn advise_sequential(fd: BorrowedFd<'_>) -> io::Result<()> {
    // SAFETY: advisory call; no memory is touched.
    let rc = unsafe { libc::posix_fadvise(fd.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub fn advise_sequential(_fd: BorrowedFd<'_>) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

/// Close a descriptor and report the kernel's verdict.
///
/// `OwnedFd`'s drop discards close errors; this path keeps them.
pub fn close(fd: OwnedFd) -> io::Result<()> {
    let raw = fd.into_raw_fd();
    // SAFETY: ownership of `raw` was just released by `into_raw_fd`, so this is
    // the only close of it.
    let rc = unsafe { libc::close(raw) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Unbuffered writer over an inherited descriptor (normally stdout).
///
/// Each `write` is exactly one `write(2)`, so short writes surface to the
/// caller instead of being absorbed by a userspace buffer. The descriptor is
/// borrowed and never closed.
#[derive(Debug)]
pub struct FdWriter {
    fd: RawFd,
}

impl FdWriter {
    /// Writer over `STDOUT_FILENO`.
    #[must_use]
    pub fn stdout() -> Self {
        Self {
            fd: libc::STDOUT_FILENO,
        }
    }
}

impl io::Write for FdWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: `buf` is a valid readable slice for its full length.
        let ret = unsafe { libc::write(self.fd, buf.as_ptr().cast(), buf.len()) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret as usize)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
