//! Read-then-fully-write copy loop.
//!
//! ```text
//!            n > 0                    written == pending
//! Reading ----------> Writing ----------------------------> Reading
//!    |                  |  ^
//!    | 0                |  | short write: written < pending
//!    v                  +--+
//! EndOfInput
//! ```
//!
//! Any read or write error ends the loop immediately. The loop never issues a
//! read while bytes from the previous read are still unwritten, so after a
//! failure the sink holds exactly the bytes read before the failing call.
//! Calls interrupted by a signal (`EINTR`) are restarted.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;

use serde::Serialize;

use crate::buffer::AlignedBuffer;
use crate::error::CopyError;
use crate::sys;

/// A readable input that can answer the advisor's questions.
pub trait InputSource: Read {
    /// Preferred I/O block size (`st_blksize`), unfiltered.
    fn preferred_block_size(&self) -> io::Result<u64>;

    /// Hint that reads will proceed front to back. Best effort.
    fn advise_sequential(&self) -> io::Result<()>;
}

impl InputSource for File {
    fn preferred_block_size(&self) -> io::Result<u64> {
        sys::preferred_block_size(self.as_fd())
    }

    fn advise_sequential(&self) -> io::Result<()> {
        sys::advise_sequential(self.as_fd())
    }
}

/// In-memory input; reports no block size and accepts the hint as a no-op.
impl<T: AsRef<[u8]>> InputSource for io::Cursor<T> {
    fn preferred_block_size(&self) -> io::Result<u64> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    fn advise_sequential(&self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: InputSource + ?Sized> InputSource for &mut S {
    fn preferred_block_size(&self) -> io::Result<u64> {
        (**self).preferred_block_size()
    }

    fn advise_sequential(&self) -> io::Result<()> {
        (**self).advise_sequential()
    }
}

/// Counters for one completed copy.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CopyReport {
    /// Bytes requested per read.
    pub transfer_size: usize,
    pub bytes_copied: u64,
    /// Successful non-empty reads.
    pub reads: u64,
    /// Successful non-empty writes.
    pub writes: u64,
    /// Writes that accepted less than the remaining slice.
    pub short_writes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reading,
    Writing { pending: usize, written: usize },
    EndOfInput,
}

/// The copy state machine over one borrowed buffer.
#[derive(Debug)]
pub struct CopyLoop<'b> {
    buf: &'b mut [u8],
    chunk: usize,
}

impl<'b> CopyLoop<'b> {
    /// Loop that reads up to `transfer_size` bytes at a time into `buffer`.
    ///
    /// `transfer_size` is capped at the buffer length and raised to at least 1.
    pub fn new(buffer: &'b mut AlignedBuffer, transfer_size: usize) -> Self {
        Self::over_slice(buffer.as_mut_slice(), transfer_size)
    }

    /// Same as [`new`](Self::new) over any byte slice.
    pub fn over_slice(buf: &'b mut [u8], transfer_size: usize) -> Self {
        let chunk = transfer_size.clamp(1, buf.len().max(1));
        Self { buf, chunk }
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk
    }

    /// Copy `source` to `sink` until end of input, then flush `sink`.
    pub fn run<R, W>(&mut self, source: &mut R, sink: &mut W) -> Result<CopyReport, CopyError>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let mut report = CopyReport {
            transfer_size: self.chunk,
            ..CopyReport::default()
        };
        if self.buf.is_empty() {
            return Err(CopyError::Read {
                offset: 0,
                source: io::Error::from_raw_os_error(libc::EINVAL),
            });
        }

        let mut state = State::Reading;
        loop {
            state = match state {
                State::Reading => match source.read(&mut self.buf[..self.chunk]) {
                    Ok(0) => State::EndOfInput,
                    Ok(n) => {
                        report.reads += 1;
                        State::Writing {
                            pending: n.min(self.chunk),
                            written: 0,
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => State::Reading,
                    Err(source) => {
                        return Err(CopyError::Read {
                            offset: report.bytes_copied,
                            source,
                        });
                    }
                },
                State::Writing { pending, written } if written == pending => State::Reading,
                State::Writing { pending, written } => {
                    let remaining = pending - written;
                    match sink.write(&self.buf[written..pending]) {
                        Ok(0) => {
                            return Err(CopyError::Write {
                                offset: report.bytes_copied,
                                source: io::Error::new(
                                    io::ErrorKind::WriteZero,
                                    "output accepted zero bytes",
                                ),
                            });
                        }
                        Ok(n) => {
                            let n = n.min(remaining);
                            report.writes += 1;
                            if n < remaining {
                                report.short_writes += 1;
                            }
                            report.bytes_copied += n as u64;
                            State::Writing {
                                pending,
                                written: written + n,
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => state,
                        Err(source) => {
                            return Err(CopyError::Write {
                                offset: report.bytes_copied,
                                source,
                            });
                        }
                    }
                }
                State::EndOfInput => {
                    sink.flush().map_err(|source| CopyError::Write {
                        offset: report.bytes_copied,
                        source,
                    })?;
                    return Ok(report);
                }
            };
        }
    }
}
