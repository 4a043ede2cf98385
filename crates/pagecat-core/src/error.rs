//! Failure kinds surfaced by the copy pipeline.

use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Terminal failure of one copy invocation.
///
/// Every variant keeps the underlying OS error so the CLI can render it and
/// the structured log can attach its errno.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("cannot open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("cannot allocate {size}-byte buffer aligned to {alignment}: {source}")]
    Allocation {
        size: usize,
        alignment: usize,
        source: io::Error,
    },
    #[error("read error after {offset} bytes: {source}")]
    Read { offset: u64, source: io::Error },
    #[error("write error after {offset} bytes: {source}")]
    Write { offset: u64, source: io::Error },
    #[error("close error: {source}")]
    Close { source: io::Error },
}

/// Copyable discriminant of [`CopyError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Open,
    Allocation,
    Read,
    Write,
    Close,
}

impl ErrorKind {
    /// Stable lowercase name, used in log events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Allocation => "allocation",
            Self::Read => "read",
            Self::Write => "write",
            Self::Close => "close",
        }
    }
}

impl CopyError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Open { .. } => ErrorKind::Open,
            Self::Allocation { .. } => ErrorKind::Allocation,
            Self::Read { .. } => ErrorKind::Read,
            Self::Write { .. } => ErrorKind::Write,
            Self::Close { .. } => ErrorKind::Close,
        }
    }

    /// The OS error behind this failure.
    #[must_use]
    pub fn io_error(&self) -> &io::Error {
        match self {
            Self::Open { source, .. }
            | Self::Allocation { source, .. }
            | Self::Read { source, .. }
            | Self::Write { source, .. }
            | Self::Close { source } => source,
        }
    }

    /// Raw errno, when the failure came from the kernel.
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        self.io_error().raw_os_error()
    }

    /// Process exit status for this failure. All kinds exit with 1.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// Rejected [`crate::TransferPolicy`] knob.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("multiplier must be at least 1")]
    ZeroMultiplier,
    #[error("max_size must be at least 1")]
    ZeroMaxSize,
    #[error("fixed transfer size must be at least 1")]
    ZeroFixedSize,
    #[error("filesystem block bound {0} is not a power of two")]
    BoundNotPowerOfTwo(usize),
    #[error("min_fs_block {min} exceeds max_fs_block {max}")]
    InvertedBlockBounds { min: usize, max: usize },
}
