//! # pagecat-core
//!
//! Adaptive buffer-sizing and page-aligned copy engine.
//!
//! The crate is split the same way the copy pipeline runs:
//! - [`advisor`]: derives one transfer size from the page size and the
//!   descriptor's preferred block size.
//! - [`buffer`]: page-aligned, owned buffers released exactly once.
//! - [`copy`]: the read-then-fully-write loop.
//! - [`engine`]: wires the three together around one open file.
//!
//! Only [`sys`] and [`buffer`] touch raw pointers or libc; everything else is
//! safe code.

#![deny(unsafe_code)]

pub mod advisor;
#[allow(unsafe_code)]
pub mod buffer;
pub mod config;
pub mod copy;
pub mod engine;
pub mod error;
pub mod math;
pub mod structured_log;
#[allow(unsafe_code)]
pub mod sys;

pub use advisor::{TransferPlan, recommend};
pub use buffer::{AlignedBuffer, BufferAllocator, PageAllocator};
pub use config::{Preset, Sizing, TransferPolicy, TransferPolicyBuilder};
pub use copy::{CopyLoop, CopyReport, InputSource};
pub use engine::{copy_file, copy_stream};
pub use error::{CopyError, ErrorKind, PolicyError};

/// Byte-size constants used by the sizing presets.
pub mod size {
    /// 1 KiB in bytes.
    pub const KIB: usize = 1024;
    /// 1 MiB in bytes.
    pub const MIB: usize = 1024 * KIB;
}
