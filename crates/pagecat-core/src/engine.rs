//! Copy pipeline: advise, acquire, hint, copy, release.
//!
//! [`copy_stream`] runs the pipeline over an already-open input.
//! [`copy_file`] adds opening and an explicit, error-checked close.
//!
//! The buffer is released before any result (success or failure) is handed
//! back, and the input descriptor is closed on every path.

use std::fs::File;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::path::Path;
use std::time::Instant;

use serde::Serialize;

use crate::advisor::{self, TransferPlan};
use crate::buffer::BufferAllocator;
use crate::config::TransferPolicy;
use crate::copy::{CopyLoop, CopyReport, InputSource};
use crate::error::CopyError;
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use crate::sys;

/// What happened to the sequential-access hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum HintStatus {
    NotRequested,
    Applied,
    /// The hint was rejected; the copy went ahead without it.
    Failed { errno: Option<i32>, message: String },
}

/// Everything a successful run decided and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopySummary {
    pub policy: &'static str,
    pub plan: TransferPlan,
    /// Alignment of the buffer actually used.
    pub alignment: usize,
    pub hint: HintStatus,
    pub report: CopyReport,
}

/// Copy `source` to `sink` through one aligned buffer sized by the advisor.
pub fn copy_stream<S, W, A>(
    source: &mut S,
    sink: &mut W,
    policy: &TransferPolicy,
    allocator: &A,
    log: &mut LogEmitter,
) -> Result<CopySummary, CopyError>
where
    S: InputSource + ?Sized,
    W: Write + ?Sized,
    A: BufferAllocator + ?Sized,
{
    run_pipeline(source, sink, policy, allocator, log, None, Instant::now())
}

fn run_pipeline<S, W, A>(
    source: &mut S,
    sink: &mut W,
    policy: &TransferPolicy,
    allocator: &A,
    log: &mut LogEmitter,
    path: Option<&Path>,
    started: Instant,
) -> Result<CopySummary, CopyError>
where
    S: InputSource + ?Sized,
    W: Write + ?Sized,
    A: BufferAllocator + ?Sized,
{
    let policy_name = policy.preset.name();

    let plan = advisor::advise(&*source, policy);
    let entry = log
        .entry(LogLevel::Debug, "transfer_size_selected")
        .with_policy(policy_name)
        .with_transfer_size(plan.transfer_size)
        .with_details(serde_json::to_value(plan).unwrap_or_default());
    log.record(entry);

    let alignment = allocator.alignment();
    let mut buffer = match allocator.acquire(plan.transfer_size) {
        Ok(buffer) => buffer,
        Err(source) => {
            let err = CopyError::Allocation {
                size: plan.transfer_size,
                alignment,
                source,
            };
            log_failure(log, policy_name, path, &err, started);
            return Err(err);
        }
    };
    let entry = log
        .entry(LogLevel::Debug, "buffer_acquired")
        .with_transfer_size(buffer.len())
        .with_alignment(buffer.alignment());
    log.record(entry);

    let hint = if policy.sequential_hint {
        match source.advise_sequential() {
            Ok(()) => HintStatus::Applied,
            Err(e) => {
                let entry = log
                    .entry(LogLevel::Warn, "sequential_hint_failed")
                    .with_error("advise", e.raw_os_error())
                    .with_details(serde_json::json!({ "message": e.to_string() }));
                log.record(entry);
                HintStatus::Failed {
                    errno: e.raw_os_error(),
                    message: e.to_string(),
                }
            }
        }
    } else {
        HintStatus::NotRequested
    };

    let result = CopyLoop::new(&mut buffer, plan.transfer_size).run(source, sink);
    let buffer_len = buffer.len();
    buffer.release();
    let entry = log
        .entry(LogLevel::Debug, "buffer_released")
        .with_transfer_size(buffer_len);
    log.record(entry);

    match result {
        Ok(report) => {
            let entry = with_optional_path(log.entry(LogLevel::Info, "copy_complete"), path)
                .with_policy(policy_name)
                .with_transfer_size(report.transfer_size)
                .with_bytes(report.bytes_copied)
                .with_outcome(Outcome::Pass)
                .with_exit_code(0)
                .with_duration_ms(elapsed_ms(started))
                .with_details(serde_json::json!({
                    "reads": report.reads,
                    "writes": report.writes,
                    "short_writes": report.short_writes,
                }));
            log.record(entry);
            Ok(CopySummary {
                policy: policy_name,
                plan,
                alignment,
                hint,
                report,
            })
        }
        Err(err) => {
            log_failure(log, policy_name, path, &err, started);
            Err(err)
        }
    }
}

/// Open `path`, copy it to `sink`, and close it, checking the close.
pub fn copy_file<W, A>(
    path: &Path,
    sink: &mut W,
    policy: &TransferPolicy,
    allocator: &A,
    log: &mut LogEmitter,
) -> Result<CopySummary, CopyError>
where
    W: Write + ?Sized,
    A: BufferAllocator + ?Sized,
{
    let started = Instant::now();
    let mut file = File::open(path).map_err(|source| {
        let err = CopyError::Open {
            path: path.to_path_buf(),
            source,
        };
        log_failure(log, policy.preset.name(), Some(path), &err, started);
        err
    })?;

    // On failure `file` drops here, closing the descriptor before the error
    // reaches the caller.
    let summary = run_pipeline(&mut file, sink, policy, allocator, log, Some(path), started)?;

    sys::close(OwnedFd::from(file)).map_err(|source| {
        let err = CopyError::Close { source };
        log_failure(log, policy.preset.name(), Some(path), &err, started);
        err
    })?;
    Ok(summary)
}

fn with_optional_path(entry: LogEntry, path: Option<&Path>) -> LogEntry {
    match path {
        Some(path) => entry.with_path(path.display().to_string()),
        None => entry,
    }
}

fn log_failure(
    log: &mut LogEmitter,
    policy: &str,
    path: Option<&Path>,
    err: &CopyError,
    started: Instant,
) {
    let entry = with_optional_path(log.entry(LogLevel::Error, "copy_failed"), path)
        .with_policy(policy)
        .with_outcome(Outcome::Fail)
        .with_error(err.kind().as_str(), err.errno())
        .with_exit_code(err.exit_code())
        .with_duration_ms(elapsed_ms(started))
        .with_details(serde_json::json!({ "message": err.to_string() }));
    log.record(entry);
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
