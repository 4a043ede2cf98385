//! CLI entrypoint for pagecat.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use clap::{Args, CommandFactory, Parser, Subcommand};
use pagecat_core::advisor::{self, TransferPlan};
use pagecat_core::engine::CopySummary;
use pagecat_core::size::MIB;
use pagecat_core::structured_log::{LogEmitter, LogEntry};
use pagecat_core::sys::{self, FdWriter};
use pagecat_core::{CopyError, PageAllocator, Preset, Sizing, TransferPolicy, copy_file};
use serde::Serialize;

/// Copy one file to stdout through a page-aligned, adaptively sized buffer.
#[derive(Debug, Parser)]
#[command(name = "pagecat")]
#[command(about = "Copy a regular file to stdout with a tuned transfer size")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[command(flatten)]
    copy: CopyArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the transfer-size decision for FILE as JSON.
    Advise {
        file: PathBuf,
        #[command(flatten)]
        policy: PolicyArgs,
    },
    /// Copy FILE to a discarding sink at several buffer sizes and report throughput.
    Sweep {
        file: PathBuf,
        /// Largest multiplier of the page size to try (powers of two up to this).
        #[arg(long, default_value_t = 1024)]
        max_multiplier: usize,
        /// Passes per buffer size; the fastest is reported.
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
}

#[derive(Debug, Args)]
struct CopyArgs {
    /// File to copy to stdout.
    file: Option<PathBuf>,
    #[command(flatten)]
    policy: PolicyArgs,
    /// Write structured JSONL events to this path.
    #[arg(long)]
    log_jsonl: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct PolicyArgs {
    /// Sizing preset (bytewise, page, aligned-page, block-lcm, tuned, advised).
    /// Defaults to $PAGECAT_POLICY, then `advised`.
    #[arg(long, value_parser = parse_preset)]
    policy: Option<Preset>,
    /// Override the preset's multiplier.
    #[arg(long)]
    multiplier: Option<usize>,
    /// Override the transfer-size ceiling, in bytes.
    #[arg(long)]
    max_size: Option<usize>,
    /// Skip the sequential-access hint.
    #[arg(long)]
    no_fadvise: bool,
}

fn parse_preset(s: &str) -> Result<Preset, String> {
    Preset::parse(s).ok_or_else(|| {
        let names: Vec<&str> = Preset::ALL.iter().map(|p| p.name()).collect();
        format!("unknown policy `{s}` (expected one of: {})", names.join(", "))
    })
}

impl PolicyArgs {
    fn resolve(&self) -> TransferPolicy {
        let base = match self.policy {
            Some(preset) => TransferPolicy::preset(preset),
            None => TransferPolicy::from_env(),
        };
        let mut builder = base.to_builder();
        if let Some(m) = self.multiplier {
            builder = builder.multiplier(m);
        }
        if let Some(max) = self.max_size {
            builder = builder.max_size(max);
        }
        if self.no_fadvise {
            builder = builder.sequential_hint(false);
        }
        match builder.build() {
            Ok(policy) => policy,
            Err(e) => Cli::command()
                .error(clap::error::ErrorKind::ValueValidation, e)
                .exit(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Some(Command::Advise { file, policy }) => run_advise(&file, &policy.resolve()),
        Some(Command::Sweep {
            file,
            max_multiplier,
            repeat,
        }) => run_sweep(&file, max_multiplier, repeat.max(1)),
        None => {
            let Some(file) = cli.copy.file.as_deref() else {
                Cli::command()
                    .error(
                        clap::error::ErrorKind::MissingRequiredArgument,
                        "a FILE to copy is required",
                    )
                    .exit()
            };
            run_copy(file, &cli.copy.policy.resolve(), cli.copy.log_jsonl.as_deref())
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("pagecat: {err}");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}

fn run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}-{nanos}", std::process::id())
}

fn run_copy(
    file: &Path,
    policy: &TransferPolicy,
    log_path: Option<&Path>,
) -> Result<(), CopyError> {
    let mut log = match log_path {
        Some(path) => match LogEmitter::to_file(path, "pagecat", &run_id()) {
            Ok(log) => log,
            Err(e) => {
                eprintln!("pagecat: warning: cannot open log {}: {e}", path.display());
                LogEmitter::disabled()
            }
        },
        None => LogEmitter::disabled(),
    }
    .on_warning(print_warning);
    let allocator = PageAllocator::new(policy.page_aligned);
    let mut out = FdWriter::stdout();
    let result = copy_file(file, &mut out, policy, &allocator, &mut log);
    if let Err(e) = log.flush() {
        eprintln!("pagecat: warning: cannot flush log: {e}");
    }
    result.map(|_| ())
}

fn print_warning(entry: &LogEntry) {
    let message = entry
        .details
        .as_ref()
        .and_then(|d| d.get("message"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("no detail");
    eprintln!("pagecat: warning: {}: {message}", entry.event.replace('_', " "));
}

#[derive(Debug, Serialize)]
struct AdviseReport<'a> {
    path: &'a Path,
    policy: &'a TransferPolicy,
    plan: TransferPlan,
}

fn run_advise(file: &Path, policy: &TransferPolicy) -> Result<(), CopyError> {
    let handle = File::open(file).map_err(|source| CopyError::Open {
        path: file.to_path_buf(),
        source,
    })?;
    let plan = advisor::advise(&handle, policy);
    sys::close(handle.into()).map_err(|source| CopyError::Close { source })?;
    write_json(
        &mut io::stdout().lock(),
        &AdviseReport {
            path: file,
            policy,
            plan,
        },
    )
}

#[derive(Debug, Serialize)]
struct SweepRow {
    multiplier: usize,
    transfer_size: usize,
    bytes: u64,
    reads: u64,
    elapsed_us: u64,
    mib_per_sec: f64,
}

#[derive(Debug, Serialize)]
struct SweepReport<'a> {
    path: &'a Path,
    page_size: usize,
    repeat: u32,
    rows: Vec<SweepRow>,
    /// Transfer size of the fastest row.
    best_transfer_size: Option<usize>,
}

fn sweep_multipliers(max: usize) -> impl Iterator<Item = usize> {
    std::iter::successors(Some(1usize), |m| m.checked_mul(2))
        .take_while(move |m| *m <= max.max(1))
}

fn run_sweep(file: &Path, max_multiplier: usize, repeat: u32) -> Result<(), CopyError> {
    let page = sys::page_size();
    let mut rows = Vec::new();
    for multiplier in sweep_multipliers(max_multiplier) {
        let policy = TransferPolicy::preset(Preset::AlignedPage)
            .to_builder()
            .sizing(Sizing::Page)
            .multiplier(multiplier)
            .max_size(page.saturating_mul(multiplier).max(64 * MIB))
            .build()
            .unwrap_or_else(|_| TransferPolicy::preset(Preset::AlignedPage));
        let mut best: Option<(u64, CopySummary)> = None;
        for _ in 0..repeat {
            let started = Instant::now();
            let summary = copy_file(
                file,
                &mut io::sink(),
                &policy,
                &PageAllocator::default(),
                &mut LogEmitter::disabled(),
            )?;
            let elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
            if best.as_ref().is_none_or(|(us, _)| elapsed_us < *us) {
                best = Some((elapsed_us, summary));
            }
        }
        if let Some((elapsed_us, summary)) = best {
            rows.push(SweepRow {
                multiplier,
                transfer_size: summary.report.transfer_size,
                bytes: summary.report.bytes_copied,
                reads: summary.report.reads,
                elapsed_us,
                mib_per_sec: throughput(summary.report.bytes_copied, elapsed_us),
            });
        }
    }
    let best_transfer_size = rows
        .iter()
        .max_by(|a, b| a.mib_per_sec.total_cmp(&b.mib_per_sec))
        .map(|row| row.transfer_size);
    write_json(
        &mut io::stdout().lock(),
        &SweepReport {
            path: file,
            page_size: page,
            repeat,
            rows,
            best_transfer_size,
        },
    )
}

fn throughput(bytes: u64, elapsed_us: u64) -> f64 {
    let secs = elapsed_us.max(1) as f64 / 1_000_000.0;
    bytes as f64 / MIB as f64 / secs
}

/// Pretty JSON plus a newline; a closed or full stdout is a write error.
fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), CopyError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| CopyError::Write {
        offset: 0,
        source: io::Error::other(e),
    })?;
    let mut written = 0u64;
    for chunk in [json.as_slice(), &b"\n"[..]] {
        out.write_all(chunk).map_err(|source| CopyError::Write {
            offset: written,
            source,
        })?;
        written += chunk.len() as u64;
    }
    out.flush().map_err(|source| CopyError::Write {
        offset: written,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sweep_multipliers_are_powers_of_two() {
        let got: Vec<usize> = sweep_multipliers(1024).collect();
        assert_eq!(got.len(), 11);
        assert_eq!(got.first(), Some(&1));
        assert_eq!(got.last(), Some(&1024));
        assert_eq!(sweep_multipliers(0).collect::<Vec<_>>(), [1]);
        assert_eq!(sweep_multipliers(6).collect::<Vec<_>>(), [1, 2, 4]);
    }

    #[test]
    fn preset_parser_rejects_unknown_names() {
        assert_eq!(parse_preset("Tuned"), Ok(Preset::Tuned));
        let err = parse_preset("warp").unwrap_err();
        assert!(err.contains("aligned-page"));
    }

    #[test]
    fn overrides_apply_on_top_of_preset() {
        let cli = Cli::try_parse_from([
            "pagecat",
            "--policy",
            "block-lcm",
            "--multiplier",
            "4",
            "--no-fadvise",
            "input.bin",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        let policy = cli.copy.policy.resolve();
        assert_eq!(policy.preset, Preset::BlockLcm);
        assert_eq!(policy.multiplier, 4);
        assert!(!policy.sequential_hint);
    }

    #[test]
    fn advise_subcommand_parses() {
        let cli = Cli::try_parse_from(["pagecat", "advise", "--policy", "page", "x"]).unwrap();
        match cli.command {
            Some(Command::Advise { file, policy }) => {
                assert_eq!(file, PathBuf::from("x"));
                assert_eq!(policy.policy, Some(Preset::Page));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn json_output_failure_is_a_write_error() {
        let err = write_json(&mut ClosedPipe, &serde_json::json!({"a": 1})).unwrap_err();
        assert_eq!(err.kind(), pagecat_core::ErrorKind::Write);
        assert_eq!(err.io_error().kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn json_output_ends_with_newline() {
        let mut out = Vec::new();
        write_json(&mut out, &serde_json::json!({"a": 1})).unwrap();
        assert!(out.ends_with(b"}\n"));
        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["a"], 1);
    }

    #[test]
    fn throughput_handles_zero_elapsed() {
        assert!(throughput(MIB as u64, 0).is_finite());
        assert!((throughput(MIB as u64, 1_000_000) - 1.0).abs() < 1e-9);
    }
}
