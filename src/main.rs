//! src/main.rs
use std::panic;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use fakestorage_tester::config::{parse_size_with_suffix, DEFAULT_PREFIX};
use fakestorage_tester::discovery::discover_file_count;
use fakestorage_tester::logging::{current_timestamp, RunLog};
use fakestorage_tester::report::format_bytes;
use fakestorage_tester::{
    Mode, ScanConfig, ScanError, StopReason, Summary, Verdict, VerifyEngine, WriteEngine,
};

const EXIT_CLEAN: i32 = 0;
const EXIT_FATAL: i32 = 1;
const EXIT_DATA_LOSS: i32 = 2;
const EXIT_PANIC: i32 = 101;
const EXIT_INTERRUPTED: i32 = 130;

/// Test for fake storage, like many cheap USB drives.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Directory where the test files are written and read back
    path: PathBuf,
    /// File name prefix of each test file
    #[clap(short = 'f', long = "filename", default_value = DEFAULT_PREFIX)]
    prefix: String,
    /// Size of each write/read operation
    #[clap(short, long, value_parser = parse_size_with_suffix, default_value = "1M")]
    block_size: u64,
    /// Target size of each test file
    #[clap(short = 's', long, value_parser = parse_size_with_suffix, default_value = "1G")]
    file_size: u64,
    /// Stop after this many files (0 = until the media is full)
    #[clap(short = 'n', long, default_value_t = 0)]
    max_files: u64,
    /// Only write the test files
    #[clap(short, long, conflicts_with = "verify_only")]
    write_only: bool,
    /// Only verify test files written by an earlier run
    #[clap(short = 'r', long)]
    verify_only: bool,
    /// Print the summary as JSON on stdout
    #[clap(long)]
    json: bool,
    /// Append log lines to this file
    #[clap(long, default_value = "fakestorage_test.log")]
    log_file: PathBuf,
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error("{phase} failed: {source}")]
    Fatal {
        phase: &'static str,
        source: ScanError,
    },
    #[error("verification found damaged or lost data")]
    DataLoss,
    #[error("{phase} interrupted before all files were processed")]
    Interrupted { phase: &'static str },
}

/// How a successful run ended.
enum RunEnd {
    Verified,
    WrittenOnly,
}

fn phase(phase: &'static str) -> impl FnOnce(ScanError) -> RunError {
    move |source| RunError::Fatal { phase, source }
}

fn setup_signal_handler(log: &RunLog, stop: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C; finishing the current block...");
        stop.store(true, Ordering::SeqCst);
    });
    if let Err(e) = result {
        log.warn(None, format!("Could not install Ctrl+C handler: {}", e));
    }
}

fn write_progress(cfg: &ScanConfig) -> ProgressBar {
    let template = "[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({binary_bytes_per_sec}, {eta}) {wide_msg}";
    let pb = if cfg.max_files > 0 {
        let pb = ProgressBar::new(cfg.max_files.saturating_mul(cfg.file_size));
        if let Ok(style) = ProgressStyle::with_template(template) {
            pb.set_style(style.progress_chars("##-"));
        }
        pb
    } else {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template(
            "[{elapsed_precise}] {spinner} {bytes} written ({binary_bytes_per_sec}) {wide_msg}",
        ) {
            pb.set_style(style);
        }
        pb
    };
    pb.set_message("writing");
    pb
}

fn verify_progress(count: u64) -> ProgressBar {
    let pb = ProgressBar::new(count);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({eta_precise}) {wide_msg}",
    ) {
        pb.set_style(style.progress_chars("##-"));
    }
    pb.set_message("verifying");
    pb
}

fn main() {
    let cli = Cli::parse();
    let log = match RunLog::with_file(&cli.log_file) {
        Ok(log) => log,
        Err(e) => {
            eprintln!(
                "[{}] Failed to open log file '{}': {}. Further logs will only go to stderr.",
                current_timestamp(),
                cli.log_file.display(),
                e
            );
            RunLog::stderr()
        }
    };

    let main_result = panic::catch_unwind(panic::AssertUnwindSafe(|| main_logic(cli, &log)));
    let exit_code = match main_result {
        Ok(Ok(RunEnd::Verified)) => {
            log.info(None, "Test completed: no damaged or lost data.");
            EXIT_CLEAN
        }
        Ok(Ok(RunEnd::WrittenOnly)) => {
            log.info(
                None,
                "Write phase done; run again with --verify-only to check the files.",
            );
            EXIT_CLEAN
        }
        Ok(Err(RunError::DataLoss)) => {
            log.info(None, "Test completed: the media lost or corrupted data.");
            EXIT_DATA_LOSS
        }
        Ok(Err(e @ RunError::Interrupted { .. })) => {
            log.info(None, format!("Test incomplete: {}. No verdict on the media.", e));
            EXIT_INTERRUPTED
        }
        Ok(Err(e)) => {
            log.info(None, format!("Test aborted: {}", e));
            EXIT_FATAL
        }
        Err(panic_payload) => {
            let mut panic_msg = "A critical error occurred: Test panicked!".to_string();
            if let Some(s) = panic_payload.downcast_ref::<String>() {
                panic_msg.push_str(&format!("\nPanic message: {}", s));
            } else if let Some(s) = panic_payload.downcast_ref::<&str>() {
                panic_msg.push_str(&format!("\nPanic message: {}", s));
            }
            log.info(None, panic_msg);
            EXIT_PANIC
        }
    };
    process::exit(exit_code);
}

fn main_logic(cli: Cli, log: &RunLog) -> Result<RunEnd, RunError> {
    let stop = Arc::new(AtomicBool::new(false));
    setup_signal_handler(log, Arc::clone(&stop));

    let mut cfg = ScanConfig {
        path: cli.path,
        prefix: cli.prefix,
        block_size: usize::try_from(cli.block_size).unwrap_or(usize::MAX),
        file_size: cli.file_size,
        max_files: cli.max_files,
        mode: Mode::from_flags(cli.write_only, cli.verify_only)
            .map_err(|e| phase("configuration")(e.into()))?,
    };
    let requested_block = cfg.block_size;
    if cfg.clamp_block_size() {
        log.info(
            None,
            format!(
                "Block size {} exceeds the file size; using {} bytes.",
                requested_block, cfg.block_size
            ),
        );
    }
    cfg.validate().map_err(|e| phase("configuration")(e.into()))?;

    log.info(None, "Starting fake storage test...");
    log.info(None, format!("Target directory: {}", cfg.path.display()));
    log.info(
        None,
        format!(
            "Prefix: '{}', block size: {} bytes, file size: {} bytes, max files: {}, mode: {:?}",
            cfg.prefix, cfg.block_size, cfg.file_size, cfg.max_files, cfg.mode
        ),
    );

    let mut file_count = 0u64;
    if cfg.mode.writes() {
        let pb = write_progress(&cfg);
        let outcome = WriteEngine::new(&cfg, log)
            .progress(pb.clone())
            .stop_flag(Arc::clone(&stop))
            .run();
        match &outcome {
            Ok(_) => pb.finish_with_message("write phase done"),
            Err(_) => pb.abandon_with_message("write phase aborted"),
        }
        let outcome = outcome.map_err(phase("write phase"))?;
        match outcome.stop {
            StopReason::Exhausted => log.info(None, "Media is full."),
            StopReason::Capped => log.info(None, format!("Reached the limit of {} file(s).", cfg.max_files)),
            StopReason::Interrupted => {
                log.info(None, "Write phase interrupted by user.");
                return Err(RunError::Interrupted {
                    phase: "write phase",
                });
            }
        }
        file_count = outcome.last_index;
    }

    if !cfg.mode.verifies() {
        return Ok(RunEnd::WrittenOnly);
    }
    if !cfg.mode.writes() {
        file_count = discover_file_count(&cfg.path, &cfg.prefix).map_err(phase("discovery"))?;
        log.info(None, format!("Found {} test file(s) to verify.", file_count));
    }
    if stop.load(Ordering::SeqCst) {
        return Err(RunError::Interrupted {
            phase: "verify phase",
        });
    }

    let pb = verify_progress(file_count);
    let stats = VerifyEngine::new(&cfg, log)
        .progress(pb.clone())
        .stop_flag(Arc::clone(&stop))
        .run(file_count);
    if stats.files_checked < file_count {
        pb.abandon_with_message("verify phase interrupted");
    } else {
        pb.finish_with_message("verify phase done");
    }

    let summary = Summary::new(&stats, cfg.file_size);
    log.info(None, "--- Verification Summary ---");
    log.info(None, format!("  Files checked: {}", summary.files_checked));
    for line in summary.lines() {
        log.info(None, format!("  {}", line));
    }
    let verdict = summary.verdict(file_count);
    if verdict == Verdict::Clean {
        let (amount, unit) = format_bytes(stats.files_checked.saturating_mul(cfg.file_size));
        log.info(None, format!("All checks passed ({:.2} {} verified).", amount, unit));
    }
    if cli.json {
        println!("{}", summary.to_json());
    }

    match verdict {
        Verdict::Clean => Ok(RunEnd::Verified),
        Verdict::DataLoss => Err(RunError::DataLoss),
        Verdict::Incomplete => {
            log.info(
                None,
                format!(
                    "Verification stopped after {} of {} file(s).",
                    summary.files_checked, file_count
                ),
            );
            Err(RunError::Interrupted {
                phase: "verify phase",
            })
        }
    }
}
