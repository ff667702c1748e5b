//! Read-back of the test files.
//!
//! Every file `1..=count` is re-read block by block and compared against the
//! pattern regenerated from its index. Faults never abort the pass: a file
//! that cannot be opened is *lost*, a file with wrong, missing or surplus
//! blocks is *damaged*, and damage is counted one block size per bad block.

use std::fs::File;
use std::io::{self, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::ProgressBar;

use crate::config::ScanConfig;
use crate::error::ConfigError;
use crate::logging::RunLog;
use crate::pattern::{IndexedPattern, Pattern};

/// Counters collected by one verification pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStatistics {
    pub files_checked: u64,
    pub damaged_files: u64,
    pub lost_files: u64,
    /// Bytes in damaged blocks of files that still exist.
    pub lost_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileVerdict {
    Lost,
    Checked { damage: u64 },
    Interrupted,
}

pub struct VerifyEngine<'a, P = IndexedPattern> {
    config: &'a ScanConfig,
    pattern: P,
    log: &'a RunLog,
    progress: Option<ProgressBar>,
    stop_flag: Option<Arc<AtomicBool>>,
}

impl<'a> VerifyEngine<'a> {
    pub fn new(config: &'a ScanConfig, log: &'a RunLog) -> Self {
        Self {
            config,
            pattern: IndexedPattern::new(config.block_size),
            log,
            progress: None,
            stop_flag: None,
        }
    }
}

impl<'a, P: Pattern> VerifyEngine<'a, P> {
    /// Check against `pattern` instead of [`IndexedPattern`]; its block size must match the config.
    pub fn with_pattern(config: &'a ScanConfig, log: &'a RunLog, pattern: P) -> Result<Self, ConfigError> {
        if pattern.block_size() != config.block_size {
            return Err(ConfigError::PatternBlockSize {
                pattern: pattern.block_size(),
                expected: config.block_size,
            });
        }
        Ok(Self {
            config,
            pattern,
            log,
            progress: None,
            stop_flag: None,
        })
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    pub fn stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop_flag = Some(flag);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Verify files `1..=file_count`. Stops early only when the stop flag is raised.
    pub fn run(&self, file_count: u64) -> RunStatistics {
        let pb = self.progress.as_ref();
        let mut stats = RunStatistics::default();

        for index in 1..=file_count {
            if self.stop_requested() {
                self.log.info(pb, "Verification interrupted.");
                break;
            }
            match self.verify_file(index, index == file_count) {
                FileVerdict::Lost => stats.lost_files += 1,
                FileVerdict::Checked { damage } if damage > 0 => {
                    stats.damaged_files += 1;
                    stats.lost_bytes += damage;
                }
                FileVerdict::Checked { .. } => {}
                FileVerdict::Interrupted => {
                    self.log.info(pb, "Verification interrupted.");
                    break;
                }
            }
            stats.files_checked += 1;
            if let Some(pb) = pb {
                pb.inc(1);
            }
        }
        stats
    }

    fn verify_file(&self, index: u64, is_last: bool) -> FileVerdict {
        let pb = self.progress.as_ref();
        let path = self.config.file_path(index);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                self.log.mismatch(pb, &path, 0, "Lost File", &e.to_string(), None, None);
                return FileVerdict::Lost;
            }
        };

        let expected = self.pattern.create(index);
        let block_size = expected.len() as u64;
        let file_size = self.config.file_size;
        let mut buf = vec![0u8; expected.len()];
        let mut offset = 0u64;
        let mut damage = 0u64;
        let mut read_failed = false;

        loop {
            if self.stop_requested() {
                return FileVerdict::Interrupted;
            }
            let read = match read_block(&mut file, &mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    self.log.mismatch(pb, &path, offset, "Read Error", &e.to_string(), None, None);
                    read_failed = true;
                    break;
                }
            };
            let want = file_size.saturating_sub(offset).min(block_size) as usize;
            let actual = &buf[..read];
            let expected_slice = &expected[..read];

            if read > want {
                self.log.mismatch(
                    pb,
                    &path,
                    offset,
                    "Length Mismatch",
                    &format!("{} bytes beyond the expected file size", read - want),
                    None,
                    None,
                );
                damage += block_size;
            } else if read < want && !is_last {
                self.log.mismatch(
                    pb,
                    &path,
                    offset,
                    "Length Mismatch",
                    &format!("short block: read {} of {} bytes", read, want),
                    Some(expected_slice),
                    Some(actual),
                );
                damage += block_size;
            } else if actual != expected_slice {
                self.log.mismatch(
                    pb,
                    &path,
                    offset,
                    "Data Mismatch",
                    "block content differs from pattern",
                    Some(expected_slice),
                    Some(actual),
                );
                damage += block_size;
            }
            offset += read as u64;
        }
        drop(file);

        // Only the final file may legitimately end before the target size.
        if !is_last || read_failed {
            damage += missing_tail(offset, block_size, file_size);
        }
        FileVerdict::Checked { damage }
    }
}

/// Damage for the blocks never seen when a file ends at `offset` instead of `file_size`.
fn missing_tail(offset: u64, block_size: u64, file_size: u64) -> u64 {
    let tail_start = offset.div_ceil(block_size) * block_size;
    if tail_start >= file_size {
        return 0;
    }
    (file_size - tail_start).div_ceil(block_size) * block_size
}

/// Fill `buf` as far as the file allows; a short count means end of file.
fn read_block<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
