use std::cmp;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::ProgressBar;

use crate::config::ScanConfig;
use crate::error::{ConfigError, Result, ScanError};
use crate::logging::RunLog;
use crate::pattern::{IndexedPattern, Pattern};
use crate::report::format_bytes;

/// Why the fill loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The volume refused more data.
    Exhausted,
    /// `max_files` files were written.
    Capped,
    /// The stop flag was raised.
    Interrupted,
}

/// How a failed write or create should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteFault {
    Exhausted,
    Other,
}

impl WriteFault {
    pub fn classify(err: &io::Error) -> Self {
        if is_storage_exhausted(err) {
            WriteFault::Exhausted
        } else {
            WriteFault::Other
        }
    }
}

/// True when `err` means the volume (or the user's quota) has no room left.
pub fn is_storage_exhausted(err: &io::Error) -> bool {
    if err.kind() == ErrorKind::StorageFull {
        return true;
    }
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            matches!(err.raw_os_error(), Some(code) if code == libc::ENOSPC || code == libc::EDQUOT)
        } else if #[cfg(windows)] {
            // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
            matches!(err.raw_os_error(), Some(39) | Some(112))
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Highest index whose file was created; verification checks `1..=last_index`.
    pub last_index: u64,
    /// Files that reached the full target length and were flushed.
    pub complete_files: u64,
    pub bytes_written: u64,
    pub stop: StopReason,
}

/// Where the write engine creates and flushes its test files.
pub trait TargetFs {
    type File: Write;

    /// Create `path`, failing with `AlreadyExists` if it is already there.
    fn create(&self, path: &Path) -> io::Result<Self::File>;

    fn sync(&self, file: &mut Self::File) -> io::Result<()>;
}

/// The real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disk;

impl TargetFs for Disk {
    type File = File;

    fn create(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new().write(true).create_new(true).open(path)
    }

    fn sync(&self, file: &mut File) -> io::Result<()> {
        file.sync_all()
    }
}

enum FileWrite {
    Complete,
    Exhausted,
    Interrupted,
}

/// Fills the target directory with test files until it is full or capped.
pub struct WriteEngine<'a, P = IndexedPattern, T = Disk> {
    config: &'a ScanConfig,
    pattern: P,
    target: T,
    log: &'a RunLog,
    progress: Option<ProgressBar>,
    stop_flag: Option<Arc<AtomicBool>>,
}

impl<'a> WriteEngine<'a> {
    pub fn new(config: &'a ScanConfig, log: &'a RunLog) -> Self {
        Self {
            config,
            pattern: IndexedPattern::new(config.block_size),
            target: Disk,
            log,
            progress: None,
            stop_flag: None,
        }
    }
}

impl<'a, P: Pattern> WriteEngine<'a, P> {
    /// Use `pattern` instead of [`IndexedPattern`]; its block size must match the config.
    pub fn with_pattern(
        config: &'a ScanConfig,
        log: &'a RunLog,
        pattern: P,
    ) -> std::result::Result<Self, ConfigError> {
        if pattern.block_size() != config.block_size {
            return Err(ConfigError::PatternBlockSize {
                pattern: pattern.block_size(),
                expected: config.block_size,
            });
        }
        Ok(Self {
            config,
            pattern,
            target: Disk,
            log,
            progress: None,
            stop_flag: None,
        })
    }
}

impl<'a, P: Pattern, T: TargetFs> WriteEngine<'a, P, T> {
    /// Create files through `target` instead of the local filesystem.
    pub fn target<U: TargetFs>(self, target: U) -> WriteEngine<'a, P, U> {
        WriteEngine {
            config: self.config,
            pattern: self.pattern,
            target,
            log: self.log,
            progress: self.progress,
            stop_flag: self.stop_flag,
        }
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

    fn capped(&self, index: u64) -> bool {
        self.config.max_files != 0 && index >= self.config.max_files
    }

    pub fn run(&self) -> Result<WriteOutcome> {
        let pb = self.progress.as_ref();
        let mut last_index = 0u64;
        let mut complete_files = 0u64;
        let mut bytes_written = 0u64;
        let mut n = 0u64;

        let stop = loop {
            if self.capped(n) {
                break StopReason::Capped;
            }
            if self.stop_requested() {
                break StopReason::Interrupted;
            }
            n += 1;
            let path = self.config.file_path(n);

            let mut file = match self.target.create(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    return Err(ScanError::Leftover(path));
                }
                Err(e) => match WriteFault::classify(&e) {
                    WriteFault::Exhausted => {
                        self.log.info(pb, format!("Storage exhausted while creating {}.", path.display()));
                        break StopReason::Exhausted;
                    }
                    WriteFault::Other => return Err(ScanError::Create { path, source: e }),
                },
            };
            last_index = n;

            let step = self.fill_file(&mut file, n, &path, &mut bytes_written)?;
            drop(file);
            match step {
                FileWrite::Complete => {
                    complete_files += 1;
                    self.log.info(pb, format!("Wrote {}", path.display()));
                }
                FileWrite::Exhausted => {
                    self.log.info(pb, format!("Storage exhausted while writing {}.", path.display()));
                    break StopReason::Exhausted;
                }
                FileWrite::Interrupted => break StopReason::Interrupted,
            }
        };

        let outcome = WriteOutcome {
            last_index,
            complete_files,
            bytes_written,
            stop,
        };
        let (amount, unit) = format_bytes(outcome.bytes_written);
        self.log.info(
            pb,
            format!(
                "Write phase finished ({:?}): {} file(s) created, {} complete, {:.2} {} written.",
                outcome.stop, outcome.last_index, outcome.complete_files, amount, unit
            ),
        );
        Ok(outcome)
    }

    fn fill_file(&self, file: &mut T::File, index: u64, path: &Path, total: &mut u64) -> Result<FileWrite> {
        let block = self.pattern.create(index);
        let file_size = self.config.file_size;
        let mut written = 0u64;

        while written < file_size {
            if self.stop_requested() {
                return Ok(FileWrite::Interrupted);
            }
            let chunk = cmp::min(block.len() as u64, file_size - written) as usize;
            let mut pending = &block[..chunk];
            while !pending.is_empty() {
                let n = match file.write(pending) {
                    Ok(0) => return Err(write_error(path, written, ErrorKind::WriteZero.into())),
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        return match WriteFault::classify(&e) {
                            WriteFault::Exhausted => Ok(FileWrite::Exhausted),
                            WriteFault::Other => Err(write_error(path, written, e)),
                        };
                    }
                };
                pending = &pending[n..];
                written += n as u64;
                *total += n as u64;
                if let Some(pb) = &self.progress {
                    pb.inc(n as u64);
                }
            }
        }

        if let Err(e) = self.target.sync(file) {
            if is_storage_exhausted(&e) {
                return Ok(FileWrite::Exhausted);
            }
            self.log.warn(
                self.progress.as_ref(),
                format!("Could not flush {}: {}. Continuing.", path.display(), e),
            );
        }
        Ok(FileWrite::Complete)
    }
}

fn write_error(path: &Path, offset: u64, source: io::Error) -> ScanError {
    ScanError::Write {
        path: PathBuf::from(path),
        offset,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::VerifyEngine;
    use std::cell::Cell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::tempdir;

    /// Local files on a volume that only holds `free` more bytes.
    struct SmallVolume {
        free: Rc<Cell<u64>>,
        full_on_create: bool,
        full_on_sync: bool,
    }

    impl SmallVolume {
        fn new(free: u64) -> Self {
            Self {
                free: Rc::new(Cell::new(free)),
                full_on_create: false,
                full_on_sync: false,
            }
        }
    }

    struct LimitedFile {
        inner: File,
        free: Rc<Cell<u64>>,
    }

    impl Write for LimitedFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let free = self.free.get();
            if free == 0 {
                return Err(ErrorKind::StorageFull.into());
            }
            let n = cmp::min(free, buf.len() as u64) as usize;
            let n = self.inner.write(&buf[..n])?;
            self.free.set(free - n as u64);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl TargetFs for SmallVolume {
        type File = LimitedFile;

        fn create(&self, path: &Path) -> io::Result<LimitedFile> {
            if self.full_on_create && self.free.get() == 0 {
                return Err(ErrorKind::StorageFull.into());
            }
            Ok(LimitedFile {
                inner: Disk.create(path)?,
                free: Rc::clone(&self.free),
            })
        }

        fn sync(&self, file: &mut LimitedFile) -> io::Result<()> {
            if self.full_on_sync {
                return Err(ErrorKind::StorageFull.into());
            }
            file.inner.sync_all()
        }
    }

    fn config(dir: &Path, block_size: usize, file_size: u64, max_files: u64) -> ScanConfig {
        let mut cfg = ScanConfig::new(dir);
        cfg.prefix = "t-".into();
        cfg.block_size = block_size;
        cfg.file_size = file_size;
        cfg.max_files = max_files;
        cfg
    }

    #[test]
    fn capped_run_writes_expected_files() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), 4, 10, 2);
        let log = RunLog::stderr();
        let outcome = WriteEngine::new(&cfg, &log).run().unwrap();

        assert_eq!(outcome.stop, StopReason::Capped);
        assert_eq!(outcome.last_index, 2);
        assert_eq!(outcome.complete_files, 2);
        assert_eq!(outcome.bytes_written, 20);
        assert_eq!(fs::read(dir.path().join("t-1")).unwrap(), b"1111111111");
        assert_eq!(fs::read(dir.path().join("t-2")).unwrap(), b"2222222222");
        assert!(!dir.path().join("t-3").exists());
    }

    #[test]
    fn multi_digit_index_pattern_restarts_each_block() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), 3, 8, 12);
        let log = RunLog::stderr();
        WriteEngine::new(&cfg, &log).run().unwrap();
        assert_eq!(fs::read(dir.path().join("t-12")).unwrap(), b"12112112");
    }

    #[test]
    fn leftover_file_is_fatal() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("t-1"), b"old").unwrap();
        let cfg = config(dir.path(), 4, 10, 2);
        let log = RunLog::stderr();
        let err = WriteEngine::new(&cfg, &log).run().unwrap_err();
        assert!(matches!(err, ScanError::Leftover(p) if p.ends_with("t-1")));
        assert_eq!(fs::read(dir.path().join("t-1")).unwrap(), b"old");
    }

    #[test]
    fn raised_stop_flag_writes_nothing() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), 4, 10, 0);
        let log = RunLog::stderr();
        let flag = Arc::new(AtomicBool::new(true));
        let outcome = WriteEngine::new(&cfg, &log).stop_flag(flag).run().unwrap();
        assert_eq!(outcome.stop, StopReason::Interrupted);
        assert_eq!(outcome.last_index, 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_directory_is_a_create_error() {
        let dir = tempdir().unwrap();
        let cfg = config(&dir.path().join("gone"), 4, 10, 1);
        let log = RunLog::stderr();
        let err = WriteEngine::new(&cfg, &log).run().unwrap_err();
        assert!(matches!(err, ScanError::Create { .. }));
    }

    #[test]
    fn full_volume_mid_file_keeps_partial_last_file() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), 4, 10, 0);
        let log = RunLog::stderr();
        let outcome = WriteEngine::new(&cfg, &log)
            .target(SmallVolume::new(25))
            .run()
            .unwrap();

        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert_eq!(outcome.last_index, 3);
        assert_eq!(outcome.complete_files, 2);
        assert_eq!(outcome.bytes_written, 25);
        assert_eq!(fs::read(dir.path().join("t-3")).unwrap(), b"33333");
        assert!(!dir.path().join("t-4").exists());

        let stats = VerifyEngine::new(&cfg, &log).run(outcome.last_index);
        assert_eq!(stats.files_checked, 3);
        assert_eq!((stats.damaged_files, stats.lost_files, stats.lost_bytes), (0, 0, 0));
    }

    #[test]
    fn full_volume_at_create_excludes_missing_file() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), 4, 10, 0);
        let log = RunLog::stderr();
        let mut volume = SmallVolume::new(20);
        volume.full_on_create = true;
        let outcome = WriteEngine::new(&cfg, &log).target(volume).run().unwrap();

        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert_eq!(outcome.last_index, 2);
        assert_eq!(outcome.complete_files, 2);
        assert_eq!(outcome.bytes_written, 20);
        assert!(!dir.path().join("t-3").exists());

        let stats = VerifyEngine::new(&cfg, &log).run(outcome.last_index);
        assert_eq!((stats.damaged_files, stats.lost_files, stats.lost_bytes), (0, 0, 0));
    }

    #[test]
    fn full_volume_on_first_write_counts_empty_file() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), 4, 10, 0);
        let log = RunLog::stderr();
        let outcome = WriteEngine::new(&cfg, &log)
            .target(SmallVolume::new(20))
            .run()
            .unwrap();

        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert_eq!(outcome.last_index, 3);
        assert_eq!(outcome.complete_files, 2);
        assert_eq!(outcome.bytes_written, 20);
        assert_eq!(fs::metadata(dir.path().join("t-3")).unwrap().len(), 0);

        let stats = VerifyEngine::new(&cfg, &log).run(outcome.last_index);
        assert_eq!((stats.damaged_files, stats.lost_files, stats.lost_bytes), (0, 0, 0));
    }

    #[test]
    fn full_volume_on_flush_stops_the_loop() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), 4, 10, 0);
        let log = RunLog::stderr();
        let mut volume = SmallVolume::new(1000);
        volume.full_on_sync = true;
        let outcome = WriteEngine::new(&cfg, &log).target(volume).run().unwrap();

        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert_eq!(outcome.last_index, 1);
        assert_eq!(outcome.complete_files, 0);
        assert_eq!(outcome.bytes_written, 10);
    }

    #[test]
    fn pattern_with_wrong_block_size_is_rejected() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), 4, 10, 1);
        let log = RunLog::stderr();
        assert!(matches!(
            WriteEngine::with_pattern(&cfg, &log, IndexedPattern::new(8)),
            Err(ConfigError::PatternBlockSize { pattern: 8, expected: 4 })
        ));
        assert!(WriteEngine::with_pattern(&cfg, &log, IndexedPattern::new(4)).is_ok());
    }

    #[test]
    fn classifies_exhaustion() {
        assert_eq!(
            WriteFault::classify(&io::Error::from(ErrorKind::StorageFull)),
            WriteFault::Exhausted
        );
        assert_eq!(
            WriteFault::classify(&io::Error::from(ErrorKind::PermissionDenied)),
            WriteFault::Other
        );
        #[cfg(unix)]
        {
            assert!(is_storage_exhausted(&io::Error::from_raw_os_error(libc::ENOSPC)));
            assert!(!is_storage_exhausted(&io::Error::from_raw_os_error(libc::EIO)));
        }
    }
}
