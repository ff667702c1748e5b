use std::cmp;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use indicatif::ProgressBar;
use parking_lot::Mutex;

const MAX_DUMP_LEN: usize = 64;

pub fn current_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Timestamped run log: stderr (or the active progress bar) plus an optional log file.
#[derive(Clone, Default)]
pub struct RunLog {
    file: Option<Arc<Mutex<File>>>,
}

impl RunLog {
    /// Log to stderr only.
    pub fn stderr() -> Self {
        Self::default()
    }

    /// Log to stderr and append to `path`.
    pub fn with_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(Arc::new(Mutex::new(f))),
        })
    }

    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    fn emit(&self, pb: Option<&ProgressBar>, full_message: &str) {
        match pb {
            Some(pb) if !pb.is_hidden() => pb.println(full_message),
            _ => eprintln!("{}", full_message),
        }
        if let Some(ref lf_arc) = self.file {
            let mut lf_guard = lf_arc.lock();
            let _ = writeln!(*lf_guard, "{}", full_message);
            let _ = lf_guard.flush();
        }
    }

    pub fn info<S: AsRef<str>>(&self, pb: Option<&ProgressBar>, msg: S) {
        self.emit(pb, &format!("[{}] {}", current_timestamp(), msg.as_ref()));
    }

    pub fn warn<S: AsRef<str>>(&self, pb: Option<&ProgressBar>, msg: S) {
        self.emit(pb, &format!("[{}] WARNING: {}", current_timestamp(), msg.as_ref()));
    }

    /// Record a damaged region of a test file, with hex dumps when both sides are known.
    pub fn mismatch(
        &self,
        pb: Option<&ProgressBar>,
        path: &Path,
        offset: u64,
        category: &str,
        desc: &str,
        expected: Option<&[u8]>,
        actual: Option<&[u8]>,
    ) {
        let mut message = format!(
            "[{}] {} in {} at byte {}: {}",
            current_timestamp(),
            category,
            path.display(),
            offset,
            desc
        );
        if let (Some(exp), Some(act)) = (expected, actual) {
            let exp_slice = &exp[..cmp::min(exp.len(), MAX_DUMP_LEN)];
            let act_slice = &act[..cmp::min(act.len(), MAX_DUMP_LEN)];
            message.push_str(&format!(
                "\nExpected (first {} bytes): {:02X?}\nActual   (first {} bytes): {:02X?}",
                exp_slice.len(),
                exp_slice,
                act_slice.len(),
                act_slice
            ));
        }
        self.emit(pb, &message);
    }
}
