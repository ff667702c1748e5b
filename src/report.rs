use serde_json::json;

use crate::verifier::RunStatistics;

pub fn format_bytes(bytes: u64) -> (f64, &'static str) {
    const KIB_F: f64 = 1024.0;
    const MIB_F: f64 = KIB_F * 1024.0;
    const GIB_F: f64 = MIB_F * 1024.0;
    const TIB_F: f64 = GIB_F * 1024.0;
    if bytes < 1024 {
        return (bytes as f64, "Bytes");
    }
    let bytes_f = bytes as f64;
    if bytes_f < MIB_F {
        (bytes_f / KIB_F, "KiB")
    } else if bytes_f < GIB_F {
        (bytes_f / MIB_F, "MiB")
    } else if bytes_f < TIB_F {
        (bytes_f / GIB_F, "GiB")
    } else {
        (bytes_f / TIB_F, "TiB")
    }
}

fn human(bytes: u64) -> String {
    let (value, unit) = format_bytes(bytes);
    if unit == "Bytes" {
        format!("{} bytes", bytes)
    } else {
        format!("{:.2} {} ({} bytes)", value, unit, bytes)
    }
}

/// Overall result of a verify pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Every expected file was checked and nothing was lost.
    Clean,
    DataLoss,
    /// The pass stopped before checking every file and found nothing so far.
    Incomplete,
}

/// Loss figures derived from one verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub files_checked: u64,
    pub damaged_files: u64,
    pub damaged_bytes: u64,
    pub lost_files: u64,
    /// `lost_files` times the configured file size.
    pub lost_file_bytes: u64,
}

impl Summary {
    pub fn new(stats: &RunStatistics, file_size: u64) -> Self {
        Self {
            files_checked: stats.files_checked,
            damaged_files: stats.damaged_files,
            damaged_bytes: stats.lost_bytes,
            lost_files: stats.lost_files,
            lost_file_bytes: stats.lost_files.saturating_mul(file_size),
        }
    }

    pub fn total_loss(&self) -> u64 {
        self.damaged_bytes.saturating_add(self.lost_file_bytes)
    }

    pub fn is_clean(&self) -> bool {
        self.damaged_files == 0 && self.lost_files == 0 && self.total_loss() == 0
    }

    /// A pass only counts as clean once all `expected_files` were checked.
    pub fn verdict(&self, expected_files: u64) -> Verdict {
        if !self.is_clean() {
            Verdict::DataLoss
        } else if self.files_checked < expected_files {
            Verdict::Incomplete
        } else {
            Verdict::Clean
        }
    }

    /// Human-readable report; empty for a clean pass.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.damaged_files > 0 {
            lines.push(format!(
                "Damaged files: {} ({} in damaged blocks)",
                self.damaged_files,
                human(self.damaged_bytes)
            ));
        }
        if self.lost_files > 0 {
            lines.push(format!(
                "Lost files: {} ({})",
                self.lost_files,
                human(self.lost_file_bytes)
            ));
        }
        if self.total_loss() > 0 {
            lines.push(format!("Total data loss: {}", human(self.total_loss())));
        }
        lines
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "files_checked": self.files_checked,
            "damaged_files": self.damaged_files,
            "damaged_bytes": self.damaged_bytes,
            "lost_files": self.lost_files,
            "lost_file_bytes": self.lost_file_bytes,
            "total_loss_bytes": self.total_loss(),
            "clean": self.is_clean(),
        })
    }
}
