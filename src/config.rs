use std::path::PathBuf;

use crate::error::ConfigError;

pub const DEFAULT_PREFIX: &str = "fakestorage-";
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_FILE_SIZE: u64 = 1024 * 1024 * 1024;
/// Upper bound for one pattern block; each engine holds one or two of them in memory.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// Which phases a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Both,
    WriteOnly,
    VerifyOnly,
}

impl Mode {
    pub fn from_flags(write_only: bool, verify_only: bool) -> Result<Self, ConfigError> {
        match (write_only, verify_only) {
            (false, false) => Ok(Mode::Both),
            (true, false) => Ok(Mode::WriteOnly),
            (false, true) => Ok(Mode::VerifyOnly),
            (true, true) => Err(ConfigError::ConflictingModes),
        }
    }

    pub fn writes(self) -> bool {
        !matches!(self, Mode::VerifyOnly)
    }

    pub fn verifies(self) -> bool {
        !matches!(self, Mode::WriteOnly)
    }
}

/// Settings shared read-only by the write and verify engines.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Directory the test files live in.
    pub path: PathBuf,
    pub prefix: String,
    pub block_size: usize,
    /// Target length of every test file.
    pub file_size: u64,
    /// 0 means write until the media is full.
    pub max_files: u64,
    pub mode: Mode,
}

impl ScanConfig {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            prefix: DEFAULT_PREFIX.to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            file_size: DEFAULT_FILE_SIZE,
            max_files: 0,
            mode: Mode::Both,
        }
    }

    /// Shrink the block size to the file size when it is larger.
    ///
    /// Returns `true` when the block size changed.
    pub fn clamp_block_size(&mut self) -> bool {
        if self.file_size > 0 && self.block_size as u64 > self.file_size {
            // file_size < block_size here, so it fits in usize
            self.block_size = self.file_size as usize;
            return true;
        }
        false
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.file_size == 0 {
            return Err(ConfigError::ZeroFileSize);
        }
        if self.block_size as u64 > self.file_size {
            return Err(ConfigError::BlockLargerThanFile {
                block: self.block_size,
                file: self.file_size,
            });
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::BlockTooLarge {
                block: self.block_size,
                max: MAX_BLOCK_SIZE,
            });
        }
        if self.prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        if self.prefix.contains(['/', '\\']) {
            return Err(ConfigError::PrefixHasSeparator(self.prefix.clone()));
        }
        if !self.path.is_dir() {
            return Err(ConfigError::NotADirectory(self.path.clone()));
        }
        Ok(())
    }

    pub fn file_name(&self, index: u64) -> String {
        format!("{}{}", self.prefix, index)
    }

    pub fn file_path(&self, index: u64) -> PathBuf {
        self.path.join(self.file_name(index))
    }
}

/// Parse `"512"`, `"4K"`, `"1 MiB"`, `"2G"`... into bytes (binary multiples).
pub fn parse_size_with_suffix(s: &str) -> Result<u64, String> {
    let s_trimmed = s.trim();
    if s_trimmed.is_empty() {
        return Err("Input string is empty".to_string());
    }
    let first_non_digit_idx = s_trimmed.find(|c: char| !c.is_ascii_digit());
    let (num_str, suffix_orig) = match first_non_digit_idx {
        Some(0) => {
            return Err(format!("Invalid format: missing numeric value in '{}'", s_trimmed));
        }
        Some(idx) => s_trimmed.split_at(idx),
        None => (s_trimmed, ""),
    };
    let num = num_str
        .parse::<u64>()
        .map_err(|_| format!("Invalid number: '{}' in '{}'", num_str, s_trimmed))?;
    let suffix = suffix_orig.trim_start().to_uppercase();
    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TIB" => 1024 * 1024 * 1024 * 1024,
        _ => {
            return Err(format!(
                "Unknown or misplaced size suffix: '{}' in '{}'",
                suffix_orig, s_trimmed
            ))
        }
    };
    num.checked_mul(multiplier)
        .ok_or_else(|| format!("Size '{}' does not fit in 64 bits", s_trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_sizes() {
        assert_eq!(parse_size_with_suffix("512"), Ok(512));
        assert_eq!(parse_size_with_suffix("4K"), Ok(4096));
        assert_eq!(parse_size_with_suffix("1 MiB"), Ok(1024 * 1024));
        assert_eq!(parse_size_with_suffix("2gb"), Ok(2 * 1024 * 1024 * 1024));
        assert!(parse_size_with_suffix("").is_err());
        assert!(parse_size_with_suffix("K").is_err());
        assert!(parse_size_with_suffix("12X").is_err());
        assert!(parse_size_with_suffix("99999999999T").is_err());
    }

    #[test]
    fn mode_flags() {
        assert_eq!(Mode::from_flags(false, false).unwrap(), Mode::Both);
        assert_eq!(Mode::from_flags(true, false).unwrap(), Mode::WriteOnly);
        assert_eq!(Mode::from_flags(false, true).unwrap(), Mode::VerifyOnly);
        assert!(matches!(
            Mode::from_flags(true, true),
            Err(ConfigError::ConflictingModes)
        ));
        assert!(Mode::Both.writes() && Mode::Both.verifies());
        assert!(!Mode::WriteOnly.verifies());
        assert!(!Mode::VerifyOnly.writes());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let dir = tempdir().unwrap();
        let good = ScanConfig::new(dir.path());
        assert!(good.validate().is_ok());

        let mut cfg = good.clone();
        cfg.block_size = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroBlockSize)));

        let mut cfg = good.clone();
        cfg.file_size = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroFileSize)));

        let mut cfg = good.clone();
        cfg.prefix.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::EmptyPrefix)));

        let mut cfg = good.clone();
        cfg.prefix = "sub/t-".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::PrefixHasSeparator(_))));

        let cfg = ScanConfig::new(dir.path().join("missing"));
        assert!(matches!(cfg.validate(), Err(ConfigError::NotADirectory(_))));
    }

    #[test]
    fn oversized_blocks_are_rejected() {
        let dir = tempdir().unwrap();
        let mut cfg = ScanConfig::new(dir.path());
        cfg.file_size = 1024;
        cfg.block_size = 1024 * 1024 * 1024 * 1024;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BlockLargerThanFile { file: 1024, .. })
        ));

        cfg.file_size = u64::MAX;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BlockTooLarge { max: MAX_BLOCK_SIZE, .. })
        ));

        cfg.block_size = MAX_BLOCK_SIZE;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn clamp_shrinks_block_to_file_size() {
        let dir = tempdir().unwrap();
        let mut cfg = ScanConfig::new(dir.path());
        cfg.file_size = 1024;
        cfg.block_size = 1024 * 1024 * 1024 * 1024;
        assert!(cfg.clamp_block_size());
        assert_eq!(cfg.block_size, 1024);
        assert!(cfg.validate().is_ok());
        assert!(!cfg.clamp_block_size());
    }

    #[test]
    fn file_names_use_plain_decimal_index() {
        let mut cfg = ScanConfig::new("/mnt/usb");
        cfg.prefix = "t-".into();
        assert_eq!(cfg.file_name(1), "t-1");
        assert_eq!(cfg.file_name(120), "t-120");
        assert_eq!(cfg.file_path(3), PathBuf::from("/mnt/usb/t-3"));
    }
}
