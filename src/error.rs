use std::{io, path::PathBuf};

/// Problems with a [`ScanConfig`](crate::config::ScanConfig) caught before any file is touched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("block size must be greater than zero")]
    ZeroBlockSize,
    #[error("file size must be greater than zero")]
    ZeroFileSize,
    #[error("file name prefix must not be empty")]
    EmptyPrefix,
    #[error("file name prefix '{0}' must not contain a path separator")]
    PrefixHasSeparator(String),
    #[error("target path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("--write-only and --verify-only cannot be combined")]
    ConflictingModes,
    #[error("block size {block} exceeds the file size {file}")]
    BlockLargerThanFile { block: usize, file: u64 },
    #[error("block size {block} exceeds the maximum of {max} bytes")]
    BlockTooLarge { block: usize, max: usize },
    #[error("pattern produces {pattern}-byte blocks but the block size is {expected}")]
    PatternBlockSize { pattern: usize, expected: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("test file {} already exists; remove the files of the previous session first", .0.display())]
    Leftover(PathBuf),
    #[error("cannot create {}: {source}", path.display())]
    Create { path: PathBuf, source: io::Error },
    #[error("write to {} failed at byte {offset}: {source}", path.display())]
    Write {
        path: PathBuf,
        offset: u64,
        source: io::Error,
    },
    #[error("cannot list {}: {source}", path.display())]
    Discovery { path: PathBuf, source: io::Error },
}

pub type Result<T> = std::result::Result<T, ScanError>;
