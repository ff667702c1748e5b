//! Detect storage media that report more capacity than they really have.
//!
//! The [`writer`] fills a directory with files whose content is derived from
//! their index, the [`verifier`] reads them back and counts every block that
//! does not match, and [`report`] turns the counters into a summary.

pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod pattern;
pub mod report;
pub mod verifier;
pub mod writer;

pub use config::{Mode, ScanConfig};
pub use error::{ConfigError, Result, ScanError};
pub use pattern::{IndexedPattern, Pattern};
pub use report::{Summary, Verdict};
pub use verifier::{RunStatistics, VerifyEngine};
pub use writer::{Disk, StopReason, TargetFs, WriteEngine, WriteOutcome};
