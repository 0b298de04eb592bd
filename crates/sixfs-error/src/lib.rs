#![forbid(unsafe_code)]
//! Error types for the sixfs defragmenter.
//!
//! # Error Taxonomy
//!
//! Two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `sixfs-types` | On-disk format violations detected during byte decoding |
//! | Runtime | `DefragError` | `sixfs-error` (this crate) | User-facing errors for the CLI and API consumers |
//!
//! ## Mapping Policy: ParseError → DefragError
//!
//! `sixfs-error` is intentionally independent of `sixfs-types` to avoid
//! cyclic dependencies. The conversion from `ParseError` to `DefragError`
//! is implemented in `sixfs-defrag`, which depends on both crates.
//!
//! The mapping rules are:
//!
//! | ParseError Variant | DefragError Variant | Rationale |
//! |--------------------|---------------------|-----------|
//! | `InsufficientData` | `Parse` | A truncated image was handed to the engine |
//! | `InvalidField` | `Format` | A superblock field makes the geometry unusable |
//! | `IntegerConversion` | `Format` | Region arithmetic overflowed, so the geometry is unusable |
//!
//! When a bounds failure occurs while chasing a block reference mid-run
//! (as opposed to decoding the fixed metadata regions up front), prefer
//! `Corruption` with the offending relative index for triage.
//!
//! ## Exit-Code Mapping
//!
//! Every `DefragError` variant maps to exactly one process exit code via
//! [`DefragError::exit_code`]. The mapping is exhaustive (no wildcard arm)
//! so adding a new variant is a compile error until its code is assigned.
//!
//! | Variant | Exit code |
//! |---------|-----------|
//! | `Usage` | 2 |
//! | `Io` | 1 |
//! | `TruncatedImage` | 1 |
//! | `Format` | 1 |
//! | `Parse` | 1 |
//! | `Corruption` | 1 |
//!
//! ## Design Constraints
//!
//! - `sixfs-error` MUST NOT depend on `sixfs-types` or `sixfs-ondisk`.
//! - `DefragError` is the single user-facing error type; crate-internal
//!   errors convert into it at their respective crate boundaries.
//! - All string payloads are owned (`String`); the borrowed originals live
//!   in buffers that do not outlive the run.

use thiserror::Error;

/// Unified error type for all defragmenter operations.
#[derive(Debug, Error)]
pub enum DefragError {
    /// Operating system I/O error (wraps `std::io::Error`).
    ///
    /// Covers the size query on the input image, opening it, reading it,
    /// and writing the output file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The command line did not carry exactly one image path.
    #[error("usage error: {0}")]
    Usage(String),

    /// One read of the whole image returned fewer bytes than its reported size.
    #[error("short read: expected {expected} bytes, got {actual}")]
    TruncatedImage { expected: u64, actual: u64 },

    /// The superblock geometry cannot anchor the engine's address arithmetic.
    ///
    /// Used before relocation starts: negative or decreasing region
    /// offsets, a non-positive block size, or region math that overflows.
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// Parse-layer error surfaced to the user.
    ///
    /// Carries the string representation of a `ParseError` from
    /// `sixfs-types`. Prefer `Format` or `Corruption` when geometry or
    /// block context is known.
    #[error("parse error: {0}")]
    Parse(String),

    /// A block reference addressed bytes outside a buffer mid-run.
    ///
    /// The `block` field holds the offending relative index for triage.
    /// In-range but semantically wrong references are not detected.
    #[error("corrupt block reference {block}: {detail}")]
    Corruption { block: i64, detail: String },
}

impl DefragError {
    /// Convert this error into the process exit code the CLI reports.
    ///
    /// The mapping is exhaustive: every variant has an explicit arm.
    ///
    /// Policy notes:
    /// - `Usage` → 2: the conventional code for command-line misuse,
    ///   distinguishable from data/I/O failures in scripts.
    /// - Everything else → 1: the run is all-or-nothing, so all fatal
    ///   conditions past argument parsing look the same to the caller.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Io(_)
            | Self::TruncatedImage { .. }
            | Self::Format(_)
            | Self::Parse(_)
            | Self::Corruption { .. } => 1,
        }
    }
}

/// Result alias using `DefragError`.
pub type Result<T> = std::result::Result<T, DefragError>;
