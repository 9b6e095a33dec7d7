//! Error types for the orchestration core.
//!
//! Errors are categorized by recovery path:
//! - [`KindlingError::Validation`]: user-fixable request problems, rejected
//!   before any resource is touched
//! - [`KindlingError::Exhausted`]: host capacity problems, retryable once
//!   capacity is freed
//! - [`ProvisionError`]: rootfs pipeline failures with per-stage context
//! - launch/shutdown variants: hypervisor adapter failures, surfaced verbatim

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type KindlingResult<T> = Result<T, KindlingError>;

/// Errors that can occur during VM lifecycle operations.
#[derive(Debug, Error)]
pub enum KindlingError {
    /// Request failed validation (bad bounds, empty name). Safe to retry
    /// after correcting input; no resources were touched.
    #[error("validation: {0}")]
    Validation(String),

    /// A host resource pool is exhausted (IP addresses, VM slots).
    #[error("resource exhausted: {0}")]
    Exhausted(String),

    /// Rootfs provisioning failed; carries the failing pipeline stage.
    #[error("provisioning: {0}")]
    Provision(#[from] ProvisionError),

    /// Hypervisor start failed. The instance record survives for retry.
    #[error("launch: {0}")]
    Launch(String),

    /// Hypervisor shutdown failed. The instance stays in its prior state.
    #[error("shutdown: {0}")]
    Shutdown(String),

    /// No instance with the given id is registered.
    #[error("vm {0} not found")]
    NotFound(String),

    /// start() called on an instance that is already running.
    #[error("vm {0} is already running")]
    AlreadyRunning(String),

    /// stop() called on an instance that is not running.
    #[error("vm {0} is not running")]
    NotRunning(String),

    /// Host network plumbing (tap device / bridge) failed.
    #[error("network: {0}")]
    Network(String),

    /// Invariant violation or environment failure inside the core.
    #[error("internal: {0}")]
    Internal(String),
}

/// Rootfs provisioning failures, one variant per pipeline stage.
///
/// Each variant carries enough context (paths, sizes, tool output) for an
/// operator to act without re-running a separate diagnostic pass.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Stage 1: the base image does not exist at the resolved path.
    #[error("base image not found: {path}")]
    BaseImageMissing { path: PathBuf },

    /// Stage 1: the base image exists but cannot be opened for read.
    #[error("cannot read base image {path}: {source}")]
    BaseImageUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Stage 2: the destination directory cannot be created or written.
    #[error("cannot write to destination directory {dir}: {source}")]
    DestinationNotWritable {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Stage 3: free-space query on the destination filesystem failed.
    #[error("cannot query free space for {dir}: {detail}")]
    SpaceQueryFailed { dir: PathBuf, detail: String },

    /// Stage 3: the destination filesystem cannot hold the requested size.
    #[error(
        "insufficient disk space on {dir}: need {required} bytes, have {available} bytes"
    )]
    InsufficientSpace {
        dir: PathBuf,
        required: u64,
        available: u64,
    },

    /// Stage 4: every copy strategy failed. `attempts` holds the context
    /// of each attempt in order.
    #[error("all copy strategies failed for {src} -> {dest}: {attempts}")]
    CopyFailed {
        src: PathBuf,
        dest: PathBuf,
        attempts: String,
    },

    /// Stage 5: the copied file's size does not match the source. This is
    /// kept distinct from a copy-command failure because it indicates
    /// silent truncation.
    #[error(
        "copy verification failed for {path}: source {expected} bytes, destination {actual} bytes"
    )]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Stage 6: growing the destination file to the requested size failed.
    /// A filesystem-grow failure is only a warning; this variant is the
    /// block-device grow itself failing.
    #[error("failed to grow {path} to {requested} bytes: {source}")]
    GrowFailed {
        path: PathBuf,
        requested: u64,
        #[source]
        source: io::Error,
    },
}
