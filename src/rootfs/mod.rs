//! Rootfs provisioning: materialize a private, correctly-sized copy of a
//! base image for one VM.
//!
//! The pipeline verifies its environment before touching any bytes and
//! reports each failure with the stage that produced it, so a failed
//! provision is diagnosable from the error alone.

use std::fs::{self, File, OpenOptions};
use std::path::Path;

use crate::errors::ProvisionError;

mod copy;
mod resize;

use copy::CopyStrategy;

const GIB: u64 = 1024 * 1024 * 1024;

/// Copies a base image into place and grows it to the requested size.
pub struct RootfsProvisioner {
    strategies: Vec<Box<dyn CopyStrategy>>,
}

impl Default for RootfsProvisioner {
    fn default() -> Self {
        Self {
            strategies: copy::default_strategies(),
        }
    }
}

impl RootfsProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn with_strategies(strategies: Vec<Box<dyn CopyStrategy>>) -> Self {
        Self { strategies }
    }

    /// Run the full pipeline: validate source, prepare destination, check
    /// capacity, copy, verify, grow.
    ///
    /// On success the destination file is exactly
    /// `max(source size, requested_gib GiB)` bytes. On failure the partial
    /// destination file, if any, is removed.
    pub fn provision(
        &self,
        base_image: &Path,
        dest: &Path,
        requested_gib: u64,
    ) -> Result<(), ProvisionError> {
        let result = self.provision_inner(base_image, dest, requested_gib);
        if result.is_err() {
            // Leave no partial image behind.
            let _ = fs::remove_file(dest);
        }
        result
    }

    fn provision_inner(
        &self,
        base_image: &Path,
        dest: &Path,
        requested_gib: u64,
    ) -> Result<(), ProvisionError> {
        // 1. Resolve and validate the source image.
        let source_size = validate_source(base_image)?;

        // 2. Prepare the destination directory and probe writability.
        let dest_dir = dest.parent().unwrap_or(Path::new("."));
        prepare_destination(dest_dir)?;

        // 3. Capacity check before any bytes move.
        let required = requested_gib.saturating_mul(GIB);
        check_capacity(dest_dir, required)?;

        tracing::info!(
            src = %base_image.display(),
            dest = %dest.display(),
            source_bytes = source_size,
            requested_bytes = required,
            "provisioning rootfs"
        );

        // 4. Copy with escalating strategies.
        self.copy_with_fallback(base_image, dest)?;

        // 5. Verify: an exact size match, or the copy silently truncated.
        let dest_size = fs::metadata(dest)
            .map(|m| m.len())
            .map_err(|_| ProvisionError::SizeMismatch {
                path: dest.to_path_buf(),
                expected: source_size,
                actual: 0,
            })?;
        if dest_size != source_size {
            return Err(ProvisionError::SizeMismatch {
                path: dest.to_path_buf(),
                expected: source_size,
                actual: dest_size,
            });
        }

        // 6. Grow to the requested size when it exceeds the base image.
        if required > source_size {
            resize::grow(dest, required)?;
        }

        tracing::info!(dest = %dest.display(), "rootfs provisioned");
        Ok(())
    }

    fn copy_with_fallback(&self, src: &Path, dest: &Path) -> Result<(), ProvisionError> {
        let mut attempts = Vec::new();
        for strategy in &self.strategies {
            match strategy.copy(src, dest) {
                Ok(()) => {
                    tracing::debug!(strategy = strategy.name(), "copy strategy succeeded");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        error = %e,
                        "copy strategy failed, trying next"
                    );
                    attempts.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }
        Err(ProvisionError::CopyFailed {
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
            attempts: attempts.join("; "),
        })
    }
}

/// Stage 1: the base image must exist and open for read. Returns its size.
fn validate_source(base_image: &Path) -> Result<u64, ProvisionError> {
    let metadata = fs::metadata(base_image).map_err(|_| ProvisionError::BaseImageMissing {
        path: base_image.to_path_buf(),
    })?;
    File::open(base_image).map_err(|source| ProvisionError::BaseImageUnreadable {
        path: base_image.to_path_buf(),
        source,
    })?;
    Ok(metadata.len())
}

/// Stage 2: create the destination directory and prove it is writable by
/// creating and removing a probe file.
fn prepare_destination(dest_dir: &Path) -> Result<(), ProvisionError> {
    fs::create_dir_all(dest_dir).map_err(|source| ProvisionError::DestinationNotWritable {
        dir: dest_dir.to_path_buf(),
        source,
    })?;

    let probe = dest_dir.join(".write-probe");
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&probe)
        .map_err(|source| ProvisionError::DestinationNotWritable {
            dir: dest_dir.to_path_buf(),
            source,
        })?;
    let _ = fs::remove_file(&probe);
    Ok(())
}

/// Stage 3: compare required bytes against the destination filesystem's
/// available space.
fn check_capacity(dest_dir: &Path, required: u64) -> Result<(), ProvisionError> {
    let stat =
        nix::sys::statvfs::statvfs(dest_dir).map_err(|e| ProvisionError::SpaceQueryFailed {
            dir: dest_dir.to_path_buf(),
            detail: e.to_string(),
        })?;
    let available = stat.blocks_available() as u64 * stat.fragment_size() as u64;

    if available < required {
        return Err(ProvisionError::InsufficientSpace {
            dir: dest_dir.to_path_buf(),
            required,
            available,
        });
    }
    Ok(())
}
