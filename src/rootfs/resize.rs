//! Growing a provisioned rootfs to its requested size.

use std::fs::OpenOptions;
use std::path::Path;
use std::process::Command;

use crate::errors::ProvisionError;

/// Grow the image file to `requested_bytes`, then try to grow the ext4
/// filesystem inside it.
///
/// The file grow is mandatory: the instance must see a block device of the
/// requested size. The filesystem grow is best-effort; when `resize2fs` is
/// unavailable or fails, the guest can still expand the filesystem from
/// inside, so the failure is logged as a warning and swallowed.
pub(crate) fn grow(path: &Path, requested_bytes: u64) -> Result<(), ProvisionError> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|source| ProvisionError::GrowFailed {
            path: path.to_path_buf(),
            requested: requested_bytes,
            source,
        })?;
    file.set_len(requested_bytes)
        .map_err(|source| ProvisionError::GrowFailed {
            path: path.to_path_buf(),
            requested: requested_bytes,
            source,
        })?;

    grow_filesystem(path);
    Ok(())
}

fn grow_filesystem(path: &Path) {
    // resize2fs refuses to touch a filesystem that has not been checked
    // since its last mount; the fsck result itself is irrelevant here.
    let _ = Command::new("e2fsck").args(["-f", "-y"]).arg(path).output();

    match Command::new("resize2fs").arg(path).output() {
        Ok(output) if output.status.success() => {
            tracing::info!(path = %path.display(), "grew ext4 filesystem in place");
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                path = %path.display(),
                exit = ?output.status.code(),
                stderr = %stderr.trim(),
                "filesystem grow failed; guest can expand it from inside"
            );
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "resize2fs unavailable; guest can expand the filesystem from inside"
            );
        }
    }
}
