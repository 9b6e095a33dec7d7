//! Host filesystem layout for the orchestrator home directory.

use std::path::{Path, PathBuf};

use crate::errors::{KindlingError, KindlingResult};
use crate::types::VmId;

/// Directory structure constants
pub mod dirs {
    /// Subdirectory for read-only base images
    pub const IMAGES_DIR: &str = "images";

    /// Subdirectory for per-VM working directories
    pub const VMS_DIR: &str = "vms";

    /// Subdirectory for log files
    pub const LOGS_DIR: &str = "logs";
}

/// Well-known file names inside a VM working directory.
pub mod filenames {
    /// Private rootfs copy
    pub const ROOTFS: &str = "rootfs.ext4";

    /// Hypervisor control socket
    pub const SOCKET: &str = "firecracker.sock";

    /// Serialized machine configuration handed to the hypervisor
    pub const MACHINE_CONFIG: &str = "machine.json";

    /// Extension appended to a base image reference to resolve it on disk
    pub const IMAGE_EXT: &str = "ext4";
}

/// Paths under the orchestrator home directory.
///
/// The per-VM working directory (`vms/<id>`) holds the control socket and
/// the private rootfs copy; it is the unit of cleanup on delete.
#[derive(Clone, Debug)]
pub struct FilesystemLayout {
    home_dir: PathBuf,
}

impl FilesystemLayout {
    pub fn new(home_dir: PathBuf) -> Self {
        Self { home_dir }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn images_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::IMAGES_DIR)
    }

    pub fn vms_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::VMS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join(dirs::LOGS_DIR)
    }

    /// Working directory for one VM: `<home>/vms/<id>`
    pub fn vm_dir(&self, id: &VmId) -> PathBuf {
        self.vms_dir().join(id.to_string())
    }

    pub fn rootfs_path(&self, id: &VmId) -> PathBuf {
        self.vm_dir(id).join(filenames::ROOTFS)
    }

    pub fn socket_path(&self, id: &VmId) -> PathBuf {
        self.vm_dir(id).join(filenames::SOCKET)
    }

    pub fn machine_config_path(&self, id: &VmId) -> PathBuf {
        self.vm_dir(id).join(filenames::MACHINE_CONFIG)
    }

    /// Resolve a base image reference to its on-disk path:
    /// `<home>/images/<ref>.ext4`
    pub fn base_image_path(&self, image_ref: &str) -> PathBuf {
        self.images_dir()
            .join(format!("{}.{}", image_ref, filenames::IMAGE_EXT))
    }

    /// Initialize the filesystem structure.
    ///
    /// Creates the home, images, vms, and logs directories.
    pub fn prepare(&self) -> KindlingResult<()> {
        for dir in [
            self.home_dir.clone(),
            self.images_dir(),
            self.vms_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                KindlingError::Internal(format!("failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}
