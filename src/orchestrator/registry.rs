//! The authoritative instance registry.
//!
//! A plain data structure: the exclusion discipline lives in the
//! orchestrator, which wraps one `Registry` in a single `RwLock` so every
//! multi-step lifecycle sequence runs atomically with respect to others.

use std::collections::HashMap;

use crate::errors::{KindlingError, KindlingResult};
use crate::types::{VmId, VmInfo, VmRecord};

/// Mapping from instance id to instance record.
#[derive(Debug, Default)]
pub struct Registry<H> {
    vms: HashMap<VmId, VmRecord<H>>,
}

impl<H> Registry<H> {
    pub fn new() -> Self {
        Self {
            vms: HashMap::new(),
        }
    }

    /// Register a new record.
    ///
    /// # Errors
    ///
    /// Returns an error if a record with this id already exists; ids are
    /// generated per create, so a duplicate is an internal invariant break.
    pub fn register(&mut self, record: VmRecord<H>) -> KindlingResult<()> {
        if self.vms.contains_key(&record.id) {
            return Err(KindlingError::Internal(format!(
                "vm {} already registered",
                record.id
            )));
        }
        tracing::debug!(vm_id = %record.id, "registering vm");
        self.vms.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: &VmId) -> Option<&VmRecord<H>> {
        self.vms.get(id)
    }

    pub fn get_mut(&mut self, id: &VmId) -> Option<&mut VmRecord<H>> {
        self.vms.get_mut(id)
    }

    pub fn remove(&mut self, id: &VmId) -> Option<VmRecord<H>> {
        self.vms.remove(id)
    }

    pub fn contains(&self, id: &VmId) -> bool {
        self.vms.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.vms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vms.is_empty()
    }

    /// Snapshots of every record, newest first.
    pub fn infos(&self) -> Vec<VmInfo> {
        let mut infos: Vec<VmInfo> = self.vms.values().map(|r| r.to_info()).collect();
        infos.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Lifecycle, VmSpec, VmStatus};
    use chrono::Utc;
    use std::net::Ipv4Addr;
    use std::path::PathBuf;

    fn record(host: u8) -> VmRecord<u32> {
        let id = VmId::new();
        VmRecord {
            id,
            spec: VmSpec {
                name: format!("vm-{}", host),
                vcpus: 1,
                memory_mib: 128,
                disk_gib: 1,
                image: "base-a".into(),
            },
            ip: Ipv4Addr::new(192, 168, 100, host),
            tap_device: format!("tap-{}", id.short()),
            vm_dir: PathBuf::from("/tmp/vm"),
            socket_path: PathBuf::from("/tmp/vm/firecracker.sock"),
            rootfs_path: PathBuf::from("/tmp/vm/rootfs.ext4"),
            kernel_path: PathBuf::from("/tmp/vmlinux.bin"),
            created_at: Utc::now(),
            lifecycle: Lifecycle::Created,
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = Registry::new();
        let r = record(10);
        let id = r.id;
        registry.register(r).unwrap();

        let fetched = registry.get(&id).unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.lifecycle.status(), VmStatus::Created);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = Registry::new();
        let r1 = record(10);
        let mut r2 = record(11);
        r2.id = r1.id;

        registry.register(r1).unwrap();
        let err = registry.register(r2).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn test_remove_returns_record() {
        let mut registry = Registry::new();
        let r = record(10);
        let id = r.id;
        registry.register(r).unwrap();

        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.id, id);
        assert!(registry.is_empty());
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn test_infos_snapshots_every_record() {
        let mut registry = Registry::new();
        registry.register(record(10)).unwrap();
        registry.register(record(11)).unwrap();
        registry.register(record(12)).unwrap();

        let infos = registry.infos();
        assert_eq!(infos.len(), 3);
        assert!(infos.iter().all(|i| i.status == VmStatus::Created));
    }
}
