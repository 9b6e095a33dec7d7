//! Hypervisor abstraction and adapters.
//!
//! The core only builds machine configurations and invokes start/shutdown;
//! it treats the hypervisor as an opaque capability and never retries on
//! its behalf.

use std::time::Duration;

use crate::errors::KindlingResult;

pub mod config;
pub mod firecracker;

pub use config::{machine_config_for, MachineConfig, KERNEL_ARGS};
pub use firecracker::FirecrackerAdapter;

/// Launches and terminates the actual virtualized process.
///
/// `Handle` is whatever the adapter needs to later address the running
/// process; the orchestrator stores it inside the instance's `Running`
/// state and never inspects it.
pub trait Hypervisor: Send + Sync + 'static {
    type Handle: Send + 'static;

    /// Start a machine from a fully-populated configuration.
    ///
    /// Must return within `timeout`; a timed-out start is an error and the
    /// caller performs the same compensation as for an explicit failure.
    fn start(&self, machine: &MachineConfig, timeout: Duration) -> KindlingResult<Self::Handle>;

    /// Terminate a previously started machine.
    fn shutdown(&self, handle: &mut Self::Handle, timeout: Duration) -> KindlingResult<()>;
}
