//! kindling — a single-host microVM control plane.
//!
//! Provisions, starts, stops, and tears down isolated microVM instances,
//! leasing the scarce host resources each instance needs (guest IP
//! addresses, tap devices, private rootfs images) and keeping an
//! authoritative in-memory registry of instance state.
//!
//! The crate is transport-agnostic: an HTTP layer or CLI embeds an
//! [`Orchestrator`] and maps its results onto the wire. State is
//! in-memory only; it does not survive a process restart.
//!
//! # Example
//!
//! ```no_run
//! use kindling::{Orchestrator, OrchestratorOptions, VmSpec};
//! use kindling::vmm::FirecrackerAdapter;
//!
//! # fn main() -> Result<(), kindling::KindlingError> {
//! let orchestrator =
//!     Orchestrator::new(OrchestratorOptions::from_env(), FirecrackerAdapter::new())?;
//!
//! let vm = orchestrator.create(VmSpec {
//!     name: "web-1".into(),
//!     vcpus: 2,
//!     memory_mib: 1024,
//!     disk_gib: 20,
//!     image: "base-a".into(),
//! })?;
//! orchestrator.start(&vm.id)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod layout;
pub mod logging;
pub mod net;
pub mod orchestrator;
pub mod rootfs;
pub mod types;
pub mod vmm;

pub use config::{OrchestratorOptions, ResourceLimits};
pub use errors::{KindlingError, KindlingResult, ProvisionError};
pub use orchestrator::Orchestrator;
pub use types::{VmId, VmInfo, VmSpec, VmStatus};
pub use vmm::Hypervisor;
