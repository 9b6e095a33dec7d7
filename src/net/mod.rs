//! Host network resource management: IP leasing and tap device plumbing.
//!
//! Each allocator owns its own lease table behind its own lock so that
//! resource accounting never contends with registry bookkeeping.

mod ip_pool;
mod tap;

pub use ip_pool::IpPool;
pub use tap::{IpCommandOps, NetOps, TapAllocator};
