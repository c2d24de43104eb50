//! Umbrella crate re-exporting the workspace members.

#[cfg(feature = "core")]
pub use core_api;
#[cfg(feature = "client")]
pub use relay_client;
#[cfg(feature = "rpc")]
pub use relay_rpc;
