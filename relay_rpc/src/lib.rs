//! This crate provides domain interfaces and RPC data types that are shared
//! between the relay transport and the core client.

pub mod domain;
pub mod macros;
pub mod rpc;
pub mod serde_helpers;
