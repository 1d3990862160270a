//! ringnet shared types.
//!
//! This crate provides the canonical definitions for every type shared
//! between the engine crates and the host application. Having a single
//! source of truth eliminates:
//! - Duplicate type definitions
//! - Drift between the message plane and the state machines
//! - Conversion shims at crate boundaries
//!
//! Nothing in here allocates and nothing in here talks to the network;
//! the only logic is value validation and the signature byte codec.

#![no_std]
#![forbid(unsafe_code)]

pub mod addr;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod optype;
pub mod report;
pub mod result;
pub mod script;
pub mod signature;
pub mod status;

pub use addr::*;
pub use dispatch::*;
pub use error::*;
pub use host::Host;
pub use optype::OpType;
pub use report::*;
pub use result::*;
pub use script::*;
pub use signature::{SIGNATURE_LEN_V1, SIGNATURE_VERSION, Signature};
pub use status::*;

/// Maximum control-telegram payload in bytes.
///
/// Larger payloads are only legal for unicast destinations; the
/// transceiver enforces this at send time.
pub const MAX_PAYLOAD: usize = 45;
