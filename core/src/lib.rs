//! ringnet engine root.
//!
//! The [`Engine`] owns every component of the stack and is the only
//! object the host application talks to. The host drives it through
//! three entries — `service()` after a service request,
//! `report_timeout()` when the platform timer expires, `rx_ready()`
//! per received frame — and receives everything back through its
//! [`Host`](ringnet_abi::Host) implementation.

#![no_std]
#![forbid(unsafe_code)]

pub mod config;
pub mod engine;

pub use config::{Config, GeneralConfig, MgrConfig, NetworkConfig};
pub use engine::Engine;
