//! ringnet diagnostic state machines.
//!
//! One machine per procedure, all built on the same skeleton: a
//! scheduler service with a single run-me event, a supervision timer
//! kind, single-shot observer tokens for the outstanding exchanges,
//! and a termination subscription that forces the machine back to idle
//! with a closing report.

#![no_std]
#![forbid(unsafe_code)]

pub mod bcdiag;
pub mod cablelink;
pub mod discovery;
pub mod phytest;
pub mod prog;
pub mod sysdiag;

pub use bcdiag::BcDiag;
pub use cablelink::CableLinkDiag;
pub use discovery::Discovery;
pub use phytest::PhyTest;
pub use prog::Programming;
pub use sysdiag::SysDiag;
