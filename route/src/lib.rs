//! ringnet data model and route supervision.
//!
//! The nodes and routes the application registers at init, the
//! availability-driven route lifecycle, and the scripting manager that
//! walks a node's configuration scripts.

#![no_std]
#![forbid(unsafe_code)]

pub mod mgr;
pub mod model;
pub mod script;

pub use mgr::RouteMgr;
pub use model::{Endpoint, EndpointKind, Node, Route};
pub use script::ScriptMgr;
