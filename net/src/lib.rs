//! ringnet message plane.
//!
//! Everything between the state machines and the byte link: the
//! control telegram and its frame codec, the bounded tx message pool,
//! the transceiver façade, the diagnostic command set with its rx
//! dispatch table and API locks, network-status fan-out and remote
//! device synchronization.

#![no_std]
#![forbid(unsafe_code)]

pub mod cmd;
pub mod ctx;
pub mod frame;
pub mod msg;
pub mod pool;
pub mod status;
pub mod sync;
pub mod trcv;

pub use cmd::{CmdSet, ExcData, ExcResult};
pub use ctx::{Ctx, EVT_SERVICE};
pub use msg::{ControlMsg, MsgId};
pub use pool::{TxPool, TxToken};
pub use status::NetworkMonitor;
pub use sync::SyncMgr;
pub use trcv::Transceiver;
