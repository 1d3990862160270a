//! Fatal engine errors and termination events.

use core::fmt;

use bitflags::bitflags;

/// Fatal condition reported through [`Host::error`](crate::Host::error).
///
/// After such a report the engine has broadcast a termination event,
/// released its tx messages and cancelled its timers; the application
/// must re-initialize before using it again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// The engine was stopped while operations were in flight.
    Stopped,
    /// An FSM received an event outside its table.
    InvalidEvent,
    /// Internal consistency check failed.
    Inconsistent,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "engine stopped during operation"),
            Self::InvalidEvent => write!(f, "state machine received an unknown event"),
            Self::Inconsistent => write!(f, "internal consistency check failed"),
        }
    }
}

bitflags! {
    /// Event classes broadcast on the internal event bus.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct EventMask: u32 {
        /// Fatal error, all machines must close out.
        const TERMINATION = 1 << 0;
        /// Engine initialization completed.
        const INIT_DONE = 1 << 1;
        /// The network left the available state.
        const NET_OFF = 1 << 2;
    }
}
