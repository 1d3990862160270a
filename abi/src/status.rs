//! Network status as reported by the local controller.

use bitflags::bitflags;

/// Availability of the ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Availability {
    #[default]
    NotAvailable,
    Available,
}

bitflags! {
    /// Which fields of a status update the application wants reported.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct StatusMask: u16 {
        const EVENTS            = 1 << 0;
        const AVAILABILITY      = 1 << 1;
        const AVAIL_INFO        = 1 << 2;
        const AVAIL_TRANS_CAUSE = 1 << 3;
        const NODE_ADDRESS      = 1 << 4;
        const NODE_POSITION     = 1 << 5;
        const MAX_POSITION      = 1 << 6;
        const PACKET_BW         = 1 << 7;
    }
}

bitflags! {
    /// Asynchronous network events flagged inside a status update.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct NetworkEvents: u16 {
        /// Node configuration (maximum position) changed.
        const NCE = 1 << 0;
        /// Surface unlock / stable-lock loss.
        const SURFACE = 1 << 1;
    }
}

/// Decoded network status record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkStatus {
    pub events: NetworkEvents,
    pub availability: Availability,
    pub avail_info: u8,
    pub avail_trans_cause: u8,
    pub node_address: u16,
    pub node_position: u8,
    pub max_position: u8,
    pub packet_bw: u16,
}
