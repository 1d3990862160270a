//! Network status decoding and fan-out.
//!
//! The local controller pushes status telegrams; this module decodes
//! them, tracks the previous value, and tells the engine which
//! subscribed services need a look plus which fields changed for the
//! application report.

use heapless::Vec;

use ringnet_abi::{Availability, NetworkEvents, NetworkStatus, ServiceId, StatusMask};
use ringnet_base::obs::{ObsError, Subject};

use crate::msg::ControlMsg;

/// Capacity of the status fan-out table.
pub const MAX_STATUS_OBSERVERS: usize = 8;

/// Minimum payload of a status telegram.
const STATUS_MIN_LEN: usize = 10;

/// Tracks the last seen status and its observers.
#[derive(Default)]
pub struct NetworkMonitor {
    subject: Subject<ServiceId, MAX_STATUS_OBSERVERS>,
    current: NetworkStatus,
    seen_any: bool,
}

/// Result of feeding one status telegram into the monitor.
pub struct StatusUpdate {
    pub status: NetworkStatus,
    /// Fields that differ from the previous telegram.
    pub changed: StatusMask,
    /// Services subscribed to status changes.
    pub observers: Vec<ServiceId, MAX_STATUS_OBSERVERS>,
}

impl NetworkMonitor {
    pub const fn new() -> Self {
        Self {
            subject: Subject::new(),
            current: NetworkStatus {
                events: NetworkEvents::empty(),
                availability: Availability::NotAvailable,
                avail_info: 0,
                avail_trans_cause: 0,
                node_address: 0,
                node_position: 0,
                max_position: 0,
                packet_bw: 0,
            },
            seen_any: false,
        }
    }

    pub fn subscribe(&mut self, service: ServiceId) -> Result<(), ObsError> {
        self.subject.add(service)
    }

    pub fn unsubscribe(&mut self, service: ServiceId) -> bool {
        self.subject.remove(service)
    }

    /// Last decoded status.
    pub fn current(&self) -> &NetworkStatus {
        &self.current
    }

    /// `true` while the ring is available.
    pub fn is_available(&self) -> bool {
        self.current.availability == Availability::Available
    }

    /// Decodes a status telegram payload:
    ///
    /// ```text
    /// 0..2  event mask        6..8  node address
    /// 2     availability      8     node position
    /// 3     availability info 9     max position
    /// 4..6  packet bandwidth  (trailing bytes ignored)
    /// ```
    ///
    /// plus byte 3's high nibble as the transition cause. Undersized
    /// telegrams are dropped.
    pub fn on_rx(&mut self, msg: &ControlMsg) -> Option<StatusUpdate> {
        let p = &msg.payload;
        if p.len() < STATUS_MIN_LEN {
            return None;
        }
        let status = NetworkStatus {
            events: NetworkEvents::from_bits_truncate(u16::from_be_bytes([p[0], p[1]])),
            availability: if p[2] != 0 {
                Availability::Available
            } else {
                Availability::NotAvailable
            },
            avail_info: p[3] & 0x0F,
            avail_trans_cause: p[3] >> 4,
            packet_bw: u16::from_be_bytes([p[4], p[5]]),
            node_address: u16::from_be_bytes([p[6], p[7]]),
            node_position: p[8],
            max_position: p[9],
        };

        let mut changed = StatusMask::empty();
        let prev = &self.current;
        if !self.seen_any || status.events != prev.events {
            changed |= StatusMask::EVENTS;
        }
        if !self.seen_any || status.availability != prev.availability {
            changed |= StatusMask::AVAILABILITY;
        }
        if !self.seen_any || status.avail_info != prev.avail_info {
            changed |= StatusMask::AVAIL_INFO;
        }
        if !self.seen_any || status.avail_trans_cause != prev.avail_trans_cause {
            changed |= StatusMask::AVAIL_TRANS_CAUSE;
        }
        if !self.seen_any || status.node_address != prev.node_address {
            changed |= StatusMask::NODE_ADDRESS;
        }
        if !self.seen_any || status.node_position != prev.node_position {
            changed |= StatusMask::NODE_POSITION;
        }
        if !self.seen_any || status.max_position != prev.max_position {
            changed |= StatusMask::MAX_POSITION;
        }
        if !self.seen_any || status.packet_bw != prev.packet_bw {
            changed |= StatusMask::PACKET_BW;
        }

        self.current = status;
        self.seen_any = true;
        log::debug!(
            "status: availability={:?} changed={:?}",
            status.availability,
            changed
        );
        Some(StatusUpdate {
            status,
            changed,
            observers: self.subject.notify(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{FB_NIC, FID_NIC_NET_STATUS, MsgId};
    use ringnet_abi::OpType;

    fn status_msg(avail: bool, node_address: u16) -> ControlMsg {
        let mut msg = ControlMsg::blank();
        msg.id = MsgId {
            fblock_id: FB_NIC,
            instance_id: 0,
            function_id: FID_NIC_NET_STATUS,
            op_type: OpType::Status,
        };
        let mut p = [0u8; STATUS_MIN_LEN];
        p[2] = avail as u8;
        p[6..8].copy_from_slice(&node_address.to_be_bytes());
        p[9] = 3;
        msg.set_payload(&p).unwrap();
        msg
    }

    #[test]
    fn first_update_reports_everything() {
        let mut mon = NetworkMonitor::new();
        mon.subscribe(ServiceId::Prog).unwrap();
        let update = mon.on_rx(&status_msg(true, 0x0101)).unwrap();
        assert!(update.changed.contains(StatusMask::AVAILABILITY));
        assert!(update.changed.contains(StatusMask::NODE_ADDRESS));
        assert_eq!(update.observers.as_slice(), &[ServiceId::Prog]);
        assert!(mon.is_available());
    }

    #[test]
    fn unchanged_fields_not_flagged() {
        let mut mon = NetworkMonitor::new();
        mon.on_rx(&status_msg(true, 0x0101)).unwrap();
        let update = mon.on_rx(&status_msg(false, 0x0101)).unwrap();
        assert!(update.changed.contains(StatusMask::AVAILABILITY));
        assert!(!update.changed.contains(StatusMask::NODE_ADDRESS));
        assert!(!mon.is_available());
    }

    #[test]
    fn undersized_status_dropped() {
        let mut mon = NetworkMonitor::new();
        let mut msg = ControlMsg::blank();
        msg.set_payload(&[0; 4]).unwrap();
        assert!(mon.on_rx(&msg).is_none());
    }
}
