//! Internal event bus.
//!
//! Fatal conditions and lifecycle events fan out to every machine that
//! subscribed with a matching mask. The bus stores [`ServiceId`]
//! tokens; the engine root dispatches the returned list to the owning
//! machines, which close out with their terminal reports.

use ringnet_abi::{EventMask, ServiceId};

use crate::obs::{MaskedSubject, ObsError};

/// Capacity of the bus subscription table.
pub const MAX_BUS_OBSERVERS: usize = 12;

pub struct EventBus {
    subject: MaskedSubject<ServiceId, MAX_BUS_OBSERVERS>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub const fn new() -> Self {
        Self {
            subject: MaskedSubject::new(),
        }
    }

    /// Subscribes `service` to every event class in `mask`.
    pub fn subscribe(&mut self, service: ServiceId, mask: EventMask) -> Result<(), ObsError> {
        self.subject.add(service, mask.bits())
    }

    pub fn unsubscribe(&mut self, service: ServiceId) -> bool {
        self.subject.remove(service)
    }

    /// Services subscribed to any class in `mask`, in subscription
    /// order.
    pub fn broadcast(&self, mask: EventMask) -> heapless::Vec<ServiceId, MAX_BUS_OBSERVERS> {
        self.subject.notify(mask.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_reaches_matching_subscribers() {
        let mut bus = EventBus::new();
        bus.subscribe(ServiceId::SysDiag, EventMask::TERMINATION)
            .unwrap();
        bus.subscribe(ServiceId::Prog, EventMask::TERMINATION | EventMask::NET_OFF)
            .unwrap();
        bus.subscribe(ServiceId::Routing, EventMask::INIT_DONE)
            .unwrap();

        let hit = bus.broadcast(EventMask::TERMINATION);
        assert_eq!(hit.as_slice(), &[ServiceId::SysDiag, ServiceId::Prog]);
        let hit = bus.broadcast(EventMask::NET_OFF);
        assert_eq!(hit.as_slice(), &[ServiceId::Prog]);
    }

    #[test]
    fn duplicate_subscription_rejected() {
        let mut bus = EventBus::new();
        bus.subscribe(ServiceId::SysDiag, EventMask::TERMINATION)
            .unwrap();
        assert!(
            bus.subscribe(ServiceId::SysDiag, EventMask::NET_OFF)
                .is_err()
        );
        assert!(bus.unsubscribe(ServiceId::SysDiag));
        bus.subscribe(ServiceId::SysDiag, EventMask::NET_OFF).unwrap();
    }
}
