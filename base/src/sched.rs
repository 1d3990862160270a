//! Cooperative scheduler.
//!
//! Services register once with a priority byte and are driven by event
//! bitmasks. A scheduling pass takes one snapshot of the pending set
//! and services each entry at most once, so a service that re-raises
//! its own events cannot starve the others; the fresh events are
//! honored on the next pass.
//!
//! The scheduler never calls into a service itself. The engine root
//! fetches the snapshot and dispatches by matching on [`ServiceId`],
//! which keeps this module free of borrows into the components it
//! schedules.

use heapless::Vec;

use ringnet_abi::ServiceId;

/// Maximum number of registered services.
pub const MAX_SERVICES: usize = 12;

/// Event bitmask of one service.
pub type EventMask = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedError {
    /// The service is already registered.
    AlreadyRegistered,
    /// The service table is full.
    Capacity,
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    id: ServiceId,
    priority: u8,
    events: EventMask,
}

/// One snapshot entry: a service and the events it had pending when
/// the pass began.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pending {
    pub id: ServiceId,
    pub events: EventMask,
}

#[derive(Default)]
pub struct Scheduler {
    slots: Vec<Slot, MAX_SERVICES>,
    /// A pass is in flight; suppresses service requests from within.
    in_pass: bool,
    /// An event was raised from the idle state; the host should
    /// schedule a `service()` call.
    service_request: bool,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            in_pass: false,
            service_request: false,
        }
    }

    /// Registers a service. Higher `priority` services come earlier in
    /// a pass; equal priorities keep registration order.
    pub fn register(&mut self, id: ServiceId, priority: u8) -> Result<(), SchedError> {
        if self.slots.iter().any(|s| s.id == id) {
            return Err(SchedError::AlreadyRegistered);
        }
        self.slots
            .push(Slot {
                id,
                priority,
                events: 0,
            })
            .map_err(|_| SchedError::Capacity)
    }

    /// Removes a service and its pending events.
    pub fn unregister(&mut self, id: ServiceId) -> bool {
        let before = self.slots.len();
        self.slots.retain(|s| s.id != id);
        self.slots.len() != before
    }

    /// Raises `mask` on `id`. Raising events while the engine is idle
    /// records a service request for the host.
    pub fn set_event(&mut self, id: ServiceId, mask: EventMask) {
        let was_pending = self.has_pending();
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == id) {
            slot.events |= mask;
        }
        if !was_pending && self.has_pending() && !self.in_pass {
            self.service_request = true;
        }
    }

    /// Clears `mask` on `id`.
    pub fn clear_event(&mut self, id: ServiceId, mask: EventMask) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.id == id) {
            slot.events &= !mask;
        }
    }

    /// Current events of `id` (0 for unknown services).
    pub fn events(&self, id: ServiceId) -> EventMask {
        self.slots
            .iter()
            .find(|s| s.id == id)
            .map_or(0, |s| s.events)
    }

    /// `true` while any service has events pending.
    pub fn has_pending(&self) -> bool {
        self.slots.iter().any(|s| s.events != 0)
    }

    /// Opens a pass: returns the pending set ordered by priority
    /// (descending) then registration order, and clears the snapshot
    /// events so each service sees a consistent view.
    ///
    /// Must not be called while a pass is open.
    pub fn begin_pass(&mut self) -> Vec<Pending, MAX_SERVICES> {
        debug_assert!(!self.in_pass, "scheduler pass is not reentrant");
        self.in_pass = true;
        let mut snapshot: Vec<Pending, MAX_SERVICES> = Vec::new();
        for slot in &self.slots {
            if slot.events != 0 {
                // capacity bounded by the slot table
                let _ = snapshot.push(Pending {
                    id: slot.id,
                    events: slot.events,
                });
            }
        }
        // stable by construction: equal priorities keep table order
        let mut ordered: Vec<Pending, MAX_SERVICES> = Vec::new();
        while !snapshot.is_empty() {
            let mut best = 0;
            for (i, p) in snapshot.iter().enumerate() {
                if self.priority_of(p.id) > self.priority_of(snapshot[best].id) {
                    best = i;
                }
            }
            let p = snapshot.remove(best);
            let _ = ordered.push(p);
        }
        for slot in self.slots.iter_mut() {
            slot.events = 0;
        }
        ordered
    }

    /// Closes a pass. Events raised during the pass stay pending and
    /// are converted into a service request for the host.
    pub fn end_pass(&mut self) {
        self.in_pass = false;
        if self.has_pending() {
            self.service_request = true;
        }
    }

    /// Consumes the pending service request flag.
    pub fn take_service_request(&mut self) -> bool {
        core::mem::take(&mut self.service_request)
    }

    fn priority_of(&self, id: ServiceId) -> u8 {
        self.slots
            .iter()
            .find(|s| s.id == id)
            .map_or(0, |s| s.priority)
    }
}
