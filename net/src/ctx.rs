//! Borrowed engine context handed to state-machine code.
//!
//! The engine root owns every component; when it dispatches into a
//! machine it lends out the pieces the machine's actions need. The
//! borrows are disjoint fields of the engine, so a machine can send
//! commands, arm timers and raise service events in one action.

use ringnet_abi::{Host, ServiceId, TimerKind};
use ringnet_base::sched::Scheduler;
use ringnet_base::timer::TimerWheel;

use crate::cmd::CmdSet;
use crate::sync::SyncMgr;
use crate::trcv::Transceiver;

/// Event bit shared by every single-event machine service.
pub const EVT_SERVICE: u32 = 1;

pub struct Ctx<'a, H: Host> {
    pub host: &'a mut H,
    pub timers: &'a mut TimerWheel,
    pub sched: &'a mut Scheduler,
    pub trcv: &'a mut Transceiver,
    pub cmd: &'a mut CmdSet,
    pub sync: &'a mut SyncMgr,
    /// Host tick captured at dispatch entry.
    pub now: u16,
}

impl<'a, H: Host> Ctx<'a, H> {
    /// Arms a one-shot supervision timer, replacing any armed instance
    /// of the same `(kind, key)`.
    pub fn arm_timer(&mut self, kind: TimerKind, key: u8, delay_ms: u16) {
        self.timers.cancel(kind, key);
        // capacity: each (kind, key) owner arms at most one timer
        let _ = self.timers.arm(self.now, kind, key, delay_ms, 0);
    }

    pub fn cancel_timer(&mut self, kind: TimerKind, key: u8) {
        self.timers.cancel(kind, key);
    }

    /// Raises the run-me event on a machine service.
    pub fn trigger(&mut self, service: ServiceId) {
        self.sched.set_event(service, EVT_SERVICE);
    }
}
