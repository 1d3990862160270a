//! Remote device synchronization.
//!
//! Before a script session talks to a remote node the node must be
//! synchronized: a device-init exchange that resets it onto its
//! operational configuration. The manager tracks one state per device
//! and parks at most one waiting script session per device; the result
//! is handed back through the engine when the exchange settles.
//!
//! A device-init start is only answered when it fails, so a device
//! counts as synchronized once the command is on the wire; an error
//! reply drops it back to unsynced and fails the waiter.

use heapless::Vec;

use ringnet_abi::{ApiError, DeviceState, Host, ObsToken, ResultCode, StdResult};

use crate::cmd::CmdSet;
use crate::trcv::Transceiver;

/// Maximum number of tracked remote devices.
pub const MAX_DEVICES: usize = 8;

#[derive(Clone, Copy, Debug)]
struct Device {
    node_address: u16,
    state: DeviceState,
    /// Script session waiting for the sync result.
    waiter: Option<u8>,
}

/// Outcome of a settled sync exchange, to be routed to a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncOutcome {
    pub session: u8,
    pub node_address: u16,
    pub result: StdResult,
}

#[derive(Default)]
pub struct SyncMgr {
    devices: Vec<Device, MAX_DEVICES>,
}

impl SyncMgr {
    pub const fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Current state of `node_address` (unknown devices are unsynced).
    pub fn state(&self, node_address: u16) -> DeviceState {
        self.devices
            .iter()
            .find(|d| d.node_address == node_address)
            .map_or(DeviceState::Unsynced, |d| d.state)
    }

    /// Starts synchronizing `node_address` on behalf of `session`.
    ///
    /// On success the device is `Syncing`; the settled outcome arrives
    /// via [`take_settled`](Self::take_settled) on the next service
    /// pass, or via [`on_init_error`](Self::on_init_error) if the node
    /// rejects the init.
    pub fn sync_device<H: Host>(
        &mut self,
        cmd: &mut CmdSet,
        trcv: &mut Transceiver,
        host: &mut H,
        node_address: u16,
        session: u8,
    ) -> Result<(), ApiError> {
        let idx = self.entry_for(node_address)?;
        if self.devices[idx].waiter.is_some() {
            return Err(ApiError::ApiLocked);
        }
        cmd.device_init_start(trcv, host, node_address, Some(ObsToken::RsmInit(idx as u8)))?;
        self.devices[idx].state = DeviceState::Syncing;
        self.devices[idx].waiter = Some(session);
        log::debug!("sync: device {:#x} syncing", node_address);
        Ok(())
    }

    /// Collects devices whose init went out and was not rejected;
    /// marks them synced and returns the waiters to resume.
    pub fn take_settled(&mut self) -> Vec<SyncOutcome, MAX_DEVICES> {
        let mut out = Vec::new();
        for d in self.devices.iter_mut() {
            if d.state == DeviceState::Syncing {
                if let Some(session) = d.waiter.take() {
                    d.state = DeviceState::Synced;
                    // capacity matches the device table
                    let _ = out.push(SyncOutcome {
                        session,
                        node_address: d.node_address,
                        result: StdResult::success(),
                    });
                }
            }
        }
        out
    }

    /// Handles a device-init error routed back by the command set.
    pub fn on_init_error(&mut self, device_idx: u8, result: StdResult) -> Option<SyncOutcome> {
        let d = self.devices.get_mut(device_idx as usize)?;
        d.state = DeviceState::Unsynced;
        let session = d.waiter.take()?;
        log::warn!(
            "sync: device {:#x} rejected init ({:?})",
            d.node_address,
            result.code
        );
        Some(SyncOutcome {
            session,
            node_address: d.node_address,
            result,
        })
    }

    /// Marks a device as losing its synchronization (node left the
    /// ring). A formerly synced device parks in `Unsyncing` until the
    /// next sync request picks it up; a device mid-sync falls back to
    /// `Unsynced` and its waiter is failed.
    pub fn invalidate(&mut self, node_address: u16) -> Option<SyncOutcome> {
        let d = self
            .devices
            .iter_mut()
            .find(|d| d.node_address == node_address)?;
        d.state = if d.state == DeviceState::Synced {
            DeviceState::Unsyncing
        } else {
            DeviceState::Unsynced
        };
        let session = d.waiter.take()?;
        d.state = DeviceState::Unsynced;
        Some(SyncOutcome {
            session,
            node_address,
            result: StdResult::from_code(ResultCode::Transmission),
        })
    }

    /// Drops every tracked device (termination path).
    pub fn reset(&mut self) {
        self.devices.clear();
    }

    fn entry_for(&mut self, node_address: u16) -> Result<usize, ApiError> {
        if let Some(i) = self
            .devices
            .iter()
            .position(|d| d.node_address == node_address)
        {
            return Ok(i);
        }
        self.devices
            .push(Device {
                node_address,
                state: DeviceState::Unsynced,
                waiter: None,
            })
            .map_err(|_| ApiError::BufferOverflow)?;
        Ok(self.devices.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringnet_abi::EngineError;

    struct NullHost;

    impl Host for NullHost {
        fn get_tick_count(&mut self) -> u16 {
            0
        }
        fn set_timer(&mut self, _ms: u16) {}
        fn request_service(&mut self) {}
        fn error(&mut self, _code: EngineError) {}
        fn tx_enqueue(&mut self, _frame: &[u8]) {}
    }

    #[test]
    fn sync_then_settle() {
        let mut mgr = SyncMgr::new();
        let mut cmd = CmdSet::new();
        let mut trcv = Transceiver::new();
        let mut host = NullHost;

        assert_eq!(mgr.state(0x0110), DeviceState::Unsynced);
        mgr.sync_device(&mut cmd, &mut trcv, &mut host, 0x0110, 0)
            .unwrap();
        assert_eq!(mgr.state(0x0110), DeviceState::Syncing);

        let settled = mgr.take_settled();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].session, 0);
        assert!(settled[0].result.is_success());
        assert_eq!(mgr.state(0x0110), DeviceState::Synced);
    }

    #[test]
    fn invalidate_parks_synced_device_in_unsyncing() {
        let mut mgr = SyncMgr::new();
        let mut cmd = CmdSet::new();
        let mut trcv = Transceiver::new();
        let mut host = NullHost;

        mgr.sync_device(&mut cmd, &mut trcv, &mut host, 0x0130, 1)
            .unwrap();
        let _ = mgr.take_settled();
        assert_eq!(mgr.state(0x0130), DeviceState::Synced);

        assert!(mgr.invalidate(0x0130).is_none());
        assert_eq!(mgr.state(0x0130), DeviceState::Unsyncing);

        // the next sync request picks the device back up
        mgr.sync_device(&mut cmd, &mut trcv, &mut host, 0x0130, 1)
            .unwrap();
        assert_eq!(mgr.state(0x0130), DeviceState::Syncing);
    }

    #[test]
    fn init_error_unsyncs_and_fails_waiter() {
        let mut mgr = SyncMgr::new();
        let mut cmd = CmdSet::new();
        let mut trcv = Transceiver::new();
        let mut host = NullHost;

        mgr.sync_device(&mut cmd, &mut trcv, &mut host, 0x0120, 2)
            .unwrap();
        let outcome = mgr
            .on_init_error(0, StdResult::from_code(ResultCode::NotAvailable))
            .unwrap();
        assert_eq!(outcome.session, 2);
        assert_eq!(mgr.state(0x0120), DeviceState::Unsynced);
        assert!(mgr.take_settled().is_empty());
    }
}
