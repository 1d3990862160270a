//! Single-shot cable-link diagnosis.
//!
//! Asks one node to measure the link quality on one of its ports and
//! reports `{port, quality}`. Used standalone through the public API;
//! the system diagnosis drives the same command through its own
//! observer when a segment goes dead.

use ringnet_abi::{
    ApiError, CableLinkResult, Host, ObsToken, ResultCode, TimerKind,
};
use ringnet_net::cmd::ExcData;
use ringnet_net::ctx::Ctx;
use ringnet_net::ExcResult;

/// Supervision window; the measurement itself takes seconds.
const TIMEOUT_CABLE_DIAG: u16 = 3000;

/// One in-flight measurement.
#[derive(Default)]
pub struct CableLinkDiag {
    busy: bool,
    port: u8,
}

impl CableLinkDiag {
    pub const fn new() -> Self {
        Self {
            busy: false,
            port: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.busy
    }

    /// Starts a measurement on `port` of `target`.
    pub fn start<H: Host>(
        &mut self,
        ctx: &mut Ctx<'_, H>,
        target: u16,
        port: u8,
    ) -> Result<(), ApiError> {
        if self.busy {
            return Err(ApiError::ApiLocked);
        }
        ctx.cmd
            .cable_link_start(ctx.trcv, ctx.host, target, port, ObsToken::CableLink)?;
        self.busy = true;
        self.port = port;
        ctx.arm_timer(TimerKind::CableLink, 0, TIMEOUT_CABLE_DIAG);
        Ok(())
    }

    pub fn on_result<H: Host>(&mut self, res: &ExcResult, ctx: &mut Ctx<'_, H>) {
        ctx.cancel_timer(TimerKind::CableLink, 0);
        self.busy = false;
        if let (true, ExcData::CableLink(link)) = (res.result.is_success(), &res.data) {
            ctx.host.cable_link_report(CableLinkResult {
                port: link.port_number,
                quality: link.result,
            });
        } else {
            log::warn!("cablelink: measurement failed ({:?})", res.result.code);
            ctx.host.cable_link_report(CableLinkResult {
                port: self.port,
                quality: ResultCode::Timeout as u8,
            });
        }
    }

    pub fn on_timeout<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        if self.busy {
            self.busy = false;
            log::warn!("cablelink: supervision expired on port {}", self.port);
            ctx.host.cable_link_report(CableLinkResult {
                port: self.port,
                quality: ResultCode::Timeout as u8,
            });
        }
    }

    pub fn on_terminate(&mut self) {
        self.busy = false;
    }
}
