//! Physical-layer test.
//!
//! Arms a port test on the local controller with lead-in, duration and
//! lead-out, then polls the result once: `{port, lock status, coding
//! error count}`. The poll shares the reply channel with the memory
//! commands and is guarded by its API lock bit, so a second poll
//! before the first answer returns `ApiLocked` synchronously.

use ringnet_abi::{ApiError, Host, ObsToken, PhyTestResult};
use ringnet_net::cmd::ExcData;
use ringnet_net::ctx::Ctx;
use ringnet_net::ExcResult;

#[derive(Default)]
pub struct PhyTest {
    armed: bool,
}

impl PhyTest {
    pub const fn new() -> Self {
        Self { armed: false }
    }

    /// Arms the test on `port`.
    pub fn start<H: Host>(
        &mut self,
        ctx: &mut Ctx<'_, H>,
        port: u8,
        test_type: u8,
        lead_in: u16,
        duration: u32,
        lead_out: u16,
    ) -> Result<(), ApiError> {
        ctx.cmd.phy_test_start(
            ctx.trcv,
            ctx.host,
            port,
            test_type,
            lead_in,
            duration,
            lead_out,
            ObsToken::PhyTestArm,
        )?;
        self.armed = true;
        Ok(())
    }

    /// Polls the result. `NotAvailable` before a test was armed,
    /// `ApiLocked` while a poll is outstanding.
    pub fn request_result<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) -> Result<(), ApiError> {
        if !self.armed {
            return Err(ApiError::NotAvailable);
        }
        ctx.cmd
            .phy_test_result_get(ctx.trcv, ctx.host, ObsToken::PhyTestResult)
    }

    pub fn on_result<H: Host>(&mut self, token: ObsToken, res: &ExcResult, ctx: &mut Ctx<'_, H>) {
        match token {
            ObsToken::PhyTestArm => {
                // only errors are answered
                if !res.result.is_success() {
                    log::warn!("phytest: arming failed ({:?})", res.result.code);
                    self.armed = false;
                    ctx.host.phy_test_failed(res.result.code);
                }
            }
            ObsToken::PhyTestResult => {
                if let (true, ExcData::PhyTest(result)) = (res.result.is_success(), &res.data) {
                    ctx.host.phy_test_report(result);
                } else {
                    log::warn!("phytest: result poll failed ({:?})", res.result.code);
                    ctx.host.phy_test_failed(res.result.code);
                }
            }
            _ => {}
        }
    }

    pub fn on_terminate(&mut self) {
        self.armed = false;
    }
}
