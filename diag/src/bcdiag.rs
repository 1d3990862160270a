//! Back-channel diagnosis.
//!
//! Locates a ring break using the secondary channel while the main
//! stream is down. The controller enters back-channel mode, then per
//! segment: enable the transmitter, wait for the light to propagate
//! through the preceding nodes, and probe the device under test with
//! the full timing block. A slave answer means the segment works and
//! the walk advances; a master answer means the ring is closed; no
//! answer locates the break; a device timeout ends the run with its
//! own report.

use ringnet_abi::{
    ApiError, BC_ADMIN_BASE, BcdReport, Host, ObsToken, ServiceId, TimerKind,
};
use ringnet_base::fsm::{Fsm, RunState, Transition};
use ringnet_net::cmd::{DutResult, ExcData};
use ringnet_net::ctx::Ctx;
use ringnet_net::ExcResult;

/// Supervision window for controller commands.
const TIMEOUT_COMMAND: u16 = 100;
/// Probe timing block.
const T_SEND: u16 = 0x0100;
const T_WAIT4DUT: u16 = 0x1000;
const T_SWITCH: u16 = 0x0100;
const T_BACK: u16 = 0x2000;
/// Overall probe supervision.
const TIMEOUT_RESULT: u16 = 0x3000;
/// Settling time before the next segment is probed.
const T_SIGNAL_ON: u16 = 100;
/// Base lock time plus per-node light propagation.
const T_LOCK: u16 = 100;
const T_LIGHT_PROGRESS: u16 = 20;
const AUTOBACK: bool = true;

/// Scheduler priority of the back-channel diagnosis service.
pub const SRV_PRIO: u8 = 248;

// --- states -----------------------------------------------------------------

const S_IDLE: u8 = 0;
const S_STARTED: u8 = 1;
const S_WAIT_ENABLED: u8 = 2;
const S_WAIT_SIG_PROP: u8 = 3;
const S_WAIT_SIGNAL_ON: u8 = 4;
const S_WAIT_RESULT: u8 = 5;
const S_END: u8 = 6;
const NUM_STATES: usize = 7;

// --- events -----------------------------------------------------------------

const E_START: u8 = 1;
const E_DIAGMODE_END: u8 = 2;
const E_DIAGMODE_STARTED: u8 = 3;
const E_DIAGMODE_FAILED: u8 = 4;
const E_TX_ENABLE_OK: u8 = 5;
const E_TX_ENABLE_FAILED: u8 = 6;
const E_RESULT_OK: u8 = 7;
const E_RESULT_NOTOK: u8 = 8;
const E_NET_OFF: u8 = 9;
const E_TIMEOUT: u8 = 10;
const E_ERROR: u8 = 11;
const NUM_EVENTS: usize = 12;

// --- actions ----------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Start,
    EnableTx,
    WaitLight,
    DiagStart,
    NextSeg,
    StopDiag,
    EndDiag,
    Timeout2,
    Error,
}

type Tr = Transition<Action>;

const fn none(next: u8) -> Tr {
    Tr { action: None, next }
}

const fn act(action: Action, next: u8) -> Tr {
    Tr {
        action: Some(action),
        next,
    }
}

/// Row-major transition table.
///
/// Column order: nil, start, diagmode-end, diagmode-started,
/// diagmode-failed, tx-enable-ok, tx-enable-failed, result-ok,
/// result-notok, net-off, timeout, error.
///
/// The net-off column is wired to no transition anywhere; the status
/// observer raises the event but the walk deliberately rides out the
/// condition (the main stream is already down in this mode).
#[rustfmt::skip]
const TAB: [[Tr; NUM_EVENTS]; NUM_STATES] = [
    // S_IDLE
    [none(S_IDLE), act(Action::Start, S_STARTED), none(S_IDLE), none(S_IDLE),
     none(S_IDLE), none(S_IDLE), none(S_IDLE), none(S_IDLE), none(S_IDLE),
     none(S_IDLE), none(S_IDLE), none(S_IDLE)],
    // S_STARTED
    [none(S_STARTED), none(S_STARTED), none(S_STARTED),
     act(Action::EnableTx, S_WAIT_ENABLED), none(S_STARTED), none(S_STARTED),
     none(S_STARTED), none(S_STARTED), none(S_STARTED), none(S_STARTED),
     act(Action::Timeout2, S_IDLE), act(Action::Error, S_IDLE)],
    // S_WAIT_ENABLED
    [none(S_WAIT_ENABLED), none(S_WAIT_ENABLED), none(S_WAIT_ENABLED),
     none(S_WAIT_ENABLED), none(S_WAIT_ENABLED),
     act(Action::WaitLight, S_WAIT_SIG_PROP), act(Action::Error, S_IDLE),
     none(S_WAIT_ENABLED), none(S_WAIT_ENABLED), none(S_WAIT_ENABLED),
     act(Action::Timeout2, S_IDLE), act(Action::Error, S_IDLE)],
    // S_WAIT_SIG_PROP
    [none(S_WAIT_SIG_PROP), none(S_WAIT_SIG_PROP), none(S_WAIT_SIG_PROP),
     none(S_WAIT_SIG_PROP), none(S_WAIT_SIG_PROP), none(S_WAIT_SIG_PROP),
     none(S_WAIT_SIG_PROP), none(S_WAIT_SIG_PROP), none(S_WAIT_SIG_PROP),
     none(S_WAIT_SIG_PROP), act(Action::DiagStart, S_WAIT_RESULT),
     act(Action::Error, S_IDLE)],
    // S_WAIT_SIGNAL_ON
    [none(S_WAIT_SIGNAL_ON), none(S_WAIT_SIGNAL_ON), none(S_WAIT_SIGNAL_ON),
     none(S_WAIT_SIGNAL_ON), none(S_WAIT_SIGNAL_ON), none(S_WAIT_SIGNAL_ON),
     none(S_WAIT_SIGNAL_ON), none(S_WAIT_SIGNAL_ON), none(S_WAIT_SIGNAL_ON),
     none(S_WAIT_SIGNAL_ON), act(Action::EnableTx, S_WAIT_ENABLED),
     act(Action::Error, S_IDLE)],
    // S_WAIT_RESULT
    [none(S_WAIT_RESULT), none(S_WAIT_RESULT), none(S_WAIT_RESULT),
     none(S_WAIT_RESULT), none(S_WAIT_RESULT), none(S_WAIT_RESULT),
     none(S_WAIT_RESULT), act(Action::NextSeg, S_WAIT_SIGNAL_ON),
     act(Action::StopDiag, S_END), none(S_WAIT_RESULT),
     act(Action::Timeout2, S_IDLE), act(Action::Error, S_IDLE)],
    // S_END
    [none(S_END), none(S_END), act(Action::EndDiag, S_IDLE), none(S_END),
     none(S_END), none(S_END), none(S_END), none(S_END), none(S_END),
     none(S_END), act(Action::Timeout2, S_IDLE), act(Action::Error, S_IDLE)],
];

// --- machine ----------------------------------------------------------------

pub struct BcDiag {
    fsm: Fsm,
    current_segment: u8,
    /// Last probe answer, consumed by the stop path.
    last_result: Option<(DutResult, u16)>,
    neton: bool,
    running: bool,
}

impl Default for BcDiag {
    fn default() -> Self {
        Self::new()
    }
}

impl BcDiag {
    pub fn new() -> Self {
        Self {
            fsm: Fsm::new(NUM_EVENTS as u8, S_IDLE),
            current_segment: 0,
            last_result: None,
            neton: false,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    // --- API --------------------------------------------------------------

    /// Starts the back-channel walk at the first segment.
    pub fn start<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) -> Result<(), ApiError> {
        if self.running {
            return Err(ApiError::ApiLocked);
        }
        self.running = true;
        self.fsm.set_event(E_START);
        ctx.trigger(ServiceId::BcDiag);
        log::info!("bcdiag: start");
        Ok(())
    }

    // --- engine dispatch --------------------------------------------------

    pub fn service<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        while self.fsm.active() {
            let state_before = self.fsm.state();
            if let Some(action) = self.fsm.eval(TAB.as_flattened()) {
                log::trace!(
                    "bcdiag: {} -> {} {:?}",
                    state_before,
                    self.fsm.state(),
                    action
                );
                self.run_action(action, ctx);
            }
        }
        debug_assert!(self.fsm.run_state() != RunState::Error);
    }

    pub fn on_timeout<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        self.fsm.set_event(E_TIMEOUT);
        ctx.trigger(ServiceId::BcDiag);
    }

    pub fn on_result<H: Host>(&mut self, token: ObsToken, res: &ExcResult, ctx: &mut Ctx<'_, H>) {
        ctx.cancel_timer(TimerKind::BcDiag, 0);
        match token {
            ObsToken::BcdStart => {
                let ok = res.result.is_success();
                self.fsm
                    .set_event(if ok { E_DIAGMODE_STARTED } else { E_DIAGMODE_FAILED });
            }
            ObsToken::BcdEnableTx => {
                let ok = res.result.is_success();
                self.fsm
                    .set_event(if ok { E_TX_ENABLE_OK } else { E_TX_ENABLE_FAILED });
            }
            ObsToken::BcdResult => self.on_probe_result(res),
            ObsToken::BcdEnd => {
                let ok = res.result.is_success();
                self.fsm.set_event(if ok { E_DIAGMODE_END } else { E_ERROR });
            }
            _ => {}
        }
        ctx.trigger(ServiceId::BcDiag);
    }

    /// Network availability changed. Net-off is raised into the table
    /// (which deliberately ignores it); net-on and configuration
    /// events are observed without action.
    pub fn on_network_status<H: Host>(&mut self, available: bool, ctx: &mut Ctx<'_, H>) {
        if self.neton && !available {
            self.neton = false;
            self.fsm.set_event(E_NET_OFF);
            ctx.trigger(ServiceId::BcDiag);
        } else if !self.neton && available {
            self.neton = true;
        }
    }

    pub fn on_terminate<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        if self.fsm.state() != S_IDLE {
            ctx.cancel_timer(TimerKind::BcDiag, 0);
            ctx.host.bc_diag_report(BcdReport::Error);
            ctx.host.bc_diag_report(BcdReport::End);
            self.running = false;
            self.current_segment = 0;
            self.fsm.force_state(S_IDLE);
        }
    }

    fn on_probe_result(&mut self, res: &ExcResult) {
        if let (true, ExcData::BcProbe(probe)) = (res.result.is_success(), &res.data) {
            self.last_result = Some((probe.diag_result, probe.admin_addr));
            match probe.diag_result {
                DutResult::Slave => self.fsm.set_event(E_RESULT_OK),
                DutResult::Master | DutResult::NoAnswer | DutResult::Timeout => {
                    self.fsm.set_event(E_RESULT_NOTOK)
                }
            }
        } else {
            self.fsm.set_event(E_ERROR);
        }
    }

    // --- actions ----------------------------------------------------------

    fn run_action<H: Host>(&mut self, action: Action, ctx: &mut Ctx<'_, H>) {
        match action {
            Action::Start => self.a_start(ctx),
            Action::EnableTx => self.a_enable_tx(ctx),
            Action::WaitLight => self.a_wait_light(ctx),
            Action::DiagStart => self.a_diag_start(ctx),
            Action::NextSeg => self.a_next_seg(ctx),
            Action::StopDiag => self.a_stop_diag(ctx),
            Action::EndDiag => self.a_end_diag(ctx),
            Action::Timeout2 => self.a_timeout2(ctx),
            Action::Error => self.a_error(ctx),
        }
    }

    fn a_start<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        // segments are probed 1-based; segment n sits behind the n-th
        // node of the ring
        self.current_segment = 1;
        let sent = ctx.cmd.nic_bc_diag_start(ctx.trcv, ctx.host, ObsToken::BcdStart);
        if sent.is_ok() {
            ctx.arm_timer(TimerKind::BcDiag, 0, TIMEOUT_COMMAND);
        } else {
            self.fsm.set_event(E_ERROR);
            ctx.trigger(ServiceId::BcDiag);
        }
    }

    fn a_enable_tx<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let sent = ctx
            .cmd
            .bc_enable_tx_sr(ctx.trcv, ctx.host, 0, ObsToken::BcdEnableTx);
        if sent.is_ok() {
            ctx.arm_timer(TimerKind::BcDiag, 0, TIMEOUT_COMMAND);
        } else {
            self.fsm.set_event(E_ERROR);
            ctx.trigger(ServiceId::BcDiag);
        }
    }

    /// Lets the light settle through the nodes between the master and
    /// the device under test.
    fn a_wait_light<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let delay = T_LOCK + T_LIGHT_PROGRESS * (self.current_segment as u16 + 1);
        ctx.arm_timer(TimerKind::BcDiag, 0, delay);
    }

    fn a_diag_start<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let admin = BC_ADMIN_BASE + self.current_segment as u16;
        let sent = ctx.cmd.bc_probe_start(
            ctx.trcv,
            ctx.host,
            self.current_segment,
            admin,
            T_SEND,
            T_WAIT4DUT,
            T_SWITCH,
            T_BACK,
            AUTOBACK,
            ObsToken::BcdResult,
        );
        if sent.is_ok() {
            ctx.arm_timer(TimerKind::BcDiag, 0, TIMEOUT_RESULT);
        } else {
            self.fsm.set_event(E_ERROR);
            ctx.trigger(ServiceId::BcDiag);
        }
    }

    fn a_next_seg<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let segment = self.reported_segment();
        ctx.host.bc_diag_report(BcdReport::Success { segment });
        self.current_segment += 1;
        ctx.arm_timer(TimerKind::BcDiag, 0, T_SIGNAL_ON);
    }

    fn a_stop_diag<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let segment = self.reported_segment();
        if let Some((dut, _)) = self.last_result {
            match dut {
                DutResult::Master => {
                    ctx.host.bc_diag_report(BcdReport::NoRingBreak { segment })
                }
                DutResult::NoAnswer => {
                    ctx.host.bc_diag_report(BcdReport::RingBreak { segment })
                }
                DutResult::Timeout => {
                    ctx.host.bc_diag_report(BcdReport::Timeout1 { segment })
                }
                DutResult::Slave => {}
            }
        }
        let sent = ctx.cmd.nic_bc_diag_end(ctx.trcv, ctx.host, ObsToken::BcdEnd);
        if sent.is_ok() {
            ctx.arm_timer(TimerKind::BcDiag, 0, TIMEOUT_COMMAND);
        } else {
            self.fsm.set_event(E_ERROR);
            ctx.trigger(ServiceId::BcDiag);
        }
    }

    fn a_end_diag<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        ctx.host.bc_diag_report(BcdReport::End);
        self.running = false;
        log::info!("bcdiag: end");
    }

    fn a_timeout2<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        log::warn!("bcdiag: overall supervision expired");
        ctx.host.bc_diag_report(BcdReport::Timeout2);
        self.running = false;
    }

    fn a_error<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        ctx.host.bc_diag_report(BcdReport::Error);
        self.running = false;
    }

    /// Segment identity from the probe's echoed admin address.
    fn reported_segment(&self) -> u8 {
        self.last_result
            .map(|(_, admin)| (admin & 0x00FF) as u8)
            .unwrap_or(self.current_segment)
    }
}
