//! System diagnosis.
//!
//! Walks the ring branch by branch, segment by segment. Each segment
//! broadcasts a hello, welcomes the answering neighbor at an admin
//! address derived from the segment number, and decides from the
//! neighbor's port count whether the walk continues down the branch,
//! switches to the master's next port, or is complete. A segment whose
//! hello goes unanswered after the retry budget is handed to the
//! cable-link diagnosis instead.
//!
//! Segment numbering starts at 0 for the hop onto the local controller
//! itself; that hop populates the master's port count and is not
//! reported.

use ringnet_abi::{
    ApiError, DIAG_ADDR_BASE, Host, NODE_POS_BASE, ObsToken, SIGNATURE_VERSION, SdErrInfo,
    SdReport, SegmentInfo, ServiceId, Signature, TimerKind,
};
use ringnet_base::fsm::{Fsm, RunState, Transition};
use ringnet_net::cmd::ExcData;
use ringnet_net::ctx::Ctx;
use ringnet_net::ExcResult;

/// Hello retry budget before a segment counts as dead.
const NUM_HELLO: u8 = 10;
/// Supervision window for repeated hello broadcasts.
const TIMEOUT_HELLO: u16 = 150;
/// Supervision window for controller commands.
const TIMEOUT_COMMAND: u16 = 100;
/// Supervision window for the cable-link diagnosis.
const TIMEOUT_CABLE_DIAG: u16 = 3000;

/// Scheduler priority of the system diagnosis service.
pub const SRV_PRIO: u8 = 248;

// --- states -----------------------------------------------------------------

const S_IDLE: u8 = 0;
const S_WAIT_DIAG: u8 = 1;
const S_WAIT_HELLO: u8 = 2;
const S_HELLO_TIMEOUT: u8 = 3;
const S_WAIT_WELCOME: u8 = 4;
const S_NEXT_PORT: u8 = 5;
const S_WAIT_ENABLE: u8 = 6;
const S_WAIT_DISABLE: u8 = 7;
const S_CABLE_LINK: u8 = 8;
const S_END: u8 = 9;
const NUM_STATES: usize = 10;

// --- events -----------------------------------------------------------------

const E_START: u8 = 1;
const E_DIAG_OK: u8 = 2;
const E_ABORT: u8 = 3;
const E_HELLO_OK: u8 = 4;
const E_HELLO_RETRY: u8 = 5;
const E_HELLO_ALL_DONE: u8 = 6;
const E_WELCOME: u8 = 7;
const E_ALL_DONE: u8 = 8;
const E_PORT_FOUND: u8 = 9;
const E_PORT_ENABLED: u8 = 10;
const E_PORT_DISABLED: u8 = 11;
const E_BRANCH_FOUND: u8 = 12;
const E_CABLE_LINK_RES: u8 = 13;
const E_ERROR: u8 = 14;
const E_TIMEOUT: u8 = 15;
const E_NO_SUCCESS: u8 = 16;
const NUM_EVENTS: usize = 17;

// --- actions ----------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Start,
    SendHello,
    HelloTimeout,
    SendWelcome,
    CalcPort,
    EnablePort,
    DisablePort,
    CableLink,
    AllDone,
    Finish,
    Error,
    ErrorWelcome,
    TimeoutStop,
    StopFailed,
    Abort,
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
/// Column order: nil, start, diag-ok, abort, hello-ok, hello-retry,
/// hello-all-done, welcome, all-done, port-found, port-enabled,
/// port-disabled, branch-found, cable-link-res, error, timeout,
/// no-success.
#[rustfmt::skip]
const TAB: [[Tr; NUM_EVENTS]; NUM_STATES] = [
    // S_IDLE
    [none(S_IDLE), act(Action::Start, S_WAIT_DIAG), none(S_IDLE), none(S_IDLE),
     none(S_IDLE), none(S_IDLE), none(S_IDLE), none(S_IDLE), none(S_IDLE),
     none(S_IDLE), none(S_IDLE), none(S_IDLE), none(S_IDLE), none(S_IDLE),
     none(S_IDLE), none(S_IDLE), none(S_IDLE)],
    // S_WAIT_DIAG
    [none(S_WAIT_DIAG), none(S_WAIT_DIAG), act(Action::SendHello, S_WAIT_HELLO),
     act(Action::Abort, S_END), none(S_WAIT_DIAG), none(S_WAIT_DIAG), none(S_WAIT_DIAG),
     none(S_WAIT_DIAG), none(S_WAIT_DIAG), none(S_WAIT_DIAG), none(S_WAIT_DIAG),
     none(S_WAIT_DIAG), none(S_WAIT_DIAG), none(S_WAIT_DIAG),
     act(Action::Error, S_END), act(Action::TimeoutStop, S_END), none(S_WAIT_DIAG)],
    // S_WAIT_HELLO
    [none(S_WAIT_HELLO), none(S_WAIT_HELLO), none(S_WAIT_HELLO),
     act(Action::Abort, S_END), act(Action::SendWelcome, S_WAIT_WELCOME),
     none(S_WAIT_HELLO), none(S_WAIT_HELLO), none(S_WAIT_HELLO), none(S_WAIT_HELLO),
     none(S_WAIT_HELLO), none(S_WAIT_HELLO), none(S_WAIT_HELLO), none(S_WAIT_HELLO),
     none(S_WAIT_HELLO), act(Action::Error, S_END),
     act(Action::HelloTimeout, S_HELLO_TIMEOUT), none(S_WAIT_HELLO)],
    // S_HELLO_TIMEOUT
    [none(S_HELLO_TIMEOUT), none(S_HELLO_TIMEOUT), none(S_HELLO_TIMEOUT),
     act(Action::Abort, S_END), none(S_HELLO_TIMEOUT),
     act(Action::SendHello, S_WAIT_HELLO), act(Action::CableLink, S_CABLE_LINK),
     none(S_HELLO_TIMEOUT), none(S_HELLO_TIMEOUT), none(S_HELLO_TIMEOUT),
     none(S_HELLO_TIMEOUT), none(S_HELLO_TIMEOUT), none(S_HELLO_TIMEOUT),
     none(S_HELLO_TIMEOUT), act(Action::Error, S_END), none(S_HELLO_TIMEOUT),
     none(S_HELLO_TIMEOUT)],
    // S_WAIT_WELCOME
    [none(S_WAIT_WELCOME), none(S_WAIT_WELCOME), none(S_WAIT_WELCOME),
     act(Action::Abort, S_END), none(S_WAIT_WELCOME), none(S_WAIT_WELCOME),
     none(S_WAIT_WELCOME), act(Action::CalcPort, S_NEXT_PORT), none(S_WAIT_WELCOME),
     none(S_WAIT_WELCOME), none(S_WAIT_WELCOME), none(S_WAIT_WELCOME),
     none(S_WAIT_WELCOME), none(S_WAIT_WELCOME), act(Action::Error, S_END),
     act(Action::TimeoutStop, S_END), act(Action::ErrorWelcome, S_END)],
    // S_NEXT_PORT
    [none(S_NEXT_PORT), none(S_NEXT_PORT), none(S_NEXT_PORT),
     act(Action::Abort, S_END), none(S_NEXT_PORT), none(S_NEXT_PORT),
     none(S_NEXT_PORT), none(S_NEXT_PORT), act(Action::AllDone, S_END),
     act(Action::EnablePort, S_WAIT_ENABLE), none(S_NEXT_PORT), none(S_NEXT_PORT),
     act(Action::DisablePort, S_WAIT_DISABLE), none(S_NEXT_PORT),
     act(Action::Error, S_END), none(S_NEXT_PORT), none(S_NEXT_PORT)],
    // S_WAIT_ENABLE
    [none(S_WAIT_ENABLE), none(S_WAIT_ENABLE), none(S_WAIT_ENABLE),
     act(Action::Abort, S_END), none(S_WAIT_ENABLE), none(S_WAIT_ENABLE),
     none(S_WAIT_ENABLE), none(S_WAIT_ENABLE), none(S_WAIT_ENABLE),
     none(S_WAIT_ENABLE), act(Action::SendHello, S_WAIT_HELLO), none(S_WAIT_ENABLE),
     none(S_WAIT_ENABLE), none(S_WAIT_ENABLE), act(Action::Error, S_END),
     act(Action::TimeoutStop, S_END), none(S_WAIT_ENABLE)],
    // S_WAIT_DISABLE
    [none(S_WAIT_DISABLE), none(S_WAIT_DISABLE), none(S_WAIT_DISABLE),
     act(Action::Abort, S_END), none(S_WAIT_DISABLE), none(S_WAIT_DISABLE),
     none(S_WAIT_DISABLE), none(S_WAIT_DISABLE), none(S_WAIT_DISABLE),
     none(S_WAIT_DISABLE), none(S_WAIT_DISABLE), act(Action::EnablePort, S_WAIT_ENABLE),
     none(S_WAIT_DISABLE), none(S_WAIT_DISABLE), act(Action::Error, S_END),
     act(Action::TimeoutStop, S_END), none(S_WAIT_DISABLE)],
    // S_CABLE_LINK
    [none(S_CABLE_LINK), none(S_CABLE_LINK), none(S_CABLE_LINK),
     act(Action::Abort, S_END), none(S_CABLE_LINK), none(S_CABLE_LINK),
     none(S_CABLE_LINK), none(S_CABLE_LINK), none(S_CABLE_LINK), none(S_CABLE_LINK),
     none(S_CABLE_LINK), none(S_CABLE_LINK), none(S_CABLE_LINK),
     act(Action::CalcPort, S_NEXT_PORT), act(Action::Error, S_END),
     act(Action::TimeoutStop, S_END), none(S_CABLE_LINK)],
    // S_END
    [none(S_END), none(S_END), act(Action::Finish, S_IDLE), none(S_END),
     none(S_END), none(S_END), none(S_END), none(S_END), none(S_END),
     none(S_END), none(S_END), none(S_END), none(S_END), none(S_END),
     act(Action::StopFailed, S_IDLE), act(Action::StopFailed, S_IDLE), none(S_END)],
];

// --- machine ----------------------------------------------------------------

/// How the previous segment concluded; drives the next-port decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LastResult {
    Init,
    Segment,
    CableLink,
}

/// One end of the segment currently being explored.
#[derive(Clone, Copy, Debug, Default)]
struct SdNode {
    node_address: u16,
    available: bool,
    version: u8,
    signature: Signature,
}

pub struct SysDiag {
    fsm: Fsm,
    /// Set while a run owns the procedure (API lock).
    started: bool,
    segment_nr: u8,
    /// Port count of the master node, learned from segment 0.
    num_ports: u8,
    curr_branch: u8,
    source: SdNode,
    master: SdNode,
    target: SdNode,
    admin_node_address: u16,
    hello_retry: u8,
    last_result: LastResult,
}

impl Default for SysDiag {
    fn default() -> Self {
        Self::new()
    }
}

impl SysDiag {
    pub fn new() -> Self {
        let mut sd = Self {
            fsm: Fsm::new(NUM_EVENTS as u8, S_IDLE),
            started: false,
            segment_nr: 0,
            num_ports: 0,
            curr_branch: 0,
            source: SdNode::default(),
            master: SdNode::default(),
            target: SdNode::default(),
            admin_node_address: DIAG_ADDR_BASE,
            hello_retry: NUM_HELLO,
            last_result: LastResult::Init,
        };
        sd.init_walk();
        sd
    }

    fn init_walk(&mut self) {
        self.hello_retry = NUM_HELLO;
        self.segment_nr = 0;
        self.num_ports = 0;
        self.curr_branch = 0;
        self.source = SdNode {
            node_address: 0xFFFF,
            ..SdNode::default()
        };
        self.last_result = LastResult::Init;
        // segment 0 talks to the local controller
        self.target = SdNode {
            node_address: ringnet_abi::ADDR_LOCAL_NIC,
            ..SdNode::default()
        };
        self.admin_node_address = DIAG_ADDR_BASE;
    }

    /// `true` while a run is in flight.
    pub fn is_running(&self) -> bool {
        self.started
    }

    // --- API --------------------------------------------------------------

    /// Starts the walk. One run at a time.
    pub fn run<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) -> Result<(), ApiError> {
        if self.started {
            return Err(ApiError::ApiLocked);
        }
        self.started = true;
        self.init_walk();
        self.fsm.set_event(E_START);
        ctx.trigger(ServiceId::SysDiag);
        log::info!("sysdiag: run");
        Ok(())
    }

    /// Aborts a running walk; the machine still leaves diagnosis mode
    /// cleanly.
    pub fn abort<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) -> Result<(), ApiError> {
        if !self.started {
            return Err(ApiError::NotAvailable);
        }
        ctx.cancel_timer(TimerKind::SysDiag, 0);
        self.fsm.set_event(E_ABORT);
        ctx.trigger(ServiceId::SysDiag);
        log::info!("sysdiag: abort");
        Ok(())
    }

    // --- engine dispatch --------------------------------------------------

    /// Scheduler service: drains chained transitions.
    pub fn service<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        while self.fsm.active() {
            let state_before = self.fsm.state();
            if let Some(action) = self.fsm.eval(TAB.as_flattened()) {
                log::trace!(
                    "sysdiag: {} -> {} {:?}",
                    state_before,
                    self.fsm.state(),
                    action
                );
                self.run_action(action, ctx);
            }
        }
        debug_assert!(self.fsm.run_state() != RunState::Error);
    }

    /// Supervision timer fired.
    pub fn on_timeout<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        self.fsm.set_event(E_TIMEOUT);
        ctx.trigger(ServiceId::SysDiag);
    }

    /// A reply was routed to one of this machine's observer tokens.
    pub fn on_result<H: Host>(&mut self, token: ObsToken, res: &ExcResult, ctx: &mut Ctx<'_, H>) {
        ctx.cancel_timer(TimerKind::SysDiag, 0);
        match token {
            ObsToken::SdStart | ObsToken::SdStop => {
                let ok = res.result.is_success();
                self.fsm.set_event(if ok { E_DIAG_OK } else { E_ERROR });
            }
            ObsToken::SdHello => self.on_hello(res),
            ObsToken::SdWelcome => self.on_welcome(res, ctx),
            ObsToken::SdEnablePort => {
                if res.result.is_success() {
                    self.segment_nr += 1;
                    self.fsm.set_event(E_PORT_ENABLED);
                } else {
                    self.fsm.set_event(E_ERROR);
                }
            }
            ObsToken::SdDisablePort => {
                let ok = res.result.is_success();
                self.fsm
                    .set_event(if ok { E_PORT_DISABLED } else { E_ERROR });
            }
            ObsToken::SdCableLink => self.on_cable_link(res, ctx),
            _ => {}
        }
        ctx.trigger(ServiceId::SysDiag);
    }

    /// Fatal engine event: close out and reset.
    pub fn on_terminate<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        if self.fsm.state() != S_IDLE {
            ctx.cancel_timer(TimerKind::SysDiag, 0);
            ctx.host
                .sys_diag_report(&SdReport::Error(SdErrInfo::Terminated));
            ctx.host.sys_diag_report(&SdReport::Finished);
            self.started = false;
            self.init_walk();
            self.fsm.force_state(S_IDLE);
        }
    }

    // --- observer handlers ------------------------------------------------

    fn on_hello(&mut self, res: &ExcResult) {
        if let (true, ExcData::Hello(hello)) = (res.result.is_success(), &res.data) {
            self.target.signature = hello.signature;
            self.target.version = hello.version;
            if self.segment_nr != 0 {
                self.target.node_address = NODE_POS_BASE + self.segment_nr as u16;
            }
            self.fsm.set_event(E_HELLO_OK);
        } else {
            self.fsm.set_event(E_ERROR);
        }
    }

    fn on_welcome<H: Host>(&mut self, res: &ExcResult, ctx: &mut Ctx<'_, H>) {
        let ExcData::Welcome(welcome) = &res.data else {
            self.fsm.set_event(E_ERROR);
            return;
        };
        if !res.result.is_success() {
            self.fsm.set_event(E_ERROR);
            return;
        }
        if welcome.res == 0 {
            self.target.available = true;
            log::debug!(
                "sysdiag: node {:#x} (signature v{}) welcomed",
                self.target.node_address,
                self.target.version
            );
            if self.segment_nr == 0 {
                self.num_ports = self.target.signature.num_ports;
            } else {
                self.last_result = LastResult::Segment;
            }
            // the hop onto the local controller is not reported
            if self.segment_nr != 0 {
                ctx.host
                    .sys_diag_report(&SdReport::TargetFound(self.segment_info(true)));
            }
            self.fsm.set_event(E_WELCOME);
        } else {
            ctx.host.sys_diag_report(&SdReport::Error(
                SdErrInfo::WelcomeNoSuccess(self.segment_info(true)),
            ));
            self.fsm.set_event(E_NO_SUCCESS);
        }
    }

    fn on_cable_link<H: Host>(&mut self, res: &ExcResult, ctx: &mut Ctx<'_, H>) {
        if let (true, ExcData::CableLink(link)) = (res.result.is_success(), &res.data) {
            ctx.host.sys_diag_report(&SdReport::CableLink {
                segment: self.segment_info(false),
                quality: link.result,
            });
            self.fsm.set_event(E_CABLE_LINK_RES);
        } else {
            self.fsm.set_event(E_ERROR);
        }
    }

    fn segment_info(&self, with_target: bool) -> SegmentInfo {
        SegmentInfo {
            branch: self.curr_branch,
            num: self.segment_nr,
            source: self.source.signature,
            target: if with_target {
                self.target.signature
            } else {
                Signature::default()
            },
        }
    }

    // --- actions ----------------------------------------------------------

    fn run_action<H: Host>(&mut self, action: Action, ctx: &mut Ctx<'_, H>) {
        match action {
            Action::Start => self.a_start(ctx),
            Action::SendHello => self.a_send_hello(ctx),
            Action::HelloTimeout => self.a_hello_timeout(),
            Action::SendWelcome => self.a_send_welcome(ctx),
            Action::CalcPort => self.a_calc_port(),
            Action::EnablePort => self.a_enable_port(ctx),
            Action::DisablePort => self.a_disable_port(ctx),
            Action::CableLink => self.a_cable_link(ctx),
            Action::AllDone => self.a_stop_diag(ctx),
            Action::Finish => self.a_finish(ctx),
            Action::Error => self.a_error(ctx),
            Action::ErrorWelcome => self.a_stop_diag(ctx),
            Action::TimeoutStop => self.a_timeout_stop(ctx),
            Action::StopFailed => self.a_stop_failed(ctx),
            Action::Abort => self.a_abort(ctx),
        }
    }

    fn a_start<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let sent = ctx.cmd.nic_sys_diag_start(ctx.trcv, ctx.host, ObsToken::SdStart);
        if sent.is_ok() {
            ctx.arm_timer(TimerKind::SysDiag, 0, TIMEOUT_COMMAND);
        } else {
            self.fsm.set_event(E_ERROR);
            ctx.trigger(ServiceId::SysDiag);
        }
    }

    fn a_send_hello<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let sent = ctx.cmd.hello_get(
            ctx.trcv,
            ctx.host,
            ringnet_abi::ADDR_BROADCAST_BLOCKING,
            SIGNATURE_VERSION,
            ObsToken::SdHello,
        );
        if sent.is_ok() {
            ctx.arm_timer(TimerKind::SysDiag, 0, TIMEOUT_HELLO);
        } else {
            self.fsm.set_event(E_ERROR);
            ctx.trigger(ServiceId::SysDiag);
        }
    }

    fn a_hello_timeout(&mut self) {
        if self.hello_retry > 0 {
            self.hello_retry -= 1;
            self.fsm.set_event(E_HELLO_RETRY);
        } else {
            self.fsm.set_event(E_HELLO_ALL_DONE);
        }
    }

    fn a_send_welcome<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        self.admin_node_address = DIAG_ADDR_BASE + self.segment_nr as u16;
        let sent = ctx.cmd.welcome_sr(
            ctx.trcv,
            ctx.host,
            self.target.node_address,
            self.admin_node_address,
            SIGNATURE_VERSION,
            &self.target.signature,
            ObsToken::SdWelcome,
        );
        if sent.is_ok() {
            ctx.arm_timer(TimerKind::SysDiag, 0, TIMEOUT_COMMAND);
        } else {
            self.fsm.set_event(E_ERROR);
            ctx.trigger(ServiceId::SysDiag);
        }
    }

    /// Decides the next move after a welcomed segment or a finished
    /// cable-link diagnosis.
    fn a_calc_port(&mut self) {
        match self.last_result {
            LastResult::Init => {
                // the master is the first welcomed node; it owns at
                // least one port
                self.curr_branch = 0;
                self.source = self.target;
                self.master = self.target;
                self.target = SdNode::default();
                self.last_result = LastResult::Segment;
                self.fsm.set_event(E_PORT_FOUND);
            }
            LastResult::Segment => {
                debug_assert!(self.target.available, "segment decided before welcome");
                if self.target.signature.num_ports > 1 {
                    self.source = self.target;
                    self.target = SdNode::default();
                    self.fsm.set_event(E_PORT_FOUND);
                } else {
                    self.next_branch_or_done();
                }
            }
            LastResult::CableLink => self.next_branch_or_done(),
        }
    }

    fn next_branch_or_done(&mut self) {
        if self.num_ports == self.curr_branch + 1 {
            self.fsm.set_event(E_ALL_DONE);
        } else {
            // back to the master: the port enable bumps this to 1, so
            // the new branch's first neighbor reports as segment 1
            self.segment_nr = 0;
            self.curr_branch += 1;
            self.source = self.master;
            self.target = SdNode::default();
            self.fsm.set_event(E_BRANCH_FOUND);
        }
    }

    fn a_enable_port<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let (target_address, port_number) = if self.segment_nr == 0 {
            (ringnet_abi::ADDR_LOCAL_NIC, self.curr_branch)
        } else {
            (self.source.node_address, 1)
        };
        let sent = ctx.cmd.enable_port_sr(
            ctx.trcv,
            ctx.host,
            target_address,
            port_number,
            true,
            ObsToken::SdEnablePort,
        );
        if sent.is_ok() {
            ctx.arm_timer(TimerKind::SysDiag, 0, TIMEOUT_COMMAND);
        } else {
            self.fsm.set_event(E_ERROR);
            ctx.trigger(ServiceId::SysDiag);
        }
    }

    fn a_disable_port<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let sent = ctx.cmd.enable_port_sr(
            ctx.trcv,
            ctx.host,
            self.admin_node_address,
            self.curr_branch,
            false,
            ObsToken::SdDisablePort,
        );
        if sent.is_ok() {
            ctx.arm_timer(TimerKind::SysDiag, 0, TIMEOUT_COMMAND);
        } else {
            self.fsm.set_event(E_ERROR);
            ctx.trigger(ServiceId::SysDiag);
        }
    }

    fn a_cable_link<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        if self.segment_nr == 0 {
            // the local controller itself did not answer; nothing to
            // measure
            self.fsm.set_event(E_ERROR);
            ctx.trigger(ServiceId::SysDiag);
            return;
        }
        let port_number = if self.segment_nr == 1 {
            self.curr_branch
        } else {
            1
        };
        self.last_result = LastResult::CableLink;
        let sent = ctx.cmd.cable_link_start(
            ctx.trcv,
            ctx.host,
            self.source.node_address,
            port_number,
            ObsToken::SdCableLink,
        );
        if sent.is_ok() {
            ctx.arm_timer(TimerKind::SysDiag, 0, TIMEOUT_CABLE_DIAG);
        } else {
            self.fsm.set_event(E_ERROR);
            ctx.trigger(ServiceId::SysDiag);
        }
    }

    /// Leaves diagnosis mode; every path to `S_END` funnels through
    /// here.
    fn a_stop_diag<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let sent = ctx.cmd.nic_sys_diag_end(ctx.trcv, ctx.host, ObsToken::SdStop);
        if sent.is_ok() {
            ctx.arm_timer(TimerKind::SysDiag, 0, TIMEOUT_COMMAND);
        } else {
            ctx.host
                .sys_diag_report(&SdReport::Error(SdErrInfo::StopDiagFailed));
            self.fsm.set_event(E_ERROR);
            ctx.trigger(ServiceId::SysDiag);
        }
    }

    fn a_finish<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        ctx.host.sys_diag_report(&SdReport::Finished);
        self.started = false;
        log::info!("sysdiag: finished");
    }

    fn a_error<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        ctx.host
            .sys_diag_report(&SdReport::Error(SdErrInfo::Unspecified));
        self.a_stop_diag(ctx);
    }

    fn a_timeout_stop<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        log::warn!("sysdiag: command supervision expired");
        ctx.host
            .sys_diag_report(&SdReport::Error(SdErrInfo::Unspecified));
        self.a_stop_diag(ctx);
    }

    fn a_stop_failed<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        ctx.host
            .sys_diag_report(&SdReport::Error(SdErrInfo::StopDiagFailed));
        // the walk always closes with a finished report
        ctx.host.sys_diag_report(&SdReport::Finished);
        self.started = false;
    }

    fn a_abort<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        ctx.host.sys_diag_report(&SdReport::Aborted);
        self.a_stop_diag(ctx);
    }
}
