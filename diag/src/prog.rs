//! Node memory programming.
//!
//! Welcomes the target at a programming admin address, opens a memory
//! session of the requested type, streams the command list into memory
//! writes, closes the session and restarts the device onto its new
//! configuration. Error replies carry a 24-bit tag that decides the
//! recovery path: some need only a device restart, some need the
//! session closed first (recovering the foreign session handle from
//! the error bytes), the rest are reported as-is.

use heapless::Vec;

use ringnet_abi::{
    ADDR_LOCAL_NIC, ApiError, BC_ADMIN_BASE, Host, MemCmd, NODE_POS_BASE, ObsToken, PrgFunc,
    PrgReport, PrgResult, SIGNATURE_VERSION, ServiceId, SessionType, Signature, TimerKind,
};
use ringnet_base::fsm::{Fsm, RunState, Transition};
use ringnet_net::cmd::ExcData;
use ringnet_net::ctx::Ctx;
use ringnet_net::ExcResult;

/// Supervision window for programming commands.
const TIMEOUT_COMMAND: u16 = 100;

/// Scheduler priority of the programming service.
pub const SRV_PRIO: u8 = 248;

/// Maximum number of write tasks in one run (terminator included).
pub const MAX_COMMANDS: usize = 8;

// --- error tags (24-bit, little-endian in the raw error bytes) -------------

const TAG_HW_RESET: u32 = 0x20_0110;
const TAG_SESSION_ACTIVE: u32 = 0x20_0111;
const TAG_CFG_STRING_ERROR: u32 = 0x20_0220;
const TAG_MEM_ERASE_ERROR: u32 = 0x20_0221;
const TAG_CFG_WRITE_ERROR: u32 = 0x20_0225;
const TAG_CFG_FULL_ERROR: u32 = 0x20_0226;
const TAG_HDL_MATCH_ERROR: u32 = 0x20_0330;
const TAG_MEMID_ERROR: u32 = 0x20_0331;
const TAG_ADDR_EVEN_ERROR: u32 = 0x20_0332;
const TAG_LEN_EVEN_ERROR: u32 = 0x20_0333;

// --- states -----------------------------------------------------------------

const S_IDLE: u8 = 0;
const S_WAIT_WELCOME: u8 = 1;
const S_WAIT_MEM_OPEN: u8 = 2;
const S_WAIT_MEM_WRITE: u8 = 3;
const S_WAIT_MEM_CLOSE: u8 = 4;
const S_WAIT_MEM_ERR_CLOSE: u8 = 5;
const NUM_STATES: usize = 6;

// --- events -----------------------------------------------------------------

const E_START: u8 = 1;
const E_WELCOME_SUCCESS: u8 = 2;
const E_WELCOME_NOSUCCESS: u8 = 3;
const E_MEM_WRITE_CMD: u8 = 4;
const E_MEM_WRITE_FINISH: u8 = 5;
const E_MEM_CLOSE_SUCCESS: u8 = 6;
const E_NET_OFF: u8 = 7;
const E_TIMEOUT: u8 = 8;
const E_ERROR: u8 = 9;
const E_ERROR_INIT: u8 = 10;
const E_ERROR_CLOSE_INIT: u8 = 11;
const NUM_EVENTS: usize = 12;

// --- actions ----------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Start,
    MemOpen,
    MemWrite,
    MemClose,
    InitDevice,
    NetOff,
    Timeout,
    Error,
    ErrorInit,
    ErrorCloseInit,
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
/// Column order: nil, start, welcome-success, welcome-nosuccess,
/// mem-write-cmd, mem-write-finish, mem-close-success, net-off,
/// timeout, error, error-init, error-close-init.
#[rustfmt::skip]
const TAB: [[Tr; NUM_EVENTS]; NUM_STATES] = [
    // S_IDLE
    [none(S_IDLE), act(Action::Start, S_WAIT_WELCOME), none(S_IDLE), none(S_IDLE),
     none(S_IDLE), none(S_IDLE), none(S_IDLE), act(Action::NetOff, S_IDLE),
     act(Action::Timeout, S_IDLE), act(Action::Error, S_IDLE), none(S_IDLE),
     none(S_IDLE)],
    // S_WAIT_WELCOME
    [none(S_WAIT_WELCOME), none(S_WAIT_WELCOME),
     act(Action::MemOpen, S_WAIT_MEM_OPEN), act(Action::Error, S_IDLE),
     none(S_WAIT_WELCOME), none(S_WAIT_WELCOME), none(S_WAIT_WELCOME),
     act(Action::NetOff, S_IDLE), act(Action::Timeout, S_IDLE),
     act(Action::Error, S_IDLE), none(S_WAIT_WELCOME), none(S_WAIT_WELCOME)],
    // S_WAIT_MEM_OPEN
    [none(S_WAIT_MEM_OPEN), none(S_WAIT_MEM_OPEN), none(S_WAIT_MEM_OPEN),
     none(S_WAIT_MEM_OPEN), act(Action::MemWrite, S_WAIT_MEM_WRITE),
     act(Action::MemClose, S_WAIT_MEM_CLOSE), none(S_WAIT_MEM_OPEN),
     act(Action::NetOff, S_IDLE), act(Action::Timeout, S_IDLE),
     act(Action::Error, S_IDLE), act(Action::ErrorInit, S_IDLE),
     act(Action::ErrorCloseInit, S_WAIT_MEM_ERR_CLOSE)],
    // S_WAIT_MEM_WRITE
    [none(S_WAIT_MEM_WRITE), none(S_WAIT_MEM_WRITE), none(S_WAIT_MEM_WRITE),
     none(S_WAIT_MEM_WRITE), act(Action::MemWrite, S_WAIT_MEM_WRITE),
     act(Action::MemClose, S_WAIT_MEM_CLOSE), none(S_WAIT_MEM_WRITE),
     act(Action::NetOff, S_IDLE), act(Action::Timeout, S_IDLE),
     act(Action::Error, S_IDLE), act(Action::ErrorInit, S_IDLE),
     act(Action::ErrorCloseInit, S_WAIT_MEM_ERR_CLOSE)],
    // S_WAIT_MEM_CLOSE
    [none(S_WAIT_MEM_CLOSE), none(S_WAIT_MEM_CLOSE), none(S_WAIT_MEM_CLOSE),
     none(S_WAIT_MEM_CLOSE), none(S_WAIT_MEM_CLOSE), none(S_WAIT_MEM_CLOSE),
     act(Action::InitDevice, S_IDLE), act(Action::NetOff, S_IDLE),
     act(Action::Timeout, S_IDLE), act(Action::Error, S_IDLE),
     act(Action::ErrorInit, S_IDLE), act(Action::Error, S_IDLE)],
    // S_WAIT_MEM_ERR_CLOSE
    [none(S_WAIT_MEM_ERR_CLOSE), none(S_WAIT_MEM_ERR_CLOSE),
     none(S_WAIT_MEM_ERR_CLOSE), none(S_WAIT_MEM_ERR_CLOSE),
     none(S_WAIT_MEM_ERR_CLOSE), none(S_WAIT_MEM_ERR_CLOSE),
     act(Action::ErrorInit, S_IDLE), act(Action::NetOff, S_IDLE),
     act(Action::Timeout, S_IDLE), act(Action::Error, S_IDLE),
     act(Action::ErrorInit, S_IDLE), act(Action::Error, S_IDLE)],
];

// --- machine ----------------------------------------------------------------

pub struct Programming {
    fsm: Fsm,
    node_pos_addr: u16,
    signature: Signature,
    session_type: SessionType,
    commands: Vec<MemCmd, MAX_COMMANDS>,
    command_index: usize,
    session_handle: u16,
    target_address: u16,
    admin_node_address: u16,
    current_function: PrgFunc,
    error: PrgReport,
    neton: bool,
    running: bool,
}

impl Default for Programming {
    fn default() -> Self {
        Self::new()
    }
}

impl Programming {
    pub fn new() -> Self {
        Self {
            fsm: Fsm::new(NUM_EVENTS as u8, S_IDLE),
            node_pos_addr: 0,
            signature: Signature::default(),
            session_type: SessionType::CfgWrite,
            commands: Vec::new(),
            command_index: 0,
            session_handle: 0,
            target_address: 0,
            admin_node_address: BC_ADMIN_BASE,
            current_function: PrgFunc::None,
            error: PrgReport::success(),
            neton: false,
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    // --- API --------------------------------------------------------------

    /// Programs the node at position address `node_pos_addr`.
    ///
    /// `commands` ends with a terminating entry (`unit_len == 0`) or
    /// uses its full declared length.
    pub fn start<H: Host>(
        &mut self,
        ctx: &mut Ctx<'_, H>,
        node_pos_addr: u16,
        signature: &Signature,
        session_type: SessionType,
        commands: &[MemCmd],
    ) -> Result<(), ApiError> {
        if self.running {
            return Err(ApiError::ApiLocked);
        }
        if commands.is_empty() || commands.len() > MAX_COMMANDS {
            return Err(ApiError::Parameter);
        }
        self.node_pos_addr = node_pos_addr;
        self.signature = *signature;
        self.session_type = session_type;
        self.commands.clear();
        // length checked above
        let _ = self.commands.extend_from_slice(commands);
        self.command_index = 0;
        self.session_handle = 0;
        self.current_function = PrgFunc::None;
        self.error = PrgReport::success();

        if !self.neton {
            ctx.host.prog_report(&PrgReport {
                code: PrgResult::NetOff,
                function: self.current_function,
                parm: Vec::new(),
            });
            log::warn!("prog: start rejected, network not available");
            return Ok(());
        }

        self.running = true;
        self.fsm.set_event(E_START);
        ctx.trigger(ServiceId::Prog);
        log::info!("prog: start node {:#x}", node_pos_addr);
        Ok(())
    }

    // --- engine dispatch --------------------------------------------------

    pub fn service<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        while self.fsm.active() {
            let state_before = self.fsm.state();
            if let Some(action) = self.fsm.eval(TAB.as_flattened()) {
                log::trace!(
                    "prog: {} -> {} {:?}",
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
        ctx.trigger(ServiceId::Prog);
    }

    pub fn on_result<H: Host>(&mut self, token: ObsToken, res: &ExcResult, ctx: &mut Ctx<'_, H>) {
        ctx.cancel_timer(TimerKind::Prog, 0);
        match token {
            ObsToken::PrgWelcome => self.on_welcome(res),
            ObsToken::PrgMemOpen => self.on_mem_open(res),
            ObsToken::PrgMemWrite => self.on_mem_write(res),
            ObsToken::PrgMemClose => self.on_mem_close(res),
            _ => {}
        }
        ctx.trigger(ServiceId::Prog);
    }

    pub fn on_network_status<H: Host>(&mut self, available: bool, ctx: &mut Ctx<'_, H>) {
        if self.neton && !available {
            self.neton = false;
            self.fsm.set_event(E_NET_OFF);
            ctx.trigger(ServiceId::Prog);
        } else if !self.neton && available {
            self.neton = true;
        }
    }

    pub fn on_terminate<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        if self.fsm.state() != S_IDLE {
            ctx.cancel_timer(TimerKind::Prog, 0);
            ctx.host.prog_report(&PrgReport {
                code: PrgResult::Error,
                function: self.current_function,
                parm: Vec::new(),
            });
            self.running = false;
            self.fsm.force_state(S_IDLE);
        }
    }

    // --- observer handlers ------------------------------------------------

    fn on_welcome(&mut self, res: &ExcResult) {
        if res.result.is_success() {
            if let ExcData::Welcome(w) = &res.data {
                if w.res == 0 {
                    self.fsm.set_event(E_WELCOME_SUCCESS);
                } else {
                    self.error = PrgReport {
                        code: PrgResult::FktAsync,
                        function: PrgFunc::WelcomeNoSuccess,
                        parm: Vec::new(),
                    };
                    self.fsm.set_event(E_WELCOME_NOSUCCESS);
                }
                return;
            }
        }
        self.store_error(PrgFunc::Welcome, &res.result.info);
        self.fsm.set_event(E_ERROR);
    }

    fn on_mem_open(&mut self, res: &ExcResult) {
        if let (true, ExcData::MemOpen { session_handle }) = (res.result.is_success(), &res.data) {
            self.session_handle = *session_handle;
            self.command_index = 0;
            if self.commands[0].is_terminator() {
                self.fsm.set_event(E_MEM_WRITE_FINISH);
            } else {
                self.fsm.set_event(E_MEM_WRITE_CMD);
            }
            return;
        }
        self.store_error(PrgFunc::MemOpen, &res.result.info);
        match Self::calc_error(&self.error.parm) {
            TAG_HW_RESET => self.fsm.set_event(E_ERROR_INIT),
            TAG_SESSION_ACTIVE => {
                // the active session's handle rides in the error bytes
                if self.error.parm.len() >= 5 {
                    self.session_handle =
                        u16::from_be_bytes([self.error.parm[3], self.error.parm[4]]);
                }
                self.fsm.set_event(E_ERROR_CLOSE_INIT);
            }
            _ => self.fsm.set_event(E_ERROR),
        }
    }

    fn on_mem_write(&mut self, res: &ExcResult) {
        if res.result.is_success() {
            self.command_index += 1;
            let finished = self.command_index >= self.commands.len()
                || self.commands[self.command_index].is_terminator();
            self.fsm.set_event(if finished {
                E_MEM_WRITE_FINISH
            } else {
                E_MEM_WRITE_CMD
            });
            return;
        }
        self.store_error(PrgFunc::MemWrite, &res.result.info);
        match Self::calc_error(&self.error.parm) {
            TAG_CFG_WRITE_ERROR | TAG_CFG_FULL_ERROR | TAG_MEMID_ERROR | TAG_ADDR_EVEN_ERROR
            | TAG_LEN_EVEN_ERROR => self.fsm.set_event(E_ERROR_CLOSE_INIT),
            TAG_HDL_MATCH_ERROR => self.fsm.set_event(E_ERROR_INIT),
            // erase-phase tags are report-only; the session is already
            // gone on the target
            TAG_CFG_STRING_ERROR | TAG_MEM_ERASE_ERROR => self.fsm.set_event(E_ERROR),
            _ => self.fsm.set_event(E_ERROR),
        }
    }

    fn on_mem_close(&mut self, res: &ExcResult) {
        if let (true, ExcData::MemClose { session_result }) = (res.result.is_success(), &res.data) {
            if *session_result == 0 {
                self.fsm.set_event(E_MEM_CLOSE_SUCCESS);
            } else {
                self.store_error(PrgFunc::MemClose, &[*session_result]);
                self.fsm.set_event(E_ERROR_INIT);
            }
            return;
        }
        self.store_error(PrgFunc::MemClose, &res.result.info);
        if Self::calc_error(&self.error.parm) == TAG_HDL_MATCH_ERROR {
            self.fsm.set_event(E_ERROR_INIT);
        } else {
            self.fsm.set_event(E_ERROR);
        }
    }

    // --- actions ----------------------------------------------------------

    fn run_action<H: Host>(&mut self, action: Action, ctx: &mut Ctx<'_, H>) {
        match action {
            Action::Start => self.a_start(ctx),
            Action::MemOpen => self.a_mem_open(ctx),
            Action::MemWrite => self.a_mem_write(ctx),
            Action::MemClose => self.a_mem_close(ctx),
            Action::InitDevice => self.a_init_device(ctx),
            Action::NetOff => self.a_net_off(ctx),
            Action::Timeout => self.a_timeout(ctx),
            Action::Error => self.a_error(ctx),
            Action::ErrorInit => self.a_error_init(ctx),
            Action::ErrorCloseInit => self.a_error_close_init(ctx),
        }
    }

    fn a_start<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        self.target_address = if self.node_pos_addr == NODE_POS_BASE {
            ADDR_LOCAL_NIC
        } else {
            self.node_pos_addr
        };
        self.admin_node_address = BC_ADMIN_BASE + (self.node_pos_addr & 0x00FF);
        self.current_function = PrgFunc::Welcome;
        let sent = ctx.cmd.welcome_sr(
            ctx.trcv,
            ctx.host,
            self.target_address,
            self.admin_node_address,
            SIGNATURE_VERSION,
            &self.signature,
            ObsToken::PrgWelcome,
        );
        self.check_ret(sent, ctx);
    }

    fn a_mem_open<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        self.current_function = PrgFunc::MemOpen;
        let sent = ctx.cmd.mem_session_open_sr(
            ctx.trcv,
            ctx.host,
            self.admin_node_address,
            self.session_type as u8,
            ObsToken::PrgMemOpen,
        );
        self.check_ret(sent, ctx);
    }

    fn a_mem_write<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        self.current_function = PrgFunc::MemWrite;
        let cmd = &self.commands[self.command_index];
        let sent = ctx.cmd.memory_write_sr(
            ctx.trcv,
            ctx.host,
            self.admin_node_address,
            self.session_handle,
            cmd.mem_id,
            cmd.address,
            &cmd.data,
            ObsToken::PrgMemWrite,
        );
        self.check_ret(sent, ctx);
    }

    fn a_mem_close<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        self.current_function = PrgFunc::MemClose;
        let sent = ctx.cmd.mem_session_close_sr(
            ctx.trcv,
            ctx.host,
            self.admin_node_address,
            self.session_handle,
            ObsToken::PrgMemClose,
        );
        self.check_ret(sent, ctx);
    }

    /// Normal completion: restart the device and report success. The
    /// restart is answered only on failure, so it runs unsupervised.
    fn a_init_device<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        self.current_function = PrgFunc::Init;
        let sent = ctx
            .cmd
            .device_init_start(ctx.trcv, ctx.host, self.admin_node_address, None);
        match sent {
            Ok(()) => {
                ctx.host.prog_report(&PrgReport::success());
                log::info!("prog: success");
            }
            Err(err) => {
                log::warn!("prog: device restart failed synchronously ({err})");
                ctx.host.prog_report(&PrgReport {
                    code: PrgResult::FktSync,
                    function: PrgFunc::Init,
                    parm: Vec::new(),
                });
            }
        }
        self.running = false;
    }

    fn a_net_off<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        ctx.cancel_timer(TimerKind::Prog, 0);
        ctx.host.prog_report(&PrgReport {
            code: PrgResult::NetOff,
            function: self.current_function,
            parm: Vec::new(),
        });
        self.running = false;
    }

    fn a_timeout<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        log::warn!("prog: supervision expired during {:?}", self.current_function);
        ctx.host.prog_report(&PrgReport {
            code: PrgResult::Timeout,
            function: self.current_function,
            parm: Vec::new(),
        });
        self.running = false;
    }

    fn a_error<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        ctx.host.prog_report(&self.error.clone());
        self.running = false;
    }

    /// Restart the device, then report the stored error. Unsupervised
    /// for the same reason as the success-path restart.
    fn a_error_init<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let sent = ctx
            .cmd
            .device_init_start(ctx.trcv, ctx.host, self.admin_node_address, None);
        if let Err(err) = sent {
            log::warn!("prog: device restart failed synchronously ({err})");
        }
        ctx.host.prog_report(&self.error.clone());
        self.running = false;
    }

    /// Close the foreign/broken session first; the close result lands
    /// in the error-close state, which restarts and reports.
    fn a_error_close_init<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let sent = ctx.cmd.mem_session_close_sr(
            ctx.trcv,
            ctx.host,
            self.admin_node_address,
            self.session_handle,
            ObsToken::PrgMemClose,
        );
        self.check_ret(sent, ctx);
    }

    // --- helpers ----------------------------------------------------------

    /// Supervises a sent command, or converts a synchronous failure
    /// into an error event.
    fn check_ret<H: Host>(&mut self, sent: Result<(), ApiError>, ctx: &mut Ctx<'_, H>) {
        match sent {
            Ok(()) => ctx.arm_timer(TimerKind::Prog, 0, TIMEOUT_COMMAND),
            Err(err) => {
                log::warn!("prog: synchronous failure {:?}", err);
                self.error = PrgReport {
                    code: PrgResult::FktSync,
                    function: self.current_function,
                    parm: Vec::new(),
                };
                self.fsm.set_event(E_ERROR);
                ctx.trigger(ServiceId::Prog);
            }
        }
    }

    fn store_error(&mut self, function: PrgFunc, info: &[u8]) {
        let mut parm = Vec::new();
        for b in info.iter().take(parm.capacity()) {
            let _ = parm.push(*b);
        }
        self.error = PrgReport {
            code: PrgResult::FktAsync,
            function,
            parm,
        };
    }

    /// 24-bit error tag from the first three raw error bytes
    /// (little-endian, as the nodes encode it).
    fn calc_error(parm: &[u8]) -> u32 {
        match parm {
            [b0, b1, b2, ..] => {
                *b0 as u32 | ((*b1 as u32) << 8) | ((*b2 as u32) << 16)
            }
            _ => 0,
        }
    }
}
