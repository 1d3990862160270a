//! Scenario harness for the engine.
//!
//! [`FakeHost`] records every upcall the engine makes — frames, timer
//! arming, service requests and all report surfaces — behind a shared
//! handle the test keeps. [`Rig`] drives the engine the way a real
//! host would: it forwards service requests, walks the clock, fires
//! the platform timer at its armed deadline and injects received
//! frames.

use std::cell::RefCell;
use std::rc::Rc;

use ringnet_abi::{
    BcdReport, CableLinkResult, EngineError, Host, NdAction, NdReport, NetworkStatus, NsResult,
    OpType, PhyTestResult, PrgReport, ResultCode, RouteState, SdReport, Signature, StatusMask,
    SIGNATURE_LEN_V1,
};
use ringnet_core::{Config, Engine};
use ringnet_net::frame;
use ringnet_net::msg::{ControlMsg, MsgId};

/// Everything the engine told the host.
#[derive(Default)]
pub struct HostState {
    pub tick: u16,
    /// Absolute deadline of the armed platform timer.
    pub timer_deadline: Option<u16>,
    pub service_requested: bool,
    pub frames: Vec<Vec<u8>>,
    pub errors: Vec<EngineError>,
    pub sd_reports: Vec<SdReport>,
    pub bcd_reports: Vec<BcdReport>,
    pub prg_reports: Vec<PrgReport>,
    pub script_reports: Vec<(u16, NsResult)>,
    pub route_reports: Vec<(u16, RouteState)>,
    pub nd_reports: Vec<NdReport>,
    pub cable_reports: Vec<CableLinkResult>,
    pub phy_reports: Vec<PhyTestResult>,
    pub phy_failures: Vec<ResultCode>,
    pub status_reports: Vec<(StatusMask, NetworkStatus)>,
    /// Verdict handed back for discovered signatures.
    pub evaluate: Option<Box<dyn FnMut(&Signature) -> NdAction>>,
}

pub struct FakeHost(pub Rc<RefCell<HostState>>);

impl Host for FakeHost {
    fn get_tick_count(&mut self) -> u16 {
        self.0.borrow().tick
    }

    fn set_timer(&mut self, ms: u16) {
        let mut state = self.0.borrow_mut();
        let deadline = state.tick.wrapping_add(ms);
        state.timer_deadline = (ms > 0).then_some(deadline);
    }

    fn request_service(&mut self) {
        self.0.borrow_mut().service_requested = true;
    }

    fn error(&mut self, code: EngineError) {
        self.0.borrow_mut().errors.push(code);
    }

    fn tx_enqueue(&mut self, frame: &[u8]) {
        self.0.borrow_mut().frames.push(frame.to_vec());
    }

    fn sys_diag_report(&mut self, report: &SdReport) {
        self.0.borrow_mut().sd_reports.push(*report);
    }

    fn bc_diag_report(&mut self, report: BcdReport) {
        self.0.borrow_mut().bcd_reports.push(report);
    }

    fn prog_report(&mut self, report: &PrgReport) {
        self.0.borrow_mut().prg_reports.push(report.clone());
    }

    fn script_report(&mut self, node_address: u16, result: &NsResult) {
        self.0
            .borrow_mut()
            .script_reports
            .push((node_address, result.clone()));
    }

    fn route_report(&mut self, route_id: u16, state: RouteState) {
        self.0.borrow_mut().route_reports.push((route_id, state));
    }

    fn discovery_evaluate(&mut self, signature: &Signature) -> NdAction {
        let mut state = self.0.borrow_mut();
        match state.evaluate.as_mut() {
            Some(eval) => eval(signature),
            None => NdAction::Ignore,
        }
    }

    fn discovery_report(&mut self, report: &NdReport) {
        self.0.borrow_mut().nd_reports.push(*report);
    }

    fn cable_link_report(&mut self, result: CableLinkResult) {
        self.0.borrow_mut().cable_reports.push(result);
    }

    fn phy_test_report(&mut self, result: &PhyTestResult) {
        self.0.borrow_mut().phy_reports.push(*result);
    }

    fn phy_test_failed(&mut self, code: ResultCode) {
        self.0.borrow_mut().phy_failures.push(code);
    }

    fn network_status(&mut self, mask: StatusMask, status: &NetworkStatus) {
        self.0.borrow_mut().status_reports.push((mask, *status));
    }
}

pub struct Rig {
    pub engine: Engine<FakeHost>,
    pub state: Rc<RefCell<HostState>>,
}

impl Default for Rig {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Rig {
    pub fn new(cfg: Config) -> Self {
        let state = Rc::new(RefCell::new(HostState::default()));
        let engine = Engine::new(cfg, FakeHost(state.clone()));
        Self { engine, state }
    }

    /// Forwards service requests until the engine goes quiet.
    pub fn drain(&mut self) {
        for _ in 0..64 {
            let requested = std::mem::take(&mut self.state.borrow_mut().service_requested);
            if !requested {
                return;
            }
            self.engine.service();
        }
        panic!("engine did not go quiet within 64 service passes");
    }

    /// Walks the clock forward, firing the platform timer at each
    /// armed deadline on the way.
    pub fn advance(&mut self, ms: u16) {
        let mut remaining = u32::from(ms);
        loop {
            let (tick, deadline) = {
                let state = self.state.borrow();
                (state.tick, state.timer_deadline)
            };
            let Some(deadline) = deadline else {
                break;
            };
            let distance = u32::from(deadline.wrapping_sub(tick));
            if distance > remaining {
                break;
            }
            {
                let mut state = self.state.borrow_mut();
                state.tick = deadline;
                state.timer_deadline = None;
            }
            remaining -= distance;
            self.engine.report_timeout();
            self.drain();
        }
        let mut state = self.state.borrow_mut();
        state.tick = state.tick.wrapping_add(remaining as u16);
    }

    /// Injects one received telegram and services the fallout.
    pub fn rx(&mut self, msg: &ControlMsg) {
        let mut buf = [0u8; frame::MAX_FRAME];
        let n = frame::encode(msg, &mut buf).expect("harness frame");
        self.engine.rx_ready(&buf[..n]);
        self.drain();
    }

    /// Decodes and clears the captured tx frames.
    pub fn take_tx(&mut self) -> Vec<ControlMsg> {
        let raw = std::mem::take(&mut self.state.borrow_mut().frames);
        raw.iter()
            .map(|f| frame::decode(f).expect("engine emitted a malformed frame"))
            .collect()
    }
}

// --- telegram builders ------------------------------------------------------

pub fn msg(fblock: u8, function: u16, op: OpType, payload: &[u8]) -> ControlMsg {
    let mut msg = ControlMsg::blank();
    msg.id = MsgId {
        fblock_id: fblock,
        instance_id: 0,
        function_id: function,
        op_type: op,
    };
    msg.set_payload(payload).expect("harness payload");
    msg
}

pub fn signature(node_address: u16, num_ports: u8, position: u8, mac_lo: u16) -> Signature {
    Signature {
        node_address,
        group_address: 0x0022,
        mac_47_32: 0x0002,
        mac_31_16: 0x0466,
        mac_15_0: mac_lo,
        node_pos_addr: 0x0400 + position as u16,
        diagnosis_id: 0x0001,
        num_ports,
        chip_id: 0x18,
        fw_major: 2,
        fw_minor: 1,
        fw_release: 0,
        fw_build: 0x0102_0304,
        cs_major: 1,
        cs_minor: 0,
        cs_release: 0,
    }
}

/// `Hello.Status` payload: version byte plus the signature record.
pub fn hello_status(sig: &Signature) -> ControlMsg {
    let mut payload = [0u8; 1 + SIGNATURE_LEN_V1];
    payload[0] = 1;
    sig.encode(&mut payload[1..]).unwrap();
    msg(
        ringnet_net::msg::FB_DIAG,
        ringnet_net::msg::FID_HELLO,
        OpType::Status,
        &payload,
    )
}

/// `Welcome.Result` payload: result byte, version, signature record.
pub fn welcome_result(res: u8, sig: &Signature) -> ControlMsg {
    let mut payload = [0u8; 2 + SIGNATURE_LEN_V1];
    payload[0] = res;
    payload[1] = 1;
    sig.encode(&mut payload[2..]).unwrap();
    msg(
        ringnet_net::msg::FB_DIAG,
        ringnet_net::msg::FID_WELCOME,
        OpType::Result,
        &payload,
    )
}

/// Network status telegram.
pub fn network_status(available: bool, node_address: u16, max_position: u8) -> ControlMsg {
    let mut payload = [0u8; 10];
    payload[2] = available as u8;
    payload[6..8].copy_from_slice(&node_address.to_be_bytes());
    payload[9] = max_position;
    msg(
        ringnet_net::msg::FB_NIC,
        ringnet_net::msg::FID_NIC_NET_STATUS,
        OpType::Status,
        &payload,
    )
}

/// Back-channel probe result: answer class in the high nibble, admin
/// address in the low 12 bits.
pub fn bc_probe_result(dut: u8, admin: u16) -> ControlMsg {
    let word = ((dut as u16) << 12) | (admin & 0x0FFF);
    msg(
        ringnet_net::msg::FB_DIAG,
        ringnet_net::msg::FID_BC_DIAG,
        OpType::Result,
        &word.to_be_bytes(),
    )
}
