//! Node scripting.
//!
//! Runs a node's ordered script list: per step an optional pre-send
//! pause, one control message to the target, and (when declared) a
//! reply that must match the expected header and bytes. A failing
//! transmission, an error reply or an expired reply guard stops the
//! run immediately with a detailed result; exhausting the list reports
//! success.
//!
//! One run per target at a time; different targets run concurrently in
//! separate sessions. Incoming control messages are offered to the
//! active sessions before the diagnostic command dispatch sees them.

use heapless::Vec;

use ringnet_abi::{
    ApiError, ConfigMsg, DeviceState, Host, NsFailure, NsResult, OpType, ResultCode, Script,
    ServiceId, StdResult, TimerKind, TxStatus, TxTag,
};
use ringnet_net::ctx::Ctx;
use ringnet_net::msg::{ControlMsg, MsgId};

use crate::model::MAX_NODE_SCRIPTS;

/// Concurrent script sessions (distinct targets).
pub const MAX_SESSIONS: usize = 4;

/// Reply guard: a script step with an expected reply fails with a
/// timeout result when nothing matches within this window.
const SCRIPT_GUARD_MS: u16 = 5200;

/// Scheduler priority of the script services.
pub const SRV_PRIO: u8 = 250;

/// Service event: handle the next script step.
pub const EVT_NEXT: u32 = 0x01;
/// Service event: fail the run.
pub const EVT_ERROR: u32 = 0x02;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessState {
    Free,
    /// Waiting for the remote device to synchronize.
    Syncing,
    /// Between steps; the service event drives the next one.
    Running,
    /// Pre-send pause timer armed.
    Paused,
    /// Step sent, expected reply outstanding.
    WaitReply,
}

struct Session {
    state: SessState,
    target: u16,
    scripts: Vec<Script, MAX_NODE_SCRIPTS>,
    index: usize,
    pause: u16,
    result: NsResult,
}

impl Session {
    const fn free() -> Self {
        Self {
            state: SessState::Free,
            target: 0,
            scripts: Vec::new(),
            index: 0,
            pause: 0,
            result: NsResult {
                success: false,
                failure: NsFailure::None,
                tx_status: TxStatus::Ok,
                nic_result: StdResult {
                    code: ResultCode::Success,
                    info: Vec::new(),
                },
            },
        }
    }

    fn current(&self) -> Option<&Script> {
        self.scripts.get(self.index)
    }
}

pub struct ScriptMgr {
    sessions: [Session; MAX_SESSIONS],
}

impl Default for ScriptMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptMgr {
    pub const fn new() -> Self {
        Self {
            sessions: [
                Session::free(),
                Session::free(),
                Session::free(),
                Session::free(),
            ],
        }
    }

    /// `true` while `target` has a run in flight.
    pub fn is_locked(&self, target: u16) -> bool {
        self.sessions
            .iter()
            .any(|s| s.state != SessState::Free && s.target == target)
    }

    // --- API --------------------------------------------------------------

    /// Starts the script list on `target`.
    ///
    /// `ApiLocked` while the target already runs a list,
    /// `BufferOverflow` when every session is taken, `Parameter` for an
    /// empty list.
    pub fn run<H: Host>(
        &mut self,
        ctx: &mut Ctx<'_, H>,
        target: u16,
        scripts: &[Script],
    ) -> Result<(), ApiError> {
        if self.is_locked(target) {
            return Err(ApiError::ApiLocked);
        }
        if scripts.is_empty() || scripts.len() > MAX_NODE_SCRIPTS {
            return Err(ApiError::Parameter);
        }
        let idx = self
            .sessions
            .iter()
            .position(|s| s.state == SessState::Free)
            .ok_or(ApiError::BufferOverflow)?;

        {
            let sess = &mut self.sessions[idx];
            sess.target = target;
            sess.scripts.clear();
            // length checked above
            let _ = sess.scripts.extend_from_slice(scripts);
            sess.index = 0;
            sess.pause = scripts[0].pause_ms;
            sess.result = NsResult::success();
        }

        if ctx.sync.state(target) != DeviceState::Synced {
            ctx.sync
                .sync_device(ctx.cmd, ctx.trcv, ctx.host, target, idx as u8)?;
            self.sessions[idx].state = SessState::Syncing;
        } else {
            self.sessions[idx].state = SessState::Running;
            ctx.sched.set_event(ServiceId::Script(idx as u8), EVT_NEXT);
        }
        log::info!("script: run {} steps on {:#x}", scripts.len(), target);
        Ok(())
    }

    // --- engine dispatch --------------------------------------------------

    /// Service pass for one session.
    pub fn service<H: Host>(&mut self, idx: u8, events: u32, ctx: &mut Ctx<'_, H>) {
        if events & EVT_ERROR != 0 {
            self.fail(idx, ctx);
            return;
        }
        if events & EVT_NEXT != 0 {
            self.handle_next(idx, ctx);
        }
    }

    /// Pre-send pause expired.
    pub fn on_pause_timeout<H: Host>(&mut self, idx: u8, ctx: &mut Ctx<'_, H>) {
        let sess = &mut self.sessions[idx as usize];
        if sess.state == SessState::Paused {
            sess.state = SessState::Running;
            sess.pause = 0;
            ctx.sched.set_event(ServiceId::Script(idx), EVT_NEXT);
        }
    }

    /// Reply guard expired: the target never answered the step.
    pub fn on_guard_timeout<H: Host>(&mut self, idx: u8, ctx: &mut Ctx<'_, H>) {
        let sess = &mut self.sessions[idx as usize];
        if sess.state == SessState::WaitReply {
            sess.result = NsResult {
                success: false,
                failure: NsFailure::TargetScript,
                tx_status: TxStatus::Ok,
                nic_result: StdResult::from_code(ResultCode::Timeout),
            };
            ctx.sched.set_event(ServiceId::Script(idx), EVT_ERROR);
        }
    }

    /// Transmit status for a tagged script frame.
    pub fn on_tx_status<H: Host>(&mut self, tag: TxTag, status: TxStatus, ctx: &mut Ctx<'_, H>) {
        let TxTag::Script(idx) = tag;
        let sess = &mut self.sessions[idx as usize];
        if sess.state != SessState::WaitReply {
            return;
        }
        if status != TxStatus::Ok {
            sess.result = NsResult {
                success: false,
                failure: NsFailure::Tx,
                tx_status: status,
                nic_result: StdResult::default(),
            };
            ctx.cancel_timer(TimerKind::ScriptGuard, idx);
            ctx.sched.set_event(ServiceId::Script(idx), EVT_ERROR);
        } else if sess
            .current()
            .is_some_and(|s| s.expected_reply.is_none())
        {
            // no reply declared: the step completes on transmission
            ctx.cancel_timer(TimerKind::ScriptGuard, idx);
            self.advance(idx, ctx);
        }
    }

    /// Offers a received control message to the active sessions.
    ///
    /// Returns `true` when a session claimed it; claimed messages do
    /// not reach the diagnostic command dispatch.
    pub fn rx_filter<H: Host>(&mut self, msg: &ControlMsg, ctx: &mut Ctx<'_, H>) -> bool {
        for idx in 0..MAX_SESSIONS as u8 {
            let sess = &self.sessions[idx as usize];
            if sess.state != SessState::WaitReply {
                continue;
            }
            let Some(script) = sess.current() else {
                continue;
            };
            let Some(expect) = &script.expected_reply else {
                continue;
            };
            if Self::matches(expect, msg) {
                ctx.cancel_timer(TimerKind::ScriptGuard, idx);
                log::debug!("script: step {} on {:#x} answered", sess.index, sess.target);
                self.advance(idx, ctx);
                return true;
            }
            // an error reply to the outstanding command fails the run
            if msg.id.op_type == OpType::Error
                && msg.id.fblock_id == script.send_cmd.fblock_id
                && msg.id.function_id == script.send_cmd.function_id
                && msg.id.instance_id == script.send_cmd.instance_id
            {
                let sess = &mut self.sessions[idx as usize];
                sess.result = NsResult {
                    success: false,
                    failure: NsFailure::TargetScript,
                    tx_status: TxStatus::Ok,
                    nic_result: StdResult::translate_error(&msg.payload),
                };
                ctx.cancel_timer(TimerKind::ScriptGuard, idx);
                ctx.sched.set_event(ServiceId::Script(idx), EVT_ERROR);
                return true;
            }
        }
        false
    }

    /// Device synchronization settled for `idx`.
    pub fn on_sync_result<H: Host>(&mut self, idx: u8, result: &StdResult, ctx: &mut Ctx<'_, H>) {
        let sess = &mut self.sessions[idx as usize];
        if sess.state != SessState::Syncing {
            return;
        }
        if result.is_success() {
            sess.state = SessState::Running;
            ctx.sched.set_event(ServiceId::Script(idx), EVT_NEXT);
        } else {
            sess.result = NsResult {
                success: false,
                failure: NsFailure::TargetSync,
                tx_status: if result.code == ResultCode::Transmission {
                    TxStatus::Failed
                } else {
                    TxStatus::Ok
                },
                nic_result: result.clone(),
            };
            ctx.sched.set_event(ServiceId::Script(idx), EVT_ERROR);
        }
    }

    /// Fatal engine event: fail every active session.
    pub fn on_terminate<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        for idx in 0..MAX_SESSIONS as u8 {
            let sess = &mut self.sessions[idx as usize];
            if sess.state != SessState::Free {
                sess.result = NsResult {
                    success: false,
                    failure: NsFailure::TargetScript,
                    tx_status: TxStatus::Ok,
                    nic_result: StdResult::from_code(ResultCode::Transmission),
                };
                ctx.cancel_timer(TimerKind::ScriptGuard, idx);
                ctx.cancel_timer(TimerKind::ScriptPause, idx);
                self.fail(idx, ctx);
            }
        }
    }

    // --- internals --------------------------------------------------------

    fn handle_next<H: Host>(&mut self, idx: u8, ctx: &mut Ctx<'_, H>) {
        let sess = &mut self.sessions[idx as usize];
        if sess.state != SessState::Running {
            return;
        }
        if sess.index >= sess.scripts.len() {
            self.finish(idx, ctx);
            return;
        }
        if sess.pause > 0 {
            let delay = sess.pause;
            sess.state = SessState::Paused;
            log::debug!("script: pausing {} ms before step {}", delay, sess.index);
            ctx.arm_timer(TimerKind::ScriptPause, idx, delay);
            return;
        }
        self.send_current(idx, ctx);
    }

    fn send_current<H: Host>(&mut self, idx: u8, ctx: &mut Ctx<'_, H>) {
        let sess = &mut self.sessions[idx as usize];
        let Some(script) = sess.scripts.get(sess.index) else {
            self.finish(idx, ctx);
            return;
        };
        let send = &script.send_cmd;
        let token = match ctx.trcv.alloc_tx(send.data.len()) {
            Ok(token) => token,
            Err(err) => {
                log::warn!("script: send failed synchronously ({err})");
                sess.result = NsResult {
                    success: false,
                    failure: NsFailure::Tx,
                    tx_status: TxStatus::Failed,
                    nic_result: StdResult::default(),
                };
                ctx.sched.set_event(ServiceId::Script(idx), EVT_ERROR);
                return;
            }
        };
        {
            let msg = ctx.trcv.msg_mut(&token);
            msg.destination = sess.target;
            msg.id = MsgId {
                fblock_id: send.fblock_id,
                instance_id: send.instance_id,
                function_id: send.function_id,
                op_type: OpType::from_raw(send.op_type).unwrap_or(OpType::Start),
            };
            // bounded by the allocation above
            let _ = msg.set_payload(&send.data);
        }
        ctx.trcv.send_tagged(ctx.host, token, TxTag::Script(idx));
        sess.state = SessState::WaitReply;
        ctx.arm_timer(TimerKind::ScriptGuard, idx, SCRIPT_GUARD_MS);
    }

    fn advance<H: Host>(&mut self, idx: u8, ctx: &mut Ctx<'_, H>) {
        let sess = &mut self.sessions[idx as usize];
        sess.index += 1;
        sess.pause = sess.current().map_or(0, |s| s.pause_ms);
        sess.state = SessState::Running;
        ctx.sched.set_event(ServiceId::Script(idx), EVT_NEXT);
    }

    fn finish<H: Host>(&mut self, idx: u8, ctx: &mut Ctx<'_, H>) {
        let sess = &mut self.sessions[idx as usize];
        let target = sess.target;
        sess.state = SessState::Free;
        log::info!("script: run on {:#x} succeeded", target);
        ctx.host.script_report(target, &NsResult::success());
    }

    fn fail<H: Host>(&mut self, idx: u8, ctx: &mut Ctx<'_, H>) {
        let sess = &mut self.sessions[idx as usize];
        if sess.state == SessState::Free {
            return;
        }
        let target = sess.target;
        let result = sess.result.clone();
        sess.state = SessState::Free;
        log::warn!(
            "script: run on {:#x} failed ({:?})",
            target,
            result.failure
        );
        ctx.host.script_report(target, &result);
    }

    /// Header equality plus byte-wise equality over the declared data.
    fn matches(expect: &ConfigMsg, msg: &ControlMsg) -> bool {
        expect.fblock_id == msg.id.fblock_id
            && expect.function_id == msg.id.function_id
            && expect.instance_id == msg.id.instance_id
            && expect.op_type == msg.id.op_type as u8
            && (expect.data.is_empty()
                || (expect.data.len() == msg.payload.len()
                    && expect.data.as_slice() == msg.payload.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringnet_abi::EngineError;
    use ringnet_base::sched::Scheduler;
    use ringnet_base::timer::TimerWheel;
    use ringnet_net::cmd::CmdSet;
    use ringnet_net::sync::SyncMgr;
    use ringnet_net::trcv::Transceiver;

    #[derive(Default)]
    struct RecordingHost {
        reports: std::vec::Vec<(u16, NsResult)>,
        frames: usize,
    }

    extern crate std;

    impl Host for RecordingHost {
        fn get_tick_count(&mut self) -> u16 {
            0
        }
        fn set_timer(&mut self, _ms: u16) {}
        fn request_service(&mut self) {}
        fn error(&mut self, _code: EngineError) {}
        fn tx_enqueue(&mut self, _frame: &[u8]) {
            self.frames += 1;
        }
        fn script_report(&mut self, node_address: u16, result: &NsResult) {
            self.reports.push((node_address, result.clone()));
        }
    }

    struct Rig {
        host: RecordingHost,
        timers: TimerWheel,
        sched: Scheduler,
        trcv: Transceiver,
        cmd: CmdSet,
        sync: SyncMgr,
    }

    impl Rig {
        fn new() -> Self {
            let mut sched = Scheduler::new();
            for i in 0..MAX_SESSIONS as u8 {
                sched.register(ServiceId::Script(i), SRV_PRIO).unwrap();
            }
            Self {
                host: RecordingHost::default(),
                timers: TimerWheel::new(),
                sched,
                trcv: Transceiver::new(),
                cmd: CmdSet::new(),
                sync: SyncMgr::new(),
            }
        }

        fn ctx(&mut self) -> Ctx<'_, RecordingHost> {
            Ctx {
                host: &mut self.host,
                timers: &mut self.timers,
                sched: &mut self.sched,
                trcv: &mut self.trcv,
                cmd: &mut self.cmd,
                sync: &mut self.sync,
                now: 0,
            }
        }
    }

    fn script(expect_reply: bool) -> Script {
        Script {
            pause_ms: 0,
            send_cmd: ConfigMsg::new(2, 0, 0x6C1, OpType::Start, &[0x00, 0x40]).unwrap(),
            expected_reply: expect_reply
                .then(|| ConfigMsg::new(2, 0, 0x6C1, OpType::Status, &[]).unwrap()),
        }
    }

    fn drain(mgr: &mut ScriptMgr, rig: &mut Rig) {
        loop {
            let pending = {
                let mut ctx = rig.ctx();
                let snap = ctx.sched.begin_pass();
                snap
            };
            if pending.is_empty() {
                rig.sched.end_pass();
                break;
            }
            for p in &pending {
                if let ServiceId::Script(i) = p.id {
                    let mut ctx = rig.ctx();
                    mgr.service(i, p.events, &mut ctx);
                }
            }
            rig.sched.end_pass();
        }
    }

    #[test]
    fn second_run_on_same_target_locked() {
        let mut mgr = ScriptMgr::new();
        let mut rig = Rig::new();
        // pre-synced device so the run goes straight to the send
        rig.sync
            .sync_device(&mut rig.cmd, &mut rig.trcv, &mut rig.host, 0x0110, 0)
            .unwrap();
        let _ = rig.sync.take_settled();

        let scripts = [script(true)];
        mgr.run(&mut rig.ctx(), 0x0110, &scripts).unwrap();
        assert_eq!(
            mgr.run(&mut rig.ctx(), 0x0110, &scripts),
            Err(ApiError::ApiLocked)
        );
        // a different target gets its own session
        mgr.run(&mut rig.ctx(), 0x0111, &scripts).unwrap();
    }

    #[test]
    fn reply_match_advances_to_success() {
        let mut mgr = ScriptMgr::new();
        let mut rig = Rig::new();
        rig.sync
            .sync_device(&mut rig.cmd, &mut rig.trcv, &mut rig.host, 0x0110, 0)
            .unwrap();
        let _ = rig.sync.take_settled();

        let scripts = [script(true)];
        mgr.run(&mut rig.ctx(), 0x0110, &scripts).unwrap();
        drain(&mut mgr, &mut rig);

        // the reply the script expects
        let mut reply = ControlMsg::blank();
        reply.id = MsgId {
            fblock_id: 2,
            instance_id: 0,
            function_id: 0x6C1,
            op_type: OpType::Status,
        };
        assert!(mgr.rx_filter(&reply, &mut rig.ctx()));
        drain(&mut mgr, &mut rig);

        assert_eq!(rig.host.reports.len(), 1);
        assert!(rig.host.reports[0].1.success);
        assert!(!mgr.is_locked(0x0110));
    }

    #[test]
    fn guard_timeout_fails_with_target_script() {
        let mut mgr = ScriptMgr::new();
        let mut rig = Rig::new();
        rig.sync
            .sync_device(&mut rig.cmd, &mut rig.trcv, &mut rig.host, 0x0110, 0)
            .unwrap();
        let _ = rig.sync.take_settled();

        let scripts = [script(true)];
        mgr.run(&mut rig.ctx(), 0x0110, &scripts).unwrap();
        drain(&mut mgr, &mut rig);

        mgr.on_guard_timeout(0, &mut rig.ctx());
        drain(&mut mgr, &mut rig);

        let (_, result) = &rig.host.reports[0];
        assert!(!result.success);
        assert_eq!(result.failure, NsFailure::TargetScript);
        assert_eq!(result.nic_result.code, ResultCode::Timeout);
    }

    #[test]
    fn error_reply_fails_run() {
        let mut mgr = ScriptMgr::new();
        let mut rig = Rig::new();
        rig.sync
            .sync_device(&mut rig.cmd, &mut rig.trcv, &mut rig.host, 0x0110, 0)
            .unwrap();
        let _ = rig.sync.take_settled();

        let scripts = [script(true)];
        mgr.run(&mut rig.ctx(), 0x0110, &scripts).unwrap();
        drain(&mut mgr, &mut rig);

        let mut err = ControlMsg::blank();
        err.id = MsgId {
            fblock_id: 2,
            instance_id: 0,
            function_id: 0x6C1,
            op_type: OpType::Error,
        };
        err.set_payload(&[0x20, 0x02]).unwrap();
        assert!(mgr.rx_filter(&err, &mut rig.ctx()));
        drain(&mut mgr, &mut rig);

        let (_, result) = &rig.host.reports[0];
        assert_eq!(result.failure, NsFailure::TargetScript);
        assert_eq!(result.nic_result.code, ResultCode::Busy);
    }
}
