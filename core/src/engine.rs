//! The engine root object.

use ringnet_abi::{
    ApiError, Availability, EngineError, EventMask, Host, MemCmd, ObsToken, OpType, Script,
    ServiceId, SessionType, Signature, StatusMask, TimerKind, TxStatus,
};
use ringnet_base::events::EventBus;
use ringnet_base::lock::LOCK_TIMEOUT_MS;
use ringnet_base::sched::Scheduler;
use ringnet_base::timer::{FiredTimer, TimerWheel};
use ringnet_diag::{BcDiag, CableLinkDiag, Discovery, PhyTest, Programming, SysDiag};
use ringnet_net::cmd::CmdSet;
use ringnet_net::ctx::Ctx;
use ringnet_net::msg::{FB_NIC, FID_NIC_NET_STATUS};
use ringnet_net::status::NetworkMonitor;
use ringnet_net::sync::SyncMgr;
use ringnet_net::trcv::Transceiver;
use ringnet_net::{ExcResult, frame};
use ringnet_route::mgr::RouteMgr;
use ringnet_route::script::{self, MAX_SESSIONS, ScriptMgr};

use crate::config::Config;

/// Builds a [`Ctx`] from disjoint engine fields.
macro_rules! engine_ctx {
    ($self:ident, $now:expr) => {
        Ctx {
            host: &mut $self.host,
            timers: &mut $self.timers,
            sched: &mut $self.sched,
            trcv: &mut $self.trcv,
            cmd: &mut $self.cmd,
            sync: &mut $self.sync,
            now: $now,
        }
    };
}

pub struct Engine<H: Host> {
    host: H,
    cfg: Config,
    initialized: bool,

    timers: TimerWheel,
    sched: Scheduler,
    bus: EventBus,

    trcv: Transceiver,
    cmd: CmdSet,
    sync: SyncMgr,
    monitor: NetworkMonitor,

    sysdiag: SysDiag,
    bcdiag: BcDiag,
    cablelink: CableLinkDiag,
    phytest: PhyTest,
    discovery: Discovery,
    prog: Programming,

    routes: RouteMgr,
    scripts: ScriptMgr,
}

impl<H: Host> Engine<H> {
    /// Creates and initializes the engine: registers every service,
    /// wires the termination bus, and installs the configured nodes
    /// and routes.
    pub fn new(cfg: Config, host: H) -> Self {
        let mut engine = Self {
            host,
            cfg,
            initialized: false,
            timers: TimerWheel::new(),
            sched: Scheduler::new(),
            bus: EventBus::new(),
            trcv: Transceiver::new(),
            cmd: CmdSet::new(),
            sync: SyncMgr::new(),
            monitor: NetworkMonitor::new(),
            sysdiag: SysDiag::new(),
            bcdiag: BcDiag::new(),
            cablelink: CableLinkDiag::new(),
            phytest: PhyTest::new(),
            discovery: Discovery::new(),
            prog: Programming::new(),
            routes: RouteMgr::new(),
            scripts: ScriptMgr::new(),
        };
        engine.init();
        engine
    }

    fn init(&mut self) {
        // services, highest urgency first among equals by order
        let _ = self.sched.register(ServiceId::SysDiag, ringnet_diag::sysdiag::SRV_PRIO);
        let _ = self.sched.register(ServiceId::BcDiag, ringnet_diag::bcdiag::SRV_PRIO);
        let _ = self
            .sched
            .register(ServiceId::Discovery, ringnet_diag::discovery::SRV_PRIO);
        let _ = self.sched.register(ServiceId::Prog, ringnet_diag::prog::SRV_PRIO);
        for i in 0..MAX_SESSIONS as u8 {
            let _ = self.sched.register(ServiceId::Script(i), script::SRV_PRIO);
        }
        let _ = self.sched.register(ServiceId::Routing, 100);

        // termination fan-out
        for id in [
            ServiceId::SysDiag,
            ServiceId::BcDiag,
            ServiceId::Discovery,
            ServiceId::Prog,
            ServiceId::Routing,
        ] {
            let _ = self.bus.subscribe(id, EventMask::TERMINATION | EventMask::NET_OFF);
        }
        for i in 0..MAX_SESSIONS as u8 {
            let _ = self
                .bus
                .subscribe(ServiceId::Script(i), EventMask::TERMINATION);
        }

        // network status listeners
        let _ = self.monitor.subscribe(ServiceId::BcDiag);
        let _ = self.monitor.subscribe(ServiceId::Prog);

        let nodes = core::mem::take(&mut self.cfg.nodes);
        for node in nodes {
            if let Err(err) = self.routes.add_node(node) {
                log::warn!("engine: node rejected at init ({err})");
            }
        }
        let routes = core::mem::take(&mut self.cfg.routes);
        for route in routes {
            if let Err(err) = self.routes.add_route(route) {
                log::warn!("engine: route rejected at init ({err})");
            }
        }

        self.initialized = true;
        log::info!("engine: initialized");
    }

    /// Stops the engine: every machine closes out, timers and tx
    /// messages are released. The application must create a fresh
    /// engine to continue.
    pub fn stop(&mut self) {
        let now = self.host.get_tick_count();
        self.broadcast(EventMask::TERMINATION, now);
        self.timers.clear();
        self.trcv.reset();
        self.cmd.reset();
        self.sync.reset();
        self.initialized = false;
        self.host.set_timer(0);
        self.host.error(EngineError::Stopped);
        log::info!("engine: stopped");
    }

    // --- host entry points ------------------------------------------------

    /// One scheduling pass. Call after a `request_service` upcall.
    pub fn service(&mut self) {
        if !self.initialized {
            return;
        }
        let now = self.host.get_tick_count();
        let snapshot = self.sched.begin_pass();
        for pending in &snapshot {
            self.dispatch_service(pending.id, pending.events, now);
        }
        self.sched.end_pass();
        self.post_pass(now);
    }

    /// The platform timer armed via `set_timer` expired.
    pub fn report_timeout(&mut self) {
        if !self.initialized {
            return;
        }
        let now = self.host.get_tick_count();
        let fired = self.timers.tick(now);
        for timer in &fired {
            self.dispatch_timer(*timer, now);
        }
        self.post_pass(now);
    }

    /// One frame arrived from the byte link.
    pub fn rx_ready(&mut self, raw: &[u8]) {
        if !self.initialized {
            return;
        }
        let Some(msg) = frame::decode(raw) else {
            log::debug!("engine: dropping malformed frame ({} bytes)", raw.len());
            return;
        };
        let now = self.host.get_tick_count();

        // active script sessions get first claim on replies
        let claimed = {
            let mut ctx = engine_ctx!(self, now);
            self.scripts.rx_filter(&msg, &mut ctx)
        };
        if !claimed {
            if msg.id.fblock_id == FB_NIC
                && msg.id.function_id == FID_NIC_NET_STATUS
                && msg.id.op_type == OpType::Status
            {
                self.on_network_status(&msg, now);
            } else if let Some((token, result)) = self.cmd.on_rx(&msg) {
                self.dispatch_obs(token, &result, now);
            }
        }
        self.post_pass(now);
    }

    /// The link driver reports the transmit status of the oldest
    /// outstanding frame.
    pub fn tx_complete(&mut self, status: TxStatus) {
        if !self.initialized {
            return;
        }
        let now = self.host.get_tick_count();
        if let Some(Some(tag)) = self.trcv.take_completion() {
            let mut ctx = engine_ctx!(self, now);
            self.scripts.on_tx_status(tag, status, &mut ctx);
        }
        self.post_pass(now);
    }

    // --- public operations --------------------------------------------------

    pub fn start_system_diagnosis(&mut self) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let mut ctx = engine_ctx!(engine, now);
            engine.sysdiag.run(&mut ctx)
        })
    }

    pub fn abort_system_diagnosis(&mut self) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let mut ctx = engine_ctx!(engine, now);
            engine.sysdiag.abort(&mut ctx)
        })
    }

    pub fn start_bc_diagnosis(&mut self) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let mut ctx = engine_ctx!(engine, now);
            engine.bcdiag.start(&mut ctx)
        })
    }

    pub fn start_cable_link_diagnosis(&mut self, target: u16, port: u8) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let mut ctx = engine_ctx!(engine, now);
            engine.cablelink.start(&mut ctx, target, port)
        })
    }

    pub fn start_phy_test(
        &mut self,
        port: u8,
        test_type: u8,
        lead_in: u16,
        duration: u32,
        lead_out: u16,
    ) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let mut ctx = engine_ctx!(engine, now);
            engine
                .phytest
                .start(&mut ctx, port, test_type, lead_in, duration, lead_out)
        })
    }

    pub fn request_phy_test_result(&mut self) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let mut ctx = engine_ctx!(engine, now);
            engine.phytest.request_result(&mut ctx)
        })
    }

    pub fn start_discovery(&mut self) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let mut ctx = engine_ctx!(engine, now);
            engine.discovery.start(&mut ctx)
        })
    }

    pub fn stop_discovery(&mut self) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let mut ctx = engine_ctx!(engine, now);
            engine.discovery.stop(&mut ctx)
        })
    }

    /// Queries a node's full signature record; answered through the
    /// discovery report surface.
    pub fn request_node_signature(&mut self, target: u16) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let mut ctx = engine_ctx!(engine, now);
            engine.discovery.query_signature(&mut ctx, target)
        })
    }

    pub fn program_node(
        &mut self,
        node_pos_addr: u16,
        signature: &Signature,
        session_type: SessionType,
        commands: &[MemCmd],
    ) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let mut ctx = engine_ctx!(engine, now);
            engine
                .prog
                .start(&mut ctx, node_pos_addr, signature, session_type, commands)
        })
    }

    /// Runs the configured script list of a managed node.
    pub fn run_node_script(&mut self, node_address: u16) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let scripts = engine
                .routes
                .node(node_address)
                .ok_or(ApiError::Parameter)?
                .scripts
                .clone();
            let mut ctx = engine_ctx!(engine, now);
            engine.scripts.run(&mut ctx, node_address, &scripts)
        })
    }

    /// Runs an ad-hoc script list on any target.
    pub fn run_script(&mut self, target: u16, scripts: &[Script]) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let mut ctx = engine_ctx!(engine, now);
            engine.scripts.run(&mut ctx, target, scripts)
        })
    }

    pub fn set_node_available(&mut self, address: u16, available: bool) -> Result<(), ApiError> {
        self.guarded(|engine, now| {
            let changes = engine.routes.set_node_available(address, available)?;
            for change in &changes {
                engine.host.route_report(change.route_id, change.state);
            }
            if !available {
                // a vanished node loses its synchronization
                if let Some(outcome) = engine.sync.invalidate(address) {
                    let mut ctx = engine_ctx!(engine, now);
                    engine
                        .scripts
                        .on_sync_result(outcome.session, &outcome.result, &mut ctx);
                }
            }
            Ok(())
        })
    }

    pub fn set_route_active(&mut self, route_id: u16, active: bool) -> Result<(), ApiError> {
        self.guarded(|engine, _now| {
            let changes = engine.routes.set_route_active(route_id, active)?;
            for change in &changes {
                engine.host.route_report(change.route_id, change.state);
            }
            Ok(())
        })
    }

    /// Number of tx pool slots currently allocated (diagnostic).
    pub fn tx_in_use(&self) -> usize {
        self.trcv.pool.in_use()
    }

    /// Number of armed timers (diagnostic).
    pub fn timers_pending(&self) -> usize {
        self.timers.pending_count()
    }

    fn guarded(
        &mut self,
        op: impl FnOnce(&mut Self, u16) -> Result<(), ApiError>,
    ) -> Result<(), ApiError> {
        if !self.initialized {
            return Err(ApiError::NotInitialized);
        }
        let now = self.host.get_tick_count();
        let result = op(self, now);
        self.post_pass(now);
        result
    }

    // --- dispatch ---------------------------------------------------------

    fn dispatch_service(&mut self, id: ServiceId, events: u32, now: u16) {
        match id {
            ServiceId::SysDiag => {
                let mut ctx = engine_ctx!(self, now);
                self.sysdiag.service(&mut ctx);
            }
            ServiceId::BcDiag => {
                let mut ctx = engine_ctx!(self, now);
                self.bcdiag.service(&mut ctx);
            }
            ServiceId::Discovery => {
                let mut ctx = engine_ctx!(self, now);
                self.discovery.service(&mut ctx);
            }
            ServiceId::Prog => {
                let mut ctx = engine_ctx!(self, now);
                self.prog.service(&mut ctx);
            }
            ServiceId::Script(i) => {
                let mut ctx = engine_ctx!(self, now);
                self.scripts.service(i, events, &mut ctx);
            }
            ServiceId::Routing => {
                // route state is recomputed synchronously; the service
                // slot exists for the bus fan-out
            }
        }
    }

    fn dispatch_timer(&mut self, fired: FiredTimer, now: u16) {
        match fired.kind {
            TimerKind::SysDiag => {
                let mut ctx = engine_ctx!(self, now);
                self.sysdiag.on_timeout(&mut ctx);
            }
            TimerKind::BcDiag => {
                let mut ctx = engine_ctx!(self, now);
                self.bcdiag.on_timeout(&mut ctx);
            }
            TimerKind::CableLink => {
                let mut ctx = engine_ctx!(self, now);
                self.cablelink.on_timeout(&mut ctx);
            }
            TimerKind::Prog => {
                let mut ctx = engine_ctx!(self, now);
                self.prog.on_timeout(&mut ctx);
            }
            TimerKind::Discovery => {
                let mut ctx = engine_ctx!(self, now);
                self.discovery.on_timeout(&mut ctx);
            }
            TimerKind::ScriptPause => {
                let mut ctx = engine_ctx!(self, now);
                self.scripts.on_pause_timeout(fired.key, &mut ctx);
            }
            TimerKind::ScriptGuard => {
                let mut ctx = engine_ctx!(self, now);
                self.scripts.on_guard_timeout(fired.key, &mut ctx);
            }
            TimerKind::LockCountdown => {
                let expired = self.cmd.on_lock_timeout();
                for (token, result) in &expired {
                    self.dispatch_obs(*token, result, now);
                }
            }
        }
    }

    fn dispatch_obs(&mut self, token: ObsToken, result: &ExcResult, now: u16) {
        match token {
            ObsToken::SdStart
            | ObsToken::SdStop
            | ObsToken::SdHello
            | ObsToken::SdWelcome
            | ObsToken::SdEnablePort
            | ObsToken::SdDisablePort
            | ObsToken::SdCableLink => {
                let mut ctx = engine_ctx!(self, now);
                self.sysdiag.on_result(token, result, &mut ctx);
            }
            ObsToken::BcdStart | ObsToken::BcdEnd | ObsToken::BcdEnableTx | ObsToken::BcdResult => {
                let mut ctx = engine_ctx!(self, now);
                self.bcdiag.on_result(token, result, &mut ctx);
            }
            ObsToken::NdHello | ObsToken::NdWelcome | ObsToken::NdSignature => {
                self.dispatch_discovery(token, result, now)
            }
            ObsToken::PrgWelcome
            | ObsToken::PrgMemOpen
            | ObsToken::PrgMemWrite
            | ObsToken::PrgMemClose => {
                let mut ctx = engine_ctx!(self, now);
                self.prog.on_result(token, result, &mut ctx);
            }
            ObsToken::CableLink => {
                let mut ctx = engine_ctx!(self, now);
                self.cablelink.on_result(result, &mut ctx);
            }
            ObsToken::PhyTestArm | ObsToken::PhyTestResult => {
                let mut ctx = engine_ctx!(self, now);
                self.phytest.on_result(token, result, &mut ctx);
            }
            ObsToken::RsmInit(device) => {
                if let Some(outcome) = self.sync.on_init_error(device, result.result.clone()) {
                    let mut ctx = engine_ctx!(self, now);
                    self.scripts
                        .on_sync_result(outcome.session, &outcome.result, &mut ctx);
                }
            }
        }
    }

    fn dispatch_discovery(&mut self, token: ObsToken, result: &ExcResult, now: u16) {
        let mgr_mode = self.cfg.mgr.enabled;
        {
            let routes = &self.routes;
            let auto = |sig: &Signature| routes.node_by_mac(sig).map(|n| n.address());
            let mut ctx = Ctx {
                host: &mut self.host,
                timers: &mut self.timers,
                sched: &mut self.sched,
                trcv: &mut self.trcv,
                cmd: &mut self.cmd,
                sync: &mut self.sync,
                now,
            };
            self.discovery.on_result(
                token,
                result,
                &mut ctx,
                if mgr_mode { Some(&auto) } else { None },
            );
        }
        // manager mode: a successful welcome flows into scripts and
        // availability
        if mgr_mode && token == ObsToken::NdWelcome {
            if let ringnet_net::cmd::ExcData::Welcome(w) = &result.data {
                if result.result.is_success() && w.res == 0 {
                    self.mgr_node_welcomed(&w.signature, now);
                }
            }
        }
    }

    fn mgr_node_welcomed(&mut self, signature: &Signature, now: u16) {
        let Some(node) = self.routes.node_by_mac(signature) else {
            return;
        };
        let address = node.address();
        let scripts = node.scripts.clone();
        if !scripts.is_empty() {
            let mut ctx = engine_ctx!(self, now);
            if let Err(err) = self.scripts.run(&mut ctx, address, &scripts) {
                log::warn!("engine: script run for {:#x} failed ({err})", address);
            }
        }
        match self.routes.set_node_available(address, true) {
            Ok(changes) => {
                for change in &changes {
                    self.host.route_report(change.route_id, change.state);
                }
            }
            Err(err) => log::warn!("engine: availability update failed ({err})"),
        }
    }

    fn on_network_status(&mut self, msg: &ringnet_net::msg::ControlMsg, now: u16) {
        let Some(update) = self.monitor.on_rx(msg) else {
            return;
        };
        let report_mask = update.changed & self.cfg.network.status_mask;
        if !report_mask.is_empty() {
            self.host.network_status(report_mask, &update.status);
        }

        let went_off = update.changed.contains(StatusMask::AVAILABILITY)
            && update.status.availability == Availability::NotAvailable;
        let went_on = update.changed.contains(StatusMask::AVAILABILITY)
            && update.status.availability == Availability::Available;
        let available = update.status.availability == Availability::Available;

        // per-machine availability tracking
        for id in &update.observers {
            match id {
                ServiceId::BcDiag => {
                    let mut ctx = engine_ctx!(self, now);
                    self.bcdiag.on_network_status(available, &mut ctx);
                }
                ServiceId::Prog => {
                    let mut ctx = engine_ctx!(self, now);
                    self.prog.on_network_status(available, &mut ctx);
                }
                _ => {}
            }
        }

        if went_off {
            log::warn!("engine: network left the available state");
            self.broadcast(EventMask::NET_OFF, now);
        }
        if went_on && self.cfg.mgr.enabled && !self.discovery.is_running() {
            let mut ctx = engine_ctx!(self, now);
            if let Err(err) = self.discovery.start(&mut ctx) {
                log::warn!("engine: manager discovery start failed ({err})");
            }
        }
    }

    /// Fans a bus event out to every subscribed machine.
    fn broadcast(&mut self, mask: EventMask, now: u16) {
        let targets = self.bus.broadcast(mask);
        for id in &targets {
            match id {
                ServiceId::SysDiag => {
                    let mut ctx = engine_ctx!(self, now);
                    self.sysdiag.on_terminate(&mut ctx);
                }
                ServiceId::BcDiag => {
                    if mask.contains(EventMask::TERMINATION) {
                        let mut ctx = engine_ctx!(self, now);
                        self.bcdiag.on_terminate(&mut ctx);
                    }
                }
                ServiceId::Discovery => {
                    let mut ctx = engine_ctx!(self, now);
                    self.discovery.on_terminate(&mut ctx);
                }
                ServiceId::Prog => {
                    if mask.contains(EventMask::TERMINATION) {
                        let mut ctx = engine_ctx!(self, now);
                        self.prog.on_terminate(&mut ctx);
                    }
                }
                ServiceId::Script(_) => {
                    let mut ctx = engine_ctx!(self, now);
                    self.scripts.on_terminate(&mut ctx);
                }
                ServiceId::Routing => {
                    let changes = self.routes.all_nodes_unavailable();
                    for change in &changes {
                        self.host.route_report(change.route_id, change.state);
                    }
                }
            }
        }
        if mask.contains(EventMask::TERMINATION) {
            self.cablelink.on_terminate();
            self.phytest.on_terminate();
        }
    }

    // --- pass close-out ----------------------------------------------------

    /// Runs after every entry point: settles pending device syncs,
    /// maintains the lock countdown, re-arms the host timer and raises
    /// the service request.
    fn post_pass(&mut self, now: u16) {
        let settled = self.sync.take_settled();
        for outcome in &settled {
            let mut ctx = engine_ctx!(self, now);
            self.scripts
                .on_sync_result(outcome.session, &outcome.result, &mut ctx);
        }

        if self.cmd.lock.any() {
            if !self.timers.is_armed(TimerKind::LockCountdown, 0) {
                let _ = self
                    .timers
                    .arm(now, TimerKind::LockCountdown, 0, LOCK_TIMEOUT_MS, 0);
            }
        } else {
            self.timers.cancel(TimerKind::LockCountdown, 0);
        }

        match self.timers.next_delay(now) {
            Some(delay) => self.host.set_timer(delay.max(1)),
            None => self.host.set_timer(0),
        }
        if self.sched.take_service_request() {
            self.host.request_service();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringnet_route::model::Node;

    extern crate std;

    #[derive(Default)]
    struct NullHost {
        service_requests: usize,
    }

    impl Host for NullHost {
        fn get_tick_count(&mut self) -> u16 {
            0
        }
        fn set_timer(&mut self, _ms: u16) {}
        fn request_service(&mut self) {
            self.service_requests += 1;
        }
        fn error(&mut self, _code: EngineError) {}
        fn tx_enqueue(&mut self, _frame: &[u8]) {}
    }

    #[test]
    fn api_calls_raise_service_requests() {
        let mut engine = Engine::new(Config::default(), NullHost::default());
        engine.start_system_diagnosis().unwrap();
        assert!(engine.host.service_requests > 0);
        // second start is locked
        assert_eq!(
            engine.start_system_diagnosis(),
            Err(ApiError::ApiLocked)
        );
    }

    #[test]
    fn stop_releases_everything() {
        let mut engine = Engine::new(Config::default(), NullHost::default());
        engine.start_system_diagnosis().unwrap();
        engine.service();
        engine.stop();
        assert_eq!(engine.tx_in_use(), 0);
        assert_eq!(engine.timers_pending(), 0);
        assert_eq!(
            engine.start_system_diagnosis(),
            Err(ApiError::NotInitialized)
        );
    }

    #[test]
    fn uninitialized_node_rejected() {
        let mut cfg = Config::default();
        cfg.nodes
            .push(Node::new(Signature {
                node_address: 0x0101,
                ..Signature::default()
            }))
            .unwrap();
        let mut engine = Engine::new(cfg, NullHost::default());
        assert_eq!(
            engine.set_node_available(0x0999, true),
            Err(ApiError::Parameter)
        );
        engine.set_node_available(0x0101, true).unwrap();
    }
}
