//! Node discovery.
//!
//! Periodically broadcasts a hello and collects the answering
//! signatures. Each signature seen for the first time is handed to the
//! application, which either names the operational address the node
//! should be welcomed at or ignores it. Welcomes run one at a time; a
//! burst of fresh signatures queues up behind the one in flight.

use heapless::{Deque, Vec};

use ringnet_abi::{
    ApiError, Host, NODE_POS_BASE, NdAction, NdReport, ObsToken, SIGNATURE_VERSION, ServiceId,
    Signature, TimerKind,
};
use ringnet_net::cmd::ExcData;
use ringnet_net::ctx::Ctx;
use ringnet_net::ExcResult;

/// Hello broadcast period.
const HELLO_PERIOD: u16 = 2000;

/// Signatures remembered per run.
pub const MAX_DISCOVERED: usize = 16;

/// Welcomes waiting behind the one in flight.
const MAX_PENDING: usize = 8;

/// Scheduler priority of the discovery service.
pub const SRV_PRIO: u8 = 248;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Idle,
    /// Broadcasting hellos, no welcome in flight.
    Scanning,
    /// One welcome outstanding.
    WaitWelcome,
}

pub struct Discovery {
    state: State,
    seen: Vec<Signature, MAX_DISCOVERED>,
    pending: Deque<(Signature, u16), MAX_PENDING>,
    /// The welcome currently in flight.
    current: Option<(Signature, u16)>,
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}

impl Discovery {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            seen: Vec::new(),
            pending: Deque::new(),
            current: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state != State::Idle
    }

    // --- API --------------------------------------------------------------

    /// Starts scanning. The first hello goes out immediately, then one
    /// per period.
    pub fn start<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) -> Result<(), ApiError> {
        if self.state != State::Idle {
            return Err(ApiError::ApiLocked);
        }
        self.seen.clear();
        self.pending.clear();
        self.current = None;
        self.state = State::Scanning;
        self.send_hello(ctx);
        ctx.timers.cancel(TimerKind::Discovery, 0);
        let _ = ctx
            .timers
            .arm(ctx.now, TimerKind::Discovery, 0, HELLO_PERIOD, HELLO_PERIOD);
        log::info!("discovery: start");
        Ok(())
    }

    /// Queries the full signature record of one node.
    pub fn query_signature<H: Host>(
        &mut self,
        ctx: &mut Ctx<'_, H>,
        target: u16,
    ) -> Result<(), ApiError> {
        ctx.cmd.signature_get(
            ctx.trcv,
            ctx.host,
            target,
            SIGNATURE_VERSION,
            ObsToken::NdSignature,
        )
    }

    /// Stops scanning and reports the stop.
    pub fn stop<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) -> Result<(), ApiError> {
        if self.state == State::Idle {
            return Err(ApiError::NotAvailable);
        }
        ctx.cancel_timer(TimerKind::Discovery, 0);
        self.state = State::Idle;
        self.pending.clear();
        self.current = None;
        ctx.host.discovery_report(&NdReport::Stopped);
        log::info!("discovery: stop");
        Ok(())
    }

    // --- engine dispatch --------------------------------------------------

    /// Periodic hello tick.
    pub fn on_timeout<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        if self.state == State::Scanning {
            self.send_hello(ctx);
        }
    }

    /// Drains queued welcomes once the channel is free.
    pub fn service<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        if self.state == State::Scanning {
            self.next_welcome(ctx);
        }
    }

    /// Routes a hello or welcome reply. In manager mode the engine
    /// supplies `auto`, a lookup that maps a signature onto the
    /// configured operational address; without it the application is
    /// asked through [`Host::discovery_evaluate`].
    pub fn on_result<H: Host>(
        &mut self,
        token: ObsToken,
        res: &ExcResult,
        ctx: &mut Ctx<'_, H>,
        auto: Option<&dyn Fn(&Signature) -> Option<u16>>,
    ) {
        match token {
            ObsToken::NdHello => self.on_hello(res, ctx, auto),
            ObsToken::NdWelcome => self.on_welcome(res, ctx),
            ObsToken::NdSignature => {
                if let (true, ExcData::Signature(status)) = (res.result.is_success(), &res.data) {
                    ctx.host.discovery_report(&NdReport::Signature {
                        signature: status.signature,
                    });
                } else {
                    ctx.host.discovery_report(&NdReport::Error);
                }
            }
            _ => {}
        }
    }

    pub fn on_terminate<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        if self.state != State::Idle {
            ctx.cancel_timer(TimerKind::Discovery, 0);
            self.state = State::Idle;
            self.pending.clear();
            self.current = None;
            ctx.host.discovery_report(&NdReport::Stopped);
        }
    }

    // --- internals --------------------------------------------------------

    fn send_hello<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let sent = ctx.cmd.hello_get(
            ctx.trcv,
            ctx.host,
            ringnet_abi::ADDR_BROADCAST,
            SIGNATURE_VERSION,
            ObsToken::NdHello,
        );
        if sent.is_err() {
            log::warn!("discovery: hello deferred, tx pool exhausted");
        }
    }

    fn on_hello<H: Host>(
        &mut self,
        res: &ExcResult,
        ctx: &mut Ctx<'_, H>,
        auto: Option<&dyn Fn(&Signature) -> Option<u16>>,
    ) {
        let ExcData::Hello(hello) = &res.data else {
            return;
        };
        if !res.result.is_success() || self.state == State::Idle {
            return;
        }
        if self.is_known(&hello.signature) {
            return;
        }
        // remember it even when ignored, so the application is asked
        // exactly once per node
        if self.seen.push(hello.signature).is_err() {
            log::warn!("discovery: signature table full, node ignored");
            return;
        }
        let action = match auto {
            Some(lookup) => match lookup(&hello.signature) {
                Some(node_address) => NdAction::Welcome { node_address },
                None => NdAction::Ignore,
            },
            None => ctx.host.discovery_evaluate(&hello.signature),
        };
        match action {
            NdAction::Welcome { node_address } => {
                if self.pending.push_back((hello.signature, node_address)).is_err() {
                    log::warn!("discovery: welcome queue full, node dropped");
                    return;
                }
                ctx.trigger(ServiceId::Discovery);
            }
            NdAction::Ignore => {}
        }
    }

    fn next_welcome<H: Host>(&mut self, ctx: &mut Ctx<'_, H>) {
        let Some((signature, node_address)) = self.pending.pop_front() else {
            return;
        };
        // the fresh node still answers at its position address
        let target = NODE_POS_BASE + (signature.node_pos_addr & 0x00FF);
        let sent = ctx.cmd.welcome_sr(
            ctx.trcv,
            ctx.host,
            target,
            node_address,
            SIGNATURE_VERSION,
            &signature,
            ObsToken::NdWelcome,
        );
        if sent.is_ok() {
            self.current = Some((signature, node_address));
            self.state = State::WaitWelcome;
        } else {
            log::warn!("discovery: welcome send failed, node requeued");
            let _ = self.pending.push_front((signature, node_address));
        }
    }

    fn on_welcome<H: Host>(&mut self, res: &ExcResult, ctx: &mut Ctx<'_, H>) {
        let current = self.current.take();
        if self.state == State::WaitWelcome {
            self.state = State::Scanning;
        }
        let Some((signature, _)) = current else {
            return;
        };
        let report = match (&res.data, res.result.is_success()) {
            (ExcData::Welcome(w), true) if w.res == 0 => NdReport::WelcomeSuccess {
                signature: w.signature,
            },
            (ExcData::Welcome(w), true) => NdReport::WelcomeNoSuccess {
                signature: w.signature,
            },
            _ => NdReport::WelcomeNoSuccess { signature },
        };
        ctx.host.discovery_report(&report);
        // service the queue for the next candidate
        ctx.trigger(ServiceId::Discovery);
    }

    fn is_known(&self, sig: &Signature) -> bool {
        self.seen.iter().any(|s| {
            s.mac_47_32 == sig.mac_47_32 && s.mac_31_16 == sig.mac_31_16 && s.mac_15_0 == sig.mac_15_0
        })
    }
}
