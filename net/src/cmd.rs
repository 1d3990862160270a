//! Diagnostic command set.
//!
//! One constructor per outbound command and a data-driven rx dispatch:
//! incoming replies are matched against a constant table of
//! `(function id, op type)` records, parsed into their typed payload
//! and routed to the single-shot observer registered for that slot.
//! Undersized telegrams are dropped silently.
//!
//! The phy-test-result and memory commands share the reply channel and
//! guard themselves with an API lock bit each; the engine arms the
//! lock countdown while any bit is set and feeds synthetic timeout
//! results through [`CmdSet::on_lock_timeout`] when it expires.

use heapless::Vec;

use ringnet_abi::{
    ADDR_BROADCAST_BLOCKING, ADDR_LOCAL_NIC, ApiError, Host, MAX_UNIT_LEN, ObsToken, OpType,
    PhyTestResult, ResultCode, SIGNATURE_LEN_V1, Signature, StdResult,
};
use ringnet_base::lock::ApiLock;
use ringnet_base::obs::SingleSubject;

use crate::msg::{
    ControlMsg, FB_DIAG, FB_NIC, FID_BC_DIAG, FID_BC_ENABLE_TX, FID_CABLE_LINK_DIAG,
    FID_DEVICE_INIT, FID_ENABLE_PORT, FID_HELLO, FID_MEM_SESSION_CLOSE, FID_MEM_SESSION_OPEN,
    FID_MEMORY_READ, FID_MEMORY_WRITE, FID_NIC_BC_DIAG, FID_NIC_BC_DIAG_END, FID_NIC_SYS_DIAG,
    FID_NIC_SYS_DIAG_END, FID_PHY_TEST, FID_PHY_TEST_RESULT, FID_SIGNATURE, FID_WELCOME, MsgId,
};
use crate::trcv::Transceiver;

// --- API lock bits ----------------------------------------------------------

pub const LOCK_PHY_TEST_RESULT: u32 = 1 << 0;
pub const LOCK_MEM_SESSION_OPEN: u32 = 1 << 1;
pub const LOCK_MEM_SESSION_CLOSE: u32 = 1 << 2;
pub const LOCK_MEM_READ: u32 = 1 << 3;
pub const LOCK_MEM_WRITE: u32 = 1 << 4;

/// Highest signature version this engine accepts in hello/signature
/// queries.
pub const SIGNATURE_VERSION_LIMIT: u8 = 1;

// --- Typed reply payloads ---------------------------------------------------

/// Payload of a hello or signature status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HelloStatus {
    pub version: u8,
    pub signature: Signature,
}

/// Payload of a welcome result; `res == 0` is success.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WelcomeResult {
    pub res: u8,
    pub version: u8,
    pub signature: Signature,
}

/// Answer class of the device under test in a back-channel probe.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DutResult {
    /// Slave answered: this segment works.
    Slave = 0x01,
    /// The timing master answered: the ring is closed.
    Master = 0x02,
    /// Nobody answered: break located.
    NoAnswer = 0x03,
    /// No communication on the back channel.
    Timeout = 0x04,
}

impl DutResult {
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::Slave),
            0x02 => Some(Self::Master),
            0x03 => Some(Self::NoAnswer),
            0x04 => Some(Self::Timeout),
            _ => None,
        }
    }
}

/// Payload of a back-channel probe result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BcProbeResult {
    pub diag_result: DutResult,
    /// Lower 12 bits identify the probed segment.
    pub admin_addr: u16,
}

/// Payload of a cable-link diagnosis result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CableLinkStatus {
    pub port_number: u8,
    pub result: u8,
}

/// Payload of a memory read result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemReadResult {
    pub session_handle: u16,
    pub mem_id: u8,
    pub address: u32,
    pub unit_data: Vec<u8, MAX_UNIT_LEN>,
}

/// Typed payload attached to a dispatched reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExcData {
    None,
    Hello(HelloStatus),
    Welcome(WelcomeResult),
    Signature(HelloStatus),
    CableLink(CableLinkStatus),
    PhyTest(PhyTestResult),
    BcProbe(BcProbeResult),
    MemOpen { session_handle: u16 },
    MemClose { session_result: u8 },
    MemRead(MemReadResult),
    MemWrite { session_handle: u16, mem_id: u8 },
}

/// A dispatched reply: the exchange result plus its typed payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExcResult {
    pub result: StdResult,
    pub data: ExcData,
}

impl ExcResult {
    pub fn success(data: ExcData) -> Self {
        Self {
            result: StdResult::success(),
            data,
        }
    }

    pub fn from_error(raw: &[u8]) -> Self {
        Self {
            result: StdResult::translate_error(raw),
            data: ExcData::None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            result: StdResult::from_code(ResultCode::Timeout),
            data: ExcData::None,
        }
    }
}

// --- Rx dispatch table ------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Hello,
    Welcome,
    Signature,
    DeviceInit,
    EnablePort,
    CableLink,
    PhyTest,
    PhyTestResult,
    BcProbe,
    BcEnableTx,
    MemOpen,
    MemClose,
    MemRead,
    MemWrite,
    NicSysDiag,
    NicSysDiagEnd,
    NicBcDiag,
    NicBcDiagEnd,
}

struct RxRecord {
    fblock: u8,
    function: u16,
    op: OpType,
    /// Telegrams shorter than this are dropped.
    min_len: usize,
    slot: Slot,
    /// Whether a successful dispatch detaches the observer.
    consume: bool,
}

const RX_TABLE: &[RxRecord] = &[
    // hello replies arrive per node on a broadcast question, so the
    // observer stays attached
    RxRecord { fblock: FB_DIAG, function: FID_HELLO, op: OpType::Status, min_len: 1 + SIGNATURE_LEN_V1, slot: Slot::Hello, consume: false },
    RxRecord { fblock: FB_DIAG, function: FID_HELLO, op: OpType::Error, min_len: 1, slot: Slot::Hello, consume: false },
    RxRecord { fblock: FB_DIAG, function: FID_WELCOME, op: OpType::Result, min_len: 2 + SIGNATURE_LEN_V1, slot: Slot::Welcome, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_WELCOME, op: OpType::Error, min_len: 1, slot: Slot::Welcome, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_SIGNATURE, op: OpType::Status, min_len: 1 + SIGNATURE_LEN_V1, slot: Slot::Signature, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_SIGNATURE, op: OpType::Error, min_len: 1, slot: Slot::Signature, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_DEVICE_INIT, op: OpType::Error, min_len: 1, slot: Slot::DeviceInit, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_ENABLE_PORT, op: OpType::Result, min_len: 0, slot: Slot::EnablePort, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_ENABLE_PORT, op: OpType::Error, min_len: 1, slot: Slot::EnablePort, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_CABLE_LINK_DIAG, op: OpType::Result, min_len: 2, slot: Slot::CableLink, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_CABLE_LINK_DIAG, op: OpType::Error, min_len: 1, slot: Slot::CableLink, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_PHY_TEST, op: OpType::Error, min_len: 1, slot: Slot::PhyTest, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_PHY_TEST_RESULT, op: OpType::Status, min_len: 4, slot: Slot::PhyTestResult, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_PHY_TEST_RESULT, op: OpType::Error, min_len: 1, slot: Slot::PhyTestResult, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_BC_DIAG, op: OpType::Result, min_len: 2, slot: Slot::BcProbe, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_BC_DIAG, op: OpType::Error, min_len: 1, slot: Slot::BcProbe, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_BC_ENABLE_TX, op: OpType::Result, min_len: 0, slot: Slot::BcEnableTx, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_BC_ENABLE_TX, op: OpType::Error, min_len: 1, slot: Slot::BcEnableTx, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_MEM_SESSION_OPEN, op: OpType::Result, min_len: 2, slot: Slot::MemOpen, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_MEM_SESSION_OPEN, op: OpType::Error, min_len: 1, slot: Slot::MemOpen, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_MEM_SESSION_CLOSE, op: OpType::Result, min_len: 1, slot: Slot::MemClose, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_MEM_SESSION_CLOSE, op: OpType::Error, min_len: 1, slot: Slot::MemClose, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_MEMORY_READ, op: OpType::Result, min_len: 8, slot: Slot::MemRead, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_MEMORY_READ, op: OpType::Error, min_len: 1, slot: Slot::MemRead, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_MEMORY_WRITE, op: OpType::Result, min_len: 3, slot: Slot::MemWrite, consume: true },
    RxRecord { fblock: FB_DIAG, function: FID_MEMORY_WRITE, op: OpType::Error, min_len: 1, slot: Slot::MemWrite, consume: true },
    RxRecord { fblock: FB_NIC, function: FID_NIC_SYS_DIAG, op: OpType::Result, min_len: 0, slot: Slot::NicSysDiag, consume: true },
    RxRecord { fblock: FB_NIC, function: FID_NIC_SYS_DIAG, op: OpType::Error, min_len: 1, slot: Slot::NicSysDiag, consume: true },
    RxRecord { fblock: FB_NIC, function: FID_NIC_SYS_DIAG_END, op: OpType::Result, min_len: 0, slot: Slot::NicSysDiagEnd, consume: true },
    RxRecord { fblock: FB_NIC, function: FID_NIC_SYS_DIAG_END, op: OpType::Error, min_len: 1, slot: Slot::NicSysDiagEnd, consume: true },
    RxRecord { fblock: FB_NIC, function: FID_NIC_BC_DIAG, op: OpType::Result, min_len: 0, slot: Slot::NicBcDiag, consume: true },
    RxRecord { fblock: FB_NIC, function: FID_NIC_BC_DIAG, op: OpType::Error, min_len: 1, slot: Slot::NicBcDiag, consume: true },
    RxRecord { fblock: FB_NIC, function: FID_NIC_BC_DIAG_END, op: OpType::Result, min_len: 0, slot: Slot::NicBcDiagEnd, consume: true },
    RxRecord { fblock: FB_NIC, function: FID_NIC_BC_DIAG_END, op: OpType::Error, min_len: 1, slot: Slot::NicBcDiagEnd, consume: true },
];

// --- The command set --------------------------------------------------------

/// Observer slots and API lock of the diagnostic command set.
#[derive(Default)]
pub struct CmdSet {
    hello: SingleSubject<ObsToken>,
    welcome: SingleSubject<ObsToken>,
    signature: SingleSubject<ObsToken>,
    device_init: SingleSubject<ObsToken>,
    enable_port: SingleSubject<ObsToken>,
    cable_link: SingleSubject<ObsToken>,
    phy_test: SingleSubject<ObsToken>,
    phy_test_result: SingleSubject<ObsToken>,
    bc_probe: SingleSubject<ObsToken>,
    bc_enable_tx: SingleSubject<ObsToken>,
    mem_open: SingleSubject<ObsToken>,
    mem_close: SingleSubject<ObsToken>,
    mem_read: SingleSubject<ObsToken>,
    mem_write: SingleSubject<ObsToken>,
    nic_sys_diag: SingleSubject<ObsToken>,
    nic_sys_diag_end: SingleSubject<ObsToken>,
    nic_bc_diag: SingleSubject<ObsToken>,
    nic_bc_diag_end: SingleSubject<ObsToken>,
    pub lock: ApiLock,
}

impl CmdSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn subject(&mut self, slot: Slot) -> &mut SingleSubject<ObsToken> {
        match slot {
            Slot::Hello => &mut self.hello,
            Slot::Welcome => &mut self.welcome,
            Slot::Signature => &mut self.signature,
            Slot::DeviceInit => &mut self.device_init,
            Slot::EnablePort => &mut self.enable_port,
            Slot::CableLink => &mut self.cable_link,
            Slot::PhyTest => &mut self.phy_test,
            Slot::PhyTestResult => &mut self.phy_test_result,
            Slot::BcProbe => &mut self.bc_probe,
            Slot::BcEnableTx => &mut self.bc_enable_tx,
            Slot::MemOpen => &mut self.mem_open,
            Slot::MemClose => &mut self.mem_close,
            Slot::MemRead => &mut self.mem_read,
            Slot::MemWrite => &mut self.mem_write,
            Slot::NicSysDiag => &mut self.nic_sys_diag,
            Slot::NicSysDiagEnd => &mut self.nic_sys_diag_end,
            Slot::NicBcDiag => &mut self.nic_bc_diag,
            Slot::NicBcDiagEnd => &mut self.nic_bc_diag_end,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_and_send<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        destination: u16,
        fblock: u8,
        function: u16,
        op: OpType,
        payload: &[u8],
        slot: Slot,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        let token = trcv.alloc_tx(payload.len())?;
        {
            let msg = trcv.msg_mut(&token);
            msg.destination = destination;
            msg.id = MsgId {
                fblock_id: fblock,
                instance_id: 0,
                function_id: function,
                op_type: op,
            };
            // length was validated by alloc_tx
            let _ = msg.set_payload(payload);
        }
        trcv.send(host, token);
        let _ = self.subject(slot).add(obs);
        Ok(())
    }

    // --- commands to remote nodes ----------------------------------------

    /// Broadcasts (or unicasts) `Hello.Get` with a version limit.
    pub fn hello_get<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        target: u16,
        version_limit: u8,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        let limit = version_limit.min(SIGNATURE_VERSION_LIMIT);
        self.build_and_send(
            trcv,
            host,
            target,
            FB_DIAG,
            FID_HELLO,
            OpType::Get,
            &[limit],
            Slot::Hello,
            obs,
        )
    }

    /// Unicasts `Welcome.StartResult`, assigning `admin_node_address`
    /// and echoing the node's signature.
    #[allow(clippy::too_many_arguments)]
    pub fn welcome_sr<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        target: u16,
        admin_node_address: u16,
        version: u8,
        signature: &Signature,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        let mut payload = [0u8; 3 + SIGNATURE_LEN_V1];
        payload[0..2].copy_from_slice(&admin_node_address.to_be_bytes());
        payload[2] = version;
        // buffer is sized for a v1 record
        let _ = signature.encode(&mut payload[3..]);
        self.build_and_send(
            trcv,
            host,
            target,
            FB_DIAG,
            FID_WELCOME,
            OpType::StartResult,
            &payload,
            Slot::Welcome,
            obs,
        )
    }

    /// Unicasts `Signature.Get`.
    pub fn signature_get<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        target: u16,
        version_limit: u8,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        let limit = version_limit.min(SIGNATURE_VERSION_LIMIT);
        self.build_and_send(
            trcv,
            host,
            target,
            FB_DIAG,
            FID_SIGNATURE,
            OpType::Get,
            &[limit],
            Slot::Signature,
            obs,
        )
    }

    /// Unicasts `DeviceInit.Start`; the target restarts with its
    /// operational configuration. Only errors are answered.
    pub fn device_init_start<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        target: u16,
        obs: Option<ObsToken>,
    ) -> Result<(), ApiError> {
        let token = trcv.alloc_tx(0)?;
        {
            let msg = trcv.msg_mut(&token);
            msg.destination = target;
            msg.id = MsgId {
                fblock_id: FB_DIAG,
                instance_id: 0,
                function_id: FID_DEVICE_INIT,
                op_type: OpType::Start,
            };
        }
        trcv.send(host, token);
        if let Some(obs) = obs {
            let _ = self.device_init.add(obs);
        }
        Ok(())
    }

    /// Unicasts `EnablePort.StartResult`.
    pub fn enable_port_sr<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        target: u16,
        port_number: u8,
        enabled: bool,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        self.build_and_send(
            trcv,
            host,
            target,
            FB_DIAG,
            FID_ENABLE_PORT,
            OpType::StartResult,
            &[port_number, enabled as u8],
            Slot::EnablePort,
            obs,
        )
    }

    /// Unicasts `CableLinkDiagnosis.StartResult` for one port.
    pub fn cable_link_start<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        target: u16,
        port_number: u8,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        self.build_and_send(
            trcv,
            host,
            target,
            FB_DIAG,
            FID_CABLE_LINK_DIAG,
            OpType::StartResult,
            &[port_number],
            Slot::CableLink,
            obs,
        )
    }

    /// Arms the physical-layer test on the local controller.
    #[allow(clippy::too_many_arguments)]
    pub fn phy_test_start<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        port_number: u8,
        test_type: u8,
        lead_in: u16,
        duration: u32,
        lead_out: u16,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        let mut payload = [0u8; 10];
        payload[0] = port_number;
        payload[1] = test_type;
        payload[2..4].copy_from_slice(&lead_in.to_be_bytes());
        payload[4..8].copy_from_slice(&duration.to_be_bytes());
        payload[8..10].copy_from_slice(&lead_out.to_be_bytes());
        self.build_and_send(
            trcv,
            host,
            ADDR_LOCAL_NIC,
            FB_DIAG,
            FID_PHY_TEST,
            OpType::Start,
            &payload,
            Slot::PhyTest,
            obs,
        )
    }

    /// Polls the physical-layer test result. Guarded by an API lock
    /// bit; a second poll before the reply returns `ApiLocked`.
    pub fn phy_test_result_get<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        if !self.lock.try_acquire(LOCK_PHY_TEST_RESULT) {
            return Err(ApiError::ApiLocked);
        }
        let res = self.build_and_send(
            trcv,
            host,
            ADDR_LOCAL_NIC,
            FB_DIAG,
            FID_PHY_TEST_RESULT,
            OpType::Get,
            &[],
            Slot::PhyTestResult,
            obs,
        );
        if res.is_err() {
            self.lock.release(LOCK_PHY_TEST_RESULT);
        }
        res
    }

    /// Broadcasts one back-channel probe with the full timing block.
    #[allow(clippy::too_many_arguments)]
    pub fn bc_probe_start<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        position: u8,
        admin_addr: u16,
        t_send: u16,
        t_wait: u16,
        t_switch: u16,
        t_back: u16,
        autoback: bool,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        let mut payload = [0u8; 12];
        payload[0] = position;
        payload[1..3].copy_from_slice(&admin_addr.to_be_bytes());
        payload[3..5].copy_from_slice(&t_send.to_be_bytes());
        payload[5..7].copy_from_slice(&t_wait.to_be_bytes());
        payload[7..9].copy_from_slice(&t_switch.to_be_bytes());
        payload[9..11].copy_from_slice(&t_back.to_be_bytes());
        payload[11] = autoback as u8;
        self.build_and_send(
            trcv,
            host,
            ADDR_BROADCAST_BLOCKING,
            FB_DIAG,
            FID_BC_DIAG,
            OpType::StartResult,
            &payload,
            Slot::BcProbe,
            obs,
        )
    }

    /// Broadcasts the back-channel transmit enable for one port.
    pub fn bc_enable_tx_sr<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        port: u8,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        self.build_and_send(
            trcv,
            host,
            ADDR_BROADCAST_BLOCKING,
            FB_DIAG,
            FID_BC_ENABLE_TX,
            OpType::StartResult,
            &[port],
            Slot::BcEnableTx,
            obs,
        )
    }

    /// Opens a memory session of `session_type` on the target.
    pub fn mem_session_open_sr<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        target: u16,
        session_type: u8,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        if !self.lock.try_acquire(LOCK_MEM_SESSION_OPEN) {
            return Err(ApiError::ApiLocked);
        }
        let res = self.build_and_send(
            trcv,
            host,
            target,
            FB_DIAG,
            FID_MEM_SESSION_OPEN,
            OpType::StartResult,
            &[session_type],
            Slot::MemOpen,
            obs,
        );
        if res.is_err() {
            self.lock.release(LOCK_MEM_SESSION_OPEN);
        }
        res
    }

    /// Closes the memory session identified by `session_handle`.
    pub fn mem_session_close_sr<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        target: u16,
        session_handle: u16,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        if !self.lock.try_acquire(LOCK_MEM_SESSION_CLOSE) {
            return Err(ApiError::ApiLocked);
        }
        let res = self.build_and_send(
            trcv,
            host,
            target,
            FB_DIAG,
            FID_MEM_SESSION_CLOSE,
            OpType::StartResult,
            &session_handle.to_be_bytes(),
            Slot::MemClose,
            obs,
        );
        if res.is_err() {
            self.lock.release(LOCK_MEM_SESSION_CLOSE);
        }
        res
    }

    /// Reads `unit_len` memory units within the open session.
    #[allow(clippy::too_many_arguments)]
    pub fn memory_read_sr<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        target: u16,
        session_handle: u16,
        mem_id: u8,
        address: u32,
        unit_len: u8,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        if unit_len as usize > MAX_UNIT_LEN {
            return Err(ApiError::Parameter);
        }
        if !self.lock.try_acquire(LOCK_MEM_READ) {
            return Err(ApiError::ApiLocked);
        }
        let mut payload = [0u8; 8];
        payload[0..2].copy_from_slice(&session_handle.to_be_bytes());
        payload[2] = mem_id;
        payload[3..7].copy_from_slice(&address.to_be_bytes());
        payload[7] = unit_len;
        let res = self.build_and_send(
            trcv,
            host,
            target,
            FB_DIAG,
            FID_MEMORY_READ,
            OpType::StartResult,
            &payload,
            Slot::MemRead,
            obs,
        );
        if res.is_err() {
            self.lock.release(LOCK_MEM_READ);
        }
        res
    }

    /// Writes `unit_data` within the open session.
    #[allow(clippy::too_many_arguments)]
    pub fn memory_write_sr<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        target: u16,
        session_handle: u16,
        mem_id: u8,
        address: u32,
        unit_data: &[u8],
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        if unit_data.len() > MAX_UNIT_LEN {
            return Err(ApiError::Parameter);
        }
        if !self.lock.try_acquire(LOCK_MEM_WRITE) {
            return Err(ApiError::ApiLocked);
        }
        let mut payload = [0u8; 8 + MAX_UNIT_LEN];
        payload[0..2].copy_from_slice(&session_handle.to_be_bytes());
        payload[2] = mem_id;
        payload[3..7].copy_from_slice(&address.to_be_bytes());
        payload[7] = unit_data.len() as u8;
        payload[8..8 + unit_data.len()].copy_from_slice(unit_data);
        let res = self.build_and_send(
            trcv,
            host,
            target,
            FB_DIAG,
            FID_MEMORY_WRITE,
            OpType::StartResult,
            &payload[..8 + unit_data.len()],
            Slot::MemWrite,
            obs,
        );
        if res.is_err() {
            self.lock.release(LOCK_MEM_WRITE);
        }
        res
    }

    // --- commands to the local controller ---------------------------------

    /// Puts the local controller into system diagnosis mode.
    pub fn nic_sys_diag_start<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        self.build_and_send(
            trcv,
            host,
            ADDR_LOCAL_NIC,
            FB_NIC,
            FID_NIC_SYS_DIAG,
            OpType::StartResult,
            &[],
            Slot::NicSysDiag,
            obs,
        )
    }

    /// Leaves system diagnosis mode.
    pub fn nic_sys_diag_end<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        self.build_and_send(
            trcv,
            host,
            ADDR_LOCAL_NIC,
            FB_NIC,
            FID_NIC_SYS_DIAG_END,
            OpType::StartResult,
            &[],
            Slot::NicSysDiagEnd,
            obs,
        )
    }

    /// Puts the local controller into back-channel diagnosis mode.
    pub fn nic_bc_diag_start<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        self.build_and_send(
            trcv,
            host,
            ADDR_LOCAL_NIC,
            FB_NIC,
            FID_NIC_BC_DIAG,
            OpType::StartResult,
            &[],
            Slot::NicBcDiag,
            obs,
        )
    }

    /// Leaves back-channel diagnosis mode.
    pub fn nic_bc_diag_end<H: Host>(
        &mut self,
        trcv: &mut Transceiver,
        host: &mut H,
        obs: ObsToken,
    ) -> Result<(), ApiError> {
        self.build_and_send(
            trcv,
            host,
            ADDR_LOCAL_NIC,
            FB_NIC,
            FID_NIC_BC_DIAG_END,
            OpType::StartResult,
            &[],
            Slot::NicBcDiagEnd,
            obs,
        )
    }

    // --- rx dispatch ------------------------------------------------------

    /// Routes one received telegram to its observer.
    ///
    /// Returns the observer token and the parsed result, or `None` when
    /// no record matches, the telegram is undersized, the payload does
    /// not parse, or no observer is attached.
    pub fn on_rx(&mut self, msg: &ControlMsg) -> Option<(ObsToken, ExcResult)> {
        let record = RX_TABLE.iter().find(|r| {
            r.fblock == msg.id.fblock_id && r.function == msg.id.function_id && r.op == msg.id.op_type
        })?;
        if msg.payload.len() < record.min_len {
            log::debug!(
                "cmd: dropping undersized telegram fn={:#x} op={:?} len={}",
                msg.id.function_id,
                msg.id.op_type,
                msg.payload.len()
            );
            return None;
        }
        let result = if msg.id.op_type == OpType::Error {
            ExcResult::from_error(&msg.payload)
        } else {
            ExcResult::success(Self::parse_payload(record.slot, &msg.payload)?)
        };
        self.release_lock_for(record.slot);
        let token = self.subject(record.slot).notify(record.consume)?;
        Some((token, result))
    }

    fn parse_payload(slot: Slot, p: &[u8]) -> Option<ExcData> {
        let data = match slot {
            Slot::Hello => ExcData::Hello(HelloStatus {
                version: p[0],
                signature: Signature::decode(&p[1..])?,
            }),
            Slot::Signature => ExcData::Signature(HelloStatus {
                version: p[0],
                signature: Signature::decode(&p[1..])?,
            }),
            Slot::Welcome => ExcData::Welcome(WelcomeResult {
                res: p[0],
                version: p[1],
                signature: Signature::decode(&p[2..])?,
            }),
            Slot::CableLink => ExcData::CableLink(CableLinkStatus {
                port_number: p[0],
                result: p[1],
            }),
            Slot::PhyTestResult => ExcData::PhyTest(PhyTestResult {
                port: p[0],
                lock_status: p[1] != 0,
                err_count: u16::from_be_bytes([p[2], p[3]]),
            }),
            Slot::BcProbe => {
                let word = u16::from_be_bytes([p[0], p[1]]);
                ExcData::BcProbe(BcProbeResult {
                    diag_result: DutResult::from_raw(p[0] >> 4)?,
                    admin_addr: word & 0x0FFF,
                })
            }
            Slot::MemOpen => ExcData::MemOpen {
                session_handle: u16::from_be_bytes([p[0], p[1]]),
            },
            Slot::MemClose => ExcData::MemClose {
                session_result: p[0],
            },
            Slot::MemRead => {
                let unit_len = (p[7] as usize).min(MAX_UNIT_LEN);
                if p.len() < 8 + unit_len {
                    return None;
                }
                let mut unit_data = Vec::new();
                // bounded by MAX_UNIT_LEN
                let _ = unit_data.extend_from_slice(&p[8..8 + unit_len]);
                ExcData::MemRead(MemReadResult {
                    session_handle: u16::from_be_bytes([p[0], p[1]]),
                    mem_id: p[2],
                    address: u32::from_be_bytes([p[3], p[4], p[5], p[6]]),
                    unit_data,
                })
            }
            Slot::MemWrite => ExcData::MemWrite {
                session_handle: u16::from_be_bytes([p[0], p[1]]),
                mem_id: p[2],
            },
            Slot::DeviceInit
            | Slot::EnablePort
            | Slot::PhyTest
            | Slot::BcEnableTx
            | Slot::NicSysDiag
            | Slot::NicSysDiagEnd
            | Slot::NicBcDiag
            | Slot::NicBcDiagEnd => ExcData::None,
        };
        Some(data)
    }

    /// Releases the lock bit owned by `slot`, if any. Runs on every
    /// reply for the slot, success or error.
    fn release_lock_for(&mut self, slot: Slot) {
        let bit = match slot {
            Slot::PhyTestResult => LOCK_PHY_TEST_RESULT,
            Slot::MemOpen => LOCK_MEM_SESSION_OPEN,
            Slot::MemClose => LOCK_MEM_SESSION_CLOSE,
            Slot::MemRead => LOCK_MEM_READ,
            Slot::MemWrite => LOCK_MEM_WRITE,
            _ => return,
        };
        self.lock.release(bit);
    }

    /// Expires the lock countdown: clears every held bit and returns a
    /// synthetic timeout result for each waiting observer.
    pub fn on_lock_timeout(&mut self) -> Vec<(ObsToken, ExcResult), 5> {
        let expired = self.lock.take_all();
        let mut out = Vec::new();
        let pairs = [
            (LOCK_PHY_TEST_RESULT, Slot::PhyTestResult),
            (LOCK_MEM_SESSION_OPEN, Slot::MemOpen),
            (LOCK_MEM_SESSION_CLOSE, Slot::MemClose),
            (LOCK_MEM_READ, Slot::MemRead),
            (LOCK_MEM_WRITE, Slot::MemWrite),
        ];
        for (bit, slot) in pairs {
            if expired & bit != 0 {
                log::warn!("cmd: api lock timeout on bit {:#x}", bit);
                if let Some(token) = self.subject(slot).notify(true) {
                    // capacity matches the pair table
                    let _ = out.push((token, ExcResult::timeout()));
                }
            }
        }
        out
    }

    /// Drops every observer binding and lock bit (termination path).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
