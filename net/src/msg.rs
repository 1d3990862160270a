//! Control telegram.

use heapless::Vec;

use ringnet_abi::{MAX_PAYLOAD, OpType};

/// Function block of the diagnosis command set on remote nodes.
pub const FB_DIAG: u8 = 0x2E;

/// Function block of the local network interface controller.
pub const FB_NIC: u8 = 0x00;

// --- FB_DIAG function ids ---------------------------------------------------

pub const FID_HELLO: u16 = 0x200;
pub const FID_WELCOME: u16 = 0x201;
pub const FID_SIGNATURE: u16 = 0x202;
pub const FID_DEVICE_INIT: u16 = 0x203;
pub const FID_ENABLE_PORT: u16 = 0x210;
pub const FID_CABLE_LINK_DIAG: u16 = 0x211;
pub const FID_PHY_TEST: u16 = 0x220;
pub const FID_PHY_TEST_RESULT: u16 = 0x221;
pub const FID_BC_DIAG: u16 = 0x222;
pub const FID_BC_ENABLE_TX: u16 = 0x223;
pub const FID_MEM_SESSION_OPEN: u16 = 0x300;
pub const FID_MEM_SESSION_CLOSE: u16 = 0x301;
pub const FID_MEMORY_READ: u16 = 0x302;
pub const FID_MEMORY_WRITE: u16 = 0x303;

// --- FB_NIC function ids ----------------------------------------------------

pub const FID_NIC_SYS_DIAG: u16 = 0x512;
pub const FID_NIC_SYS_DIAG_END: u16 = 0x513;
pub const FID_NIC_BC_DIAG: u16 = 0x514;
pub const FID_NIC_BC_DIAG_END: u16 = 0x515;
pub const FID_NIC_NET_STATUS: u16 = 0x520;

/// The three coordinates of a control message plus the instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgId {
    pub fblock_id: u8,
    pub instance_id: u8,
    pub function_id: u16,
    pub op_type: OpType,
}

/// One control telegram.
///
/// The payload is bounded by [`MAX_PAYLOAD`]; the pool rejects larger
/// allocations before a telegram is ever built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlMsg {
    pub destination: u16,
    pub id: MsgId,
    pub payload: Vec<u8, MAX_PAYLOAD>,
}

impl ControlMsg {
    /// An empty telegram addressed to nobody; pool slots start out
    /// like this.
    pub fn blank() -> Self {
        Self {
            destination: 0,
            id: MsgId {
                fblock_id: 0,
                instance_id: 0,
                function_id: 0,
                op_type: OpType::Status,
            },
            payload: Vec::new(),
        }
    }

    /// Replaces the payload; fails on overflow.
    pub fn set_payload(&mut self, data: &[u8]) -> Result<(), ()> {
        self.payload.clear();
        self.payload.extend_from_slice(data)
    }
}
