//! Node scripting and memory programming value types.

use heapless::Vec;

use crate::{MAX_PAYLOAD, OpType};

/// Maximum number of memory units in a single read/write command.
pub const MAX_UNIT_LEN: usize = 18;

/// A control message template used inside a script: the command to
/// send, or the reply to expect.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigMsg {
    pub fblock_id: u8,
    pub instance_id: u8,
    pub function_id: u16,
    pub op_type: u8,
    pub data: Vec<u8, MAX_PAYLOAD>,
}

impl ConfigMsg {
    /// Builds a template from its header coordinates and payload.
    ///
    /// Fails (returns `None`) if the payload exceeds the telegram
    /// limit.
    pub fn new(fblock_id: u8, instance_id: u8, function_id: u16, op: OpType, data: &[u8]) -> Option<Self> {
        let mut msg = Self {
            fblock_id,
            instance_id,
            function_id,
            op_type: op as u8,
            data: Vec::new(),
        };
        msg.data.extend_from_slice(data).ok()?;
        Some(msg)
    }
}

/// One step of a node script: an optional pre-send pause, the command
/// and the reply that completes the step.
///
/// A step with no expected reply completes on transmission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Script {
    pub pause_ms: u16,
    pub send_cmd: ConfigMsg,
    pub expected_reply: Option<ConfigMsg>,
}

/// Memory session type for node programming.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionType {
    CfgRead = 0x01,
    CfgWrite = 0x02,
    ErrorRead = 0x03,
    ErrorErase = 0x04,
}

/// One memory write task of a programming run.
///
/// A task with `unit_len == 0` terminates the list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemCmd {
    pub mem_id: u8,
    pub address: u32,
    pub unit_len: u8,
    pub data: Vec<u8, MAX_UNIT_LEN>,
}

impl MemCmd {
    /// `true` for the terminating entry of a command list.
    pub fn is_terminator(&self) -> bool {
        self.unit_len == 0 || self.data.is_empty()
    }
}
