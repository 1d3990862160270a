//! Wire frame codec for the byte link.
//!
//! The engine and its link driver exchange control telegrams in a
//! fixed 8-byte-header frame:
//!
//! ```text
//! 0..2   destination address (big-endian)
//! 2      function block id
//! 3      instance id
//! 4..6   function id (big-endian)
//! 6      operation type
//! 7      payload length
//! 8..    payload
//! ```
//!
//! Parsing returns `None` on short buffers, unknown op types and
//! length mismatches; such frames are dropped by the caller.

use ringnet_abi::{MAX_PAYLOAD, OpType};

use crate::msg::{ControlMsg, MsgId};

/// Frame header length in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest encoded frame.
pub const MAX_FRAME: usize = HEADER_LEN + MAX_PAYLOAD;

/// Encodes `msg` into `out`; returns the frame length.
///
/// `None` if `out` cannot hold the frame.
pub fn encode(msg: &ControlMsg, out: &mut [u8]) -> Option<usize> {
    let total = HEADER_LEN + msg.payload.len();
    if out.len() < total {
        return None;
    }
    out[0..2].copy_from_slice(&msg.destination.to_be_bytes());
    out[2] = msg.id.fblock_id;
    out[3] = msg.id.instance_id;
    out[4..6].copy_from_slice(&msg.id.function_id.to_be_bytes());
    out[6] = msg.id.op_type as u8;
    out[7] = msg.payload.len() as u8;
    out[HEADER_LEN..total].copy_from_slice(&msg.payload);
    Some(total)
}

/// Decodes one frame. `None` on malformed input.
pub fn decode(raw: &[u8]) -> Option<ControlMsg> {
    if raw.len() < HEADER_LEN {
        return None;
    }
    let len = raw[7] as usize;
    if len > MAX_PAYLOAD || raw.len() < HEADER_LEN + len {
        return None;
    }
    let op_type = OpType::from_raw(raw[6])?;
    let mut msg = ControlMsg {
        destination: u16::from_be_bytes([raw[0], raw[1]]),
        id: MsgId {
            fblock_id: raw[2],
            instance_id: raw[3],
            function_id: u16::from_be_bytes([raw[4], raw[5]]),
            op_type,
        },
        payload: heapless::Vec::new(),
    };
    // length checked above
    let _ = msg.payload.extend_from_slice(&raw[HEADER_LEN..HEADER_LEN + len]);
    Some(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{FB_DIAG, FID_HELLO};

    #[test]
    fn frame_round_trip() {
        let mut msg = ControlMsg::blank();
        msg.destination = 0x03FF;
        msg.id = MsgId {
            fblock_id: FB_DIAG,
            instance_id: 0,
            function_id: FID_HELLO,
            op_type: OpType::Get,
        };
        msg.set_payload(&[1]).unwrap();

        let mut buf = [0u8; MAX_FRAME];
        let n = encode(&msg, &mut buf).unwrap();
        assert_eq!(n, HEADER_LEN + 1);
        assert_eq!(decode(&buf[..n]), Some(msg));
    }

    #[test]
    fn malformed_frames_rejected() {
        assert_eq!(decode(&[0u8; 4]), None);
        // declared length longer than the buffer
        let mut buf = [0u8; HEADER_LEN];
        buf[6] = OpType::Status as u8;
        buf[7] = 3;
        assert_eq!(decode(&buf), None);
        // unknown op type
        let mut buf = [0u8; HEADER_LEN];
        buf[6] = 0x7A;
        buf[7] = 0;
        assert_eq!(decode(&buf), None);
    }
}
