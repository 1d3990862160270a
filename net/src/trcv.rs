//! Transceiver façade, outbound side.
//!
//! Owns the tx pool and hands encoded frames to the link driver via
//! [`Host::tx_enqueue`]. A send consumes the pool token, so every
//! allocated telegram is either sent or released exactly once.
//!
//! `send_tagged` additionally records a completion tag; the host
//! reports per-frame transmit status in order through the engine's
//! `tx_complete` entry, and the engine routes the status to the tag's
//! owner. A frame sent without a tag completes silently.

use heapless::Deque;

use ringnet_abi::{ApiError, Host, TxTag};

use crate::frame;
use crate::msg::ControlMsg;
use crate::pool::{POOL_SIZE, TxPool, TxToken};

pub struct Transceiver {
    pub pool: TxPool,
    /// Completion tags of in-flight frames, oldest first. `None` for
    /// untagged sends.
    pending: Deque<Option<TxTag>, POOL_SIZE>,
}

impl Default for Transceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl Transceiver {
    pub fn new() -> Self {
        Self {
            pool: TxPool::new(),
            pending: Deque::new(),
        }
    }

    /// Allocates a telegram slot; see [`TxPool::alloc`].
    pub fn alloc_tx(&mut self, payload_len: usize) -> Result<TxToken, ApiError> {
        self.pool.alloc(payload_len)
    }

    /// Access to the telegram under construction.
    pub fn msg_mut(&mut self, token: &TxToken) -> &mut ControlMsg {
        self.pool.msg_mut(token)
    }

    /// Encodes and enqueues the telegram, consuming the token.
    pub fn send<H: Host>(&mut self, host: &mut H, token: TxToken) {
        self.send_inner(host, token, None);
    }

    /// Like [`send`](Self::send), recording `tag` for the transmit
    /// status report.
    pub fn send_tagged<H: Host>(&mut self, host: &mut H, token: TxToken, tag: TxTag) {
        self.send_inner(host, token, Some(tag));
    }

    fn send_inner<H: Host>(&mut self, host: &mut H, token: TxToken, tag: Option<TxTag>) {
        let mut buf = [0u8; frame::MAX_FRAME];
        // pool payloads are bounded by the frame size
        if let Some(n) = frame::encode(self.pool.msg(&token), &mut buf) {
            host.tx_enqueue(&buf[..n]);
            if self.pending.push_back(tag).is_err() {
                // keep the newest tag; losing the oldest only costs a
                // status report
                let _ = self.pending.pop_front();
                let _ = self.pending.push_back(tag);
            }
        }
        self.pool.release(token);
    }

    /// Releases an allocated but unsent telegram.
    pub fn free_unused(&mut self, token: TxToken) {
        self.pool.release(token);
    }

    /// Consumes the oldest in-flight completion tag; called by the
    /// engine when the host reports a transmit status.
    pub fn take_completion(&mut self) -> Option<Option<TxTag>> {
        self.pending.pop_front()
    }

    /// Drops in-flight completions and releases every pool slot.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.pool.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringnet_abi::{EngineError, OpType};

    use crate::msg::{FB_DIAG, FID_DEVICE_INIT, MsgId};

    #[derive(Default)]
    struct Capture {
        frames: heapless::Vec<heapless::Vec<u8, { frame::MAX_FRAME }>, 8>,
    }

    impl Host for Capture {
        fn get_tick_count(&mut self) -> u16 {
            0
        }
        fn set_timer(&mut self, _ms: u16) {}
        fn request_service(&mut self) {}
        fn error(&mut self, _code: EngineError) {}
        fn tx_enqueue(&mut self, frame: &[u8]) {
            let mut v = heapless::Vec::new();
            v.extend_from_slice(frame).unwrap();
            self.frames.push(v).unwrap();
        }
    }

    #[test]
    fn send_encodes_and_releases() {
        let mut host = Capture::default();
        let mut trcv = Transceiver::new();
        let token = trcv.alloc_tx(0).unwrap();
        {
            let msg = trcv.msg_mut(&token);
            msg.destination = 0x0001;
            msg.id = MsgId {
                fblock_id: FB_DIAG,
                instance_id: 0,
                function_id: FID_DEVICE_INIT,
                op_type: OpType::Start,
            };
        }
        trcv.send(&mut host, token);
        assert_eq!(host.frames.len(), 1);
        assert_eq!(trcv.pool.in_use(), 0);
        let decoded = frame::decode(&host.frames[0]).unwrap();
        assert_eq!(decoded.id.function_id, FID_DEVICE_INIT);
    }

    #[test]
    fn completions_come_back_in_order() {
        let mut host = Capture::default();
        let mut trcv = Transceiver::new();
        for i in 0..2 {
            let token = trcv.alloc_tx(0).unwrap();
            trcv.msg_mut(&token).destination = 0x0010 + i as u16;
            trcv.send_tagged(&mut host, token, TxTag::Script(i));
        }
        assert_eq!(trcv.take_completion(), Some(Some(TxTag::Script(0))));
        assert_eq!(trcv.take_completion(), Some(Some(TxTag::Script(1))));
        assert_eq!(trcv.take_completion(), None);
    }
}
