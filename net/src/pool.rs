//! Bounded tx message pool.
//!
//! A fixed number of telegram slots shared by every machine in the
//! engine. Exhaustion surfaces as `BufferOverflow` at allocation time;
//! the caller may retry once a send completes. Each allocated slot is
//! either sent or explicitly released — the transceiver enforces the
//! "exactly one of send / free" discipline by consuming the token.

use ringnet_abi::{ApiError, MAX_PAYLOAD};

use crate::msg::ControlMsg;

/// Number of tx message slots.
pub const POOL_SIZE: usize = 8;

/// Handle to an allocated pool slot.
///
/// Not `Copy`: the token is consumed by `send`/`release`, which is what
/// guarantees a slot cannot be used twice.
#[derive(Debug, PartialEq, Eq)]
pub struct TxToken(u8);

impl TxToken {
    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

struct Slot {
    msg: ControlMsg,
    allocated: bool,
}

/// The slab of telegram slots.
pub struct TxPool {
    slots: [Slot; POOL_SIZE],
    in_use: usize,
}

impl Default for TxPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TxPool {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot {
                msg: ControlMsg::blank(),
                allocated: false,
            }),
            in_use: 0,
        }
    }

    /// Allocates a slot for a telegram with `payload_len` payload
    /// bytes.
    ///
    /// `Parameter` for oversized payloads, `BufferOverflow` when every
    /// slot is taken.
    pub fn alloc(&mut self, payload_len: usize) -> Result<TxToken, ApiError> {
        if payload_len > MAX_PAYLOAD {
            return Err(ApiError::Parameter);
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if !slot.allocated {
                slot.allocated = true;
                slot.msg = ControlMsg::blank();
                self.in_use += 1;
                return Ok(TxToken(i as u8));
            }
        }
        Err(ApiError::BufferOverflow)
    }

    /// The telegram under construction for `token`.
    pub fn msg_mut(&mut self, token: &TxToken) -> &mut ControlMsg {
        &mut self.slots[token.index()].msg
    }

    pub fn msg(&self, token: &TxToken) -> &ControlMsg {
        &self.slots[token.index()].msg
    }

    /// Returns an allocated slot to the pool.
    pub fn release(&mut self, token: TxToken) {
        let slot = &mut self.slots[token.index()];
        if slot.allocated {
            slot.allocated = false;
            self.in_use -= 1;
        }
    }

    /// Releases every slot (termination path).
    pub fn release_all(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.allocated = false;
        }
        self.in_use = 0;
    }

    /// Number of currently allocated slots.
    pub fn in_use(&self) -> usize {
        self.in_use
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_reports_overflow() {
        let mut pool = TxPool::new();
        let mut tokens = heapless::Vec::<TxToken, POOL_SIZE>::new();
        for _ in 0..POOL_SIZE {
            tokens.push(pool.alloc(0).unwrap()).unwrap();
        }
        assert_eq!(pool.alloc(0), Err(ApiError::BufferOverflow));
        assert_eq!(pool.in_use(), POOL_SIZE);
        let t = tokens.pop().unwrap();
        pool.release(t);
        assert_eq!(pool.in_use(), POOL_SIZE - 1);
        pool.alloc(0).unwrap();
    }

    #[test]
    fn payload_bound_is_exact() {
        let mut pool = TxPool::new();
        let t = pool.alloc(MAX_PAYLOAD).unwrap();
        pool.release(t);
        assert_eq!(pool.alloc(MAX_PAYLOAD + 1), Err(ApiError::Parameter));
    }

    #[test]
    fn release_all_empties() {
        let mut pool = TxPool::new();
        let _a = pool.alloc(1).unwrap();
        let _b = pool.alloc(2).unwrap();
        pool.release_all();
        assert_eq!(pool.in_use(), 0);
    }
}
