//! Data-driven timer wheel.
//!
//! Timers carry a [`TimerKind`] discriminant and a `key` identifying
//! the specific resource (script session index, lock instance, …) —
//! no callbacks. [`TimerWheel::tick`] collects the expired entries and
//! hands them back; the engine root dispatches each by matching on the
//! kind. This keeps the wheel free of borrows into the rest of the
//! engine, so dispatch handlers may arm and cancel timers freely.
//!
//! One-shot entries detach before they are delivered, so a handler may
//! immediately re-arm the same `(kind, key)`. Periodic entries re-arm
//! in place with `deadline += period`. Arming a `(kind, key)` that is
//! already armed is a caller bug and fails with [`TimerError::InUse`].
//!
//! Deadlines are absolute 16-bit millisecond ticks compared with
//! modular arithmetic (see [`clock`](crate::clock)).

use heapless::Vec;

use ringnet_abi::TimerKind;

use crate::clock;

/// Capacity of the wheel. Every procedure owns at most one supervision
/// timer, plus one pause and one guard timer per script session.
pub const MAX_TIMERS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerError {
    /// The `(kind, key)` pair is already armed.
    InUse,
    /// The wheel is full.
    Capacity,
}

#[derive(Clone, Copy, Debug)]
struct TimerEntry {
    kind: TimerKind,
    key: u8,
    deadline: u16,
    /// 0 = one-shot.
    period: u16,
}

/// A timer that has expired and awaits dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FiredTimer {
    pub kind: TimerKind,
    pub key: u8,
}

/// Ordered set of armed timers.
///
/// Entries fire in insertion order among those expired in the same
/// tick, matching the arming order of equal deadlines.
#[derive(Default)]
pub struct TimerWheel {
    entries: Vec<TimerEntry, MAX_TIMERS>,
}

impl TimerWheel {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Arms `(kind, key)` to fire `delay_ms` after `now`; a non-zero
    /// `period_ms` makes it periodic.
    pub fn arm(
        &mut self,
        now: u16,
        kind: TimerKind,
        key: u8,
        delay_ms: u16,
        period_ms: u16,
    ) -> Result<(), TimerError> {
        if self.is_armed(kind, key) {
            return Err(TimerError::InUse);
        }
        let entry = TimerEntry {
            kind,
            key,
            deadline: now.wrapping_add(delay_ms),
            period: period_ms,
        };
        self.entries.push(entry).map_err(|_| TimerError::Capacity)
    }

    /// Cancels `(kind, key)`. Returns `true` if an entry was detached.
    /// A timer already handed out by [`tick`](Self::tick) cannot be
    /// unfired.
    pub fn cancel(&mut self, kind: TimerKind, key: u8) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !(e.kind == kind && e.key == key));
        self.entries.len() != before
    }

    pub fn is_armed(&self, kind: TimerKind, key: u8) -> bool {
        self.entries.iter().any(|e| e.kind == kind && e.key == key)
    }

    /// Number of armed entries.
    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    /// Detaches every entry without firing.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Collects every entry whose deadline has been reached at `now`,
    /// in insertion order. One-shot entries are detached before the
    /// list is returned; periodic entries advance by their period.
    pub fn tick(&mut self, now: u16) -> Vec<FiredTimer, MAX_TIMERS> {
        let mut fired = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            let e = self.entries[i];
            if clock::reached(e.deadline, now) {
                // capacity: fired can never exceed the entry count
                let _ = fired.push(FiredTimer {
                    kind: e.kind,
                    key: e.key,
                });
                if e.period != 0 {
                    self.entries[i].deadline = e.deadline.wrapping_add(e.period);
                    i += 1;
                } else {
                    // remove() keeps insertion order for the remainder
                    self.entries.remove(i);
                }
            } else {
                i += 1;
            }
        }
        fired
    }

    /// Delay from `now` until the earliest deadline; `None` when the
    /// wheel is empty. Used to re-arm the host's platform timer.
    pub fn next_delay(&self, now: u16) -> Option<u16> {
        self.entries
            .iter()
            .map(|e| clock::remaining(e.deadline, now))
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once() {
        let mut wheel = TimerWheel::new();
        wheel.arm(0, TimerKind::SysDiag, 0, 100, 0).unwrap();
        assert!(wheel.tick(99).is_empty());
        let fired = wheel.tick(100);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, TimerKind::SysDiag);
        assert_eq!(wheel.pending_count(), 0);
        assert!(wheel.tick(200).is_empty());
    }

    #[test]
    fn duplicate_arm_rejected() {
        let mut wheel = TimerWheel::new();
        wheel.arm(0, TimerKind::Prog, 0, 50, 0).unwrap();
        assert_eq!(
            wheel.arm(0, TimerKind::Prog, 0, 80, 0),
            Err(TimerError::InUse)
        );
        // distinct key is a distinct timer
        wheel.arm(0, TimerKind::ScriptPause, 1, 50, 0).unwrap();
        wheel.arm(0, TimerKind::ScriptPause, 2, 50, 0).unwrap();
    }

    #[test]
    fn periodic_reschedules() {
        let mut wheel = TimerWheel::new();
        wheel.arm(0, TimerKind::Discovery, 0, 20, 20).unwrap();
        assert_eq!(wheel.tick(20).len(), 1);
        assert_eq!(wheel.pending_count(), 1);
        assert_eq!(wheel.tick(39).len(), 0);
        assert_eq!(wheel.tick(40).len(), 1);
        assert!(wheel.cancel(TimerKind::Discovery, 0));
        assert_eq!(wheel.tick(60).len(), 0);
    }

    #[test]
    fn fires_in_insertion_order_on_ties() {
        let mut wheel = TimerWheel::new();
        wheel.arm(0, TimerKind::BcDiag, 0, 10, 0).unwrap();
        wheel.arm(0, TimerKind::SysDiag, 0, 10, 0).unwrap();
        let fired = wheel.tick(10);
        assert_eq!(fired[0].kind, TimerKind::BcDiag);
        assert_eq!(fired[1].kind, TimerKind::SysDiag);
    }

    #[test]
    fn deadline_wraps_around() {
        let mut wheel = TimerWheel::new();
        wheel.arm(0xFFF0, TimerKind::CableLink, 0, 0x20, 0).unwrap();
        assert!(wheel.tick(0xFFFF).is_empty());
        assert_eq!(wheel.tick(0x0010).len(), 1);
    }

    #[test]
    fn next_delay_tracks_minimum() {
        let mut wheel = TimerWheel::new();
        assert_eq!(wheel.next_delay(0), None);
        wheel.arm(0, TimerKind::SysDiag, 0, 100, 0).unwrap();
        wheel.arm(0, TimerKind::BcDiag, 0, 30, 0).unwrap();
        assert_eq!(wheel.next_delay(0), Some(30));
        assert_eq!(wheel.next_delay(25), Some(5));
        assert_eq!(wheel.next_delay(40), Some(0));
    }

    #[test]
    fn cancel_detaches_without_firing() {
        let mut wheel = TimerWheel::new();
        wheel.arm(0, TimerKind::Prog, 0, 10, 0).unwrap();
        assert!(wheel.cancel(TimerKind::Prog, 0));
        assert!(!wheel.cancel(TimerKind::Prog, 0));
        assert!(wheel.tick(50).is_empty());
    }
}
