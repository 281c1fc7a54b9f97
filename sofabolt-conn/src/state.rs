//! Connection lifecycle state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    New = 0,
    Active = 1,
    Idle = 2,
    Hijacked = 3,
    Closed = 4,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnState::New,
            1 => ConnState::Active,
            2 => ConnState::Idle,
            3 => ConnState::Hijacked,
            _ => ConnState::Closed,
        }
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnState::New => "new",
            ConnState::Active => "active",
            ConnState::Idle => "idle",
            ConnState::Hijacked => "hijacked",
            ConnState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Atomic connection state packed with the time of its last change.
///
/// The low byte holds the state, the rest the milliseconds elapsed since the
/// cell was created.
#[derive(Debug)]
pub struct StateCell {
    origin: Instant,
    packed: AtomicU64,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            packed: AtomicU64::new(ConnState::New as u64),
        }
    }

    fn pack(&self, state: ConnState) -> u64 {
        let millis = self.origin.elapsed().as_millis() as u64;
        (millis << 8) | state as u64
    }

    pub fn set(&self, state: ConnState) {
        self.packed.store(self.pack(state), Ordering::Release);
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8((self.packed.load(Ordering::Acquire) & 0xff) as u8)
    }

    /// Current state and when it was entered.
    pub fn get(&self) -> (ConnState, Instant) {
        let packed = self.packed.load(Ordering::Acquire);
        let at = self.origin + Duration::from_millis(packed >> 8);
        (ConnState::from_u8((packed & 0xff) as u8), at)
    }

    /// Time spent in the current state.
    pub fn since_change(&self) -> Duration {
        self.get().1.elapsed()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
