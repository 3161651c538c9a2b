//! The per-session state machine from `spec.md` §4.3, shared between
//! the read and write loops as a single atomic word — the only state
//! those two loops share besides the codec's write mutex.

use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting = 0,
    Idle = 1,
    Dispatching = 2,
    AwaitingStatus = 3,
    WorkerBusy = 4,
    Terminated = 5,
}

impl SessionState {
    fn from_u8(b: u8) -> Self {
        match b {
            0 => SessionState::Connecting,
            1 => SessionState::Idle,
            2 => SessionState::Dispatching,
            3 => SessionState::AwaitingStatus,
            4 => SessionState::WorkerBusy,
            _ => SessionState::Terminated,
        }
    }
}

pub struct AtomicSessionState(AtomicU8);

impl AtomicSessionState {
    pub fn new(initial: SessionState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn load(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// Swaps to `to` only if the current state is `from`. Used by the
    /// write loop to avoid claiming a second task while a status
    /// transition from the read loop is still in flight.
    pub fn compare_store(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_store_only_succeeds_from_the_expected_state() {
        let state = AtomicSessionState::new(SessionState::Idle);
        assert!(state.compare_store(SessionState::Idle, SessionState::Dispatching));
        assert_eq!(state.load(), SessionState::Dispatching);
        assert!(!state.compare_store(SessionState::Idle, SessionState::WorkerBusy));
        assert_eq!(state.load(), SessionState::Dispatching);
    }
}
