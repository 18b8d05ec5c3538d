//! Session state machine
//!
//! A recording session is in exactly one of four states; every mutation
//! goes through [`SessionMachine::transition`], which validates the event
//! against the transition table and rejects everything else:
//!
//! | From      | Start     | Pause  | Resume    | Stop     | Finalized |
//! |-----------|-----------|--------|-----------|----------|-----------|
//! | Idle      | Recording | -      | -         | -        | -         |
//! | Recording | -         | Paused | -         | Stopping | -         |
//! | Paused    | -         | -      | Recording | Stopping | -         |
//! | Stopping  | -         | -      | -         | -        | Idle      |
//!
//! `Stopping` is a terminal drain state: no new samples are accepted and
//! only the finalizer may emit `Finalized`, which is what makes the file
//! finalization step run at most once per session.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

/// Current state of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Idle = 0,
    Recording = 1,
    Paused = 2,
    Stopping = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Recording,
            2 => SessionState::Paused,
            3 => SessionState::Stopping,
            _ => SessionState::Idle,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Recording => "Recording",
            SessionState::Paused => "Paused",
            SessionState::Stopping => "Stopping",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Events driving the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    Stop,
    Pause,
    Resume,
    /// Emitted by the finalizer after flush completes: Stopping -> Idle.
    Finalized,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Start => "Start",
            SessionEvent::Stop => "Stop",
            SessionEvent::Pause => "Pause",
            SessionEvent::Resume => "Resume",
            SessionEvent::Finalized => "Finalized",
        }
    }
}

type ChangeCallback = Box<dyn Fn(SessionState, SessionState) + Send + Sync>;

/// Validated session state machine with a change notification hook.
///
/// Reads are lock-free (the encode loop polls the state every iteration);
/// transitions serialize on a short critical section. The change callback
/// runs inside that critical section and must not re-enter `transition`.
#[derive(Default)]
pub struct SessionMachine {
    state: AtomicU8,
    transition_lock: Mutex<()>,
    on_change: Mutex<Option<ChangeCallback>>,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the change callback, invoked exactly once per accepted
    /// transition with `(old, new)`.
    pub fn set_callback<F>(&self, cb: F)
    where
        F: Fn(SessionState, SessionState) + Send + Sync + 'static,
    {
        *self.on_change.lock() = Some(Box::new(cb));
    }

    /// Attempt a transition. Returns `true` iff the event is valid for the
    /// current state; rejected events leave the state unchanged and invoke
    /// nothing.
    pub fn transition(&self, event: SessionEvent) -> bool {
        let _guard = self.transition_lock.lock();
        let old = self.state();
        let new = match (old, event) {
            (SessionState::Idle, SessionEvent::Start) => SessionState::Recording,
            (SessionState::Recording, SessionEvent::Pause) => SessionState::Paused,
            (SessionState::Recording, SessionEvent::Stop) => SessionState::Stopping,
            (SessionState::Paused, SessionEvent::Resume) => SessionState::Recording,
            (SessionState::Paused, SessionEvent::Stop) => SessionState::Stopping,
            (SessionState::Stopping, SessionEvent::Finalized) => SessionState::Idle,
            _ => return false,
        };

        self.state.store(new as u8, Ordering::Release);
        if let Some(cb) = self.on_change.lock().as_ref() {
            cb(old, new);
        }
        true
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_idle(&self) -> bool {
        self.state() == SessionState::Idle
    }

    pub fn is_recording(&self) -> bool {
        self.state() == SessionState::Recording
    }

    pub fn is_paused(&self) -> bool {
        self.state() == SessionState::Paused
    }

    pub fn is_stopping(&self) -> bool {
        self.state() == SessionState::Stopping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    const STATES: [SessionState; 4] = [
        SessionState::Idle,
        SessionState::Recording,
        SessionState::Paused,
        SessionState::Stopping,
    ];
    const EVENTS: [SessionEvent; 5] = [
        SessionEvent::Start,
        SessionEvent::Stop,
        SessionEvent::Pause,
        SessionEvent::Resume,
        SessionEvent::Finalized,
    ];

    fn machine_in(state: SessionState) -> SessionMachine {
        let m = SessionMachine::new();
        match state {
            SessionState::Idle => {}
            SessionState::Recording => {
                assert!(m.transition(SessionEvent::Start));
            }
            SessionState::Paused => {
                assert!(m.transition(SessionEvent::Start));
                assert!(m.transition(SessionEvent::Pause));
            }
            SessionState::Stopping => {
                assert!(m.transition(SessionEvent::Start));
                assert!(m.transition(SessionEvent::Stop));
            }
        }
        assert_eq!(m.state(), state);
        m
    }

    fn expected(state: SessionState, event: SessionEvent) -> Option<SessionState> {
        match (state, event) {
            (SessionState::Idle, SessionEvent::Start) => Some(SessionState::Recording),
            (SessionState::Recording, SessionEvent::Pause) => Some(SessionState::Paused),
            (SessionState::Recording, SessionEvent::Stop) => Some(SessionState::Stopping),
            (SessionState::Paused, SessionEvent::Resume) => Some(SessionState::Recording),
            (SessionState::Paused, SessionEvent::Stop) => Some(SessionState::Stopping),
            (SessionState::Stopping, SessionEvent::Finalized) => Some(SessionState::Idle),
            _ => None,
        }
    }

    #[test]
    fn test_exhaustive_transition_table() {
        // Drive every (state, event) pair; only table cells may succeed,
        // and rejected events must leave the state untouched.
        for state in STATES {
            for event in EVENTS {
                let m = machine_in(state);
                let accepted = m.transition(event);
                match expected(state, event) {
                    Some(next) => {
                        assert!(accepted, "{:?} + {:?} should be accepted", state, event);
                        assert_eq!(m.state(), next);
                    }
                    None => {
                        assert!(!accepted, "{:?} + {:?} should be rejected", state, event);
                        assert_eq!(m.state(), state);
                    }
                }
            }
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let m = SessionMachine::new();
        assert!(m.transition(SessionEvent::Start));
        assert!(m.transition(SessionEvent::Pause));
        assert!(m.transition(SessionEvent::Resume));
        assert!(m.transition(SessionEvent::Stop));
        assert!(m.transition(SessionEvent::Finalized));
        assert!(m.is_idle());
    }

    #[test]
    fn test_callback_fires_once_per_accepted_transition() {
        let m = SessionMachine::new();
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let calls = calls.clone();
            let seen = seen.clone();
            m.set_callback(move |old, new| {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().push((old, new));
            });
        }

        assert!(m.transition(SessionEvent::Start));
        assert!(!m.transition(SessionEvent::Start)); // rejected: no callback
        assert!(m.transition(SessionEvent::Stop));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *seen.lock(),
            vec![
                (SessionState::Idle, SessionState::Recording),
                (SessionState::Recording, SessionState::Stopping),
            ]
        );
    }

    #[test]
    fn test_concurrent_stop_accepted_once() {
        // Two racing Stop requests: exactly one wins the transition.
        let m = Arc::new(machine_in(SessionState::Recording));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let m = m.clone();
            handles.push(std::thread::spawn(move || {
                m.transition(SessionEvent::Stop)
            }));
        }
        let accepted: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(accepted.iter().filter(|&&a| a).count(), 1);
        assert!(m.is_stopping());
    }
}
