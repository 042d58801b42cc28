use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Conversation turn state. Exactly one instance exists per process, owned
/// by a [`TurnTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    UserSpeaking,
    WaitingForAgent,
    AgentSpeaking,
}

/// Inputs to the turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    /// The user pressed the talk key.
    SpeakToggle,
    /// An inbound event carried at least one audio payload.
    AgentAudio,
    /// The remote signalled the end of its response turn.
    TurnComplete,
    /// Shutdown began. Terminal: every later event is ignored.
    Shutdown,
}

struct Inner {
    state: TurnState,
    halted: bool,
}

/// Tracks the turn state under the fixed transition table. Events that do
/// not match the current state are ignored, not errors; `Shutdown` always
/// wins and is terminal. Reads are consistent snapshots.
pub struct TurnTracker {
    inner: Arc<RwLock<Inner>>,
    state_tx: Sender<TurnState>,
    state_rx: Receiver<TurnState>,
}

impl Default for TurnTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnTracker {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            inner: Arc::new(RwLock::new(Inner {
                state: TurnState::Idle,
                halted: false,
            })),
            state_tx,
            state_rx,
        }
    }

    /// Apply an event. Returns the new state if the event caused a
    /// transition, `None` if it was ignored.
    pub fn apply(&self, event: TurnEvent) -> Option<TurnState> {
        let mut inner = self.inner.write();
        if inner.halted {
            return None;
        }

        let next = match (inner.state, event) {
            (TurnState::Idle | TurnState::WaitingForAgent, TurnEvent::SpeakToggle) => {
                Some(TurnState::UserSpeaking)
            }
            (TurnState::UserSpeaking, TurnEvent::SpeakToggle) => Some(TurnState::WaitingForAgent),
            (TurnState::WaitingForAgent, TurnEvent::AgentAudio) => Some(TurnState::AgentSpeaking),
            (TurnState::AgentSpeaking, TurnEvent::TurnComplete) => Some(TurnState::Idle),
            (_, TurnEvent::Shutdown) => {
                inner.halted = true;
                Some(TurnState::Idle)
            }
            _ => None,
        }?;

        if next != inner.state || event == TurnEvent::Shutdown {
            tracing::info!("Turn state: {:?} -> {:?}", inner.state, next);
        }
        inner.state = next;
        let _ = self.state_tx.send(next);
        Some(next)
    }

    /// Snapshot of the current state.
    pub fn current(&self) -> TurnState {
        self.inner.read().state
    }

    pub fn subscribe(&self) -> Receiver<TurnState> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_in(states: &[TurnEvent]) -> TurnTracker {
        let t = TurnTracker::new();
        for &e in states {
            t.apply(e);
        }
        t
    }

    #[test]
    fn user_turn_cycle() {
        let t = TurnTracker::new();
        assert_eq!(t.current(), TurnState::Idle);
        assert_eq!(t.apply(TurnEvent::SpeakToggle), Some(TurnState::UserSpeaking));
        assert_eq!(
            t.apply(TurnEvent::SpeakToggle),
            Some(TurnState::WaitingForAgent)
        );
        assert_eq!(t.apply(TurnEvent::AgentAudio), Some(TurnState::AgentSpeaking));
        assert_eq!(t.apply(TurnEvent::TurnComplete), Some(TurnState::Idle));
    }

    #[test]
    fn toggle_allowed_while_waiting_for_agent() {
        let t = tracker_in(&[TurnEvent::SpeakToggle, TurnEvent::SpeakToggle]);
        assert_eq!(t.current(), TurnState::WaitingForAgent);
        assert_eq!(t.apply(TurnEvent::SpeakToggle), Some(TurnState::UserSpeaking));
    }

    #[test]
    fn mismatched_events_are_ignored() {
        let t = TurnTracker::new();
        // Nothing inbound is meaningful while idle.
        assert_eq!(t.apply(TurnEvent::AgentAudio), None);
        assert_eq!(t.apply(TurnEvent::TurnComplete), None);
        assert_eq!(t.current(), TurnState::Idle);

        // Toggling while the agent is speaking does nothing.
        let t = tracker_in(&[
            TurnEvent::SpeakToggle,
            TurnEvent::SpeakToggle,
            TurnEvent::AgentAudio,
        ]);
        assert_eq!(t.apply(TurnEvent::SpeakToggle), None);
        // Repeated audio events keep the state where it is.
        assert_eq!(t.apply(TurnEvent::AgentAudio), None);
        assert_eq!(t.current(), TurnState::AgentSpeaking);
    }

    #[test]
    fn shutdown_wins_from_every_state() {
        for prefix in [
            &[][..],
            &[TurnEvent::SpeakToggle][..],
            &[TurnEvent::SpeakToggle, TurnEvent::SpeakToggle][..],
            &[
                TurnEvent::SpeakToggle,
                TurnEvent::SpeakToggle,
                TurnEvent::AgentAudio,
            ][..],
        ] {
            let t = tracker_in(prefix);
            assert_eq!(t.apply(TurnEvent::Shutdown), Some(TurnState::Idle));
            // Terminal: nothing transitions afterwards.
            assert_eq!(t.apply(TurnEvent::SpeakToggle), None);
            assert_eq!(t.apply(TurnEvent::AgentAudio), None);
            assert_eq!(t.apply(TurnEvent::Shutdown), None);
            assert_eq!(t.current(), TurnState::Idle);
        }
    }

    #[test]
    fn subscribers_observe_transitions_in_order() {
        let t = TurnTracker::new();
        let rx = t.subscribe();
        t.apply(TurnEvent::SpeakToggle);
        t.apply(TurnEvent::SpeakToggle);
        t.apply(TurnEvent::AgentAudio);
        t.apply(TurnEvent::TurnComplete);

        let seen: Vec<TurnState> = rx.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                TurnState::UserSpeaking,
                TurnState::WaitingForAgent,
                TurnState::AgentSpeaking,
                TurnState::Idle,
            ]
        );
    }
}
