//! Shared published session values
//!
//! This module holds the one-way, last-value-wins values the coordinator
//! publishes for display and controller clients: server identity, player
//! and pending counts, the per-microphone display states, the session
//! state, the selected question category and the current question text.
//! Publishing is fan-out only; displays never mutate these values.

use serde::{Deserialize, Serialize};

use super::{
    coordinator::SessionState,
    session::Tunnel,
    watcher::{Id, ValueKind, Watchers},
};

/// Display state of a single microphone slot
///
/// This is the per-slot status string shown to observers. `Absent` marks a
/// slot with no registered helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MicState {
    /// No helper registered for this slot
    Absent,
    /// Helper registered, not bound to a player
    Idle,
    /// Helper bound to a player, carrying the microphone out
    HandOut,
    /// Bound player confirmed ready, waiting for the on-air slot
    Ready,
    /// Bound player is currently speaking
    OnAir,
}

/// A single published value change
///
/// Sent to display and controller clients whenever the coordinator updates
/// one of the shared values. Consumers keep the last value per variant.
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// The address the server is reachable at
    ServerIp(String),
    /// The Wi-Fi network name the audience should join
    WifiSsid(String),
    /// Number of connected players
    PlayerCount(usize),
    /// Number of players waiting for a turn (queued, ready or hand-up)
    PendingCount(usize),
    /// Display state of one microphone slot
    MicState {
        /// The microphone slot index
        mic: usize,
        /// The slot's new display state
        state: MicState,
    },
    /// The session lifecycle state
    SessionState(SessionState),
    /// The currently selected question category
    QuestionCategory(String),
    /// The question posed to the current speaker (empty when nobody is on air)
    CurrentQuestion(String),
}

/// Full snapshot of all published values
///
/// Sent to display and controller clients when they connect, so a late
/// joiner starts from the current values instead of waiting for changes.
#[derive(Debug, Serialize, Clone)]
pub struct Snapshot {
    /// The address the server is reachable at
    pub server_ip: String,
    /// The Wi-Fi network name the audience should join
    pub wifi_ssid: String,
    /// Number of connected players
    pub player_count: usize,
    /// Number of players waiting for a turn
    pub pending_count: usize,
    /// Display state per microphone slot, indexed by slot
    pub mic_states: Vec<MicState>,
    /// The session lifecycle state
    pub session_state: SessionState,
    /// The currently selected question category
    pub question_category: String,
    /// The question posed to the current speaker
    pub current_question: String,
}

/// Sync messages for display and controller clients
#[derive(Debug, Serialize, Clone)]
pub enum SyncMessage {
    /// All published values at once
    Snapshot(Snapshot),
}

/// Owner of the published session values
///
/// The coordinator updates values through [`SharedParams::publish`], which
/// stores the new value and fans it out to every display and controller
/// client. Values are published in the order the coordinator issues them.
#[derive(Debug, Serialize, Deserialize)]
pub struct SharedParams {
    server_ip: String,
    wifi_ssid: String,
    player_count: usize,
    pending_count: usize,
    mic_states: Vec<MicState>,
    session_state: SessionState,
    question_category: String,
    current_question: String,
}

impl SharedParams {
    /// Creates the parameter set for a session
    ///
    /// # Arguments
    ///
    /// * `mic_count` - Number of microphone slots; all start `Absent`
    /// * `question_category` - The initially selected category
    pub fn new(mic_count: usize, question_category: String) -> Self {
        Self {
            server_ip: String::new(),
            wifi_ssid: String::new(),
            player_count: 0,
            pending_count: 0,
            mic_states: vec![MicState::Absent; mic_count],
            session_state: SessionState::default(),
            question_category,
            current_question: String::new(),
        }
    }

    /// Returns the last published pending count
    pub fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Returns the display state of a microphone slot
    pub fn mic_state(&self, mic: usize) -> Option<MicState> {
        self.mic_states.get(mic).copied()
    }

    /// Stores a value and fans it out to display and controller clients
    ///
    /// # Arguments
    ///
    /// * `update` - The value change to store and publish
    /// * `watchers` - The session's participant registry
    /// * `tunnel_finder` - Function to retrieve tunnels for watchers
    pub fn publish<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        update: UpdateMessage,
        watchers: &Watchers,
        tunnel_finder: F,
    ) {
        match &update {
            UpdateMessage::ServerIp(ip) => self.server_ip = ip.clone(),
            UpdateMessage::WifiSsid(ssid) => self.wifi_ssid = ssid.clone(),
            UpdateMessage::PlayerCount(count) => self.player_count = *count,
            UpdateMessage::PendingCount(count) => self.pending_count = *count,
            UpdateMessage::MicState { mic, state } => {
                let Some(slot) = self.mic_states.get_mut(*mic) else {
                    return;
                };
                *slot = *state;
            }
            UpdateMessage::SessionState(state) => self.session_state = *state,
            UpdateMessage::QuestionCategory(category) => {
                self.question_category = category.clone();
            }
            UpdateMessage::CurrentQuestion(question) => {
                self.current_question = question.clone();
            }
        }

        let message: crate::UpdateMessage = update.into();
        watchers.announce_with(
            |_, kind| match kind {
                ValueKind::Display | ValueKind::Controller => Some(message.clone()),
                ValueKind::Player | ValueKind::Helper => None,
            },
            tunnel_finder,
        );
    }

    /// Returns a snapshot of all published values
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            server_ip: self.server_ip.clone(),
            wifi_ssid: self.wifi_ssid.clone(),
            player_count: self.player_count,
            pending_count: self.pending_count,
            mic_states: self.mic_states.clone(),
            session_state: self.session_state,
            question_category: self.question_category.clone(),
            current_question: self.current_question.clone(),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::watcher::Value;
    use std::{cell::RefCell, rc::Rc};

    #[derive(Clone, Default)]
    struct RecordingTunnel {
        messages: Rc<RefCell<Vec<String>>>,
    }

    impl Tunnel for RecordingTunnel {
        fn send_message(&self, message: &crate::UpdateMessage) {
            self.messages.borrow_mut().push(message.to_message());
        }

        fn send_state(&self, _state: &crate::SyncMessage) {}

        fn close(self) {}
    }

    #[test]
    fn test_new_starts_absent() {
        let params = SharedParams::new(4, "history".to_string());
        let snapshot = params.snapshot();

        assert_eq!(snapshot.mic_states, vec![MicState::Absent; 4]);
        assert_eq!(snapshot.question_category, "history");
        assert_eq!(snapshot.pending_count, 0);
        assert_eq!(snapshot.current_question, "");
    }

    #[test]
    fn test_publish_stores_and_broadcasts_to_displays_only() {
        let mut watchers = Watchers::default();
        let display = Id::new();
        let player = Id::new();
        watchers.add_watcher(display, Value::Display).unwrap();
        watchers
            .add_watcher(player, Value::Player(crate::watcher::PlayerValue::default()))
            .unwrap();

        let display_tunnel = RecordingTunnel::default();
        let player_tunnel = RecordingTunnel::default();
        let tunnels: std::collections::HashMap<Id, RecordingTunnel> = [
            (display, display_tunnel.clone()),
            (player, player_tunnel.clone()),
        ]
        .into_iter()
        .collect();
        let tunnel_finder = |id| tunnels.get(&id).cloned();

        let mut params = SharedParams::new(2, "history".to_string());
        params.publish(
            UpdateMessage::MicState {
                mic: 1,
                state: MicState::Idle,
            },
            &watchers,
            tunnel_finder,
        );

        assert_eq!(params.mic_state(1), Some(MicState::Idle));
        assert_eq!(display_tunnel.messages.borrow().len(), 1);
        assert!(player_tunnel.messages.borrow().is_empty());
    }

    #[test]
    fn test_publish_out_of_range_mic_is_ignored() {
        let mut params = SharedParams::new(2, "history".to_string());
        let watchers = Watchers::default();

        params.publish(
            UpdateMessage::MicState {
                mic: 7,
                state: MicState::OnAir,
            },
            &watchers,
            |_| None::<RecordingTunnel>,
        );

        assert_eq!(params.snapshot().mic_states, vec![MicState::Absent; 2]);
    }

    #[test]
    fn test_mic_state_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&MicState::HandOut).unwrap(),
            "\"hand-out\""
        );
        assert_eq!(
            serde_json::to_string(&MicState::OnAir).unwrap(),
            "\"on-air\""
        );
    }
}
