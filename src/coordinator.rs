//! Core mic assignment coordination
//!
//! This module contains the main coordinator struct and logic for managing
//! a live speaking session: queueing speaking requests, arbitrating which
//! player gets the next free helper, resolving racing helper claims,
//! sequencing players onto the single on-air slot, and reacting to the
//! operator-driven session lifecycle.
//!
//! All state is mutated by a single logical writer: the embedding event
//! loop funnels every inbound event into one of the `&mut self` methods
//! here, so the invariants hold atomically between events. No method
//! blocks on I/O; outbound signals are fire-and-forget through the
//! [`Tunnel`] abstraction.

use std::{
    collections::{HashSet, VecDeque},
    fmt::Debug,
};

use garde::Validate;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use super::{
    params::{self, MicState, SharedParams},
    questions::QuestionBank,
    session::Tunnel,
    watcher::{self, HelperValue, Id, Phase, PlayerValue, Value, ValueKind, Watchers},
};

/// Operator-driven lifecycle state of the whole session
///
/// Transitions are driven by an external set call, not by internal logic,
/// with one exception: a stopped session with nothing in flight escalates
/// itself to `End`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Before the session has started; requests are not accepted
    #[default]
    Pre,
    /// The session is live and accepting requests
    Running,
    /// Winding down: no new requests, in-flight speakers finish
    Stop,
    /// The session is over
    End,
}

/// Configuration options for the session
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Validate)]
pub struct Options {
    /// Number of physical microphone slots helpers can register for
    #[garde(range(
        min = crate::constants::session::MIN_MIC_COUNT,
        max = crate::constants::session::MAX_MIC_COUNT,
    ))]
    pub mic_count: usize,
}

impl Default for Options {
    /// Default options use the standard four microphone slots
    fn default() -> Self {
        Self {
            mic_count: crate::constants::session::DEFAULT_MIC_COUNT,
        }
    }
}

/// Outcome of a claim negotiation, broadcast to every helper
///
/// Every helper receives the same assignment signal and compares the slot
/// index against its own to determine win or loss; losing helpers
/// self-reset. `NoWinner` tells all competing helpers to stand down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assignment {
    /// The helper at this microphone slot won the claim
    Assigned(usize),
    /// The negotiation was cancelled; no helper won
    NoWinner,
}

/// Messages received from different types of participants
///
/// This enum categorizes incoming messages based on the sender's role,
/// ensuring that only appropriate messages are processed from each
/// participant type.
#[derive(Debug, Deserialize, Clone)]
pub enum IncomingMessage {
    /// Messages from audience players
    Player(IncomingPlayerMessage),
    /// Messages from microphone helpers
    Helper(IncomingHelperMessage),
    /// Messages from the operator controller
    Controller(IncomingControllerMessage),
}

impl IncomingMessage {
    /// Validates that a message matches the sender's participant role
    ///
    /// This ensures that participants can only send messages appropriate
    /// for their role in the session.
    fn follows(&self, sender_kind: ValueKind) -> bool {
        matches!(
            (self, sender_kind),
            (IncomingMessage::Player(_), ValueKind::Player)
                | (IncomingMessage::Helper(_), ValueKind::Helper)
                | (IncomingMessage::Controller(_), ValueKind::Controller)
        )
    }
}

/// Messages that can be sent by players
#[derive(Debug, Deserialize, Clone, Copy)]
pub enum IncomingPlayerMessage {
    /// Ask for a turn at a microphone
    RequestMic,
    /// Withdraw a pending request
    CancelRequest,
}

/// Messages that can be sent by helpers
#[derive(Debug, Deserialize, Clone, Copy)]
pub enum IncomingHelperMessage {
    /// Claim a specific microphone slot for this connection
    RegisterHelper(usize),
    /// Claim the player whose hand is currently up
    ClaimSpeaker,
    /// Confirm that the claimed player has the microphone and is ready
    SpeakerReady,
    /// Confirm that the on-air player has finished speaking
    SpeakerDone,
}

/// Messages that can be sent by the operator controller
#[derive(Debug, Deserialize, Clone)]
pub enum IncomingControllerMessage {
    /// Drive the session lifecycle
    SetSessionState(SessionState),
    /// Select the category questions are drawn from
    SetQuestionCategory(String),
}

/// Update messages sent to players and helpers about coordination events
#[derive(Debug, Serialize, Clone)]
pub enum UpdateMessage {
    /// Tell a player its request was promoted; raise your hand
    RaiseHand,
    /// Tell a player a helper is on the way with a microphone
    GetReady,
    /// Tell a player it is on air
    SpeakNow,
    /// Tell a player or helper to return to its idle state
    Reset,
    /// Broadcast to helpers: a hand is up, race to claim it
    CompeteForSpeaker,
    /// Broadcast to helpers: the claim resolved (or was cancelled)
    AssignSpeaker(Assignment),
    /// Tell the bound helper its player is now on air
    SpeakerOnAir,
}

/// Sync messages to re-synchronize a reconnecting player or helper
#[skip_serializing_none]
#[derive(Debug, Serialize, Clone)]
pub enum SyncMessage {
    /// A player's current lifecycle state
    Player {
        /// The player's lifecycle phase
        phase: Phase,
        /// The microphone slot bound to the player, if any
        mic: Option<usize>,
    },
    /// A helper's current registration state
    Helper {
        /// The microphone slot this helper registered for, if any
        mic: Option<usize>,
        /// Whether a claim negotiation is currently open
        claim_open: bool,
    },
}

/// The mic assignment coordinator
///
/// This struct owns all coordination state for one live session: the
/// participant registry, the request and speaker queues, the hand-raise
/// negotiation, the microphone slot pool, the on-air slot, the question
/// bank and the published display values. State lives for one session and
/// resets freely on lifecycle transitions; nothing persists across
/// restarts.
#[derive(Serialize, Deserialize)]
pub struct Coordinator {
    /// Manager for all connected participants
    pub watchers: Watchers,
    /// Operator-driven lifecycle state
    session_state: SessionState,
    /// Players waiting for a turn, in arrival order
    requests: VecDeque<Id>,
    /// Claimed players waiting for the on-air slot, in readiness order
    speakers: VecDeque<Id>,
    /// The player whose hand is currently up, if any
    hand_up: Option<Id>,
    /// Whether a claim on the current hand-up is still awaitable
    claim_open: bool,
    /// The player currently on air, if any
    on_air: Option<Id>,
    /// Registered helper connection per microphone slot
    helpers: Vec<Option<Id>>,
    /// Slots whose registered helper is not bound to a player
    free_mics: HashSet<usize>,
    /// Connected player counter, tracked independently of the queues
    player_count: usize,
    /// Per-category questions with non-repeating draws
    questions: QuestionBank,
    /// Published display values
    params: SharedParams,
}

impl Debug for Coordinator {
    /// Custom debug implementation that avoids printing large amounts of data
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("session_state", &self.session_state)
            .field("hand_up", &self.hand_up)
            .field("on_air", &self.on_air)
            .finish_non_exhaustive()
    }
}

// Convenience methods
impl Coordinator {
    /// Returns the current session lifecycle state
    pub fn session_state(&self) -> SessionState {
        self.session_state
    }

    /// Returns the player whose hand is currently up, if any
    pub fn current_hand_up(&self) -> Option<Id> {
        self.hand_up
    }

    /// Returns the player currently on air, if any
    pub fn current_speaker(&self) -> Option<Id> {
        self.on_air
    }

    /// Returns whether a claim on the current hand-up is still awaitable
    pub fn is_claim_open(&self) -> bool {
        self.claim_open
    }

    /// Returns whether a microphone slot is registered and unbound
    pub fn is_mic_free(&self, mic: usize) -> bool {
        self.free_mics.contains(&mic)
    }

    /// Returns the number of registered, unbound microphone slots
    pub fn free_mic_count(&self) -> usize {
        self.free_mics.len()
    }

    /// Returns the players waiting for a turn, in arrival order
    pub fn request_queue(&self) -> impl Iterator<Item = Id> + '_ {
        self.requests.iter().copied()
    }

    /// Returns the claimed players waiting for the on-air slot
    pub fn speaker_queue(&self) -> impl Iterator<Item = Id> + '_ {
        self.speakers.iter().copied()
    }

    /// Returns the published display values
    pub fn params(&self) -> &SharedParams {
        &self.params
    }

    /// Overwrites a player's lifecycle state
    fn set_player(&mut self, player: Id, phase: Phase, mic: Option<usize>) {
        self.watchers
            .update_watcher_value(player, Value::Player(PlayerValue { phase, mic }));
    }

    /// Looks up the helper connection bound to a player through its mic slot
    fn bound_helper(&self, player: Id) -> Option<Id> {
        let mic = self.watchers.get_player_value(player)?.mic?;
        self.helpers.get(mic).copied().flatten()
    }

    /// Stores a published value and fans it out to displays and controllers
    fn publish<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        update: params::UpdateMessage,
        tunnel_finder: &F,
    ) {
        self.params.publish(update, &self.watchers, tunnel_finder);
    }

    /// Broadcasts an update message to every helper connection
    fn broadcast_helpers<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &crate::UpdateMessage,
        tunnel_finder: &F,
    ) {
        self.watchers
            .announce_specific(ValueKind::Helper, message, tunnel_finder);
    }
}

impl Coordinator {
    /// Creates a new coordinator for one live session
    ///
    /// # Arguments
    ///
    /// * `questions` - The validated question bank to draw from
    /// * `options` - Session options, validated here
    ///
    /// # Errors
    ///
    /// Returns the validation report if the options are out of bounds.
    /// Configuration failures are fatal at startup; they never surface at
    /// runtime.
    pub fn new(questions: QuestionBank, options: Options) -> Result<Self, garde::Report> {
        options.validate()?;

        let params = SharedParams::new(options.mic_count, questions.selected().to_owned());

        Ok(Self {
            watchers: Watchers::default(),
            session_state: SessionState::Pre,
            requests: VecDeque::new(),
            speakers: VecDeque::new(),
            hand_up: None,
            claim_open: false,
            on_air: None,
            helpers: vec![None; options.mic_count],
            free_mics: HashSet::new(),
            player_count: 0,
            questions,
            params,
        })
    }

    /// Publishes the server's reachable address and Wi-Fi network name
    ///
    /// The values come from the embedder; the coordinator does not probe
    /// network interfaces itself.
    pub fn set_identity<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        server_ip: &str,
        wifi_ssid: &str,
        tunnel_finder: F,
    ) {
        self.publish(
            params::UpdateMessage::ServerIp(server_ip.to_owned()),
            &tunnel_finder,
        );
        self.publish(
            params::UpdateMessage::WifiSsid(wifi_ssid.to_owned()),
            &tunnel_finder,
        );
    }

    /// Adds a new participant with the given role
    ///
    /// Entering players bump the published player count. Displays and
    /// controllers immediately receive a snapshot of all published values.
    /// Helpers start unregistered; they claim a slot with
    /// [`IncomingHelperMessage::RegisterHelper`]. Entering an id that is
    /// already present is a no-op; it neither changes the participant's
    /// role nor recounts it.
    ///
    /// # Errors
    ///
    /// Returns `watcher::Error` if the session is full.
    pub fn enter<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        kind: ValueKind,
        tunnel_finder: F,
    ) -> Result<(), watcher::Error> {
        if self.watchers.has_watcher(watcher_id) {
            return Ok(());
        }

        let value = match kind {
            ValueKind::Player => Value::Player(PlayerValue::default()),
            ValueKind::Helper => Value::Helper(HelperValue::default()),
            ValueKind::Display => Value::Display,
            ValueKind::Controller => Value::Controller,
        };

        self.watchers.add_watcher(watcher_id, value)?;

        match kind {
            ValueKind::Player => {
                let count = self.player_count + 1;
                self.player_count = count;
                self.publish(params::UpdateMessage::PlayerCount(count), &tunnel_finder);
            }
            ValueKind::Display | ValueKind::Controller => {
                self.watchers.send_state(
                    &self.state_message(watcher_id, kind),
                    watcher_id,
                    &tunnel_finder,
                );
            }
            ValueKind::Helper => {}
        }

        Ok(())
    }

    /// Handles a participant disconnect
    ///
    /// Disconnects are lifecycle events, never errors; the data model
    /// satisfies all invariants afterwards. A departing player is removed
    /// from whichever structure holds it, propagating a reset to its bound
    /// helper. A departing helper frees its slot and resets its player.
    pub fn remove_watcher<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(value) = self.watchers.get_watcher_value(watcher_id) else {
            return;
        };

        match value {
            Value::Player(_) => {
                self.reset_player(watcher_id, true, &tunnel_finder);
                self.watchers.remove_watcher(watcher_id);
                self.player_count = self.player_count.saturating_sub(1);
                let count = self.player_count;
                self.publish(params::UpdateMessage::PlayerCount(count), &tunnel_finder);
            }
            Value::Helper(helper_value) => {
                self.watchers.remove_watcher(watcher_id);
                self.exit_helper(watcher_id, helper_value, &tunnel_finder);
            }
            Value::Display | Value::Controller => {
                self.watchers.remove_watcher(watcher_id);
            }
        }
    }

    /// Handles incoming messages from participants
    ///
    /// This method processes all incoming messages, validates that they
    /// are appropriate for the sender's role, and routes them to the
    /// correct handlers. Out-of-order or racing client messages never
    /// raise errors; every guard degrades to a silent no-op when its
    /// precondition fails, which keeps every handler idempotent under
    /// duplication or reordering within the serialized stream.
    pub fn receive_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        watcher_id: Id,
        message: IncomingMessage,
        tunnel_finder: F,
    ) {
        let Some(watcher_value) = self.watchers.get_watcher_value(watcher_id) else {
            return;
        };

        if !message.follows(watcher_value.kind()) {
            return;
        }

        match message {
            IncomingMessage::Player(message) => match message {
                IncomingPlayerMessage::RequestMic => self.request_mic(watcher_id, &tunnel_finder),
                IncomingPlayerMessage::CancelRequest => {
                    self.cancel_request(watcher_id, &tunnel_finder);
                }
            },
            IncomingMessage::Helper(message) => match message {
                IncomingHelperMessage::RegisterHelper(mic) => {
                    self.register_helper(watcher_id, mic, &tunnel_finder);
                }
                IncomingHelperMessage::ClaimSpeaker => {
                    self.claim_current(watcher_id, &tunnel_finder);
                }
                IncomingHelperMessage::SpeakerReady => {
                    self.speaker_ready(watcher_id, &tunnel_finder);
                }
                IncomingHelperMessage::SpeakerDone => {
                    self.speaker_done(watcher_id, &tunnel_finder);
                }
            },
            IncomingMessage::Controller(message) => match message {
                IncomingControllerMessage::SetSessionState(state) => {
                    self.set_session_state(state, tunnel_finder);
                }
                IncomingControllerMessage::SetQuestionCategory(category) => {
                    self.set_question_category(&category, tunnel_finder);
                }
            },
        }
    }

    /// Appends a player to the request queue
    ///
    /// Valid only while the session is running. A player that is already
    /// queued, hand-up, ready or speaking is not re-enqueued.
    fn request_mic<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, player: Id, tunnel_finder: &F) {
        if self.session_state != SessionState::Running {
            return;
        }

        let Some(player_value) = self.watchers.get_player_value(player) else {
            return;
        };

        if player_value.phase != Phase::Idle {
            return;
        }

        self.requests.push_back(player);
        self.set_player(player, Phase::Queued, None);
        self.handle_requests(tunnel_finder);
        self.update_num_pending(tunnel_finder);
    }

    /// Withdraws a player's pending request
    ///
    /// A cancel racing a dequeue is resolved by queue membership at the
    /// time it is processed; if arbitration already promoted the player,
    /// the cancel is a no-op.
    fn cancel_request<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, player: Id, tunnel_finder: &F) {
        if self.session_state != SessionState::Running {
            return;
        }

        if self.reset_player_request(player) {
            self.update_num_pending(tunnel_finder);
        }
    }

    /// Registers a helper connection for a specific microphone slot
    ///
    /// Rejected silently when the slot index is out of range, the slot is
    /// already occupied, or this connection already registered. A fresh
    /// registration immediately re-runs arbitration, since the new helper
    /// may serve a waiting queue.
    fn register_helper<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        helper: Id,
        mic: usize,
        tunnel_finder: &F,
    ) {
        let Some(helper_value) = self.watchers.get_helper_value(helper) else {
            return;
        };

        if helper_value.mic.is_some() {
            return;
        }

        match self.helpers.get_mut(mic) {
            Some(slot) if slot.is_none() => *slot = Some(helper),
            _ => return,
        }

        self.free_mics.insert(mic);
        self.watchers.update_watcher_value(
            helper,
            Value::Helper(HelperValue {
                mic: Some(mic),
                player: None,
            }),
        );

        self.publish(
            params::UpdateMessage::MicState {
                mic,
                state: MicState::Idle,
            },
            tunnel_finder,
        );
        self.handle_requests(tunnel_finder);
        self.update_num_pending(tunnel_finder);
    }

    /// Hand-raise arbitration: promotes the queue head when possible
    ///
    /// Preconditions: session running, queue non-empty, at least one free
    /// helper, no current hand-up. With exactly one free helper the claim
    /// is resolved directly with no compete broadcast; with more than one
    /// the helpers race and the first claim to arrive wins.
    fn handle_requests<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: &F) {
        if self.session_state != SessionState::Running
            || self.free_mics.is_empty()
            || self.hand_up.is_some()
        {
            return;
        }

        let Some(player) = self.requests.pop_front() else {
            return;
        };

        self.watchers
            .send_message(&UpdateMessage::RaiseHand.into(), player, tunnel_finder);
        self.set_player(player, Phase::HandUp, None);
        self.hand_up = Some(player);
        self.claim_open = true;

        if self.free_mics.len() > 1 {
            self.broadcast_helpers(&UpdateMessage::CompeteForSpeaker.into(), tunnel_finder);
        } else if let Some(helper) = self
            .free_mics
            .iter()
            .next()
            .and_then(|mic| self.helpers.get(*mic).copied().flatten())
        {
            self.claim_speaker(player, helper, tunnel_finder);
        }
    }

    /// A helper's claim on the current hand-up
    ///
    /// Guarded on the claimant being a registered, free helper and a
    /// hand-up being present; stale or racing claims fall through to
    /// [`Coordinator::claim_speaker`]'s `claim_open` guard.
    fn claim_current<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, helper: Id, tunnel_finder: &F) {
        let Some(player) = self.hand_up else {
            return;
        };

        let Some(helper_value) = self.watchers.get_helper_value(helper) else {
            return;
        };

        let Some(mic) = helper_value.mic else {
            return;
        };

        if helper_value.player.is_some() || !self.free_mics.contains(&mic) {
            return;
        }

        self.claim_speaker(player, helper, tunnel_finder);
    }

    /// Claim resolution: binds the winning helper to the hand-up player
    ///
    /// The first claim closes the negotiation; later claims are silent
    /// no-ops (losing competitors). The assignment broadcast carries the
    /// winning slot index so every helper can determine win or loss and
    /// self-reset on loss.
    fn claim_speaker<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        player: Id,
        helper: Id,
        tunnel_finder: &F,
    ) {
        if !self.claim_open {
            return;
        }

        let Some(mic) = self.watchers.get_helper_value(helper).and_then(|h| h.mic) else {
            return;
        };

        self.claim_open = false;

        self.set_player(player, Phase::HandUp, Some(mic));
        self.watchers.update_watcher_value(
            helper,
            Value::Helper(HelperValue {
                mic: Some(mic),
                player: Some(player),
            }),
        );
        self.free_mics.remove(&mic);

        self.publish(
            params::UpdateMessage::MicState {
                mic,
                state: MicState::HandOut,
            },
            tunnel_finder,
        );
        self.broadcast_helpers(
            &UpdateMessage::AssignSpeaker(Assignment::Assigned(mic)).into(),
            tunnel_finder,
        );
    }

    /// The bound helper confirms its player has the microphone
    ///
    /// Moves the player from the hand-raise into the speaker queue. The
    /// hand-up slot is free again even though the helper is still busy, so
    /// arbitration re-runs immediately.
    fn speaker_ready<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, helper: Id, tunnel_finder: &F) {
        let Some(helper_value) = self.watchers.get_helper_value(helper) else {
            return;
        };

        let (Some(mic), Some(player)) = (helper_value.mic, helper_value.player) else {
            return;
        };

        if self.hand_up != Some(player) {
            return;
        }

        self.speakers.push_back(player);
        self.hand_up = None;
        self.set_player(player, Phase::Ready, Some(mic));

        self.publish(
            params::UpdateMessage::MicState {
                mic,
                state: MicState::Ready,
            },
            tunnel_finder,
        );
        self.watchers
            .send_message(&UpdateMessage::GetReady.into(), player, tunnel_finder);

        self.handle_requests(tunnel_finder);
        self.handle_speakers(tunnel_finder);
        self.update_num_pending(tunnel_finder);
    }

    /// On-air scheduler: promotes the next speaker when the slot is empty
    ///
    /// The promoted player should always still have a bound helper under
    /// normal operation; the check is defensive only, and the slot is
    /// occupied either way. A stopped session with nothing left in flight
    /// escalates itself to `End`.
    fn handle_speakers<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: &F) {
        if self.on_air.is_none() {
            if let Some(player) = self.speakers.pop_front() {
                let mic = self.watchers.get_player_value(player).and_then(|p| p.mic);

                if let Some(mic) = mic {
                    if let Some(helper) = self.helpers.get(mic).copied().flatten() {
                        self.watchers.send_message(
                            &UpdateMessage::SpeakNow.into(),
                            player,
                            tunnel_finder,
                        );
                        self.watchers.send_message(
                            &UpdateMessage::SpeakerOnAir.into(),
                            helper,
                            tunnel_finder,
                        );
                        self.publish(
                            params::UpdateMessage::MicState {
                                mic,
                                state: MicState::OnAir,
                            },
                            tunnel_finder,
                        );

                        let question = self.questions.draw();
                        self.publish(
                            params::UpdateMessage::CurrentQuestion(question),
                            tunnel_finder,
                        );
                    }
                }

                self.set_player(player, Phase::Speaking, mic);
                self.on_air = Some(player);
            } else if self.hand_up.is_none() && self.session_state == SessionState::Stop {
                // nothing left in flight: the stopped session is over
                self.session_state = SessionState::End;
                self.publish(
                    params::UpdateMessage::SessionState(SessionState::End),
                    tunnel_finder,
                );
            }
        }

        self.update_num_pending(tunnel_finder);
    }

    /// The bound helper confirms the on-air player finished speaking
    fn speaker_done<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, helper: Id, tunnel_finder: &F) {
        let Some(player) = self
            .watchers
            .get_helper_value(helper)
            .and_then(|h| h.player)
        else {
            return;
        };

        if self.on_air != Some(player) {
            return;
        }

        self.terminate_speaker(player, helper, tunnel_finder);
    }

    /// Clears the on-air slot, frees the helper and re-runs the schedulers
    fn terminate_speaker<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        player: Id,
        helper: Id,
        tunnel_finder: &F,
    ) {
        self.reset_player_speaking(player, false, tunnel_finder);
        self.watchers
            .send_message(&UpdateMessage::Reset.into(), player, tunnel_finder);

        self.reset_helper(helper, false, tunnel_finder);

        self.handle_requests(tunnel_finder);
        self.handle_speakers(tunnel_finder);
        self.update_num_pending(tunnel_finder);
    }

    /// Removes a player from the request queue, if present
    fn reset_player_request(&mut self, player: Id) -> bool {
        let Some(queue_index) = self.requests.iter().position(|id| *id == player) else {
            return false;
        };

        self.requests.remove(queue_index);
        self.set_player(player, Phase::Idle, None);
        true
    }

    /// Clears the hand-raise, if this player holds it
    ///
    /// With a bound helper the helper is reset; with the claim still open
    /// a `NoWinner` assignment unwinds any helpers mid-competition.
    fn reset_player_hand_up<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        player: Id,
        reset_helper: bool,
        tunnel_finder: &F,
    ) -> bool {
        if self.hand_up != Some(player) {
            return false;
        }

        self.hand_up = None;
        self.claim_open = false;

        if reset_helper {
            if let Some(helper) = self.bound_helper(player) {
                self.reset_helper(helper, true, tunnel_finder);
            } else {
                self.broadcast_helpers(
                    &UpdateMessage::AssignSpeaker(Assignment::NoWinner).into(),
                    tunnel_finder,
                );
            }
        }

        self.set_player(player, Phase::Idle, None);
        true
    }

    /// Removes a player from the speaker queue, if present
    fn reset_player_ready<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        player: Id,
        reset_helper: bool,
        tunnel_finder: &F,
    ) -> bool {
        let Some(queue_index) = self.speakers.iter().position(|id| *id == player) else {
            return false;
        };

        self.speakers.remove(queue_index);

        if reset_helper {
            if let Some(helper) = self.bound_helper(player) {
                self.reset_helper(helper, true, tunnel_finder);
            }
        }

        self.set_player(player, Phase::Idle, None);
        true
    }

    /// Clears the on-air slot and published question, if this player holds it
    fn reset_player_speaking<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        player: Id,
        reset_helper: bool,
        tunnel_finder: &F,
    ) -> bool {
        if self.on_air != Some(player) {
            return false;
        }

        self.on_air = None;
        self.publish(
            params::UpdateMessage::CurrentQuestion(String::new()),
            tunnel_finder,
        );

        if reset_helper {
            if let Some(helper) = self.bound_helper(player) {
                self.reset_helper(helper, true, tunnel_finder);
            }
        }

        self.set_player(player, Phase::Idle, None);
        true
    }

    /// Releases a player from whichever structure holds it
    ///
    /// A player occupies at most one of the request queue, hand-raise,
    /// speaker queue and on-air slot, so removal stops at the first hit,
    /// in that priority order. After a removal both schedulers re-run.
    fn reset_player<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        player: Id,
        reset_helper: bool,
        tunnel_finder: &F,
    ) {
        let has_reset = self.reset_player_request(player)
            || self.reset_player_hand_up(player, reset_helper, tunnel_finder)
            || self.reset_player_ready(player, reset_helper, tunnel_finder)
            || self.reset_player_speaking(player, reset_helper, tunnel_finder);

        if has_reset {
            self.handle_requests(tunnel_finder);
            self.handle_speakers(tunnel_finder);
            self.update_num_pending(tunnel_finder);
        }
    }

    /// Returns a helper to the free set and publishes its idle state
    ///
    /// Also clears the bound player's side of the binding if it still
    /// points at this slot, keeping the binding symmetric.
    fn reset_helper<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        helper: Id,
        reset_client: bool,
        tunnel_finder: &F,
    ) {
        let Some(helper_value) = self.watchers.get_helper_value(helper) else {
            return;
        };

        let Some(mic) = helper_value.mic else {
            return;
        };

        if let Some(player) = helper_value.player {
            if let Some(player_value) = self.watchers.get_player_value(player) {
                if player_value.mic == Some(mic) {
                    self.set_player(player, player_value.phase, None);
                }
            }
        }

        self.watchers.update_watcher_value(
            helper,
            Value::Helper(HelperValue {
                mic: Some(mic),
                player: None,
            }),
        );

        self.publish(
            params::UpdateMessage::MicState {
                mic,
                state: MicState::Idle,
            },
            tunnel_finder,
        );

        if reset_client {
            self.watchers
                .send_message(&UpdateMessage::Reset.into(), helper, tunnel_finder);
        }

        self.free_mics.insert(mic);
    }

    /// Handles a registered helper's disconnect
    ///
    /// Frees the slot and resets its player without re-signaling the gone
    /// helper. If the departing helper was the sole free helper for an
    /// open claim, the claim is cancelled and a `NoWinner` assignment
    /// unwinds the negotiation.
    fn exit_helper<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        helper: Id,
        helper_value: HelperValue,
        tunnel_finder: &F,
    ) {
        let Some(mic) = helper_value.mic else {
            return;
        };

        if self.helpers.get(mic) != Some(&Some(helper)) {
            return;
        }

        self.helpers[mic] = None;
        self.free_mics.remove(&mic);

        if let Some(player) = helper_value.player {
            self.watchers
                .send_message(&UpdateMessage::Reset.into(), player, tunnel_finder);
            self.reset_player(player, false, tunnel_finder);
        } else if self.claim_open && self.free_mics.is_empty() {
            if let Some(player) = self.hand_up {
                self.claim_open = false;
                self.broadcast_helpers(
                    &UpdateMessage::AssignSpeaker(Assignment::NoWinner).into(),
                    tunnel_finder,
                );
                self.watchers
                    .send_message(&UpdateMessage::Reset.into(), player, tunnel_finder);
                self.reset_player(player, false, tunnel_finder);
            }
        }

        self.publish(
            params::UpdateMessage::MicState {
                mic,
                state: MicState::Absent,
            },
            tunnel_finder,
        );
        self.handle_requests(tunnel_finder);
        self.update_num_pending(tunnel_finder);
    }

    /// Re-publishes the pending count when it changed
    ///
    /// Pending counts the request queue, the speaker queue and the
    /// hand-up. This counter is the only published value deduplicated
    /// against its last published state.
    fn update_num_pending<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: &F) {
        let num_pending =
            self.requests.len() + self.speakers.len() + usize::from(self.hand_up.is_some());

        if num_pending != self.params.pending_count() {
            self.publish(
                params::UpdateMessage::PendingCount(num_pending),
                tunnel_finder,
            );
        }
    }

    /// Applies an operator-driven session state transition
    ///
    /// An unchanged value is a no-op. `Pre` and `Running` fully reset all
    /// coordination structures; `Stop` clears only the request queue while
    /// in-flight hand-up, ready and speaking players continue to
    /// completion. After the transition the on-air scheduler re-runs,
    /// which may escalate an idle `Stop` straight to `End`.
    pub fn set_session_state<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        value: SessionState,
        tunnel_finder: F,
    ) {
        if value == self.session_state {
            return;
        }

        match value {
            SessionState::Pre | SessionState::Running => self.reset_all(&tunnel_finder),
            SessionState::Stop => self.reset_requests(),
            // a session ends after winding down, never straight from live
            SessionState::End => {
                if self.session_state != SessionState::Stop {
                    return;
                }
            }
        }

        self.session_state = value;
        self.publish(
            params::UpdateMessage::SessionState(value),
            &tunnel_finder,
        );

        self.handle_speakers(&tunnel_finder);
    }

    /// Selects the category questions are drawn from and publishes it
    ///
    /// An unknown category name is a silent no-op; valid categories are
    /// enforced at startup when the bank is built.
    pub fn set_question_category<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &mut self,
        category: &str,
        tunnel_finder: F,
    ) {
        if self.questions.select(category).is_ok() {
            self.publish(
                params::UpdateMessage::QuestionCategory(category.to_owned()),
                &tunnel_finder,
            );
        }
    }

    /// Clears the request queue, returning queued players to idle
    fn reset_requests(&mut self) {
        let queued = std::mem::take(&mut self.requests);
        for player in queued {
            self.set_player(player, Phase::Idle, None);
        }
    }

    /// Fully resets all coordination structures
    ///
    /// Clears both queues, the hand-raise and the on-air slot, returns
    /// every player to idle and every registered helper to idle-free, and
    /// publishes each helper's display state as idle.
    fn reset_all<T: Tunnel, F: Fn(Id) -> Option<T>>(&mut self, tunnel_finder: &F) {
        self.reset_requests();

        let speakers = std::mem::take(&mut self.speakers);
        for player in speakers {
            self.set_player(player, Phase::Idle, None);
        }

        if let Some(player) = self.hand_up.take() {
            self.set_player(player, Phase::Idle, None);
        }
        self.claim_open = false;

        if let Some(player) = self.on_air.take() {
            self.set_player(player, Phase::Idle, None);
            self.publish(
                params::UpdateMessage::CurrentQuestion(String::new()),
                tunnel_finder,
            );
        }

        self.free_mics.clear();
        for mic in 0..self.helpers.len() {
            if let Some(helper) = self.helpers[mic] {
                self.reset_helper(helper, false, tunnel_finder);
            }
        }
    }

    /// Returns the message necessary to synchronize a participant's state
    ///
    /// Players and helpers get their own coordination state; displays and
    /// controllers get a snapshot of all published values.
    pub fn state_message(&self, watcher_id: Id, watcher_kind: ValueKind) -> crate::SyncMessage {
        match watcher_kind {
            ValueKind::Player => {
                let player_value = self.watchers.get_player_value(watcher_id).unwrap_or_default();
                SyncMessage::Player {
                    phase: player_value.phase,
                    mic: player_value.mic,
                }
                .into()
            }
            ValueKind::Helper => {
                let helper_value = self.watchers.get_helper_value(watcher_id).unwrap_or_default();
                SyncMessage::Helper {
                    mic: helper_value.mic,
                    claim_open: self.claim_open,
                }
                .into()
            }
            ValueKind::Display | ValueKind::Controller => {
                params::SyncMessage::Snapshot(self.params.snapshot()).into()
            }
        }
    }

    /// Re-synchronizes a reconnecting participant's view
    pub fn update_session<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(watcher_value) = self.watchers.get_watcher_value(watcher_id) else {
            return;
        };

        self.watchers.send_state(
            &self.state_message(watcher_id, watcher_value.kind()),
            watcher_id,
            tunnel_finder,
        );
    }
}
