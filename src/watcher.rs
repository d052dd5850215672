//! Connected client management
//!
//! This module manages the connections and state of all participants in a
//! live session: players competing for a microphone, helpers operating the
//! physical microphones, displays and the operator controller. It provides
//! functionality for tracking participant roles, sending messages, and
//! managing the overall participant lifecycle.

use std::{
    collections::{HashMap, HashSet},
    fmt::Display,
    str::FromStr,
};

use enum_map::{Enum, EnumMap};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use thiserror::Error;
use uuid::Uuid;

use super::{SyncMessage, UpdateMessage, session::Tunnel};

/// A unique identifier for participants in the session
///
/// Each participant (player, helper, display or controller) gets a unique
/// ID that persists throughout their participation in the session.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, DeserializeFromStr, SerializeDisplay,
)]
pub struct Id(Uuid);

impl Id {
    /// Creates a new random participant ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for Id {
    /// Creates a new random participant ID (same as `new()`)
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Id {
    /// Formats the ID as a UUID string
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    /// Parses an ID from a UUID string
    ///
    /// # Errors
    ///
    /// Returns a `uuid::Error` if the string is not a valid UUID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::from_str(s)?))
    }
}

/// The lifecycle phase of a player
///
/// A player moves through these phases as it requests a microphone, gets
/// a hand raised by arbitration, is claimed by a helper, and finally
/// speaks. The coordinator is the only writer of this state; a player
/// occupies at most one of the coordinator's structures at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Phase {
    /// Connected, not requesting a microphone
    #[default]
    Idle,
    /// Waiting in the request queue
    Queued,
    /// Promoted by arbitration, waiting for a helper's claim
    HandUp,
    /// Claimed by a helper, waiting for the on-air slot
    Ready,
    /// Currently on air
    Speaking,
}

/// Player-specific state
///
/// Tracks the player's lifecycle phase and, once a helper has claimed
/// them, the microphone slot they are bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct PlayerValue {
    /// The player's current lifecycle phase
    pub phase: Phase,
    /// The microphone slot of the helper bound to this player, if any
    pub mic: Option<usize>,
}

/// Helper-specific state
///
/// A helper connection starts unregistered and later claims a specific
/// microphone slot. Once bound to a player, the binding is symmetric with
/// the player's `mic` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct HelperValue {
    /// The microphone slot this helper registered for, if any
    pub mic: Option<usize>,
    /// The player this helper is currently bound to, if any
    pub player: Option<Id>,
}

/// Represents the role and state of a participant in the session
///
/// This enum distinguishes between different participant types,
/// determining what actions they can perform and what information
/// they receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// An audience member competing for a microphone
    Player(PlayerValue),
    /// A client operating a physical microphone
    Helper(HelperValue),
    /// A passive client showing the published session values
    Display,
    /// The operator client driving session state and question category
    Controller,
}

/// The kind of participant without associated data
///
/// This enum represents just the discriminant of the Value enum,
/// useful for pattern matching and filtering participants by role
/// without needing the associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
pub enum ValueKind {
    /// A session player
    Player,
    /// A microphone helper
    Helper,
    /// A display client
    Display,
    /// The operator controller
    Controller,
}

impl Value {
    /// Returns the kind of this value without the associated data
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Player(_) => ValueKind::Player,
            Value::Helper(_) => ValueKind::Helper,
            Value::Display => ValueKind::Display,
            Value::Controller => ValueKind::Controller,
        }
    }
}

/// Serialization helper for Watchers struct
#[derive(Deserialize)]
struct WatchersSerde {
    mapping: HashMap<Id, Value>,
}

/// Manages all participants (watchers) in a session
///
/// This struct tracks all connected participants, their roles, and provides
/// functionality for sending messages and organizing participants by role.
/// The coordinator owns it exclusively; no external actor mutates it.
#[derive(Default, Serialize, Deserialize)]
#[serde(from = "WatchersSerde")]
pub struct Watchers {
    /// Primary mapping from participant ID to their value/state
    mapping: HashMap<Id, Value>,

    /// Reverse mapping organized by participant role for efficient filtering
    #[serde(skip_serializing)]
    reverse_mapping: EnumMap<ValueKind, HashSet<Id>>,
}

impl From<WatchersSerde> for Watchers {
    /// Reconstructs the Watchers struct from serialized data
    ///
    /// This rebuilds the reverse mapping from the primary mapping,
    /// which is necessary since the reverse mapping is not serialized.
    fn from(serde: WatchersSerde) -> Self {
        let WatchersSerde { mapping } = serde;
        let mut reverse_mapping: EnumMap<ValueKind, HashSet<Id>> = EnumMap::default();
        for (id, value) in mapping.iter() {
            reverse_mapping[value.kind()].insert(*id);
        }
        Self {
            mapping,
            reverse_mapping,
        }
    }
}

/// Errors that can occur when managing watchers
#[derive(Error, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The session has reached the maximum number of allowed clients
    #[error("maximum number of clients reached")]
    MaximumClients,
}

impl Watchers {
    /// Gets a vector of all participants with their tunnels and values
    ///
    /// # Arguments
    ///
    /// * `tunnel_finder` - Function to retrieve the tunnel for a given ID
    ///
    /// # Returns
    ///
    /// Vector of tuples containing (ID, Tunnel, Value) for all participants
    /// with active tunnels
    pub fn vec<T: Tunnel, F: Fn(Id) -> Option<T>>(&self, tunnel_finder: F) -> Vec<(Id, T, Value)> {
        self.reverse_mapping
            .values()
            .flat_map(|v| v.iter())
            .filter_map(|x| match (tunnel_finder(*x), self.mapping.get(x)) {
                (Some(t), Some(v)) => Some((*x, t, v.to_owned())),
                _ => None,
            })
            .collect_vec()
    }

    /// Gets a vector of participants of a specific role with their tunnels and values
    ///
    /// # Arguments
    ///
    /// * `filter` - The role of participants to include
    /// * `tunnel_finder` - Function to retrieve the tunnel for a given ID
    pub fn specific_vec<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        filter: ValueKind,
        tunnel_finder: F,
    ) -> Vec<(Id, T, Value)> {
        self.reverse_mapping[filter]
            .iter()
            .filter_map(|x| match (tunnel_finder(*x), self.mapping.get(x)) {
                (Some(t), Some(v)) => Some((*x, t, v.to_owned())),
                _ => None,
            })
            .collect_vec()
    }

    /// Gets the count of participants of a specific role
    pub fn specific_count(&self, filter: ValueKind) -> usize {
        self.reverse_mapping[filter].len()
    }

    /// Adds a new watcher to the session
    ///
    /// # Arguments
    ///
    /// * `watcher_id` - The unique ID for the new watcher
    /// * `watcher_value` - The value/role for the new watcher
    ///
    /// # Errors
    ///
    /// Returns `Error::MaximumClients` if adding this watcher would exceed
    /// the maximum allowed number of participants.
    pub fn add_watcher(&mut self, watcher_id: Id, watcher_value: Value) -> Result<(), Error> {
        let kind = watcher_value.kind();

        if self.mapping.len() >= crate::constants::session::MAX_CLIENT_COUNT {
            return Err(Error::MaximumClients);
        }

        self.mapping.insert(watcher_id, watcher_value);
        self.reverse_mapping[kind].insert(watcher_id);

        Ok(())
    }

    /// Removes a watcher from the session entirely
    ///
    /// Disconnects are lifecycle events, not errors; removing an unknown
    /// watcher is a no-op.
    ///
    /// # Arguments
    ///
    /// * `watcher_id` - The ID of the watcher to remove
    ///
    /// # Returns
    ///
    /// The removed watcher's value, if it existed
    pub fn remove_watcher(&mut self, watcher_id: Id) -> Option<Value> {
        let value = self.mapping.remove(&watcher_id)?;
        self.reverse_mapping[value.kind()].remove(&watcher_id);
        Some(value)
    }

    /// Updates the value/role of an existing watcher
    ///
    /// This method properly handles moving the watcher between different
    /// role categories if their role changes.
    ///
    /// # Arguments
    ///
    /// * `watcher_id` - The ID of the watcher to update
    /// * `watcher_value` - The new value/role for the watcher
    pub fn update_watcher_value(&mut self, watcher_id: Id, watcher_value: Value) {
        let old_kind = match self.mapping.get(&watcher_id) {
            Some(v) => v.kind(),
            _ => return,
        };
        let new_kind = watcher_value.kind();
        if old_kind != new_kind {
            self.reverse_mapping[old_kind].remove(&watcher_id);
            self.reverse_mapping[new_kind].insert(watcher_id);
        }
        self.mapping.insert(watcher_id, watcher_value);
    }

    /// Gets the value/role of a specific watcher
    pub fn get_watcher_value(&self, watcher_id: Id) -> Option<Value> {
        self.mapping.get(&watcher_id).map(|v| v.to_owned())
    }

    /// Checks if a watcher exists in the session
    pub fn has_watcher(&self, watcher_id: Id) -> bool {
        self.mapping.contains_key(&watcher_id)
    }

    /// Gets the player state of a watcher, if it is a player
    pub fn get_player_value(&self, watcher_id: Id) -> Option<PlayerValue> {
        match self.mapping.get(&watcher_id) {
            Some(Value::Player(player_value)) => Some(*player_value),
            _ => None,
        }
    }

    /// Gets the helper state of a watcher, if it is a helper
    pub fn get_helper_value(&self, watcher_id: Id) -> Option<HelperValue> {
        match self.mapping.get(&watcher_id) {
            Some(Value::Helper(helper_value)) => Some(*helper_value),
            _ => None,
        }
    }

    /// Sends an update message to a specific watcher
    ///
    /// # Arguments
    ///
    /// * `message` - The update message to send
    /// * `watcher_id` - The ID of the watcher to send to
    /// * `tunnel_finder` - Function to retrieve the tunnel for the watcher
    pub fn send_message<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &UpdateMessage,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(watcher_id) else {
            return;
        };

        session.send_message(message);
    }

    /// Sends a state synchronization message to a specific watcher
    ///
    /// # Arguments
    ///
    /// * `message` - The sync message to send
    /// * `watcher_id` - The ID of the watcher to send to
    /// * `tunnel_finder` - Function to retrieve the tunnel for the watcher
    pub fn send_state<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        message: &SyncMessage,
        watcher_id: Id,
        tunnel_finder: F,
    ) {
        let Some(session) = tunnel_finder(watcher_id) else {
            return;
        };

        session.send_state(message);
    }

    /// Sends personalized messages to all watchers using a sender function
    ///
    /// The sender function is called for each watcher and can return different
    /// messages based on the watcher's ID and role, or None to skip sending.
    ///
    /// # Arguments
    ///
    /// * `sender` - Function that generates messages for each watcher
    /// * `tunnel_finder` - Function to retrieve tunnels for watchers
    pub fn announce_with<S, T: Tunnel, F: Fn(Id) -> Option<T>>(&self, sender: S, tunnel_finder: F)
    where
        S: Fn(Id, ValueKind) -> Option<super::UpdateMessage>,
    {
        for (watcher, session, v) in self.vec(tunnel_finder) {
            let Some(message) = sender(watcher, v.kind()) else {
                continue;
            };

            session.send_message(&message);
        }
    }

    /// Sends an update message to all watchers of a specific role
    ///
    /// # Arguments
    ///
    /// * `filter` - The role of watchers to send to
    /// * `message` - The update message to send
    /// * `tunnel_finder` - Function to retrieve tunnels for watchers
    pub fn announce_specific<T: Tunnel, F: Fn(Id) -> Option<T>>(
        &self,
        filter: ValueKind,
        message: &super::UpdateMessage,
        tunnel_finder: F,
    ) {
        for (_, session, _) in self.specific_vec(filter, tunnel_finder) {
            session.send_message(message);
        }
    }
}
