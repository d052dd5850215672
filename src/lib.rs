//! # OpenMic Coordination Library
//!
//! This library provides the server-side coordination logic for a live
//! audience-participation speaking session. Audience members request a turn
//! at a microphone from their phones, stage helpers carry microphones into
//! the crowd, and a single speaker at a time is put on air and posed a
//! question drawn from a non-repeating question bank.
//!
//! The crate is transport-agnostic: the embedder owns the sockets and hands
//! the coordinator a way to reach each connected client through the
//! [`session::Tunnel`] trait.

#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::ignored_unit_patterns)]
#![allow(clippy::doc_markdown)]
use serde::Serialize;

pub mod constants;

pub mod coordinator;
pub mod params;
pub mod questions;
pub mod session;
pub mod watcher;

/// Messages sent to re-synchronize a client's full view of the session
///
/// A sync message carries everything a freshly connected or reconnecting
/// client of its role needs; incremental changes arrive as
/// [`UpdateMessage`]s afterwards.
#[derive(Debug, Serialize, Clone, derive_more::From)]
pub enum SyncMessage {
    /// Player and helper coordination state
    Coordinator(coordinator::SyncMessage),
    /// Snapshot of all published display values
    Params(params::SyncMessage),
}

impl SyncMessage {
    /// Converts the sync message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

/// Messages sent to notify clients about individual session changes
///
/// Coordination messages drive the player and helper state machines;
/// params messages keep displays and controllers current.
#[derive(Debug, Serialize, Clone, derive_more::From)]
pub enum UpdateMessage {
    /// Coordination signals for players and helpers
    Coordinator(coordinator::UpdateMessage),
    /// Published value changes for displays and controllers
    Params(params::UpdateMessage),
}

impl UpdateMessage {
    /// Converts the update message to a JSON string for transmission
    ///
    /// # Panics
    ///
    /// This method panics if serialization fails, which should never happen
    /// with the default JSON serializer for well-formed data.
    pub fn to_message(&self) -> String {
        serde_json::to_string(self).expect("default serializer cannot fail")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_update_message_to_message() {
        let update_msg = UpdateMessage::Coordinator(coordinator::UpdateMessage::RaiseHand);
        let json_str = update_msg.to_message();

        assert!(json_str.contains("Coordinator"));
        assert!(json_str.contains("RaiseHand"));
    }

    #[test]
    fn test_params_update_message_to_message() {
        let update_msg = UpdateMessage::Params(params::UpdateMessage::MicState {
            mic: 2,
            state: params::MicState::OnAir,
        });
        let json_str = update_msg.to_message();

        assert!(json_str.contains("MicState"));
        assert!(json_str.contains("on-air"));
    }

    #[test]
    fn test_sync_message_to_message() {
        let sync_msg = SyncMessage::Coordinator(coordinator::SyncMessage::Player {
            phase: watcher::Phase::Queued,
            mic: None,
        });
        let json_str = sync_msg.to_message();

        assert!(json_str.contains("Player"));
        assert!(json_str.contains("Queued"));
    }
}
