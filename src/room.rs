//! Room / channel substrate
//!
//! The hosted chat platform is an external collaborator; the hub only needs
//! `send` and a per-room subscription. [`RoomTransport`] is that seam, and
//! [`InMemoryRooms`] is a faithful in-process stand-in: named rooms with a
//! fixed participant set, FIFO delivery within a room, nothing across rooms.

use crate::config::HubConfig;
use crate::error::{Error, Result};
use crate::types::RoomId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc;

/// A message as delivered to room subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomMessage {
    /// Room the message was posted in
    pub room: RoomId,
    /// Handle of the posting participant
    pub sender: String,
    /// Textual body
    pub content: String,
    /// Handles explicitly addressed
    pub mentions: Vec<String>,
    /// Delivery timestamp
    pub sent_at: DateTime<Utc>,
}

impl RoomMessage {
    /// Whether the message names `handle` among its mentions
    pub fn mentions(&self, handle: &str) -> bool {
        self.mentions.iter().any(|m| m == handle)
    }
}

/// A message about to be posted
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Handle of the posting participant
    pub sender: String,
    /// Textual body
    pub content: String,
    /// Handles explicitly addressed
    pub mentions: Vec<String>,
}

impl OutboundMessage {
    /// Create an unaddressed message
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            mentions: Vec::new(),
        }
    }

    /// Address the message to a participant
    pub fn with_mention(mut self, handle: impl Into<String>) -> Self {
        self.mentions.push(handle.into());
        self
    }
}

/// Send/subscribe access to the chat substrate
#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// Post a message to a room
    async fn send(&self, room: &RoomId, message: OutboundMessage) -> Result<()>;

    /// Receive every message posted to `room` from now on, in order
    async fn subscribe(&self, room: &RoomId, participant: &str)
        -> Result<mpsc::UnboundedReceiver<RoomMessage>>;
}

#[derive(Default)]
struct RoomState {
    participants: BTreeSet<String>,
    subscribers: Vec<mpsc::UnboundedSender<RoomMessage>>,
    history: Vec<RoomMessage>,
    unreachable: bool,
}

/// In-process rooms
#[derive(Default)]
pub struct InMemoryRooms {
    rooms: Mutex<HashMap<RoomId, RoomState>>,
}

impl InMemoryRooms {
    /// Create an empty substrate
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision the hub-and-spoke topology described by `config`: one
    /// customer room and one room per specialist, each shared with the
    /// orchestrator only.
    pub fn from_config(config: &HubConfig, customer: &str) -> Self {
        let rooms = Self::new();
        rooms.create_room(
            config.customer_room.clone(),
            [customer.to_string(), config.orchestrator.clone()],
        );
        for registration in config.specialists.values() {
            rooms.create_room(
                registration.room.clone(),
                [config.orchestrator.clone(), registration.handle.clone()],
            );
        }
        rooms
    }

    /// Create (or reset the participants of) a room
    pub fn create_room<I, S>(&self, room: RoomId, participants: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut rooms = self.rooms.lock();
        let state = rooms.entry(room).or_default();
        state.participants = participants.into_iter().map(Into::into).collect();
    }

    /// Make a room refuse (or accept again) every send
    pub fn set_reachable(&self, room: &RoomId, reachable: bool) {
        if let Some(state) = self.rooms.lock().get_mut(room) {
            state.unreachable = !reachable;
        }
    }

    /// Everything posted to a room so far
    pub fn history(&self, room: &RoomId) -> Vec<RoomMessage> {
        self.rooms
            .lock()
            .get(room)
            .map(|state| state.history.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RoomTransport for InMemoryRooms {
    async fn send(&self, room: &RoomId, message: OutboundMessage) -> Result<()> {
        let mut rooms = self.rooms.lock();
        let state = rooms
            .get_mut(room)
            .ok_or_else(|| Error::room(room.as_str(), "unknown room"))?;

        if state.unreachable {
            return Err(Error::room(room.as_str(), "room is unreachable"));
        }
        if !state.participants.contains(&message.sender) {
            return Err(Error::room(
                room.as_str(),
                format!("{} is not a participant", message.sender),
            ));
        }
        if let Some(stranger) = message
            .mentions
            .iter()
            .find(|handle| !state.participants.contains(*handle))
        {
            return Err(Error::room(
                room.as_str(),
                format!("cannot mention {}: not a participant", stranger),
            ));
        }

        let delivered = RoomMessage {
            room: room.clone(),
            sender: message.sender,
            content: message.content,
            mentions: message.mentions,
            sent_at: Utc::now(),
        };
        state
            .subscribers
            .retain(|subscriber| subscriber.send(delivered.clone()).is_ok());
        state.history.push(delivered);
        Ok(())
    }

    async fn subscribe(
        &self,
        room: &RoomId,
        participant: &str,
    ) -> Result<mpsc::UnboundedReceiver<RoomMessage>> {
        let mut rooms = self.rooms.lock();
        let state = rooms
            .get_mut(room)
            .ok_or_else(|| Error::room(room.as_str(), "unknown room"))?;
        if !state.participants.contains(participant) {
            return Err(Error::room(
                room.as_str(),
                format!("{} is not a participant", participant),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    fn rooms() -> (InMemoryRooms, RoomId) {
        let rooms = InMemoryRooms::new();
        let room = RoomId::new("room-excel");
        rooms.create_room(room.clone(), ["SupportOrchestrator", "ExcelAgent"]);
        (rooms, room)
    }

    #[tokio::test]
    async fn test_delivery_is_fifo_within_a_room() {
        let (rooms, room) = rooms();
        let mut rx = rooms.subscribe(&room, "ExcelAgent").await.unwrap();

        for i in 0..5 {
            rooms
                .send(&room, OutboundMessage::new("SupportOrchestrator", format!("m{}", i)))
                .await
                .unwrap();
        }

        for i in 0..5 {
            let msg = rx.recv().await.unwrap();
            assert_eq!(msg.content, format!("m{}", i));
            assert_eq!(msg.sender, "SupportOrchestrator");
        }
        assert_eq!(rooms.history(&room).len(), 5);
    }

    #[tokio::test]
    async fn test_sender_sees_own_messages() {
        let (rooms, room) = rooms();
        let mut rx = rooms.subscribe(&room, "ExcelAgent").await.unwrap();
        rooms
            .send(&room, OutboundMessage::new("ExcelAgent", "hello").with_mention("SupportOrchestrator"))
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.sender, "ExcelAgent");
        assert!(msg.mentions("SupportOrchestrator"));
    }

    #[tokio::test]
    async fn test_rejects_strangers_and_unknown_rooms() {
        let (rooms, room) = rooms();
        assert_err!(rooms.send(&room, OutboundMessage::new("Mallory", "hi")).await);
        assert_err!(
            rooms
                .send(&room, OutboundMessage::new("ExcelAgent", "hi").with_mention("LinearAgent"))
                .await
        );
        assert_err!(
            rooms
                .send(&RoomId::new("nowhere"), OutboundMessage::new("ExcelAgent", "hi"))
                .await
        );
        assert_err!(rooms.subscribe(&room, "Mallory").await);
    }

    #[tokio::test]
    async fn test_unreachable_room_refuses_sends() {
        let (rooms, room) = rooms();
        rooms.set_reachable(&room, false);
        let err = rooms
            .send(&room, OutboundMessage::new("SupportOrchestrator", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Room { .. }));

        rooms.set_reachable(&room, true);
        rooms
            .send(&room, OutboundMessage::new("SupportOrchestrator", "hi"))
            .await
            .unwrap();
    }

    #[test]
    fn test_topology_from_config() {
        let config = HubConfig::default();
        let rooms = InMemoryRooms::from_config(&config, "customer");
        let guard = rooms.rooms.lock();
        assert_eq!(guard.len(), 5);
        for registration in config.specialists.values() {
            let participants = &guard[&registration.room].participants;
            assert!(participants.contains(&config.orchestrator));
            assert!(participants.contains(&registration.handle));
            assert_eq!(participants.len(), 2);
        }
    }
}
