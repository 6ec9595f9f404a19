use std::borrow::Cow;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::constants::net::ENTITY_UPDATES_PACKET_ID;
use crate::visibility::SlotSet;

/// Per-connection transient entity identifier
pub type NetworkId = i32;

/// Equipped items of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub right_hand_item_id: String,
    pub left_hand_item_id: String,
    /// Indexed 0=head, 1=chest, 2=hands, 3=legs
    pub armor_ids: Vec<String>,
}

impl Equipment {
    /// Copy with the armor ids in `hide` replaced by the empty string
    ///
    /// Hand items are carried over verbatim and the armor array keeps its
    /// length; slots beyond the array are ignored.
    pub fn with_hidden(&self, hide: SlotSet) -> Equipment {
        let mut armor_ids = self.armor_ids.clone();
        for slot in hide.iter() {
            if let Some(id) = armor_ids.get_mut(slot.index()) {
                id.clear();
            }
        }
        Equipment {
            right_hand_item_id: self.right_hand_item_id.clone(),
            left_hand_item_id: self.left_hand_item_id.clone(),
            armor_ids,
        }
    }
}

/// One typed component change carried by an entity record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ComponentUpdate {
    Equipment(Equipment),
    Transform {
        position: [f64; 3],
        body_rotation: [f32; 3],
    },
    Nameplate {
        text: String,
    },
    /// Component kinds this server does not interpret
    Opaque {
        kind: u16,
        payload: Vec<u8>,
    },
}

impl ComponentUpdate {
    #[inline]
    pub fn equipment(&self) -> Option<&Equipment> {
        match self {
            ComponentUpdate::Equipment(equipment) => Some(equipment),
            _ => None,
        }
    }
}

/// Updates for a single entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub network_id: NetworkId,
    pub removed: bool,
    pub components: Vec<Arc<ComponentUpdate>>,
}

/// Entity update packet body
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityUpdates {
    /// Entities removed from the viewer's view
    pub removed: Vec<NetworkId>,
    pub updates: Vec<Arc<EntityUpdate>>,
}

/// Packet pre-serialized once and written verbatim to many connections
///
/// Clones share the payload, so two clones are the same broadcast packet.
#[derive(Debug, Clone)]
pub struct CachedPacket {
    id: u16,
    sequence: u64,
    payload: Arc<[u8]>,
}

impl CachedPacket {
    pub fn new(id: u16, sequence: u64, payload: Arc<[u8]>) -> Self {
        Self {
            id,
            sequence,
            payload,
        }
    }

    /// Serialize an entity update packet for broadcast
    pub fn entity_updates(sequence: u64, updates: &EntityUpdates) -> Result<Self, EncodeError> {
        let payload = encode(updates)?;
        Ok(Self::new(ENTITY_UPDATES_PACKET_ID, sequence, payload.into()))
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// Broadcast sequence number, unique per serialized broadcast
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Weak handle that dies once every clone of this packet is dropped
    pub fn downgrade(&self) -> Weak<[u8]> {
        Arc::downgrade(&self.payload)
    }
}

/// Packet the redaction layer never interprets
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub id: u16,
    pub payload: Arc<[u8]>,
}

/// Outgoing packet handed to a connection
#[derive(Debug, Clone)]
pub enum Packet {
    EntityUpdates(Arc<EntityUpdates>),
    Cached(CachedPacket),
    Raw(RawPacket),
}

impl Packet {
    pub fn entity_updates(updates: EntityUpdates) -> Self {
        Packet::EntityUpdates(Arc::new(updates))
    }

    pub fn id(&self) -> u16 {
        match self {
            Packet::EntityUpdates(_) => ENTITY_UPDATES_PACKET_ID,
            Packet::Cached(cached) => cached.id,
            Packet::Raw(raw) => raw.id,
        }
    }

    /// Serialized body (no id, no length prefix)
    pub fn body(&self) -> Result<Cow<'_, [u8]>, EncodeError> {
        match self {
            Packet::EntityUpdates(updates) => encode(updates.as_ref()).map(Cow::Owned),
            Packet::Cached(cached) => Ok(Cow::Borrowed(cached.payload())),
            Packet::Raw(raw) => Ok(Cow::Borrowed(&raw.payload)),
        }
    }

    /// Frame body: `[2 bytes little-endian packet id][body]`
    pub fn encode_frame(&self) -> Result<Vec<u8>, EncodeError> {
        let body = self.body()?;
        let mut frame = Vec::with_capacity(2 + body.len());
        frame.extend_from_slice(&self.id().to_le_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Parse a frame body produced by [`Packet::encode_frame`]
    pub fn decode_frame(frame: &[u8]) -> Result<Packet, DecodeError> {
        if frame.len() < 2 {
            return Err(DecodeError(format!("frame too short: {} bytes", frame.len())));
        }
        let id = u16::from_le_bytes([frame[0], frame[1]]);
        let body = &frame[2..];
        if id == ENTITY_UPDATES_PACKET_ID {
            Ok(Packet::entity_updates(decode(body)?))
        } else {
            Ok(Packet::Raw(RawPacket {
                id,
                payload: body.into(),
            }))
        }
    }

    /// True if both handles point at the same underlying packet data
    pub fn same_as(&self, other: &Packet) -> bool {
        match (self, other) {
            (Packet::EntityUpdates(a), Packet::EntityUpdates(b)) => Arc::ptr_eq(a, b),
            (Packet::Cached(a), Packet::Cached(b)) => Arc::ptr_eq(&a.payload, &b.payload),
            (Packet::Raw(a), Packet::Raw(b)) => Arc::ptr_eq(&a.payload, &b.payload),
            _ => false,
        }
    }
}

/// Encode a value using bincode
/// Uses legacy config for fixed-size integers (matches the client codec)
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a value using bincode
/// Uses legacy config for fixed-size integers (matches the client codec)
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);
