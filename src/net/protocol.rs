//! Wire records exchanged with the transport layer
//!
//! The simulation never talks to sockets. It produces one [`ViewerFrame`] per
//! viewer per tick and consumes [`ClientMessage`]s that the transport has
//! already de-framed. Both directions use bincode's legacy (fixed-int)
//! configuration so field widths stay stable for existing clients.

use serde::{Deserialize, Serialize};

use crate::game::entity::EntityId;
use crate::game::input::Inputs;
use crate::game::world::EntityKind;

/// One networked field value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    F32(f32),
    U32(u32),
    /// Weak entity reference; `None` when unset or dead
    Entity(Option<EntityId>),
}

/// Fields of one group selected by `mask`, in ascending bit order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDelta {
    /// Group wire id
    pub group: u8,
    /// Bitmask of the fields present in `values`
    pub mask: u32,
    pub values: Vec<FieldValue>,
}

impl GroupDelta {
    /// Value of field `bit`, if the mask carries it
    pub fn field(&self, bit: u32) -> Option<FieldValue> {
        if self.mask & (1 << bit) == 0 {
            return None;
        }
        let index = (self.mask & ((1 << bit) - 1)).count_ones() as usize;
        self.values.get(index).copied()
    }
}

/// Per-entity record inside a viewer frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityRecord {
    /// First sighting: type tag plus a full snapshot of every group
    Creation {
        entity: EntityId,
        kind: EntityKind,
        groups: Vec<GroupDelta>,
    },
    /// Known entity with at least one dirty group
    Update {
        entity: EntityId,
        groups: Vec<GroupDelta>,
    },
    /// Entity left view or died
    Deletion { entity: EntityId },
}

impl EntityRecord {
    pub fn entity(&self) -> EntityId {
        match self {
            EntityRecord::Creation { entity, .. }
            | EntityRecord::Update { entity, .. }
            | EntityRecord::Deletion { entity } => *entity,
        }
    }
}

/// Everything one viewer receives for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerFrame {
    pub tick: u64,
    /// Deletions, then creations (parent before child), then updates
    pub records: Vec<EntityRecord>,
}

impl ViewerFrame {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// User-facing message pushed through the client notify hook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub text: String,
    pub color: u32,
    /// Milliseconds; negative means until dismissed
    pub duration: f32,
}

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Control state for the viewer's camera entity
    Input(Inputs),
    /// Viewer is leaving
    Leave,
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    Frame(ViewerFrame),
    Notify(Notification),
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::input_flags;
    use crate::util::vec2::Vec2;

    #[test]
    fn test_group_delta_field_lookup() {
        let delta = GroupDelta {
            group: 1,
            mask: 0b1010,
            values: vec![FieldValue::F32(4.0), FieldValue::U32(7)],
        };
        assert_eq!(delta.field(0), None);
        assert_eq!(delta.field(1), Some(FieldValue::F32(4.0)));
        assert_eq!(delta.field(2), None);
        assert_eq!(delta.field(3), Some(FieldValue::U32(7)));
    }

    #[test]
    fn test_frame_survives_bincode() {
        let frame = ViewerFrame {
            tick: 42,
            records: vec![
                EntityRecord::Deletion {
                    entity: EntityId::new(3, 1),
                },
                EntityRecord::Creation {
                    entity: EntityId::new(5, 0),
                    kind: EntityKind::Body,
                    groups: vec![GroupDelta {
                        group: 0,
                        mask: 0b1,
                        values: vec![FieldValue::Entity(None)],
                    }],
                },
            ],
        };
        let bytes = encode(&ServerMessage::Frame(frame.clone())).unwrap();
        match decode::<ServerMessage>(&bytes).unwrap() {
            ServerMessage::Frame(decoded) => assert_eq!(decoded, frame),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_client_input_decodes() {
        let inputs = Inputs {
            flags: input_flags::LEFT_CLICK | input_flags::UP,
            movement_angle: 1.5,
            movement_magnitude: 1.0,
            mouse: Vec2::new(10.0, -20.0),
        };
        let bytes = encode(&ClientMessage::Input(inputs)).unwrap();
        match decode::<ClientMessage>(&bytes).unwrap() {
            ClientMessage::Input(decoded) => assert_eq!(decoded, inputs),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let result = decode::<ClientMessage>(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(result.is_err());
    }

    #[test]
    fn test_legacy_config_uses_fixed_width_ints() {
        // Legacy config writes u64 as 8 bytes regardless of value
        let bytes = encode(&ViewerFrame { tick: 1, records: Vec::new() }).unwrap();
        assert_eq!(bytes.len(), 8 + 8);
    }
}
