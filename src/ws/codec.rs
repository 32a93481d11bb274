//! Wire codec for client intents and server events.
//!
//! Movement and shoot frames have a compact binary form: one tag byte followed
//! by the bincode body (fixed-width little-endian integers). Every other event,
//! and clients that cannot produce binary, use JSON envelopes. Both decode to
//! the same [`ClientIntent`].

use bincode::Options;
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::protocol::{
    ClientIntent, Envelope, InboundEvent, MovementFrame, ServerEvent, ShootFrame,
};

/// Tag byte leading every binary frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BinaryTag {
    Movement = 1,
    Shoot = 2,
}

impl BinaryTag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Movement),
            2 => Some(Self::Shoot),
            _ => None,
        }
    }
}

/// A payload as it arrived on the wire
#[derive(Debug, Clone)]
pub enum Payload {
    Binary(Bytes),
    Structured(serde_json::Value),
}

/// Codec errors. Any of these means the message is dropped untouched.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("empty binary frame")]
    EmptyFrame,

    #[error("unknown binary tag {0}")]
    UnknownTag(u8),

    #[error("unknown event {0:?}")]
    UnknownEvent(String),

    #[error("event {0:?} has no binary form")]
    NotBinary(InboundEvent),

    #[error("non-finite coordinate")]
    NonFinite,

    #[error("binary decode failed: {0}")]
    Binary(#[from] bincode::Error),

    #[error("json decode failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shared, read-only codec configuration. Built once at startup.
#[derive(Debug, Clone)]
pub struct Codec {
    frame_limit: u64,
}

impl Codec {
    pub fn new(frame_limit: u64) -> Self {
        Self { frame_limit }
    }

    fn options(&self) -> impl Options {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .with_little_endian()
            .with_limit(self.frame_limit)
            .reject_trailing_bytes()
    }

    fn encode_body<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(self.options().serialize(value)?)
    }

    fn decode_body<T: DeserializeOwned>(&self, payload: &Payload) -> Result<T, CodecError> {
        match payload {
            Payload::Binary(bytes) => Ok(self.options().deserialize(bytes)?),
            Payload::Structured(value) => Ok(T::deserialize(value)?),
        }
    }

    /// Tag-prefixed binary frame
    fn frame<T: Serialize>(&self, tag: BinaryTag, value: &T) -> Result<Bytes, CodecError> {
        let body = self.encode_body(value)?;
        let mut buf = BytesMut::with_capacity(body.len() + 1);
        buf.put_u8(tag as u8);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    pub fn encode_movement(&self, frame: &MovementFrame) -> Result<Bytes, CodecError> {
        self.frame(BinaryTag::Movement, frame)
    }

    pub fn encode_shoot(&self, frame: &ShootFrame) -> Result<Bytes, CodecError> {
        self.frame(BinaryTag::Shoot, frame)
    }

    pub fn decode_movement(&self, payload: &Payload) -> Result<MovementFrame, CodecError> {
        let frame: MovementFrame = self.decode_body(payload)?;
        ensure_finite(&[frame.x, frame.y, frame.rotation, frame.turret_rotation])?;
        Ok(frame)
    }

    pub fn decode_shoot(&self, payload: &Payload) -> Result<ShootFrame, CodecError> {
        let frame: ShootFrame = self.decode_body(payload)?;
        ensure_finite(&[frame.x, frame.y, frame.rotation])?;
        Ok(frame)
    }

    /// Decode a binary WebSocket message
    pub fn decode_binary(&self, mut frame: Bytes) -> Result<ClientIntent, CodecError> {
        if frame.is_empty() {
            return Err(CodecError::EmptyFrame);
        }
        let tag = frame[0];
        let body = Payload::Binary(frame.split_off(1));
        match BinaryTag::from_byte(tag) {
            Some(BinaryTag::Movement) => self.decode_intent(InboundEvent::PlayerMovement, body),
            Some(BinaryTag::Shoot) => self.decode_intent(InboundEvent::PlayerShoot, body),
            None => Err(CodecError::UnknownTag(tag)),
        }
    }

    /// Decode a JSON text WebSocket message
    pub fn decode_text(&self, text: &str) -> Result<ClientIntent, CodecError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let event = InboundEvent::from_name(&envelope.event)
            .ok_or_else(|| CodecError::UnknownEvent(envelope.event.clone()))?;
        self.decode_intent(event, Payload::Structured(envelope.data))
    }

    /// Normalize a payload for a known event into an intent
    pub fn decode_intent(
        &self,
        event: InboundEvent,
        payload: Payload,
    ) -> Result<ClientIntent, CodecError> {
        match (event, payload) {
            (InboundEvent::PlayerMovement, payload) => {
                Ok(ClientIntent::Movement(self.decode_movement(&payload)?))
            }
            (InboundEvent::PlayerShoot, payload) => {
                Ok(ClientIntent::Shoot(self.decode_shoot(&payload)?))
            }
            (InboundEvent::PlayerHit, Payload::Structured(value)) => {
                Ok(ClientIntent::Hit(serde_json::from_value(value)?))
            }
            (InboundEvent::ObstacleHit, Payload::Structured(value)) => {
                Ok(ClientIntent::ObstacleHit(serde_json::from_value(value)?))
            }
            (InboundEvent::PowerUpCollected, Payload::Structured(value)) => {
                Ok(ClientIntent::CollectPowerUp(serde_json::from_value(value)?))
            }
            (InboundEvent::UseItem, Payload::Structured(value)) => {
                Ok(ClientIntent::UseItem(serde_json::from_value(value)?))
            }
            (other, Payload::Binary(_)) => Err(CodecError::NotBinary(other)),
        }
    }

    /// Binary form of an outbound event, for events that have one
    pub fn encode_event_binary(&self, event: &ServerEvent) -> Option<Result<Bytes, CodecError>> {
        match event {
            ServerEvent::PlayerMoved(frame) => Some(self.encode_movement(frame)),
            ServerEvent::BulletFired(frame) => Some(self.encode_shoot(frame)),
            _ => None,
        }
    }

    pub fn encode_event_json(&self, event: &ServerEvent) -> Result<String, CodecError> {
        Ok(serde_json::to_string(event)?)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn ensure_finite(values: &[f32]) -> Result<(), CodecError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(CodecError::NonFinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::ItemKind;
    use uuid::Uuid;

    fn movement() -> MovementFrame {
        MovementFrame {
            player_id: String::new(),
            x: 120.5,
            y: 80.0,
            rotation: 1.25,
            turret_rotation: -0.5,
        }
    }

    #[test]
    fn binary_and_json_movement_normalize_to_same_intent() {
        let codec = Codec::default();
        let binary = codec.encode_movement(&movement()).unwrap();
        let from_binary = codec.decode_binary(binary).unwrap();

        let text = serde_json::json!({
            "event": "playerMovement",
            "data": { "x": 120.5, "y": 80.0, "rotation": 1.25, "turretRotation": -0.5 }
        })
        .to_string();
        let from_text = codec.decode_text(&text).unwrap();

        assert_eq!(from_binary, ClientIntent::Movement(movement()));
        assert_eq!(from_binary, from_text);
    }

    #[test]
    fn truncated_binary_is_malformed() {
        let codec = Codec::default();
        let frame = codec.encode_movement(&movement()).unwrap();
        let truncated = frame.slice(..frame.len() - 3);
        assert!(matches!(
            codec.decode_binary(truncated),
            Err(CodecError::Binary(_))
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let codec = Codec::default();
        let mut frame = BytesMut::from(&codec.encode_movement(&movement()).unwrap()[..]);
        frame.put_u8(0xFF);
        assert!(codec.decode_binary(frame.freeze()).is_err());
    }

    #[test]
    fn unknown_tag_and_empty_frame() {
        let codec = Codec::default();
        assert!(matches!(
            codec.decode_binary(Bytes::from_static(&[9, 0, 0])),
            Err(CodecError::UnknownTag(9))
        ));
        assert!(matches!(
            codec.decode_binary(Bytes::new()),
            Err(CodecError::EmptyFrame)
        ));
    }

    #[test]
    fn shoot_body_stamped_fields_survive_binary() {
        let codec = Codec::default();
        let shot = ShootFrame {
            player_id: Uuid::new_v4().to_string(),
            x: 10.0,
            y: 20.0,
            rotation: 3.0,
            damage: 20,
            distance: 800,
        };
        let bytes = codec
            .encode_event_binary(&ServerEvent::BulletFired(shot.clone()))
            .unwrap()
            .unwrap();
        assert_eq!(bytes[0], BinaryTag::Shoot as u8);
        assert_eq!(codec.decode_binary(bytes).unwrap(), ClientIntent::Shoot(shot));
    }

    #[test]
    fn non_finite_coordinates_are_dropped() {
        let codec = Codec::default();
        let mut frame = movement();
        frame.x = f32::NAN;
        let bytes = codec.encode_movement(&frame).unwrap();
        assert!(matches!(
            codec.decode_binary(bytes),
            Err(CodecError::NonFinite)
        ));
    }

    #[test]
    fn structured_only_events_decode_from_json() {
        let codec = Codec::default();
        let id = Uuid::new_v4();
        let text = serde_json::json!({ "event": "powerUpCollected", "data": id }).to_string();
        assert_eq!(
            codec.decode_text(&text).unwrap(),
            ClientIntent::CollectPowerUp(id)
        );

        let text = serde_json::json!({ "event": "useItem", "data": "bomb" }).to_string();
        assert_eq!(
            codec.decode_text(&text).unwrap(),
            ClientIntent::UseItem(ItemKind::Bomb)
        );

        let text = serde_json::json!({ "event": "useItem", "data": "laser" }).to_string();
        assert!(codec.decode_text(&text).is_err());
    }

    #[test]
    fn structured_only_event_rejects_binary_payload() {
        let codec = Codec::default();
        let result = codec.decode_intent(InboundEvent::PlayerHit, Payload::Binary(Bytes::new()));
        assert!(matches!(result, Err(CodecError::NotBinary(InboundEvent::PlayerHit))));
    }

    #[test]
    fn unknown_event_name_is_malformed() {
        let codec = Codec::default();
        let text = serde_json::json!({ "event": "teleport", "data": {} }).to_string();
        assert!(matches!(
            codec.decode_text(&text),
            Err(CodecError::UnknownEvent(_))
        ));
    }
}
