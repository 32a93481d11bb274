//! WebSocket protocol message definitions
//! These are the wire types for client-server communication. Event names match
//! the ones the browser client already speaks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::obstacle::{ObstacleId, ObstacleState};
use crate::game::player::{Bomb, Inventory, PlayerState};
use crate::game::powerup::{PowerUpState, PowerUpType};
use crate::game::ConnId;

/// High-frequency movement report. Same schema in both directions; the
/// server overwrites `player_id` before relaying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementFrame {
    #[serde(default)]
    pub player_id: String,
    pub x: f32,
    pub y: f32,
    /// Body rotation in radians
    #[serde(default)]
    pub rotation: f32,
    #[serde(default)]
    pub turret_rotation: f32,
}

/// Shot report. Clients fill the spawn point and rotation; `player_id`,
/// `damage` and `distance` are stamped by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootFrame {
    #[serde(default)]
    pub player_id: String,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    #[serde(default)]
    pub damage: i32,
    #[serde(default)]
    pub distance: i32,
}

/// Victim-reported hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitReport {
    pub player_id: Uuid,
    pub damage: i32,
    #[serde(default)]
    pub attacker_id: Option<Uuid>,
}

/// Attacker-reported obstacle hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObstacleHitReport {
    pub obstacle_id: ObstacleId,
    pub damage: i32,
}

/// Inventory items a player can carry and use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Missile,
    Bomb,
}

/// Inbound events, one per client intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEvent {
    PlayerMovement,
    PlayerShoot,
    PlayerHit,
    ObstacleHit,
    PowerUpCollected,
    UseItem,
}

impl InboundEvent {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "playerMovement" => Some(Self::PlayerMovement),
            "playerShoot" => Some(Self::PlayerShoot),
            "playerHit" => Some(Self::PlayerHit),
            "obstacleHit" => Some(Self::ObstacleHit),
            "powerUpCollected" => Some(Self::PowerUpCollected),
            "useItem" => Some(Self::UseItem),
            _ => None,
        }
    }
}

/// A client intent after wire decoding, independent of binary or JSON origin
#[derive(Debug, Clone, PartialEq)]
pub enum ClientIntent {
    Movement(MovementFrame),
    Shoot(ShootFrame),
    Hit(HitReport),
    ObstacleHit(ObstacleHitReport),
    CollectPowerUp(Uuid),
    UseItem(ItemKind),
}

/// JSON envelope for text frames
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Messages sent from server to clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    CurrentPlayers(HashMap<ConnId, PlayerState>),
    NewPlayer(PlayerState),
    DisconnectPlayer(ConnId),
    PlayerMoved(MovementFrame),
    BulletFired(ShootFrame),
    MissileFired(MissileFired),
    BombDropped(Bomb),
    BombExploded(BombExploded),
    PlayerHealthUpdate(HealthUpdate),
    PlayerDied(ConnId),
    PlayerRespawned(PlayerState),
    PlayerAlphaChanged(AlphaChange),
    ScoreUpdate(ScoreUpdate),
    CurrentObstacles(HashMap<ObstacleId, ObstacleState>),
    ObstacleHealthUpdate(ObstacleHealth),
    ObstacleRemoved(ObstacleId),
    CurrentPowerUps(HashMap<Uuid, PowerUpState>),
    PowerUpSpawned(PowerUpState),
    PowerUpRemoved(Uuid),
    ApplyPowerUp(EffectNotice),
    RemovePowerUpEffect(EffectNotice),
    /// Unicast only: opponents never see inventories
    InventoryUpdate(Inventory),
    MapSeed(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissileFired {
    pub player_id: ConnId,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub damage: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BombExploded {
    pub id: Uuid,
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthUpdate {
    pub player_id: ConnId,
    pub health: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlphaChange {
    pub player_id: ConnId,
    pub alpha: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdate {
    pub player_id: ConnId,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObstacleHealth {
    pub id: ObstacleId,
    pub health: i32,
}

/// Power-up effect applied to or removed from a player
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectNotice {
    pub player_id: ConnId,
    #[serde(rename = "type")]
    pub kind: PowerUpType,
}
