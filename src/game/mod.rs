//! Room-scoped game simulation: players, obstacles, power-ups and the map seed

pub mod instance;
pub mod map;
pub mod obstacle;
pub mod player;
pub mod powerup;
pub mod timers;

pub use instance::{spawn_room, GameInstance, RoomCommand, RoomHandle, RoomTask};

use std::time::Duration;

use uuid::Uuid;

use crate::ws::codec::CodecError;
use crate::ws::protocol::ServerEvent;

/// Connection-scoped identifier, doubles as the player id
pub type ConnId = Uuid;

/// Room identifier
pub type RoomId = Uuid;

/// Failure taxonomy of the game core.
///
/// None of these ever reach the connection layer as a fatal error: the room
/// dispatcher logs them and drops the triggering message.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(#[from] CodecError),

    #[error("{0} not found")]
    EntityNotFound(&'static str),

    #[error("Room is at capacity")]
    CapacityExceeded,

    #[error("Invalid transition: {0}")]
    InvalidTransition(&'static str),

    #[error("Room not found")]
    RoomNotFound,
}

impl GameError {
    /// Expected under normal churn; logged at debug rather than warn
    pub fn is_churn(&self) -> bool {
        matches!(
            self,
            GameError::EntityNotFound(_) | GameError::InvalidTransition(_)
        )
    }
}

/// Who receives an outbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    /// Every member of the room
    Room,
    /// Every member except the given connection
    RoomExcept(ConnId),
    /// A single connection
    Only(ConnId),
}

/// An event addressed to part of a room
#[derive(Debug, Clone)]
pub struct Outbound {
    pub to: Recipients,
    pub event: ServerEvent,
}

/// Which buff a timer or notice refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuffKind {
    Speed,
    Damage,
    MultiShot,
    Invisible,
}

/// Deferred mutation requested by a subsystem, delivered back to the room later
#[derive(Debug, Clone, PartialEq)]
pub enum TimerAction {
    Respawn {
        player: ConnId,
    },
    ExpireBuff {
        player: ConnId,
        buff: BuffKind,
        generation: u64,
    },
    Detonate(player::Bomb),
}

/// Kind half of a timer key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Respawn,
    Buff(BuffKind),
    BombFuse,
}

impl TimerKind {
    /// Every timer kind keyed by a player id
    pub const PLAYER: [TimerKind; 5] = [
        TimerKind::Respawn,
        TimerKind::Buff(BuffKind::Speed),
        TimerKind::Buff(BuffKind::Damage),
        TimerKind::Buff(BuffKind::MultiShot),
        TimerKind::Buff(BuffKind::Invisible),
    ];
}

/// Timers are keyed by (entity, kind); arming an existing key replaces it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerKey {
    pub entity: Uuid,
    pub kind: TimerKind,
}

impl TimerAction {
    pub fn key(&self) -> TimerKey {
        match self {
            TimerAction::Respawn { player } => TimerKey {
                entity: *player,
                kind: TimerKind::Respawn,
            },
            TimerAction::ExpireBuff { player, buff, .. } => TimerKey {
                entity: *player,
                kind: TimerKind::Buff(*buff),
            },
            TimerAction::Detonate(bomb) => TimerKey {
                entity: bomb.id,
                kind: TimerKind::BombFuse,
            },
        }
    }
}

/// Side effects collected while applying one command.
///
/// Subsystems push events and timer requests here instead of talking to the
/// transport, which keeps them synchronous and testable.
#[derive(Debug, Default)]
pub struct Effects {
    pub outbound: Vec<Outbound>,
    pub timers: Vec<(Duration, TimerAction)>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broadcast(&mut self, event: ServerEvent) {
        self.outbound.push(Outbound {
            to: Recipients::Room,
            event,
        });
    }

    pub fn broadcast_except(&mut self, sender: ConnId, event: ServerEvent) {
        self.outbound.push(Outbound {
            to: Recipients::RoomExcept(sender),
            event,
        });
    }

    pub fn unicast(&mut self, conn: ConnId, event: ServerEvent) {
        self.outbound.push(Outbound {
            to: Recipients::Only(conn),
            event,
        });
    }

    pub fn schedule(&mut self, after: Duration, action: TimerAction) {
        self.timers.push((after, action));
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.timers.is_empty()
    }
}

/// Euclidean distance between two points
pub fn distance(ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = ax - bx;
    let dy = ay - by;
    (dx * dx + dy * dy).sqrt()
}
