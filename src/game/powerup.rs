//! Collectible power-ups and the periodic spawner that keeps them stocked

use std::collections::HashMap;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::config::GameConfig;
use crate::ws::protocol::{ItemKind, ServerEvent};

use super::map::random_point;
use super::obstacle::ObstacleField;
use super::{BuffKind, Effects, GameError};

/// Power-up types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerUpType {
    Invisible,
    MultiShot,
    Speed,
    Damage,
    Health,
    Missile,
    Bomb,
}

impl PowerUpType {
    pub const ALL: [PowerUpType; 7] = [
        PowerUpType::Invisible,
        PowerUpType::MultiShot,
        PowerUpType::Speed,
        PowerUpType::Damage,
        PowerUpType::Health,
        PowerUpType::Missile,
        PowerUpType::Bomb,
    ];

    /// Timed buff granted by this pickup, if any
    pub fn buff(self) -> Option<BuffKind> {
        match self {
            PowerUpType::Invisible => Some(BuffKind::Invisible),
            PowerUpType::MultiShot => Some(BuffKind::MultiShot),
            PowerUpType::Speed => Some(BuffKind::Speed),
            PowerUpType::Damage => Some(BuffKind::Damage),
            _ => None,
        }
    }

    /// Inventory item granted by this pickup, if any
    pub fn item(self) -> Option<ItemKind> {
        match self {
            PowerUpType::Missile => Some(ItemKind::Missile),
            PowerUpType::Bomb => Some(ItemKind::Bomb),
            _ => None,
        }
    }
}

impl From<BuffKind> for PowerUpType {
    fn from(buff: BuffKind) -> Self {
        match buff {
            BuffKind::Speed => PowerUpType::Speed,
            BuffKind::Damage => PowerUpType::Damage,
            BuffKind::MultiShot => PowerUpType::MultiShot,
            BuffKind::Invisible => PowerUpType::Invisible,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerUpState {
    pub id: Uuid,
    pub x: f32,
    pub y: f32,
    #[serde(rename = "type")]
    pub kind: PowerUpType,
}

/// Active pickups of one room
#[derive(Debug, Default)]
pub struct PowerUpField {
    items: HashMap<Uuid, PowerUpState>,
}

impl PowerUpField {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> &HashMap<Uuid, PowerUpState> {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Desired population for the current player count
    pub fn target_population(config: &GameConfig, player_count: usize) -> usize {
        (player_count * config.powerups_per_player)
            .max(config.min_powerups)
            .min(config.max_powerups)
    }

    /// Fill straight up to the target. Used once when the spawner starts.
    pub fn fill<R: Rng + ?Sized>(
        &mut self,
        player_count: usize,
        obstacles: &ObstacleField,
        config: &GameConfig,
        rng: &mut R,
        fx: &mut Effects,
    ) -> usize {
        let needed = Self::target_population(config, player_count).saturating_sub(self.len());
        (0..needed)
            .filter(|_| self.spawn_one(obstacles, config, rng, fx).is_some())
            .count()
    }

    /// One spawner tick: top up toward the target, at most one batch
    pub fn top_up<R: Rng + ?Sized>(
        &mut self,
        player_count: usize,
        obstacles: &ObstacleField,
        config: &GameConfig,
        rng: &mut R,
        fx: &mut Effects,
    ) -> usize {
        let needed = Self::target_population(config, player_count).saturating_sub(self.len());
        let batch = needed.min(config.powerup_spawn_batch);
        (0..batch)
            .filter(|_| self.spawn_one(obstacles, config, rng, fx).is_some())
            .count()
    }

    /// Spawn a random pickup away from obstacles. No-op at the global ceiling.
    pub fn spawn_one<R: Rng + ?Sized>(
        &mut self,
        obstacles: &ObstacleField,
        config: &GameConfig,
        rng: &mut R,
        fx: &mut Effects,
    ) -> Option<Uuid> {
        if self.len() >= config.max_powerups {
            return None;
        }

        let kind = *PowerUpType::ALL.choose(&mut *rng)?;
        let (x, y) = find_position(obstacles, config, rng);
        let powerup = PowerUpState {
            id: Uuid::new_v4(),
            x,
            y,
            kind,
        };

        let id = powerup.id;
        fx.broadcast(ServerEvent::PowerUpSpawned(powerup.clone()));
        self.items.insert(id, powerup);
        Some(id)
    }

    /// Remove a pickup and hand back its type. Only the first caller wins.
    pub fn collect(&mut self, id: Uuid, fx: &mut Effects) -> Result<PowerUpType, GameError> {
        let powerup = self
            .items
            .remove(&id)
            .ok_or(GameError::EntityNotFound("power-up"))?;
        fx.broadcast(ServerEvent::PowerUpRemoved(id));
        Ok(powerup.kind)
    }
}

/// Rejection-sample a spot clear of obstacles; after the attempt budget the
/// last unchecked sample is used.
fn find_position<R: Rng + ?Sized>(
    obstacles: &ObstacleField,
    config: &GameConfig,
    rng: &mut R,
) -> (f32, f32) {
    let mut sample = || random_point(config.spawn_margin, rng);

    for _ in 0..config.powerup_placement_attempts {
        let (x, y) = sample();
        if !obstacles.any_within(x, y, config.powerup_clearance) {
            return (x, y);
        }
    }
    sample()
}

/// Periodic spawner task. Stopping is idempotent and also happens on drop.
#[derive(Debug, Default)]
pub struct Spawner {
    task: Option<JoinHandle<()>>,
}

impl Spawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking every `every`. The callback returns false to end the task.
    /// The first tick fires one full period after start.
    pub fn start<F>(&mut self, every: Duration, mut on_tick: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        self.stop();
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !on_tick() {
                    break;
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Spawner {
    fn drop(&mut self) {
        self.stop();
    }
}
