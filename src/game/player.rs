//! Player roster: lifecycle, combat resolution, buffs and inventory

use std::collections::HashMap;

use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::config::GameConfig;
use crate::ws::protocol::{
    AlphaChange, BombExploded, EffectNotice, HealthUpdate, ItemKind, MissileFired, MovementFrame,
    ScoreUpdate, ServerEvent, ShootFrame,
};

use super::map::random_point;
use super::obstacle::ObstacleField;
use super::powerup::PowerUpType;
use super::{distance, BuffKind, ConnId, Effects, GameError, TimerAction};

/// Carried items. Private to the owner; never part of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub missile: u8,
    pub bomb: u8,
}

impl Inventory {
    pub fn count(&self, item: ItemKind) -> u8 {
        match item {
            ItemKind::Missile => self.missile,
            ItemKind::Bomb => self.bomb,
        }
    }

    fn slot_mut(&mut self, item: ItemKind) -> &mut u8 {
        match item {
            ItemKind::Missile => &mut self.missile,
            ItemKind::Bomb => &mut self.bomb,
        }
    }
}

/// Authoritative per-player state
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub player_id: ConnId,
    pub x: f32,
    pub y: f32,
    /// Body rotation in radians
    pub rotation: f32,
    pub turret_rotation: f32,
    /// 24-bit RGB
    pub color: u32,
    /// 0 while invisible, 1 otherwise
    pub alpha: u8,
    pub health: i32,
    pub max_health: i32,
    pub is_dead: bool,
    pub name: String,
    pub score: u32,
    pub speed_buff: bool,
    pub damage_buff: bool,
    pub multi_shot_buff: bool,
    #[serde(skip)]
    pub inventory: Inventory,
    /// Grant counter per buff; only the expiry of the latest grant applies
    #[serde(skip)]
    buff_generations: HashMap<BuffKind, u64>,
}

impl PlayerState {
    pub fn new(player_id: ConnId, name: String, x: f32, y: f32, color: u32, health: i32) -> Self {
        Self {
            player_id,
            x,
            y,
            rotation: 0.0,
            turret_rotation: 0.0,
            color,
            alpha: 1,
            health,
            max_health: health,
            is_dead: false,
            name,
            score: 0,
            speed_buff: false,
            damage_buff: false,
            multi_shot_buff: false,
            inventory: Inventory::default(),
            buff_generations: HashMap::new(),
        }
    }

    pub fn has_buff(&self, buff: BuffKind) -> bool {
        match buff {
            BuffKind::Speed => self.speed_buff,
            BuffKind::Damage => self.damage_buff,
            BuffKind::MultiShot => self.multi_shot_buff,
            BuffKind::Invisible => self.alpha == 0,
        }
    }

    fn set_buff(&mut self, buff: BuffKind, on: bool) {
        match buff {
            BuffKind::Speed => self.speed_buff = on,
            BuffKind::Damage => self.damage_buff = on,
            BuffKind::MultiShot => self.multi_shot_buff = on,
            BuffKind::Invisible => self.alpha = if on { 0 } else { 1 },
        }
    }

    fn next_generation(&mut self, buff: BuffKind) -> u64 {
        let generation = self.buff_generations.entry(buff).or_insert(0);
        *generation += 1;
        *generation
    }

    fn current_generation(&self, buff: BuffKind) -> u64 {
        self.buff_generations.get(&buff).copied().unwrap_or(0)
    }
}

/// A dropped bomb waiting for its fuse
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bomb {
    pub id: Uuid,
    pub x: f32,
    pub y: f32,
    pub player_id: ConnId,
}

/// Players of one room
#[derive(Debug, Default)]
pub struct PlayerRoster {
    players: HashMap<ConnId, PlayerState>,
}

impl PlayerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ConnId) -> Option<&PlayerState> {
        self.players.get(id)
    }

    pub fn list(&self) -> &HashMap<ConnId, PlayerState> {
        &self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    fn alive_mut(&mut self, id: &ConnId) -> Result<&mut PlayerState, GameError> {
        let player = self
            .players
            .get_mut(id)
            .ok_or(GameError::EntityNotFound("player"))?;
        if player.is_dead {
            return Err(GameError::InvalidTransition("player is dead"));
        }
        Ok(player)
    }

    /// Create a player at a random spawn with a random color
    pub fn join<R: Rng + ?Sized>(
        &mut self,
        conn: ConnId,
        name: String,
        config: &GameConfig,
        rng: &mut R,
    ) -> PlayerState {
        let (x, y) = random_point(config.spawn_margin, rng);
        let color = rng.gen_range(0..=0xFF_FFFF);
        let player = PlayerState::new(conn, name, x, y, color, config.default_health);
        self.players.insert(conn, player.clone());
        player
    }

    pub fn leave(&mut self, conn: &ConnId) -> Option<PlayerState> {
        self.players.remove(conn)
    }

    /// Overwrite position and rotation verbatim and relay to the others
    pub fn report_movement(
        &mut self,
        conn: ConnId,
        mut frame: MovementFrame,
        fx: &mut Effects,
    ) -> Result<(), GameError> {
        let player = self.alive_mut(&conn)?;
        player.x = frame.x;
        player.y = frame.y;
        player.rotation = frame.rotation;
        player.turret_rotation = frame.turret_rotation;

        frame.player_id = conn.to_string();
        fx.broadcast_except(conn, ServerEvent::PlayerMoved(frame));
        Ok(())
    }

    /// Stamp attacker, damage and range from server-held state and relay
    pub fn report_shoot(
        &mut self,
        conn: ConnId,
        mut frame: ShootFrame,
        config: &GameConfig,
        fx: &mut Effects,
    ) -> Result<(), GameError> {
        let player = self.alive_mut(&conn)?;

        frame.player_id = conn.to_string();
        frame.damage = if player.damage_buff {
            config.buffed_bullet_damage
        } else {
            config.bullet_damage
        };
        frame.distance = config.bullet_distance;
        fx.broadcast_except(conn, ServerEvent::BulletFired(frame));
        Ok(())
    }

    /// Victim-reported hit. Self-damage is rejected.
    pub fn report_hit(
        &mut self,
        victim: ConnId,
        damage: i32,
        attacker: Option<ConnId>,
        config: &GameConfig,
        fx: &mut Effects,
    ) -> Result<(), GameError> {
        if attacker == Some(victim) {
            return Err(GameError::InvalidTransition("self damage"));
        }
        self.inflict(victim, damage, attacker, config, fx)
    }

    /// Shared damage path for hits and explosions
    fn inflict(
        &mut self,
        victim_id: ConnId,
        amount: i32,
        attacker: Option<ConnId>,
        config: &GameConfig,
        fx: &mut Effects,
    ) -> Result<(), GameError> {
        if amount <= 0 {
            return Err(GameError::InvalidTransition("non-positive damage"));
        }

        let victim = self.alive_mut(&victim_id)?;
        victim.health = victim.health.saturating_sub(amount);

        if victim.health > 0 {
            fx.broadcast(ServerEvent::PlayerHealthUpdate(HealthUpdate {
                player_id: victim_id,
                health: victim.health,
            }));
            return Ok(());
        }

        victim.health = 0;
        victim.is_dead = true;
        fx.broadcast(ServerEvent::PlayerDied(victim_id));

        let credited = attacker
            .filter(|id| *id != victim_id)
            .and_then(|id| self.players.get_mut(&id));
        if let Some(killer) = credited {
            killer.score += 1;
            fx.broadcast(ServerEvent::ScoreUpdate(ScoreUpdate {
                player_id: killer.player_id,
                score: killer.score,
            }));
        }

        fx.schedule(
            config.respawn_delay,
            TimerAction::Respawn { player: victim_id },
        );
        Ok(())
    }

    /// Bring a dead player back at full health and a fresh position
    pub fn respawn<R: Rng + ?Sized>(
        &mut self,
        conn: ConnId,
        config: &GameConfig,
        rng: &mut R,
        fx: &mut Effects,
    ) -> Result<(), GameError> {
        let player = self
            .players
            .get_mut(&conn)
            .ok_or(GameError::EntityNotFound("player"))?;
        if !player.is_dead {
            return Err(GameError::InvalidTransition("player is alive"));
        }

        let (x, y) = random_point(config.spawn_margin, rng);
        player.is_dead = false;
        player.health = player.max_health;
        player.x = x;
        player.y = y;
        fx.broadcast(ServerEvent::PlayerRespawned(player.clone()));
        Ok(())
    }

    /// Apply a collected pickup. Items go to the private inventory; every
    /// other type is announced to the room.
    pub fn apply_powerup(
        &mut self,
        conn: ConnId,
        kind: PowerUpType,
        config: &GameConfig,
        fx: &mut Effects,
    ) -> Result<(), GameError> {
        let player = self.alive_mut(&conn)?;

        if let Some(item) = kind.item() {
            let slot = player.inventory.slot_mut(item);
            if *slot >= config.inventory_cap {
                return Ok(());
            }
            *slot += 1;
            fx.unicast(conn, ServerEvent::InventoryUpdate(player.inventory));
            return Ok(());
        }

        fx.broadcast(ServerEvent::ApplyPowerUp(EffectNotice {
            player_id: conn,
            kind,
        }));

        if kind == PowerUpType::Health {
            player.health = (player.health + config.heal_amount).min(player.max_health);
            fx.broadcast(ServerEvent::PlayerHealthUpdate(HealthUpdate {
                player_id: conn,
                health: player.health,
            }));
            return Ok(());
        }

        if let Some(buff) = kind.buff() {
            player.set_buff(buff, true);
            if buff == BuffKind::Invisible {
                fx.broadcast(ServerEvent::PlayerAlphaChanged(AlphaChange {
                    player_id: conn,
                    alpha: 0,
                }));
            }
            let generation = player.next_generation(buff);
            fx.schedule(
                config.powerup_duration,
                TimerAction::ExpireBuff {
                    player: conn,
                    buff,
                    generation,
                },
            );
        }
        Ok(())
    }

    /// Clear a buff if `generation` is still the latest grant
    pub fn expire_buff(
        &mut self,
        conn: ConnId,
        buff: BuffKind,
        generation: u64,
        fx: &mut Effects,
    ) -> Result<(), GameError> {
        let player = self
            .players
            .get_mut(&conn)
            .ok_or(GameError::EntityNotFound("player"))?;
        if player.current_generation(buff) != generation {
            return Err(GameError::InvalidTransition("superseded buff grant"));
        }

        player.set_buff(buff, false);
        if buff == BuffKind::Invisible {
            fx.broadcast(ServerEvent::PlayerAlphaChanged(AlphaChange {
                player_id: conn,
                alpha: 1,
            }));
        }
        fx.broadcast(ServerEvent::RemovePowerUpEffect(EffectNotice {
            player_id: conn,
            kind: buff.into(),
        }));
        Ok(())
    }

    /// Spend one inventory item
    pub fn use_item(
        &mut self,
        conn: ConnId,
        item: ItemKind,
        config: &GameConfig,
        fx: &mut Effects,
    ) -> Result<(), GameError> {
        let player = self.alive_mut(&conn)?;
        let slot = player.inventory.slot_mut(item);
        if *slot == 0 {
            return Err(GameError::InvalidTransition("empty inventory slot"));
        }
        *slot -= 1;
        fx.unicast(conn, ServerEvent::InventoryUpdate(player.inventory));

        match item {
            ItemKind::Missile => {
                let offset = config.missile_spawn_offset;
                fx.broadcast(ServerEvent::MissileFired(MissileFired {
                    player_id: conn,
                    x: player.x + player.turret_rotation.cos() * offset,
                    y: player.y + player.turret_rotation.sin() * offset,
                    rotation: player.turret_rotation,
                    damage: config.missile_damage,
                }));
            }
            ItemKind::Bomb => {
                let bomb = Bomb {
                    id: Uuid::new_v4(),
                    x: player.x,
                    y: player.y,
                    player_id: conn,
                };
                fx.broadcast(ServerEvent::BombDropped(bomb.clone()));
                fx.schedule(config.bomb_fuse, TimerAction::Detonate(bomb));
            }
        }
        Ok(())
    }

    /// Resolve a bomb: damage living players and destroy soft obstacles in range
    pub fn detonate(
        &mut self,
        bomb: &Bomb,
        obstacles: &mut ObstacleField,
        config: &GameConfig,
        fx: &mut Effects,
    ) {
        fx.broadcast(ServerEvent::BombExploded(BombExploded {
            id: bomb.id,
            x: bomb.x,
            y: bomb.y,
        }));

        let victims: Vec<ConnId> = self
            .players
            .values()
            .filter(|p| !p.is_dead)
            .filter(|p| distance(p.x, p.y, bomb.x, bomb.y) <= config.bomb_radius)
            .map(|p| p.player_id)
            .collect();
        for victim in victims {
            let _ = self.inflict(victim, config.bomb_damage, Some(bomb.player_id), config, fx);
        }

        for id in obstacles.soft_within(bomb.x, bomb.y, config.bomb_radius) {
            let _ = obstacles.apply_damage(&id, config.soft_obstacle_health, fx);
        }
    }
}
