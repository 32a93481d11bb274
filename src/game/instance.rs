//! Game instance and the room task that owns it

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::ws::protocol::{ClientIntent, ServerEvent};

use super::map::MapDescriptor;
use super::obstacle::{self, ObstacleField};
use super::player::{PlayerRoster, PlayerState};
use super::powerup::{PowerUpField, Spawner};
use super::timers::TimerRegistry;
use super::{ConnId, Effects, GameError, Recipients, RoomId, TimerAction, TimerKey, TimerKind};

/// Everything one room simulates. Synchronous; the room task drives it.
pub struct GameInstance {
    id: RoomId,
    config: Arc<GameConfig>,
    rng: ChaCha8Rng,
    map: MapDescriptor,
    obstacles: ObstacleField,
    powerups: PowerUpField,
    players: PlayerRoster,
}

impl GameInstance {
    /// Fresh instance. The seed drives the map, obstacle layout and all later
    /// spawns, so equal seeds give equal rooms.
    pub fn new(id: RoomId, config: Arc<GameConfig>, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let map = MapDescriptor::random(&mut rng);
        let obstacles = ObstacleField::new(obstacle::generate(
            config.obstacle_count,
            &config,
            &mut rng,
        ));

        Self {
            id,
            config,
            rng,
            map,
            obstacles,
            powerups: PowerUpField::new(),
            players: PlayerRoster::new(),
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn map(&self) -> &MapDescriptor {
        &self.map
    }

    pub fn players(&self) -> &PlayerRoster {
        &self.players
    }

    pub fn obstacles(&self) -> &ObstacleField {
        &self.obstacles
    }

    pub fn powerups(&self) -> &PowerUpField {
        &self.powerups
    }

    /// Initial power-up fill, run once when the spawner starts
    pub fn fill_powerups(&mut self, fx: &mut Effects) -> usize {
        self.powerups.fill(
            self.players.len(),
            &self.obstacles,
            &self.config,
            &mut self.rng,
            fx,
        )
    }

    /// One spawner tick
    pub fn spawn_tick(&mut self, fx: &mut Effects) -> usize {
        self.powerups.top_up(
            self.players.len(),
            &self.obstacles,
            &self.config,
            &mut self.rng,
            fx,
        )
    }

    /// Add a player and queue the initial sync for them
    pub fn join(
        &mut self,
        conn: ConnId,
        name: String,
        fx: &mut Effects,
    ) -> Result<PlayerState, GameError> {
        if self.players.get(&conn).is_some() {
            return Err(GameError::InvalidTransition("already joined"));
        }

        let player = self.players.join(conn, name, &self.config, &mut self.rng);

        fx.unicast(conn, ServerEvent::CurrentPlayers(self.players.list().clone()));
        fx.unicast(conn, ServerEvent::CurrentPowerUps(self.powerups.list().clone()));
        fx.unicast(conn, ServerEvent::CurrentObstacles(self.obstacles.list().clone()));
        fx.unicast(conn, ServerEvent::MapSeed(self.map.current_seed()));
        fx.broadcast_except(conn, ServerEvent::NewPlayer(player.clone()));
        Ok(player)
    }

    pub fn leave(&mut self, conn: ConnId, fx: &mut Effects) -> Result<PlayerState, GameError> {
        let player = self
            .players
            .leave(&conn)
            .ok_or(GameError::EntityNotFound("player"))?;
        fx.broadcast(ServerEvent::DisconnectPlayer(conn));
        Ok(player)
    }

    /// Route a decoded client intent to the owning subsystem
    pub fn handle_intent(
        &mut self,
        conn: ConnId,
        intent: ClientIntent,
        fx: &mut Effects,
    ) -> Result<(), GameError> {
        let config = Arc::clone(&self.config);

        match intent {
            ClientIntent::Movement(frame) => self.players.report_movement(conn, frame, fx),
            ClientIntent::Shoot(frame) => self.players.report_shoot(conn, frame, &config, fx),
            ClientIntent::Hit(report) => self.players.report_hit(
                report.player_id,
                report.damage,
                report.attacker_id,
                &config,
                fx,
            ),
            ClientIntent::ObstacleHit(report) => {
                self.obstacles
                    .apply_damage(&report.obstacle_id, report.damage, fx)
            }
            ClientIntent::CollectPowerUp(id) => {
                let collector = self
                    .players
                    .get(&conn)
                    .ok_or(GameError::EntityNotFound("player"))?;
                if collector.is_dead {
                    return Err(GameError::InvalidTransition("dead players cannot collect"));
                }
                let kind = self.powerups.collect(id, fx)?;
                self.players.apply_powerup(conn, kind, &config, fx)
            }
            ClientIntent::UseItem(item) => self.players.use_item(conn, item, &config, fx),
        }
    }

    /// Apply a deferred mutation whose delay has elapsed
    pub fn fire_timer(&mut self, action: TimerAction, fx: &mut Effects) -> Result<(), GameError> {
        let config = Arc::clone(&self.config);

        match action {
            TimerAction::Respawn { player } => {
                self.players.respawn(player, &config, &mut self.rng, fx)
            }
            TimerAction::ExpireBuff {
                player,
                buff,
                generation,
            } => self.players.expire_buff(player, buff, generation, fx),
            TimerAction::Detonate(bomb) => {
                self.players
                    .detonate(&bomb, &mut self.obstacles, &config, fx);
                Ok(())
            }
        }
    }
}

/// Messages delivered to a room task
#[derive(Debug)]
pub enum RoomCommand {
    Join {
        conn: ConnId,
        name: String,
        outbox: mpsc::Sender<ServerEvent>,
    },
    Leave {
        conn: ConnId,
    },
    Intent {
        conn: ConnId,
        intent: ClientIntent,
    },
    SpawnTick,
    Timer(TimerAction),
    Shutdown,
    #[cfg(test)]
    Panic,
}

/// Cheap cloneable address of a running room
#[derive(Debug, Clone)]
pub struct RoomHandle {
    pub id: RoomId,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn send(&self, command: RoomCommand) -> Result<(), GameError> {
        self.tx.send(command).map_err(|_| GameError::RoomNotFound)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The task that owns a room's instance. All mutation of the room happens
/// here, one command at a time.
pub struct RoomTask {
    instance: GameInstance,
    mailbox: mpsc::UnboundedReceiver<RoomCommand>,
    members: HashMap<ConnId, mpsc::Sender<ServerEvent>>,
    timers: TimerRegistry,
    spawner: Spawner,
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomTask {
    pub fn new(id: RoomId, config: Arc<GameConfig>, seed: u64) -> (Self, RoomHandle) {
        let (tx, mailbox) = mpsc::unbounded_channel();
        let handle = RoomHandle { id, tx: tx.clone() };

        let task = Self {
            instance: GameInstance::new(id, config, seed),
            mailbox,
            members: HashMap::new(),
            timers: TimerRegistry::new(tx.clone()),
            spawner: Spawner::new(),
            tx,
        };

        (task, handle)
    }

    /// Run until shut down
    pub async fn run(mut self) {
        let room_id = self.instance.id();
        info!(room_id = %room_id, map_seed = self.instance.map().current_seed(), "Room started");

        let mut fx = Effects::new();
        let filled = self.instance.fill_powerups(&mut fx);
        self.flush(fx);
        debug!(room_id = %room_id, filled, "Initial power-up fill");

        let spawn_tx = self.tx.clone();
        self.spawner
            .start(self.instance.config.powerup_spawn_interval, move || {
                spawn_tx.send(RoomCommand::SpawnTick).is_ok()
            });
        debug!(room_id = %room_id, running = self.spawner.is_running(), "Power-up spawner started");

        while let Some(command) = self.mailbox.recv().await {
            if matches!(command, RoomCommand::Shutdown) {
                break;
            }
            self.dispatch(command);
        }

        self.spawner.stop();
        if !self.timers.is_empty() {
            debug!(room_id = %room_id, pending = self.timers.len(), "Cancelling pending timers");
        }
        self.timers.cancel_all();
        info!(room_id = %room_id, "Room stopped");
    }

    /// Apply one command. A panic is contained to the command that raised it.
    fn dispatch(&mut self, command: RoomCommand) {
        let room_id = self.instance.id();

        match panic::catch_unwind(AssertUnwindSafe(|| self.apply(command))) {
            Ok(Ok(fx)) => self.flush(fx),
            Ok(Err(err)) if err.is_churn() => {
                debug!(room_id = %room_id, error = %err, "Command ignored");
            }
            Ok(Err(err)) => warn!(room_id = %room_id, error = %err, "Command rejected"),
            Err(_) => error!(room_id = %room_id, "Room command panicked, continuing"),
        }
    }

    fn apply(&mut self, command: RoomCommand) -> Result<Effects, GameError> {
        let mut fx = Effects::new();

        match command {
            RoomCommand::Join { conn, name, outbox } => {
                self.members.insert(conn, outbox);
                let player = self.instance.join(conn, name, &mut fx)?;
                info!(
                    room_id = %self.instance.id(),
                    conn_id = %conn,
                    name = %player.name,
                    player_count = self.instance.players().len(),
                    "Player joined room"
                );
            }
            RoomCommand::Leave { conn } => {
                self.members.remove(&conn);
                let cancelled = TimerKind::PLAYER
                    .into_iter()
                    .filter(|&kind| self.timers.disarm(&TimerKey { entity: conn, kind }))
                    .count();
                if cancelled > 0 {
                    debug!(room_id = %self.instance.id(), conn_id = %conn, cancelled, "Dropped timers of departing player");
                }
                self.instance.leave(conn, &mut fx)?;
                info!(room_id = %self.instance.id(), conn_id = %conn, "Player left room");
            }
            RoomCommand::Intent { conn, intent } => {
                self.instance.handle_intent(conn, intent, &mut fx)?;
            }
            RoomCommand::SpawnTick => {
                self.instance.spawn_tick(&mut fx);
            }
            RoomCommand::Timer(action) => {
                self.instance.fire_timer(action, &mut fx)?;
            }
            RoomCommand::Shutdown => {}
            #[cfg(test)]
            RoomCommand::Panic => panic!("room command failed"),
        }

        Ok(fx)
    }

    /// Deliver queued events and arm requested timers
    fn flush(&mut self, fx: Effects) {
        if fx.is_empty() {
            return;
        }

        for (after, action) in fx.timers {
            self.timers.arm(after, action);
        }

        for outbound in fx.outbound {
            match outbound.to {
                Recipients::Only(conn) => self.deliver(conn, outbound.event),
                Recipients::Room => self.deliver_all(None, &outbound.event),
                Recipients::RoomExcept(sender) => self.deliver_all(Some(sender), &outbound.event),
            }
        }
    }

    fn deliver_all(&self, except: Option<ConnId>, event: &ServerEvent) {
        for conn in self.members.keys() {
            if Some(*conn) != except {
                self.deliver(*conn, event.clone());
            }
        }
    }

    fn deliver(&self, conn: ConnId, event: ServerEvent) {
        let Some(outbox) = self.members.get(&conn) else {
            return;
        };
        match outbox.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(room_id = %self.instance.id(), conn_id = %conn, "Outbound queue full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(room_id = %self.instance.id(), conn_id = %conn, "Outbound queue closed");
            }
        }
    }
}

/// Spawn a room task and hand back its address
pub fn spawn_room(config: Arc<GameConfig>) -> RoomHandle {
    let (task, handle) = RoomTask::new(Uuid::new_v4(), config, rand::random());
    tokio::spawn(task.run());
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::Inventory;
    use crate::ws::protocol::{HitReport, ItemKind, MovementFrame};
    use std::time::Duration;

    fn instance() -> GameInstance {
        GameInstance::new(Uuid::new_v4(), Arc::new(GameConfig::default()), 42)
    }

    fn unicasts_to(fx: &Effects, conn: ConnId) -> Vec<&ServerEvent> {
        fx.outbound
            .iter()
            .filter(|o| o.to == Recipients::Only(conn))
            .map(|o| &o.event)
            .collect()
    }

    #[test]
    fn same_seed_builds_same_room() {
        let a = instance();
        let b = instance();
        assert_eq!(a.map(), b.map());
        assert_eq!(a.obstacles().len(), 150);
        for (id, obstacle) in a.obstacles().list() {
            assert_eq!(b.obstacles().get(id), Some(obstacle));
        }
    }

    #[test]
    fn join_sends_initial_sync_in_order() {
        let mut game = instance();
        let mut fx = Effects::new();
        game.fill_powerups(&mut fx);

        let first = Uuid::new_v4();
        let mut fx = Effects::new();
        game.join(first, "first".to_string(), &mut fx).unwrap();

        let second = Uuid::new_v4();
        let mut fx = Effects::new();
        game.join(second, "second".to_string(), &mut fx).unwrap();

        let sync = unicasts_to(&fx, second);
        assert_eq!(sync.len(), 4);
        match sync[0] {
            ServerEvent::CurrentPlayers(players) => {
                assert_eq!(players.len(), 2);
                assert!(players.contains_key(&first));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(sync[1], ServerEvent::CurrentPowerUps(p) if p.len() == 5));
        assert!(matches!(sync[2], ServerEvent::CurrentObstacles(o) if o.len() == 150));
        assert!(matches!(sync[3], ServerEvent::MapSeed(seed) if *seed == game.map().seed));

        let last = fx.outbound.last().unwrap();
        assert_eq!(last.to, Recipients::RoomExcept(second));
        assert!(matches!(last.event, ServerEvent::NewPlayer(_)));

        assert!(game.join(second, "again".to_string(), &mut fx).is_err());
    }

    #[test]
    fn dead_player_cannot_collect() {
        let mut game = instance();
        let mut fx = Effects::new();
        game.fill_powerups(&mut fx);
        let a = Uuid::new_v4();
        game.join(a, "a".to_string(), &mut fx).unwrap();

        let report = HitReport {
            player_id: a,
            damage: 100,
            attacker_id: None,
        };
        game.handle_intent(a, ClientIntent::Hit(report), &mut fx).unwrap();

        let id = *game.powerups().list().keys().next().unwrap();
        let result = game.handle_intent(a, ClientIntent::CollectPowerUp(id), &mut fx);
        assert!(matches!(result, Err(GameError::InvalidTransition(_))));
        assert!(game.powerups().list().contains_key(&id));
    }

    #[test]
    fn collect_applies_pickup_once() {
        let mut game = instance();
        let mut fx = Effects::new();
        game.fill_powerups(&mut fx);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        game.join(a, "a".to_string(), &mut fx).unwrap();
        game.join(b, "b".to_string(), &mut fx).unwrap();

        let id = *game.powerups().list().keys().next().unwrap();
        assert!(game
            .handle_intent(a, ClientIntent::CollectPowerUp(id), &mut fx)
            .is_ok());
        assert!(matches!(
            game.handle_intent(b, ClientIntent::CollectPowerUp(id), &mut fx),
            Err(GameError::EntityNotFound(_))
        ));
        assert_eq!(game.powerups().len(), 4);
    }

    #[test]
    fn timers_for_departed_players_are_not_found() {
        let mut game = instance();
        let mut fx = Effects::new();
        let a = Uuid::new_v4();
        game.join(a, "a".to_string(), &mut fx).unwrap();
        game.leave(a, &mut fx).unwrap();

        let result = game.fire_timer(TimerAction::Respawn { player: a }, &mut fx);
        assert!(matches!(result, Err(GameError::EntityNotFound(_))));
        assert!(game.leave(a, &mut fx).is_err());
    }

    async fn recv(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("timed out")
            .expect("outbox closed")
    }

    async fn join(handle: &RoomHandle, name: &str) -> (ConnId, mpsc::Receiver<ServerEvent>) {
        let conn = Uuid::new_v4();
        let (outbox, mut rx) = mpsc::channel(256);
        handle
            .send(RoomCommand::Join {
                conn,
                name: name.to_string(),
                outbox,
            })
            .unwrap();
        while !matches!(recv(&mut rx).await, ServerEvent::MapSeed(_)) {}
        (conn, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn room_task_relays_movement_to_others_only() {
        let handle = spawn_room(Arc::new(GameConfig::default()));
        let (a, mut rx_a) = join(&handle, "a").await;
        let (_b, mut rx_b) = join(&handle, "b").await;
        while !matches!(recv(&mut rx_a).await, ServerEvent::NewPlayer(_)) {}

        let frame = MovementFrame {
            player_id: String::new(),
            x: 10.0,
            y: 20.0,
            rotation: 0.0,
            turret_rotation: 0.0,
        };
        handle
            .send(RoomCommand::Intent {
                conn: a,
                intent: ClientIntent::Movement(frame),
            })
            .unwrap();

        loop {
            if let ServerEvent::PlayerMoved(moved) = recv(&mut rx_b).await {
                assert_eq!(moved.player_id, a.to_string());
                break;
            }
        }
        while let Ok(event) = rx_a.try_recv() {
            assert!(!matches!(event, ServerEvent::PlayerMoved(_)));
        }

        handle.send(RoomCommand::Shutdown).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn room_task_respawns_after_delay() {
        let config = Arc::new(GameConfig::default());
        let handle = spawn_room(config.clone());
        let (a, mut rx) = join(&handle, "a").await;

        let hit_at = tokio::time::Instant::now();
        handle
            .send(RoomCommand::Intent {
                conn: a,
                intent: ClientIntent::Hit(HitReport {
                    player_id: a,
                    damage: 150,
                    attacker_id: None,
                }),
            })
            .unwrap();

        let mut deaths = 0;
        loop {
            match recv(&mut rx).await {
                ServerEvent::PlayerDied(id) => {
                    assert_eq!(id, a);
                    deaths += 1;
                }
                ServerEvent::PlayerRespawned(player) => {
                    assert!(hit_at.elapsed() >= config.respawn_delay);
                    assert_eq!(player.health, player.max_health);
                    assert!(!player.is_dead);
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(deaths, 1);

        tokio::time::sleep(config.respawn_delay * 2).await;
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, ServerEvent::PlayerRespawned(_)));
        }
        handle.send(RoomCommand::Shutdown).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn room_task_survives_a_panicking_command() {
        let handle = spawn_room(Arc::new(GameConfig::default()));
        let (a, mut rx_a) = join(&handle, "a").await;
        let (_b, mut rx_b) = join(&handle, "b").await;
        while !matches!(recv(&mut rx_a).await, ServerEvent::NewPlayer(_)) {}

        handle.send(RoomCommand::Panic).unwrap();
        handle
            .send(RoomCommand::Intent {
                conn: a,
                intent: ClientIntent::Movement(MovementFrame {
                    player_id: String::new(),
                    x: 5.0,
                    y: 6.0,
                    rotation: 0.0,
                    turret_rotation: 0.0,
                }),
            })
            .unwrap();

        loop {
            if let ServerEvent::PlayerMoved(moved) = recv(&mut rx_b).await {
                assert_eq!(moved.player_id, a.to_string());
                assert_eq!((moved.x, moved.y), (5.0, 6.0));
                break;
            }
        }
        assert!(!handle.is_closed());
        handle.send(RoomCommand::Shutdown).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_cancels_pending_respawn() {
        let (mut task, _handle) =
            RoomTask::new(Uuid::new_v4(), Arc::new(GameConfig::default()), 9);
        let conn = Uuid::new_v4();
        let (outbox, _rx) = mpsc::channel(256);

        let fx = task
            .apply(RoomCommand::Join {
                conn,
                name: "a".to_string(),
                outbox,
            })
            .unwrap();
        task.flush(fx);

        let fx = task
            .apply(RoomCommand::Intent {
                conn,
                intent: ClientIntent::Hit(HitReport {
                    player_id: conn,
                    damage: 100,
                    attacker_id: None,
                }),
            })
            .unwrap();
        task.flush(fx);
        assert_eq!(task.timers.len(), 1);

        let fx = task.apply(RoomCommand::Leave { conn }).unwrap();
        task.flush(fx);
        assert!(task.timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn room_task_detonates_bomb_after_fuse() {
        let config = Arc::new(GameConfig {
            min_powerups: 0,
            ..GameConfig::default()
        });
        let (mut task, handle) = RoomTask::new(Uuid::new_v4(), config, 5);
        let conn = Uuid::new_v4();
        let mut fx = Effects::new();
        task.instance.join(conn, "a".to_string(), &mut fx).unwrap();
        task.instance
            .players
            .apply_powerup(conn, crate::game::powerup::PowerUpType::Bomb, &task.instance.config, &mut fx)
            .unwrap();
        let (outbox, mut rx) = mpsc::channel(256);
        task.members.insert(conn, outbox);
        tokio::spawn(task.run());

        handle
            .send(RoomCommand::Intent {
                conn,
                intent: ClientIntent::UseItem(ItemKind::Bomb),
            })
            .unwrap();

        let mut saw_inventory = false;
        loop {
            match recv(&mut rx).await {
                ServerEvent::InventoryUpdate(inventory) => {
                    assert_eq!(inventory, Inventory::default());
                    saw_inventory = true;
                }
                ServerEvent::BombExploded(_) => break,
                _ => {}
            }
        }
        assert!(saw_inventory);
        handle.send(RoomCommand::Shutdown).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_the_mailbox() {
        let handle = spawn_room(Arc::new(GameConfig::default()));
        tokio_test::assert_ok!(handle.send(RoomCommand::Shutdown));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_closed());
        assert!(matches!(
            handle.send(RoomCommand::SpawnTick),
            Err(GameError::RoomNotFound)
        ));
    }
}
