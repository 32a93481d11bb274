//! Configuration module - environment variable parsing and gameplay tuning

use std::env;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::str::FromStr;
use std::time::Duration;

/// Accepted values for `MAX_FRAME_BYTES`
pub const FRAME_BYTES_RANGE: RangeInclusive<u64> = 128..=1_048_576;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origin for CORS ("*" allows any)
    pub client_origin: String,
    /// Upper bound on a single binary frame body
    pub max_frame_bytes: u64,
    /// Gameplay tuning shared by every room
    pub game: GameConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        };

        let mut game = GameConfig::default();
        game.room_capacity = parse_or("ROOM_CAPACITY", game.room_capacity)?;
        game.obstacle_count = parse_or("OBSTACLE_COUNT", game.obstacle_count)?;

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),
            max_frame_bytes: parse_or("MAX_FRAME_BYTES", 1024)?,
            game,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would leave the server unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.game.room_capacity == 0 {
            return Err(ConfigError::Invalid("ROOM_CAPACITY"));
        }
        if !FRAME_BYTES_RANGE.contains(&self.max_frame_bytes) {
            return Err(ConfigError::Invalid("MAX_FRAME_BYTES"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            log_level: "info".to_string(),
            client_origin: "*".to_string(),
            max_frame_bytes: 1024,
            game: GameConfig::default(),
        }
    }
}

/// Read an optional numeric variable, keeping the default when unset
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Gameplay tunables. Built once at startup and shared read-only by all rooms.
#[derive(Clone, Debug)]
pub struct GameConfig {
    /// Maximum members per room
    pub room_capacity: usize,
    /// How often rooms left without members are shut down
    pub room_sweep_interval: Duration,

    // Players
    pub default_health: i32,
    pub spawn_margin: f32,
    pub respawn_delay: Duration,
    pub heal_amount: i32,
    pub inventory_cap: u8,

    // Weapons
    pub bullet_damage: i32,
    pub buffed_bullet_damage: i32,
    pub bullet_distance: i32,
    pub missile_damage: i32,
    pub missile_spawn_offset: f32,
    pub bomb_damage: i32,
    pub bomb_radius: f32,
    pub bomb_fuse: Duration,

    // Power-ups
    pub powerup_duration: Duration,
    pub powerup_spawn_interval: Duration,
    pub powerup_spawn_batch: usize,
    pub min_powerups: usize,
    pub max_powerups: usize,
    pub powerups_per_player: usize,
    pub powerup_clearance: f32,
    pub powerup_placement_attempts: u32,

    // Obstacles
    pub obstacle_count: usize,
    /// Probability that a generated obstacle is hard
    pub hard_obstacle_weight: f64,
    pub obstacle_margin: f32,
    pub soft_obstacle_health: i32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            room_capacity: 10,
            room_sweep_interval: Duration::from_secs(30),

            default_health: 100,
            spawn_margin: 50.0,
            respawn_delay: Duration::from_millis(3000),
            heal_amount: 50,
            inventory_cap: 2,

            bullet_damage: 10,
            buffed_bullet_damage: 20,
            bullet_distance: 800,
            missile_damage: 100,
            missile_spawn_offset: 45.0,
            bomb_damage: 50,
            bomb_radius: 150.0,
            bomb_fuse: Duration::from_millis(2000),

            powerup_duration: Duration::from_millis(10_000),
            powerup_spawn_interval: Duration::from_millis(2000),
            powerup_spawn_batch: 5,
            min_powerups: 5,
            max_powerups: 30,
            powerups_per_player: 3,
            powerup_clearance: 80.0,
            powerup_placement_attempts: 10,

            obstacle_count: 150,
            hard_obstacle_weight: 0.6,
            obstacle_margin: 100.0,
            soft_obstacle_health: 100,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
