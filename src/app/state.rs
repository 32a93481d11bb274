//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::map::MapCatalog;
use crate::matchmaking::RoomManager;
use crate::ws::codec::Codec;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub codec: Arc<Codec>,
    pub rooms: Arc<RoomManager>,
    pub maps: Arc<MapCatalog>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);

        // Gameplay tuning is shared read-only by every room
        let game = Arc::new(config.game.clone());
        let rooms = Arc::new(RoomManager::new(game));

        let codec = Arc::new(Codec::new(config.max_frame_bytes));
        let maps = Arc::new(MapCatalog::new(&mut rand::thread_rng()));

        Self {
            config,
            codec,
            rooms,
            maps,
        }
    }
}
