//! Seeded tile map descriptor.
//!
//! The server never materializes the tile grid; the seed is authoritative and
//! clients regenerate the grid with the same linear congruential generator.
//! The LCG constants, the column-major iteration order and the bucket
//! thresholds are all part of the wire contract.

use rand::Rng;
use serde::Serialize;

/// Map width in world units
pub const MAP_WIDTH: u32 = 4000;
/// Map height in world units
pub const MAP_HEIGHT: u32 = 4000;
/// Tile edge in world units
pub const TILE_SIZE: u32 = 40;

/// Seed of the fixed "Desert Storm" map
pub const DESERT_SEED: u32 = 123_456;
/// Seed of the fixed "Deep Forest" map
pub const FOREST_SEED: u32 = 987_654;

const LCG_MULTIPLIER: u32 = 1_664_525;
const LCG_INCREMENT: u32 = 1_013_904_223;
/// 2^32; the modulus is implied by wrapping u32 arithmetic
const LCG_MODULUS: f64 = 4_294_967_296.0;

/// Ground tile types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tile {
    GroundGrass,
    GroundDirt,
    GroundSand,
}

impl Tile {
    /// Bucket a uniform sample. The dirt check runs first, so sand is never
    /// produced by this contract version; clients apply the same order.
    fn from_sample(r: f64) -> Self {
        if r > 0.8 {
            Tile::GroundDirt
        } else if r > 0.95 {
            Tile::GroundSand
        } else {
            Tile::GroundGrass
        }
    }
}

/// Per-room map descriptor shared by every member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MapDescriptor {
    pub seed: u32,
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
}

impl MapDescriptor {
    pub fn new(seed: u32) -> Self {
        Self {
            seed,
            width: MAP_WIDTH,
            height: MAP_HEIGHT,
            tile_size: TILE_SIZE,
        }
    }

    /// Descriptor with a seed drawn from the given random source
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::new(rng.gen())
    }

    pub fn current_seed(&self) -> u32 {
        self.seed
    }

    pub fn columns(&self) -> u32 {
        self.width / self.tile_size
    }

    pub fn rows(&self) -> u32 {
        self.height / self.tile_size
    }

    /// Tile at grid column `x`, row `y`
    pub fn tile_at(&self, x: u32, y: u32) -> Tile {
        tile_at(self.seed, x, y)
    }

    /// Tile at grid cell `(x, y)`, `None` outside the grid
    pub fn checked_tile_at(&self, x: u32, y: u32) -> Option<Tile> {
        (x < self.columns() && y < self.rows()).then(|| self.tile_at(x, y))
    }

    /// Grid as one `Vec` per column, matching the client's nesting
    pub fn matrix(&self) -> Vec<Vec<Tile>> {
        let rows = self.rows().max(1) as usize;
        let tiles: Vec<Tile> = self.tiles().collect();
        tiles.chunks(rows).map(<[Tile]>::to_vec).collect()
    }

    /// Whole grid in client iteration order (column-major)
    pub fn tiles(&self) -> impl Iterator<Item = Tile> {
        let mut state = self.seed;
        let count = self.columns() as u64 * self.rows() as u64;
        (0..count).map(move |_| {
            state = lcg_step(state);
            Tile::from_sample(state as f64 / LCG_MODULUS)
        })
    }
}

/// Pure tile lookup for the standard map dimensions.
///
/// Tile `(x, y)` consumes the `x * rows + y + 1`-th LCG output, reached by
/// jumping ahead instead of stepping through the grid.
pub fn tile_at(seed: u32, x: u32, y: u32) -> Tile {
    let rows = (MAP_HEIGHT / TILE_SIZE) as u64;
    let steps = x as u64 * rows + y as u64 + 1;
    let state = lcg_skip(seed, steps);
    Tile::from_sample(state as f64 / LCG_MODULUS)
}

fn lcg_step(state: u32) -> u32 {
    LCG_MULTIPLIER
        .wrapping_mul(state)
        .wrapping_add(LCG_INCREMENT)
}

/// Advance the generator `steps` times in O(log steps)
fn lcg_skip(seed: u32, mut steps: u64) -> u32 {
    let mut acc_mult: u32 = 1;
    let mut acc_plus: u32 = 0;
    let mut cur_mult = LCG_MULTIPLIER;
    let mut cur_plus = LCG_INCREMENT;

    while steps > 0 {
        if steps & 1 == 1 {
            acc_mult = acc_mult.wrapping_mul(cur_mult);
            acc_plus = acc_plus.wrapping_mul(cur_mult).wrapping_add(cur_plus);
        }
        cur_plus = cur_mult.wrapping_add(1).wrapping_mul(cur_plus);
        cur_mult = cur_mult.wrapping_mul(cur_mult);
        steps >>= 1;
    }

    acc_mult.wrapping_mul(seed).wrapping_add(acc_plus)
}

/// Uniform point inside the map, `margin` away from each edge
pub fn random_point<R: Rng + ?Sized>(margin: f32, rng: &mut R) -> (f32, f32) {
    let max_x = (MAP_WIDTH as f32 - margin).max(margin + 1.0);
    let max_y = (MAP_HEIGHT as f32 - margin).max(margin + 1.0);
    (
        rng.gen_range(margin..max_x).floor(),
        rng.gen_range(margin..max_y).floor(),
    )
}

/// Entry in the process-wide map list served over HTTP
#[derive(Debug, Clone, Serialize)]
pub struct MapInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub seed: u32,
    pub width: u32,
    pub height: u32,
}

impl MapInfo {
    pub fn descriptor(&self) -> MapDescriptor {
        MapDescriptor::new(self.seed)
    }
}

/// Read-only list of available maps, independent of any room
#[derive(Debug, Clone)]
pub struct MapCatalog {
    maps: Vec<MapInfo>,
}

impl MapCatalog {
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let entry = |id, name, seed| MapInfo {
            id,
            name,
            seed,
            width: MAP_WIDTH,
            height: MAP_HEIGHT,
        };

        Self {
            maps: vec![
                entry("map_default", "Default Map", rng.gen()),
                entry("map_desert", "Desert Storm", DESERT_SEED),
                entry("map_forest", "Deep Forest", FOREST_SEED),
            ],
        }
    }

    pub fn available(&self) -> &[MapInfo] {
        &self.maps
    }

    pub fn get(&self, id: &str) -> Option<&MapInfo> {
        self.maps.iter().find(|map| map.id == id)
    }
}
