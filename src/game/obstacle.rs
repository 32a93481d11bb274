//! Obstacle field: terrain generated once per room

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::config::GameConfig;
use crate::ws::protocol::{ObstacleHealth, ServerEvent};

use super::map::{MAP_HEIGHT, MAP_WIDTH};
use super::{distance, Effects, GameError};

pub type ObstacleId = String;

/// Hard obstacles are indestructible; soft ones have health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleCategory {
    Hard,
    Soft,
}

/// Shape tag. The valid set depends on the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleVariant {
    Box,
    WallH,
    WallV,
    Corner,
    Bush,
    Barrel,
}

impl ObstacleCategory {
    pub fn variants(self) -> &'static [ObstacleVariant] {
        match self {
            ObstacleCategory::Hard => &[
                ObstacleVariant::Box,
                ObstacleVariant::WallH,
                ObstacleVariant::WallV,
                ObstacleVariant::Corner,
            ],
            ObstacleCategory::Soft => &[
                ObstacleVariant::Box,
                ObstacleVariant::Bush,
                ObstacleVariant::Barrel,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObstacleState {
    pub id: ObstacleId,
    pub x: f32,
    pub y: f32,
    #[serde(rename = "type")]
    pub category: ObstacleCategory,
    pub variant: ObstacleVariant,
    /// Soft obstacles only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<i32>,
}

/// Generate `count` obstacles inside the map minus the configured margin
pub fn generate<R: Rng + ?Sized>(
    count: usize,
    config: &GameConfig,
    rng: &mut R,
) -> Vec<ObstacleState> {
    let margin = config.obstacle_margin;
    let max_x = (MAP_WIDTH as f32 - margin).max(margin);
    let max_y = (MAP_HEIGHT as f32 - margin).max(margin);

    (0..count)
        .map(|i| {
            let category = if rng.gen_bool(config.hard_obstacle_weight) {
                ObstacleCategory::Hard
            } else {
                ObstacleCategory::Soft
            };
            let variant = *category
                .variants()
                .choose(&mut *rng)
                .unwrap_or(&ObstacleVariant::Box);

            ObstacleState {
                id: format!("obs_{}", i),
                x: rng.gen_range(margin..=max_x).floor(),
                y: rng.gen_range(margin..=max_y).floor(),
                category,
                variant,
                health: match category {
                    ObstacleCategory::Soft => Some(config.soft_obstacle_health),
                    ObstacleCategory::Hard => None,
                },
            }
        })
        .collect()
}

/// Live obstacles of one room
#[derive(Debug, Default)]
pub struct ObstacleField {
    obstacles: HashMap<ObstacleId, ObstacleState>,
}

impl ObstacleField {
    pub fn new(obstacles: Vec<ObstacleState>) -> Self {
        Self {
            obstacles: obstacles.into_iter().map(|o| (o.id.clone(), o)).collect(),
        }
    }

    /// Full obstacle map for initial sync
    pub fn list(&self) -> &HashMap<ObstacleId, ObstacleState> {
        &self.obstacles
    }

    pub fn get(&self, id: &str) -> Option<&ObstacleState> {
        self.obstacles.get(id)
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    /// True if any obstacle center lies strictly within `radius` of the point
    pub fn any_within(&self, x: f32, y: f32, radius: f32) -> bool {
        self.obstacles
            .values()
            .any(|o| distance(o.x, o.y, x, y) < radius)
    }

    /// Ids of soft obstacles within `radius` (inclusive) of the point
    pub fn soft_within(&self, x: f32, y: f32, radius: f32) -> Vec<ObstacleId> {
        self.obstacles
            .values()
            .filter(|o| o.category == ObstacleCategory::Soft)
            .filter(|o| distance(o.x, o.y, x, y) <= radius)
            .map(|o| o.id.clone())
            .collect()
    }

    /// Damage a soft obstacle, removing it once its health reaches zero.
    /// Unknown ids and hard obstacles are left untouched.
    pub fn apply_damage(
        &mut self,
        id: &str,
        amount: i32,
        fx: &mut Effects,
    ) -> Result<(), GameError> {
        if amount <= 0 {
            return Err(GameError::InvalidTransition("non-positive obstacle damage"));
        }

        let obstacle = self
            .obstacles
            .get_mut(id)
            .ok_or(GameError::EntityNotFound("obstacle"))?;

        let Some(health) = obstacle.health.as_mut() else {
            return Err(GameError::InvalidTransition("hard obstacles are indestructible"));
        };

        *health = health.saturating_sub(amount);
        if *health > 0 {
            fx.broadcast(ServerEvent::ObstacleHealthUpdate(ObstacleHealth {
                id: id.to_string(),
                health: *health,
            }));
        } else {
            *health = 0;
            self.obstacles.remove(id);
            fx.broadcast(ServerEvent::ObstacleRemoved(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn field(seed: u64) -> ObstacleField {
        let config = GameConfig::default();
        ObstacleField::new(generate(
            config.obstacle_count,
            &config,
            &mut ChaCha8Rng::seed_from_u64(seed),
        ))
    }

    fn first_of(field: &ObstacleField, category: ObstacleCategory) -> ObstacleId {
        field
            .list()
            .values()
            .find(|o| o.category == category)
            .map(|o| o.id.clone())
            .unwrap()
    }

    #[test]
    fn generates_exact_count_within_margin() {
        let config = GameConfig::default();
        let obstacles = generate(150, &config, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(obstacles.len(), 150);

        let hard = obstacles
            .iter()
            .filter(|o| o.category == ObstacleCategory::Hard)
            .count();
        // 60% of 150 = 90; allow generous sampling noise
        assert!((65..=115).contains(&hard), "hard count {hard}");

        for o in &obstacles {
            assert!(o.x >= 100.0 && o.x <= MAP_WIDTH as f32 - 100.0);
            assert!(o.y >= 100.0 && o.y <= MAP_HEIGHT as f32 - 100.0);
            assert!(o.category.variants().contains(&o.variant));
            assert_eq!(o.health.is_some(), o.category == ObstacleCategory::Soft);
        }
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        let config = GameConfig::default();
        let a = generate(20, &config, &mut ChaCha8Rng::seed_from_u64(3));
        let b = generate(20, &config, &mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn soft_obstacle_health_decreases_until_removed() {
        let mut field = field(1);
        let id = first_of(&field, ObstacleCategory::Soft);
        let mut fx = Effects::new();
        let mut last = 100;

        for _ in 0..3 {
            field.apply_damage(&id, 30, &mut fx).unwrap();
            let health = field.get(&id).unwrap().health.unwrap();
            assert!(health < last);
            last = health;
        }
        assert_eq!(last, 10);

        field.apply_damage(&id, 30, &mut fx).unwrap();
        assert!(field.get(&id).is_none());
        assert!(!field.list().contains_key(&id));
        assert!(matches!(
            fx.outbound.last().map(|o| &o.event),
            Some(ServerEvent::ObstacleRemoved(removed)) if *removed == id
        ));

        let before = fx.outbound.len();
        assert!(matches!(
            field.apply_damage(&id, 30, &mut fx),
            Err(GameError::EntityNotFound(_))
        ));
        assert_eq!(fx.outbound.len(), before);
    }

    #[test]
    fn hard_obstacles_ignore_damage() {
        let mut field = field(2);
        let id = first_of(&field, ObstacleCategory::Hard);
        let before = field.len();
        let mut fx = Effects::new();

        assert!(field.apply_damage(&id, 1000, &mut fx).is_err());
        assert_eq!(field.len(), before);
        assert!(fx.is_empty());
    }

    #[test]
    fn unknown_and_non_positive_damage_are_no_ops() {
        let mut field = field(4);
        let id = first_of(&field, ObstacleCategory::Soft);
        let mut fx = Effects::new();

        assert!(field.apply_damage("obs_missing", 10, &mut fx).is_err());
        assert!(field.apply_damage(&id, 0, &mut fx).is_err());
        assert!(field.apply_damage(&id, -50, &mut fx).is_err());
        assert_eq!(field.get(&id).unwrap().health, Some(100));
        assert!(fx.is_empty());
    }

    #[test]
    fn hard_obstacles_serialize_without_health() {
        let field = field(5);
        let id = first_of(&field, ObstacleCategory::Hard);
        let json = serde_json::to_value(field.get(&id).unwrap()).unwrap();
        assert_eq!(json["type"], "hard");
        assert!(json.get("health").is_none());
    }
}
