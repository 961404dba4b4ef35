//! Configuration module - environment variable parsing and tuning tables

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A horizontal platform span; its top surface sits at `y`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Floor {
    pub y: f32,
    #[serde(default = "Floor::default_height")]
    pub height: f32,
    pub x1: f32,
    pub x2: f32,
}

impl Floor {
    pub const fn new(y: f32, height: f32, x1: f32, x2: f32) -> Self {
        Self { y, height, x1, x2 }
    }

    fn default_height() -> f32 {
        12.0
    }

    pub fn min_x(&self) -> f32 {
        self.x1.min(self.x2)
    }

    pub fn max_x(&self) -> f32 {
        self.x1.max(self.x2)
    }
}

/// World bounds and static geometry
#[derive(Debug, Clone, PartialEq)]
pub struct WorldConfig {
    /// Left/right world walls are at x = 0 and x = width
    pub width: f32,
    /// Anything falling below this is outside the world
    pub height: f32,
    /// Infinite ground plane
    pub ground_y: f32,
    pub floors: Vec<Floor>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 6000.0,
            height: 900.0,
            ground_y: 700.0,
            floors: default_floors(),
        }
    }
}

/// Stock arena: ground, three tiers of platforms per zone, and castle stairs
fn default_floors() -> Vec<Floor> {
    let mut floors = vec![
        Floor::new(700.0, 40.0, 0.0, 6000.0),
        Floor::new(520.0, 22.0, 140.0, 1460.0),
        Floor::new(380.0, 18.0, 360.0, 1240.0),
        Floor::new(250.0, 16.0, 640.0, 960.0),
        Floor::new(520.0, 22.0, 2540.0, 3860.0),
        Floor::new(380.0, 18.0, 2760.0, 3540.0),
        Floor::new(250.0, 16.0, 3040.0, 3360.0),
        Floor::new(520.0, 22.0, 4540.0, 5860.0),
        Floor::new(380.0, 18.0, 4760.0, 5540.0),
        Floor::new(250.0, 16.0, 5040.0, 5360.0),
        Floor::new(380.0, 14.0, 30.0, 230.0),
        Floor::new(380.0, 14.0, 5770.0, 5970.0),
    ];
    // Castle stairs step down 40px at a time, 24px wider per step
    for step in 0..8 {
        let y = 380.0 + 40.0 * step as f32;
        let reach = 24.0 * (step + 1) as f32;
        floors.push(Floor::new(y, 12.0, 230.0, 230.0 + reach));
        floors.push(Floor::new(y, 12.0, 5770.0 - reach, 5770.0));
    }
    floors
}

/// Snapshot blending parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileConfig {
    /// Exponential smoothing rate (1/s)
    pub smooth_rate: f32,
    /// Local divergence above this snaps instantly
    pub teleport_threshold: f32,
    /// Lower bound on the local blend factor
    pub min_correction: f32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            smooth_rate: 12.0,
            teleport_threshold: 120.0,
            min_correction: 0.35,
        }
    }
}

/// Trail sampling limits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailTuning {
    pub max_points: usize,
    /// A sample further than this from the previous one resets the trail
    pub reset_distance: f32,
    pub min_interval_ms: f64,
    pub max_interval_ms: f64,
}

impl Default for TrailTuning {
    fn default() -> Self {
        Self {
            max_points: 18,
            reset_distance: 240.0,
            min_interval_ms: 8.0,
            max_interval_ms: 20.0,
        }
    }
}

/// Projectile baseline and lifetime parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectileConfig {
    /// Nominal launch speed, used to normalise speeds
    pub speed: f32,
    /// Gravity applied while extrapolating stale projectiles
    pub gravity: f32,
    /// Margin added around character and horse boxes
    pub entity_margin: f32,
    pub stuck_ttl_ms: f64,
    pub stale_ttl_ms: f64,
    pub trail: TrailTuning,
}

impl Default for ProjectileConfig {
    fn default() -> Self {
        Self {
            speed: 900.0,
            gravity: 1200.0,
            entity_margin: 3.0,
            stuck_ttl_ms: 12_000.0,
            stale_ttl_ms: 6_000.0,
            trail: TrailTuning::default(),
        }
    }
}

/// Ragdoll solver tuning. These are empirical, not physical constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RagdollTuning {
    pub gravity: f32,
    pub damping: f32,
    /// Per-step displacement cap
    pub max_step_speed: f32,
    pub base_iterations: u32,
    /// Cap on the decaying bonus iterations after an impact
    pub max_extra_iterations: f32,
    /// Bonus iterations decay at this many per second
    pub extra_decay_rate: f32,
    pub min_step: f32,
    pub max_step: f32,
    /// Sleep timer threshold past which resting motion is damped
    pub sleep_after: f32,
    /// Fraction of implicit velocity kept per step while asleep
    pub sleep_damping: f32,
    /// Speed that normalises impact velocity to 1.0
    pub impact_speed_baseline: f32,
}

impl Default for RagdollTuning {
    fn default() -> Self {
        Self {
            gravity: 2800.0,
            damping: 0.992,
            max_step_speed: 56.0,
            base_iterations: 5,
            max_extra_iterations: 3.0,
            extra_decay_rate: 30.0,
            min_step: 1.0 / 240.0,
            max_step: 0.05,
            sleep_after: 0.45,
            sleep_damping: 0.15,
            impact_speed_baseline: 900.0,
        }
    }
}

/// Combat routing thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CombatTuning {
    /// Arrows may sever limbs only in always-active ragdoll mode
    pub ragdoll_always_active: bool,
    pub arrow_sever_damage_min: f32,
    /// Shared by sword and ballista
    pub melee_sever_damage_min: f32,
    /// Damage at which a hit is classified as knockback
    pub knockback_damage: f32,
    /// Normalised projectile speed at which a hit is classified as knockback
    pub knockback_speed_norm: f32,
    /// Probability that an unforced sever picks an arm over a leg
    pub arm_sever_bias: f64,
}

impl Default for CombatTuning {
    fn default() -> Self {
        Self {
            ragdoll_always_active: true,
            arrow_sever_damage_min: 35.0,
            melee_sever_damage_min: 28.0,
            knockback_damage: 22.0,
            knockback_speed_norm: 0.95,
            arm_sever_bias: 0.58,
        }
    }
}

/// Deduplication window for miss effects
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactDedupe {
    pub window_ms: f64,
    pub distance: f32,
    pub history_ms: f64,
    pub history_len: usize,
    pub max_bursts: usize,
}

impl Default for ImpactDedupe {
    fn default() -> Self {
        Self {
            window_ms: 160.0,
            distance: 44.0,
            history_ms: 600.0,
            history_len: 40,
            max_bursts: 24,
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub world: WorldConfig,
    pub reconcile: ReconcileConfig,
    pub projectile: ProjectileConfig,
    pub ragdoll: RagdollTuning,
    pub combat: CombatTuning,
    pub dedupe: ImpactDedupe,
    /// Character box size
    pub player_width: f32,
    pub player_height: f32,
    /// Seed for presentation randomness (limb choice)
    pub rng_seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            world: WorldConfig::default(),
            reconcile: ReconcileConfig::default(),
            projectile: ProjectileConfig::default(),
            ragdoll: RagdollTuning::default(),
            combat: CombatTuning::default(),
            dedupe: ImpactDedupe::default(),
            player_width: 40.0,
            player_height: 80.0,
            rng_seed: 0x5eed,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(level) = env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        override_from_env("SIM_SMOOTH_RATE", &mut config.reconcile.smooth_rate)?;
        override_from_env("SIM_TELEPORT_THRESHOLD", &mut config.reconcile.teleport_threshold)?;
        override_from_env("SIM_MIN_CORRECTION", &mut config.reconcile.min_correction)?;
        override_from_env("SIM_PROJECTILE_SPEED", &mut config.projectile.speed)?;
        override_from_env("SIM_PROJECTILE_GRAVITY", &mut config.projectile.gravity)?;
        override_from_env("SIM_GRAVITY", &mut config.ragdoll.gravity)?;
        override_from_env("SIM_WORLD_WIDTH", &mut config.world.width)?;
        override_from_env("SIM_WORLD_HEIGHT", &mut config.world.height)?;
        override_from_env("SIM_GROUND_Y", &mut config.world.ground_y)?;
        override_from_env("SIM_RAGDOLL_ALWAYS_ACTIVE", &mut config.combat.ragdoll_always_active)?;
        override_from_env("SIM_ARROW_SEVER_DAMAGE_MIN", &mut config.combat.arrow_sever_damage_min)?;
        override_from_env("SIM_RNG_SEED", &mut config.rng_seed)?;
        config.ragdoll.impact_speed_baseline = config.projectile.speed;

        if let Ok(raw) = env::var("SIM_FLOORS_JSON") {
            config.world.floors = parse_floors(&raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject geometry and rates the simulation cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let world = &self.world;
        if !(world.width.is_finite() && world.width > 0.0) {
            return Err(ConfigError::Geometry(format!("world width {} must be positive", world.width)));
        }
        if !(world.height.is_finite() && world.ground_y.is_finite()) {
            return Err(ConfigError::Geometry("world height and ground must be finite".to_string()));
        }
        if let Some(floor) = world
            .floors
            .iter()
            .find(|f| !(f.y.is_finite() && f.x1.is_finite() && f.x2.is_finite() && f.height.is_finite()))
        {
            return Err(ConfigError::Geometry(format!("floor {:?} has non-finite values", floor)));
        }
        if !(self.reconcile.smooth_rate.is_finite() && self.reconcile.smooth_rate >= 0.0) {
            return Err(ConfigError::Invalid {
                key: "SIM_SMOOTH_RATE",
                value: self.reconcile.smooth_rate.to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a floor list from its JSON form
pub fn parse_floors(raw: &str) -> Result<Vec<Floor>, ConfigError> {
    serde_json::from_str(raw).map_err(|e| ConfigError::Geometry(format!("SIM_FLOORS_JSON: {}", e)))
}

fn override_from_env<T: FromStr>(key: &'static str, slot: &mut T) -> Result<(), ConfigError> {
    if let Ok(raw) = env::var(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw.clone() })?;
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("Invalid world geometry: {0}")]
    Geometry(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_floors_include_ground_and_stairs() {
        let floors = default_floors();
        assert_eq!(floors.len(), 28);
        assert_eq!(floors[0], Floor::new(700.0, 40.0, 0.0, 6000.0));
        assert!(floors.contains(&Floor::new(660.0, 12.0, 230.0, 422.0)));
        assert!(floors.contains(&Floor::new(660.0, 12.0, 5578.0, 5770.0)));
    }

    #[test]
    fn floors_parse_with_default_height() {
        let floors = parse_floors(r#"[{"y": 500, "x1": 10, "x2": 90}]"#).unwrap();
        assert_eq!(floors, vec![Floor::new(500.0, 12.0, 10.0, 90.0)]);
        assert!(parse_floors("not json").is_err());
    }

    #[test]
    fn validate_rejects_bad_world() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.world.width = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::Geometry(_))));
    }
}
