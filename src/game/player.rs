//! Client-side player entity

use glam::Vec2;
use serde::Serialize;

use crate::ws::protocol::{HitSource, Loadout, PlayerId, PlayerSnapshot, SwordAttack, SwordPhase, Team};

use super::math::{coerce_or, finite_or, Rect};
use super::ragdoll::RagdollState;

/// Armor-break pulse length after a stage increase
const ARMOR_PULSE_MS: f64 = 260.0;
const MAX_ARMOR_STAGE: u8 = 3;
const MIN_PLAYER_HEIGHT: f32 = 28.0;
const CROUCH_HEIGHT_RATIO: f32 = 0.7;

/// Who drives this entity between snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerMode {
    /// Locally predicted
    Local,
    Remote,
}

/// Weapon set after single-weapon normalisation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WeaponLoadout {
    pub arrows: bool,
    pub longsword: bool,
    pub shield: bool,
    pub mini_sword: bool,
}

impl WeaponLoadout {
    /// A character carries either the bow or the longsword, and a shield only
    /// alongside the sword. `role_category` wins over the raw flags.
    pub fn normalize(raw: &Loadout) -> Self {
        let role = raw.role_category.as_deref().map(str::to_ascii_lowercase);
        let (longsword, forced_shield) = match role.as_deref() {
            Some("longswordsman") => (true, None),
            Some("shield+sword") | Some("shield_sword") | Some("sword_shield") => (true, Some(true)),
            Some(_) => (false, Some(false)),
            None => (raw.longsword, None),
        };
        let shield = longsword && forced_shield.or(raw.shield).unwrap_or(true);
        Self {
            arrows: !longsword,
            longsword,
            shield,
            mini_sword: false,
        }
    }

    pub fn archer() -> Self {
        Self {
            arrows: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitRegion {
    Head,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSide {
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionPose {
    Head,
    Knockback,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionState {
    Stagger,
    Knockback,
}

/// What started a reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionCause {
    Hit(HitSource),
    Dismount,
}

/// Transient directional flinch. Presentation only, never authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HitReaction {
    pub until_ms: f64,
    pub duration_ms: f64,
    pub stagger_until_ms: f64,
    pub stagger_ms: f64,
    pub intensity: f32,
    pub dir: f32,
    pub knockback: f32,
    pub pose: ReactionPose,
    pub state: ReactionState,
    pub region: HitRegion,
    pub side: HitSide,
    pub cause: ReactionCause,
}

impl HitReaction {
    pub fn is_active(&self, now_ms: f64) -> bool {
        self.until_ms > now_ms
    }
}

/// Armor wear as last reported, plus the local pulse timer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ArmorBreak {
    pub stage: u8,
    pub ratio: f32,
    pub pulse_until_ms: f64,
}

impl ArmorBreak {
    /// Apply raw wire values. Stage is truncated into 0..=3, ratio clamped
    /// into 0..=1 and never below `stage/3`. Returns whether a pulse started.
    pub fn apply(&mut self, raw_stage: Option<f32>, raw_ratio: Option<f32>, changed: bool, now_ms: f64) -> bool {
        let prev_stage = self.stage.min(MAX_ARMOR_STAGE);
        let stage = match raw_stage {
            Some(s) if s.is_finite() => s.trunc().clamp(0.0, MAX_ARMOR_STAGE as f32) as u8,
            _ => prev_stage,
        };
        let floor_ratio = stage as f32 / MAX_ARMOR_STAGE as f32;
        let ratio = match raw_ratio {
            Some(r) if r.is_finite() => r.clamp(0.0, 1.0),
            _ => floor_ratio,
        };
        self.stage = stage;
        self.ratio = ratio.max(floor_ratio);

        let pulse = changed || stage > prev_stage;
        if pulse {
            self.pulse_until_ms = self.pulse_until_ms.max(now_ms + ARMOR_PULSE_MS);
        }
        pulse
    }

    pub fn is_pulsing(&self, now_ms: f64) -> bool {
        self.pulse_until_ms > now_ms
    }
}

/// Bow release animation cue
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BowRelease {
    pub started_at_ms: f64,
    pub duration_ms: f64,
    /// Draw charge, 0..=1
    pub charge: f32,
    pub angle: f32,
    pub recoil: f32,
}

impl BowRelease {
    /// Remaining share of the animation, 1 at release down to 0
    pub fn ratio(&self, now_ms: f64) -> f32 {
        let until = self.started_at_ms + self.duration_ms;
        if !(until > now_ms) || self.duration_ms <= 0.0 {
            return 0.0;
        }
        let t = ((now_ms - self.started_at_ms) / self.duration_ms).clamp(0.0, 1.0);
        (1.0 - t) as f32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SwordState {
    pub phase: SwordPhase,
    pub attack: SwordAttack,
    pub phase_timer: f32,
    pub phase_duration: f32,
    pub reaction_timer: f32,
    pub reaction_attack: Option<SwordAttack>,
}

/// Movement flags copied from the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MovementState {
    pub sprinting: bool,
    pub crouching: bool,
    pub sliding: bool,
    pub slide_timer: f32,
    pub slide_dir: f32,
    pub on_wall: bool,
    /// -1, 0 or 1
    pub wall_side: i8,
    pub ledge_grabbed: bool,
    /// -1, 0 or 1
    pub ledge_side: i8,
    pub ledge: Vec2,
    pub ledge_hang_timer: f32,
}

#[derive(Debug, Clone)]
pub struct PlayerEntity {
    pub id: PlayerId,
    pub mode: PlayerMode,
    pub team: Option<Team>,
    /// Top-left corner of the character box
    pub position: Vec2,
    pub velocity: Vec2,
    pub width: f32,
    pub height: f32,
    /// Heights to fall back to when a snapshot omits `height`
    pub standing_height: f32,
    pub crouch_height: f32,
    pub health: f32,
    pub alive: bool,
    pub on_ground: bool,
    /// +1 right, -1 left
    pub facing: f32,
    pub aim_angle: f32,
    pub bow_drawn: bool,
    pub draw_power: f32,
    pub loadout: WeaponLoadout,
    pub mounted_horse_id: Option<String>,
    pub using_ballista_side: Option<String>,
    pub sword: SwordState,
    pub shield_blocking: bool,
    pub shield_block_angle: f32,
    pub armor: ArmorBreak,
    pub movement: MovementState,
    pub stamina: f32,
    pub stamina_max: f32,
    pub reaction: Option<HitReaction>,
    pub bow_release: Option<BowRelease>,
    pub ragdoll: RagdollState,
    server_state: Option<PlayerSnapshot>,
}

/// Clamp a side indicator into -1/0/1
fn side_sign(raw: Option<f32>) -> i8 {
    match raw {
        Some(v) if v.is_finite() && v > 0.0 => 1,
        Some(v) if v.is_finite() && v < 0.0 => -1,
        _ => 0,
    }
}

impl PlayerEntity {
    pub fn new(id: PlayerId, mode: PlayerMode, width: f32, height: f32) -> Self {
        Self {
            id,
            mode,
            team: None,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            width,
            height,
            standing_height: height,
            crouch_height: (height * CROUCH_HEIGHT_RATIO).round(),
            health: 100.0,
            alive: true,
            on_ground: false,
            facing: 1.0,
            aim_angle: 0.0,
            bow_drawn: false,
            draw_power: 0.0,
            loadout: WeaponLoadout::archer(),
            mounted_horse_id: None,
            using_ballista_side: None,
            sword: SwordState::default(),
            shield_blocking: false,
            shield_block_angle: 0.0,
            armor: ArmorBreak::default(),
            movement: MovementState::default(),
            stamina: 100.0,
            stamina_max: 100.0,
            reaction: None,
            bow_release: None,
            ragdoll: RagdollState::default(),
            server_state: None,
        }
    }

    /// First sighting: take the snapshot as-is, no blending
    pub fn from_snapshot(record: &PlayerSnapshot, mode: PlayerMode, width: f32, height: f32) -> Self {
        let mut player = Self::new(record.id, mode, width, height);
        player.position = Vec2::new(coerce_or(record.x, 0.0), coerce_or(record.y, 0.0));
        player.velocity = Vec2::new(coerce_or(record.vx, 0.0), coerce_or(record.vy, 0.0));
        player.aim_angle = coerce_or(record.aim_angle, 0.0);
        player.bow_drawn = record.bow_drawn;
        player.draw_power = coerce_or(record.draw_power, 0.0);
        player.apply_authoritative_fields(record, true, 0.0);
        player.server_state = Some(record.clone());
        player
    }

    pub fn is_local(&self) -> bool {
        self.mode == PlayerMode::Local
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted_horse_id.is_some()
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.position.x + self.width * 0.5, self.position.y + self.height * 0.5)
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_xywh(self.position.x, self.position.y, self.width, self.height)
    }

    pub fn server_state(&self) -> Option<&PlayerSnapshot> {
        self.server_state.as_ref()
    }

    pub fn set_server_state(&mut self, record: PlayerSnapshot) {
        self.server_state = Some(record);
    }

    pub fn is_reacting(&self, now_ms: f64) -> bool {
        self.reaction.map_or(false, |r| r.is_active(now_ms))
    }

    /// Start a bow release cue unless one is still early in its animation
    pub fn trigger_bow_release(&mut self, power: f32, angle: f32, now_ms: f64) -> bool {
        if self.bow_release.map_or(false, |r| r.ratio(now_ms) > 0.45) {
            return false;
        }
        let charge = finite_or(power, 0.0).clamp(0.0, 100.0) / 100.0;
        self.bow_release = Some(BowRelease {
            started_at_ms: now_ms,
            duration_ms: 90.0 + charge as f64 * 85.0,
            charge,
            angle: finite_or(angle, self.aim_angle),
            recoil: 0.14 + charge * 0.18,
        });
        true
    }

    /// Copy the discrete authoritative fields. Continuous position and
    /// velocity are blended by the reconciler, not here.
    pub fn apply_authoritative_fields(&mut self, record: &PlayerSnapshot, sync_aim: bool, now_ms: f64) {
        if let Some(team) = record.team {
            self.team = Some(team);
        }
        self.health = coerce_or(record.hp, self.health);
        if let Some(alive) = record.alive {
            self.alive = alive;
        }
        if let Some(on_ground) = record.on_ground {
            self.on_ground = on_ground;
        }
        self.mounted_horse_id = record.mounted_horse_id.clone();
        self.using_ballista_side = record.using_ballista_side.clone();
        if let Some(facing) = record.facing_dir.filter(|f| f.is_finite()) {
            self.facing = if facing >= 0.0 { 1.0 } else { -1.0 };
        }
        if let Some(loadout) = &record.loadout {
            self.loadout = WeaponLoadout::normalize(loadout);
        }

        self.sword = SwordState {
            phase: record.sword_phase.unwrap_or_default(),
            attack: record.sword_attack.unwrap_or(self.sword.attack),
            phase_timer: coerce_or(record.sword_phase_timer, 0.0),
            phase_duration: coerce_or(record.sword_phase_duration, 0.0),
            reaction_timer: coerce_or(record.sword_reaction_timer, 0.0),
            reaction_attack: record.sword_reaction_attack,
        };
        self.shield_blocking = record.shield_blocking;
        self.shield_block_angle = coerce_or(record.shield_block_angle, self.aim_angle);
        self.armor
            .apply(record.armor_break_stage, record.armor_break_ratio, false, now_ms);

        let m = &mut self.movement;
        m.sprinting = record.sprinting;
        m.crouching = record.crouching;
        m.sliding = record.sliding;
        m.slide_timer = coerce_or(record.slide_timer, 0.0).max(0.0);
        if let Some(dir) = record.slide_dir.filter(|d| d.is_finite()) {
            m.slide_dir = if dir >= 0.0 { 1.0 } else { -1.0 };
        }
        m.on_wall = record.on_wall;
        m.wall_side = side_sign(record.wall_side);
        m.ledge_grabbed = record.ledge_grabbed;
        m.ledge_side = side_sign(record.ledge_side);
        m.ledge.x = coerce_or(record.ledge_x, m.ledge.x);
        m.ledge.y = coerce_or(record.ledge_y, m.ledge.y);
        m.ledge_hang_timer = coerce_or(record.ledge_hang_timer, 0.0).max(0.0);

        self.height = match record.height.filter(|h| h.is_finite()) {
            Some(height) => height.max(MIN_PLAYER_HEIGHT),
            None if record.crouching || record.sliding => self.crouch_height,
            None => self.standing_height,
        };
        if let Some(max) = record.stamina_max.filter(|m| m.is_finite()) {
            self.stamina_max = max.max(1.0);
        }
        if let Some(stamina) = record.stamina.filter(|s| s.is_finite()) {
            self.stamina = stamina.clamp(0.0, self.stamina_max);
        }

        if sync_aim {
            self.aim_angle = coerce_or(record.aim_angle, self.aim_angle);
            self.bow_drawn = record.bow_drawn;
            self.draw_power = coerce_or(record.draw_power, self.draw_power);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: PlayerId) -> PlayerSnapshot {
        PlayerSnapshot {
            id,
            x: Some(100.0),
            y: Some(620.0),
            alive: Some(true),
            ..PlayerSnapshot::default()
        }
    }

    #[test]
    fn loadout_is_single_weapon() {
        let sword = WeaponLoadout::normalize(&Loadout {
            arrows: true,
            longsword: true,
            ..Loadout::default()
        });
        assert_eq!(
            sword,
            WeaponLoadout {
                arrows: false,
                longsword: true,
                shield: true,
                mini_sword: false
            }
        );

        let bare_sword = WeaponLoadout::normalize(&Loadout {
            longsword: true,
            shield: Some(false),
            ..Loadout::default()
        });
        assert!(!bare_sword.shield);

        let archer_with_shield = WeaponLoadout::normalize(&Loadout {
            shield: Some(true),
            mini_sword: true,
            ..Loadout::default()
        });
        assert_eq!(archer_with_shield, WeaponLoadout::archer());
    }

    #[test]
    fn role_category_overrides_flags() {
        let knight = WeaponLoadout::normalize(&Loadout {
            shield: Some(false),
            role_category: Some("shield_sword".to_string()),
            ..Loadout::default()
        });
        assert!(knight.longsword && knight.shield);

        let archer = WeaponLoadout::normalize(&Loadout {
            longsword: true,
            role_category: Some("archer".to_string()),
            ..Loadout::default()
        });
        assert_eq!(archer, WeaponLoadout::archer());
    }

    #[test]
    fn armor_break_clamps_and_pulses() {
        let mut armor = ArmorBreak::default();
        assert!(armor.apply(Some(2.7), Some(0.1), false, 1000.0));
        assert_eq!(armor.stage, 2);
        assert!((armor.ratio - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(armor.pulse_until_ms, 1260.0);

        // Same stage, no flag: no pulse
        assert!(!armor.apply(Some(2.0), Some(0.9), false, 1100.0));
        assert_eq!(armor.ratio, 0.9);

        assert!(armor.apply(Some(99.0), None, false, 1100.0));
        assert_eq!(armor.stage, 3);
        assert_eq!(armor.ratio, 1.0);

        // Garbage keeps the previous stage
        armor.apply(Some(f32::NAN), Some(-4.0), false, 2000.0);
        assert_eq!(armor.stage, 3);
        assert_eq!(armor.ratio, 1.0);

        // Explicit change flag pulses even without a stage increase
        assert!(armor.apply(Some(1.0), None, true, 5000.0));
        assert_eq!(armor.stage, 1);
        assert_eq!(armor.pulse_until_ms, 5260.0);
    }

    #[test]
    fn missing_height_follows_crouch_state() {
        let mut player = PlayerEntity::from_snapshot(&record(1), PlayerMode::Remote, 40.0, 80.0);
        let crouched = PlayerSnapshot {
            height: None,
            crouching: true,
            ..record(1)
        };
        player.apply_authoritative_fields(&crouched, true, 0.0);
        assert_eq!(player.height, 56.0);

        let sliding = PlayerSnapshot {
            height: None,
            sliding: true,
            ..record(1)
        };
        player.apply_authoritative_fields(&sliding, true, 0.0);
        assert_eq!(player.height, 56.0);

        let standing = PlayerSnapshot {
            height: None,
            ..record(1)
        };
        player.apply_authoritative_fields(&standing, true, 0.0);
        assert_eq!(player.height, 80.0);
    }

    #[test]
    fn discrete_fields_are_coerced() {
        let mut player = PlayerEntity::from_snapshot(&record(1), PlayerMode::Remote, 40.0, 80.0);
        let update = PlayerSnapshot {
            wall_side: Some(7.0),
            ledge_side: Some(-0.2),
            ledge_x: Some(f32::NAN),
            ledge_y: Some(512.0),
            slide_timer: Some(-3.0),
            height: Some(10.0),
            stamina: Some(500.0),
            stamina_max: Some(0.0),
            sword_attack: None,
            shield_block_angle: None,
            aim_angle: Some(0.5),
            ..record(1)
        };
        player.sword.attack = SwordAttack::Pierce;
        player.apply_authoritative_fields(&update, true, 0.0);

        assert_eq!(player.movement.wall_side, 1);
        assert_eq!(player.movement.ledge_side, -1);
        assert_eq!(player.movement.ledge, Vec2::new(0.0, 512.0));
        assert_eq!(player.movement.slide_timer, 0.0);
        assert_eq!(player.height, 28.0);
        assert_eq!(player.stamina_max, 1.0);
        assert_eq!(player.stamina, 1.0);
        assert_eq!(player.sword.attack, SwordAttack::Pierce);
        assert_eq!(player.sword.phase, SwordPhase::Idle);
        assert_eq!(player.aim_angle, 0.5);
        // Block angle falls back to the aim angle in effect before this update
        assert_eq!(player.shield_block_angle, 0.0);
    }

    #[test]
    fn aim_is_kept_when_not_synced() {
        let mut player = PlayerEntity::from_snapshot(&record(1), PlayerMode::Local, 40.0, 80.0);
        player.aim_angle = 1.2;
        player.bow_drawn = true;
        player.draw_power = 60.0;
        let update = PlayerSnapshot {
            aim_angle: Some(-0.3),
            bow_drawn: false,
            draw_power: Some(0.0),
            ..record(1)
        };
        player.apply_authoritative_fields(&update, false, 0.0);
        assert_eq!(player.aim_angle, 1.2);
        assert!(player.bow_drawn);
        assert_eq!(player.draw_power, 60.0);
    }

    #[test]
    fn bow_release_is_not_restarted_early() {
        let mut player = PlayerEntity::new(1, PlayerMode::Remote, 40.0, 80.0);
        assert!(player.trigger_bow_release(100.0, 0.2, 1000.0));
        let release = player.bow_release.unwrap();
        assert_eq!(release.duration_ms, 175.0);
        assert!((release.recoil - 0.32).abs() < 1e-6);
        assert_eq!(release.ratio(1000.0), 1.0);

        assert!(!player.trigger_bow_release(50.0, 0.0, 1050.0));
        // Past the first 55% of the animation a new release may start
        assert!(player.trigger_bow_release(50.0, 0.0, 1100.0));
        assert_eq!(player.bow_release.unwrap().duration_ms, 132.5);
        assert_eq!(player.bow_release.unwrap().ratio(2000.0), 0.0);
    }

    #[test]
    fn bounds_follow_position_and_size() {
        let player = PlayerEntity::from_snapshot(&record(3), PlayerMode::Remote, 40.0, 80.0);
        assert_eq!(player.bounds(), Rect::from_xywh(100.0, 620.0, 40.0, 80.0));
        assert_eq!(player.center(), Vec2::new(120.0, 660.0));
    }
}
