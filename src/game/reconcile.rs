//! Per-frame blending of players toward their last authoritative snapshot

use glam::Vec2;
use tracing::{debug, info};

use crate::config::{RagdollTuning, ReconcileConfig};

use super::math::{coerce_or, smoothing_alpha};
use super::player::{HitReaction, HitRegion, HitSide, PlayerEntity, ReactionCause, ReactionPose, ReactionState};
use super::ragdoll::{ImpactSource, RagdollImpact, SpawnPose};

/// Horizontal speed above which facing follows velocity
const FACING_SPEED: f32 = 6.0;
/// Horizontal speed above which a dismount throws against the motion
const DISMOUNT_SPEED: f32 = 8.0;
const DISMOUNT_REACTION_MS: f64 = 170.0;
const DISMOUNT_STAGGER_MS: f64 = 110.0;
/// An existing reaction ending within this window may be replaced
const REACTION_REPLACE_WINDOW_MS: f64 = 50.0;

/// Lifecycle change detected while reconciling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Died,
    Revived,
    Dismounted,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    /// Blend factor for a frame of `dt` seconds
    pub fn alpha(&self, dt: f32) -> f32 {
        smoothing_alpha(self.config.smooth_rate, dt)
    }

    /// Move `player` toward its cached snapshot and copy its discrete state.
    /// `local_bow_held` keeps locally predicted aim fields for the local
    /// player. Returns the transitions this frame produced.
    pub fn reconcile(
        &self,
        player: &mut PlayerEntity,
        alpha: f32,
        local_bow_held: bool,
        now_ms: f64,
        tuning: &RagdollTuning,
    ) -> Vec<Transition> {
        let Some(server) = player.server_state().cloned() else {
            return Vec::new();
        };
        let was_alive = player.alive;
        let was_mounted = player.is_mounted();

        let target = Vec2::new(
            coerce_or(server.x, player.position.x),
            coerce_or(server.y, player.position.y),
        );
        if player.is_local() {
            let distance = player.position.distance(target);
            if !(distance <= self.config.teleport_threshold) {
                debug!(player_id = player.id, distance, "Snapping local player to server position");
                player.position = target;
            } else {
                player.position = player.position.lerp(target, alpha.max(self.config.min_correction));
            }
        } else {
            player.position = player.position.lerp(target, alpha);
        }

        player.velocity = Vec2::new(
            coerce_or(server.vx, player.velocity.x),
            coerce_or(server.vy, player.velocity.y),
        );
        if player.velocity.x.abs() > FACING_SPEED {
            player.facing = if player.velocity.x > 0.0 { 1.0 } else { -1.0 };
        }

        let sync_aim = !(player.is_local() && local_bow_held);
        player.apply_authoritative_fields(&server, sync_aim, now_ms);

        let mut transitions = Vec::new();
        if was_mounted && !player.is_mounted() && player.alive && apply_dismount_reaction(player, now_ms) {
            transitions.push(Transition::Dismounted);
        }

        if !player.alive && was_alive && !player.ragdoll.is_active() {
            let dir = match server.facing_dir.filter(|f| f.is_finite()) {
                Some(f) if f >= 0.0 => 1.0,
                Some(_) => -1.0,
                None => player.facing,
            };
            let impact = RagdollImpact {
                dir,
                intensity: (player.velocity.length() / 200.0).clamp(0.65, 1.5),
                source: ImpactSource::DeathSync,
                velocity: player.velocity,
                hit_y: None,
            };
            let pose = SpawnPose {
                center: player.center(),
                velocity: player.velocity,
                facing: player.facing,
            };
            player.ragdoll.spawn(&pose, Some(impact), tuning);
            info!(player_id = player.id, "Player died, ragdoll spawned");
            transitions.push(Transition::Died);
        } else if player.alive && !was_alive {
            player.ragdoll.clear();
            info!(player_id = player.id, "Player revived");
            transitions.push(Transition::Revived);
        }

        transitions
    }
}

/// Synthesise a flinch thrown against the dismount motion, unless a stronger
/// reaction is still playing. Returns whether a reaction was written.
pub fn apply_dismount_reaction(player: &mut PlayerEntity, now_ms: f64) -> bool {
    let v = player.velocity;
    let dir = if v.x.abs() > DISMOUNT_SPEED {
        if v.x >= 0.0 {
            -1.0
        } else {
            1.0
        }
    } else if player.facing >= 0.0 {
        -1.0
    } else {
        1.0
    };
    let intensity = (0.58 + v.length() / 420.0).clamp(0.56, 1.05);

    let existing = player.reaction;
    let replace = match existing {
        None => true,
        Some(r) => r.until_ms <= now_ms + REACTION_REPLACE_WINDOW_MS || r.intensity < intensity,
    };
    if !replace {
        return false;
    }

    player.reaction = Some(HitReaction {
        until_ms: now_ms + DISMOUNT_REACTION_MS,
        duration_ms: DISMOUNT_REACTION_MS,
        stagger_until_ms: now_ms + DISMOUNT_STAGGER_MS,
        stagger_ms: DISMOUNT_STAGGER_MS,
        intensity: existing.map_or(intensity, |r| r.intensity.max(intensity)),
        dir,
        knockback: existing.map_or(0.42, |r| r.knockback.max(0.42)),
        pose: ReactionPose::Knockback,
        state: ReactionState::Knockback,
        region: HitRegion::Body,
        side: HitSide::Front,
        cause: existing.map_or(ReactionCause::Dismount, |r| r.cause),
    });
    debug!(player_id = player.id, dir, intensity, "Dismount reaction");
    true
}
