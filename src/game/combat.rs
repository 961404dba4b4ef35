//! Combat event routing - turns authoritative hit events into reactions,
//! ragdoll impulses, severs and effects on the client

use std::collections::BTreeMap;

use glam::Vec2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::{CombatTuning, RagdollTuning};
use crate::ws::protocol::{HitEvent, HitSource, PlayerId, SwordAttack};

use super::effects::{EmbedRequest, EmbeddedProjectiles, ImpactBurst, ImpactQueue};
use super::player::{
    HitReaction, HitRegion, HitSide, PlayerEntity, ReactionCause, ReactionPose, ReactionState,
};
use super::ragdoll::{BodyPart, ImpactOutcome, ImpactSource, Limb, RagdollImpact, SeverOutcome, SeverRequest, Side};

/// Damage that normalises to 1.0
const DAMAGE_NORM: f32 = 42.0;

/// Everything a hit event may touch
pub struct CombatTargets<'a> {
    pub players: &'a mut BTreeMap<PlayerId, PlayerEntity>,
    pub embeds: &'a mut EmbeddedProjectiles,
    pub impacts: &'a mut ImpactQueue,
    pub ragdoll: &'a RagdollTuning,
}

/// What routing one event did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitOutcome {
    /// Set when the target was known and the source routes to it
    pub dir: Option<f32>,
    pub armor_pulse: bool,
    pub reaction: Option<HitReaction>,
    pub ragdoll_impact: Option<ImpactOutcome>,
    pub embed: Option<Uuid>,
    pub sever: Option<(Limb, SeverOutcome)>,
    pub burst_queued: bool,
}

/// Reaction decided for an unblocked or shield-blocked hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReactionPlan {
    pub reaction: HitReaction,
    /// Routes a ragdoll impulse, queued if no ragdoll exists yet
    pub heavy: bool,
}

fn impact_source(source: HitSource) -> ImpactSource {
    match source {
        HitSource::Sword => ImpactSource::Sword,
        HitSource::Ballista => ImpactSource::Ballista,
        HitSource::Arrow | HitSource::Other => ImpactSource::Arrow,
    }
}

fn sword_boost(source: HitSource, attack: Option<SwordAttack>) -> f32 {
    if source != HitSource::Sword {
        return 1.0;
    }
    match attack.unwrap_or_default() {
        SwordAttack::Slash => 0.84,
        SwordAttack::UpperSlash => 1.0,
        SwordAttack::LowerSlash => 0.9,
        SwordAttack::Pierce => 1.06,
    }
}

fn sign(value: f32) -> f32 {
    if value >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Horizontal direction a hit pushes its target. Projectile travel wins,
/// then the attacker's position, then the shooter's, then the target's back.
pub fn impact_dir(event: &HitEvent, target: &PlayerEntity, shooter_center_x: Option<f32>) -> f32 {
    if matches!(event.source(), HitSource::Arrow | HitSource::Ballista) {
        if let Some(vx) = event.projectile_vx.filter(|vx| vx.abs() > 0.001) {
            return sign(vx);
        }
    }
    let center_x = target.center().x;
    for from_x in [event.attacker_x, shooter_center_x].into_iter().flatten() {
        let delta = center_x - from_x;
        if delta.is_finite() && delta.abs() > 0.001 {
            return sign(delta);
        }
    }
    -sign(target.facing)
}

fn projectile_velocity(event: &HitEvent) -> Vec2 {
    Vec2::new(event.projectile_vx.unwrap_or(0.0), event.projectile_vy.unwrap_or(0.0))
}

/// Classify a hit. Invulnerability blocks produce no reaction at all.
pub fn plan_reaction(
    event: &HitEvent,
    dir: f32,
    facing: f32,
    speed_baseline: f32,
    tuning: &CombatTuning,
    now_ms: f64,
) -> Option<ReactionPlan> {
    if event.blocked_by_invuln {
        return None;
    }
    let blocked = event.is_blocked();
    let source = event.source();
    let damage = event.final_damage();
    let head = event.is_headshot();
    let speed_norm = (projectile_velocity(event).length() / speed_baseline.max(1.0)).clamp(0.0, 1.4);
    let pierce = source == HitSource::Sword && event.sword_attack == Some(SwordAttack::Pierce);

    let knockback_hit = !blocked
        && (head || damage >= tuning.knockback_damage || speed_norm > tuning.knockback_speed_norm || pierce);
    let state = if knockback_hit {
        ReactionState::Knockback
    } else {
        ReactionState::Stagger
    };
    let pose = if head {
        ReactionPose::Head
    } else if knockback_hit {
        ReactionPose::Knockback
    } else {
        ReactionPose::Body
    };

    let damage_norm = (damage / DAMAGE_NORM).clamp(0.0, 1.4);
    let base = if blocked { 0.32 } else { 0.48 + damage_norm * 0.62 };
    let intensity = ((base + speed_norm * 0.24) * sword_boost(source, event.sword_attack)).clamp(0.15, 1.45);
    let sword_bonus = if source == HitSource::Sword { 0.12 } else { 0.0 };
    let knockback = if blocked {
        0.1
    } else {
        (0.18 + speed_norm * 0.75 + damage_norm * 0.36 + sword_bonus).clamp(0.12, 1.5)
    };
    let duration_ms = if blocked { 150.0 } else { (170.0 + intensity * 160.0).round() as f64 };
    let stagger_ms = if blocked { 90.0 } else { (95.0 + intensity * 80.0).round() as f64 };

    let heavy = !blocked
        && (source == HitSource::Ballista
            || knockback_hit
            || damage >= tuning.knockback_damage
            || speed_norm > tuning.knockback_speed_norm);

    Some(ReactionPlan {
        reaction: HitReaction {
            until_ms: now_ms + duration_ms,
            duration_ms,
            stagger_until_ms: now_ms + stagger_ms,
            stagger_ms,
            intensity,
            dir,
            knockback,
            pose,
            state,
            region: if head { HitRegion::Head } else { HitRegion::Body },
            side: if dir * sign(facing) < 0.0 { HitSide::Front } else { HitSide::Back },
            cause: ReactionCause::Hit(source),
        },
        heavy,
    })
}

/// Routes hit events. Owns the RNG used for unforced limb choice.
#[derive(Debug, Clone)]
pub struct CombatRouter {
    tuning: CombatTuning,
    speed_baseline: f32,
    rng: ChaCha8Rng,
}

impl CombatRouter {
    pub fn new(tuning: CombatTuning, speed_baseline: f32, seed: u64) -> Self {
        Self {
            tuning,
            speed_baseline,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn tuning(&self) -> &CombatTuning {
        &self.tuning
    }

    /// Route one hit event: armor break, reaction (and ragdoll impulse),
    /// embed, sever, then the impact burst at the hit point.
    pub fn route(&mut self, event: &HitEvent, targets: &mut CombatTargets<'_>, now_ms: f64) -> HitOutcome {
        let mut outcome = HitOutcome::default();
        let source = event.source();
        let blocked = event.is_blocked();
        let hit_point = event.hit_point.map(|p| Vec2::new(p.x, p.y));

        let shooter_center_x = event
            .shooter_id
            .and_then(|id| targets.players.get(&id))
            .map(|shooter| shooter.center().x);
        let routed = matches!(source, HitSource::Arrow | HitSource::Sword | HitSource::Ballista);
        let target = event
            .target_id
            .filter(|_| routed)
            .and_then(|id| targets.players.get_mut(&id));

        if let Some(target) = target {
            let dir = impact_dir(event, target, shooter_center_x);
            outcome.dir = Some(dir);
            outcome.armor_pulse = target.armor.apply(
                event.armor_break_stage,
                event.armor_break_ratio,
                event.armor_break_stage_changed,
                now_ms,
            );

            if let Some(plan) = plan_reaction(event, dir, target.facing, self.speed_baseline, &self.tuning, now_ms) {
                outcome.reaction = Some(plan.reaction);
                outcome.ragdoll_impact = self.apply_reaction(target, event, plan, targets.ragdoll);
            }

            if !blocked {
                if let Some(point) = hit_point {
                    outcome.embed = targets.embeds.embed(
                        EmbedRequest {
                            player_id: target.id,
                            source,
                            hit_point: point,
                            body_center: target.center(),
                            projectile_velocity: projectile_velocity(event),
                            damage: event.final_damage(),
                            now_ms,
                        },
                        target.ragdoll.body(),
                    );
                }
                if let Some(request) = self.sever_request(event, target, dir) {
                    let result = target.ragdoll.sever(request);
                    debug!(player_id = target.id, limb = ?request.limb, outcome = ?result, "Sever routed");
                    outcome.sever = Some((request.limb, result));
                }
            }
        } else if routed {
            trace!(target_id = ?event.target_id, "Hit event for unknown target");
        }

        if let Some(point) = hit_point {
            outcome.burst_queued = targets.impacts.push(ImpactBurst::strike(
                point,
                source,
                blocked,
                event.shield_perfect_block,
                now_ms,
            ));
        }
        outcome
    }

    fn apply_reaction(
        &self,
        target: &mut PlayerEntity,
        event: &HitEvent,
        plan: ReactionPlan,
        ragdoll: &RagdollTuning,
    ) -> Option<ImpactOutcome> {
        let reaction = plan.reaction;
        target.reaction = Some(reaction);
        let knockback_hit = reaction.state == ReactionState::Knockback;

        let mut impact_outcome = None;
        if plan.heavy {
            let scale = if knockback_hit { 1.08 } else { 0.92 };
            let impact = RagdollImpact {
                dir: reaction.dir,
                intensity: reaction.intensity * scale,
                source: impact_source(event.source()),
                velocity: projectile_velocity(event),
                hit_y: event.hit_point.map(|p| p.y),
            };
            impact_outcome = Some(target.ragdoll.apply_impact(impact, ragdoll));
        }

        if !event.is_blocked() && event.source() != HitSource::Sword && target.alive {
            target.velocity.x += reaction.dir * (20.0 + reaction.knockback * 34.0).max(8.0);
            if knockback_hit && target.on_ground {
                target.velocity.y = target.velocity.y.min(-(44.0 * reaction.intensity).max(26.0));
                target.on_ground = false;
            }
        }
        impact_outcome
    }

    /// Decide whether a hit cuts a limb, and which
    fn sever_request(&mut self, event: &HitEvent, target: &PlayerEntity, dir: f32) -> Option<SeverRequest> {
        let source = event.source();
        let arrow_mode = source == HitSource::Arrow && self.tuning.ragdoll_always_active;
        let min_damage = match source {
            HitSource::Arrow if arrow_mode => self.tuning.arrow_sever_damage_min,
            HitSource::Sword | HitSource::Ballista => self.tuning.melee_sever_damage_min,
            _ => return None,
        };

        let damage = event.final_damage();
        let head = event.is_headshot();
        if damage < min_damage && !head {
            return None;
        }
        let likely_lethal = damage >= target.health.max(1.0) * 0.78;
        let forceful = damage >= min_damage + 6.0 || head || source == HitSource::Ballista;
        if !likely_lethal && !forceful {
            return None;
        }

        let from_part = if arrow_mode {
            event
                .hit_part
                .as_deref()
                .and_then(|name| name.parse::<BodyPart>().ok())
                .and_then(BodyPart::limb)
        } else {
            None
        };
        let limb = match from_part {
            Some(limb) => limb,
            None => self.pick_limb(event, target, dir),
        };

        Some(SeverRequest {
            limb,
            dir,
            intensity: (0.7 + damage / 28.0).clamp(0.9, 2.2),
            hit_y: event.hit_point.map(|p| p.y),
        })
    }

    /// Side from the hit point (or direction), limb from the attack type
    fn pick_limb(&mut self, event: &HitEvent, target: &PlayerEntity, dir: f32) -> Limb {
        let side = match event.hit_point {
            Some(point) if point.x < target.center().x => Side::Left,
            Some(_) => Side::Right,
            None if dir >= 0.0 => Side::Right,
            None => Side::Left,
        };
        let attack = event.sword_attack.unwrap_or_default();
        if attack == SwordAttack::LowerSlash || event.source() == HitSource::Ballista {
            Limb::leg(side)
        } else if matches!(attack, SwordAttack::UpperSlash | SwordAttack::Pierce) {
            Limb::arm(side)
        } else if self.rng.gen_bool(self.tuning.arm_sever_bias.clamp(0.0, 1.0)) {
            Limb::arm(side)
        } else {
            Limb::leg(side)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImpactDedupe;
    use crate::game::effects::ImpactKind;
    use crate::game::player::PlayerMode;
    use crate::game::ragdoll::SpawnPose;
    use crate::ws::protocol::{HitType, PlayerSnapshot, WirePoint};

    struct Fixture {
        players: BTreeMap<PlayerId, PlayerEntity>,
        embeds: EmbeddedProjectiles,
        impacts: ImpactQueue,
        ragdoll: RagdollTuning,
        router: CombatRouter,
    }

    impl Fixture {
        fn new() -> Self {
            let mut players = BTreeMap::new();
            for (id, x) in [(1, 100.0), (2, 400.0)] {
                let record = PlayerSnapshot {
                    id,
                    x: Some(x),
                    y: Some(620.0),
                    hp: Some(100.0),
                    alive: Some(true),
                    on_ground: Some(true),
                    facing_dir: Some(1.0),
                    ..PlayerSnapshot::default()
                };
                players.insert(id, PlayerEntity::from_snapshot(&record, PlayerMode::Remote, 40.0, 80.0));
            }
            Self {
                players,
                embeds: EmbeddedProjectiles::default(),
                impacts: ImpactQueue::new(ImpactDedupe::default()),
                ragdoll: RagdollTuning::default(),
                router: CombatRouter::new(CombatTuning::default(), 900.0, 7),
            }
        }

        fn route(&mut self, event: &HitEvent) -> HitOutcome {
            let mut targets = CombatTargets {
                players: &mut self.players,
                embeds: &mut self.embeds,
                impacts: &mut self.impacts,
                ragdoll: &self.ragdoll,
            };
            self.router.route(event, &mut targets, 1000.0)
        }

        fn target(&self) -> &PlayerEntity {
            &self.players[&1]
        }
    }

    fn hit(source: HitSource, damage: f32) -> HitEvent {
        HitEvent {
            source: Some(source),
            target_id: Some(1),
            final_damage: Some(damage),
            hit_type: Some(HitType::Body),
            ..HitEvent::default()
        }
    }

    #[test]
    fn dir_prefers_projectile_velocity() {
        let fx = Fixture::new();
        let event = HitEvent {
            projectile_vx: Some(-500.0),
            attacker_x: Some(0.0),
            ..hit(HitSource::Arrow, 10.0)
        };
        assert_eq!(impact_dir(&event, fx.target(), None), -1.0);

        // Swords ignore projectile velocity
        let event = HitEvent {
            projectile_vx: Some(-500.0),
            attacker_x: Some(50.0),
            ..hit(HitSource::Sword, 10.0)
        };
        assert_eq!(impact_dir(&event, fx.target(), None), 1.0);

        let event = hit(HitSource::Sword, 10.0);
        assert_eq!(impact_dir(&event, fx.target(), Some(420.0)), -1.0);
        // Nothing to go on: pushed backward from facing
        assert_eq!(impact_dir(&event, fx.target(), None), -1.0);
    }

    #[test]
    fn sword_body_hit_left_of_center_severs_one_left_limb() {
        let mut fx = Fixture::new();
        let event = HitEvent {
            hit_point: Some(WirePoint { x: 110.0, y: 650.0 }),
            ..hit(HitSource::Sword, 38.0)
        };
        let outcome = fx.route(&event);

        let (limb, result) = outcome.sever.unwrap();
        assert_eq!(result, SeverOutcome::Queued);
        assert_eq!(limb.side(), Side::Left);
        let queued: Vec<Limb> = fx.target().ragdoll.deferred().queued_severs().map(|r| r.limb).collect();
        assert_eq!(queued, vec![limb]);
        // Swords never embed
        assert!(outcome.embed.is_none());
        assert!(outcome.burst_queued);

        let target = fx.players.get_mut(&1).unwrap();
        let pose = SpawnPose {
            center: target.center(),
            velocity: Vec2::ZERO,
            facing: 1.0,
        };
        target.ragdoll.spawn(&pose, None, &RagdollTuning::default());
        let body = target.ragdoll.body().unwrap();
        assert!(body.is_severed(limb));
        assert_eq!(body.severed_parts().len(), 2);
    }

    #[test]
    fn attack_type_forces_limb_kind() {
        let mut fx = Fixture::new();
        let lower = HitEvent {
            sword_attack: Some(SwordAttack::LowerSlash),
            hit_point: Some(WirePoint { x: 130.0, y: 650.0 }),
            ..hit(HitSource::Sword, 40.0)
        };
        assert_eq!(fx.route(&lower).sever.unwrap().0, Limb::RightLeg);

        let pierce = HitEvent {
            sword_attack: Some(SwordAttack::Pierce),
            attacker_x: Some(300.0),
            ..hit(HitSource::Sword, 40.0)
        };
        // No hit point: side from direction (pushed left)
        assert_eq!(fx.route(&pierce).sever.unwrap().0, Limb::LeftArm);
    }

    #[test]
    fn weak_or_unforceful_hits_do_not_sever() {
        let mut fx = Fixture::new();
        assert!(fx.route(&hit(HitSource::Sword, 20.0)).sever.is_none());
        // Over the threshold but neither forceful nor lethal
        assert!(fx.route(&hit(HitSource::Sword, 30.0)).sever.is_none());
        // Likely lethal on a wounded target
        fx.players.get_mut(&1).unwrap().health = 30.0;
        assert!(fx.route(&hit(HitSource::Sword, 30.0)).sever.is_some());
    }

    #[test]
    fn arrows_sever_by_hit_part_only_in_always_active_mode() {
        let mut fx = Fixture::new();
        let event = HitEvent {
            hit_part: Some("rLowerArm".to_string()),
            ..hit(HitSource::Arrow, 41.0)
        };
        assert_eq!(fx.route(&event).sever.unwrap().0, Limb::RightArm);

        let mut fx = Fixture::new();
        fx.router = CombatRouter::new(
            CombatTuning {
                ragdoll_always_active: false,
                ..CombatTuning::default()
            },
            900.0,
            7,
        );
        assert!(fx.route(&event).sever.is_none());
    }

    #[test]
    fn invulnerable_block_has_no_reaction() {
        let mut fx = Fixture::new();
        let event = HitEvent {
            blocked_by_invuln: true,
            hit_point: Some(WirePoint { x: 110.0, y: 650.0 }),
            ..hit(HitSource::Ballista, 80.0)
        };
        let outcome = fx.route(&event);
        assert!(outcome.reaction.is_none());
        assert!(outcome.sever.is_none());
        assert!(outcome.embed.is_none());
        assert!(fx.target().reaction.is_none());
        assert_eq!(fx.impacts.bursts().next().unwrap().kind, ImpactKind::Blocked);
    }

    #[test]
    fn shield_block_gives_weak_reaction() {
        let mut fx = Fixture::new();
        let event = HitEvent {
            blocked_by_shield: true,
            attacker_x: Some(300.0),
            ..hit(HitSource::Sword, 30.0)
        };
        let outcome = fx.route(&event);
        let reaction = outcome.reaction.unwrap();
        assert_eq!(reaction.state, ReactionState::Stagger);
        assert_eq!(reaction.duration_ms, 150.0);
        assert_eq!(reaction.stagger_ms, 90.0);
        assert_eq!(reaction.knockback, 0.1);
        assert!((reaction.intensity - 0.32 * 0.84).abs() < 1e-6);
        // Pushed left while facing right: hit from the front
        assert_eq!(reaction.side, HitSide::Front);
        assert!(outcome.ragdoll_impact.is_none());
        assert_eq!(fx.target().velocity, Vec2::ZERO);
    }

    #[test]
    fn fast_arrow_knocks_back_and_queues_impulse() {
        let mut fx = Fixture::new();
        let event = HitEvent {
            projectile_vx: Some(900.0),
            projectile_vy: Some(0.0),
            hit_point: Some(WirePoint { x: 104.0, y: 640.0 }),
            ..hit(HitSource::Arrow, 30.0)
        };
        let outcome = fx.route(&event);
        let reaction = outcome.reaction.unwrap();
        assert_eq!(reaction.state, ReactionState::Knockback);
        assert_eq!(reaction.pose, ReactionPose::Knockback);
        assert_eq!(reaction.side, HitSide::Back);
        assert_eq!(outcome.ragdoll_impact, Some(ImpactOutcome::Queued));

        let damage_norm = 30.0 / 42.0;
        let intensity = 0.48 + damage_norm * 0.62 + 0.24;
        let knockback = 0.18 + 0.75 + damage_norm * 0.36;
        assert!((reaction.intensity - intensity).abs() < 1e-5);
        assert!((reaction.knockback - knockback).abs() < 1e-5);

        let target = fx.target();
        assert!((target.velocity.x - (20.0 + knockback * 34.0)).abs() < 1e-3);
        assert!((target.velocity.y + 44.0 * intensity).abs() < 1e-3);
        assert!(!target.on_ground);

        let queued = target.ragdoll.deferred().queued_impact().unwrap();
        assert_eq!(queued.source, ImpactSource::Arrow);
        assert_eq!(queued.hit_y, Some(640.0));
        assert!((queued.intensity - reaction.intensity * 1.08).abs() < 1e-5);

        // Unblocked arrow with a hit point embeds
        assert!(outcome.embed.is_some());
        assert_eq!(fx.embeds.for_player(1).count(), 1);
    }

    #[test]
    fn armor_break_from_event_pulses() {
        let mut fx = Fixture::new();
        let event = HitEvent {
            armor_break_stage: Some(1.0),
            armor_break_ratio: Some(0.4),
            armor_break_stage_changed: true,
            ..hit(HitSource::Arrow, 5.0)
        };
        let outcome = fx.route(&event);
        assert!(outcome.armor_pulse);
        assert_eq!(fx.target().armor.stage, 1);
        assert_eq!(fx.target().armor.ratio, 0.4);
        assert!(fx.target().armor.is_pulsing(1100.0));
    }

    #[test]
    fn unknown_target_still_bursts() {
        let mut fx = Fixture::new();
        let event = HitEvent {
            target_id: Some(99),
            hit_point: Some(WirePoint { x: 10.0, y: 10.0 }),
            ..hit(HitSource::Sword, 50.0)
        };
        let outcome = fx.route(&event);
        assert!(outcome.dir.is_none());
        assert!(outcome.burst_queued);
        assert_eq!(fx.impacts.len(), 1);
    }
}
