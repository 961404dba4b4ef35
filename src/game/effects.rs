//! Presentation-side effect records: impact bursts and embedded projectiles
//!
//! Nothing here feeds back into simulation; these are queues the renderer
//! drains, kept bounded so a burst of events cannot grow them without limit.

use std::collections::VecDeque;

use glam::Vec2;
use uuid::Uuid;

use crate::config::ImpactDedupe;
use crate::ws::protocol::{HitSource, PlayerId};

use super::ragdoll::{BodyPart, Ragdoll};

/// Embedded projectiles kept per player
pub const MAX_EMBEDS_PER_PLAYER: usize = 5;
/// Embedded projectiles kept overall
pub const MAX_EMBEDS_TOTAL: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactKind {
    Hit,
    Blocked,
    /// A projectile vanished from the feed without a reported hit
    Miss,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactBurst {
    pub position: Vec2,
    pub kind: ImpactKind,
    pub born_at_ms: f64,
    pub ttl_ms: f64,
    pub strength: f32,
    /// Ballista-sized burst
    pub heavy: bool,
}

impl ImpactBurst {
    pub fn miss(position: Vec2, heavy: bool, now_ms: f64) -> Self {
        Self {
            position,
            kind: ImpactKind::Miss,
            born_at_ms: now_ms,
            ttl_ms: if heavy { 300.0 } else { 220.0 },
            strength: if heavy { 1.35 } else { 1.0 },
            heavy,
        }
    }

    /// Burst for a reported hit, blocked or not
    pub fn strike(position: Vec2, source: HitSource, blocked: bool, perfect_block: bool, now_ms: f64) -> Self {
        let sword = source == HitSource::Sword;
        let (kind, ttl_ms, strength) = match (blocked, sword) {
            (true, _) => (ImpactKind::Blocked, 180.0, if perfect_block { 1.2 } else { 1.0 }),
            (false, true) => (ImpactKind::Hit, 270.0, 1.45),
            (false, false) => (ImpactKind::Hit, 240.0, 1.2),
        };
        Self {
            position,
            kind,
            born_at_ms: now_ms,
            ttl_ms,
            strength,
            heavy: source == HitSource::Ballista,
        }
    }

    pub fn is_expired(&self, now_ms: f64) -> bool {
        now_ms - self.born_at_ms > self.ttl_ms
    }
}

#[derive(Debug, Clone, Copy)]
struct RecentImpact {
    position: Vec2,
    born_at_ms: f64,
}

/// Bounded burst queue with a short memory of where hits landed, so a miss
/// reported right next to a fresh hit is not drawn twice
#[derive(Debug, Clone)]
pub struct ImpactQueue {
    tuning: ImpactDedupe,
    bursts: VecDeque<ImpactBurst>,
    recent: VecDeque<RecentImpact>,
}

impl ImpactQueue {
    pub fn new(tuning: ImpactDedupe) -> Self {
        Self {
            tuning,
            bursts: VecDeque::new(),
            recent: VecDeque::new(),
        }
    }

    /// Queue a burst. Misses near a recent hit are dropped; returns whether
    /// the burst was queued.
    pub fn push(&mut self, burst: ImpactBurst) -> bool {
        if !burst.position.is_finite() {
            return false;
        }
        if burst.kind == ImpactKind::Miss {
            if self.has_recent_nearby(burst.position, burst.born_at_ms) {
                return false;
            }
        } else {
            self.remember(burst.position, burst.born_at_ms);
        }

        self.bursts.push_back(burst);
        while self.bursts.len() > self.tuning.max_bursts {
            self.bursts.pop_front();
        }
        true
    }

    fn remember(&mut self, position: Vec2, now_ms: f64) {
        self.recent.push_back(RecentImpact {
            position,
            born_at_ms: now_ms,
        });
        while self.recent.len() > self.tuning.history_len {
            self.recent.pop_front();
        }
    }

    /// Whether a hit landed within the dedupe window of `position`
    pub fn has_recent_nearby(&mut self, position: Vec2, now_ms: f64) -> bool {
        let history_ms = self.tuning.history_ms;
        self.recent.retain(|r| now_ms - r.born_at_ms <= history_ms);
        self.recent.iter().any(|r| {
            now_ms - r.born_at_ms <= self.tuning.window_ms && r.position.distance(position) <= self.tuning.distance
        })
    }

    pub fn expire(&mut self, now_ms: f64) {
        self.bursts.retain(|b| !b.is_expired(now_ms));
    }

    pub fn bursts(&self) -> impl Iterator<Item = &ImpactBurst> {
        self.bursts.iter()
    }

    pub fn len(&self) -> usize {
        self.bursts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bursts.is_empty()
    }
}

/// A projectile left sticking out of a player
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedProjectile {
    pub id: Uuid,
    pub player_id: PlayerId,
    pub source: HitSource,
    pub born_at_ms: f64,
    pub ttl_ms: f64,
    pub angle: f32,
    pub depth: f32,
    /// Offset from the body centre at the moment of impact
    pub local_offset: Vec2,
    /// Ragdoll particle it rides on, with the offset from that particle
    pub part: Option<(BodyPart, Vec2)>,
    /// Last resolved world position
    pub world: Vec2,
}

/// What is needed to embed a projectile in a target
#[derive(Debug, Clone, Copy)]
pub struct EmbedRequest {
    pub player_id: PlayerId,
    pub source: HitSource,
    pub hit_point: Vec2,
    pub body_center: Vec2,
    pub projectile_velocity: Vec2,
    pub damage: f32,
    pub now_ms: f64,
}

#[derive(Debug, Clone, Default)]
pub struct EmbeddedProjectiles {
    items: Vec<EmbeddedProjectile>,
}

impl EmbeddedProjectiles {
    /// Record an embed. Only arrows and ballista bolts embed.
    pub fn embed(&mut self, request: EmbedRequest, ragdoll: Option<&Ragdoll>) -> Option<Uuid> {
        if !matches!(request.source, HitSource::Arrow | HitSource::Ballista) {
            return None;
        }
        let point = request.hit_point;
        if !point.is_finite() || !request.body_center.is_finite() {
            return None;
        }

        let velocity = request.projectile_velocity;
        let angle = if velocity.is_finite() && (velocity.x.abs() > 0.01 || velocity.y.abs() > 0.01) {
            velocity.y.atan2(velocity.x)
        } else {
            let from_center = point - request.body_center;
            from_center.y.atan2(from_center.x)
        };

        let part = ragdoll
            .and_then(|body| body.nearest_particle(point))
            .map(|p| (p.part, point - p.pos));

        let embed = EmbeddedProjectile {
            id: Uuid::new_v4(),
            player_id: request.player_id,
            source: request.source,
            born_at_ms: request.now_ms,
            ttl_ms: if request.source == HitSource::Ballista { 15_000.0 } else { 12_000.0 },
            angle,
            depth: (16.0 + request.damage.max(0.0) * 0.45).clamp(14.0, 34.0),
            local_offset: point - request.body_center,
            part,
            world: point,
        };
        let id = embed.id;
        self.items.push(embed);

        let owned = self.items.iter().filter(|e| e.player_id == request.player_id).count();
        if owned > MAX_EMBEDS_PER_PLAYER {
            let mut overflow = owned - MAX_EMBEDS_PER_PLAYER;
            self.items.retain(|e| {
                if overflow > 0 && e.player_id == request.player_id && e.id != id {
                    overflow -= 1;
                    return false;
                }
                true
            });
        }
        if self.items.len() > MAX_EMBEDS_TOTAL {
            let excess = self.items.len() - MAX_EMBEDS_TOTAL;
            self.items.drain(..excess);
        }
        Some(id)
    }

    /// Re-resolve world positions from the owner's ragdoll or body centre.
    /// `lookup` returns the owner's body centre and ragdoll, or `None` if the
    /// owner is gone, in which case the last position is kept.
    pub fn refresh_positions<'a, F>(&mut self, lookup: F)
    where
        F: Fn(PlayerId) -> Option<(Vec2, Option<&'a Ragdoll>)>,
    {
        for embed in &mut self.items {
            let Some((center, ragdoll)) = lookup(embed.player_id) else {
                continue;
            };
            let on_part = embed
                .part
                .and_then(|(part, offset)| ragdoll.and_then(|body| body.particle(part)).map(|p| p.pos + offset));
            embed.world = on_part.unwrap_or(center + embed.local_offset);
        }
    }

    pub fn clear_player(&mut self, player_id: PlayerId) {
        self.items.retain(|e| e.player_id != player_id);
    }

    pub fn expire(&mut self, now_ms: f64) {
        self.items.retain(|e| now_ms - e.born_at_ms <= e.ttl_ms);
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmbeddedProjectile> {
        self.items.iter()
    }

    pub fn for_player(&self, player_id: PlayerId) -> impl Iterator<Item = &EmbeddedProjectile> {
        self.items.iter().filter(move |e| e.player_id == player_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagdollTuning;
    use crate::game::ragdoll::{RagdollState, SpawnPose};

    fn request(player_id: PlayerId, now_ms: f64) -> EmbedRequest {
        EmbedRequest {
            player_id,
            source: HitSource::Arrow,
            hit_point: Vec2::new(110.0, 230.0),
            body_center: Vec2::new(120.0, 240.0),
            projectile_velocity: Vec2::new(900.0, 0.0),
            damage: 30.0,
            now_ms,
        }
    }

    #[test]
    fn miss_near_recent_hit_is_deduplicated() {
        let mut queue = ImpactQueue::new(ImpactDedupe::default());
        assert!(queue.push(ImpactBurst::strike(Vec2::new(100.0, 100.0), HitSource::Arrow, false, false, 1000.0)));
        assert!(!queue.push(ImpactBurst::miss(Vec2::new(120.0, 110.0), false, 1100.0)));
        // Far away, or after the window, a miss is drawn
        assert!(queue.push(ImpactBurst::miss(Vec2::new(400.0, 100.0), false, 1100.0)));
        assert!(queue.push(ImpactBurst::miss(Vec2::new(100.0, 100.0), false, 1200.0)));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn misses_do_not_suppress_each_other() {
        let mut queue = ImpactQueue::new(ImpactDedupe::default());
        assert!(queue.push(ImpactBurst::miss(Vec2::new(0.0, 0.0), false, 0.0)));
        assert!(queue.push(ImpactBurst::miss(Vec2::new(1.0, 0.0), false, 1.0)));
    }

    #[test]
    fn bursts_are_capped_and_expire() {
        let tuning = ImpactDedupe::default();
        let mut queue = ImpactQueue::new(tuning);
        for i in 0..40 {
            queue.push(ImpactBurst::miss(Vec2::new(i as f32 * 100.0, 0.0), i % 2 == 0, 0.0));
        }
        assert_eq!(queue.len(), tuning.max_bursts);
        queue.expire(250.0);
        // Only heavy (300ms) bursts survive
        assert!(queue.bursts().all(|b| b.heavy));
        queue.expire(400.0);
        assert!(queue.is_empty());
    }

    #[test]
    fn strike_parameters_follow_source() {
        let blocked = ImpactBurst::strike(Vec2::ZERO, HitSource::Sword, true, true, 0.0);
        assert_eq!(blocked.kind, ImpactKind::Blocked);
        assert_eq!(blocked.strength, 1.2);
        let sword = ImpactBurst::strike(Vec2::ZERO, HitSource::Sword, false, false, 0.0);
        assert_eq!(sword.ttl_ms, 270.0);
        let bolt = ImpactBurst::strike(Vec2::ZERO, HitSource::Ballista, false, false, 0.0);
        assert!(bolt.heavy);
    }

    #[test]
    fn embeds_are_capped_per_player_and_total() {
        let mut embeds = EmbeddedProjectiles::default();
        let first = embeds.embed(request(1, 0.0), None).unwrap();
        for i in 1..7 {
            embeds.embed(request(1, i as f64), None);
        }
        assert_eq!(embeds.for_player(1).count(), MAX_EMBEDS_PER_PLAYER);
        assert!(embeds.iter().all(|e| e.id != first));

        for player in 2..20 {
            for i in 0..3 {
                embeds.embed(request(player, i as f64), None);
            }
        }
        assert_eq!(embeds.len(), MAX_EMBEDS_TOTAL);
    }

    #[test]
    fn embed_depth_angle_and_sources() {
        let mut embeds = EmbeddedProjectiles::default();
        let mut req = request(1, 0.0);
        req.damage = 100.0;
        req.projectile_velocity = Vec2::ZERO;
        embeds.embed(req, None);
        let embed = embeds.iter().next().unwrap();
        assert_eq!(embed.depth, 34.0);
        // Angle from the body centre toward the hit point
        assert!((embed.angle - (-10.0f32).atan2(-10.0)).abs() < 1e-6);

        let mut sword = request(1, 0.0);
        sword.source = HitSource::Sword;
        assert!(embeds.embed(sword, None).is_none());
    }

    #[test]
    fn embed_follows_ragdoll_particle() {
        let tuning = RagdollTuning::default();
        let mut ragdoll = RagdollState::default();
        ragdoll.spawn(
            &SpawnPose {
                center: Vec2::new(120.0, 240.0),
                velocity: Vec2::ZERO,
                facing: 1.0,
            },
            None,
            &tuning,
        );
        let mut embeds = EmbeddedProjectiles::default();
        // Head sits at (120, 202)
        let mut req = request(4, 0.0);
        req.hit_point = Vec2::new(122.0, 200.0);
        embeds.embed(req, ragdoll.body());
        let embed = embeds.iter().next().unwrap();
        assert_eq!(embed.part.map(|(part, _)| part), Some(BodyPart::Head));

        let head = ragdoll.body().unwrap().particle(BodyPart::Head).unwrap().pos;
        embeds.refresh_positions(|_| Some((Vec2::ZERO, ragdoll.body())));
        assert_eq!(embeds.iter().next().unwrap().world, head + Vec2::new(2.0, -2.0));

        embeds.clear_player(4);
        assert!(embeds.is_empty());
    }

    #[test]
    fn embeds_expire_by_source() {
        let mut embeds = EmbeddedProjectiles::default();
        embeds.embed(request(1, 0.0), None);
        let mut bolt = request(2, 0.0);
        bolt.source = HitSource::Ballista;
        embeds.embed(bolt, None);
        embeds.expire(13_000.0);
        assert_eq!(embeds.len(), 1);
        assert_eq!(embeds.iter().next().unwrap().source, HitSource::Ballista);
    }
}
