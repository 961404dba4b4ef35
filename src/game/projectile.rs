//! Projectile tracking between authoritative snapshots
//!
//! A projectile the server still reports has a target and is eased toward it.
//! Once it drops out of the feed it goes stale: it is extrapolated under
//! gravity and swept against the world until it anchors (sticks) or falls out
//! of the world. Expiry is the only way a projectile leaves the tracker.

use std::collections::{BTreeMap, HashSet, VecDeque};

use glam::Vec2;
use tracing::{debug, trace};

use crate::config::{ProjectileConfig, TrailTuning, WorldConfig};
use crate::ws::protocol::{PlayerId, ProjectileId, ProjectileKind, ProjectileSnapshot, Team};

use super::anchoring::{sweep_world, HitSurface};
use super::effects::ImpactBurst;
use super::math::{coerce_or, heading_or, Rect, EPSILON};

/// Latest authoritative state for a tracked projectile
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectileTarget {
    pub position: Vec2,
    pub velocity: Vec2,
    pub angle: f32,
    pub team: Option<Team>,
    pub owner_id: Option<PlayerId>,
    pub power_ratio: f32,
    pub tier: f32,
    pub kind: ProjectileKind,
}

/// Rate-limited ring of recent positions
#[derive(Debug, Clone, Default)]
pub struct Trail {
    points: VecDeque<Vec2>,
    last_sample_ms: Option<f64>,
}

impl Trail {
    fn sample(&mut self, position: Vec2, speed_norm: f32, now_ms: f64, tuning: &TrailTuning, force: bool) {
        if !position.is_finite() {
            return;
        }
        let interval = (tuning.max_interval_ms - speed_norm as f64 * 10.0).max(tuning.min_interval_ms);
        if !force && self.last_sample_ms.map_or(false, |at| now_ms - at < interval) {
            return;
        }
        if self.points.back().map_or(false, |last| last.distance(position) > tuning.reset_distance) {
            self.points.clear();
        }
        self.points.push_back(position);
        while self.points.len() > tuning.max_points {
            self.points.pop_front();
        }
        self.last_sample_ms = Some(now_ms);
    }

    pub fn points(&self) -> impl Iterator<Item = &Vec2> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectilePhase {
    /// Still reported by the server
    Tracked,
    /// Dropped from the feed, extrapolated locally
    Stale,
    /// Anchored to a surface for good
    Stuck,
}

#[derive(Debug, Clone)]
pub struct Projectile {
    pub id: ProjectileId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub angle: f32,
    pub team: Option<Team>,
    pub owner_id: Option<PlayerId>,
    pub power_ratio: f32,
    pub tier: f32,
    pub kind: ProjectileKind,
    target: Option<ProjectileTarget>,
    stale_since_ms: Option<f64>,
    stuck_at_ms: Option<f64>,
    surface: Option<HitSurface>,
    miss_queued: bool,
    trail: Trail,
}

impl Projectile {
    fn from_snapshot(record: &ProjectileSnapshot, target: ProjectileTarget) -> Self {
        Self {
            id: record.id,
            position: target.position,
            velocity: target.velocity,
            angle: target.angle,
            team: target.team,
            owner_id: target.owner_id,
            power_ratio: target.power_ratio,
            tier: target.tier,
            kind: target.kind,
            target: None,
            stale_since_ms: None,
            stuck_at_ms: None,
            surface: None,
            miss_queued: false,
            trail: Trail::default(),
        }
    }

    pub fn phase(&self) -> ProjectilePhase {
        if self.stuck_at_ms.is_some() {
            ProjectilePhase::Stuck
        } else if self.target.is_some() {
            ProjectilePhase::Tracked
        } else {
            ProjectilePhase::Stale
        }
    }

    pub fn is_stuck(&self) -> bool {
        self.stuck_at_ms.is_some()
    }

    pub fn is_stale(&self) -> bool {
        self.target.is_none()
    }

    pub fn target(&self) -> Option<&ProjectileTarget> {
        self.target.as_ref()
    }

    /// Surface it anchored to, once stuck
    pub fn surface(&self) -> Option<HitSurface> {
        self.surface
    }

    pub fn trail(&self) -> &Trail {
        &self.trail
    }

    pub fn miss_queued(&self) -> bool {
        self.miss_queued
    }

    fn speed_norm(&self, baseline: f32) -> f32 {
        (self.velocity.length() / baseline.max(1.0)).clamp(0.0, 1.4)
    }
}

/// Presentation cue for a shooter whose arrow was just sighted
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BowReleaseCue {
    pub shooter_id: PlayerId,
    /// Estimated draw power, 0..=100
    pub power: f32,
    pub angle: f32,
}

/// What a snapshot changed in the tracker
#[derive(Debug, Clone, Default)]
pub struct TrackerSync {
    pub created: Vec<ProjectileId>,
    pub went_stale: Vec<ProjectileId>,
    pub release_cues: Vec<BowReleaseCue>,
    /// One miss per projectile, the first time it goes missing
    pub misses: Vec<ImpactBurst>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchored {
    pub id: ProjectileId,
    pub point: Vec2,
    pub surface: HitSurface,
}

/// Owns every projectile the client knows about
#[derive(Debug, Clone)]
pub struct ProjectileTracker {
    config: ProjectileConfig,
    projectiles: BTreeMap<ProjectileId, Projectile>,
}

impl ProjectileTracker {
    pub fn new(config: ProjectileConfig) -> Self {
        Self {
            config,
            projectiles: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: ProjectileId) -> Option<&Projectile> {
        self.projectiles.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Projectile> {
        self.projectiles.values()
    }

    pub fn len(&self) -> usize {
        self.projectiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projectiles.is_empty()
    }

    fn target_from(&self, record: &ProjectileSnapshot, existing: Option<&Projectile>) -> ProjectileTarget {
        let velocity = Vec2::new(coerce_or(record.vx, 0.0), coerce_or(record.vy, 0.0));
        let fallback_angle = existing.map_or(0.0, |p| p.angle);
        ProjectileTarget {
            position: Vec2::new(record.x, record.y),
            velocity,
            angle: heading_or(velocity, fallback_angle),
            team: record.team.or(existing.and_then(|p| p.team)),
            owner_id: record.owner_id.or(existing.and_then(|p| p.owner_id)),
            power_ratio: coerce_or(record.power_ratio, existing.map_or(0.0, |p| p.power_ratio)),
            tier: coerce_or(record.arrow_tier, existing.map_or(1.0, |p| p.tier)),
            kind: record.kind(),
        }
    }

    /// Reconcile the tracked set against a snapshot's projectile list
    pub fn apply_snapshot(&mut self, records: &[ProjectileSnapshot], now_ms: f64) -> TrackerSync {
        let mut sync = TrackerSync::default();
        let mut seen = HashSet::with_capacity(records.len());

        for record in records {
            seen.insert(record.id);
            let target = self.target_from(record, self.projectiles.get(&record.id));

            match self.projectiles.get_mut(&record.id) {
                Some(projectile) if projectile.is_stuck() => {
                    trace!(projectile_id = record.id, "Ignoring update for anchored projectile");
                }
                Some(projectile) => {
                    projectile.target = Some(target);
                    projectile.stale_since_ms = None;
                }
                None => {
                    let mut projectile = Projectile::from_snapshot(record, target.clone());
                    projectile.trail.sample(target.position, 0.0, now_ms, &self.config.trail, true);
                    if target.kind == ProjectileKind::Arrow {
                        if let Some(shooter_id) = target.owner_id {
                            let power = (target.velocity.length() / self.config.speed.max(1.0) * 100.0).clamp(0.0, 100.0);
                            sync.release_cues.push(BowReleaseCue {
                                shooter_id,
                                power,
                                angle: target.angle,
                            });
                        }
                    }
                    projectile.target = Some(target);
                    sync.created.push(record.id);
                    self.projectiles.insert(record.id, projectile);
                }
            }
        }

        for (id, projectile) in self.projectiles.iter_mut() {
            if seen.contains(id) {
                continue;
            }
            if projectile.target.take().is_some() {
                sync.went_stale.push(*id);
            }
            projectile.stale_since_ms.get_or_insert(now_ms);
            if !projectile.is_stuck() && !projectile.miss_queued {
                projectile.miss_queued = true;
                sync.misses.push(ImpactBurst::miss(
                    projectile.position,
                    projectile.kind == ProjectileKind::Bolt,
                    now_ms,
                ));
            }
        }

        if !sync.created.is_empty() || !sync.went_stale.is_empty() {
            debug!(
                created = sync.created.len(),
                stale = sync.went_stale.len(),
                tracked = self.projectiles.len(),
                "Projectile set updated"
            );
        }
        sync
    }

    /// Advance every projectile by one frame. Tracked ones ease toward their
    /// target by `alpha`; stale ones are extrapolated and anchored against
    /// the world and the given entity boxes.
    pub fn advance(
        &mut self,
        dt: f32,
        alpha: f32,
        now_ms: f64,
        world: &WorldConfig,
        entities: &[Rect],
    ) -> Vec<Anchored> {
        let step = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let mut anchored = Vec::new();

        for projectile in self.projectiles.values_mut() {
            if projectile.is_stuck() {
                continue;
            }

            if let Some(target) = &projectile.target {
                projectile.position = projectile.position.lerp(target.position, alpha);
                projectile.velocity = target.velocity;
                projectile.angle = target.angle;
                projectile.team = target.team;
                projectile.owner_id = target.owner_id;
                projectile.power_ratio = target.power_ratio;
                projectile.tier = target.tier;
                projectile.kind = target.kind;
            } else {
                let start = projectile.position;
                projectile.velocity.y += self.config.gravity * step;
                projectile.position = start + projectile.velocity * step;
                projectile.angle = heading_or(projectile.velocity, projectile.angle);

                if let Some(hit) = sweep_world(start, projectile.position, world, entities, self.config.entity_margin) {
                    projectile.position = hit.point;
                    projectile.velocity = Vec2::ZERO;
                    projectile.stuck_at_ms = Some(now_ms);
                    projectile.surface = Some(hit.surface);
                    debug!(
                        projectile_id = projectile.id,
                        x = hit.point.x,
                        y = hit.point.y,
                        surface = ?hit.surface,
                        "Projectile anchored"
                    );
                    anchored.push(Anchored {
                        id: projectile.id,
                        point: hit.point,
                        surface: hit.surface,
                    });
                }
            }

            let speed_norm = projectile.speed_norm(self.config.speed);
            projectile.trail.sample(projectile.position, speed_norm, now_ms, &self.config.trail, false);
        }
        anchored
    }

    /// Drop anchored projectiles past their lifetime, and stale ones that
    /// timed out or left the world. Returns the removed ids.
    pub fn expire(&mut self, now_ms: f64, world: &WorldConfig) -> Vec<ProjectileId> {
        let config = self.config;
        let mut removed = Vec::new();
        self.projectiles.retain(|id, p| {
            let keep = match (p.stuck_at_ms, p.stale_since_ms) {
                (Some(stuck_at), _) => now_ms - stuck_at <= config.stuck_ttl_ms,
                (None, Some(stale_since)) => {
                    now_ms - stale_since <= config.stale_ttl_ms && p.position.y <= world.height + EPSILON
                }
                (None, None) => true,
            };
            if !keep {
                removed.push(*id);
            }
            keep
        });
        if !removed.is_empty() {
            debug!(count = removed.len(), "Projectiles expired");
        }
        removed
    }
}
