//! Verlet ragdoll for downed characters
//!
//! A ragdoll is a fixed set of labelled particles joined by distance
//! constraints. Velocity is implicit (`pos - prev`), so impulses are applied
//! by shifting a particle's previous position. Topology is fixed at spawn;
//! severing removes constraints, never particles.

use std::collections::VecDeque;
use std::str::FromStr;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{RagdollTuning, WorldConfig};

use super::anchoring::landing_floor;
use super::math::{finite_or, sign_or};

/// Queued sever requests kept while no ragdoll exists
pub const MAX_QUEUED_SEVERS: usize = 6;

/// Frame length used to turn body velocity into an initial Verlet offset
const SPAWN_VELOCITY_STEP: f32 = 1.0 / 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Labelled ragdoll particle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyPart {
    Head,
    Chest,
    Pelvis,
    #[serde(rename = "lUpperArm")]
    LeftUpperArm,
    #[serde(rename = "lLowerArm")]
    LeftLowerArm,
    #[serde(rename = "rUpperArm")]
    RightUpperArm,
    #[serde(rename = "rLowerArm")]
    RightLowerArm,
    #[serde(rename = "lUpperLeg")]
    LeftUpperLeg,
    #[serde(rename = "lLowerLeg")]
    LeftLowerLeg,
    #[serde(rename = "rUpperLeg")]
    RightUpperLeg,
    #[serde(rename = "rLowerLeg")]
    RightLowerLeg,
}

impl BodyPart {
    /// Limb this part belongs to, if it is severable
    pub fn limb(self) -> Option<Limb> {
        match self {
            BodyPart::LeftUpperArm | BodyPart::LeftLowerArm => Some(Limb::LeftArm),
            BodyPart::RightUpperArm | BodyPart::RightLowerArm => Some(Limb::RightArm),
            BodyPart::LeftUpperLeg | BodyPart::LeftLowerLeg => Some(Limb::LeftLeg),
            BodyPart::RightUpperLeg | BodyPart::RightLowerLeg => Some(Limb::RightLeg),
            BodyPart::Head | BodyPart::Chest | BodyPart::Pelvis => None,
        }
    }
}

impl FromStr for BodyPart {
    type Err = ();

    /// Accepts the wire names, e.g. `lUpperArm`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let part = match s.trim() {
            "head" => BodyPart::Head,
            "chest" => BodyPart::Chest,
            "pelvis" => BodyPart::Pelvis,
            "lUpperArm" => BodyPart::LeftUpperArm,
            "lLowerArm" => BodyPart::LeftLowerArm,
            "rUpperArm" => BodyPart::RightUpperArm,
            "rLowerArm" => BodyPart::RightLowerArm,
            "lUpperLeg" => BodyPart::LeftUpperLeg,
            "lLowerLeg" => BodyPart::LeftLowerLeg,
            "rUpperLeg" => BodyPart::RightUpperLeg,
            "rLowerLeg" => BodyPart::RightLowerLeg,
            _ => return Err(()),
        };
        Ok(part)
    }
}

/// One of the four severable limbs, each an upper + lower particle pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Limb {
    #[serde(rename = "lArm")]
    LeftArm,
    #[serde(rename = "rArm")]
    RightArm,
    #[serde(rename = "lLeg")]
    LeftLeg,
    #[serde(rename = "rLeg")]
    RightLeg,
}

impl Limb {
    pub fn parts(self) -> [BodyPart; 2] {
        match self {
            Limb::LeftArm => [BodyPart::LeftUpperArm, BodyPart::LeftLowerArm],
            Limb::RightArm => [BodyPart::RightUpperArm, BodyPart::RightLowerArm],
            Limb::LeftLeg => [BodyPart::LeftUpperLeg, BodyPart::LeftLowerLeg],
            Limb::RightLeg => [BodyPart::RightUpperLeg, BodyPart::RightLowerLeg],
        }
    }

    pub fn side(self) -> Side {
        match self {
            Limb::LeftArm | Limb::LeftLeg => Side::Left,
            Limb::RightArm | Limb::RightLeg => Side::Right,
        }
    }

    pub fn arm(side: Side) -> Self {
        match side {
            Side::Left => Limb::LeftArm,
            Side::Right => Limb::RightArm,
        }
    }

    pub fn leg(side: Side) -> Self {
        match side {
            Side::Left => Limb::LeftLeg,
            Side::Right => Limb::RightLeg,
        }
    }

    pub fn contains(self, part: BodyPart) -> bool {
        self.parts().contains(&part)
    }
}

impl FromStr for Limb {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lArm" => Ok(Limb::LeftArm),
            "rArm" => Ok(Limb::RightArm),
            "lLeg" => Ok(Limb::LeftLeg),
            "rLeg" => Ok(Limb::RightLeg),
            _ => Err(()),
        }
    }
}

/// What delivered an impact; heavier sources kick harder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactSource {
    Arrow,
    Sword,
    Ballista,
    /// Synthesised from the last known motion on an authoritative death
    DeathSync,
}

impl ImpactSource {
    fn boost(self) -> f32 {
        match self {
            ImpactSource::Sword => 1.18,
            ImpactSource::Ballista => 1.42,
            ImpactSource::Arrow | ImpactSource::DeathSync => 1.0,
        }
    }
}

/// Impact to distribute over the whole body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RagdollImpact {
    /// Horizontal direction sign; near-zero falls back to facing
    pub dir: f32,
    pub intensity: f32,
    pub source: ImpactSource,
    /// Incoming velocity of whatever hit
    pub velocity: Vec2,
    /// Parts above this height are kicked up, below it down
    pub hit_y: Option<f32>,
}

/// Request to cut a limb loose
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverRequest {
    pub limb: Limb,
    pub dir: f32,
    pub intensity: f32,
    pub hit_y: Option<f32>,
}

impl SeverRequest {
    pub fn new(limb: Limb) -> Self {
        Self {
            limb,
            dir: 0.0,
            intensity: 1.0,
            hit_y: None,
        }
    }
}

/// Raw impulse parameters applied to a set of particles
struct Impulse {
    horizontal: f32,
    vertical: f32,
    chaos: f32,
    pivot_y: Option<f32>,
    source_y: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RagdollParticle {
    pub part: BodyPart,
    pub pos: Vec2,
    /// Previous position; `pos - prev` is the implicit velocity
    pub prev: Vec2,
    pub inv_mass: f32,
    pub radius: f32,
    pub severed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RagdollConstraint {
    pub a: usize,
    pub b: usize,
    pub rest: f32,
    pub stiffness: f32,
}

/// Where and how a body was moving when it went down
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnPose {
    pub center: Vec2,
    pub velocity: Vec2,
    /// Facing sign, +1 right / -1 left
    pub facing: f32,
}

/// An active ragdoll
#[derive(Debug, Clone)]
pub struct Ragdoll {
    particles: Vec<RagdollParticle>,
    constraints: Vec<RagdollConstraint>,
    facing: f32,
    sleep_timer: f32,
    /// Decaying bonus solver iterations after an impact
    extra_iterations: f32,
}

/// (part, radius, offset x, offset y, inverse mass)
const LAYOUT: [(BodyPart, f32, f32, f32, f32); 11] = [
    (BodyPart::Head, 12.0, 0.0, -38.0, 0.82),
    (BodyPart::Chest, 11.0, 0.0, -20.0, 0.56),
    (BodyPart::Pelvis, 11.0, 0.0, 0.0, 0.5),
    (BodyPart::LeftUpperArm, 8.0, -16.0, -22.0, 0.98),
    (BodyPart::LeftLowerArm, 7.0, -32.0, -20.0, 1.08),
    (BodyPart::RightUpperArm, 8.0, 16.0, -22.0, 0.98),
    (BodyPart::RightLowerArm, 7.0, 32.0, -20.0, 1.08),
    (BodyPart::LeftUpperLeg, 9.0, -8.0, 20.0, 0.9),
    (BodyPart::LeftLowerLeg, 8.0, -8.0, 44.0, 1.0),
    (BodyPart::RightUpperLeg, 9.0, 8.0, 20.0, 0.9),
    (BodyPart::RightLowerLeg, 8.0, 8.0, 44.0, 1.0),
];

/// (a, b, rest length factor, stiffness): joints, then torso cross-braces
const LINKS: [(usize, usize, f32, f32); 15] = [
    (0, 1, 1.0, 0.92),
    (1, 2, 1.0, 0.94),
    (1, 3, 1.0, 0.84),
    (3, 4, 1.0, 0.8),
    (1, 5, 1.0, 0.84),
    (5, 6, 1.0, 0.8),
    (2, 7, 1.0, 0.88),
    (7, 8, 1.0, 0.84),
    (2, 9, 1.0, 0.88),
    (9, 10, 1.0, 0.84),
    (1, 7, 1.05, 0.78),
    (1, 9, 1.05, 0.78),
    (2, 3, 1.08, 0.72),
    (2, 5, 1.08, 0.72),
    (7, 9, 1.2, 0.64),
];

impl Ragdoll {
    fn build(pose: &SpawnPose) -> Self {
        let center = if pose.center.is_finite() { pose.center } else { Vec2::ZERO };
        let velocity = Vec2::new(finite_or(pose.velocity.x, 0.0), finite_or(pose.velocity.y, 0.0));
        let base = velocity * SPAWN_VELOCITY_STEP;

        let particles: Vec<RagdollParticle> = LAYOUT
            .iter()
            .map(|&(part, radius, ox, oy, inv_mass)| {
                let pos = center + Vec2::new(ox, oy);
                RagdollParticle {
                    part,
                    pos,
                    prev: pos - base,
                    inv_mass,
                    radius,
                    severed: false,
                }
            })
            .collect();

        let constraints = LINKS
            .iter()
            .map(|&(a, b, factor, stiffness)| RagdollConstraint {
                a,
                b,
                rest: particles[a].pos.distance(particles[b].pos) * factor,
                stiffness,
            })
            .collect();

        Self {
            particles,
            constraints,
            facing: sign_or(pose.facing, 1.0),
            sleep_timer: 0.0,
            extra_iterations: 2.0,
        }
    }

    pub fn particles(&self) -> &[RagdollParticle] {
        &self.particles
    }

    pub fn constraints(&self) -> &[RagdollConstraint] {
        &self.constraints
    }

    pub fn particle(&self, part: BodyPart) -> Option<&RagdollParticle> {
        self.particles.iter().find(|p| p.part == part)
    }

    /// Parts currently detached from the body
    pub fn severed_parts(&self) -> Vec<BodyPart> {
        self.particles.iter().filter(|p| p.severed).map(|p| p.part).collect()
    }

    pub fn is_severed(&self, limb: Limb) -> bool {
        limb.parts()
            .iter()
            .all(|part| self.particle(*part).map_or(false, |p| p.severed))
    }

    /// Resting on a surface long enough that motion is being damped
    pub fn is_settled(&self, tuning: &RagdollTuning) -> bool {
        self.sleep_timer > tuning.sleep_after
    }

    pub fn sleep_timer(&self) -> f32 {
        self.sleep_timer
    }

    pub fn extra_iterations(&self) -> f32 {
        self.extra_iterations
    }

    /// Nearest particle to a world point
    pub fn nearest_particle(&self, point: Vec2) -> Option<&RagdollParticle> {
        self.particles.iter().min_by(|a, b| {
            let da = (point - a.pos).length_squared();
            let db = (point - b.pos).length_squared();
            da.total_cmp(&db)
        })
    }

    fn mean_y(&self, indices: &[usize]) -> f32 {
        if indices.is_empty() {
            return 0.0;
        }
        indices.iter().map(|&i| self.particles[i].pos.y).sum::<f32>() / indices.len() as f32
    }

    /// Kick the listed particles by shifting their previous positions
    fn apply_impulse(&mut self, indices: &[usize], impulse: &Impulse) {
        if indices.is_empty() {
            return;
        }
        let horizontal = finite_or(impulse.horizontal, 0.0);
        let vertical = finite_or(impulse.vertical, 0.0);
        let chaos = finite_or(impulse.chaos, 0.0).max(0.0);
        let pivot_y = impulse
            .pivot_y
            .filter(|v| v.is_finite())
            .unwrap_or_else(|| self.mean_y(indices));
        let source_y = impulse.source_y.filter(|v| v.is_finite()).unwrap_or(pivot_y);

        for (order, &idx) in indices.iter().enumerate() {
            let p = &mut self.particles[idx];
            let inv_mass = p.inv_mass.max(0.01);
            let y_sign = if p.pos.y < source_y { -1.0 } else { 1.0 };
            let alternate = if order % 2 == 0 { 1.0 } else { -1.0 };
            let spread = alternate * chaos * (0.05 + (p.pos.y - pivot_y).abs() * 0.003);
            p.prev.x -= (horizontal + spread) * inv_mass;
            p.prev.y -= (vertical + y_sign * chaos * 0.09) * inv_mass;
        }
    }

    fn all_indices(&self) -> Vec<usize> {
        (0..self.particles.len()).collect()
    }

    /// Distribute an impact over every particle
    pub fn apply_impact(&mut self, impact: &RagdollImpact, tuning: &RagdollTuning) {
        let dir = sign_or(impact.dir, self.facing);
        let intensity = finite_or(impact.intensity, 0.0).clamp(0.0, 1.85);
        let speed = Vec2::new(finite_or(impact.velocity.x, 0.0), finite_or(impact.velocity.y, 0.0)).length();
        let speed_norm = (speed / tuning.impact_speed_baseline.max(1.0)).clamp(0.0, 1.6);
        let boost = impact.source.boost();

        let impulse = Impulse {
            horizontal: dir * (18.0 + (intensity * 34.0 + speed_norm * 28.0) * boost),
            vertical: -((intensity * 19.0 + speed_norm * 17.0) * boost).max(6.0),
            chaos: (2.0 + intensity * 7.0 + speed_norm * 4.0).clamp(2.0, 16.0),
            pivot_y: None,
            source_y: impact.hit_y,
        };
        let indices = self.all_indices();
        self.apply_impulse(&indices, &impulse);
        self.extra_iterations = self.extra_iterations.max(2.0);
        self.sleep_timer = 0.0;
    }

    /// Cut a limb loose. Returns false if it was already severed.
    pub fn sever(&mut self, request: &SeverRequest) -> bool {
        if self.is_severed(request.limb) {
            return false;
        }

        let limb = request.limb;
        let mut detached = Vec::with_capacity(2);
        for (idx, p) in self.particles.iter_mut().enumerate() {
            if limb.contains(p.part) {
                p.severed = true;
                detached.push(idx);
            }
        }

        // Keep only links whose ends are on the same side of the cut
        let particles = &self.particles;
        self.constraints.retain(|c| {
            match (particles.get(c.a), particles.get(c.b)) {
                (Some(a), Some(b)) => limb.contains(a.part) == limb.contains(b.part),
                _ => false,
            }
        });

        let dir = sign_or(request.dir, self.facing);
        let intensity = finite_or(request.intensity, 1.0).clamp(0.4, 2.2);
        let impulse = Impulse {
            horizontal: dir * (18.0 + intensity * 28.0),
            vertical: -(10.0 + intensity * 16.0).max(6.0),
            chaos: 10.0 + intensity * 6.0,
            pivot_y: None,
            source_y: request.hit_y,
        };
        self.apply_impulse(&detached, &impulse);
        self.extra_iterations = self.extra_iterations.max(3.0);
        self.sleep_timer = 0.0;
        true
    }

    /// Snap particles that crossed a floor line onto it, with friction and
    /// partial bounce. Returns whether anything touched.
    ///
    /// A particle counts as coming from above while the top of its previous
    /// position is above the line, so one spawned or nudged partly under it
    /// is still caught.
    fn resolve_floors(&mut self, world: &WorldConfig, friction: f32, bounce: f32) -> bool {
        let mut touched = false;
        for p in &mut self.particles {
            let Some(floor_y) = landing_floor(world, p.prev.y - p.radius, p.pos.y + p.radius, p.pos.x) else {
                continue;
            };
            touched = true;
            p.pos.y = floor_y - p.radius;
            let v = p.pos - p.prev;
            if v.y > 0.0 {
                p.prev.y = p.pos.y + v.y * bounce;
            }
            p.prev.x = p.pos.x - v.x * (1.0 - friction);
        }
        touched
    }

    /// Move both ends of each constraint toward its rest length. Each end
    /// takes the share of the correction given by its own inverse mass,
    /// i.e. the other end's mass share. Order-dependent.
    fn relax_constraints(&mut self) {
        for c in &self.constraints {
            let (a, b) = (self.particles[c.a], self.particles[c.b]);
            let delta = b.pos - a.pos;
            let dist = delta.length().max(0.001);
            let diff = (dist - c.rest) / dist;
            let total_inv_mass = (a.inv_mass + b.inv_mass).max(0.001);
            let a_share = a.inv_mass / total_inv_mass;
            let b_share = b.inv_mass / total_inv_mass;
            let adjust = delta * (diff * c.stiffness);
            self.particles[c.a].pos += adjust * a_share;
            self.particles[c.b].pos -= adjust * b_share;
        }
    }

    /// Advance one frame
    pub fn step(&mut self, dt: f32, world: &WorldConfig, tuning: &RagdollTuning) {
        let step = if dt.is_finite() {
            dt.clamp(tuning.min_step, tuning.max_step)
        } else {
            tuning.min_step
        };
        let gravity_step = tuning.gravity * step * step;

        let mut energy = 0.0;
        for p in &mut self.particles {
            let mut v = (p.pos - p.prev) * tuning.damping;
            v.y += gravity_step;
            let speed = v.length();
            if speed > tuning.max_step_speed {
                v = v * (tuning.max_step_speed / speed);
            }
            energy += v.x.abs() + v.y.abs();
            p.prev = p.pos;
            p.pos += v;
        }

        let touched = self.resolve_floors(world, 0.58, 0.04);
        let count = self.particles.len() as f32;
        let extra = self.extra_iterations.clamp(0.0, tuning.max_extra_iterations);
        let settle = if touched && energy < count * 1.2 { 1.0 } else { 0.0 };
        let iterations = (tuning.base_iterations as f32 + extra + settle).ceil() as usize;

        for _ in 0..iterations {
            self.relax_constraints();
            self.resolve_floors(world, 0.6, 0.0);
        }

        self.extra_iterations = (self.extra_iterations - step * tuning.extra_decay_rate).max(0.0);
        if touched && energy < count * 0.5 {
            self.sleep_timer = (self.sleep_timer + step).min(2.0);
        } else {
            self.sleep_timer = (self.sleep_timer - step * 2.0).max(0.0);
        }
        if self.sleep_timer > tuning.sleep_after {
            for p in &mut self.particles {
                p.prev = p.pos - (p.pos - p.prev) * tuning.sleep_damping;
            }
        }
    }
}

/// Commands received before the ragdoll exists, replayed once at spawn
#[derive(Debug, Clone, Default)]
pub struct DeferredCommands {
    /// Single slot; a newer impact replaces an older one
    impact: Option<RagdollImpact>,
    severs: VecDeque<SeverRequest>,
}

impl DeferredCommands {
    pub fn queue_impact(&mut self, impact: RagdollImpact) {
        self.impact = Some(impact);
    }

    pub fn queue_sever(&mut self, request: SeverRequest) {
        self.severs.push_back(request);
        while self.severs.len() > MAX_QUEUED_SEVERS {
            self.severs.pop_front();
        }
    }

    pub fn queued_impact(&self) -> Option<&RagdollImpact> {
        self.impact.as_ref()
    }

    pub fn queued_severs(&self) -> impl Iterator<Item = &SeverRequest> {
        self.severs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.impact.is_none() && self.severs.is_empty()
    }

    fn take(&mut self) -> (Option<RagdollImpact>, VecDeque<SeverRequest>) {
        (self.impact.take(), std::mem::take(&mut self.severs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RagdollPhase {
    /// No ragdoll; the character is animated normally
    Inactive,
    Active,
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImpactOutcome {
    Applied,
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverOutcome {
    Severed,
    AlreadySevered,
    Queued,
}

/// Per-character ragdoll state, owned by the character
#[derive(Debug, Clone, Default)]
pub struct RagdollState {
    body: Option<Ragdoll>,
    deferred: DeferredCommands,
}

impl RagdollState {
    pub fn is_active(&self) -> bool {
        self.body.is_some()
    }

    pub fn body(&self) -> Option<&Ragdoll> {
        self.body.as_ref()
    }

    pub fn deferred(&self) -> &DeferredCommands {
        &self.deferred
    }

    pub fn phase(&self, tuning: &RagdollTuning) -> RagdollPhase {
        match &self.body {
            None => RagdollPhase::Inactive,
            Some(body) if body.is_settled(tuning) => RagdollPhase::Settled,
            Some(_) => RagdollPhase::Active,
        }
    }

    /// Create the ragdoll and flush deferred commands: the queued impact (or
    /// `impact` if nothing was queued), then queued severs in order. Returns
    /// false if a ragdoll already exists.
    pub fn spawn(&mut self, pose: &SpawnPose, impact: Option<RagdollImpact>, tuning: &RagdollTuning) -> bool {
        if self.body.is_some() {
            return false;
        }

        let mut body = Ragdoll::build(pose);
        let pivot_y = body.particles[2].pos.y;
        let settle_kick = Impulse {
            horizontal: body.facing * 18.0,
            vertical: -10.0,
            chaos: 6.0,
            pivot_y: Some(pivot_y),
            source_y: None,
        };
        let indices = body.all_indices();
        body.apply_impulse(&indices, &settle_kick);

        let (queued_impact, queued_severs) = self.deferred.take();
        if let Some(impact) = queued_impact.or(impact) {
            body.apply_impact(&impact, tuning);
        }
        for request in &queued_severs {
            body.sever(request);
        }

        debug!(
            replayed_severs = queued_severs.len(),
            severed = ?body.severed_parts(),
            "Ragdoll spawned"
        );
        self.body = Some(body);
        true
    }

    /// Apply an impact now, or hold it for spawn
    pub fn apply_impact(&mut self, impact: RagdollImpact, tuning: &RagdollTuning) -> ImpactOutcome {
        match &mut self.body {
            Some(body) => {
                body.apply_impact(&impact, tuning);
                ImpactOutcome::Applied
            }
            None => {
                self.deferred.queue_impact(impact);
                ImpactOutcome::Queued
            }
        }
    }

    /// Sever now, or hold the request for spawn
    pub fn sever(&mut self, request: SeverRequest) -> SeverOutcome {
        match &mut self.body {
            Some(body) => {
                if body.sever(&request) {
                    debug!(limb = ?request.limb, "Limb severed");
                    SeverOutcome::Severed
                } else {
                    SeverOutcome::AlreadySevered
                }
            }
            None => {
                self.deferred.queue_sever(request);
                SeverOutcome::Queued
            }
        }
    }

    pub fn step(&mut self, dt: f32, world: &WorldConfig, tuning: &RagdollTuning) {
        if let Some(body) = &mut self.body {
            body.step(dt, world, tuning);
        }
    }

    /// Full teardown, including anything deferred
    pub fn clear(&mut self) {
        self.body = None;
        self.deferred = DeferredCommands::default();
    }
}
