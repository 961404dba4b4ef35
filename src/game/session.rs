//! Client session: owns every simulated entity and runs the frame pipeline
//!
//! Snapshots only mutate buffers (cached player states, projectile targets,
//! horse boxes) and route the hit events they carry. All continuous motion
//! happens in [`ClientSession::step_frame`]: players are reconciled first,
//! then projectiles advance and anchor, then ragdolls integrate.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, trace};

use crate::config::{Config, WorldConfig};
use crate::util::time::clamp_frame_delta;
use crate::ws::protocol::{
    HorseSnapshot, MatchInfo, PlayerId, PlayerSnapshot, ProjectileId, RoundInfo, ServerMsg, SlowMotion, Snapshot,
};

use super::combat::{CombatRouter, CombatTargets, HitOutcome};
use super::effects::{EmbeddedProjectiles, ImpactQueue};
use super::math::{finite_or, Rect};
use super::player::{PlayerEntity, PlayerMode};
use super::projectile::{Anchored, Projectile, ProjectileTracker, TrackerSync};
use super::reconcile::{Reconciler, Transition};

/// A horse's collision box. `x`/`y` is the body anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorseBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl HorseBox {
    pub const DEFAULT_WIDTH: f32 = 86.0;
    pub const DEFAULT_HEIGHT: f32 = 62.0;

    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            width: Self::DEFAULT_WIDTH,
            height: Self::DEFAULT_HEIGHT,
        }
    }

    fn from_snapshot(record: &HorseSnapshot) -> Self {
        let size = |raw: Option<f32>, fallback: f32| raw.filter(|v| *v > 0.0).unwrap_or(fallback);
        Self {
            x: record.x,
            y: record.y,
            width: size(record.width, Self::DEFAULT_WIDTH),
            height: size(record.height, Self::DEFAULT_HEIGHT),
        }
    }

    /// The two horses standing in the stables when the server reports none
    pub fn stabled(world: &WorldConfig) -> [HorseBox; 2] {
        let y = world.ground_y - 16.0;
        [HorseBox::new(220.0, y), HorseBox::new(world.width - 220.0, y)]
    }

    /// The body sits mostly above the anchor; legs reach just below it
    pub fn rect(&self) -> Rect {
        Rect::from_edges(
            self.x - self.width * 0.5,
            self.x + self.width * 0.5,
            self.y - self.height * 0.92,
            self.y + self.height * 0.95,
        )
    }
}

/// Match metadata carried alongside snapshots
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotMeta {
    pub tick: Option<u64>,
    pub round: Option<RoundInfo>,
    pub match_info: Option<MatchInfo>,
    pub slow_motion: SlowMotion,
    pub last_snapshot_ms: Option<f64>,
}

/// Locally predicted input that snapshots must not overwrite
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LocalInput {
    pub bow_held: bool,
    pub aim_angle: f32,
    pub draw_power: f32,
}

/// What applying a snapshot changed
#[derive(Debug, Clone, Default)]
pub struct SnapshotReport {
    pub joined: Vec<PlayerId>,
    pub left: Vec<PlayerId>,
    /// `None` when the snapshot carried no projectile list
    pub projectiles: Option<TrackerSync>,
    pub hits: Vec<HitOutcome>,
}

/// What one frame step did
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub transitions: Vec<(PlayerId, Transition)>,
    pub anchored: Vec<Anchored>,
    pub expired: Vec<ProjectileId>,
}

pub struct ClientSession {
    config: Config,
    local_id: Option<PlayerId>,
    input: LocalInput,
    players: BTreeMap<PlayerId, PlayerEntity>,
    horses: Vec<HorseBox>,
    tracker: ProjectileTracker,
    reconciler: Reconciler,
    router: CombatRouter,
    embeds: EmbeddedProjectiles,
    impacts: ImpactQueue,
    meta: SnapshotMeta,
}

impl ClientSession {
    pub fn new(config: Config) -> Self {
        let tracker = ProjectileTracker::new(config.projectile);
        let reconciler = Reconciler::new(config.reconcile);
        let router = CombatRouter::new(config.combat, config.ragdoll.impact_speed_baseline, config.rng_seed);
        let impacts = ImpactQueue::new(config.dedupe);
        Self {
            config,
            local_id: None,
            input: LocalInput::default(),
            players: BTreeMap::new(),
            horses: Vec::new(),
            tracker,
            reconciler,
            router,
            embeds: EmbeddedProjectiles::default(),
            impacts,
            meta: SnapshotMeta::default(),
        }
    }

    pub fn with_local_player(mut self, id: PlayerId) -> Self {
        self.set_local_player(id);
        self
    }

    /// Mark which player this client controls
    pub fn set_local_player(&mut self, id: PlayerId) {
        if let Some(previous) = self.local_id.and_then(|old| self.players.get_mut(&old)) {
            previous.mode = PlayerMode::Remote;
        }
        if let Some(player) = self.players.get_mut(&id) {
            player.mode = PlayerMode::Local;
        }
        self.local_id = Some(id);
    }

    /// Record local aim input. While the bow is held the local player's aim
    /// follows this input instead of the snapshot.
    pub fn set_local_input(&mut self, input: LocalInput) {
        self.input = input;
        if !input.bow_held {
            return;
        }
        if let Some(player) = self.local_id.and_then(|id| self.players.get_mut(&id)) {
            player.bow_drawn = true;
            player.aim_angle = finite_or(input.aim_angle, player.aim_angle);
            player.draw_power = finite_or(input.draw_power, player.draw_power);
        }
    }

    /// Apply one decoded server message. Returns a report for snapshots.
    pub fn apply_message(&mut self, msg: ServerMsg, now_ms: f64) -> Option<SnapshotReport> {
        match msg {
            ServerMsg::Snapshot(snapshot) => Some(self.apply_snapshot(snapshot, now_ms)),
            ServerMsg::SlowMotionState(state) => {
                debug!(enabled = state.enabled, scale = state.scale, "Slow motion state");
                self.meta.slow_motion = state;
                None
            }
            ServerMsg::Pong { timestamp } => {
                trace!(timestamp, "Pong");
                None
            }
        }
    }

    /// Fold a snapshot into the entity buffers and route its hit events.
    /// Events go before the projectile list so a miss reported for an arrow
    /// that hit in the same snapshot is suppressed by the hit's burst.
    ///
    /// Hit events are routed here at arrival, before the next `step_frame`
    /// reconciles the players toward this snapshot. Impacts on a body whose
    /// ragdoll has not spawned yet are queued and replayed at spawn.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot, now_ms: f64) -> SnapshotReport {
        let mut report = SnapshotReport::default();

        if snapshot.tick.is_some() {
            self.meta.tick = snapshot.tick;
        }
        if snapshot.round.is_some() {
            self.meta.round = snapshot.round;
        }
        if snapshot.match_info.is_some() {
            self.meta.match_info = snapshot.match_info;
        }
        if let Some(slow_motion) = snapshot.slow_motion {
            self.meta.slow_motion = slow_motion;
        }
        self.meta.last_snapshot_ms = Some(now_ms);

        if let Some(records) = snapshot.players {
            self.sync_players(records, &mut report);
        }

        if let Some(horses) = &snapshot.horses {
            self.horses = horses.iter().map(HorseBox::from_snapshot).collect();
        }

        for event in &snapshot.events {
            let mut targets = CombatTargets {
                players: &mut self.players,
                embeds: &mut self.embeds,
                impacts: &mut self.impacts,
                ragdoll: &self.config.ragdoll,
            };
            report.hits.push(self.router.route(event, &mut targets, now_ms));
        }

        if let Some(records) = &snapshot.projectiles {
            let sync = self.tracker.apply_snapshot(records, now_ms);
            for miss in &sync.misses {
                self.impacts.push(*miss);
            }
            for cue in &sync.release_cues {
                if let Some(shooter) = self.players.get_mut(&cue.shooter_id) {
                    shooter.trigger_bow_release(cue.power, cue.angle, now_ms);
                }
            }
            report.projectiles = Some(sync);
        }

        debug!(
            tick = ?self.meta.tick,
            players = self.players.len(),
            projectiles = self.tracker.len(),
            events = report.hits.len(),
            "Snapshot applied"
        );
        report
    }

    fn sync_players(&mut self, records: Vec<PlayerSnapshot>, report: &mut SnapshotReport) {
        let (width, height) = (self.config.player_width, self.config.player_height);
        let mut seen = HashSet::with_capacity(records.len());

        for record in records {
            let id = record.id;
            seen.insert(id);
            match self.players.get_mut(&id) {
                Some(player) => player.set_server_state(record),
                None => {
                    let mode = if self.local_id == Some(id) {
                        PlayerMode::Local
                    } else {
                        PlayerMode::Remote
                    };
                    info!(player_id = id, ?mode, "Player joined");
                    self.players
                        .insert(id, PlayerEntity::from_snapshot(&record, mode, width, height));
                    report.joined.push(id);
                }
            }
        }

        let gone: Vec<PlayerId> = self.players.keys().filter(|id| !seen.contains(id)).copied().collect();
        for id in gone {
            self.players.remove(&id);
            self.embeds.clear_player(id);
            info!(player_id = id, "Player left");
            report.left.push(id);
        }
    }

    /// Living character boxes followed by horse boxes, in the order the
    /// anchoring sweep reports entity indices
    pub fn entity_boxes(&self) -> Vec<Rect> {
        let stabled = HorseBox::stabled(&self.config.world);
        let horses: &[HorseBox] = if self.horses.is_empty() { &stabled } else { &self.horses };

        self.players
            .values()
            .filter(|p| p.alive)
            .map(PlayerEntity::bounds)
            .chain(horses.iter().map(HorseBox::rect))
            .collect()
    }

    /// Advance the simulation by one render frame of `dt` seconds
    pub fn step_frame(&mut self, dt: f32, now_ms: f64) -> FrameReport {
        let dt = clamp_frame_delta(dt);
        let alpha = self.reconciler.alpha(dt);
        let mut report = FrameReport::default();

        let bow_held = self.input.bow_held;
        for player in self.players.values_mut() {
            let transitions = self
                .reconciler
                .reconcile(player, alpha, bow_held, now_ms, &self.config.ragdoll);
            for transition in transitions {
                if transition == Transition::Revived {
                    self.embeds.clear_player(player.id);
                }
                report.transitions.push((player.id, transition));
            }
        }

        let entities = self.entity_boxes();
        report.anchored = self.tracker.advance(dt, alpha, now_ms, &self.config.world, &entities);
        report.expired = self.tracker.expire(now_ms, &self.config.world);

        for player in self.players.values_mut() {
            player.ragdoll.step(dt, &self.config.world, &self.config.ragdoll);
        }

        let players = &self.players;
        self.embeds
            .refresh_positions(|id| players.get(&id).map(|p| (p.center(), p.ragdoll.body())));
        self.embeds.expire(now_ms);
        self.impacts.expire(now_ms);

        report
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local_player_id(&self) -> Option<PlayerId> {
        self.local_id
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerEntity> {
        self.players.values()
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerEntity> {
        self.players.get(&id)
    }

    pub fn local_player(&self) -> Option<&PlayerEntity> {
        self.local_id.and_then(|id| self.players.get(&id))
    }

    /// Every known projectile, including stale and anchored ones
    pub fn projectiles(&self) -> impl Iterator<Item = &Projectile> {
        self.tracker.iter()
    }

    pub fn projectile(&self, id: ProjectileId) -> Option<&Projectile> {
        self.tracker.get(id)
    }

    pub fn horses(&self) -> &[HorseBox] {
        &self.horses
    }

    pub fn impacts(&self) -> &ImpactQueue {
        &self.impacts
    }

    pub fn embeds(&self) -> &EmbeddedProjectiles {
        &self.embeds
    }

    pub fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }
}
