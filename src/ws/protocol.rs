//! Inbound wire types for the authoritative server feed
//!
//! Messages are flat JSON objects tagged by `type`. The top level of a message
//! must parse; individual player, projectile, horse and event records inside a
//! snapshot are decoded one at a time and a malformed record is skipped with a
//! warning instead of failing the whole batch. Numeric fields accept numbers,
//! numeric strings and null; anything non-finite decodes as missing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub type PlayerId = u64;
pub type ProjectileId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Team {
    Red,
    Blue,
}

/// Weapon loadout as reported by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loadout {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub arrows: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub longsword: bool,
    /// Missing means "default for the weapon", which differs from `false`
    #[serde(default, deserialize_with = "lenient_opt_bool")]
    pub shield: Option<bool>,
    #[serde(default, alias = "miniSword", deserialize_with = "lenient_bool")]
    pub mini_sword: bool,
    #[serde(default, deserialize_with = "lenient_string")]
    pub role_category: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwordPhase {
    #[default]
    Idle,
    Windup,
    Active,
    Recovery,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwordAttack {
    #[default]
    Slash,
    UpperSlash,
    LowerSlash,
    Pierce,
}

/// What dealt a hit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    #[default]
    Arrow,
    Sword,
    Ballista,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitType {
    Head,
    #[default]
    #[serde(other)]
    Body,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectileKind {
    #[default]
    Arrow,
    /// Heavy ballista bolt
    Bolt,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WirePoint {
    #[serde(deserialize_with = "required_f32")]
    pub x: f32,
    #[serde(deserialize_with = "required_f32")]
    pub y: f32,
}

/// Per-player authoritative state. Every field except `id` may be missing;
/// missing fields leave the local value untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlayerSnapshot {
    #[serde(deserialize_with = "required_id")]
    pub id: PlayerId,
    #[serde(default, deserialize_with = "lenient_enum")]
    pub team: Option<Team>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub x: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub y: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub vx: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub vy: Option<f32>,
    #[serde(default, alias = "health", deserialize_with = "lenient_f32")]
    pub hp: Option<f32>,
    #[serde(default, deserialize_with = "lenient_opt_bool")]
    pub alive: Option<bool>,
    #[serde(default, deserialize_with = "lenient_opt_bool")]
    pub on_ground: Option<bool>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub aim_angle: Option<f32>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub bow_drawn: bool,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub draw_power: Option<f32>,
    #[serde(default, deserialize_with = "lenient_enum")]
    pub loadout: Option<Loadout>,
    /// `None` means not mounted; any other value is the horse key
    #[serde(default, deserialize_with = "lenient_key")]
    pub mounted_horse_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub using_ballista_side: Option<String>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub facing_dir: Option<f32>,
    #[serde(default, deserialize_with = "lenient_enum")]
    pub sword_phase: Option<SwordPhase>,
    #[serde(default, deserialize_with = "lenient_enum")]
    pub sword_attack: Option<SwordAttack>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub sword_phase_timer: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub sword_phase_duration: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub sword_reaction_timer: Option<f32>,
    #[serde(default, deserialize_with = "lenient_enum")]
    pub sword_reaction_attack: Option<SwordAttack>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub shield_blocking: bool,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub shield_block_angle: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub armor_break_stage: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub armor_break_ratio: Option<f32>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub sprinting: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub crouching: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub sliding: bool,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub slide_timer: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub slide_dir: Option<f32>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub on_wall: bool,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub wall_side: Option<f32>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub ledge_grabbed: bool,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub ledge_side: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub ledge_x: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub ledge_y: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub ledge_hang_timer: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub height: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub stamina: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub stamina_max: Option<f32>,
}

/// An in-flight projectile as reported by the server
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectileSnapshot {
    #[serde(deserialize_with = "required_id")]
    pub id: ProjectileId,
    #[serde(deserialize_with = "required_f32")]
    pub x: f32,
    #[serde(deserialize_with = "required_f32")]
    pub y: f32,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub vx: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub vy: Option<f32>,
    #[serde(default, deserialize_with = "lenient_enum")]
    pub team: Option<Team>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub owner_id: Option<PlayerId>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub power_ratio: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub arrow_tier: Option<f32>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub projectile_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub source: Option<String>,
}

impl ProjectileSnapshot {
    pub fn kind(&self) -> ProjectileKind {
        let is_bolt = |s: &Option<String>| matches!(s.as_deref(), Some("ballista") | Some("ballista_bolt"));
        if is_bolt(&self.source) || is_bolt(&self.projectile_type) {
            ProjectileKind::Bolt
        } else {
            ProjectileKind::Arrow
        }
    }
}

/// A horse box. Position is the body anchor, not the top-left corner.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HorseSnapshot {
    #[serde(default)]
    pub id: Value,
    #[serde(deserialize_with = "required_f32")]
    pub x: f32,
    #[serde(deserialize_with = "required_f32")]
    pub y: f32,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub width: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub height: Option<f32>,
}

/// A discrete hit on a player
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HitEvent {
    #[serde(deserialize_with = "lenient_enum")]
    pub source: Option<HitSource>,
    #[serde(deserialize_with = "lenient_id")]
    pub target_id: Option<PlayerId>,
    #[serde(deserialize_with = "lenient_id")]
    pub shooter_id: Option<PlayerId>,
    #[serde(deserialize_with = "lenient_enum")]
    pub shooter_team: Option<Team>,
    #[serde(deserialize_with = "lenient_f32")]
    pub damage: Option<f32>,
    #[serde(deserialize_with = "lenient_f32")]
    pub final_damage: Option<f32>,
    #[serde(deserialize_with = "lenient_enum")]
    pub hit_point: Option<WirePoint>,
    #[serde(deserialize_with = "lenient_enum")]
    pub hit_type: Option<HitType>,
    /// Ragdoll part the projectile collided with, when known
    #[serde(alias = "hitPart", deserialize_with = "lenient_string")]
    pub hit_part: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub blocked_by_shield: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub blocked_by_invuln: bool,
    #[serde(deserialize_with = "lenient_bool")]
    pub shield_perfect_block: bool,
    #[serde(deserialize_with = "lenient_f32")]
    pub projectile_vx: Option<f32>,
    #[serde(deserialize_with = "lenient_f32")]
    pub projectile_vy: Option<f32>,
    #[serde(deserialize_with = "lenient_f32")]
    pub attacker_x: Option<f32>,
    #[serde(deserialize_with = "lenient_enum")]
    pub sword_attack: Option<SwordAttack>,
    #[serde(deserialize_with = "lenient_f32")]
    pub armor_break_stage: Option<f32>,
    #[serde(deserialize_with = "lenient_f32")]
    pub armor_break_ratio: Option<f32>,
    #[serde(deserialize_with = "lenient_bool")]
    pub armor_break_stage_changed: bool,
}

impl HitEvent {
    pub fn source(&self) -> HitSource {
        self.source.unwrap_or_default()
    }

    /// Damage after mitigation, falling back to raw damage
    pub fn final_damage(&self) -> f32 {
        self.final_damage.or(self.damage).unwrap_or(0.0).max(0.0)
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked_by_shield || self.blocked_by_invuln
    }

    pub fn is_headshot(&self) -> bool {
        self.hit_type == Some(HitType::Head)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundInfo {
    #[serde(deserialize_with = "lenient_id")]
    pub number: Option<u64>,
    #[serde(deserialize_with = "lenient_string")]
    pub state: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub winner_team: Option<String>,
    #[serde(deserialize_with = "lenient_f32")]
    pub next_round_in: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchInfo {
    #[serde(deserialize_with = "lenient_string")]
    pub state: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub winner_team: Option<String>,
    #[serde(deserialize_with = "lenient_f32")]
    pub next_match_in: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlowMotion {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub enabled: bool,
    #[serde(default = "SlowMotion::default_scale", deserialize_with = "scale_or_one")]
    pub scale: f32,
}

impl SlowMotion {
    fn default_scale() -> f32 {
        1.0
    }
}

impl Default for SlowMotion {
    fn default() -> Self {
        Self {
            enabled: false,
            scale: 1.0,
        }
    }
}

/// A decoded snapshot. List fields are `None` when the server omitted them,
/// which is different from an empty list: an empty projectile list marks
/// every tracked projectile stale, a missing one changes nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub tick: Option<u64>,
    pub players: Option<Vec<PlayerSnapshot>>,
    pub projectiles: Option<Vec<ProjectileSnapshot>>,
    pub horses: Option<Vec<HorseSnapshot>>,
    pub events: Vec<HitEvent>,
    pub round: Option<RoundInfo>,
    pub match_info: Option<MatchInfo>,
    pub slow_motion: Option<SlowMotion>,
}

/// Messages sent from server to client that the simulation consumes
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMsg {
    /// Periodic authoritative state
    Snapshot(Snapshot),
    /// Slow motion toggled outside a snapshot
    SlowMotionState(SlowMotion),
    Pong {
        timestamp: u64,
    },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope {
    Snapshot(RawSnapshot),
    SlowMotionState(SlowMotion),
    Pong {
        #[serde(default, deserialize_with = "lenient_id")]
        timestamp: Option<u64>,
    },
}

const KNOWN_TYPES: [&str; 3] = ["snapshot", "slow_motion_state", "pong"];

#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default, deserialize_with = "lenient_id")]
    tick: Option<u64>,
    #[serde(default, deserialize_with = "lenient_list")]
    players: Option<Vec<Value>>,
    #[serde(default, alias = "projectiles", deserialize_with = "lenient_list")]
    arrows: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient_list")]
    horses: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient_list")]
    events: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient_enum")]
    round: Option<RoundInfo>,
    #[serde(default, rename = "match", deserialize_with = "lenient_enum")]
    match_info: Option<MatchInfo>,
    #[serde(default, deserialize_with = "lenient_enum")]
    slow_motion: Option<SlowMotion>,
}

impl RawSnapshot {
    fn into_snapshot(self) -> Snapshot {
        let events = self
            .events
            .unwrap_or_default()
            .into_iter()
            .filter(|event| event.get("type").and_then(Value::as_str) == Some("hit"))
            .collect::<Vec<_>>();

        Snapshot {
            tick: self.tick,
            players: self.players.map(|records| decode_records(records, "player")),
            projectiles: self.arrows.map(|records| decode_records(records, "projectile")),
            horses: self.horses.map(|records| decode_records(records, "horse")),
            events: decode_records(events, "hit event"),
            round: self.round,
            match_info: self.match_info,
            slow_motion: self.slow_motion,
        }
    }
}

impl ServerMsg {
    /// Decode one text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
        if !KNOWN_TYPES.contains(&kind) {
            return Err(ProtocolError::UnsupportedMessage(kind.to_string()));
        }

        let msg = match serde_json::from_value::<Envelope>(value)? {
            Envelope::Snapshot(raw) => ServerMsg::Snapshot(raw.into_snapshot()),
            Envelope::SlowMotionState(state) => ServerMsg::SlowMotionState(state),
            Envelope::Pong { timestamp } => ServerMsg::Pong {
                timestamp: timestamp.unwrap_or(0),
            },
        };
        Ok(msg)
    }
}

/// Decode each record on its own, skipping the ones that do not parse
fn decode_records<T: DeserializeOwned>(records: Vec<Value>, what: &'static str) -> Vec<T> {
    let total = records.len();
    let decoded: Vec<T> = records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| match serde_json::from_value::<T>(record) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed {} record", what);
                None
            }
        })
        .collect();
    if decoded.len() != total {
        debug!(kept = decoded.len(), total, "Partially decoded {} list", what);
    }
    decoded
}

/// Protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported message type: {0:?}")]
    UnsupportedMessage(String),
}

// --- lenient field decoders ---

fn number_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn lenient_f32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f32>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(number_from_value)
        .map(|v| v as f32)
        .filter(|v| v.is_finite()))
}

fn required_f32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    lenient_f32(deserializer)?.ok_or_else(|| serde::de::Error::custom("expected a finite number"))
}

fn scale_or_one<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
    Ok(lenient_f32(deserializer)?.filter(|v| *v > 0.0).unwrap_or(1.0))
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|v| match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }))
}

fn required_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    lenient_id(deserializer)?.ok_or_else(|| serde::de::Error::custom("expected a numeric id"))
}

fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn lenient_opt_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(truthy))
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(lenient_opt_bool(deserializer)?.unwrap_or(false))
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

/// Any non-null value as a string key; only null or absence reads as `None`
fn lenient_key<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }))
}

/// Decode a nested value, treating anything unrecognised as missing
fn lenient_enum<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

fn lenient_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<Value>>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => Some(items),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> Snapshot {
        match ServerMsg::decode(&value.to_string()).unwrap() {
            ServerMsg::Snapshot(s) => s,
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn malformed_records_are_skipped() {
        let snap = snapshot(json!({
            "type": "snapshot",
            "players": [
                {"id": 1, "x": 10, "y": "20", "alive": true},
                {"x": 5},
                {"id": "2", "x": null, "vx": "fast"}
            ],
            "arrows": [
                {"id": 7, "x": 1, "y": 2, "vx": 3, "vy": 4},
                {"id": 8, "y": 2}
            ],
            "events": [
                {"type": "hit", "source": "sword", "target_id": 1, "final_damage": 38},
                {"type": "kill", "target_id": 1}
            ]
        }));

        let players = snap.players.unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].y, Some(20.0));
        assert_eq!(players[0].alive, Some(true));
        assert_eq!(players[1].id, 2);
        assert_eq!(players[1].x, None);
        assert_eq!(players[1].vx, None);

        let projectiles = snap.projectiles.unwrap();
        assert_eq!(projectiles.len(), 1);
        assert_eq!(projectiles[0].id, 7);

        assert_eq!(snap.events.len(), 1);
        assert_eq!(snap.events[0].source(), HitSource::Sword);
        assert_eq!(snap.events[0].final_damage(), 38.0);
        assert!(snap.horses.is_none());
    }

    #[test]
    fn any_non_null_horse_id_means_mounted() {
        let snap = snapshot(json!({
            "type": "snapshot",
            "players": [
                {"id": 1, "mounted_horse_id": "h1"},
                {"id": 2, "mounted_horse_id": 4},
                {"id": 3, "mounted_horse_id": ""},
                {"id": 4, "mounted_horse_id": null},
                {"id": 5}
            ]
        }));

        let mounts: Vec<Option<&str>> = snap
            .players
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.mounted_horse_id.as_deref())
            .collect();
        assert_eq!(mounts, vec![Some("h1"), Some("4"), Some(""), None, None]);
    }

    #[test]
    fn unknown_values_fall_back() {
        let snap = snapshot(json!({
            "type": "snapshot",
            "players": [{"id": 3, "team": "GREEN", "sword_phase": "spinning", "loadout": {"longsword": 1}}],
            "events": [{"type": "hit", "source": "catapult", "hit_type": "elbow", "hit_point": {"x": "nope"}}],
            "slow_motion": {"enabled": true, "scale": 0}
        }));
        let player = &snap.players.unwrap()[0];
        assert_eq!(player.team, None);
        assert_eq!(player.sword_phase, None);
        assert!(player.loadout.as_ref().unwrap().longsword);
        assert_eq!(player.loadout.as_ref().unwrap().shield, None);

        let event = &snap.events[0];
        assert_eq!(event.source(), HitSource::Other);
        assert_eq!(event.hit_type, Some(HitType::Body));
        assert_eq!(event.hit_point, None);

        let slow = snap.slow_motion.unwrap();
        assert!(slow.enabled);
        assert_eq!(slow.scale, 1.0);
    }

    #[test]
    fn projectile_kind_from_source() {
        let snap = snapshot(json!({
            "type": "snapshot",
            "arrows": [
                {"id": 1, "x": 0, "y": 0, "source": "ballista"},
                {"id": 2, "x": 0, "y": 0, "projectile_type": "arrow"}
            ]
        }));
        let projectiles = snap.projectiles.unwrap();
        assert_eq!(projectiles[0].kind(), ProjectileKind::Bolt);
        assert_eq!(projectiles[1].kind(), ProjectileKind::Arrow);
    }

    #[test]
    fn top_level_errors() {
        assert!(matches!(ServerMsg::decode("{not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(
            ServerMsg::decode(r#"{"type":"lobby_update"}"#),
            Err(ProtocolError::UnsupportedMessage(kind)) if kind == "lobby_update"
        ));
        assert_eq!(
            ServerMsg::decode(r#"{"type":"pong","timestamp":42}"#).unwrap(),
            ServerMsg::Pong { timestamp: 42 }
        );
    }
}
