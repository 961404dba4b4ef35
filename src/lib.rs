//! Skirmish client core
//!
//! Keeps locally simulated players, projectiles and ragdolls consistent with
//! a low-rate authoritative server feed:
//! - snapshot reconciliation (local snap/blend, remote interpolation)
//! - projectile tracking with stale extrapolation and swept anchoring
//! - Verlet ragdolls with impulses and limb severing
//! - routing of hit events into reactions, embeds and severs

pub mod config;
pub mod game;
pub mod util;
pub mod ws;

pub use config::Config;
pub use game::ClientSession;
