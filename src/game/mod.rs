//! Client simulation: reconciliation, projectiles, ragdolls and hit routing

pub mod anchoring;
pub mod combat;
pub mod effects;
pub mod math;
pub mod player;
pub mod projectile;
pub mod ragdoll;
pub mod reconcile;
pub mod session;

pub use combat::{CombatRouter, HitOutcome};
pub use player::{PlayerEntity, PlayerMode};
pub use projectile::{Projectile, ProjectileTracker};
pub use ragdoll::{Ragdoll, RagdollState};
pub use reconcile::{Reconciler, Transition};
pub use session::{ClientSession, FrameReport, LocalInput, SnapshotReport};
