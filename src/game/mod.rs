//! Game simulation modules.

pub mod controller;
pub mod destruction;
pub mod map;
pub mod physics;
pub mod simulation;
pub mod snapshot;
pub mod vision;
pub mod weapons;

pub use simulation::{MatchSimulation, PlayerState};
