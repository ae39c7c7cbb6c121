//! XP accrual, leveling and rewards for the LevelUp progression engine.
//!
//! This crate holds everything between an incoming activity event or slash
//! command and the resulting store mutation and reward instructions. Chat
//! platform I/O lives outside: the engine talks to the platform only
//! through the [`RewardDispatcher`] trait.
//!
//! # Modules
//!
//! - [`engine`] -- [`ProgressionEngine`], the activity and command entry point.
//! - [`curve`] -- [`LevelCurve`] implementations and their configuration.
//! - [`cooldown`] -- [`RateLimiter`], the per-member XP cooldown gate.
//! - [`transition`] -- XP changes, level recomputation and level-up events.
//! - [`dispatch`] -- [`RewardDispatcher`] and reward routing.
//! - [`query`] -- Rank cards and leaderboards.
//! - [`admin`] -- Slash-command parsing and validation.
//! - [`config`] -- Loading `levelup-config.yaml` into typed structs.
//! - [`error`] -- [`CommandError`] and [`EngineError`].
//!
//! [`ProgressionEngine`]: engine::ProgressionEngine
//! [`LevelCurve`]: curve::LevelCurve
//! [`RateLimiter`]: cooldown::RateLimiter
//! [`RewardDispatcher`]: dispatch::RewardDispatcher
//! [`CommandError`]: error::CommandError
//! [`EngineError`]: error::EngineError

pub mod admin;
pub mod config;
pub mod cooldown;
pub mod curve;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod query;
pub mod transition;

pub use admin::{AdminCommand, Command, QueryCommand};
pub use config::{ConfigError, EngineConfig};
pub use cooldown::RateLimiter;
pub use curve::{CurveConfig, CurveError, LevelCurve};
pub use dispatch::{DispatchError, RewardDispatcher};
pub use engine::{DailyClaim, EngineOptions, ProgressionEngine, XpAdjustment};
pub use error::{CommandError, EngineError};
pub use query::QueryLayer;
