//! Shared type definitions for the LevelUp progression engine.
//!
//! This crate is the single source of truth for the data model shared by
//! the store, the engine and the chat gateway. Types flow downstream to
//! `TypeScript` via `ts-rs` for the rank-card renderer.
//!
//! # Modules
//!
//! - [`ids`] -- Typed snowflake wrappers for guilds, members, channels, roles
//! - [`structs`] -- Persisted records and read-side projections
//! - [`events`] -- Activity intake, level-up events, reward instructions
//! - [`commands`] -- Slash-command invocations and responses

pub mod commands;
pub mod events;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use commands::{CommandInvocation, CommandReply, CommandResponse, CommandSummary};
pub use events::{
    ActivityEvent, ActivityOutcome, DeliveryReceipt, LevelUpCause, LevelUpEvent,
    RewardInstruction, RewardWarning, SkipReason,
};
pub use ids::{ChannelId, GuildId, MemberId, RoleId};
pub use structs::{
    Cosmetic, DEFAULT_COOLDOWN_SECONDS, DEFAULT_DAILY_BONUS_XP, DEFAULT_EMBED_COLOR,
    DEFAULT_XP_PER_EVENT, GuildConfig, LeaderboardEntry, MemberProgress, RankCard,
    RoleRewardPolicy, XpReward,
};
