//! Core entity structs for the progression engine.
//!
//! Covers the two persisted records ([`GuildConfig`] and [`MemberProgress`])
//! and the read-side projections ([`RankCard`], [`LeaderboardEntry`]) handed
//! to the rendering collaborator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{ChannelId, GuildId, MemberId, RoleId};

/// Default XP granted per qualifying activity event.
pub const DEFAULT_XP_PER_EVENT: u64 = 10;

/// Default cooldown between two XP-qualifying events, in seconds.
pub const DEFAULT_COOLDOWN_SECONDS: u64 = 30;

/// Default XP granted by a daily claim.
pub const DEFAULT_DAILY_BONUS_XP: u64 = 100;

/// Default embed color for rank cards and announcements.
pub const DEFAULT_EMBED_COLOR: &str = "#5865F2";

// ---------------------------------------------------------------------------
// XP reward
// ---------------------------------------------------------------------------

/// Amount of XP granted per qualifying activity event.
///
/// Serialized untagged: a fixed reward is a bare integer (`10`), a ranged
/// reward is a two-element array (`[5, 15]`, both bounds inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(untagged)]
pub enum XpReward {
    /// Always grant exactly this amount.
    Fixed(u64),
    /// Grant a uniformly random amount in `[min, max]`.
    Range(u64, u64),
}

impl XpReward {
    /// Inclusive lower and upper bound of the reward.
    pub const fn bounds(self) -> (u64, u64) {
        match self {
            Self::Fixed(amount) => (amount, amount),
            Self::Range(min, max) => (min, max),
        }
    }

    /// Whether the reward is well-formed (a range must have `min <= max`).
    pub const fn is_valid(self) -> bool {
        let (min, max) = self.bounds();
        min <= max
    }
}

impl Default for XpReward {
    fn default() -> Self {
        Self::Fixed(DEFAULT_XP_PER_EVENT)
    }
}

// ---------------------------------------------------------------------------
// Role reward policy
// ---------------------------------------------------------------------------

/// How role rewards are granted when a single XP change skips levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum RoleRewardPolicy {
    /// Grant only the role mapped to the level actually reached.
    #[default]
    Exact,
    /// Grant every role mapped to a level in `(old_level, new_level]`.
    Backfill,
}

// ---------------------------------------------------------------------------
// Cosmetic settings
// ---------------------------------------------------------------------------

/// Presentation settings for rank cards and announcements.
///
/// Opaque to the engine: stored, validated at the command boundary, and
/// passed through to whatever renders the card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(default)]
pub struct Cosmetic {
    /// Embed accent color as `#RRGGBB`.
    pub embed_color: String,
    /// Optional background image for the rank card.
    pub background_image_url: Option<String>,
    /// Named card theme understood by the renderer.
    pub card_theme: String,
}

impl Default for Cosmetic {
    fn default() -> Self {
        Self {
            embed_color: DEFAULT_EMBED_COLOR.to_owned(),
            background_image_url: None,
            card_theme: "default".to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// GuildConfig
// ---------------------------------------------------------------------------

/// Per-guild leveling configuration.
///
/// A guild that has never been configured behaves exactly as if it had a
/// default `GuildConfig`; absence is never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(default)]
pub struct GuildConfig {
    /// Whether activity in this guild earns XP.
    pub enabled: bool,
    /// XP granted per qualifying activity event.
    pub xp_per_event: XpReward,
    /// Minimum seconds between two qualifying events for one member.
    pub cooldown_seconds: u64,
    /// Role granted on reaching a level. One role per level; last write wins.
    pub level_role_map: BTreeMap<u32, RoleId>,
    /// Channel that receives level-up announcements.
    pub notify_channel_id: Option<ChannelId>,
    /// Whether to direct-message the member when no announce channel works.
    pub dm_fallback_enabled: bool,
    /// XP granted by a daily claim.
    pub daily_bonus_xp: u64,
    /// How role rewards are granted across skipped levels.
    pub role_reward_policy: RoleRewardPolicy,
    /// Presentation settings passed through to the renderer.
    pub cosmetic: Cosmetic,
}

impl Default for GuildConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            xp_per_event: XpReward::default(),
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            level_role_map: BTreeMap::new(),
            notify_channel_id: None,
            dm_fallback_enabled: false,
            daily_bonus_xp: DEFAULT_DAILY_BONUS_XP,
            role_reward_policy: RoleRewardPolicy::default(),
            cosmetic: Cosmetic::default(),
        }
    }
}

impl GuildConfig {
    /// Roles earned by moving from `old_level` to `new_level` under this
    /// guild's [`RoleRewardPolicy`].
    ///
    /// Returns an empty list when the level did not increase.
    pub fn roles_for_level_up(&self, old_level: u32, new_level: u32) -> Vec<RoleId> {
        if new_level <= old_level {
            return Vec::new();
        }
        match self.role_reward_policy {
            RoleRewardPolicy::Exact => self
                .level_role_map
                .get(&new_level)
                .copied()
                .into_iter()
                .collect(),
            RoleRewardPolicy::Backfill => {
                let Some(first) = old_level.checked_add(1) else {
                    return Vec::new();
                };
                self.level_role_map
                    .range(first..=new_level)
                    .map(|(_, role)| *role)
                    .collect()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemberProgress
// ---------------------------------------------------------------------------

/// Accumulated progress of one member in one guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct MemberProgress {
    /// Accumulated experience points.
    pub xp: u64,
    /// Level derived from `xp`, persisted to detect increases deterministically.
    pub level: u32,
    /// When the last activity award happened (drives the message cooldown).
    pub last_award_at: Option<DateTime<Utc>>,
    /// When the daily bonus was last claimed.
    pub last_daily_claim_at: Option<DateTime<Utc>>,
}

impl MemberProgress {
    /// A fresh record with zero XP sitting at `base_level`.
    ///
    /// `base_level` must be the curve's level for zero XP.
    pub const fn new(base_level: u32) -> Self {
        Self {
            xp: 0,
            level: base_level,
            last_award_at: None,
            last_daily_claim_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Read-side projections
// ---------------------------------------------------------------------------

/// A member's rank card, as served by the `rank` and `xp` queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct RankCard {
    /// Guild the card belongs to.
    pub guild_id: GuildId,
    /// Member the card describes.
    pub member_id: MemberId,
    /// Accumulated XP.
    pub xp: u64,
    /// Current level.
    pub level: u32,
    /// XP threshold of the current level.
    pub level_floor_xp: u64,
    /// XP threshold of the next level.
    pub next_level_xp: u64,
    /// Progress from the current threshold to the next, 0 to 100.
    pub progress_percent: u8,
    /// 1-based position on the guild leaderboard.
    pub position: u32,
    /// Guild presentation settings for the renderer.
    pub cosmetic: Cosmetic,
}

/// One row of a guild leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub position: u32,
    /// Member on this row. Rendered as an opaque id if they left the guild.
    pub member_id: MemberId,
    /// Accumulated XP.
    pub xp: u64,
    /// Current level.
    pub level: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xp_reward_serializes_untagged() {
        let fixed = serde_json::to_string(&XpReward::Fixed(10)).ok();
        assert_eq!(fixed.as_deref(), Some("10"));
        let range = serde_json::to_string(&XpReward::Range(5, 15)).ok();
        assert_eq!(range.as_deref(), Some("[5,15]"));
    }

    #[test]
    fn xp_reward_parses_both_shapes() {
        let fixed: Option<XpReward> = serde_json::from_str("25").ok();
        assert_eq!(fixed, Some(XpReward::Fixed(25)));
        let range: Option<XpReward> = serde_json::from_str("[1, 3]").ok();
        assert_eq!(range, Some(XpReward::Range(1, 3)));
    }

    #[test]
    fn inverted_range_is_invalid() {
        assert!(XpReward::Range(1, 3).is_valid());
        assert!(XpReward::Range(3, 3).is_valid());
        assert!(!XpReward::Range(4, 3).is_valid());
    }

    #[test]
    fn empty_object_is_default_config() {
        let config: Option<GuildConfig> = serde_json::from_str("{}").ok();
        assert_eq!(config, Some(GuildConfig::default()));
    }

    #[test]
    fn default_config_values() {
        let config = GuildConfig::default();
        assert!(config.enabled);
        assert_eq!(config.xp_per_event, XpReward::Fixed(10));
        assert_eq!(config.cooldown_seconds, 30);
        assert!(!config.dm_fallback_enabled);
        assert_eq!(config.role_reward_policy, RoleRewardPolicy::Exact);
    }

    fn config_with_roles(policy: RoleRewardPolicy) -> GuildConfig {
        let mut config = GuildConfig {
            role_reward_policy: policy,
            ..GuildConfig::default()
        };
        config.level_role_map.insert(2, RoleId(200));
        config.level_role_map.insert(4, RoleId(400));
        config.level_role_map.insert(5, RoleId(500));
        config
    }

    #[test]
    fn exact_policy_grants_only_reached_level() {
        let config = config_with_roles(RoleRewardPolicy::Exact);
        assert_eq!(config.roles_for_level_up(1, 5), vec![RoleId(500)]);
        assert!(config.roles_for_level_up(1, 3).is_empty());
    }

    #[test]
    fn backfill_policy_grants_skipped_levels() {
        let config = config_with_roles(RoleRewardPolicy::Backfill);
        assert_eq!(
            config.roles_for_level_up(1, 5),
            vec![RoleId(200), RoleId(400), RoleId(500)]
        );
        // The old level's own role is not granted again.
        assert_eq!(config.roles_for_level_up(2, 4), vec![RoleId(400)]);
    }

    #[test]
    fn no_roles_without_increase() {
        let config = config_with_roles(RoleRewardPolicy::Backfill);
        assert!(config.roles_for_level_up(5, 5).is_empty());
        assert!(config.roles_for_level_up(5, 2).is_empty());
    }
}
