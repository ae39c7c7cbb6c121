//! Slash-command request and response types.
//!
//! The gateway forwards every slash command as a [`CommandInvocation`] with
//! loosely-typed arguments and a permission flag it computed itself. The
//! engine answers with a [`CommandResponse`] that the gateway renders.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::events::{LevelUpEvent, RewardWarning};
use crate::ids::{ChannelId, GuildId, MemberId};
use crate::structs::{GuildConfig, LeaderboardEntry, MemberProgress, RankCard};

/// A slash command as received by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CommandInvocation {
    /// Command name, e.g. `set-xp`.
    pub name: String,
    /// Named arguments as the platform delivered them (numbers, strings, booleans).
    #[serde(default)]
    pub args: BTreeMap<String, serde_json::Value>,
    /// Member who issued the command.
    pub invoker_id: MemberId,
    /// Guild the command was issued in.
    pub guild_id: GuildId,
    /// Channel the command was issued in.
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    /// Whether the invoker holds administrator permission (computed by the gateway).
    #[serde(default)]
    pub is_admin: bool,
    /// When the command was issued.
    pub issued_at: DateTime<Utc>,
}

/// The engine's answer to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CommandResponse {
    /// What the command did or returned.
    pub reply: CommandReply,
    /// Present when the command raised a member's level.
    pub level_up: Option<LevelUpEvent>,
    /// Reward side effects that failed.
    pub warnings: Vec<RewardWarning>,
}

impl CommandResponse {
    /// A response with no level-up and no warnings.
    pub const fn plain(reply: CommandReply) -> Self {
        Self {
            reply,
            level_up: None,
            warnings: Vec::new(),
        }
    }
}

/// Command-specific payload of a [`CommandResponse`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandReply {
    /// A member's rank card.
    Rank {
        /// The card.
        card: RankCard,
    },
    /// The queried member has no progress in this guild yet.
    NoData {
        /// Member that was looked up.
        member_id: MemberId,
    },
    /// Top members of the guild.
    Leaderboard {
        /// Rows in leaderboard order.
        entries: Vec<LeaderboardEntry>,
    },
    /// The daily bonus was granted.
    DailyClaimed {
        /// XP granted by the claim.
        xp_awarded: u64,
        /// Progress after the claim.
        progress: MemberProgress,
    },
    /// The daily bonus was already claimed in the current window.
    DailyOnCooldown {
        /// Seconds until the next claim is possible.
        retry_after_secs: u64,
    },
    /// Leveling is disabled in this guild.
    LevelingDisabled,
    /// A guild setting changed.
    ConfigUpdated {
        /// Name of the command that changed it.
        setting: String,
        /// The guild configuration after the change.
        config: Box<GuildConfig>,
    },
    /// A member's XP was set or adjusted by an administrator.
    XpAdjusted {
        /// Member whose XP changed.
        member_id: MemberId,
        /// Progress after the change.
        progress: MemberProgress,
    },
    /// A member's progress was reset to zero.
    MemberReset {
        /// Member that was reset.
        member_id: MemberId,
    },
    /// Every member's progress in the guild was cleared.
    ServerReset {
        /// Number of member records removed.
        members_cleared: u64,
    },
    /// The guild's configuration and progress were destroyed.
    GuildWiped,
    /// The command listing.
    Help {
        /// Every command the engine understands, in display order.
        commands: Vec<CommandSummary>,
    },
}

/// One line of the command listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct CommandSummary {
    /// Command name as typed by members.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Whether the command requires administrator permission.
    pub admin_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_optional_fields_default() {
        let json = r#"{
            "name": "rank",
            "invoker_id": 7,
            "guild_id": 1,
            "issued_at": "2026-01-01T00:00:00Z"
        }"#;
        let invocation: Option<CommandInvocation> = serde_json::from_str(json).ok();
        assert!(invocation.is_some_and(|i| i.args.is_empty() && !i.is_admin && i.channel_id.is_none()));
    }

    #[test]
    fn reply_is_tagged_by_kind() {
        let reply = CommandReply::DailyOnCooldown {
            retry_after_secs: 60,
        };
        let json = serde_json::to_value(&reply).unwrap_or_default();
        assert_eq!(json["kind"], "daily_on_cooldown");
        assert_eq!(json["retry_after_secs"], 60);
    }
}
