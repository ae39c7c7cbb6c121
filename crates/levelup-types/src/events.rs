//! Activity intake, level-up emission, and reward delivery types.
//!
//! [`ActivityEvent`] flows from the chat gateway into the engine. When a
//! mutation raises a member's level the engine emits exactly one
//! [`LevelUpEvent`], and its reward side effects are expressed as
//! [`RewardInstruction`]s that the gateway acknowledges with a
//! [`DeliveryReceipt`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{ChannelId, GuildId, MemberId, RoleId};

/// One qualifying chat message, as forwarded by the gateway.
///
/// The gateway has already dropped bot authors and direct messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ActivityEvent {
    /// Guild the message was posted in.
    pub guild_id: GuildId,
    /// Author of the message.
    pub member_id: MemberId,
    /// Channel the message was posted in.
    pub channel_id: ChannelId,
    /// When the message was posted.
    pub timestamp: DateTime<Utc>,
}

/// What caused a level-up.
///
/// Organic causes carry the channel they happened in, which is the last
/// resort for the announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LevelUpCause {
    /// A chat message earned XP.
    Activity {
        /// Channel the triggering message was posted in.
        channel_id: ChannelId,
    },
    /// The member claimed their daily bonus.
    DailyBonus {
        /// Channel the claim was issued from, if any.
        channel_id: Option<ChannelId>,
    },
    /// An administrator set or granted XP.
    Administrative,
}

impl LevelUpCause {
    /// The channel an organic level-up happened in.
    ///
    /// Administrative grants never fall back to a channel announcement.
    pub const fn origin_channel(self) -> Option<ChannelId> {
        match self {
            Self::Activity { channel_id } => Some(channel_id),
            Self::DailyBonus { channel_id } => channel_id,
            Self::Administrative => None,
        }
    }
}

/// A member's level strictly increased.
///
/// Emitted once per XP mutation, even when several levels were crossed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct LevelUpEvent {
    /// Guild the level-up happened in.
    pub guild_id: GuildId,
    /// Member who leveled up.
    pub member_id: MemberId,
    /// Level before the mutation.
    pub old_level: u32,
    /// Level after the mutation.
    pub new_level: u32,
    /// XP after the mutation.
    pub xp: u64,
    /// What triggered the mutation.
    pub cause: LevelUpCause,
    /// Roles to grant for this level-up under the guild's reward policy.
    pub role_rewards: Vec<RoleId>,
}

/// A reward side effect that did not happen.
///
/// Reported once to the triggering surface; never retried and never rolls
/// back the XP mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewardWarning {
    /// The role could not be granted (usually missing permissions).
    RoleGrantFailed {
        /// Role that was not granted.
        role_id: RoleId,
        /// Why delivery failed.
        reason: String,
    },
    /// No announcement route succeeded.
    NotificationUndelivered {
        /// Why the last attempted route failed.
        reason: String,
    },
}

/// Why an activity event earned nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Leveling is disabled in the guild.
    Disabled,
    /// The member is still inside their cooldown window.
    CoolingDown,
}

/// Result of processing one [`ActivityEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActivityOutcome {
    /// The event earned nothing.
    Skipped {
        /// Why the event was skipped.
        reason: SkipReason,
    },
    /// The event earned XP.
    Awarded {
        /// XP granted by this event.
        xp_awarded: u64,
        /// Total XP after the award.
        xp: u64,
        /// Level after the award.
        level: u32,
        /// Present when the award raised the member's level.
        level_up: Option<LevelUpEvent>,
        /// Reward side effects that failed.
        warnings: Vec<RewardWarning>,
    },
}

// ---------------------------------------------------------------------------
// Gateway reward protocol
// ---------------------------------------------------------------------------

/// A reward side effect the engine asks the gateway to perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewardInstruction {
    /// Post the level-up announcement in a channel.
    Announce {
        /// Channel to post in.
        channel_id: ChannelId,
        /// The level-up being announced.
        event: LevelUpEvent,
    },
    /// Send the level-up announcement as a direct message.
    DirectMessage {
        /// The level-up being announced; its member is the recipient.
        event: LevelUpEvent,
    },
    /// Grant a reward role.
    GrantRole {
        /// Guild the role belongs to.
        guild_id: GuildId,
        /// Member receiving the role.
        member_id: MemberId,
        /// Role to grant.
        role_id: RoleId,
    },
}

/// The gateway's answer to a [`RewardInstruction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryReceipt {
    /// The side effect happened.
    Delivered,
    /// The target channel, member or role no longer exists or cannot be reached.
    Unresolvable {
        /// Gateway-supplied detail.
        reason: String,
    },
    /// The bot lacks permission for the side effect.
    Forbidden {
        /// Gateway-supplied detail.
        reason: String,
    },
}
