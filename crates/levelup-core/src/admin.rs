//! Slash-command parsing and validation.
//!
//! The gateway forwards commands with loosely-typed arguments. [`Command::parse`]
//! resolves the name, enforces the administrator flag the gateway computed,
//! and validates every argument before anything touches state. Rejections
//! are [`CommandError`]s.
//!
//! Arguments may arrive as JSON numbers or strings. Snowflake arguments also
//! accept mention syntax (`<@123>`, `<@!123>`, `<#123>`, `<@&123>`).

use std::collections::BTreeMap;

use levelup_types::{
    ChannelId, CommandInvocation, CommandSummary, MemberId, RoleId, RoleRewardPolicy, XpReward,
};
use serde_json::Value;

use crate::error::CommandError;

/// Rows shown by `top` when no limit is given.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// Largest accepted `top` limit.
pub const MAX_LEADERBOARD_LIMIT: usize = 25;

/// Longest accepted card theme name.
const MAX_THEME_LEN: usize = 32;

/// Name, description and admin flag of every command, in help order.
const COMMANDS: &[(&str, &str, bool)] = &[
    ("rank", "Show your level and XP, or another member's", false),
    ("xp", "Check another member's XP", false),
    ("top", "Show the top members by XP", false),
    ("daily", "Claim your daily XP bonus", false),
    ("help", "Show this command list", false),
    ("enable-leveling", "Enable leveling", true),
    ("disable-leveling", "Disable leveling", true),
    ("set-level-channel", "Set or clear the level-up announcement channel", true),
    ("set-level-role", "Grant a role at a level", true),
    ("remove-level-role", "Stop granting a role at a level", true),
    ("set-xp-rate", "Set XP per message (fixed amount or min and max)", true),
    ("set-cooldown", "Set seconds between XP gains", true),
    ("set-dm-fallback", "Announce level-ups by direct message when no channel is set", true),
    ("set-role-policy", "Grant only the reached level's role (exact) or every skipped one (backfill)", true),
    ("set-daily-bonus", "Set the XP granted by the daily claim", true),
    ("set-card", "Set rank card color, background image and theme", true),
    ("reset-xp", "Reset a member's XP", true),
    ("set-xp", "Set a member's XP", true),
    ("bonus-xp", "Grant a member extra XP", true),
    ("reset-server", "Reset every member's XP in this server", true),
    ("reset-all", "Delete this server's configuration and XP", true),
];

/// The command listing shown by `help`.
pub fn command_summaries() -> Vec<CommandSummary> {
    COMMANDS
        .iter()
        .map(|&(name, description, admin_only)| CommandSummary {
            name: name.to_owned(),
            description: description.to_owned(),
            admin_only,
        })
        .collect()
}

fn is_admin_only(name: &str) -> Option<bool> {
    COMMANDS
        .iter()
        .find(|&&(candidate, _, _)| candidate == name)
        .map(|&(_, _, admin_only)| admin_only)
}

/// A validated command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Available to every member.
    Query(QueryCommand),
    /// Requires administrator permission (already checked).
    Admin(AdminCommand),
}

/// Commands any member may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCommand {
    /// Rank card of a member (the invoker when no user is given).
    Rank {
        /// Member to look up.
        member_id: MemberId,
    },
    /// XP and level of a member.
    Xp {
        /// Member to look up.
        member_id: MemberId,
    },
    /// The guild leaderboard.
    Top {
        /// Rows to show, within `1..=MAX_LEADERBOARD_LIMIT`.
        limit: usize,
    },
    /// Claim the daily bonus.
    Daily,
    /// The command listing.
    Help,
}

/// Administrator-only commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// Turn leveling on.
    EnableLeveling,
    /// Turn leveling off.
    DisableLeveling,
    /// Set or clear the announcement channel.
    SetLevelChannel(Option<ChannelId>),
    /// Map a level to a reward role.
    SetLevelRole {
        /// Level that grants the role.
        level: u32,
        /// Role to grant.
        role_id: RoleId,
    },
    /// Remove the role mapped to a level.
    RemoveLevelRole {
        /// Level to unmap.
        level: u32,
    },
    /// Change the per-message XP reward.
    SetXpRate(XpReward),
    /// Change the cooldown between XP gains.
    SetCooldown(u64),
    /// Toggle direct-message announcements.
    SetDmFallback(bool),
    /// Change how skipped-level roles are granted.
    SetRolePolicy(RoleRewardPolicy),
    /// Change the daily bonus amount.
    SetDailyBonus(u64),
    /// Change rank card cosmetics. `None` leaves a field unchanged.
    SetCard {
        /// New embed color, `#RRGGBB`.
        embed_color: Option<String>,
        /// New background image; `Some(None)` clears it.
        background_image_url: Option<Option<String>>,
        /// New theme name.
        card_theme: Option<String>,
    },
    /// Reset one member's XP to zero.
    ResetXp {
        /// Member to reset.
        member_id: MemberId,
    },
    /// Replace one member's XP.
    SetXp {
        /// Member to change.
        member_id: MemberId,
        /// New XP total.
        xp: u64,
    },
    /// Add XP to one member.
    BonusXp {
        /// Member to change.
        member_id: MemberId,
        /// XP to add.
        amount: u64,
    },
    /// Clear every member's progress, keeping configuration.
    ResetServer,
    /// Delete configuration and progress.
    ResetAll,
}

impl Command {
    /// Resolve, authorize and validate an invocation.
    pub fn parse(invocation: &CommandInvocation) -> Result<Self, CommandError> {
        let name = invocation.name.trim().to_ascii_lowercase().replace('_', "-");
        let args = Args(&invocation.args);

        let admin_only =
            is_admin_only(&name).ok_or_else(|| CommandError::UnknownCommand(name.clone()))?;
        if admin_only && !invocation.is_admin {
            return Err(CommandError::PermissionDenied { command: name });
        }

        let query = match name.as_str() {
            "rank" => QueryCommand::Rank {
                member_id: args
                    .snowflake_opt("user")?
                    .map_or(invocation.invoker_id, MemberId),
            },
            "xp" => QueryCommand::Xp {
                member_id: MemberId(args.snowflake("user")?),
            },
            "top" => QueryCommand::Top {
                limit: leaderboard_limit(args.u64_opt("limit")?),
            },
            "daily" => QueryCommand::Daily,
            "help" => QueryCommand::Help,
            _ => return AdminCommand::parse(&name, &args).map(Self::Admin),
        };
        Ok(Self::Query(query))
    }
}

impl AdminCommand {
    fn parse(name: &str, args: &Args<'_>) -> Result<Self, CommandError> {
        Ok(match name {
            "enable-leveling" => Self::EnableLeveling,
            "disable-leveling" => Self::DisableLeveling,
            "set-level-channel" => Self::SetLevelChannel(args.snowflake_opt("channel")?.map(ChannelId)),
            "set-level-role" => Self::SetLevelRole {
                level: reward_level(args.u64("level")?)?,
                role_id: RoleId(args.snowflake("role")?),
            },
            "remove-level-role" => Self::RemoveLevelRole {
                level: reward_level(args.u64("level")?)?,
            },
            "set-xp-rate" => Self::SetXpRate(xp_rate(args)?),
            "set-cooldown" => Self::SetCooldown(args.u64("seconds")?),
            "set-dm-fallback" => Self::SetDmFallback(args.bool("enabled")?),
            "set-role-policy" => Self::SetRolePolicy(role_policy(&args.string("policy")?)?),
            "set-daily-bonus" => Self::SetDailyBonus(args.u64("amount")?),
            "set-card" => card(args)?,
            "reset-xp" => Self::ResetXp {
                member_id: MemberId(args.snowflake("user")?),
            },
            "set-xp" => Self::SetXp {
                member_id: MemberId(args.snowflake("user")?),
                xp: args.u64("amount")?,
            },
            "bonus-xp" => Self::BonusXp {
                member_id: MemberId(args.snowflake("user")?),
                amount: args.u64("amount")?,
            },
            "reset-server" => Self::ResetServer,
            "reset-all" => Self::ResetAll,
            other => return Err(CommandError::UnknownCommand(other.to_owned())),
        })
    }

    /// Command name, as reported back in configuration replies.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EnableLeveling => "enable-leveling",
            Self::DisableLeveling => "disable-leveling",
            Self::SetLevelChannel(_) => "set-level-channel",
            Self::SetLevelRole { .. } => "set-level-role",
            Self::RemoveLevelRole { .. } => "remove-level-role",
            Self::SetXpRate(_) => "set-xp-rate",
            Self::SetCooldown(_) => "set-cooldown",
            Self::SetDmFallback(_) => "set-dm-fallback",
            Self::SetRolePolicy(_) => "set-role-policy",
            Self::SetDailyBonus(_) => "set-daily-bonus",
            Self::SetCard { .. } => "set-card",
            Self::ResetXp { .. } => "reset-xp",
            Self::SetXp { .. } => "set-xp",
            Self::BonusXp { .. } => "bonus-xp",
            Self::ResetServer => "reset-server",
            Self::ResetAll => "reset-all",
        }
    }
}

fn leaderboard_limit(requested: Option<u64>) -> usize {
    requested
        .map_or(DEFAULT_LEADERBOARD_LIMIT, |limit| {
            usize::try_from(limit).unwrap_or(MAX_LEADERBOARD_LIMIT)
        })
        .clamp(1, MAX_LEADERBOARD_LIMIT)
}

fn reward_level(level: u64) -> Result<u32, CommandError> {
    match u32::try_from(level) {
        Ok(level) if level > 0 => Ok(level),
        _ => Err(CommandError::invalid("level", format!("{level} is not a level above zero"))),
    }
}

fn xp_rate(args: &Args<'_>) -> Result<XpReward, CommandError> {
    let amount = args.u64_opt("amount")?;
    let min = args.u64_opt("min")?;
    let max = args.u64_opt("max")?;
    match (amount, min, max) {
        (Some(amount), None, None) => Ok(XpReward::Fixed(amount)),
        (None, Some(min), Some(max)) if min <= max => Ok(XpReward::Range(min, max)),
        (None, Some(min), Some(max)) => Err(CommandError::invalid(
            "min",
            format!("minimum {min} is greater than maximum {max}"),
        )),
        (None, None, None) => Err(CommandError::MissingArgument("amount")),
        _ => Err(CommandError::invalid(
            "amount",
            "give either `amount` or both `min` and `max`",
        )),
    }
}

fn role_policy(value: &str) -> Result<RoleRewardPolicy, CommandError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "exact" => Ok(RoleRewardPolicy::Exact),
        "backfill" => Ok(RoleRewardPolicy::Backfill),
        other => Err(CommandError::invalid(
            "policy",
            format!("`{other}` is not `exact` or `backfill`"),
        )),
    }
}

fn card(args: &Args<'_>) -> Result<AdminCommand, CommandError> {
    let embed_color = args
        .string_opt("color")?
        .map(|color| parse_color(&color))
        .transpose()?;
    let background_image_url = args
        .string_opt("background")?
        .map(|url| parse_background(&url))
        .transpose()?;
    let card_theme = args
        .string_opt("theme")?
        .map(|theme| parse_theme(&theme))
        .transpose()?;

    if embed_color.is_none() && background_image_url.is_none() && card_theme.is_none() {
        return Err(CommandError::MissingArgument("color"));
    }
    Ok(AdminCommand::SetCard {
        embed_color,
        background_image_url,
        card_theme,
    })
}

/// Validate a `#RRGGBB` color and normalize it to upper case.
pub fn parse_color(value: &str) -> Result<String, CommandError> {
    let value = value.trim();
    let valid = value
        .strip_prefix('#')
        .is_some_and(|hex| hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()));
    if valid {
        Ok(value.to_ascii_uppercase())
    } else {
        Err(CommandError::invalid(
            "color",
            format!("`{value}` is not a #RRGGBB color"),
        ))
    }
}

/// Validate a background image URL. `none` or an empty value clears it.
fn parse_background(value: &str) -> Result<Option<String>, CommandError> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    if value.starts_with("https://") || value.starts_with("http://") {
        Ok(Some(value.to_owned()))
    } else {
        Err(CommandError::invalid(
            "background",
            "background must be an http(s) URL or `none`",
        ))
    }
}

fn parse_theme(value: &str) -> Result<String, CommandError> {
    let value = value.trim();
    if value.is_empty() || value.len() > MAX_THEME_LEN {
        return Err(CommandError::invalid(
            "theme",
            format!("theme must be 1 to {MAX_THEME_LEN} characters"),
        ));
    }
    Ok(value.to_owned())
}

// ---------------------------------------------------------------------------
// Argument access
// ---------------------------------------------------------------------------

/// Typed access to the loosely-typed argument map.
struct Args<'a>(&'a BTreeMap<String, Value>);

impl Args<'_> {
    /// An argument, treating JSON `null` as absent.
    fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|value| !value.is_null())
    }

    fn u64_opt(&self, name: &'static str) -> Result<Option<u64>, CommandError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => text.trim().parse::<u64>().ok(),
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| CommandError::invalid(name, format!("{value} is not a non-negative integer")))
    }

    fn u64(&self, name: &'static str) -> Result<u64, CommandError> {
        self.u64_opt(name)?
            .ok_or(CommandError::MissingArgument(name))
    }

    fn snowflake_opt(&self, name: &'static str) -> Result<Option<u64>, CommandError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let parsed = match value {
            Value::Number(number) => number.as_u64(),
            Value::String(text) => parse_mention(text),
            _ => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| CommandError::invalid(name, format!("{value} is not a valid id or mention")))
    }

    fn snowflake(&self, name: &'static str) -> Result<u64, CommandError> {
        self.snowflake_opt(name)?
            .ok_or(CommandError::MissingArgument(name))
    }

    fn bool(&self, name: &'static str) -> Result<bool, CommandError> {
        let value = self.get(name).ok_or(CommandError::MissingArgument(name))?;
        let parsed = match value {
            Value::Bool(flag) => Some(*flag),
            Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "enable" | "enabled" => Some(true),
                "false" | "off" | "no" | "disable" | "disabled" => Some(false),
                _ => None,
            },
            _ => None,
        };
        parsed.ok_or_else(|| CommandError::invalid(name, format!("{value} is not true or false")))
    }

    fn string_opt(&self, name: &'static str) -> Result<Option<String>, CommandError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.clone())),
            Some(other) => Err(CommandError::invalid(name, format!("{other} is not text"))),
        }
    }

    fn string(&self, name: &'static str) -> Result<String, CommandError> {
        self.string_opt(name)?
            .ok_or(CommandError::MissingArgument(name))
    }
}

/// Parse a bare id or a mention such as `<@!123>`.
fn parse_mention(text: &str) -> Option<u64> {
    let text = text.trim();
    let inner = text
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
        .map_or(text, |inner| {
            inner.trim_start_matches(['@', '#', '!', '&'])
        });
    inner.parse().ok()
}
