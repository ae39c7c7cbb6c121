//! Error types for the levelup-core crate.
//!
//! [`CommandError`] covers everything rejected at the command boundary
//! before any state changes. [`EngineError`] is what engine and query
//! operations return.

use levelup_types::{GuildId, MemberId};

/// A slash command was rejected before it ran.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// No command with this name exists.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The command is administrator-only and the invoker is not an administrator.
    #[error("command `{command}` requires administrator permission")]
    PermissionDenied {
        /// Name of the refused command.
        command: String,
    },

    /// A required argument was not supplied.
    #[error("missing argument `{0}`")]
    MissingArgument(&'static str),

    /// An argument or configuration value failed validation.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidConfigValue {
        /// Argument or setting that was rejected.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl CommandError {
    /// Shorthand for [`CommandError::InvalidConfigValue`].
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors returned by engine and query operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The member has no recorded progress in the guild.
    #[error("member {member_id} has no progress in guild {guild_id}")]
    MemberNotFound {
        /// Guild that was searched.
        guild_id: GuildId,
        /// Member that was looked up.
        member_id: MemberId,
    },

    /// The command was rejected at the boundary.
    #[error(transparent)]
    Command(#[from] CommandError),
}
