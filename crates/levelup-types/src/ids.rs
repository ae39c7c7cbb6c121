//! Type-safe identifier wrappers around chat-platform snowflakes.
//!
//! Guilds, members, channels and roles are all identified by 64-bit
//! snowflakes on the chat platform. Wrapping each one in its own newtype
//! keeps a member id from ever being used where a guild id is expected,
//! which matters for cooldown and progress maps keyed by both.
//!
//! Snowflakes serialize as plain JSON numbers. [`FromStr`] is implemented so
//! NATS subjects and slash-command arguments can carry them as text.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Generates a newtype wrapper around a `u64` snowflake with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub u64);

        impl $name {
            /// Wrap a raw snowflake value.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Return the inner snowflake value.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = core::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<u64>().map(Self)
            }
        }
    };
}

define_id! {
    /// Identifier of a guild (an isolated community; all state is partitioned by it).
    GuildId
}

define_id! {
    /// Identifier of a guild member (a user, scoped by the guild it acts in).
    MemberId
}

define_id! {
    /// Identifier of a text channel.
    ChannelId
}

define_id! {
    /// Identifier of a role that can be granted as a level reward.
    RoleId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_parses_from_string() {
        let parsed: Result<MemberId, _> = "1234567890123".parse();
        assert_eq!(parsed.ok(), Some(MemberId(1_234_567_890_123)));
    }

    #[test]
    fn id_rejects_garbage() {
        let parsed: Result<GuildId, _> = "not-a-snowflake".parse();
        assert!(parsed.is_err());
    }

    #[test]
    fn id_serializes_as_number() {
        let json = serde_json::to_string(&RoleId(42)).ok();
        assert_eq!(json.as_deref(), Some("42"));
    }

    #[test]
    fn id_display_matches_raw() {
        let id = ChannelId::new(987);
        assert_eq!(id.to_string(), "987");
        assert_eq!(id.get(), 987);
    }
}
