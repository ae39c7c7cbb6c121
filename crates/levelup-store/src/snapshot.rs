//! On-disk layout of the progress store.
//!
//! The whole state is one JSON document with two top-level mappings:
//!
//! ```text
//! {
//!   "version": 1,
//!   "config_by_guild":   { "<guild>": GuildConfig, ... },
//!   "progress_by_guild": { "<guild>": { "<member>": MemberProgress, ... }, ... }
//! }
//! ```
//!
//! Snowflake map keys are written as decimal strings, as JSON requires.

use std::collections::BTreeMap;

use levelup_types::{GuildConfig, GuildId, MemberId, MemberProgress};
use serde::{Deserialize, Serialize};

/// Format version written by this build.
pub const STORE_FORMAT_VERSION: u32 = 1;

/// Members of one guild keyed by member id.
pub type GuildMembers = BTreeMap<MemberId, MemberProgress>;

/// The complete persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Format version for compatibility checking.
    pub version: u32,
    /// Configuration of every guild that has been referenced.
    #[serde(default)]
    pub config_by_guild: BTreeMap<GuildId, GuildConfig>,
    /// Progress of every member, partitioned by guild.
    #[serde(default)]
    pub progress_by_guild: BTreeMap<GuildId, GuildMembers>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STORE_FORMAT_VERSION,
            config_by_guild: BTreeMap::new(),
            progress_by_guild: BTreeMap::new(),
        }
    }
}

impl PersistedState {
    /// Total number of member records across all guilds.
    pub fn member_count(&self) -> usize {
        self.progress_by_guild.values().map(BTreeMap::len).sum()
    }

    /// Number of guilds with either configuration or progress.
    pub fn guild_count(&self) -> usize {
        let progress_only = self
            .progress_by_guild
            .keys()
            .filter(|guild_id| !self.config_by_guild.contains_key(guild_id))
            .count();
        self.config_by_guild.len().saturating_add(progress_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guild_keys_serialize_as_strings() {
        let mut state = PersistedState::default();
        state
            .config_by_guild
            .insert(GuildId(77), GuildConfig::default());
        let json = serde_json::to_string(&state).unwrap_or_default();
        assert!(json.contains(r#""77":"#), "unexpected layout: {json}");
    }

    #[test]
    fn counts_span_both_mappings() {
        let mut state = PersistedState::default();
        state.config_by_guild.insert(GuildId(1), GuildConfig::default());
        let mut members = GuildMembers::new();
        members.insert(MemberId(10), MemberProgress::new(0));
        members.insert(MemberId(11), MemberProgress::new(0));
        state.progress_by_guild.insert(GuildId(1), members.clone());
        state.progress_by_guild.insert(GuildId(2), members);

        assert_eq!(state.guild_count(), 2);
        assert_eq!(state.member_count(), 4);
    }

    #[test]
    fn guild_count_includes_config_only_guilds() {
        let mut state = PersistedState::default();
        state.config_by_guild.insert(GuildId(1), GuildConfig::default());
        state.config_by_guild.insert(GuildId(3), GuildConfig::default());
        state.progress_by_guild.insert(GuildId(1), GuildMembers::new());
        state.progress_by_guild.insert(GuildId(2), GuildMembers::new());

        assert_eq!(state.guild_count(), 3);
        assert_eq!(PersistedState::default().guild_count(), 0);
    }
}
