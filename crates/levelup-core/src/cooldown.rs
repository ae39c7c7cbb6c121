//! Per-member XP cooldown windows.
//!
//! The [`RateLimiter`] remembers, for each `(guild, member)` pair, when the
//! member last earned XP from activity. An event qualifies once
//! `now - window_start >= cooldown`; qualifying events move the window
//! start to `now`. Windows are in memory only and are seeded from each
//! member's persisted `last_award_at` at startup.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use levelup_types::{GuildId, MemberId};

type WindowKey = (GuildId, MemberId);

/// Cooldown gate for XP-qualifying activity.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<WindowKey, DateTime<Utc>>>,
}

impl RateLimiter {
    /// Create a limiter with no open windows.
    pub fn new() -> Self {
        Self::default()
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<WindowKey, DateTime<Utc>>> {
        // The map holds plain timestamps; a panic elsewhere cannot leave it
        // half-updated, so a poisoned lock is still usable.
        self.windows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Decide whether an event at `now` qualifies and, if so, open a new window.
    ///
    /// A cooldown of zero lets every event through. An event older than the
    /// current window start (delivered out of order) never qualifies.
    pub fn allow(
        &self,
        guild_id: GuildId,
        member_id: MemberId,
        cooldown_seconds: u64,
        now: DateTime<Utc>,
    ) -> bool {
        let mut windows = self.windows();
        let key = (guild_id, member_id);

        let allowed = match windows.get(&key) {
            None => true,
            Some(_) if cooldown_seconds == 0 => true,
            Some(&start) if now < start => false,
            Some(&start) => now.signed_duration_since(start) >= cooldown(cooldown_seconds),
        };

        if allowed {
            let start = windows.get(&key).map_or(now, |&start| start.max(now));
            windows.insert(key, start);
        }
        allowed
    }

    /// Restore a window start, e.g. from persisted progress.
    ///
    /// Keeps whichever of the existing and the given start is later.
    pub fn seed(&self, guild_id: GuildId, member_id: MemberId, window_start: DateTime<Utc>) {
        self.windows()
            .entry((guild_id, member_id))
            .and_modify(|start| *start = (*start).max(window_start))
            .or_insert(window_start);
    }

    /// Drop a member's window so their next event qualifies immediately.
    pub fn forget(&self, guild_id: GuildId, member_id: MemberId) {
        self.windows().remove(&(guild_id, member_id));
    }

    /// Drop every window in a guild.
    pub fn forget_guild(&self, guild_id: GuildId) {
        self.windows().retain(|(guild, _), _| *guild != guild_id);
    }

    /// Number of open windows.
    pub fn len(&self) -> usize {
        self.windows().len()
    }

    /// Whether no windows are open.
    pub fn is_empty(&self) -> bool {
        self.windows().is_empty()
    }
}

fn cooldown(seconds: u64) -> TimeDelta {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}
