//! Read-only queries: rank cards and leaderboards.
//!
//! Queries take a consistent per-guild view through
//! [`ProgressStore::read_guild`] and never mutate state.

use std::cmp::Ordering;
use std::sync::Arc;

use levelup_store::{GuildMembers, ProgressStore};
use levelup_types::{GuildId, LeaderboardEntry, MemberId, MemberProgress, RankCard};

use crate::curve::LevelCurve;
use crate::error::EngineError;

/// Rank and leaderboard lookups over the progress store.
#[derive(Debug, Clone)]
pub struct QueryLayer {
    store: Arc<ProgressStore>,
    curve: Arc<dyn LevelCurve>,
}

impl QueryLayer {
    /// Create a query layer over `store` using `curve` for progress bars.
    pub fn new(store: Arc<ProgressStore>, curve: Arc<dyn LevelCurve>) -> Self {
        Self { store, curve }
    }

    /// A member's rank card.
    ///
    /// Fails with [`EngineError::MemberNotFound`] if the member never earned XP.
    pub async fn rank(&self, guild_id: GuildId, member_id: MemberId) -> Result<RankCard, EngineError> {
        let curve = Arc::clone(&self.curve);
        self.store
            .read_guild(guild_id, |config, members| {
                let progress = members
                    .get(&member_id)
                    .ok_or(EngineError::MemberNotFound {
                        guild_id,
                        member_id,
                    })?;
                let level_floor_xp = curve.xp_threshold_for(progress.level);
                let next_level_xp = curve.xp_threshold_for(progress.level.saturating_add(1));
                Ok(RankCard {
                    guild_id,
                    member_id,
                    xp: progress.xp,
                    level: progress.level,
                    level_floor_xp,
                    next_level_xp,
                    progress_percent: progress_percent(progress.xp, level_floor_xp, next_level_xp),
                    position: position_of(members, member_id, progress),
                    cosmetic: config.cosmetic.clone(),
                })
            })
            .await
    }

    /// A member's raw progress.
    pub async fn member_progress(
        &self,
        guild_id: GuildId,
        member_id: MemberId,
    ) -> Result<MemberProgress, EngineError> {
        self.store
            .member(guild_id, member_id)
            .await
            .ok_or(EngineError::MemberNotFound {
                guild_id,
                member_id,
            })
    }

    /// The top `limit` members by XP, ties broken by ascending member id.
    pub async fn leaderboard(&self, guild_id: GuildId, limit: usize) -> Vec<LeaderboardEntry> {
        self.store
            .read_guild(guild_id, |_, members| {
                let mut ranked: Vec<(&MemberId, &MemberProgress)> = members.iter().collect();
                ranked.sort_by(|a, b| leaderboard_order((*a.0, a.1), (*b.0, b.1)));
                ranked
                    .into_iter()
                    .take(limit)
                    .zip(1_u32..)
                    .map(|((&member_id, progress), position)| LeaderboardEntry {
                        position,
                        member_id,
                        xp: progress.xp,
                        level: progress.level,
                    })
                    .collect()
            })
            .await
    }
}

/// Leaderboard ordering: XP descending, then member id ascending.
fn leaderboard_order(a: (MemberId, &MemberProgress), b: (MemberId, &MemberProgress)) -> Ordering {
    b.1.xp.cmp(&a.1.xp).then_with(|| a.0.cmp(&b.0))
}

/// 1-based leaderboard position of `member_id`.
fn position_of(members: &GuildMembers, member_id: MemberId, progress: &MemberProgress) -> u32 {
    let ahead = members
        .iter()
        .filter(|&(&other_id, other)| {
            leaderboard_order((other_id, other), (member_id, progress)) == Ordering::Less
        })
        .count();
    u32::try_from(ahead)
        .unwrap_or(u32::MAX)
        .saturating_add(1)
}

/// Percentage of the way from `floor` to `next`, clamped to `0..=100`.
///
/// Equal thresholds (a capped curve) count as complete.
pub fn progress_percent(xp: u64, floor: u64, next: u64) -> u8 {
    let Some(span) = next.checked_sub(floor).filter(|&span| span > 0) else {
        return 100;
    };
    let into_level = u128::from(xp.saturating_sub(floor));
    let percent = into_level
        .saturating_mul(100)
        .checked_div(u128::from(span))
        .unwrap_or(100)
        .min(100);
    u8::try_from(percent).unwrap_or(100)
}
