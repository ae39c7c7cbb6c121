//! Pure XP transitions.
//!
//! Everything here is side-effect free: applying an XP change to a
//! [`MemberProgress`], deciding whether it produced a level-up, and rolling
//! a ranged reward. The engine runs these inside a store mutation and
//! performs reward dispatch afterwards.

use levelup_types::{
    GuildConfig, GuildId, LevelUpCause, LevelUpEvent, MemberId, MemberProgress, XpReward,
};
use rand::Rng;

use crate::curve::LevelCurve;

/// An XP mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XpChange {
    /// Add XP (saturating at `u64::MAX`).
    Add(u64),
    /// Replace XP with an absolute value.
    Set(u64),
}

/// Before and after of one XP mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// XP before the change.
    pub old_xp: u64,
    /// XP after the change.
    pub new_xp: u64,
    /// Level before the change.
    pub old_level: u32,
    /// Level after the change.
    pub new_level: u32,
}

impl Transition {
    /// Whether the level increased.
    pub const fn leveled_up(&self) -> bool {
        self.new_level > self.old_level
    }

    /// XP actually gained (zero for decreases).
    pub const fn xp_gained(&self) -> u64 {
        self.new_xp.saturating_sub(self.old_xp)
    }
}

/// Apply `change` and recompute the level, keeping `level == level_for(xp)`.
pub fn apply_xp_change(
    progress: &mut MemberProgress,
    change: XpChange,
    curve: &dyn LevelCurve,
) -> Transition {
    let old_xp = progress.xp;
    let old_level = progress.level;

    progress.xp = match change {
        XpChange::Add(amount) => old_xp.saturating_add(amount),
        XpChange::Set(xp) => xp,
    };
    progress.level = curve.level_for(progress.xp);

    Transition {
        old_xp,
        new_xp: progress.xp,
        old_level,
        new_level: progress.level,
    }
}

/// Build the level-up event for a transition, if the level increased.
///
/// A jump across several levels yields a single event carrying the final
/// level; the role rewards follow the guild's role-reward policy.
pub fn level_up_event(
    guild_id: GuildId,
    member_id: MemberId,
    transition: &Transition,
    cause: LevelUpCause,
    config: &GuildConfig,
) -> Option<LevelUpEvent> {
    if !transition.leveled_up() {
        return None;
    }
    Some(LevelUpEvent {
        guild_id,
        member_id,
        old_level: transition.old_level,
        new_level: transition.new_level,
        xp: transition.new_xp,
        cause,
        role_rewards: config.roles_for_level_up(transition.old_level, transition.new_level),
    })
}

/// Roll the XP granted by one qualifying event.
pub fn roll_reward(reward: XpReward, rng: &mut impl Rng) -> u64 {
    match reward {
        XpReward::Fixed(amount) => amount,
        XpReward::Range(min, max) if min >= max => min,
        XpReward::Range(min, max) => rng.random_range(min..=max),
    }
}

#[cfg(test)]
mod tests {
    use levelup_types::{ChannelId, RoleId, RoleRewardPolicy};
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::curve::{SqrtCurve, TableCurve};

    #[test]
    fn add_recomputes_level() {
        let curve = SqrtCurve::default();
        let mut progress = MemberProgress::new(0);
        let transition = apply_xp_change(&mut progress, XpChange::Add(450), &curve);

        assert_eq!(progress.xp, 450);
        assert_eq!(progress.level, 2);
        assert!(transition.leveled_up());
        assert_eq!(transition.xp_gained(), 450);
    }

    #[test]
    fn set_can_lower_level_without_level_up() {
        let curve = SqrtCurve::default();
        let mut progress = MemberProgress::new(0);
        apply_xp_change(&mut progress, XpChange::Set(2_500), &curve);
        let transition = apply_xp_change(&mut progress, XpChange::Set(150), &curve);

        assert_eq!(progress.level, 1);
        assert!(!transition.leveled_up());
        assert_eq!(transition.xp_gained(), 0);
    }

    #[test]
    fn add_saturates() {
        let curve = SqrtCurve::default();
        let mut progress = MemberProgress::new(0);
        progress.xp = u64::MAX.saturating_sub(1);
        apply_xp_change(&mut progress, XpChange::Add(10), &curve);
        assert_eq!(progress.xp, u64::MAX);
    }

    #[test]
    fn multi_level_jump_builds_one_event() {
        let Ok(curve) = TableCurve::new(vec![50, 150, 300, 500]) else {
            return;
        };
        let mut config = GuildConfig::default();
        config.level_role_map.insert(2, RoleId(20));
        config.level_role_map.insert(4, RoleId(40));

        let mut progress = MemberProgress::new(0);
        let transition = apply_xp_change(&mut progress, XpChange::Set(600), &curve);
        let cause = LevelUpCause::Activity {
            channel_id: ChannelId(5),
        };

        let event = level_up_event(GuildId(1), MemberId(2), &transition, cause, &config);
        assert_eq!(event.as_ref().map(|e| e.new_level), Some(4));
        assert_eq!(event.map(|e| e.role_rewards), Some(vec![RoleId(40)]));

        config.role_reward_policy = RoleRewardPolicy::Backfill;
        let event = level_up_event(GuildId(1), MemberId(2), &transition, cause, &config);
        assert_eq!(
            event.map(|e| e.role_rewards),
            Some(vec![RoleId(20), RoleId(40)])
        );
    }

    #[test]
    fn no_event_without_level_increase() {
        let curve = SqrtCurve::default();
        let mut progress = MemberProgress::new(0);
        let transition = apply_xp_change(&mut progress, XpChange::Add(10), &curve);
        let event = level_up_event(
            GuildId(1),
            MemberId(2),
            &transition,
            LevelUpCause::Administrative,
            &GuildConfig::default(),
        );
        assert!(event.is_none());
    }

    #[test]
    fn ranged_rewards_stay_in_bounds() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let amount = roll_reward(XpReward::Range(15, 25), &mut rng);
            assert!((15..=25).contains(&amount));
        }
        assert_eq!(roll_reward(XpReward::Fixed(10), &mut rng), 10);
        assert_eq!(roll_reward(XpReward::Range(8, 8), &mut rng), 8);
    }

    /// Random sequences of adds and sets keep `level == level_for(xp)` and
    /// flag a level-up exactly when the level rises.
    #[test]
    fn level_tracks_xp_under_random_changes() {
        let curve = SqrtCurve::default();
        let mut rng = SmallRng::seed_from_u64(0x1e7e1);
        let mut progress = MemberProgress::new(0);

        for _ in 0..5_000 {
            let change = if rng.random_bool(0.1) {
                XpChange::Set(rng.random_range(0..50_000))
            } else {
                XpChange::Add(rng.random_range(0..300))
            };
            let before = progress.level;
            let transition = apply_xp_change(&mut progress, change, &curve);

            assert_eq!(progress.level, curve.level_for(progress.xp));
            assert_eq!(transition.leveled_up(), progress.level > before);
        }
    }
}
