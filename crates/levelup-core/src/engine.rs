//! The progression engine.
//!
//! Turns activity events and administrative commands into progress
//! mutations, detects level-ups, and hands them to the reward dispatcher.
//!
//! # Event Flow
//!
//! ```text
//! ActivityEvent
//!   -> guild enabled?            no  -> Skipped(Disabled)
//!   -> RateLimiter::allow?       no  -> Skipped(CoolingDown)
//!   -> xp += reward, level = curve.level_for(xp)   (one store mutation)
//!   -> level increased?          no  -> Awarded
//!   -> deliver(LevelUpEvent)             -> Awarded { level_up, warnings }
//! ```
//!
//! Every XP mutation (organic or administrative) runs inside a single
//! [`ProgressStore::mutate_guild`] call, so XP and level are never persisted
//! out of sync and two updates to the same member never interleave. Reward
//! delivery happens after the mutation is committed; its failures become
//! warnings and never roll the mutation back.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use levelup_store::ProgressStore;
use levelup_types::{
    ActivityEvent, ActivityOutcome, ChannelId, CommandInvocation, CommandReply, CommandResponse,
    GuildConfig, GuildId, LevelUpCause, LevelUpEvent, MemberId, MemberProgress, RewardWarning,
    SkipReason,
};
use tracing::{debug, info};

use crate::admin::{AdminCommand, Command, QueryCommand, command_summaries};
use crate::config::LevelingConfig;
use crate::cooldown::RateLimiter;
use crate::curve::LevelCurve;
use crate::dispatch::{RewardDispatcher, deliver};
use crate::error::EngineError;
use crate::query::QueryLayer;
use crate::transition::{XpChange, apply_xp_change, level_up_event, roll_reward};

/// Engine behavior that is not per-guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Minimum time between two daily bonus claims.
    pub daily_cooldown: TimeDelta,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            daily_cooldown: TimeDelta::hours(24),
        }
    }
}

impl EngineOptions {
    /// Options taken from the `leveling` config section.
    pub fn from_config(leveling: &LevelingConfig) -> Self {
        let daily_cooldown = i64::try_from(leveling.daily_cooldown_hours)
            .ok()
            .and_then(TimeDelta::try_hours)
            .unwrap_or(TimeDelta::MAX);
        Self { daily_cooldown }
    }
}

/// Result of an XP change made outside the activity path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpAdjustment {
    /// Progress after the change.
    pub progress: MemberProgress,
    /// Present when the change raised the level.
    pub level_up: Option<LevelUpEvent>,
    /// Reward side effects that failed.
    pub warnings: Vec<RewardWarning>,
}

/// Result of a daily bonus claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DailyClaim {
    /// The bonus was granted.
    Claimed {
        /// XP granted.
        xp_awarded: u64,
        /// Progress, level-up and warnings from the grant.
        adjustment: XpAdjustment,
    },
    /// The bonus was already claimed within the daily window.
    OnCooldown {
        /// Seconds until the next claim is possible.
        retry_after_secs: u64,
    },
    /// Leveling is disabled in the guild.
    Disabled,
}

/// A committed XP mutation that may still need reward delivery.
struct Committed {
    progress: MemberProgress,
    level_up: Option<(LevelUpEvent, GuildConfig)>,
}

enum DailyRefusal {
    Disabled,
    OnCooldown(u64),
}

/// Consumes activity and commands; owns the cooldown gate.
#[derive(Debug)]
pub struct ProgressionEngine<D> {
    store: Arc<ProgressStore>,
    curve: Arc<dyn LevelCurve>,
    limiter: RateLimiter,
    dispatcher: D,
    queries: QueryLayer,
    options: EngineOptions,
}

impl<D: RewardDispatcher> ProgressionEngine<D> {
    /// Build an engine over a loaded store.
    ///
    /// Stored levels are reconciled with `curve` (a curve change between
    /// restarts silently corrects levels, emitting no level-up events) and
    /// the cooldown gate is seeded from each member's last award time.
    pub async fn start(
        store: Arc<ProgressStore>,
        curve: Arc<dyn LevelCurve>,
        dispatcher: D,
        options: EngineOptions,
    ) -> Self {
        let engine = Self {
            queries: QueryLayer::new(Arc::clone(&store), Arc::clone(&curve)),
            store,
            curve,
            limiter: RateLimiter::new(),
            dispatcher,
            options,
        };
        let corrected = engine.reconcile_levels().await;
        let seeded = engine.seed_cooldowns().await;
        info!(corrected, seeded, "Progression engine started");
        engine
    }

    /// Read-side queries over the same store and curve.
    pub const fn queries(&self) -> &QueryLayer {
        &self.queries
    }

    /// The underlying store.
    pub const fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    /// The reward dispatcher.
    pub const fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Recompute every stored level. Returns the number of records corrected.
    pub async fn reconcile_levels(&self) -> usize {
        let curve = &*self.curve;
        let drifted = self
            .store
            .snapshot()
            .await
            .progress_by_guild
            .values()
            .flat_map(BTreeMap::values)
            .filter(|progress| progress.level != curve.level_for(progress.xp))
            .count();
        if drifted == 0 {
            return 0;
        }

        let corrected = self
            .store
            .commit(|data| {
                let mut corrected = 0_usize;
                for progress in data.progress_by_guild.values_mut().flat_map(BTreeMap::values_mut) {
                    let level = curve.level_for(progress.xp);
                    if progress.level != level {
                        progress.level = level;
                        corrected = corrected.saturating_add(1);
                    }
                }
                corrected
            })
            .await;
        info!(corrected, "Stored levels reconciled with level curve");
        corrected
    }

    async fn seed_cooldowns(&self) -> usize {
        let snapshot = self.store.snapshot().await;
        let mut seeded = 0_usize;
        for (&guild_id, members) in &snapshot.progress_by_guild {
            for (&member_id, progress) in members {
                if let Some(at) = progress.last_award_at {
                    self.limiter.seed(guild_id, member_id, at);
                    seeded = seeded.saturating_add(1);
                }
            }
        }
        seeded
    }

    // -----------------------------------------------------------------
    // Activity path
    // -----------------------------------------------------------------

    /// Process one activity event.
    pub async fn handle_activity(&self, event: &ActivityEvent) -> ActivityOutcome {
        let guild_id = event.guild_id;
        let member_id = event.member_id;
        let now = event.timestamp;
        let cause = LevelUpCause::Activity {
            channel_id: event.channel_id,
        };
        let curve = &*self.curve;
        let limiter = &self.limiter;

        let result = self
            .store
            .mutate_guild(guild_id, |guild| {
                if !guild.config.enabled {
                    return Err(SkipReason::Disabled);
                }
                if !limiter.allow(guild_id, member_id, guild.config.cooldown_seconds, now) {
                    return Err(SkipReason::CoolingDown);
                }

                let xp_awarded = roll_reward(guild.config.xp_per_event, &mut rand::rng());
                let progress = guild
                    .members
                    .entry(member_id)
                    .or_insert_with(|| MemberProgress::new(curve.level_for(0)));
                let transition = apply_xp_change(progress, XpChange::Add(xp_awarded), curve);
                progress.last_award_at = Some(now);

                let level_up = level_up_event(guild_id, member_id, &transition, cause, guild.config)
                    .map(|event| (event, guild.config.clone()));
                Ok((
                    xp_awarded,
                    Committed {
                        progress: progress.clone(),
                        level_up,
                    },
                ))
            })
            .await;

        match result {
            Err(reason) => {
                debug!(%guild_id, %member_id, ?reason, "Activity skipped");
                ActivityOutcome::Skipped { reason }
            }
            Ok((xp_awarded, committed)) => {
                debug!(
                    %guild_id,
                    %member_id,
                    xp_awarded,
                    xp = committed.progress.xp,
                    level = committed.progress.level,
                    "XP awarded"
                );
                let xp = committed.progress.xp;
                let level = committed.progress.level;
                let (level_up, warnings) = self.deliver_rewards(committed.level_up).await;
                ActivityOutcome::Awarded {
                    xp_awarded,
                    xp,
                    level,
                    level_up,
                    warnings,
                }
            }
        }
    }

    /// Grant the daily bonus if the member's daily window has elapsed.
    ///
    /// The daily window is independent of the message cooldown.
    pub async fn claim_daily(
        &self,
        guild_id: GuildId,
        member_id: MemberId,
        channel_id: Option<ChannelId>,
        now: DateTime<Utc>,
    ) -> DailyClaim {
        let curve = &*self.curve;
        let window = self.options.daily_cooldown;

        let result = self
            .store
            .mutate_guild(guild_id, |guild| {
                if !guild.config.enabled {
                    return Err(DailyRefusal::Disabled);
                }
                let last_claim = guild
                    .members
                    .get(&member_id)
                    .and_then(|progress| progress.last_daily_claim_at);
                if let Some(remaining) = last_claim.and_then(|last| remaining_window(last, now, window)) {
                    return Err(DailyRefusal::OnCooldown(remaining));
                }

                let xp_awarded = guild.config.daily_bonus_xp;
                let progress = guild
                    .members
                    .entry(member_id)
                    .or_insert_with(|| MemberProgress::new(curve.level_for(0)));
                let transition = apply_xp_change(progress, XpChange::Add(xp_awarded), curve);
                progress.last_daily_claim_at = Some(now);

                let cause = LevelUpCause::DailyBonus { channel_id };
                let level_up = level_up_event(guild_id, member_id, &transition, cause, guild.config)
                    .map(|event| (event, guild.config.clone()));
                Ok((
                    xp_awarded,
                    Committed {
                        progress: progress.clone(),
                        level_up,
                    },
                ))
            })
            .await;

        match result {
            Err(DailyRefusal::Disabled) => DailyClaim::Disabled,
            Err(DailyRefusal::OnCooldown(retry_after_secs)) => {
                debug!(%guild_id, %member_id, retry_after_secs, "Daily bonus on cooldown");
                DailyClaim::OnCooldown { retry_after_secs }
            }
            Ok((xp_awarded, committed)) => {
                info!(%guild_id, %member_id, xp_awarded, "Daily bonus claimed");
                DailyClaim::Claimed {
                    xp_awarded,
                    adjustment: self.finish(committed).await,
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Administrative operations
    // -----------------------------------------------------------------

    /// Replace a member's XP. Creates the member if needed.
    pub async fn set_xp(&self, guild_id: GuildId, member_id: MemberId, xp: u64) -> XpAdjustment {
        info!(%guild_id, %member_id, xp, "Setting member XP");
        self.administrative_change(guild_id, member_id, XpChange::Set(xp))
            .await
    }

    /// Add XP to a member. Creates the member if needed.
    pub async fn bonus_xp(&self, guild_id: GuildId, member_id: MemberId, amount: u64) -> XpAdjustment {
        info!(%guild_id, %member_id, amount, "Granting bonus XP");
        self.administrative_change(guild_id, member_id, XpChange::Add(amount))
            .await
    }

    async fn administrative_change(
        &self,
        guild_id: GuildId,
        member_id: MemberId,
        change: XpChange,
    ) -> XpAdjustment {
        let curve = &*self.curve;
        let result = self
            .store
            .mutate_guild(guild_id, |guild| {
                let progress = guild
                    .members
                    .entry(member_id)
                    .or_insert_with(|| MemberProgress::new(curve.level_for(0)));
                let transition = apply_xp_change(progress, change, curve);
                let level_up = level_up_event(
                    guild_id,
                    member_id,
                    &transition,
                    LevelUpCause::Administrative,
                    guild.config,
                )
                .map(|event| (event, guild.config.clone()));
                Ok::<_, Infallible>(Committed {
                    progress: progress.clone(),
                    level_up,
                })
            })
            .await;
        let Ok(committed) = result;
        self.finish(committed).await
    }

    /// Reset a member to zero XP. Emits no level-up.
    ///
    /// Fails with [`EngineError::MemberNotFound`] if the member has no record.
    pub async fn reset_user(&self, guild_id: GuildId, member_id: MemberId) -> Result<(), EngineError> {
        let base_level = self.curve.level_for(0);
        self.store
            .mutate_guild(guild_id, |guild| {
                let progress = guild
                    .members
                    .get_mut(&member_id)
                    .ok_or(EngineError::MemberNotFound {
                        guild_id,
                        member_id,
                    })?;
                *progress = MemberProgress::new(base_level);
                Ok::<(), EngineError>(())
            })
            .await?;
        self.limiter.forget(guild_id, member_id);
        info!(%guild_id, %member_id, "Member progress reset");
        Ok(())
    }

    /// Clear every member's progress in a guild, keeping its configuration.
    ///
    /// Returns the number of member records removed.
    pub async fn reset_one_server(&self, guild_id: GuildId) -> u64 {
        let cleared = self
            .store
            .commit(|data| {
                data.progress_by_guild
                    .remove(&guild_id)
                    .as_ref()
                    .map_or(0, BTreeMap::len)
            })
            .await;
        self.limiter.forget_guild(guild_id);
        info!(%guild_id, cleared, "Server progress reset");
        u64::try_from(cleared).unwrap_or(u64::MAX)
    }

    /// Delete a guild's configuration and progress; defaults apply afterwards.
    pub async fn reset_all(&self, guild_id: GuildId) -> u64 {
        let cleared = self.store.delete_guild(guild_id).await;
        self.limiter.forget_guild(guild_id);
        info!(%guild_id, cleared, "Guild configuration and progress deleted");
        u64::try_from(cleared).unwrap_or(u64::MAX)
    }

    /// Apply `f` to a guild's configuration and return the result.
    pub async fn update_config(
        &self,
        guild_id: GuildId,
        f: impl FnOnce(&mut GuildConfig),
    ) -> GuildConfig {
        let result = self
            .store
            .mutate_guild(guild_id, |guild| {
                f(guild.config);
                Ok::<_, Infallible>(guild.config.clone())
            })
            .await;
        let Ok(config) = result;
        config
    }

    // -----------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------

    /// Parse, authorize and run a slash command.
    ///
    /// Lookups of members without progress answer [`CommandReply::NoData`]
    /// rather than failing.
    pub async fn handle_command(
        &self,
        invocation: &CommandInvocation,
    ) -> Result<CommandResponse, EngineError> {
        match Command::parse(invocation)? {
            Command::Query(query) => self.handle_query(invocation, query).await,
            Command::Admin(command) => {
                info!(
                    guild_id = %invocation.guild_id,
                    invoker_id = %invocation.invoker_id,
                    command = command.name(),
                    "Administrative command"
                );
                self.handle_admin_command(invocation.guild_id, command).await
            }
        }
    }

    async fn handle_query(
        &self,
        invocation: &CommandInvocation,
        query: QueryCommand,
    ) -> Result<CommandResponse, EngineError> {
        let guild_id = invocation.guild_id;
        let reply = match query {
            QueryCommand::Rank { member_id } | QueryCommand::Xp { member_id } => {
                match self.queries.rank(guild_id, member_id).await {
                    Ok(card) => CommandReply::Rank { card },
                    Err(EngineError::MemberNotFound { member_id, .. }) => {
                        CommandReply::NoData { member_id }
                    }
                    Err(e) => return Err(e),
                }
            }
            QueryCommand::Top { limit } => CommandReply::Leaderboard {
                entries: self.queries.leaderboard(guild_id, limit).await,
            },
            QueryCommand::Help => CommandReply::Help {
                commands: command_summaries(),
            },
            QueryCommand::Daily => {
                let claim = self
                    .claim_daily(
                        guild_id,
                        invocation.invoker_id,
                        invocation.channel_id,
                        invocation.issued_at,
                    )
                    .await;
                return Ok(match claim {
                    DailyClaim::Claimed {
                        xp_awarded,
                        adjustment,
                    } => CommandResponse {
                        reply: CommandReply::DailyClaimed {
                            xp_awarded,
                            progress: adjustment.progress,
                        },
                        level_up: adjustment.level_up,
                        warnings: adjustment.warnings,
                    },
                    DailyClaim::OnCooldown { retry_after_secs } => {
                        CommandResponse::plain(CommandReply::DailyOnCooldown { retry_after_secs })
                    }
                    DailyClaim::Disabled => CommandResponse::plain(CommandReply::LevelingDisabled),
                });
            }
        };
        Ok(CommandResponse::plain(reply))
    }

    /// Run an administrator command that already passed validation.
    pub async fn handle_admin_command(
        &self,
        guild_id: GuildId,
        command: AdminCommand,
    ) -> Result<CommandResponse, EngineError> {
        let setting = command.name();
        let response = match command {
            AdminCommand::ResetXp { member_id } => {
                self.reset_user(guild_id, member_id).await?;
                CommandResponse::plain(CommandReply::MemberReset { member_id })
            }
            AdminCommand::SetXp { member_id, xp } => {
                adjusted(member_id, self.set_xp(guild_id, member_id, xp).await)
            }
            AdminCommand::BonusXp { member_id, amount } => {
                adjusted(member_id, self.bonus_xp(guild_id, member_id, amount).await)
            }
            AdminCommand::ResetServer => CommandResponse::plain(CommandReply::ServerReset {
                members_cleared: self.reset_one_server(guild_id).await,
            }),
            AdminCommand::ResetAll => {
                self.reset_all(guild_id).await;
                CommandResponse::plain(CommandReply::GuildWiped)
            }
            setting_change => {
                let config = self
                    .update_config(guild_id, |config| apply_setting(config, setting_change))
                    .await;
                info!(%guild_id, setting, "Guild configuration updated");
                CommandResponse::plain(CommandReply::ConfigUpdated {
                    setting: setting.to_owned(),
                    config: Box::new(config),
                })
            }
        };
        Ok(response)
    }

    // -----------------------------------------------------------------
    // Reward delivery
    // -----------------------------------------------------------------

    async fn finish(&self, committed: Committed) -> XpAdjustment {
        let (level_up, warnings) = self.deliver_rewards(committed.level_up).await;
        XpAdjustment {
            progress: committed.progress,
            level_up,
            warnings,
        }
    }

    async fn deliver_rewards(
        &self,
        level_up: Option<(LevelUpEvent, GuildConfig)>,
    ) -> (Option<LevelUpEvent>, Vec<RewardWarning>) {
        let Some((event, config)) = level_up else {
            return (None, Vec::new());
        };
        info!(
            guild_id = %event.guild_id,
            member_id = %event.member_id,
            old_level = event.old_level,
            new_level = event.new_level,
            "Member leveled up"
        );
        let warnings = deliver(&self.dispatcher, &config, &event).await;
        (Some(event), warnings)
    }
}

fn adjusted(member_id: MemberId, adjustment: XpAdjustment) -> CommandResponse {
    CommandResponse {
        reply: CommandReply::XpAdjusted {
            member_id,
            progress: adjustment.progress,
        },
        level_up: adjustment.level_up,
        warnings: adjustment.warnings,
    }
}

/// Apply a configuration command to a guild's settings.
fn apply_setting(config: &mut GuildConfig, command: AdminCommand) {
    match command {
        AdminCommand::EnableLeveling => config.enabled = true,
        AdminCommand::DisableLeveling => config.enabled = false,
        AdminCommand::SetLevelChannel(channel_id) => config.notify_channel_id = channel_id,
        AdminCommand::SetLevelRole { level, role_id } => {
            config.level_role_map.insert(level, role_id);
        }
        AdminCommand::RemoveLevelRole { level } => {
            config.level_role_map.remove(&level);
        }
        AdminCommand::SetXpRate(reward) => config.xp_per_event = reward,
        AdminCommand::SetCooldown(seconds) => config.cooldown_seconds = seconds,
        AdminCommand::SetDmFallback(enabled) => config.dm_fallback_enabled = enabled,
        AdminCommand::SetRolePolicy(policy) => config.role_reward_policy = policy,
        AdminCommand::SetDailyBonus(amount) => config.daily_bonus_xp = amount,
        AdminCommand::SetCard {
            embed_color,
            background_image_url,
            card_theme,
        } => {
            if let Some(color) = embed_color {
                config.cosmetic.embed_color = color;
            }
            if let Some(background) = background_image_url {
                config.cosmetic.background_image_url = background;
            }
            if let Some(theme) = card_theme {
                config.cosmetic.card_theme = theme;
            }
        }
        AdminCommand::ResetXp { .. }
        | AdminCommand::SetXp { .. }
        | AdminCommand::BonusXp { .. }
        | AdminCommand::ResetServer
        | AdminCommand::ResetAll => {}
    }
}

/// Seconds left in the daily window opened at `last`, or `None` if it elapsed.
fn remaining_window(last: DateTime<Utc>, now: DateTime<Utc>, window: TimeDelta) -> Option<u64> {
    let elapsed = now.signed_duration_since(last).max(TimeDelta::zero());
    let remaining = window.checked_sub(&elapsed)?;
    if remaining <= TimeDelta::zero() {
        return None;
    }
    let secs = u64::try_from(remaining.num_seconds()).unwrap_or(0);
    let partial = u64::from(remaining.subsec_nanos() > 0);
    Some(secs.saturating_add(partial).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }

    #[test]
    fn daily_window_rounds_up() {
        let window = TimeDelta::hours(24);

        assert_eq!(remaining_window(at(0), at(82_800_000), window), Some(3_600));
        assert_eq!(remaining_window(at(0), at(86_399_500), window), Some(1));
        assert_eq!(remaining_window(at(0), at(86_400_000), window), None);
    }

    #[test]
    fn claim_from_the_future_waits_full_window() {
        assert_eq!(
            remaining_window(at(18_000_000), at(0), TimeDelta::hours(1)),
            Some(3_600)
        );
    }

    #[test]
    fn options_from_config() {
        let leveling = LevelingConfig {
            daily_cooldown_hours: 12,
            ..LevelingConfig::default()
        };
        assert_eq!(
            EngineOptions::from_config(&leveling).daily_cooldown,
            TimeDelta::hours(12)
        );
    }

    #[test]
    fn settings_apply_to_config() {
        let mut config = GuildConfig::default();
        apply_setting(&mut config, AdminCommand::DisableLeveling);
        apply_setting(&mut config, AdminCommand::SetCooldown(90));
        apply_setting(&mut config, AdminCommand::SetCard {
            embed_color: Some("#112233".to_owned()),
            background_image_url: Some(None),
            card_theme: None,
        });

        assert!(!config.enabled);
        assert_eq!(config.cooldown_seconds, 90);
        assert_eq!(config.cosmetic.embed_color, "#112233");
        assert_eq!(config.cosmetic.background_image_url, None);
    }
}
