//! Reward side effects: announcements and role grants.
//!
//! The engine never talks to the chat platform directly. It hands a
//! [`LevelUpEvent`] to a [`RewardDispatcher`] and [`deliver`] decides where
//! the announcement goes and which roles to grant. Delivery failures are
//! logged and returned as [`RewardWarning`]s; they never undo the XP
//! mutation that caused the level-up.
//!
//! # Notification Routing
//!
//! Routes are tried in order until one succeeds:
//!
//! 1. The guild's `notify_channel_id`, when set.
//! 2. A direct message, when `dm_fallback_enabled`.
//! 3. The channel the level-up happened in, for organic level-ups only.
//!
//! A failed route falls through to the next one. Role grants run after the
//! announcement, one per role in the event.

use std::future::Future;

use levelup_types::{
    ChannelId, DeliveryReceipt, GuildConfig, GuildId, LevelUpEvent, MemberId, RewardWarning,
    RoleId,
};
use tracing::{debug, warn};

/// Why a reward side effect did not happen.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The channel, member or role could not be found or reached.
    #[error("target unresolvable: {0}")]
    Unresolvable(String),

    /// The bot lacks permission.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The gateway did not answer or the transport failed.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl DispatchError {
    /// Interpret a gateway receipt.
    pub fn check_receipt(receipt: DeliveryReceipt) -> Result<(), Self> {
        match receipt {
            DeliveryReceipt::Delivered => Ok(()),
            DeliveryReceipt::Unresolvable { reason } => Err(Self::Unresolvable(reason)),
            DeliveryReceipt::Forbidden { reason } => Err(Self::Forbidden(reason)),
        }
    }
}

/// The chat-platform side of reward delivery.
///
/// Implementations perform one side effect per call and report failure
/// through [`DispatchError`]. They do not retry.
pub trait RewardDispatcher: Send + Sync {
    /// Post the level-up announcement in `channel_id`.
    fn send_channel(
        &self,
        channel_id: ChannelId,
        event: &LevelUpEvent,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;

    /// Send the level-up announcement to the member directly.
    fn send_direct(
        &self,
        event: &LevelUpEvent,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;

    /// Grant `role_id` to a member.
    fn grant_role(
        &self,
        guild_id: GuildId,
        member_id: MemberId,
        role_id: RoleId,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

/// A notification route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    NotifyChannel(ChannelId),
    DirectMessage,
    OriginChannel(ChannelId),
}

/// Routes to try for `event`, in order.
fn routes(config: &GuildConfig, event: &LevelUpEvent) -> Vec<Route> {
    let mut routes = Vec::with_capacity(3);
    if let Some(channel_id) = config.notify_channel_id {
        routes.push(Route::NotifyChannel(channel_id));
    }
    if config.dm_fallback_enabled {
        routes.push(Route::DirectMessage);
    }
    if let Some(channel_id) = event.cause.origin_channel() {
        routes.push(Route::OriginChannel(channel_id));
    }
    routes
}

/// Announce a level-up and grant its role rewards.
///
/// Returns one warning per failed role grant, plus one if every
/// notification route that was tried failed.
pub async fn deliver<D: RewardDispatcher>(
    dispatcher: &D,
    config: &GuildConfig,
    event: &LevelUpEvent,
) -> Vec<RewardWarning> {
    let mut warnings = Vec::new();

    let mut last_failure: Option<DispatchError> = None;
    for route in routes(config, event) {
        let result = match route {
            Route::NotifyChannel(channel_id) | Route::OriginChannel(channel_id) => {
                dispatcher.send_channel(channel_id, event).await
            }
            Route::DirectMessage => dispatcher.send_direct(event).await,
        };
        match result {
            Ok(()) => {
                debug!(
                    guild_id = %event.guild_id,
                    member_id = %event.member_id,
                    new_level = event.new_level,
                    ?route,
                    "Level-up announced"
                );
                last_failure = None;
                break;
            }
            Err(e) => {
                warn!(
                    guild_id = %event.guild_id,
                    member_id = %event.member_id,
                    ?route,
                    error = %e,
                    "Level-up announcement failed, trying next route"
                );
                last_failure = Some(e);
            }
        }
    }
    if let Some(e) = last_failure {
        warnings.push(RewardWarning::NotificationUndelivered {
            reason: e.to_string(),
        });
    }

    for &role_id in &event.role_rewards {
        if let Err(e) = dispatcher
            .grant_role(event.guild_id, event.member_id, role_id)
            .await
        {
            warn!(
                guild_id = %event.guild_id,
                member_id = %event.member_id,
                role_id = %role_id,
                error = %e,
                "Role reward not granted"
            );
            warnings.push(RewardWarning::RoleGrantFailed {
                role_id,
                reason: e.to_string(),
            });
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use levelup_types::LevelUpCause;

    use super::*;

    fn event(cause: LevelUpCause) -> LevelUpEvent {
        LevelUpEvent {
            guild_id: GuildId(1),
            member_id: MemberId(2),
            old_level: 0,
            new_level: 1,
            xp: 100,
            cause,
            role_rewards: Vec::new(),
        }
    }

    #[test]
    fn routes_follow_configured_order() {
        let config = GuildConfig {
            notify_channel_id: Some(ChannelId(10)),
            dm_fallback_enabled: true,
            ..GuildConfig::default()
        };
        let routes = routes(
            &config,
            &event(LevelUpCause::Activity {
                channel_id: ChannelId(20),
            }),
        );
        assert_eq!(routes, vec![
            Route::NotifyChannel(ChannelId(10)),
            Route::DirectMessage,
            Route::OriginChannel(ChannelId(20)),
        ]);
    }

    #[test]
    fn administrative_level_up_has_no_origin_route() {
        let routes = routes(
            &GuildConfig::default(),
            &event(LevelUpCause::Administrative),
        );
        assert!(routes.is_empty());
    }

    #[test]
    fn receipts_map_to_errors() {
        assert_eq!(
            DispatchError::check_receipt(DeliveryReceipt::Delivered),
            Ok(())
        );
        assert_eq!(
            DispatchError::check_receipt(DeliveryReceipt::Forbidden {
                reason: "missing Manage Roles".to_owned(),
            }),
            Err(DispatchError::Forbidden("missing Manage Roles".to_owned()))
        );
    }
}
