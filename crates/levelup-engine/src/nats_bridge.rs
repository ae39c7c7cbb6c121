//! NATS bridge between the chat gateway and the progression engine.
//!
//! The gateway owns the chat platform connection. It forwards qualifying
//! messages and slash commands to the engine over NATS and carries out the
//! reward instructions the engine sends back.
//!
//! # Subject Convention
//!
//! - **Activity:** `{prefix}.activity.{guild_id}` carrying an
//!   [`ActivityEvent`]. When the message has a reply subject the
//!   [`ActivityOutcome`] is sent back.
//! - **Commands:** `{prefix}.command` carrying a [`CommandInvocation`],
//!   answered with a [`CommandEnvelope`].
//! - **Rewards:** `{prefix}.reward.{guild_id}` carrying a
//!   [`RewardInstruction`], answered by the gateway with a
//!   [`DeliveryReceipt`].
//!
//! [`ActivityOutcome`]: levelup_types::ActivityOutcome

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use levelup_core::{DispatchError, EngineError, ProgressionEngine, RewardDispatcher};
use levelup_types::{
    ActivityEvent, ChannelId, CommandInvocation, CommandResponse, DeliveryReceipt, GuildId,
    LevelUpEvent, MemberId, RewardInstruction, RoleId,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ServiceError;

/// The engine as wired to NATS.
pub type Engine = ProgressionEngine<NatsRewardDispatcher>;

// ---------------------------------------------------------------------------
// Reward dispatch
// ---------------------------------------------------------------------------

/// Delivers reward instructions to the gateway as NATS requests.
///
/// Each instruction waits for the gateway's [`DeliveryReceipt`] for at most
/// the configured timeout. A missing or malformed receipt is a transport
/// failure.
#[derive(Debug, Clone)]
pub struct NatsRewardDispatcher {
    client: async_nats::Client,
    prefix: String,
    timeout: Duration,
}

impl NatsRewardDispatcher {
    /// Create a dispatcher publishing under `prefix`.
    pub const fn new(client: async_nats::Client, prefix: String, timeout: Duration) -> Self {
        Self {
            client,
            prefix,
            timeout,
        }
    }

    async fn request(
        &self,
        guild_id: GuildId,
        instruction: &RewardInstruction,
    ) -> Result<(), DispatchError> {
        let subject = reward_subject(&self.prefix, guild_id);
        let payload = serde_json::to_vec(instruction).map_err(|e| {
            DispatchError::Transport(format!("failed to serialize reward instruction: {e}"))
        })?;

        let reply = tokio::time::timeout(
            self.timeout,
            self.client.request(subject.clone(), payload.into()),
        )
        .await
        .map_err(|elapsed| {
            DispatchError::Transport(format!("no receipt on {subject}: {elapsed}"))
        })?
        .map_err(|e| DispatchError::Transport(format!("request on {subject} failed: {e}")))?;

        let receipt: DeliveryReceipt = serde_json::from_slice(&reply.payload)
            .map_err(|e| DispatchError::Transport(format!("malformed receipt on {subject}: {e}")))?;
        debug!(subject, ?receipt, "Reward receipt");
        DispatchError::check_receipt(receipt)
    }
}

impl RewardDispatcher for NatsRewardDispatcher {
    async fn send_channel(
        &self,
        channel_id: ChannelId,
        event: &LevelUpEvent,
    ) -> Result<(), DispatchError> {
        let instruction = RewardInstruction::Announce {
            channel_id,
            event: event.clone(),
        };
        self.request(event.guild_id, &instruction).await
    }

    async fn send_direct(&self, event: &LevelUpEvent) -> Result<(), DispatchError> {
        let instruction = RewardInstruction::DirectMessage {
            event: event.clone(),
        };
        self.request(event.guild_id, &instruction).await
    }

    async fn grant_role(
        &self,
        guild_id: GuildId,
        member_id: MemberId,
        role_id: RoleId,
    ) -> Result<(), DispatchError> {
        let instruction = RewardInstruction::GrantRole {
            guild_id,
            member_id,
            role_id,
        };
        self.request(guild_id, &instruction).await
    }
}

// ---------------------------------------------------------------------------
// Command replies
// ---------------------------------------------------------------------------

/// What the gateway receives for a command request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandEnvelope {
    /// The command ran.
    Ok(Box<CommandResponse>),
    /// The command was rejected or failed.
    Error {
        /// Machine-readable failure kind.
        kind: &'static str,
        /// Human-readable description.
        message: String,
    },
}

impl CommandEnvelope {
    fn from_result(result: Result<CommandResponse, EngineError>) -> Self {
        match result {
            Ok(response) => Self::Ok(Box::new(response)),
            Err(e) => Self::Error {
                kind: error_kind(&e),
                message: e.to_string(),
            },
        }
    }
}

const fn error_kind(error: &EngineError) -> &'static str {
    use levelup_core::CommandError;
    match error {
        EngineError::MemberNotFound { .. } => "member_not_found",
        EngineError::Command(CommandError::UnknownCommand(_)) => "unknown_command",
        EngineError::Command(CommandError::PermissionDenied { .. }) => "permission_denied",
        EngineError::Command(CommandError::MissingArgument(_)) => "missing_argument",
        EngineError::Command(CommandError::InvalidConfigValue { .. }) => "invalid_config_value",
    }
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// Subscribes to gateway traffic and feeds it to the engine.
///
/// Every message is handled in its own task. The store serializes
/// mutations, so concurrent tasks never interleave updates to one member.
pub struct NatsBridge {
    client: async_nats::Client,
    engine: Arc<Engine>,
    prefix: String,
}

impl NatsBridge {
    /// Create a bridge over an established client.
    pub const fn new(client: async_nats::Client, engine: Arc<Engine>, prefix: String) -> Self {
        Self {
            client,
            engine,
            prefix,
        }
    }

    /// Process gateway traffic until either subscription closes.
    pub async fn run(&self) -> Result<(), ServiceError> {
        let mut activity = self.subscribe(format!("{}.activity.*", self.prefix)).await?;
        let mut commands = self.subscribe(format!("{}.command", self.prefix)).await?;
        info!(prefix = %self.prefix, "NATS bridge started, awaiting gateway traffic");

        loop {
            tokio::select! {
                message = activity.next() => {
                    let Some(message) = message else { break };
                    self.spawn_activity(message);
                }
                message = commands.next() => {
                    let Some(message) = message else { break };
                    self.spawn_command(message);
                }
            }
        }

        info!("NATS subscription ended, bridge shutting down");
        Ok(())
    }

    async fn subscribe(&self, subject: String) -> Result<async_nats::Subscriber, ServiceError> {
        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| ServiceError::Nats {
                message: format!("failed to subscribe to {subject}: {e}"),
            })?;
        debug!(subject, "Subscribed");
        Ok(subscriber)
    }

    fn spawn_activity(&self, message: async_nats::Message) {
        let engine = Arc::clone(&self.engine);
        let client = self.client.clone();
        tokio::spawn(async move {
            let event = match serde_json::from_slice::<ActivityEvent>(&message.payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        subject = %message.subject,
                        error = %e,
                        "Failed to deserialize activity event, skipping"
                    );
                    return;
                }
            };
            let outcome = engine.handle_activity(&event).await;
            if let Some(reply) = message.reply {
                respond(&client, reply, &outcome).await;
            }
        });
    }

    fn spawn_command(&self, message: async_nats::Message) {
        let Some(reply) = message.reply.clone() else {
            warn!(subject = %message.subject, "Command without reply subject, skipping");
            return;
        };
        let engine = Arc::clone(&self.engine);
        let client = self.client.clone();
        tokio::spawn(async move {
            let envelope = match serde_json::from_slice::<CommandInvocation>(&message.payload) {
                Ok(invocation) => {
                    let result = engine.handle_command(&invocation).await;
                    if let Err(e) = &result {
                        debug!(
                            guild_id = %invocation.guild_id,
                            command = invocation.name,
                            error = %e,
                            "Command rejected"
                        );
                    }
                    CommandEnvelope::from_result(result)
                }
                Err(e) => CommandEnvelope::Error {
                    kind: "malformed_invocation",
                    message: e.to_string(),
                },
            };
            respond(&client, reply, &envelope).await;
        });
    }
}

async fn respond<T: Serialize + Sync>(
    client: &async_nats::Client,
    reply: async_nats::Subject,
    body: &T,
) {
    match serde_json::to_vec(body) {
        Ok(payload) => {
            if let Err(e) = client.publish(reply.clone(), payload.into()).await {
                warn!(subject = %reply, error = %e, "Failed to publish reply");
            }
        }
        Err(e) => warn!(subject = %reply, error = %e, "Failed to serialize reply"),
    }
}

fn reward_subject(prefix: &str, guild_id: GuildId) -> String {
    format!("{prefix}.reward.{guild_id}")
}

#[cfg(test)]
mod tests {
    use levelup_core::CommandError;
    use levelup_types::CommandReply;

    use super::*;

    #[test]
    fn reward_subject_includes_guild() {
        assert_eq!(reward_subject("levelup", GuildId(1000)), "levelup.reward.1000");
    }

    #[test]
    fn failures_carry_a_kind() {
        let envelope = CommandEnvelope::from_result(Err(EngineError::Command(
            CommandError::PermissionDenied {
                command: "set-xp".to_owned(),
            },
        )));

        let json = serde_json::to_value(&envelope).unwrap_or_default();
        assert_eq!(json["error"]["kind"], "permission_denied");
        assert_eq!(
            json["error"]["message"],
            "command `set-xp` requires administrator permission"
        );
    }

    #[test]
    fn successes_wrap_the_response() {
        let envelope = CommandEnvelope::from_result(Ok(CommandResponse::plain(
            CommandReply::GuildWiped,
        )));

        let json = serde_json::to_value(&envelope).unwrap_or_default();
        assert!(json.get("ok").is_some_and(|ok| ok.get("reply").is_some()));
    }
}
