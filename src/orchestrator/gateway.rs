//! Messaging gateway adapter
//!
//! Bridges an inbound notification stream (a chat platform, a message bus)
//! to the orchestrator: drops self-echoes, runs the turn, and pushes the
//! answer back through the host's sender.

use crate::dedup::DedupGuard;
use crate::error::{ChatloomError, Result};
use crate::orchestrator::engine::{Orchestrator, UserIdentity};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// One inbound message as delivered by the host platform
#[derive(Debug, Clone)]
pub struct InboundNotification {
    /// The message text addressed to us
    pub utterance: String,
    /// Who sent it
    pub sender: UserIdentity,
    /// Channel or room the message arrived in
    pub channel: String,
    /// Platform-assigned sequence number of the message
    pub sequence: u64,
}

/// Host-side outbound channel
///
/// Implementations deliver a reply into the originating channel and return
/// the sequence number the platform assigned to it, which the gateway
/// remembers for echo suppression.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    /// Sends `text` and returns its platform sequence number
    ///
    /// # Errors
    ///
    /// Returns error if delivery fails.
    async fn send(&self, text: &str) -> Result<u64>;
}

/// Adapter between a notification stream and the orchestrator
pub struct Gateway {
    orchestrator: Arc<Orchestrator>,
    guard: DedupGuard,
}

impl Gateway {
    /// Creates a gateway over `orchestrator`
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            guard: DedupGuard::new(),
        }
    }

    /// Handles one inbound notification
    ///
    /// Self-echoes (sequence numbers the gateway itself produced) are
    /// dropped and yield `None`. Routing problems are answered in-channel
    /// with the error text instead of failing the stream; every reply that
    /// was actually sent is returned as `Some`.
    ///
    /// # Errors
    ///
    /// Non-routing orchestration failures and delivery failures propagate
    /// to the host.
    pub async fn handle(
        &self,
        notification: InboundNotification,
        sender: &dyn OutboundSender,
    ) -> Result<Option<String>> {
        if self.guard.contains(notification.sequence) {
            debug!(
                sequence = notification.sequence,
                channel = %notification.channel,
                "Dropping self-echo"
            );
            return Ok(None);
        }

        let reply = match self
            .orchestrator
            .run_turn(&notification.utterance, &notification.sender, None, false)
            .await
        {
            Ok(answer) => answer,
            Err(e) => match e.downcast_ref::<ChatloomError>() {
                Some(err) if err.is_routing() => err.to_string(),
                _ => return Err(e),
            },
        };

        let sequence = sender.send(&reply).await?;
        self.guard.record(sequence);
        info!(
            channel = %notification.channel,
            sequence,
            "Reply delivered"
        );
        Ok(Some(reply))
    }
}
