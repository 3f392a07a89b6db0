use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info};

use crate::config::PacingConfig;
use crate::llm::{generate_or_fallback, ReplyGenerator};
use crate::platform::{BridgeError, ChatId, ChatSession, ChatSummary, IncomingMessage};
use crate::session::TargetGroup;

/// Why a message was not answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    StatusBroadcast,
    NotGroup,
    /// The target group has not been resolved
    NoTargetGroup,
    NotTargetGroup,
    EmptyBody,
    SelfAuthored,
}

impl IgnoreReason {
    fn describe(self) -> &'static str {
        match self {
            IgnoreReason::StatusBroadcast => "Skipping status broadcast message",
            IgnoreReason::NotGroup => "Message is not from a group, ignoring",
            IgnoreReason::NoTargetGroup => "Target group is not resolved, ignoring message",
            IgnoreReason::NotTargetGroup => "Message is not from the target group, ignoring",
            IgnoreReason::EmptyBody => "Skipping empty message or media without caption",
            IgnoreReason::SelfAuthored => "Skipping message from bot itself",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Respond,
    Ignore(IgnoreReason),
}

#[derive(Debug, PartialEq)]
pub enum Outcome {
    Ignored(IgnoreReason),
    Replied {
        text: String,
        /// The generator failed and the fallback apology was sent
        fallback: bool,
        delay: Duration,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error("failed to fetch chat: {0}")]
    ChatLookup(#[source] BridgeError),
    #[error("failed to send reply: {0}")]
    Send(#[source] BridgeError),
}

/// Randomized wait before each reply
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    min: Duration,
    max: Duration,
}

impl Pacing {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn from_config(config: &PacingConfig) -> Self {
        Self::new(config.min_delay(), config.max_delay())
    }

    #[cfg(test)]
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Uniform sample from `[min, max)`, or `min` when the range is empty.
    pub fn sample(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let millis =
            rand::rng().random_range(self.min.as_millis() as u64..self.max.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

/// Decide whether `msg`, sent in `chat`, should be answered.
///
/// Rules are checked in order and the first one that applies wins.
pub fn classify(msg: &IncomingMessage, chat: &ChatSummary, target: Option<&ChatId>) -> Disposition {
    if msg.is_status_broadcast() {
        return Disposition::Ignore(IgnoreReason::StatusBroadcast);
    }
    if !chat.is_group {
        return Disposition::Ignore(IgnoreReason::NotGroup);
    }
    match target {
        None => return Disposition::Ignore(IgnoreReason::NoTargetGroup),
        Some(id) if *id != chat.id => return Disposition::Ignore(IgnoreReason::NotTargetGroup),
        Some(_) => {}
    }
    if msg.body.is_empty() {
        return Disposition::Ignore(IgnoreReason::EmptyBody);
    }
    if msg.from_me {
        return Disposition::Ignore(IgnoreReason::SelfAuthored);
    }
    Disposition::Respond
}

/// Answers messages in the target group with generated text.
pub struct Responder {
    session: Arc<dyn ChatSession>,
    generator: Arc<dyn ReplyGenerator>,
    target: Arc<TargetGroup>,
    pacing: Pacing,
}

impl Responder {
    pub fn new(
        session: Arc<dyn ChatSession>,
        generator: Arc<dyn ReplyGenerator>,
        target: Arc<TargetGroup>,
        pacing: Pacing,
    ) -> Self {
        Self {
            session,
            generator,
            target,
            pacing,
        }
    }

    /// Handle one inbound message. Every external call is attempted once.
    pub async fn handle(&self, msg: &IncomingMessage) -> Result<Outcome, ResponderError> {
        let started = Instant::now();
        debug!(
            "Message {} from {} (author: {}, type: {}, media: {}, at: {:?})",
            msg.id,
            msg.from,
            msg.author.as_deref().unwrap_or("N/A"),
            msg.message_type,
            msg.has_media,
            msg.timestamp
        );

        // Status updates are not real chats, skip the lookup
        if msg.is_status_broadcast() {
            debug!("{}", IgnoreReason::StatusBroadcast.describe());
            return Ok(Outcome::Ignored(IgnoreReason::StatusBroadcast));
        }

        let chat = self
            .session
            .get_chat(&msg.chat_id)
            .await
            .map_err(ResponderError::ChatLookup)?;

        if let Disposition::Ignore(reason) = classify(msg, &chat, self.target.id()) {
            self.log_ignored(reason, &chat);
            return Ok(Outcome::Ignored(reason));
        }

        info!("Processing message in {:?}: {}", chat.name, msg.body);
        let reply = generate_or_fallback(self.generator.as_ref(), &msg.body).await;
        debug!("Generated response: {}", reply.text);

        let delay = self.pacing.sample();
        debug!("Waiting {}ms before responding", delay.as_millis());
        tokio::time::sleep(delay).await;

        self.session
            .reply(msg, &reply.text)
            .await
            .map_err(ResponderError::Send)?;

        info!(
            "Response sent (total processing time: {}ms)",
            started.elapsed().as_millis()
        );
        Ok(Outcome::Replied {
            fallback: reply.is_fallback(),
            text: reply.text,
            delay,
        })
    }

    fn log_ignored(&self, reason: IgnoreReason, chat: &ChatSummary) {
        debug!("{}", reason.describe());
        if reason == IgnoreReason::NotTargetGroup {
            debug!(
                "Group {:?} ({}) differs from target {:?} ({})",
                chat.name,
                chat.id,
                self.target.name(),
                self.target.id().map(ChatId::as_str).unwrap_or("unresolved")
            );
            if chat.name == self.target.name() {
                debug!("Group name matches the target but the id differs");
            } else {
                debug!(
                    "Name comparison: received {} chars {:?}, target {} chars {:?}",
                    chat.name.chars().count(),
                    chat.name.chars().map(u32::from).collect::<Vec<_>>(),
                    self.target.name().chars().count(),
                    self.target.name().chars().map(u32::from).collect::<Vec<_>>()
                );
            }
        }
    }
}
