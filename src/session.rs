//! Target group resolution.
//!
//! Once the session is ready, the configured display name is matched against
//! the session's group chats. The resulting id is stored exactly once in a
//! [`TargetGroup`] and read by the responder for every message afterwards.

use std::sync::OnceLock;

use tracing::{error, info, warn};

use crate::platform::{BridgeError, ChatId, ChatSession, ChatSummary};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no group named {target:?} among {} groups", .candidates.len())]
    NotFound {
        target: String,
        /// Display names of every group the session can see
        candidates: Vec<String>,
    },
    #[error("failed to enumerate chats: {0}")]
    Enumeration(#[from] BridgeError),
}

/// The group the bot answers in: a configured name and, once resolved, its id.
#[derive(Debug)]
pub struct TargetGroup {
    name: String,
    id: OnceLock<ChatId>,
}

impl TargetGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: OnceLock::new(),
        }
    }

    #[cfg(test)]
    pub fn resolved(name: impl Into<String>, id: ChatId) -> Self {
        let target = Self::new(name);
        target.set(id);
        target
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolved id, if resolution has succeeded
    pub fn id(&self) -> Option<&ChatId> {
        self.id.get()
    }

    #[cfg(test)]
    pub fn is_resolved(&self) -> bool {
        self.id.get().is_some()
    }

    /// Store the resolved id. Returns false if one was already set.
    fn set(&self, id: ChatId) -> bool {
        self.id.set(id).is_ok()
    }
}

/// Find the group whose display name equals `target` exactly (case-sensitive).
///
/// Chats are examined in enumeration order; the first matching group wins.
pub fn resolve_target_group(chats: &[ChatSummary], target: &str) -> Result<ChatId, ResolveError> {
    let groups = chats.iter().filter(|chat| chat.is_group);
    match groups.clone().find(|chat| chat.name == target) {
        Some(chat) => Ok(chat.id.clone()),
        None => Err(ResolveError::NotFound {
            target: target.to_string(),
            candidates: groups.map(|chat| chat.name.clone()).collect(),
        }),
    }
}

/// Enumerate the session's chats and resolve the target group.
///
/// Does nothing if the target was already resolved earlier in this process.
/// Failures are logged and returned; the target then stays unresolved and the
/// responder ignores every message.
pub async fn resolve_on_ready(
    session: &dyn ChatSession,
    target: &TargetGroup,
) -> Result<ChatId, ResolveError> {
    if let Some(id) = target.id() {
        info!("Target group already resolved ({}), skipping scan", id);
        return Ok(id.clone());
    }

    let chats = match session.list_chats().await {
        Ok(chats) => chats,
        Err(e) => {
            error!("Error finding target group: {}", e);
            return Err(e.into());
        }
    };

    info!("Scanning available groups:");
    let groups: Vec<&ChatSummary> = chats.iter().filter(|chat| chat.is_group).collect();
    for group in &groups {
        info!("- Found group: {:?} (ID: {})", group.name, group.id);
    }
    info!("Total groups found: {}", groups.len());

    match resolve_target_group(&chats, target.name()) {
        Ok(id) => {
            let duplicates = groups.iter().filter(|g| g.name == target.name()).count();
            if duplicates > 1 {
                warn!(
                    "{} groups are named {:?}; using the first one ({})",
                    duplicates,
                    target.name(),
                    id
                );
            }
            if !target.set(id.clone()) {
                warn!("Target group was resolved concurrently, keeping the first id");
            }
            info!("Target group {:?} found with ID: {}", target.name(), id);
            info!("Bot is ready to respond to messages in the target group");
            Ok(id)
        }
        Err(e) => {
            if let ResolveError::NotFound { candidates, .. } = &e {
                warn!(
                    "Could not find group named {:?}. Make sure the group exists, \
                     you are a member of it, and the name matches exactly (case-sensitive)",
                    target.name()
                );
                info!("Available group names:");
                for name in candidates {
                    info!("- {:?}", name);
                }
            }
            Err(e)
        }
    }
}
