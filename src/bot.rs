use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::llm::ReplyGenerator;
use crate::platform::{ChatSession, SessionEvent};
use crate::responder::{Outcome, Pacing, Responder};
use crate::session::{resolve_on_ready, TargetGroup};

/// Ties the session events to group resolution and the responder
pub struct Bot {
    session: Arc<dyn ChatSession>,
    responder: Arc<Responder>,
    target: Arc<TargetGroup>,
    session_dir: PathBuf,
}

impl Bot {
    pub fn new(
        config: &Config,
        session: Arc<dyn ChatSession>,
        generator: Arc<dyn ReplyGenerator>,
    ) -> Self {
        let target = Arc::new(TargetGroup::new(config.target_group_name.clone()));
        let responder = Arc::new(Responder::new(
            Arc::clone(&session),
            generator,
            Arc::clone(&target),
            Pacing::from_config(&config.pacing),
        ));
        Self {
            session,
            responder,
            target,
            session_dir: config.whatsapp.session_dir.clone(),
        }
    }

    #[cfg(test)]
    pub fn target(&self) -> &TargetGroup {
        &self.target
    }

    /// Consume session events until the stream ends.
    ///
    /// `Ready` is handled inline so the target is resolved before any later
    /// message is examined. Each message gets its own task; handlers for
    /// consecutive messages may overlap.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event, &mut handlers).await,
                    None => break,
                },
                Some(result) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = result {
                        error!("Message handler panicked: {}", e);
                    }
                }
            }
        }

        warn!("WhatsApp session event stream ended");
        while let Some(result) = handlers.join_next().await {
            if let Err(e) = result {
                error!("Message handler panicked: {}", e);
            }
        }
    }

    async fn handle_event(&self, event: SessionEvent, handlers: &mut JoinSet<()>) {
        match event {
            SessionEvent::Qr(code) => {
                info!("Scan this QR code with WhatsApp on your phone to log in:");
                info!("{}", code);
            }
            SessionEvent::Ready => {
                info!("WhatsApp session is ready");
                // Failures are logged inside; the bot stays up and ignores messages
                let _ = resolve_on_ready(self.session.as_ref(), &self.target).await;
            }
            SessionEvent::Message(msg) => {
                let responder = Arc::clone(&self.responder);
                handlers.spawn(async move {
                    match responder.handle(&msg).await {
                        Ok(Outcome::Ignored(reason)) => {
                            debug!("Message {} ignored: {:?}", msg.id, reason)
                        }
                        Ok(Outcome::Replied { fallback, .. }) => {
                            debug!("Replied to message {} (fallback: {})", msg.id, fallback)
                        }
                        Err(e) => {
                            error!("Error handling message {}: {:#}", msg.id, anyhow::Error::new(e))
                        }
                    }
                });
            }
            SessionEvent::AuthFailure(reason) => {
                error!("Authentication failed: {}", reason);
                error!(
                    "Please delete the {} folder and try again.",
                    self.session_dir.display()
                );
            }
            SessionEvent::Disconnected(reason) => {
                warn!("Client was disconnected: {}", reason);
            }
        }
    }
}
