//! Per-session message router
//!
//! Classifies each inbound frame and dispatches it to the registry. Protocol errors are answered with a System message and the
//! session stays active; only a closed registry is fatal.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{AppError, RegistryError};
use crate::message::{
    parse_message, typing_flag, Command, Inbound, MessageType, WireMessage, HELP_TEXT,
};
use crate::registry::RegistryHandle;
use crate::types::{Frame, SessionId};

pub const MUST_JOIN: &str = "You must join a room first. Use /join <roomName>";

/// Drives one active session
pub struct Router {
    session_id: SessionId,
    identity: String,
    /// Replies to this session only
    outbound: mpsc::Sender<Frame>,
    registry: RegistryHandle,
}

impl Router {
    pub fn new(
        session_id: SessionId,
        identity: String,
        outbound: mpsc::Sender<Frame>,
        registry: RegistryHandle,
    ) -> Self {
        Self {
            session_id,
            identity,
            outbound,
            registry,
        }
    }

    /// Handle one raw inbound frame
    pub async fn handle_frame(&self, raw: &str) -> Result<(), AppError> {
        let inbound = parse_message(raw);
        debug!("Frame from {} classified as {:?}", self.session_id, inbound.kind());

        match inbound {
            Inbound::Regular { content } => self.handle_regular(content).await,
            Inbound::Direct { target, content } => self.handle_direct(target, content).await,
            Inbound::Command(Command::Help) => self.reply(HELP_TEXT).await,
            Inbound::Command(Command::Users) => {
                let identities = self.registry.list_identities().await?;
                self.reply(&identities.join("\n")).await
            }
            Inbound::Command(Command::Join { room }) => self.join(&room).await,
            Inbound::Typing { content } => {
                self.registry
                    .update_typing(self.session_id, typing_flag(&content))
                    .await?;
                Ok(())
            }
            Inbound::Invalid { reason } => self.reply(&reason).await,
        }
    }

    /// Run the join protocol for this session
    ///
    /// Confirmation and history replay are queued by the registry.
    pub async fn join(&self, room: &str) -> Result<(), AppError> {
        match self.registry.join_room(room, self.session_id).await {
            Ok(_) => Ok(()),
            Err(RegistryError::Closed) => Err(RegistryError::Closed.into()),
            Err(e) => {
                warn!("Session {} failed to join room {}: {}", self.session_id, room, e);
                self.reply(&format!("Failed to join room: {e}")).await
            }
        }
    }

    /// Broadcast, then persist
    ///
    /// Delivery and persistence are independent: a failed append is
    /// reported to the sender and the broadcast stands.
    async fn handle_regular(&self, content: String) -> Result<(), AppError> {
        let Some(room) = self.registry.session_room(self.session_id).await? else {
            return self.reply(MUST_JOIN).await;
        };

        self.registry.update_typing(self.session_id, false).await?;

        let frame = WireMessage::outbound(
            MessageType::Regular,
            content.as_str(),
            self.identity.as_str(),
            Some(room.clone()),
        )
        .to_frame()?;
        let saved = self
            .registry
            .post_to_room(&room.name, frame, &self.identity, &content)
            .await?;

        if let Err(e) = saved {
            warn!("Error saving message from {} to room {}: {}", self.identity, room.name, e);
            self.reply(&format!("Error saving message: {e}")).await?;
        }
        Ok(())
    }

    async fn handle_direct(&self, target: String, content: String) -> Result<(), AppError> {
        info!("[DM from {} to {}]", self.identity, target);
        let frame = WireMessage::outbound(
            MessageType::Direct,
            content,
            self.identity.as_str(),
            None,
        )
        .with_target(target.as_str())
        .to_frame()?;

        if !self.registry.send_direct(&target, frame).await? {
            self.reply(&format!("User {target} not found.")).await?;
        }
        Ok(())
    }

    /// Send a System message to this session
    async fn reply(&self, text: &str) -> Result<(), AppError> {
        let frame = WireMessage::system(text, None).to_frame()?;
        if self.outbound.send(frame).await.is_err() {
            debug!("Outbound queue closed for {}", self.session_id);
        }
        Ok(())
    }
}
