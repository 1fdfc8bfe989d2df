//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, token
//! extraction and authentication, registration with the Registry, and the
//! reader/writer task pair that carries frames between socket and Router.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::error::{AppError, AuthError, RegistryError};
use crate::message::WireMessage;
use crate::registry::RegistryHandle;
use crate::router::Router;
use crate::session::Session;
use crate::types::{Frame, SessionId};

/// How long the writer may keep flushing after teardown
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// How long shutdown waits for connections to finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub const SHUTDOWN_NOTICE: &str = "Server is shutting down.";

/// Everything a connection needs, shared by all connections
#[derive(Clone)]
pub struct AppState {
    pub registry: RegistryHandle,
    pub auth: Arc<dyn Authenticator>,
    /// Capacity of each session's outbound queue
    pub outbound_queue: usize,
    /// Room joined right after registration
    pub default_room: Option<String>,
}

/// Accept connections forever
pub async fn serve(listener: TcpListener, state: AppState) {
    serve_with_shutdown(listener, state, std::future::pending()).await
}

/// Accept connections until `shutdown` resolves
///
/// Every live session then gets the shutdown notice and is closed; open
/// connections get a grace period to flush before they are aborted.
pub async fn serve_with_shutdown<F>(listener: TcpListener, state: AppState, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    let state = state.clone();

                    // Spawn handler task for each connection
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            // Reap finished connections
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!("Shutting down, {} connections open", connections.len());
    drop(listener);

    match WireMessage::system(SHUTDOWN_NOTICE, None).to_frame() {
        Ok(notice) => {
            if let Err(e) = state.registry.shutdown(notice).await {
                warn!("Shutdown notice not delivered: {}", e);
            }
        }
        Err(e) => error!("Failed to serialize shutdown notice: {}", e),
    }

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("{} connections still open, aborting", connections.len());
        connections.abort_all();
    }
}

/// Handle a new TCP connection
///
/// Connecting → Authenticating → Active → Closed. Authentication failures
/// are reported to the client and end the connection before a session
/// exists.
pub async fn handle_connection(stream: TcpStream, state: AppState) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake, capturing ?token= from the request URI
    let mut token = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        token = query_param(req.uri().query(), "token");
        Ok::<_, ErrorResponse>(resp)
    })
    .await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Authenticate
    let identity = match authenticate(state.auth.as_ref(), token.as_deref()).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Authentication failed for {}: {}", peer_addr, e);
            let rejection = WireMessage::system(format!("Authentication failed: {e}"), None);
            ws_sender
                .send(Message::Text(serde_json::to_string(&rejection)?.into()))
                .await?;
            let _ = ws_sender.close().await;
            return Err(e.into());
        }
    };

    // Create bounded queue for registry -> client frames
    let session_id = SessionId::new();
    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(state.outbound_queue);
    let disconnect = Arc::new(Notify::new());
    let session = Session::new(
        session_id,
        identity.clone(),
        frame_tx.clone(),
        disconnect.clone(),
    );

    // Register with the Registry
    match state.registry.add_client(session).await {
        Ok(()) => {}
        Err(e @ RegistryError::IdentityTaken(_)) => {
            info!("Rejecting {} from {}: {}", identity, peer_addr, e);
            let rejection = WireMessage::system(e.to_string(), None);
            ws_sender
                .send(Message::Text(serde_json::to_string(&rejection)?.into()))
                .await?;
            let _ = ws_sender.close().await;
            return Ok(());
        }
        Err(e) => {
            error!("Failed to register session {} - {}", session_id, e);
            return Err(e.into());
        }
    }
    info!("Session {} ({}) active from {}", session_id, identity, peer_addr);

    // Spawn write task (Frame -> WebSocket)
    let mut write_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if ws_sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                debug!("WebSocket send failed, ending write task");
                break;
            }
        }
        debug!("Write task ended for {}", session_id);

        // Send close frame when done
        let _ = ws_sender.close().await;
    });

    let router = Router::new(
        session_id,
        identity.clone(),
        frame_tx.clone(),
        state.registry.clone(),
    );

    match WireMessage::system(format!("Connected as {identity}."), None).to_frame() {
        Ok(greeting) => {
            let _ = frame_tx.send(greeting).await;
        }
        Err(e) => error!("Failed to serialize greeting: {}", e),
    }
    drop(frame_tx);

    if let Some(room) = state.default_room.as_deref() {
        if let Err(e) = router.join(room).await {
            warn!("Default room join failed for {}: {}", session_id, e);
        }
    }

    // Spawn read task (WebSocket -> Router)
    let mut read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if let Err(e) = router.handle_frame(&text).await {
                        error!("Router error for {}: {}", session_id, e);
                        break;
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!("Session {} sent close frame", session_id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping from {}", session_id);
                }
                Ok(Message::Pong(_)) => {
                    debug!("Pong from {}", session_id);
                }
                Ok(_) => {
                    // Binary or other message types - ignore
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", session_id, e);
                    break;
                }
            }
        }
        debug!("Read task ended for {}", session_id);
    });

    // Wait for either task to complete, or for the registry to drop us
    let writer_done = tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", session_id);
            false
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", session_id);
            true
        }
        _ = disconnect.notified() => {
            info!("Session {} closed by the registry", session_id);
            false
        }
    };
    read_task.abort();

    // Teardown: membership, reserved handle and departure notice in one step
    if let Err(e) = state.registry.remove_client(session_id).await {
        warn!("Failed to remove session {}: {}", session_id, e);
    }

    // Give the writer a moment to flush what is queued, then close
    if !writer_done
        && tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut write_task)
            .await
            .is_err()
    {
        write_task.abort();
    }

    info!("Session {} disconnected", session_id);

    Ok(())
}

async fn authenticate(auth: &dyn Authenticator, token: Option<&str>) -> Result<String, AuthError> {
    match token {
        Some(token) => auth.authenticate(token).await,
        None => Err(AuthError::MissingToken),
    }
}

/// Extract one percent-decoded parameter from a URI query string
fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param() {
        assert_eq!(
            query_param(Some("token=abc&x=1"), "token"),
            Some("abc".to_string())
        );
        assert_eq!(query_param(Some("x=1&token=abc"), "token"), Some("abc".to_string()));
        assert_eq!(query_param(Some("x=1"), "token"), None);
        assert_eq!(query_param(None, "token"), None);
        assert_eq!(query_param(Some("token="), "token"), Some(String::new()));
        assert_eq!(
            query_param(Some("token=j%C3%B6rg"), "token"),
            Some("jörg".to_string())
        );
        assert_eq!(
            query_param(Some("token=a%26b%3Dc"), "token"),
            Some("a&b=c".to_string())
        );
    }
}
