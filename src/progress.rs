//! Best-effort progress notifications for in-flight tool invocations
//!
//! A client that wants progress for a request puts a `progressToken` in the request
//! `_meta`. Every notification for that request carries the same token, so the client
//! can correlate it with the call that started the work.
//!
//! ## Key Components
//!
//! - [`ProgressNotifier`]: capability trait, `notify(token, message)`
//! - [`PeerNotifier`]: sends `notifications/progress` to the connected MCP client
//! - [`ChannelNotifier`]: forwards events over a channel, for embedding and tests
//! - [`NoopNotifier`]: discards everything
//! - [`ProgressReporter`]: a notifier bound to one request's token
//!
//! Delivery is advisory. Notifiers never return errors: a missing token, a missing
//! peer, a closed channel, or a failed send all degrade to a no-op so the operation
//! that emitted the event is never affected.

use async_trait::async_trait;
use rmcp::{
    model::{Meta, ProgressNotificationParam, ProgressToken},
    service::{Peer, RoleServer},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Milestone events carry no fractional progress, only a message.
pub const MILESTONE_PROGRESS: f64 = 0.0;

/// Extract the progress token from request metadata, if the client supplied one.
pub fn progress_token(meta: &Meta) -> Option<ProgressToken> {
    meta.get_progress_token()
}

/// Build the notification payload for one milestone message. An empty message is
/// omitted from the payload.
pub fn progress_params(token: ProgressToken, message: &str) -> ProgressNotificationParam {
    ProgressNotificationParam {
        progress_token: token,
        progress: MILESTONE_PROGRESS,
        total: None,
        message: (!message.is_empty()).then(|| message.to_string()),
    }
}

/// Capability for delivering progress messages to whoever issued a request.
#[async_trait]
pub trait ProgressNotifier: Send + Sync {
    /// Deliver `message` for the request identified by `token`. Must not fail.
    async fn notify(&self, token: Option<&ProgressToken>, message: &str);
}

/// Notifier that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl ProgressNotifier for NoopNotifier {
    async fn notify(&self, _token: Option<&ProgressToken>, _message: &str) {}
}

/// MCP notifier that sends progress notifications to the client over the rmcp peer
pub struct PeerNotifier {
    peer: Option<Peer<RoleServer>>,
}

impl PeerNotifier {
    pub fn new(peer: Peer<RoleServer>) -> Self {
        Self { peer: Some(peer) }
    }

    /// A notifier with no destination; every call is a no-op.
    pub fn detached() -> Self {
        Self { peer: None }
    }
}

#[async_trait]
impl ProgressNotifier for PeerNotifier {
    async fn notify(&self, token: Option<&ProgressToken>, message: &str) {
        let (Some(peer), Some(token)) = (&self.peer, token) else {
            return;
        };
        debug!("Sending MCP progress notification: {message}");
        if let Err(e) = peer
            .notify_progress(progress_params(token.clone(), message))
            .await
        {
            debug!("Dropped MCP progress notification: {e:?}");
        }
    }
}

/// A progress event as delivered by [`ChannelNotifier`]
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub token: ProgressToken,
    pub progress: f64,
    pub message: Option<String>,
}

impl From<ProgressNotificationParam> for ProgressEvent {
    fn from(params: ProgressNotificationParam) -> Self {
        Self {
            token: params.progress_token,
            progress: params.progress,
            message: params.message,
        }
    }
}

/// Channel-based notifier for in-process consumers
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl ProgressNotifier for ChannelNotifier {
    async fn notify(&self, token: Option<&ProgressToken>, message: &str) {
        let Some(token) = token else {
            return;
        };
        let event = ProgressEvent::from(progress_params(token.clone(), message));
        if self.sender.send(event).is_err() {
            debug!("Progress receiver disconnected, dropping: {message}");
        }
    }
}

/// Utility function to create a channel notifier with its receiver
pub fn channel_notifier() -> (Arc<ChannelNotifier>, mpsc::UnboundedReceiver<ProgressEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Arc::new(ChannelNotifier::new(sender)), receiver)
}

/// A notifier bound to the token of a single request.
#[derive(Clone)]
pub struct ProgressReporter {
    notifier: Arc<dyn ProgressNotifier>,
    token: Option<ProgressToken>,
}

impl ProgressReporter {
    pub fn new(notifier: Arc<dyn ProgressNotifier>, token: Option<ProgressToken>) -> Self {
        Self { notifier, token }
    }

    /// A reporter that never sends anything.
    pub fn silent() -> Self {
        Self::new(Arc::new(NoopNotifier), None)
    }

    pub fn token(&self) -> Option<&ProgressToken> {
        self.token.as_ref()
    }

    pub async fn report(&self, message: impl AsRef<str>) {
        self.notifier
            .notify(self.token.as_ref(), message.as_ref())
            .await;
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}
