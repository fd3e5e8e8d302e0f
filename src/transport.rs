//! Transport Module
//!
//! The two ways a UI surface reaches the relay: a persistent port opened
//! once per surface, or a one-shot call per request. Both implement
//! [`Transport`] so callers cannot tell them apart.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::relay::{Relay, Request, Response};

/// Host side of a persistent channel, as served by [`Relay::serve`].
#[allow(async_fn_in_trait)]
pub trait Port {
    /// Next inbound message, or `None` once the UI side has disconnected.
    async fn recv(&mut self) -> Result<Option<Value>, TransportError>;

    async fn post(&mut self, response: &Response) -> Result<(), TransportError>;
}

/// UI side: send a request and wait for its response.
///
/// `Ok(None)` means the relay produced no response, which only happens for
/// requests it does not know.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn send(&mut self, request: &Request) -> Result<Option<Response>, TransportError>;
}

/// In-process host end of a [`PortTransport`]
pub struct HostPort {
    incoming: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<Value>,
}

impl Port for HostPort {
    async fn recv(&mut self) -> Result<Option<Value>, TransportError> {
        Ok(self.incoming.recv().await)
    }

    async fn post(&mut self, response: &Response) -> Result<(), TransportError> {
        let message = serde_json::to_value(response)?;
        self.outgoing
            .send(message)
            .map_err(|_| TransportError::Closed)
    }
}

/// Persistent channel: one relay task serves every request of the surface.
pub struct PortTransport {
    outgoing: mpsc::UnboundedSender<Value>,
    incoming: mpsc::UnboundedReceiver<Value>,
}

impl PortTransport {
    /// Open a port and start serving it on a background task.
    pub fn connect(relay: Arc<Relay>) -> Self {
        let (ui_tx, host_rx) = mpsc::unbounded_channel();
        let (host_tx, ui_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut port = HostPort {
                incoming: host_rx,
                outgoing: host_tx,
            };
            if let Err(e) = relay.serve(&mut port).await {
                warn!("Port closed with error: {}", e);
            }
        });

        Self {
            outgoing: ui_tx,
            incoming: ui_rx,
        }
    }

    /// Post a raw message without waiting for anything.
    pub fn post(&self, message: Value) -> Result<(), TransportError> {
        self.outgoing
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    /// Wait for the next message from the relay; `None` once it is gone.
    pub async fn next_response(&mut self) -> Result<Option<Response>, TransportError> {
        match self.incoming.recv().await {
            Some(message) => Ok(Some(serde_json::from_value(message)?)),
            None => Ok(None),
        }
    }
}

impl Transport for PortTransport {
    async fn send(&mut self, request: &Request) -> Result<Option<Response>, TransportError> {
        self.post(serde_json::to_value(request)?)?;
        self.next_response().await
    }
}

/// One call per request; nothing stays open between requests.
#[derive(Clone)]
pub struct OneShotTransport {
    relay: Arc<Relay>,
}

impl OneShotTransport {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self { relay }
    }

    /// Send a raw message and wait for the single matching response.
    pub async fn call(&self, message: Value) -> Result<Option<Response>, TransportError> {
        let (tx, rx) = oneshot::channel();
        if !self.relay.on_message(message, tx) {
            return Ok(None);
        }
        // A dropped sender means the relay had nothing to say.
        Ok(rx.await.ok())
    }
}

impl Transport for OneShotTransport {
    async fn send(&mut self, request: &Request) -> Result<Option<Response>, TransportError> {
        self.call(serde_json::to_value(request)?).await
    }
}

/// What the browser hosting the extension supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    pub persistent_ports: bool,
}

impl HostCapabilities {
    /// Detect from the native messaging launch arguments. Chromium passes
    /// the caller's `chrome-extension://` origin first and is driven with
    /// one-shot calls; Firefox passes a manifest path and keeps a port open.
    pub fn detect<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let chromium = args
            .into_iter()
            .next()
            .is_some_and(|origin| origin.as_ref().starts_with("chrome-extension://"));

        Self {
            persistent_ports: !chromium,
        }
    }
}

/// A transport picked from [`HostCapabilities`]
pub enum Channel {
    Port(PortTransport),
    OneShot(OneShotTransport),
}

impl Channel {
    pub fn open(relay: Arc<Relay>, capabilities: HostCapabilities) -> Self {
        if capabilities.persistent_ports {
            info!("Opening persistent port");
            Channel::Port(PortTransport::connect(relay))
        } else {
            info!("Using one-shot calls");
            Channel::OneShot(OneShotTransport::new(relay))
        }
    }
}

impl Transport for Channel {
    async fn send(&mut self, request: &Request) -> Result<Option<Response>, TransportError> {
        match self {
            Channel::Port(port) => port.send(request).await,
            Channel::OneShot(one_shot) => one_shot.send(request).await,
        }
    }
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel closed")]
    Closed,

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),
}

impl TransportError {
    /// Whether the error only spoils the current message, leaving the
    /// channel usable for the next one.
    pub fn is_per_message(&self) -> bool {
        matches!(self, TransportError::Json(_) | TransportError::MessageTooLarge(_))
    }
}
