//! Evaluation channel to the desktop app's inspector.
//!
//! One [`RemoteChannel`] owns the cached debugger address and the request counter.
//! Evaluations are serialized: at most one request is in flight per channel, and each
//! opens its own short-lived socket. A transient failure drops the cached address and
//! the whole discover/connect/send/await sequence is retried exactly once.

pub mod protocol;
pub mod websocket;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::target::{
    ChannelActivator, DebugEndpoint, DebugListing, ProcessLocator, Signaler, SystemLocator,
    UserSignal,
};

pub use protocol::{EvaluateRequest, ExecutionResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Discovering,
    ConnectedIdle { debugger_url: String },
    Executing { debugger_url: String },
    Unreachable,
}

impl ChannelState {
    fn cached_url(&self) -> Option<&str> {
        match self {
            ChannelState::ConnectedIdle { debugger_url }
            | ChannelState::Executing { debugger_url } => Some(debugger_url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub endpoint: DebugEndpoint,
    /// Deadline for one request/reply exchange.
    pub call_timeout: Duration,
    /// Deadline for opening or closing a socket, and for listing requests.
    pub socket_timeout: Duration,
    pub activation_wait: Duration,
}

impl ChannelOptions {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            endpoint: DebugEndpoint::new(config.debug_host.clone(), config.debug_port),
            call_timeout: config.call_timeout(),
            socket_timeout: config.socket_timeout(),
            activation_wait: config.activation_wait(),
        }
    }
}

pub struct RemoteChannel {
    listing: DebugListing,
    locator: Arc<dyn ProcessLocator>,
    activator: ChannelActivator,
    call_timeout: Duration,
    socket_timeout: Duration,
    state: Mutex<ChannelState>,
    next_id: AtomicU64,
    in_flight: AsyncMutex<()>,
}

impl RemoteChannel {
    pub fn new(
        options: ChannelOptions,
        locator: Arc<dyn ProcessLocator>,
        signaler: Arc<dyn Signaler>,
    ) -> Self {
        let listing = DebugListing::new(options.endpoint, options.socket_timeout);
        let activator = ChannelActivator::new(signaler, listing.clone(), options.activation_wait);
        Self {
            listing,
            locator,
            activator,
            call_timeout: options.call_timeout,
            socket_timeout: options.socket_timeout,
            state: Mutex::new(ChannelState::Disconnected),
            next_id: AtomicU64::new(1),
            in_flight: AsyncMutex::new(()),
        }
    }

    /// Channel wired to the real process table and `SIGUSR1`.
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            ChannelOptions::from_config(config),
            Arc::new(SystemLocator::new(config.process_pattern.clone())),
            Arc::new(UserSignal),
        )
    }

    pub fn state(&self) -> ChannelState {
        self.state.lock().clone()
    }

    /// Forgets the cached debugger address.
    pub fn reset(&self) {
        self.set_state(ChannelState::Disconnected);
    }

    /// Whether a debug target can be reached right now. Never fails.
    pub async fn probe(&self) -> bool {
        let _turn = self.in_flight.lock().await;
        match self.discover().await {
            Ok(_) => true,
            Err(err) => {
                debug!(error = %err, "debug channel probe failed");
                false
            }
        }
    }

    pub async fn evaluate(&self, expression: &str) -> BridgeResult<ExecutionResult> {
        let _turn = self.in_flight.lock().await;
        match self.attempt(expression).await {
            Err(err) if err.is_transient() => {
                warn!(error = %err, "debug channel call failed; rediscovering and retrying once");
                self.reset();
                self.attempt(expression).await
            }
            outcome => outcome,
        }
    }

    async fn attempt(&self, expression: &str) -> BridgeResult<ExecutionResult> {
        let cached = self.state.lock().cached_url().map(str::to_owned);
        let debugger_url = match cached {
            Some(url) => url,
            None => self.discover().await?,
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = EvaluateRequest::new(id, expression);
        self.set_state(ChannelState::Executing {
            debugger_url: debugger_url.clone(),
        });

        let outcome = match timeout(
            self.call_timeout,
            websocket::exchange(&debugger_url, &request, self.socket_timeout),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(BridgeError::Transport(format!(
                "no reply to request {id} within {:?}",
                self.call_timeout
            ))),
        };

        match &outcome {
            Ok(_) => self.set_state(ChannelState::ConnectedIdle { debugger_url }),
            Err(err) => {
                debug!(id, error = %err, "dropping cached debugger address");
                self.reset();
            }
        }
        outcome
    }

    async fn discover(&self) -> BridgeResult<String> {
        self.set_state(ChannelState::Discovering);
        match self.listing.first_debugger_url().await {
            Ok(Some(url)) => return Ok(self.connected(url)),
            Ok(None) => debug!("debug listing is up but lists no targets"),
            Err(err) => debug!(error = %err, "debug listing unreachable"),
        }

        let Some(handle) = self.locator.locate() else {
            self.set_state(ChannelState::Unreachable);
            return Err(BridgeError::Unavailable(
                "Plaud Desktop is not running; launch the app and try again".to_string(),
            ));
        };

        if !self.activator.ensure_open(&handle).await {
            self.set_state(ChannelState::Unreachable);
            return Err(BridgeError::Unavailable(format!(
                "debug channel of process {} could not be activated",
                handle.pid
            )));
        }

        match self.listing.first_debugger_url().await {
            Ok(Some(url)) => {
                info!(pid = handle.pid, "activated Plaud Desktop debug channel");
                Ok(self.connected(url))
            }
            Ok(None) => {
                self.set_state(ChannelState::Unreachable);
                Err(BridgeError::Unavailable(
                    "debug channel closed right after activation".to_string(),
                ))
            }
            Err(err) => {
                self.set_state(ChannelState::Unreachable);
                Err(err)
            }
        }
    }

    fn connected(&self, debugger_url: String) -> String {
        debug!(url = %debugger_url, "discovered debugger target");
        self.set_state(ChannelState::ConnectedIdle {
            debugger_url: debugger_url.clone(),
        });
        debugger_url
    }

    fn set_state(&self, next: ChannelState) {
        *self.state.lock() = next;
    }
}
