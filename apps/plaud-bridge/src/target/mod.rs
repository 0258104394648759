//! Finding the desktop app and getting its debug channel open.

pub mod activator;
pub mod locator;

use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, BridgeResult};

pub use activator::{ChannelActivator, Signaler, UserSignal};
pub use locator::{ProcessHandle, ProcessLocator, SystemLocator};

/// Where the inspector listens once activated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEndpoint {
    pub host: String,
    pub port: u16,
}

impl DebugEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn listing_url(&self) -> String {
        format!("http://{}:{}/json", self.host, self.port)
    }
}

/// One entry of the inspector's `/json` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "webSocketDebuggerUrl")]
    pub websocket_debugger_url: Option<String>,
}

/// Reads the debug-listing endpoint.
#[derive(Clone)]
pub struct DebugListing {
    http: reqwest::Client,
    endpoint: DebugEndpoint,
    timeout: Duration,
}

impl DebugListing {
    pub fn new(endpoint: DebugEndpoint, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            timeout,
        }
    }

    pub fn endpoint(&self) -> &DebugEndpoint {
        &self.endpoint
    }

    pub async fn targets(&self) -> BridgeResult<Vec<TargetDescriptor>> {
        let url = self.endpoint.listing_url();
        let res = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| BridgeError::Transport(format!("GET {url}: {err}")))?;
        if !res.status().is_success() {
            return Err(BridgeError::Transport(format!(
                "GET {url}: unexpected status {}",
                res.status()
            )));
        }
        res.json::<Vec<TargetDescriptor>>()
            .await
            .map_err(|err| BridgeError::Protocol(format!("malformed debug listing: {err}")))
    }

    /// First listed target that accepts a debugger connection.
    pub async fn first_debugger_url(&self) -> BridgeResult<Option<String>> {
        let targets = self.targets().await?;
        Ok(targets
            .into_iter()
            .find_map(|target| target.websocket_debugger_url.filter(|url| !url.is_empty())))
    }
}
