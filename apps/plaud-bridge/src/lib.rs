pub mod channel;
pub mod cli;
pub mod client;
pub mod config;
pub mod content;
pub mod error;
pub mod model;
pub mod search;
pub mod session;
pub mod target;
pub mod telemetry;

pub use client::{ConnectionStatus, PlaudClient};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use session::{SessionApi, SessionProxy};
