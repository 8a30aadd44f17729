//! Typed application events.
//!
//! Account and connection state changes are published on an [`EventBus`] backed by a
//! `tokio::sync::broadcast` channel. Any number of consumers (a front end, a logger,
//! the connection owner) subscribe independently; publishing with no subscribers is
//! not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Outcome reported by whatever owns the sequencer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// The board answered
    Success,
    /// The board could not be reached
    Failure,
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ConnectionStatus::Success),
            "failure" => Ok(ConnectionStatus::Failure),
            other => Err(format!("unknown connection status '{other}'")),
        }
    }
}

/// Everything published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum AppEvent {
    /// A profile was saved under a new name
    AccountCreated(String),
    /// A profile became the current one
    AccountLoaded(String),
    /// A connection to the board at this address was requested
    DeviceConnected(String),
    /// The board connection was dropped
    DeviceDisconnected,
    /// The connection owner reports the result of a connection attempt
    ConnectionUpdated {
        /// Board address the report refers to
        ip_address: String,
        /// Result of the attempt
        status: ConnectionStatus,
    },
}

/// Broadcast bus for [`AppEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// Bus buffering up to `capacity` events per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver for every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Publish `event`, returning how many subscribers received it.
    pub fn publish(&self, event: AppEvent) -> usize {
        trace!(?event, "Publishing event");
        self.tx.send(event).unwrap_or(0)
    }

    /// Live receivers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
