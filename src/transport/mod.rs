//! Connection to the stream source.
//!
//! `session` holds the connection state machine, backoff and command queue
//! and does no I/O; `websocket` is the tokio-tungstenite side.

pub mod session;
pub mod websocket;

use std::fmt;

use serde::Serialize;

/// Outbound command, serialized as `{"action": "...", "topics": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    SetTopics { topics: Vec<String> },
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
}

impl Command {
    pub fn set_topics<I, T>(topics: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Command::SetTopics { topics: topics.into_iter().map(Into::into).collect() }
    }

    pub fn is_set_topics(&self) -> bool {
        matches!(self, Command::SetTopics { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    /// Reconnect attempts exhausted; only an explicit restart recovers.
    Failed,
    /// Client torn down.
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting   => "connecting",
            ConnectionState::Open         => "open",
            ConnectionState::Closing      => "closing",
            ConnectionState::Failed       => "failed",
            ConnectionState::Closed       => "closed",
        };
        f.write_str(s)
    }
}
