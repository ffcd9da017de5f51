//! Connection lifecycle, reconnect backoff and the pending-command queue.
//!
//! ```text
//!   Disconnected ──begin_connect──▶ Connecting ──on_open──▶ Open
//!        ▲                               │                   │
//!        └──────── on_failure (Retry) ◀──┴───────────────────┘
//!                        │
//!                        └─ attempts == max ──▶ Failed
//! ```
//! `begin_close` / `closed` move any state to Closing / Closed.

use std::collections::VecDeque;
use std::time::Duration;

use log::{debug, info, warn};

use super::{Command, ConnectionState};

/// Reconnect schedule: `base * 2^min(attempt, max_exponent)`, at most
/// `max_attempts` consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max_exponent: u32,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff { base: Duration::from_secs(1), max_exponent: 5, max_attempts: 10 }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(self.max_exponent).min(31);
        self.base.saturating_mul(1u32 << exp)
    }
}

/// FIFO of commands waiting for an open connection.  Holds at most one
/// `set_topics`: a newer one replaces the older and takes the tail position.
#[derive(Debug, Default)]
pub struct CommandQueue {
    items: VecDeque<Command>,
}

impl CommandQueue {
    pub fn push(&mut self, cmd: Command) {
        if cmd.is_set_topics() {
            self.items.retain(|c| !c.is_set_topics());
        }
        self.items.push_back(cmd);
    }

    pub fn drain(&mut self) -> Vec<Command> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.items.iter()
    }
}

/// What the caller should do after a failed or lost connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterFailure {
    Retry(Duration),
    /// Reported once; the session is now Failed.
    Exhausted { attempts: u32 },
    /// The session is already terminal.
    Ignored,
}

#[derive(Debug)]
pub struct Session {
    state: ConnectionState,
    attempts: u32,
    queue: CommandQueue,
    backoff: Backoff,
}

impl Session {
    pub fn new(backoff: Backoff) -> Self {
        Session {
            state: ConnectionState::Disconnected,
            attempts: 0,
            queue: CommandQueue::default(),
            backoff,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn queued(&self) -> &CommandQueue {
        &self.queue
    }

    /// Disconnected → Connecting.  Returns false in any other state.
    pub fn begin_connect(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }

    /// Returns the command when it should go on the wire now; otherwise it
    /// is queued for the next open connection.
    pub fn send(&mut self, cmd: Command) -> Option<Command> {
        match self.state {
            ConnectionState::Open => Some(cmd),
            ConnectionState::Failed | ConnectionState::Closed => {
                debug!("session {}: dropping {cmd:?}", self.state);
                None
            }
            _ => {
                self.queue.push(cmd);
                None
            }
        }
    }

    /// Handshake done.  Returns the commands to transmit, in order: the queue
    /// if anything was waiting, otherwise a `set_topics` for `desired`.
    pub fn on_open(&mut self, desired: &[String]) -> Vec<Command> {
        self.state = ConnectionState::Open;
        self.attempts = 0;
        if self.queue.is_empty() {
            vec![Command::set_topics(desired.iter().cloned())]
        } else {
            self.queue.drain()
        }
    }

    /// Connect failure, timeout, error or close.  Queues a fresh
    /// `set_topics` for `desired` and decides whether to retry.
    pub fn on_failure(&mut self, desired: &[String]) -> AfterFailure {
        if self.state.is_terminal() {
            return AfterFailure::Ignored;
        }
        self.queue.push(Command::set_topics(desired.iter().cloned()));
        self.attempts += 1;
        if self.attempts >= self.backoff.max_attempts {
            warn!("session: giving up after {} failed attempts", self.attempts);
            self.state = ConnectionState::Failed;
            return AfterFailure::Exhausted { attempts: self.attempts };
        }
        self.state = ConnectionState::Disconnected;
        let delay = self.backoff.delay(self.attempts - 1);
        info!("session: reconnect attempt {} in {delay:?}", self.attempts + 1);
        AfterFailure::Retry(delay)
    }

    pub fn begin_close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closing;
        }
    }

    pub fn closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}
