//! Programming event listeners.
//!
//! Animation players and similar clients must stop reading the dataset
//! while it is being rewritten. They register a handler that receives
//! `Begin` before the first erase and `End` after the summary is refreshed.

use heapless::Vec;
use thiserror::Error;

use crate::config::MAX_PROGRAMMING_LISTENERS;

/// How a session (or startup self-heal) ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// New dataset committed and valid.
    Committed,
    /// Committed header failed validation, defaults programmed instead.
    RestoredDefaults,
    /// Session aborted. Flash may hold a partially written payload.
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgrammingEvent {
    Begin,
    End(TransferOutcome),
}

/// Listener callback, called with the token given at registration.
pub type ProgrammingHandler = fn(token: usize, event: ProgrammingEvent);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ListenerError {
    /// L01: Listener table is full
    #[error("L01: too many programming listeners (max {0})")]
    Full(usize),
}

impl ListenerError {
    /// Get error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::Full(_) => "L01",
        }
    }
}

#[derive(Clone, Copy)]
struct Listener {
    token: usize,
    handler: ProgrammingHandler,
}

/// Fixed-capacity listener table.
#[derive(Default)]
pub struct Listeners {
    entries: Vec<Listener, MAX_PROGRAMMING_LISTENERS>,
}

impl Listeners {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Add a listener. Fails (and logs) when the table is full.
    pub fn register(&mut self, token: usize, handler: ProgrammingHandler) -> Result<(), ListenerError> {
        self.entries.push(Listener { token, handler }).map_err(|_| {
            log::error!("Too many hooks registered.");
            ListenerError::Full(MAX_PROGRAMMING_LISTENERS)
        })
    }

    /// Remove every listener using `handler`. Returns true if any was removed.
    pub fn unregister_handler(&mut self, handler: ProgrammingHandler) -> bool {
        let before = self.entries.len();
        self.entries.retain(|l| l.handler as usize != handler as usize);
        self.entries.len() != before
    }

    /// Remove every listener registered with `token`.
    pub fn unregister_token(&mut self, token: usize) -> bool {
        let before = self.entries.len();
        self.entries.retain(|l| l.token != token);
        self.entries.len() != before
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Call every listener in registration order.
    pub fn notify(&self, event: ProgrammingEvent) {
        for listener in &self.entries {
            (listener.handler)(listener.token, event);
        }
    }
}
