//! Event system for operator feedback.
//!
//! Lets the console, a display driver or a test subscribe to protocol
//! events without coupling them to the engine.

use std::fmt;

use crate::state::machine::{TerminalAction, TransferMode};

/// Direction of a data phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host -> device.
    Download,
    /// Device -> host.
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastbootEvent {
    /// A command was received and is about to be dispatched.
    CommandReceived { command: String },
    /// A status response was queued on IN.
    ResponseQueued { response: String },
    /// Transfer mode changed.
    ModeChanged { from: TransferMode, to: TransferMode },
    /// Data phase progress.
    Progress {
        direction: Direction,
        current: u64,
        total: u64,
    },
    /// One progress mark is due; `line_break` after every full line.
    ProgressMark { line_break: bool },
    /// A data phase finished.
    TransferFinished { direction: Direction, bytes: u64 },
    /// An acknowledged terminal action is about to run.
    TerminalAction { action: TerminalAction },
}

/// Observer trait for receiving engine events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait FastbootObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &FastbootEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl FastbootObserver for NullObserver {
    fn on_event(&self, _event: &FastbootEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FastbootObserver for TracingObserver {
    fn on_event(&self, event: &FastbootEvent) {
        match event {
            FastbootEvent::CommandReceived { command } => {
                tracing::debug!(command = %command, "Command received");
            }
            FastbootEvent::ResponseQueued { response } => {
                tracing::debug!(response = %response, "Response queued");
            }
            FastbootEvent::ModeChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Mode changed");
            }
            FastbootEvent::Progress {
                direction,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::trace!(direction = %direction, progress = %format!("{}%", pct), "Progress");
            }
            FastbootEvent::ProgressMark { .. } => {}
            FastbootEvent::TransferFinished { direction, bytes } => {
                tracing::info!(direction = %direction, bytes = bytes, "Transfer finished");
            }
            FastbootEvent::TerminalAction { action } => {
                tracing::info!(action = %action, "Terminal action");
            }
        }
    }
}

/// Observer that records every event, for tests and replay tools.
#[derive(Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<FastbootEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FastbootEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl FastbootObserver for RecordingObserver {
    fn on_event(&self, event: &FastbootEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event.clone());
    }
}
