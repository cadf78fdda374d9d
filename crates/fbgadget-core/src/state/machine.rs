//! Transfer state for the fastboot engine.

use std::collections::BTreeMap;
use std::fmt;

use crate::protocol::constants::{BYTES_PER_MARK, MARKS_PER_LINE};

/// Which engine owns the endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// OUT carries commands.
    #[default]
    Idle,
    /// OUT carries raw download data.
    Downloading,
    /// IN carries raw upload data.
    Uploading,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Idle => write!(f, "IDLE"),
            TransferMode::Downloading => write!(f, "DOWNLOADING"),
            TransferMode::Uploading => write!(f, "UPLOADING"),
        }
    }
}

/// Irreversible action run once its acknowledgement has left the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalAction {
    Reset,
    Boot,
    /// Detach the function and continue the normal boot flow.
    Detach,
}

impl fmt::Display for TerminalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalAction::Reset => write!(f, "reset"),
            TerminalAction::Boot => write!(f, "boot"),
            TerminalAction::Detach => write!(f, "detach"),
        }
    }
}

/// What the completion of the queued IN request leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InContinuation {
    /// Nothing; the response was the end of the exchange.
    #[default]
    Done,
    /// Send the next upload chunk (or the closing `OKAY`).
    UploadChunk,
    /// Run a terminal action.
    Terminal(TerminalAction),
}

/// Runtime state of one engine.
///
/// Invariants: `download_bytes <= download_size <= staging capacity`,
/// `upload_bytes <= upload_size`.
#[derive(Debug, Default)]
pub struct TransferState {
    pub mode: TransferMode,
    /// Bytes announced by the pending `download:`; zero when idle.
    pub download_size: u32,
    /// Bytes received by the current or last download.
    ///
    /// Kept after completion: `flash` and the `oem` provisioning commands
    /// consume this prefix of the staging buffer.
    pub download_bytes: u32,
    pub upload_size: u32,
    pub upload_bytes: u32,
    /// Set once the `DATA` header has gone out and chunks are counted.
    pub start_upload: bool,
    pub in_continuation: InContinuation,
    /// An IN request is queued and has not completed.
    pub response_in_flight: bool,
    /// Per-slot retry counters served by `getvar:slot-retry-count`.
    pub slot_retry_counts: BTreeMap<char, u32>,
}

impl TransferState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new mode. Returns the previous one.
    pub fn goto_mode(&mut self, to: TransferMode) -> TransferMode {
        let from = self.mode;
        if from != to {
            tracing::info!(from = %from, to = %to, "Mode transition");
        }
        self.mode = to;
        from
    }

    /// Bytes still expected by the current download.
    pub fn download_remaining(&self) -> u32 {
        self.download_size.saturating_sub(self.download_bytes)
    }

    /// Bytes still to send in the current upload.
    pub fn upload_remaining(&self) -> u32 {
        self.upload_size.saturating_sub(self.upload_bytes)
    }

    /// OUT request length for the next download chunk.
    ///
    /// Capped at the endpoint buffer and rounded up to whole packets; some
    /// controllers reject OUT requests that are not packet multiples.
    pub fn rx_bytes_expected(&self, ep_buffer_size: usize, max_packet: usize) -> usize {
        let remaining = self.download_remaining() as usize;
        if remaining == 0 {
            return 0;
        }
        if remaining > ep_buffer_size {
            return ep_buffer_size;
        }
        match remaining % max_packet.max(1) {
            0 => remaining,
            rem => remaining + (max_packet - rem),
        }
    }

    /// Close a finished download. Received data stays readable by `upload`.
    pub fn finish_download(&mut self) {
        self.download_size = 0;
        self.upload_size = self.download_bytes;
        self.upload_bytes = 0;
        self.goto_mode(TransferMode::Idle);
    }

    /// Drop a download in progress. Staging no longer holds a complete
    /// image, so there is nothing left to upload either.
    pub fn abort_download(&mut self) {
        self.download_size = 0;
        self.download_bytes = 0;
        self.upload_size = 0;
        self.upload_bytes = 0;
        self.goto_mode(TransferMode::Idle);
    }

    /// Close or drop an upload; the next `upload` needs a fresh source.
    pub fn finish_upload(&mut self) {
        self.upload_size = 0;
        self.upload_bytes = 0;
        self.start_upload = false;
        self.goto_mode(TransferMode::Idle);
    }

    /// Back to the state of a freshly bound function.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Progress mark for a counter moving from `before` to `after`.
///
/// `Some(line_break)` when a new mark is due. At most one mark per chunk.
pub fn progress_mark(before: u64, after: u64) -> Option<bool> {
    let before_marks = before / BYTES_PER_MARK;
    let after_marks = after / BYTES_PER_MARK;
    (before_marks != after_marks).then_some(after_marks % MARKS_PER_LINE == 0)
}
