//! Mock USB controller for testing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::traits::{TransportError, UsbController};
use crate::protocol::constants::RX_MAX_PACKET_SIZE_HS;

#[derive(Debug, Default)]
struct MockState {
    /// Length of the armed OUT request.
    out_armed: Option<usize>,
    /// The single IN request slot.
    in_slot: Option<Vec<u8>>,
    /// Frames that completed on IN, in order.
    sent: Vec<Vec<u8>>,
    /// Number of IN requests cancelled before completing.
    cancelled: usize,
    /// Make the next IN queue fail.
    fail_next_queue: bool,
}

/// Mock controller for driving the engine without hardware.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another.
#[derive(Debug, Clone)]
pub struct MockController {
    state: Arc<Mutex<MockState>>,
    max_packet: usize,
}

impl MockController {
    pub fn new() -> Self {
        Self::with_max_packet(RX_MAX_PACKET_SIZE_HS)
    }

    pub fn with_max_packet(max_packet: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            max_packet,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Length of the currently armed OUT request.
    pub fn out_armed(&self) -> Option<usize> {
        self.lock().out_armed
    }

    /// Consume the armed OUT request, as the host filling it would.
    pub fn take_out_request(&self) -> Option<usize> {
        self.lock().out_armed.take()
    }

    /// Frame currently queued on IN.
    pub fn in_pending(&self) -> Option<Vec<u8>> {
        self.lock().in_slot.clone()
    }

    /// Complete the queued IN request and return its frame.
    pub fn complete_in(&self) -> Option<Vec<u8>> {
        let mut state = self.lock();
        let frame = state.in_slot.take()?;
        state.sent.push(frame.clone());
        Some(frame)
    }

    /// All frames that completed on IN.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    pub fn cancelled(&self) -> usize {
        self.lock().cancelled
    }

    /// Make the next IN queue attempt fail.
    pub fn fail_next_queue(&self) {
        self.lock().fail_next_queue = true;
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbController for MockController {
    fn queue_out(&self, length: usize) -> Result<(), TransportError> {
        self.lock().out_armed = Some(length);
        Ok(())
    }

    fn queue_in(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_queue) {
            return Err(TransportError::QueueFailed {
                endpoint: "ep-in",
                message: "injected failure".into(),
            });
        }
        if state.in_slot.is_some() {
            return Err(TransportError::Busy("ep-in"));
        }
        state.in_slot = Some(data.to_vec());
        Ok(())
    }

    fn dequeue_in(&self) {
        let mut state = self.lock();
        if state.in_slot.take().is_some() {
            state.cancelled += 1;
        }
    }

    fn out_max_packet(&self) -> usize {
        self.max_packet
    }

    fn replace_in(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.in_slot.take().is_some() {
            state.cancelled += 1;
        }
        if std::mem::take(&mut state.fail_next_queue) {
            return Err(TransportError::QueueFailed {
                endpoint: "ep-in",
                message: "injected failure".into(),
            });
        }
        state.in_slot = Some(data.to_vec());
        Ok(())
    }
}
