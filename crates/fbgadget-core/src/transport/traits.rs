//! USB device controller abstraction.
//!
//! Defines the `UsbController` trait the engine uses to arm its single
//! bulk OUT request and to queue its single bulk IN request. Completions
//! flow back through the engine's `on_out_complete` / `on_in_complete`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request already queued on {0}")]
    Busy(&'static str),

    #[error("Queue failed on {endpoint}: {message}")]
    QueueFailed {
        endpoint: &'static str,
        message: String,
    },
}

/// Completion status reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    /// Controller-specific non-zero status.
    Failed(i32),
}

/// Abstract bulk endpoint pair of the fastboot function.
///
/// This trait enables:
/// - Gadget-stack implementations on real hardware
/// - Mock implementation for unit testing
pub trait UsbController {
    /// Arm the OUT endpoint for a transfer of up to `length` bytes.
    fn queue_out(&self, length: usize) -> Result<(), TransportError>;

    /// Queue `data` on the IN endpoint.
    fn queue_in(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Cancel the queued IN request, if any. Its completion is never reported.
    fn dequeue_in(&self);

    /// Max packet size of the OUT endpoint.
    fn out_max_packet(&self) -> usize;

    /// Cancel whatever is queued on IN and queue `data` in its place.
    ///
    /// Controllers that deliver completions from another context must
    /// override this so the cancel and the queue happen under one lock;
    /// otherwise a completion can slip in between and the host sees two
    /// responses for one command, or none.
    fn replace_in(&self, data: &[u8]) -> Result<(), TransportError> {
        self.dequeue_in();
        self.queue_in(data)
    }
}
