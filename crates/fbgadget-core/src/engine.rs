//! Fastboot engine - the device side of one bound USB function.
//!
//! The engine is driven entirely by controller completions: every OUT
//! completion enters [`FastbootEngine::on_out_complete`] and every IN
//! completion enters [`FastbootEngine::on_in_complete`]. Which phase owns
//! the endpoints is decided by [`TransferMode`] and by the continuation
//! installed with the last queued IN request.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::Services;
use crate::config::EngineConfig;
use crate::error::FastbootError;
use crate::events::{Direction, FastbootEvent, FastbootObserver, TracingObserver};
use crate::protocol::{DISPATCH_TABLE, Response, lookup_prefix};
use crate::staging::StagingBuffer;
use crate::state::{
    HandlerContext, InContinuation, Reply, TerminalAction, TransferMode, TransferState,
    handle_command, progress_mark,
};
use crate::transport::{TransferStatus, TransportError, UsbController};

/// Where the function is in its bind/enable lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Bound but endpoints not enabled; events are ignored.
    Bound,
    Enabled,
    /// A terminal action has run; nothing further is valid.
    Halted,
}

/// Fastboot protocol engine.
///
/// Holding `&mut self` is the ownership token for the staging buffer and
/// the single outbound request slot.
pub struct FastbootEngine<C: UsbController, O: FastbootObserver = TracingObserver> {
    config: EngineConfig,
    controller: C,
    observer: Arc<O>,
    services: Services,
    staging: StagingBuffer,
    state: TransferState,
    /// Inbound request buffer; present while enabled.
    inbound: Option<Vec<u8>>,
    /// Length of the armed OUT request.
    out_requested: usize,
    lifecycle: Lifecycle,
}

impl<C: UsbController> FastbootEngine<C, TracingObserver> {
    /// Bind an engine that reports through `tracing`.
    pub fn bind(config: EngineConfig, controller: C, services: Services) -> Result<Self> {
        Self::bind_with_observer(config, controller, services, Arc::new(TracingObserver))
    }
}

impl<C: UsbController, O: FastbootObserver> FastbootEngine<C, O> {
    /// Bind an engine with a custom observer.
    pub fn bind_with_observer(
        config: EngineConfig,
        controller: C,
        services: Services,
        observer: Arc<O>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            staging_capacity = config.staging_capacity,
            ep_buffer_size = config.ep_buffer_size,
            "Binding fastboot function"
        );
        Ok(Self {
            staging: StagingBuffer::new(config.staging_capacity),
            config,
            controller,
            observer,
            services,
            state: TransferState::new(),
            inbound: None,
            out_requested: 0,
            lifecycle: Lifecycle::Bound,
        })
    }

    /// Allocate the request buffers and arm OUT for the first command.
    pub fn enable(&mut self) -> Result<(), TransportError> {
        if self.lifecycle == Lifecycle::Halted {
            warn!("Enable after terminal action ignored");
            return Ok(());
        }
        self.inbound = Some(vec![0; self.config.ep_buffer_size]);
        self.state.reset();
        self.lifecycle = Lifecycle::Enabled;
        info!("Fastboot function enabled");

        let length = self.config.ep_buffer_size;
        self.out_requested = length;
        self.controller.queue_out(length)
    }

    /// Cancel outstanding requests and drop the request buffers.
    pub fn disable(&mut self) {
        if self.lifecycle != Lifecycle::Enabled {
            return;
        }
        self.controller.dequeue_in();
        self.inbound = None;
        self.out_requested = 0;
        self.state.reset();
        self.lifecycle = Lifecycle::Bound;
        info!("Fastboot function disabled");
    }

    /// Tear the function down and hand the collaborators back.
    pub fn unbind(mut self) -> Services {
        self.disable();
        info!("Fastboot function unbound");
        self.services
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    pub fn staging(&self) -> &StagingBuffer {
        &self.staging
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Length of the OUT request currently armed.
    pub fn out_requested(&self) -> usize {
        self.out_requested
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_halted(&self) -> bool {
        self.lifecycle == Lifecycle::Halted
    }

    /// OUT completion: a command, or a chunk of download data.
    #[instrument(skip(self, data), fields(mode = %self.state.mode, actual = data.len()))]
    pub fn on_out_complete(&mut self, status: TransferStatus, data: &[u8]) {
        if self.lifecycle != Lifecycle::Enabled {
            warn!(lifecycle = ?self.lifecycle, "OUT completion ignored");
            return;
        }
        match self.state.mode {
            TransferMode::Downloading => self.rx_download(status, data),
            TransferMode::Idle | TransferMode::Uploading => self.rx_command(status, data),
        }
        self.arm_out();
    }

    /// IN completion: runs the continuation of the request that finished.
    #[instrument(skip(self), fields(mode = %self.state.mode))]
    pub fn on_in_complete(&mut self, status: TransferStatus, actual: usize) {
        if self.lifecycle != Lifecycle::Enabled {
            warn!(lifecycle = ?self.lifecycle, "IN completion ignored");
            return;
        }
        self.state.response_in_flight = false;
        let continuation = std::mem::take(&mut self.state.in_continuation);

        if let TransferStatus::Failed(code) = status {
            match continuation {
                InContinuation::UploadChunk => {
                    error!(status = code, "Upload transfer failed");
                    self.transition(TransferState::finish_upload);
                    self.send_reply(FastbootError::TransferFailed(code).into());
                }
                InContinuation::Terminal(action) => {
                    warn!(action = %action, status = code, "Acknowledgement lost, action dropped");
                }
                InContinuation::Done => debug!(status = code, "Response transfer failed"),
            }
            return;
        }

        match continuation {
            InContinuation::Done => {}
            InContinuation::UploadChunk => self.tx_upload(actual),
            InContinuation::Terminal(action) => self.run_terminal(action),
        }
    }

    fn rx_command(&mut self, status: TransferStatus, data: &[u8]) {
        if let TransferStatus::Failed(code) = status {
            warn!(status = code, "Command transfer failed");
            return;
        }
        if self.state.mode == TransferMode::Uploading {
            warn!(
                sent = self.state.upload_bytes,
                total = self.state.upload_size,
                "Upload superseded by new command"
            );
            self.transition(TransferState::finish_upload);
        }

        let capacity = self.config.ep_buffer_size;
        if data.len() >= capacity {
            warn!(actual = data.len(), capacity = capacity, "Command overflows buffer");
            self.send_reply(FastbootError::protocol("buffer overflow").into());
            return;
        }

        let Some(inbound) = self.inbound.as_mut() else {
            return;
        };
        inbound[..data.len()].copy_from_slice(data);
        let received = &inbound[..data.len()];
        let end = received.iter().position(|&b| b == 0).unwrap_or(received.len());

        let reply = match std::str::from_utf8(&received[..end]) {
            Ok(command) => {
                self.observer.on_event(&FastbootEvent::CommandReceived {
                    command: command.to_string(),
                });
                match lookup_prefix(DISPATCH_TABLE, command) {
                    Some(kind) => {
                        debug!(command = %command, kind = ?kind, "Dispatching");
                        let mut ctx = HandlerContext {
                            config: &self.config,
                            services: &mut self.services,
                            staging: &mut self.staging,
                            state: &mut self.state,
                            observer: self.observer.as_ref(),
                        };
                        handle_command(kind, command, &mut ctx).unwrap_or_else(Reply::from)
                    }
                    None => {
                        warn!(command = %command, "Unknown command");
                        FastbootError::UnknownCommand.into()
                    }
                }
            }
            Err(_) => FastbootError::protocol("invalid command").into(),
        };
        inbound.fill(0);

        self.send_reply(reply);
    }

    fn rx_download(&mut self, status: TransferStatus, data: &[u8]) {
        if let TransferStatus::Failed(code) = status {
            error!(
                status = code,
                received = self.state.download_bytes,
                total = self.state.download_size,
                "Download transfer failed"
            );
            self.transition(TransferState::abort_download);
            self.send_reply(FastbootError::TransferFailed(code).into());
            return;
        }

        let before = self.state.download_bytes;
        let take = data.len().min(self.state.download_remaining() as usize);
        if let Err(e) = self.staging.write_at(before as usize, &data[..take]) {
            error!(error = %e, "Download chunk out of bounds");
            self.transition(TransferState::abort_download);
            self.send_reply(FastbootError::from(e).into());
            return;
        }
        self.state.download_bytes = before + take as u32;
        self.progress(
            Direction::Download,
            before,
            self.state.download_bytes,
            self.state.download_size,
        );

        if self.state.download_remaining() == 0 {
            let bytes = self.state.download_bytes;
            info!(bytes = bytes, "Download complete");
            self.observer.on_event(&FastbootEvent::TransferFinished {
                direction: Direction::Download,
                bytes: u64::from(bytes),
            });
            self.transition(TransferState::finish_download);
            self.send_reply(Reply::okay());
        }
    }

    /// Upload continuation: count the chunk that just went out, then send
    /// the next one or the closing `OKAY`.
    fn tx_upload(&mut self, actual: usize) {
        if self.state.start_upload {
            let before = self.state.upload_bytes;
            let sent = actual.min(self.state.upload_remaining() as usize) as u32;
            self.state.upload_bytes = before + sent;
            self.progress(
                Direction::Upload,
                before,
                self.state.upload_bytes,
                self.state.upload_size,
            );
        }

        let remaining = self.state.upload_remaining() as usize;
        if remaining == 0 {
            let bytes = self.state.upload_bytes;
            info!(bytes = bytes, "Upload complete");
            self.observer.on_event(&FastbootEvent::TransferFinished {
                direction: Direction::Upload,
                bytes: u64::from(bytes),
            });
            self.transition(TransferState::finish_upload);
            self.send_reply(Reply::okay());
            return;
        }

        let length = remaining.min(self.config.ep_buffer_size);
        let offset = self.state.upload_bytes as usize;
        let chunk = match self.staging.read(offset, length) {
            Ok(chunk) => chunk,
            Err(e) => {
                error!(error = %e, "Upload source out of bounds");
                self.transition(TransferState::finish_upload);
                self.send_reply(FastbootError::from(e).into());
                return;
            }
        };

        self.state.start_upload = true;
        self.state.in_continuation = InContinuation::UploadChunk;
        match self.controller.replace_in(chunk) {
            Ok(()) => self.state.response_in_flight = true,
            Err(e) => {
                error!(error = %e, "Failed to queue upload chunk");
                self.state.in_continuation = InContinuation::Done;
                self.transition(TransferState::finish_upload);
            }
        }
    }

    fn run_terminal(&mut self, action: TerminalAction) {
        self.observer
            .on_event(&FastbootEvent::TerminalAction { action });
        self.lifecycle = Lifecycle::Halted;
        info!(action = %action, "Running terminal action");

        let platform = &mut self.services.platform;
        match action {
            TerminalAction::Reset => platform.reset(),
            TerminalAction::Boot => {
                let image = self
                    .staging
                    .prefix(self.state.download_bytes as usize)
                    .unwrap_or_default();
                if let Err(e) = platform.boot(image) {
                    error!(error = %e, "Boot returned, resetting");
                }
                platform.reset();
            }
            TerminalAction::Detach => platform.detach(),
        }
    }

    /// Queue exactly one response frame, replacing anything still pending.
    fn send_reply(&mut self, reply: Reply) {
        let (response, then, frame) = match reply.response.encode() {
            Ok(frame) => (reply.response, reply.then, frame),
            Err(e) => {
                warn!(error = %e, "Response does not fit frame");
                let response = Response::fail(FastbootError::ResponseOverflow.to_string());
                match response.encode() {
                    Ok(frame) => (response, InContinuation::Done, frame),
                    Err(e) => {
                        error!(error = %e, "Cannot encode response");
                        return;
                    }
                }
            }
        };

        self.state.in_continuation = then;
        match self.controller.replace_in(frame.as_bytes()) {
            Ok(()) => {
                self.state.response_in_flight = true;
                self.observer.on_event(&FastbootEvent::ResponseQueued {
                    response: response.to_string(),
                });
            }
            Err(e) => {
                error!(error = %e, response = %response, "Failed to queue response");
                self.state.in_continuation = InContinuation::Done;
            }
        }
    }

    /// Re-arm OUT for whatever the current mode expects next.
    fn arm_out(&mut self) {
        if self.lifecycle != Lifecycle::Enabled {
            return;
        }
        let length = match self.state.mode {
            TransferMode::Downloading => self
                .state
                .rx_bytes_expected(self.config.ep_buffer_size, self.controller.out_max_packet()),
            TransferMode::Idle | TransferMode::Uploading => self.config.ep_buffer_size,
        };
        self.out_requested = length;
        if let Err(e) = self.controller.queue_out(length) {
            error!(error = %e, length = length, "Failed to arm OUT");
        }
    }

    /// Apply a state change and report the mode transition, if any.
    fn transition(&mut self, change: impl FnOnce(&mut TransferState)) {
        let from = self.state.mode;
        change(&mut self.state);
        let to = self.state.mode;
        if from != to {
            self.observer
                .on_event(&FastbootEvent::ModeChanged { from, to });
        }
    }

    fn progress(&self, direction: Direction, before: u32, after: u32, total: u32) {
        self.observer.on_event(&FastbootEvent::Progress {
            direction,
            current: u64::from(after),
            total: u64::from(total),
        });
        if let Some(line_break) = progress_mark(u64::from(before), u64::from(after)) {
            self.observer
                .on_event(&FastbootEvent::ProgressMark { line_break });
        }
    }
}
