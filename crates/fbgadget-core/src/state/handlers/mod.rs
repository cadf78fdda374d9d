//! Command handlers - one per dispatch table entry.
//!
//! This module is split into submodules by functionality:
//! - `getvar`: Variable resolver
//! - `transfer`: `download:` and `upload` set-up
//! - `control`: reboot, boot, continue, set_active
//! - `flashing`: lock state, flash, erase
//! - `oem`: vendor sub-commands

mod control;
mod flashing;
mod getvar;
mod oem;
mod transfer;

use crate::backend::Services;
use crate::config::EngineConfig;
use crate::error::FastbootError;
use crate::events::{FastbootEvent, FastbootObserver};
use crate::protocol::{CommandKind, Response, split_arg};
use crate::staging::StagingBuffer;
use crate::state::machine::{InContinuation, TransferMode, TransferState};

pub use oem::{OEM_COMMANDS, OemCommand};

/// Outcome of a command: the one response to queue, and what its
/// completion leads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: Response,
    pub then: InContinuation,
}

impl Reply {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            then: InContinuation::Done,
        }
    }

    pub fn okay() -> Self {
        Self::new(Response::okay())
    }

    pub fn okay_with(info: impl Into<String>) -> Self {
        Self::new(Response::okay_with(info))
    }

    pub fn data(size: u32) -> Self {
        Self::new(Response::Data(size))
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self::new(Response::fail(reason))
    }

    /// Install the continuation for this response's completion.
    pub fn then(mut self, continuation: InContinuation) -> Self {
        self.then = continuation;
        self
    }
}

impl From<FastbootError> for Reply {
    fn from(err: FastbootError) -> Self {
        Reply::fail(err.to_string())
    }
}

/// Handler context containing everything a command may touch.
pub struct HandlerContext<'a, O: FastbootObserver> {
    pub config: &'a EngineConfig,
    pub services: &'a mut Services,
    pub staging: &'a mut StagingBuffer,
    pub state: &'a mut TransferState,
    pub observer: &'a O,
}

impl<'a, O: FastbootObserver> HandlerContext<'a, O> {
    pub(crate) fn emit(&self, event: FastbootEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn goto_mode(&mut self, to: TransferMode) {
        let from = self.state.goto_mode(to);
        if from != to {
            self.emit(FastbootEvent::ModeChanged { from, to });
        }
    }
}

/// Bytes of the last download, as staged for collaborators.
pub(crate) fn downloaded<'s>(
    staging: &'s StagingBuffer,
    state: &TransferState,
) -> Result<&'s [u8], FastbootError> {
    Ok(staging.prefix(state.download_bytes as usize)?)
}

/// Non-empty argument after the first `:`.
pub(crate) fn required_arg<'c>(
    command: &'c str,
    missing: &'static str,
) -> Result<&'c str, FastbootError> {
    match split_arg(command) {
        (_, Some(arg)) if !arg.is_empty() => Ok(arg),
        _ => Err(FastbootError::protocol(missing)),
    }
}

/// Run the handler for `kind`.
pub fn handle_command<O: FastbootObserver>(
    kind: CommandKind,
    command: &str,
    ctx: &mut HandlerContext<'_, O>,
) -> Result<Reply, FastbootError> {
    match kind {
        CommandKind::Reboot => control::handle_reboot(ctx, command),
        CommandKind::GetVar => getvar::handle_getvar(ctx, command),
        CommandKind::Download => transfer::handle_download(ctx, command),
        CommandKind::Upload => transfer::handle_upload(ctx),
        CommandKind::Boot => control::handle_boot(ctx),
        CommandKind::Continue => control::handle_continue(ctx),
        CommandKind::SetActive => control::handle_set_active(ctx, command),
        CommandKind::Flashing => flashing::handle_flashing(ctx, command),
        CommandKind::Flash => flashing::handle_flash(ctx, command),
        CommandKind::Erase => flashing::handle_erase(ctx, command),
        CommandKind::Oem => oem::handle_oem(ctx, command),
    }
}
