//! `download:<hex size>` and `upload` set-up. The data phases themselves
//! run in the engine's completion handlers.

use tracing::{info, warn};

use crate::error::FastbootError;
use crate::events::FastbootObserver;
use crate::protocol::{parse_hex_size, split_arg};
use crate::state::machine::{InContinuation, TransferMode};

use super::{HandlerContext, Reply};

pub fn handle_download<O: FastbootObserver>(
    ctx: &mut HandlerContext<'_, O>,
    command: &str,
) -> Result<Reply, FastbootError> {
    let size = match split_arg(command) {
        (_, Some(arg)) => parse_hex_size(arg),
        (_, None) => Some(0),
    };
    ctx.state.download_bytes = 0;
    ctx.state.upload_size = 0;
    ctx.state.upload_bytes = 0;

    let size = match size {
        Some(0) => return Err(FastbootError::InvalidTransferSize),
        Some(size) if size <= ctx.staging.capacity() as u64 => size as u32,
        _ => {
            warn!(
                command = %command,
                capacity = ctx.staging.capacity(),
                "Download larger than staging buffer"
            );
            ctx.state.download_size = 0;
            return Err(FastbootError::TransferTooLarge);
        }
    };

    info!(size = size, "Starting download");
    ctx.state.download_size = size;
    ctx.goto_mode(TransferMode::Downloading);
    Ok(Reply::data(size))
}

pub fn handle_upload<O: FastbootObserver>(
    ctx: &mut HandlerContext<'_, O>,
) -> Result<Reply, FastbootError> {
    // The engine closes a running upload before dispatching any command,
    // so a repeated `upload` lands here with no source and fails.
    let size = ctx.state.upload_size;
    if size == 0 {
        return Err(FastbootError::InvalidTransferSize);
    }

    info!(size = size, "Starting upload");
    ctx.state.start_upload = false;
    ctx.state.upload_bytes = 0;
    ctx.goto_mode(TransferMode::Uploading);
    Ok(Reply::data(size).then(InContinuation::UploadChunk))
}
