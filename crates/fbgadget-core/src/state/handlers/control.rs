//! Reboot, boot, continue and slot selection.
//!
//! The terminal commands only acknowledge here; the action itself runs
//! once the `OKAY` has left the device.

use tracing::{error, info};

use crate::error::FastbootError;
use crate::events::FastbootObserver;
use crate::state::machine::{InContinuation, TerminalAction};

use super::{HandlerContext, Reply, required_arg};

pub fn handle_reboot<O: FastbootObserver>(
    ctx: &mut HandlerContext<'_, O>,
    command: &str,
) -> Result<Reply, FastbootError> {
    if command == "reboot-bootloader" {
        if let Err(e) = ctx.services.platform.set_reboot_flag() {
            error!(error = %e, "Failed to set reboot flag");
            return Err(FastbootError::backend("Cannot set reboot flag"));
        }
        info!("Reboot flag set, next boot stays in the bootloader");
    }
    Ok(Reply::okay().then(InContinuation::Terminal(TerminalAction::Reset)))
}

pub fn handle_boot<O: FastbootObserver>(
    _ctx: &mut HandlerContext<'_, O>,
) -> Result<Reply, FastbootError> {
    Ok(Reply::okay().then(InContinuation::Terminal(TerminalAction::Boot)))
}

pub fn handle_continue<O: FastbootObserver>(
    _ctx: &mut HandlerContext<'_, O>,
) -> Result<Reply, FastbootError> {
    Ok(Reply::okay().then(InContinuation::Terminal(TerminalAction::Detach)))
}

pub fn handle_set_active<O: FastbootObserver>(
    ctx: &mut HandlerContext<'_, O>,
    command: &str,
) -> Result<Reply, FastbootError> {
    let name = required_arg(command, "missing slot name")?;
    let slots = ctx
        .services
        .slots
        .as_mut()
        .ok_or(FastbootError::UnsupportedOperation)?;

    let mut chars = name.chars();
    let slot = match (chars.next(), chars.next()) {
        (Some(slot), None) if slots.slot_suffixes().contains(&slot) => slot,
        _ => return Err(FastbootError::protocol("unknown slot name")),
    };

    slots.set_active(slot)?;
    info!(slot = %slot, "Active slot changed");
    Ok(Reply::okay())
}
