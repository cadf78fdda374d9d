//! Device lock state (`flashing ...`) and partition writes (`flash:`,
//! `erase:`).

use tracing::{error, info, warn};

use crate::backend::FlashLockState;
use crate::error::FastbootError;
use crate::events::FastbootObserver;
use crate::protocol::lookup_word;

use super::{HandlerContext, Reply, downloaded, required_arg};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlashingCommand {
    Lock,
    Unlock,
    LockCritical,
    UnlockCritical,
    GetUnlockAbility,
    GetUnlockBootloaderNonce,
    UnlockBootloader,
    LockBootloader,
}

const FLASHING_COMMANDS: &[(&str, FlashingCommand)] = &[
    ("lock", FlashingCommand::Lock),
    ("unlock", FlashingCommand::Unlock),
    ("lock_critical", FlashingCommand::LockCritical),
    ("unlock_critical", FlashingCommand::UnlockCritical),
    ("get_unlock_ability", FlashingCommand::GetUnlockAbility),
    ("get_unlock_bootloader_nonce", FlashingCommand::GetUnlockBootloaderNonce),
    ("unlock_bootloader", FlashingCommand::UnlockBootloader),
    ("lock_bootloader", FlashingCommand::LockBootloader),
];

pub fn handle_flashing<O: FastbootObserver>(
    ctx: &mut HandlerContext<'_, O>,
    command: &str,
) -> Result<Reply, FastbootError> {
    let sub = command.strip_prefix("flashing").unwrap_or(command).trim();
    let Some(sub_command) = lookup_word(FLASHING_COMMANDS, sub) else {
        warn!(command = %command, "Unknown flashing command");
        return Err(FastbootError::protocol("unknown flashing command"));
    };

    let state = match sub_command {
        FlashingCommand::Lock => FlashLockState::Locked,
        FlashingCommand::Unlock => FlashLockState::Unlocked,
        _ => return Err(FastbootError::UnsupportedOperation),
    };
    let lock = ctx
        .services
        .lock
        .as_mut()
        .ok_or(FastbootError::UnsupportedOperation)?;
    lock.set_flash_lock_state(state)?;
    info!(state = ?state, "Flash lock state changed");
    Ok(Reply::okay())
}

pub fn handle_flash<O: FastbootObserver>(
    ctx: &mut HandlerContext<'_, O>,
    command: &str,
) -> Result<Reply, FastbootError> {
    if let Some(lock) = ctx.services.lock.as_ref() {
        match lock.flash_lock_state() {
            Ok(FlashLockState::Unlocked) => {}
            Ok(FlashLockState::Locked) => {
                return Err(FastbootError::refused("The device is locked, can not flash!"));
            }
            Err(e) => {
                error!(error = %e, "Cannot read flash lock state");
                return Err(e.into());
            }
        }
    }

    let partition = required_arg(command, "missing partition name")?;
    let flash = ctx
        .services
        .flash
        .as_mut()
        .ok_or(FastbootError::BackendUnavailable("no flash device defined"))?;
    let image = downloaded(ctx.staging, ctx.state)?;

    info!(partition = %partition, bytes = image.len(), "Flashing");
    flash.write(partition, image).map_err(|e| {
        error!(partition = %partition, error = %e, "Flash write failed");
        FastbootError::from(e)
    })?;
    Ok(Reply::okay())
}

pub fn handle_erase<O: FastbootObserver>(
    ctx: &mut HandlerContext<'_, O>,
    command: &str,
) -> Result<Reply, FastbootError> {
    let partition = required_arg(command, "missing partition name")?;
    let flash = ctx
        .services
        .flash
        .as_mut()
        .ok_or(FastbootError::BackendUnavailable("no flash device defined"))?;

    info!(partition = %partition, "Erasing");
    flash.erase(partition).map_err(|e| {
        error!(partition = %partition, error = %e, "Erase failed");
        FastbootError::from(e)
    })?;
    Ok(Reply::okay())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use crate::backend::{
        FlashLockState, MemoryFlash, MemoryLock, RecordingPlatform, Services, VbootLockState,
    };
    use crate::protocol::Response;

    fn with_flash(flash: &MemoryFlash, lock: Option<&MemoryLock>) -> Fixture {
        let mut services = Services::new(RecordingPlatform::new())
            .with_partitions(flash.clone())
            .with_flash(flash.clone());
        if let Some(lock) = lock {
            services = services.with_lock(lock.clone());
        }
        Fixture::new(services)
    }

    #[test]
    fn test_flash_writes_downloaded_prefix() {
        let flash = MemoryFlash::new().with_partition("boot", 0x100, "raw");
        let mut fx = with_flash(&flash, None);
        fx.staging.write_at(0, &[0xee; 64]).unwrap();
        fx.stage(b"kernel");

        assert_eq!(fx.run("flash:boot").response, Response::okay());
        assert_eq!(flash.image("boot"), Some(b"kernel".to_vec()));
    }

    #[test]
    fn test_flash_reports_backend_errors_verbatim() {
        let flash = MemoryFlash::new().with_partition("boot", 4, "raw");
        let mut fx = with_flash(&flash, None);
        fx.stage(b"too long");
        assert_eq!(
            fx.run("flash:boot").response,
            Response::fail("too large for partition")
        );
        assert_eq!(
            fx.run("flash:misc").response,
            Response::fail("partition does not exist")
        );
    }

    #[test]
    fn test_flash_write_failure() {
        let flash = MemoryFlash::new().with_partition("boot", 0x1000, "raw");
        let mut fx = with_flash(&flash, None);
        fx.stage(b"image");
        flash.fail_writes("mmc write error");
        assert_eq!(fx.run("flash:boot").response, Response::fail("mmc write error"));
        assert_eq!(flash.image("boot"), None);
    }

    #[test]
    fn test_flash_without_backend() {
        let mut fx = Fixture::bare();
        assert_eq!(
            fx.run("flash:boot").response,
            Response::fail("no flash device defined")
        );
        assert_eq!(
            fx.run("erase:boot").response,
            Response::fail("no flash device defined")
        );
    }

    #[test]
    fn test_flash_missing_partition() {
        let flash = MemoryFlash::new();
        let mut fx = with_flash(&flash, None);
        assert_eq!(fx.run("flash:").response, Response::fail("missing partition name"));
        assert_eq!(fx.run("flash").response, Response::fail("missing partition name"));
    }

    #[test]
    fn test_flash_refused_when_locked() {
        let flash = MemoryFlash::new().with_partition("boot", 0x100, "raw");
        let lock = MemoryLock::new(FlashLockState::Locked, VbootLockState::Locked);
        let mut fx = with_flash(&flash, Some(&lock));
        fx.stage(b"kernel");
        assert_eq!(
            fx.run("flash:boot").response,
            Response::fail("The device is locked, can not flash!")
        );
        assert_eq!(flash.image("boot"), None);

        lock.fail_reads();
        assert_eq!(fx.run("flash:boot").response, Response::fail("lock state unreadable"));
    }

    #[test]
    fn test_erase() {
        let flash = MemoryFlash::new().with_partition("userdata", 0x100, "ext4");
        let mut fx = with_flash(&flash, None);
        fx.stage(b"data");
        fx.run("flash:userdata");
        assert!(flash.image("userdata").is_some());

        assert_eq!(fx.run("erase:userdata").response, Response::okay());
        assert_eq!(flash.image("userdata"), None);
        assert_eq!(
            fx.run("erase:cache").response,
            Response::fail("partition does not exist")
        );
    }

    #[test]
    fn test_flashing_lock_unlock() {
        let flash = MemoryFlash::new();
        let lock = MemoryLock::unlocked();
        let mut fx = with_flash(&flash, Some(&lock));

        assert_eq!(fx.run("flashing lock").response, Response::okay());
        assert_eq!(lock.flash_state(), FlashLockState::Locked);
        assert_eq!(fx.run("flashing unlock").response, Response::okay());
        assert_eq!(lock.flash_state(), FlashLockState::Unlocked);
    }

    #[test]
    fn test_flashing_matches_whole_words() {
        let lock = MemoryLock::unlocked();
        let mut fx = Fixture::new(Services::new(RecordingPlatform::new()).with_lock(lock.clone()));

        assert_eq!(
            fx.run("flashing lockdown").response,
            Response::fail("unknown flashing command")
        );
        assert_eq!(
            fx.run("flashing unlock_critical").response,
            Response::fail("not implemented")
        );
        assert_eq!(
            fx.run("flashing get_unlock_ability").response,
            Response::fail("not implemented")
        );
        assert_eq!(fx.run("flashing").response, Response::fail("unknown flashing command"));
        assert_eq!(lock.flash_state(), FlashLockState::Unlocked);
    }

    #[test]
    fn test_flashing_without_lock_control() {
        let mut fx = Fixture::bare();
        assert_eq!(fx.run("flashing lock").response, Response::fail("not implemented"));
    }
}
