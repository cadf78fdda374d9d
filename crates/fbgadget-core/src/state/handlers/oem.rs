//! `oem <subcommand>` - vendor extensions.
//!
//! Provisioning commands consume the last download from the staging
//! buffer; `at-get-ca-request` leaves its output there for `upload`.

use tracing::{error, info, warn};

use crate::backend::{LockControl, VbootLockState};
use crate::error::FastbootError;
use crate::events::FastbootObserver;
use crate::protocol::constants::{PERM_ATTR_SIZE, PERM_ATTR_TOTAL_SIZE, VBOOT_KEY_HASH_SIZE};
use crate::protocol::lookup_word;

use super::{HandlerContext, Reply, downloaded};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OemCommand {
    /// Rewrite the partition table.
    Format,
    Unlock,
    AtGetCaRequest,
    AtSetCaResponse,
    AtLockVboot,
    AtUnlockVboot,
    AtDisableUnlockVboot,
    /// Provision permanent attributes and their digest.
    FusePermAttr,
    FuseVbootKey,
}

/// Sub-command table, matched word-wise against the text after `oem`.
pub const OEM_COMMANDS: &[(&str, OemCommand)] = &[
    ("format", OemCommand::Format),
    ("unlock", OemCommand::Unlock),
    ("at-get-ca-request", OemCommand::AtGetCaRequest),
    ("at-set-ca-response", OemCommand::AtSetCaResponse),
    ("at-lock-vboot", OemCommand::AtLockVboot),
    ("at-unlock-vboot", OemCommand::AtUnlockVboot),
    ("at-disable-unlock-vboot", OemCommand::AtDisableUnlockVboot),
    ("fuse at-perm-attr", OemCommand::FusePermAttr),
    ("fuse at-bootloader-vboot-key", OemCommand::FuseVbootKey),
];

pub fn handle_oem<O: FastbootObserver>(
    ctx: &mut HandlerContext<'_, O>,
    command: &str,
) -> Result<Reply, FastbootError> {
    let sub = command.strip_prefix("oem").unwrap_or(command).trim();
    let Some(oem) = lookup_word(OEM_COMMANDS, sub) else {
        warn!(command = %command, "Unknown oem command");
        return Err(FastbootError::protocol("unknown oem command"));
    };
    info!(oem = ?oem, "OEM command");

    match oem {
        OemCommand::Format => {
            let flash = ctx
                .services
                .flash
                .as_mut()
                .ok_or(FastbootError::BackendUnavailable("no flash device defined"))?;
            flash.write_partition_table()?;
        }
        OemCommand::Unlock => return Err(FastbootError::UnsupportedOperation),
        OemCommand::AtGetCaRequest => ca_request(ctx)?,
        OemCommand::AtSetCaResponse => {
            let attestation = ctx
                .services
                .attestation
                .as_mut()
                .ok_or(FastbootError::UnsupportedOperation)?;
            let response = downloaded(ctx.staging, ctx.state)?;
            attestation.set_ca_response(response).map_err(|e| {
                error!(error = %e, "Attestation rejected CA response");
                FastbootError::backend("attestation CA response failed")
            })?;
        }
        OemCommand::AtLockVboot => lock(ctx)?.set_vboot_lock_state(VbootLockState::Locked)?,
        OemCommand::AtUnlockVboot => {
            let lock = lock(ctx)?;
            if lock.vboot_lock_state()? == VbootLockState::UnlockDisabled {
                return Err(FastbootError::refused("The vboot is disable!"));
            }
            lock.set_vboot_lock_state(VbootLockState::Unlocked)?;
        }
        OemCommand::AtDisableUnlockVboot => {
            lock(ctx)?.set_vboot_lock_state(VbootLockState::UnlockDisabled)?
        }
        OemCommand::FusePermAttr => {
            let lock = ctx
                .services
                .lock
                .as_mut()
                .ok_or(FastbootError::UnsupportedOperation)?;
            let payload = downloaded(ctx.staging, ctx.state)?;
            if payload.len() != PERM_ATTR_TOTAL_SIZE {
                return Err(FastbootError::protocol("invalid permanent attribute size"));
            }
            let (attributes, digest) = payload.split_at(PERM_ATTR_SIZE);
            lock.write_permanent_attributes(attributes)?;
            lock.write_attribute_hash(digest)?;
            lock.set_perm_attr_provisioned()?;
        }
        OemCommand::FuseVbootKey => {
            let lock = ctx
                .services
                .lock
                .as_mut()
                .ok_or(FastbootError::UnsupportedOperation)?;
            let payload = downloaded(ctx.staging, ctx.state)?;
            if payload.len() != VBOOT_KEY_HASH_SIZE {
                return Err(FastbootError::protocol("invalid vboot key size"));
            }
            lock.write_vboot_key_hash(payload)?;
        }
    }
    Ok(Reply::okay())
}

fn lock<'c, O: FastbootObserver>(
    ctx: &'c mut HandlerContext<'_, O>,
) -> Result<&'c mut Box<dyn LockControl>, FastbootError> {
    ctx.services
        .lock
        .as_mut()
        .ok_or(FastbootError::UnsupportedOperation)
}

/// Hand the staged operation to the attestation service and stage its
/// request for the host to read back.
fn ca_request<O: FastbootObserver>(ctx: &mut HandlerContext<'_, O>) -> Result<(), FastbootError> {
    let attestation = ctx
        .services
        .attestation
        .as_mut()
        .ok_or(FastbootError::UnsupportedOperation)?;
    let operation = downloaded(ctx.staging, ctx.state)?;
    let request = attestation.ca_request(operation).map_err(|e| {
        error!(error = %e, "Attestation CA request failed");
        FastbootError::backend("attestation CA request failed")
    })?;
    let size = u32::try_from(request.len()).map_err(|_| FastbootError::TransferTooLarge)?;

    ctx.staging.write_at(0, &request)?;
    ctx.state.upload_size = size;
    ctx.state.upload_bytes = 0;
    info!(bytes = size, "CA request staged for upload");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use crate::backend::{
        FlashLockState, MemoryAttestation, MemoryFlash, MemoryLock, RecordingPlatform, Services,
        VbootLockState,
    };
    use crate::protocol::Response;
    use crate::protocol::constants::{PERM_ATTR_SIZE, PERM_ATTR_TOTAL_SIZE};

    fn with_lock(lock: &MemoryLock) -> Fixture {
        Fixture::new(Services::new(RecordingPlatform::new()).with_lock(lock.clone()))
    }

    #[test]
    fn test_unknown_oem_command() {
        let mut fx = Fixture::bare();
        assert_eq!(fx.run("oem frob").response, Response::fail("unknown oem command"));
        assert_eq!(fx.run("oem").response, Response::fail("unknown oem command"));
        assert_eq!(
            fx.run("oem formatting").response,
            Response::fail("unknown oem command")
        );
        assert_eq!(fx.run("oem unlock").response, Response::fail("not implemented"));
    }

    #[test]
    fn test_format() {
        let flash = MemoryFlash::new();
        let mut fx = Fixture::new(Services::new(RecordingPlatform::new()).with_flash(flash.clone()));
        assert_eq!(fx.run("oem format").response, Response::okay());
        assert_eq!(flash.partition_table_writes(), 1);

        let mut bare = Fixture::bare();
        assert_eq!(
            bare.run("oem format").response,
            Response::fail("no flash device defined")
        );
    }

    #[test]
    fn test_ca_request_is_staged_for_upload() {
        let mut fx = Fixture::new(
            Services::new(RecordingPlatform::new())
                .with_attestation(MemoryAttestation::new(None, None)),
        );
        fx.stage(b"op");
        assert_eq!(fx.run("oem at-get-ca-request").response, Response::okay());

        let expected = b"CA-REQ:op";
        assert_eq!(fx.state.upload_size, expected.len() as u32);
        assert_eq!(fx.staging.prefix(expected.len()).unwrap(), expected);
    }

    #[test]
    fn test_ca_request_failure() {
        let mut fx = Fixture::new(
            Services::new(RecordingPlatform::new())
                .with_attestation(MemoryAttestation::new(None, None)),
        );
        assert_eq!(
            fx.run("oem at-get-ca-request").response,
            Response::fail("attestation CA request failed")
        );
        assert_eq!(fx.state.upload_size, 0);
    }

    #[test]
    fn test_ca_response() {
        let attestation = MemoryAttestation::new(None, None);
        let mut fx = Fixture::new(
            Services::new(RecordingPlatform::new()).with_attestation(attestation.clone()),
        );
        assert_eq!(
            fx.run("oem at-set-ca-response").response,
            Response::fail("attestation CA response failed")
        );
        fx.stage(b"signed");
        assert_eq!(fx.run("oem at-set-ca-response").response, Response::okay());
        assert_eq!(attestation.ca_responses(), vec![b"signed".to_vec()]);
    }

    #[test]
    fn test_attestation_absent() {
        let mut fx = Fixture::bare();
        assert_eq!(
            fx.run("oem at-get-ca-request").response,
            Response::fail("not implemented")
        );
    }

    #[test]
    fn test_vboot_lock_transitions() {
        let lock = MemoryLock::unlocked();
        let mut fx = with_lock(&lock);

        assert_eq!(fx.run("oem at-lock-vboot").response, Response::okay());
        assert_eq!(lock.vboot_state(), VbootLockState::Locked);
        assert_eq!(fx.run("oem at-unlock-vboot").response, Response::okay());
        assert_eq!(lock.vboot_state(), VbootLockState::Unlocked);

        assert_eq!(fx.run("oem at-disable-unlock-vboot").response, Response::okay());
        assert_eq!(
            fx.run("oem at-unlock-vboot").response,
            Response::fail("The vboot is disable!")
        );
        assert_eq!(lock.vboot_state(), VbootLockState::UnlockDisabled);
    }

    #[test]
    fn test_vboot_without_lock_control() {
        let mut fx = Fixture::bare();
        assert_eq!(fx.run("oem at-lock-vboot").response, Response::fail("not implemented"));
    }

    #[test]
    fn test_fuse_perm_attr() {
        let lock = MemoryLock::new(FlashLockState::Unlocked, VbootLockState::Unlocked);
        let mut fx = with_lock(&lock);

        let mut payload = vec![0x11; PERM_ATTR_SIZE];
        payload.extend_from_slice(&[0x22; 32]);
        assert_eq!(payload.len(), PERM_ATTR_TOTAL_SIZE);
        fx.stage(&payload);

        assert_eq!(fx.run("oem fuse at-perm-attr").response, Response::okay());
        assert_eq!(lock.perm_attrs(), Some(vec![0x11; PERM_ATTR_SIZE]));
        assert_eq!(lock.attr_hash(), Some(vec![0x22; 32]));
        assert!(lock.perm_attr_provisioned());
    }

    #[test]
    fn test_fuse_perm_attr_wrong_size() {
        let lock = MemoryLock::unlocked();
        let mut fx = with_lock(&lock);
        fx.stage(&[0u8; PERM_ATTR_TOTAL_SIZE - 1]);
        assert_eq!(
            fx.run("oem fuse at-perm-attr").response,
            Response::fail("invalid permanent attribute size")
        );
        assert!(!lock.perm_attr_provisioned());
    }

    #[test]
    fn test_fuse_vboot_key() {
        let lock = MemoryLock::unlocked();
        let mut fx = with_lock(&lock);
        fx.stage(&[0x5a; 31]);
        assert_eq!(
            fx.run("oem fuse at-bootloader-vboot-key").response,
            Response::fail("invalid vboot key size")
        );
        assert_eq!(lock.vboot_key_hash(), None);

        fx.stage(&[0x5a; 32]);
        assert_eq!(
            fx.run("oem fuse at-bootloader-vboot-key").response,
            Response::okay()
        );
        assert_eq!(lock.vboot_key_hash(), Some(vec![0x5a; 32]));
    }
}
