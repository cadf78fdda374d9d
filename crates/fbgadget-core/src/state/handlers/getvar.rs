//! `getvar:<name>` - variable resolver.
//!
//! Plain variables match the whole name. Parameterised ones
//! (`has-slot:<p>`, `partition-size:<p>`, ...) match the part before the
//! first `:`. Anything else falls back to `fastboot.<name>` in the
//! environment.

use tracing::{debug, warn};

use crate::backend::{FlashLockState, SlotControl};
use crate::error::FastbootError;
use crate::events::FastbootObserver;
use crate::protocol::constants::{ENV_SERIALNO, ENV_VAR_PREFIX, FASTBOOT_VERSION, SLOTTED_PARTITIONS};
use crate::protocol::{Response, split_arg};

use super::{HandlerContext, Reply};

pub fn handle_getvar<O: FastbootObserver>(
    ctx: &mut HandlerContext<'_, O>,
    command: &str,
) -> Result<Reply, FastbootError> {
    let name = match split_arg(command) {
        (_, Some(name)) if !name.is_empty() => name,
        _ => return Err(FastbootError::protocol("missing var")),
    };
    debug!(name = %name, "getvar");

    let value = resolve(ctx, name)?;
    let response = Response::okay_with(value);
    // Refuse rather than truncate a value that does not fit the frame.
    response.encode()?;
    Ok(Reply::new(response))
}

fn resolve<O: FastbootObserver>(
    ctx: &mut HandlerContext<'_, O>,
    name: &str,
) -> Result<String, FastbootError> {
    let board = &ctx.config.board;
    let value = match name {
        "version" => FASTBOOT_VERSION.to_string(),
        "bootloader-version" => board.bootloader_version.clone(),
        "product" => board.product.clone(),
        "variant" => board.variant.clone(),
        "secure" => board.secure.clone(),
        "unlocked" => unlocked(ctx)?,
        "off-mode-charge" => board.off_mode_charge.clone(),
        "battery-voltage" => board.battery_voltage.clone(),
        "battery-soc-ok" => board.battery_soc_ok.clone(),
        "max-download-size" | "downloadsize" => format!("0x{:08x}", ctx.staging.capacity()),
        "serialno" => env(ctx, ENV_SERIALNO).ok_or_else(|| FastbootError::backend("Value not set"))?,
        "at-attest-dh" => {
            let attestation = ctx
                .services
                .attestation
                .as_ref()
                .ok_or(FastbootError::UnsupportedOperation)?;
            attestation
                .dh()
                .map_err(|_| FastbootError::backend("dh not set"))?
        }
        "at-attest-uuid" => {
            let attestation = ctx
                .services
                .attestation
                .as_ref()
                .ok_or(FastbootError::UnsupportedOperation)?;
            attestation
                .uuid()
                .map_err(|_| FastbootError::backend("uuid not set"))?
        }
        "at-vboot-state" => String::new(),
        "slot-count" => slots(ctx)?.slot_count().to_string(),
        "current-slot" => slots(ctx)?
            .current_slot()
            .map_err(|_| FastbootError::backend("geterror"))?
            .to_string(),
        "slot-suffixes" => slots(ctx)?
            .slot_suffixes()
            .iter()
            .map(|suffix| format!("{suffix},"))
            .collect(),
        _ => return resolve_parameterised(ctx, name),
    };
    Ok(value)
}

fn resolve_parameterised<O: FastbootObserver>(
    ctx: &mut HandlerContext<'_, O>,
    name: &str,
) -> Result<String, FastbootError> {
    let (key, arg) = split_arg(name);
    let arg = arg.filter(|a| !a.is_empty());
    match key {
        "has-slot" => {
            slots(ctx)?;
            let partition = arg.ok_or_else(|| FastbootError::protocol("missing partition name"))?;
            if SLOTTED_PARTITIONS.contains(&partition) {
                Ok("yes".to_string())
            } else {
                Err(FastbootError::refused("no"))
            }
        }
        "slot-unbootable" | "slot-successful" => {
            known_slot(ctx, arg)?;
            Ok("no".to_string())
        }
        "slot-retry-count" => {
            let slot = known_slot(ctx, arg)?;
            // Reading decrements the counter; kept as observed on devices.
            let count = ctx.state.slot_retry_counts.entry(slot).or_insert(0);
            let value = count.to_string();
            *count = count.saturating_sub(1);
            Ok(value)
        }
        "partition-type" | "partition-size" => {
            let partition = arg.ok_or_else(|| FastbootError::protocol("missing partition name"))?;
            let table = ctx
                .services
                .partitions
                .as_ref()
                .ok_or(FastbootError::BackendUnavailable("block device not found"))?;
            let info = table
                .find(partition)
                .ok_or_else(|| FastbootError::backend("partition not found"))?;
            if key == "partition-type" {
                Ok(info.type_name)
            } else {
                Ok(format!("0x{:016x}", info.size))
            }
        }
        _ => {
            let key = format!("{ENV_VAR_PREFIX}{name}");
            env(ctx, &key).ok_or_else(|| {
                warn!(name = %name, "Unknown variable");
                FastbootError::UnknownVariable
            })
        }
    }
}

fn env<O: FastbootObserver>(ctx: &HandlerContext<'_, O>, key: &str) -> Option<String> {
    ctx.services.env.as_ref().and_then(|env| env.get(key))
}

fn slots<'c, O: FastbootObserver>(
    ctx: &'c HandlerContext<'_, O>,
) -> Result<&'c dyn SlotControl, FastbootError> {
    ctx.services
        .slots
        .as_deref()
        .ok_or(FastbootError::UnsupportedOperation)
}

/// Slot named by `arg`, which must be one of the device's suffixes.
fn known_slot<O: FastbootObserver>(
    ctx: &HandlerContext<'_, O>,
    arg: Option<&str>,
) -> Result<char, FastbootError> {
    let suffixes = slots(ctx)?.slot_suffixes();
    let mut chars = arg.unwrap_or("").chars();
    match (chars.next(), chars.next()) {
        (Some(slot), None) if suffixes.contains(&slot) => Ok(slot),
        _ => Err(FastbootError::refused("no")),
    }
}

fn unlocked<O: FastbootObserver>(ctx: &HandlerContext<'_, O>) -> Result<String, FastbootError> {
    let Some(lock) = ctx.services.lock.as_ref() else {
        return Ok(ctx.config.board.unlocked.clone());
    };
    let unlocked = match lock.flash_lock_state()? {
        FlashLockState::Unlocked => "yes",
        FlashLockState::Locked => "no",
    };
    Ok(unlocked.to_string())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use crate::backend::{
        FlashLockState, MemoryAttestation, MemoryEnv, MemoryFlash, MemoryLock, MemorySlots,
        RecordingPlatform, Services, VbootLockState,
    };
    use crate::protocol::Response;

    fn full() -> Fixture {
        let flash = MemoryFlash::new()
            .with_partition("boot", 0x2000000, "raw")
            .with_partition("system", 0x80000000, "ext4");
        Fixture::new(
            Services::new(RecordingPlatform::new())
                .with_env(
                    MemoryEnv::new()
                        .with("serial#", "0123456789ABCDEF")
                        .with("fastboot.battery-level", "88"),
                )
                .with_partitions(flash.clone())
                .with_flash(flash)
                .with_slots(MemorySlots::ab())
                .with_lock(MemoryLock::new(FlashLockState::Locked, VbootLockState::Locked))
                .with_attestation(MemoryAttestation::new(Some("dh-0001"), None)),
        )
    }

    fn var(fixture: &mut Fixture, name: &str) -> Response {
        fixture.run(&format!("getvar:{name}")).response
    }

    #[test]
    fn test_static_variables() {
        let mut fx = Fixture::bare();
        assert_eq!(var(&mut fx, "version"), Response::okay_with("0.4"));
        assert_eq!(var(&mut fx, "variant"), Response::okay_with("userdebug"));
        assert_eq!(var(&mut fx, "secure"), Response::okay_with("no"));
        assert_eq!(var(&mut fx, "unlocked"), Response::okay_with("yes"));
        assert_eq!(var(&mut fx, "battery-voltage"), Response::okay_with("7.4"));
        assert_eq!(var(&mut fx, "at-vboot-state"), Response::okay());
    }

    #[test]
    fn test_download_size_is_fixed_width_hex() {
        let mut fx = Fixture::bare();
        assert_eq!(var(&mut fx, "max-download-size"), Response::okay_with("0x00010000"));
        assert_eq!(var(&mut fx, "downloadsize"), Response::okay_with("0x00010000"));
    }

    #[test]
    fn test_missing_name() {
        let mut fx = Fixture::bare();
        assert_eq!(fx.run("getvar:").response, Response::fail("missing var"));
    }

    #[test]
    fn test_environment_fallback() {
        let mut fx = full();
        assert_eq!(var(&mut fx, "battery-level"), Response::okay_with("88"));
        assert_eq!(
            var(&mut fx, "not-a-real-var"),
            Response::fail("Variable not implemented")
        );
        assert_eq!(var(&mut fx, "serialno"), Response::okay_with("0123456789ABCDEF"));
    }

    #[test]
    fn test_plain_names_match_exactly() {
        let mut fx = Fixture::bare();
        assert_eq!(
            var(&mut fx, "version-baseband"),
            Response::fail("Variable not implemented")
        );
        assert_eq!(var(&mut fx, "serialno"), Response::fail("Value not set"));
    }

    #[test]
    fn test_slot_variables() {
        let mut fx = full();
        assert_eq!(var(&mut fx, "slot-count"), Response::okay_with("2"));
        assert_eq!(var(&mut fx, "current-slot"), Response::okay_with("a"));
        assert_eq!(var(&mut fx, "slot-suffixes"), Response::okay_with("a,b,"));
        assert_eq!(var(&mut fx, "has-slot:boot"), Response::okay_with("yes"));
        assert_eq!(var(&mut fx, "has-slot:userdata"), Response::fail("no"));
        assert_eq!(var(&mut fx, "slot-unbootable:b"), Response::okay_with("no"));
        assert_eq!(var(&mut fx, "slot-successful:c"), Response::fail("no"));
        assert_eq!(var(&mut fx, "slot-retry-count:a"), Response::okay_with("0"));
    }

    #[test]
    fn test_slot_retry_count_decrements_on_read() {
        let mut fx = full();
        fx.state.slot_retry_counts.insert('b', 2);
        assert_eq!(var(&mut fx, "slot-retry-count:b"), Response::okay_with("2"));
        assert_eq!(var(&mut fx, "slot-retry-count:b"), Response::okay_with("1"));
        assert_eq!(var(&mut fx, "slot-retry-count:b"), Response::okay_with("0"));
        assert_eq!(var(&mut fx, "slot-retry-count:b"), Response::okay_with("0"));
    }

    #[test]
    fn test_slot_variables_without_slot_support() {
        let mut fx = Fixture::bare();
        assert_eq!(var(&mut fx, "slot-count"), Response::fail("not implemented"));
        assert_eq!(var(&mut fx, "has-slot:boot"), Response::fail("not implemented"));
    }

    #[test]
    fn test_partition_variables() {
        let mut fx = full();
        assert_eq!(var(&mut fx, "partition-type:system"), Response::okay_with("ext4"));
        assert_eq!(
            var(&mut fx, "partition-size:boot"),
            Response::okay_with("0x0000000002000000")
        );
        assert_eq!(
            var(&mut fx, "partition-size:misc"),
            Response::fail("partition not found")
        );

        let mut bare = Fixture::bare();
        assert_eq!(
            var(&mut bare, "partition-type:boot"),
            Response::fail("block device not found")
        );
    }

    #[test]
    fn test_unlocked_follows_lock_state() {
        let mut fx = full();
        assert_eq!(var(&mut fx, "unlocked"), Response::okay_with("no"));
    }

    #[test]
    fn test_attestation_variables() {
        let mut fx = full();
        assert_eq!(var(&mut fx, "at-attest-dh"), Response::okay_with("dh-0001"));
        assert_eq!(var(&mut fx, "at-attest-uuid"), Response::fail("uuid not set"));

        let mut bare = Fixture::bare();
        assert_eq!(var(&mut bare, "at-attest-dh"), Response::fail("not implemented"));
    }

    #[test]
    fn test_oversized_value_fails_instead_of_truncating() {
        let mut fx = Fixture::new(
            Services::new(RecordingPlatform::new())
                .with_env(MemoryEnv::new().with("fastboot.long", &"v".repeat(80))),
        );
        assert_eq!(var(&mut fx, "long"), Response::fail("response too long"));
    }
}
