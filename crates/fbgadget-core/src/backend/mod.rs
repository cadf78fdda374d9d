//! Collaborator interfaces.
//!
//! Storage, slot metadata, lock state, attestation and the platform's
//! terminal actions are all outside the protocol engine. Each is an
//! optional capability resolved when the engine is bound; commands that
//! need a missing capability answer with a single `FAIL`.

pub mod memory;

use thiserror::Error;

pub use memory::{
    MemoryAttestation, MemoryEnv, MemoryFlash, MemoryLock, MemorySlots, PlatformAction,
    RecordingPlatform,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("{0}")]
    Failed(String),

    #[error("operation not supported")]
    Unsupported,
}

impl BackendError {
    pub fn failed(message: impl Into<String>) -> Self {
        BackendError::Failed(message.into())
    }
}

/// Partition metadata as reported by the block layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub name: String,
    /// Start offset in bytes.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
    /// Filesystem type string, e.g. `ext4`.
    pub type_name: String,
}

pub trait PartitionTable {
    fn find(&self, name: &str) -> Option<PartitionInfo>;
}

/// Flash/erase backend (MMC, NAND, ...).
pub trait FlashBackend {
    /// Write `image` to the named partition.
    fn write(&mut self, partition: &str, image: &[u8]) -> Result<(), BackendError>;

    fn erase(&mut self, partition: &str) -> Result<(), BackendError>;

    /// Rewrite the partition table from the platform's layout.
    fn write_partition_table(&mut self) -> Result<(), BackendError> {
        Err(BackendError::Unsupported)
    }
}

/// Key/value environment.
pub trait EnvStore {
    fn get(&self, key: &str) -> Option<String>;
}

/// A/B slot metadata.
pub trait SlotControl {
    /// Slot suffix letters, e.g. `['a', 'b']`.
    fn slot_suffixes(&self) -> Vec<char>;

    fn slot_count(&self) -> usize {
        self.slot_suffixes().len()
    }

    fn current_slot(&self) -> Result<char, BackendError>;

    fn set_active(&mut self, slot: char) -> Result<(), BackendError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashLockState {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VbootLockState {
    Locked,
    Unlocked,
    /// Unlocking has been permanently disabled.
    UnlockDisabled,
}

/// Device lock state and verified-boot provisioning.
pub trait LockControl {
    fn flash_lock_state(&self) -> Result<FlashLockState, BackendError>;
    fn set_flash_lock_state(&mut self, state: FlashLockState) -> Result<(), BackendError>;

    fn vboot_lock_state(&self) -> Result<VbootLockState, BackendError>;
    fn set_vboot_lock_state(&mut self, state: VbootLockState) -> Result<(), BackendError>;

    fn write_permanent_attributes(&mut self, attributes: &[u8]) -> Result<(), BackendError>;
    fn write_attribute_hash(&mut self, digest: &[u8]) -> Result<(), BackendError>;
    fn set_perm_attr_provisioned(&mut self) -> Result<(), BackendError>;
    fn write_vboot_key_hash(&mut self, digest: &[u8]) -> Result<(), BackendError>;
}

/// Trusted-execution attestation service.
pub trait Attestation {
    fn dh(&self) -> Result<String, BackendError>;
    fn uuid(&self) -> Result<String, BackendError>;
    /// Turn an operation start message into a CA request.
    fn ca_request(&mut self, operation: &[u8]) -> Result<Vec<u8>, BackendError>;
    fn set_ca_response(&mut self, response: &[u8]) -> Result<(), BackendError>;
}

/// Terminal platform actions.
///
/// On hardware `reset` and a successful `boot` do not return; after any of
/// these the engine accepts no further events.
pub trait Platform {
    /// Ask the next boot to stop in the bootloader.
    fn set_reboot_flag(&mut self) -> Result<(), BackendError> {
        Err(BackendError::Unsupported)
    }

    fn reset(&mut self);

    /// Boot the kernel image at the start of `image`.
    fn boot(&mut self, image: &[u8]) -> Result<(), BackendError>;

    /// Detach the USB function and let the caller continue booting.
    fn detach(&mut self);
}

/// Collaborators available to one engine instance.
pub struct Services {
    pub platform: Box<dyn Platform>,
    pub env: Option<Box<dyn EnvStore>>,
    pub partitions: Option<Box<dyn PartitionTable>>,
    pub flash: Option<Box<dyn FlashBackend>>,
    pub slots: Option<Box<dyn SlotControl>>,
    pub lock: Option<Box<dyn LockControl>>,
    pub attestation: Option<Box<dyn Attestation>>,
}

impl Services {
    /// Only the platform; every optional capability absent.
    pub fn new(platform: impl Platform + 'static) -> Self {
        Self {
            platform: Box::new(platform),
            env: None,
            partitions: None,
            flash: None,
            slots: None,
            lock: None,
            attestation: None,
        }
    }

    pub fn with_env(mut self, env: impl EnvStore + 'static) -> Self {
        self.env = Some(Box::new(env));
        self
    }

    pub fn with_partitions(mut self, table: impl PartitionTable + 'static) -> Self {
        self.partitions = Some(Box::new(table));
        self
    }

    pub fn with_flash(mut self, flash: impl FlashBackend + 'static) -> Self {
        self.flash = Some(Box::new(flash));
        self
    }

    pub fn with_slots(mut self, slots: impl SlotControl + 'static) -> Self {
        self.slots = Some(Box::new(slots));
        self
    }

    pub fn with_lock(mut self, lock: impl LockControl + 'static) -> Self {
        self.lock = Some(Box::new(lock));
        self
    }

    pub fn with_attestation(mut self, attestation: impl Attestation + 'static) -> Self {
        self.attestation = Some(Box::new(attestation));
        self
    }
}
