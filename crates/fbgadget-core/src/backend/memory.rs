//! In-memory collaborators for simulation and tests.
//!
//! Each type shares its state behind an `Arc<Mutex<..>>` so a clone kept by
//! the caller observes what the engine did.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    Attestation, BackendError, EnvStore, FlashBackend, FlashLockState, LockControl, PartitionInfo,
    PartitionTable, Platform, SlotControl, VbootLockState,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Environment backed by a map.
#[derive(Debug, Clone, Default)]
pub struct MemoryEnv {
    vars: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&self, key: &str, value: &str) {
        lock(&self.vars).insert(key.to_string(), value.to_string());
    }
}

impl EnvStore for MemoryEnv {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.vars).get(key).cloned()
    }
}

#[derive(Debug, Default)]
struct FlashState {
    partitions: BTreeMap<String, PartitionInfo>,
    images: HashMap<String, Vec<u8>>,
    table_writes: usize,
    fail_writes: Option<String>,
}

/// Partition table plus flash contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryFlash {
    state: Arc<Mutex<FlashState>>,
}

impl MemoryFlash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a partition after the last one.
    pub fn with_partition(self, name: &str, size: u64, type_name: &str) -> Self {
        {
            let mut state = lock(&self.state);
            let offset = state
                .partitions
                .values()
                .map(|p| p.offset + p.size)
                .max()
                .unwrap_or(0);
            state.partitions.insert(
                name.to_string(),
                PartitionInfo {
                    name: name.to_string(),
                    offset,
                    size,
                    type_name: type_name.to_string(),
                },
            );
        }
        self
    }

    /// Current contents of a partition, `None` if never written or erased.
    pub fn image(&self, name: &str) -> Option<Vec<u8>> {
        lock(&self.state).images.get(name).cloned()
    }

    pub fn partition_table_writes(&self) -> usize {
        lock(&self.state).table_writes
    }

    /// Make every subsequent write fail with `message`.
    pub fn fail_writes(&self, message: &str) {
        lock(&self.state).fail_writes = Some(message.to_string());
    }
}

impl PartitionTable for MemoryFlash {
    fn find(&self, name: &str) -> Option<PartitionInfo> {
        lock(&self.state).partitions.get(name).cloned()
    }
}

impl FlashBackend for MemoryFlash {
    fn write(&mut self, partition: &str, image: &[u8]) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        if let Some(message) = &state.fail_writes {
            return Err(BackendError::failed(message.clone()));
        }
        let info = state
            .partitions
            .get(partition)
            .ok_or_else(|| BackendError::failed("partition does not exist"))?;
        if image.len() as u64 > info.size {
            return Err(BackendError::failed("too large for partition"));
        }
        state.images.insert(partition.to_string(), image.to_vec());
        Ok(())
    }

    fn erase(&mut self, partition: &str) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        if !state.partitions.contains_key(partition) {
            return Err(BackendError::failed("partition does not exist"));
        }
        state.images.remove(partition);
        Ok(())
    }

    fn write_partition_table(&mut self) -> Result<(), BackendError> {
        lock(&self.state).table_writes += 1;
        Ok(())
    }
}

#[derive(Debug)]
struct SlotState {
    suffixes: Vec<char>,
    active: Option<char>,
}

/// A/B metadata.
#[derive(Debug, Clone)]
pub struct MemorySlots {
    state: Arc<Mutex<SlotState>>,
}

impl MemorySlots {
    /// Two slots, `a` active.
    pub fn ab() -> Self {
        Self::new(&['a', 'b'], Some('a'))
    }

    pub fn new(suffixes: &[char], active: Option<char>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SlotState {
                suffixes: suffixes.to_vec(),
                active,
            })),
        }
    }

    pub fn active(&self) -> Option<char> {
        lock(&self.state).active
    }
}

impl SlotControl for MemorySlots {
    fn slot_suffixes(&self) -> Vec<char> {
        lock(&self.state).suffixes.clone()
    }

    fn current_slot(&self) -> Result<char, BackendError> {
        lock(&self.state)
            .active
            .ok_or_else(|| BackendError::failed("no active slot"))
    }

    fn set_active(&mut self, slot: char) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        if !state.suffixes.contains(&slot) {
            return Err(BackendError::failed("no such slot"));
        }
        state.active = Some(slot);
        Ok(())
    }
}

#[derive(Debug)]
struct LockState {
    flash: FlashLockState,
    vboot: VbootLockState,
    perm_attrs: Option<Vec<u8>>,
    attr_hash: Option<Vec<u8>>,
    perm_attr_provisioned: bool,
    vboot_key_hash: Option<Vec<u8>>,
    fail_reads: bool,
}

/// Lock state and fuse storage.
#[derive(Debug, Clone)]
pub struct MemoryLock {
    state: Arc<Mutex<LockState>>,
}

impl MemoryLock {
    pub fn new(flash: FlashLockState, vboot: VbootLockState) -> Self {
        Self {
            state: Arc::new(Mutex::new(LockState {
                flash,
                vboot,
                perm_attrs: None,
                attr_hash: None,
                perm_attr_provisioned: false,
                vboot_key_hash: None,
                fail_reads: false,
            })),
        }
    }

    pub fn unlocked() -> Self {
        Self::new(FlashLockState::Unlocked, VbootLockState::Unlocked)
    }

    pub fn flash_state(&self) -> FlashLockState {
        lock(&self.state).flash
    }

    pub fn vboot_state(&self) -> VbootLockState {
        lock(&self.state).vboot
    }

    pub fn perm_attrs(&self) -> Option<Vec<u8>> {
        lock(&self.state).perm_attrs.clone()
    }

    pub fn attr_hash(&self) -> Option<Vec<u8>> {
        lock(&self.state).attr_hash.clone()
    }

    pub fn perm_attr_provisioned(&self) -> bool {
        lock(&self.state).perm_attr_provisioned
    }

    pub fn vboot_key_hash(&self) -> Option<Vec<u8>> {
        lock(&self.state).vboot_key_hash.clone()
    }

    /// Make lock-state reads fail.
    pub fn fail_reads(&self) {
        lock(&self.state).fail_reads = true;
    }
}

impl LockControl for MemoryLock {
    fn flash_lock_state(&self) -> Result<FlashLockState, BackendError> {
        let state = lock(&self.state);
        if state.fail_reads {
            return Err(BackendError::failed("lock state unreadable"));
        }
        Ok(state.flash)
    }

    fn set_flash_lock_state(&mut self, flash: FlashLockState) -> Result<(), BackendError> {
        lock(&self.state).flash = flash;
        Ok(())
    }

    fn vboot_lock_state(&self) -> Result<VbootLockState, BackendError> {
        let state = lock(&self.state);
        if state.fail_reads {
            return Err(BackendError::failed("lock state unreadable"));
        }
        Ok(state.vboot)
    }

    fn set_vboot_lock_state(&mut self, vboot: VbootLockState) -> Result<(), BackendError> {
        lock(&self.state).vboot = vboot;
        Ok(())
    }

    fn write_permanent_attributes(&mut self, attributes: &[u8]) -> Result<(), BackendError> {
        lock(&self.state).perm_attrs = Some(attributes.to_vec());
        Ok(())
    }

    fn write_attribute_hash(&mut self, digest: &[u8]) -> Result<(), BackendError> {
        lock(&self.state).attr_hash = Some(digest.to_vec());
        Ok(())
    }

    fn set_perm_attr_provisioned(&mut self) -> Result<(), BackendError> {
        lock(&self.state).perm_attr_provisioned = true;
        Ok(())
    }

    fn write_vboot_key_hash(&mut self, digest: &[u8]) -> Result<(), BackendError> {
        lock(&self.state).vboot_key_hash = Some(digest.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct AttestationState {
    ca_responses: Vec<Vec<u8>>,
}

/// Attestation stub that prefixes requests and records responses.
#[derive(Debug, Clone, Default)]
pub struct MemoryAttestation {
    dh: Option<String>,
    uuid: Option<String>,
    state: Arc<Mutex<AttestationState>>,
}

impl MemoryAttestation {
    /// Prefix placed before the operation bytes in a CA request.
    pub const REQUEST_PREFIX: &'static [u8] = b"CA-REQ:";

    pub fn new(dh: Option<&str>, uuid: Option<&str>) -> Self {
        Self {
            dh: dh.map(str::to_string),
            uuid: uuid.map(str::to_string),
            state: Arc::default(),
        }
    }

    pub fn ca_responses(&self) -> Vec<Vec<u8>> {
        lock(&self.state).ca_responses.clone()
    }
}

impl Attestation for MemoryAttestation {
    fn dh(&self) -> Result<String, BackendError> {
        self.dh.clone().ok_or_else(|| BackendError::failed("no dh"))
    }

    fn uuid(&self) -> Result<String, BackendError> {
        self.uuid.clone().ok_or_else(|| BackendError::failed("no uuid"))
    }

    fn ca_request(&mut self, operation: &[u8]) -> Result<Vec<u8>, BackendError> {
        if operation.is_empty() {
            return Err(BackendError::failed("empty operation"));
        }
        let mut request = Self::REQUEST_PREFIX.to_vec();
        request.extend_from_slice(operation);
        Ok(request)
    }

    fn set_ca_response(&mut self, response: &[u8]) -> Result<(), BackendError> {
        if response.is_empty() {
            return Err(BackendError::failed("empty response"));
        }
        lock(&self.state).ca_responses.push(response.to_vec());
        Ok(())
    }
}

/// Terminal actions seen by [`RecordingPlatform`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformAction {
    SetRebootFlag,
    Reset,
    /// Boot attempted with an image of this many bytes.
    Boot(usize),
    Detach,
}

#[derive(Debug, Default)]
struct PlatformState {
    actions: Vec<PlatformAction>,
    reboot_flag_fails: bool,
    boot_fails: bool,
}

/// Platform that records instead of resetting.
#[derive(Debug, Clone, Default)]
pub struct RecordingPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<PlatformAction> {
        lock(&self.state).actions.clone()
    }

    pub fn fail_reboot_flag(&self) {
        lock(&self.state).reboot_flag_fails = true;
    }

    pub fn fail_boot(&self) {
        lock(&self.state).boot_fails = true;
    }
}

impl Platform for RecordingPlatform {
    fn set_reboot_flag(&mut self) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        if state.reboot_flag_fails {
            return Err(BackendError::failed("misc partition unavailable"));
        }
        state.actions.push(PlatformAction::SetRebootFlag);
        Ok(())
    }

    fn reset(&mut self) {
        lock(&self.state).actions.push(PlatformAction::Reset);
    }

    fn boot(&mut self, image: &[u8]) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        state.actions.push(PlatformAction::Boot(image.len()));
        if state.boot_fails {
            return Err(BackendError::failed("bad kernel image"));
        }
        Ok(())
    }

    fn detach(&mut self) {
        lock(&self.state).actions.push(PlatformAction::Detach);
    }
}
