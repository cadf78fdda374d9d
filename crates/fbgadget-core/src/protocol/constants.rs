//! Protocol constants.

// ============================================================================
// Versioning
// ============================================================================

/// Protocol version reported by `getvar:version`.
pub const FASTBOOT_VERSION: &str = "0.4";

// ============================================================================
// Endpoint Sizes
// ============================================================================

/// Bulk OUT max packet size at high speed.
pub const RX_MAX_PACKET_SIZE_HS: usize = 0x200;
/// Bulk OUT max packet size at full speed.
pub const RX_MAX_PACKET_SIZE_FS: usize = 0x40;

/// Size of the inbound and outbound request buffers.
///
/// Must stay an integral multiple of the OUT max packet size; some
/// controllers (DWC3) reject bulk OUT requests that are not.
pub const EP_BUFFER_SIZE: usize = 4096;

/// Capacity of a single response frame, status prefix included.
pub const FASTBOOT_RESPONSE_LEN: usize = 64;

/// Default staging buffer size (128 MiB).
pub const DEFAULT_STAGING_CAPACITY: usize = 0x0800_0000;

// ============================================================================
// Progress Marks
// ============================================================================

/// One progress mark per 128 KiB transferred.
pub const BYTES_PER_MARK: u64 = 0x20000;
/// Line break after this many marks.
pub const MARKS_PER_LINE: u64 = 74;

// ============================================================================
// Response Prefixes
// ============================================================================

pub const RESPONSE_OKAY: &str = "OKAY";
pub const RESPONSE_FAIL: &str = "FAIL";
pub const RESPONSE_DATA: &str = "DATA";

// ============================================================================
// Verified Boot Provisioning
// ============================================================================

/// Size of the permanent attribute block (version + root key + product id).
pub const PERM_ATTR_SIZE: usize = 1052;
/// Size of the SHA-256 digest appended to the permanent attributes.
pub const PERM_ATTR_DIGEST_SIZE: usize = 32;
/// Exact payload size expected by `oem fuse at-perm-attr`.
pub const PERM_ATTR_TOTAL_SIZE: usize = PERM_ATTR_SIZE + PERM_ATTR_DIGEST_SIZE;
/// Exact payload size expected by `oem fuse at-bootloader-vboot-key`.
pub const VBOOT_KEY_HASH_SIZE: usize = 32;

// ============================================================================
// Environment & Partitions
// ============================================================================

/// Prefix for environment-backed `getvar` fallbacks.
pub const ENV_VAR_PREFIX: &str = "fastboot.";
/// Environment key holding the device serial number.
pub const ENV_SERIALNO: &str = "serial#";

/// Partitions that exist once per A/B slot.
pub const SLOTTED_PARTITIONS: &[&str] = &["boot", "system", "vendor", "vbmeta", "oem"];
