//! Strong type definitions shared across the workspace.
//!
//! Identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::CoreError;

/// A 32-byte device identity, computed as SHA-256 over the device's
/// certificate in DER form.
///
/// Two connections presenting the same certificate resolve to the same
/// DeviceId, which is what the connection actor checks after the hello
/// exchange.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub [u8; 32]);

impl DeviceId {
    /// Derive the device id of a certificate.
    pub fn from_certificate(certificate_der: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(certificate_der);
        Self(hasher.finalize().into())
    }

    /// Create a new DeviceId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The 64-bit short id used in version counters and `modified_by`.
    pub fn short_id(&self) -> u64 {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(prefix)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidDeviceId(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidDeviceId(format!("expected 32 bytes: {s}")))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl From<[u8; 32]> for DeviceId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// One (replica, counter) entry of a record's version vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileVersion {
    /// Short id of the replica that bumped the counter.
    pub id: u64,
    /// Counter value.
    pub value: u64,
}

impl FileVersion {
    pub const fn new(id: u64, value: u64) -> Self {
        Self { id, value }
    }
}

/// Modification time of a record.
///
/// Ordering is by seconds, then nanoseconds; the derived `Ord` relies on the
/// field declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileLastModifiedTime {
    pub seconds: i64,
    pub nanos: i32,
}

impl FileLastModifiedTime {
    /// The zero timestamp.
    pub const EMPTY: Self = Self { seconds: 0, nanos: 0 };

    pub const fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    /// Unix milliseconds, truncating sub-millisecond precision. Saturates
    /// for out-of-range seconds.
    pub const fn rounded_millis(&self) -> i64 {
        self.seconds
            .saturating_mul(1000)
            .saturating_add((self.nanos / 1_000_000) as i64)
    }
}

impl Default for FileLastModifiedTime {
    fn default() -> Self {
        Self::EMPTY
    }
}
