use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

/// Opaque token identifying one process instance as a lease holder
///
/// Generated once at startup and never persisted locally, so a restarted
/// process is a different owner even on the same host.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(Bytes);

impl OwnerToken {
    /// Generate a fresh random token (UUID v4, 16 bytes)
    pub fn generate() -> Self {
        Self(Bytes::copy_from_slice(Uuid::new_v4().as_bytes()))
    }

    /// Wrap existing token bytes
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Cheap clone of the underlying bytes, as stored in slot records
    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    /// Lowercase hex rendering for logs and the HTTP surface
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Debug for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnerToken").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
