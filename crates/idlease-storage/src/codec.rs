//! Key and value encoding for slot records on ordered key-value backends
//!
//! Slots live under `<namespace>/slots/<id>` with a JSON value:
//!
//! ```text
//! {"id": 42, "owner": "9f0c...", "expires_at": 1717171717}
//! ```
//!
//! The owner token is hex encoded so records stay readable with generic tooling.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::backend::{ScannedSlot, SlotRecord, StorageError, StorageResult};

const SLOTS_SEGMENT: &str = "slots";

#[derive(Debug, Serialize, Deserialize)]
struct StoredSlot {
    id: i64,
    owner: String,
    expires_at: i64,
}

/// Prefix shared by every slot key in `namespace`
pub fn namespace_prefix(namespace: &str) -> Vec<u8> {
    format!("{}/{}/", namespace, SLOTS_SEGMENT).into_bytes()
}

/// Storage key for slot `id` in `namespace`
pub fn slot_key(namespace: &str, id: i64) -> Vec<u8> {
    format!("{}/{}/{}", namespace, SLOTS_SEGMENT, id).into_bytes()
}

/// Exclusive upper bound for a scan over `namespace`
pub fn namespace_end(namespace: &str) -> Vec<u8> {
    let mut end = namespace_prefix(namespace);
    end.push(0xff);
    end
}

/// Serialize a slot record for storage
pub fn encode_record(record: &SlotRecord) -> StorageResult<Vec<u8>> {
    let stored = StoredSlot {
        id: record.id,
        owner: hex::encode(&record.owner),
        expires_at: record.expires_at,
    };
    serde_json::to_vec(&stored)
        .map_err(|e| StorageError::Serialization(format!("Failed to encode slot record: {}", e)))
}

/// Deserialize a stored slot value
pub fn decode_record(value: &[u8]) -> StorageResult<SlotRecord> {
    let stored: StoredSlot = serde_json::from_slice(value)
        .map_err(|e| StorageError::Serialization(format!("Failed to decode slot record: {}", e)))?;
    let owner = hex::decode(&stored.owner)
        .map_err(|e| StorageError::Serialization(format!("Invalid owner encoding: {}", e)))?;

    Ok(SlotRecord { id: stored.id, owner: Bytes::from(owner), expires_at: stored.expires_at })
}

/// Interpret one raw key-value pair found under the namespace prefix
///
/// `key` must already start with `prefix`.
pub fn decode_scanned(prefix: &[u8], key: &[u8], value: &[u8]) -> ScannedSlot {
    let suffix = &key[prefix.len().min(key.len())..];

    let id = match std::str::from_utf8(suffix).ok().and_then(|s| s.parse::<i64>().ok()) {
        Some(id) => id,
        None => {
            return ScannedSlot::Unidentified {
                key: Bytes::copy_from_slice(key),
                reason: "key suffix is not an integer identifier".to_string(),
            };
        }
    };

    match decode_record(value) {
        Ok(record) if record.id == id => ScannedSlot::Record(record),
        Ok(record) => ScannedSlot::Malformed {
            id,
            reason: format!("record id {} does not match key id {}", record.id, id),
        },
        Err(e) => ScannedSlot::Malformed { id, reason: e.to_string() },
    }
}
