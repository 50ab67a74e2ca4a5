//! Key encoding and identifier generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use unitwork_proto::{EntityId, EntityRef};

/// Width of the entity type length prefix in a data key.
const TYPE_LEN_BYTES: usize = 4;

/// Width of an entity id.
const ID_BYTES: usize = 16;

/// Encode the data key for an entity: `[type len u32 BE][entity_type][entity_id]`.
///
/// Grouping by type first lets a prefix scan return every entity of a type.
/// The length prefix keeps one type's prefix from matching another type
/// that merely starts with the same bytes.
pub fn entity_key(entity: &EntityRef) -> Vec<u8> {
    let mut key = type_prefix(&entity.entity_type);
    key.extend_from_slice(&entity.entity_id);
    key
}

/// Prefix shared by every key of an entity type.
pub fn type_prefix(entity_type: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(TYPE_LEN_BYTES + entity_type.len() + ID_BYTES);
    prefix.extend_from_slice(&(entity_type.len() as u32).to_be_bytes());
    prefix.extend_from_slice(entity_type.as_bytes());
    prefix
}

/// Decode a data key back into an entity reference.
pub fn decode_entity_key(key: &[u8]) -> Option<EntityRef> {
    let len_bytes: [u8; TYPE_LEN_BYTES] = key.get(..TYPE_LEN_BYTES)?.try_into().ok()?;
    let type_len = u32::from_be_bytes(len_bytes) as usize;
    if key.len() != TYPE_LEN_BYTES + type_len + ID_BYTES {
        return None;
    }
    let split = TYPE_LEN_BYTES + type_len;
    let entity_type = std::str::from_utf8(&key[TYPE_LEN_BYTES..split]).ok()?;
    let mut entity_id: EntityId = [0u8; ID_BYTES];
    entity_id.copy_from_slice(&key[split..]);
    Some(EntityRef::new(entity_type, entity_id))
}

/// Encode an outbox key. Big-endian so byte order equals LSN order.
pub fn lsn_key(lsn: u64) -> [u8; 8] {
    lsn.to_be_bytes()
}

/// Decode an outbox key or a stored LSN counter.
pub fn decode_lsn(bytes: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(bytes).ok().map(u64::from_be_bytes)
}

/// Get current timestamp in microseconds since Unix epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Generate a unique 16-byte identifier.
///
/// The first half is the current time, the second half a process-wide
/// counter, so ids generated in the same microsecond still differ.
pub fn generate_id() -> [u8; 16] {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut id = [0u8; 16];
    id[..8].copy_from_slice(&current_timestamp().to_be_bytes());
    id[8..].copy_from_slice(&counter.to_be_bytes());
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_key_roundtrip() {
        let entity = EntityRef::new("Customer", [9; 16]);
        let key = entity_key(&entity);
        assert!(key.starts_with(&type_prefix("Customer")));
        assert_eq!(decode_entity_key(&key), Some(entity));
    }

    #[test]
    fn test_decode_rejects_short_keys() {
        assert_eq!(decode_entity_key(b"short"), None);
        assert_eq!(decode_entity_key(&[1u8; 20]), None);
    }

    #[test]
    fn test_prefixes_do_not_collide() {
        let order = entity_key(&EntityRef::new("Order", [1; 16]));
        assert!(!order.starts_with(&type_prefix("Ord")));
    }

    #[test]
    fn test_type_with_nul_keeps_its_own_prefix() {
        let nested = entity_key(&EntityRef::new("A\0B", [1; 16]));
        assert!(!nested.starts_with(&type_prefix("A")));
        assert_eq!(
            decode_entity_key(&nested),
            Some(EntityRef::new("A\0B", [1; 16]))
        );
    }

    #[test]
    fn test_lsn_key_orders_numerically() {
        assert!(lsn_key(255) < lsn_key(256));
        assert_eq!(decode_lsn(&lsn_key(42)), Some(42));
        assert_eq!(decode_lsn(b"short"), None);
    }

    #[test]
    fn test_generate_id_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
    }
}
