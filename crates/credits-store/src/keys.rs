//! Key encoding utilities for `RocksDB`.
//!
//! Composite keys join the account id and the per-account part with
//! [`KEY_SEPARATOR`], which identifiers never contain.

use credits_core::ids::KEY_SEPARATOR;
use credits_core::{AccountId, EntryId};

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create the prefix shared by every per-account key.
///
/// Format: `account_id || 0x00`
#[must_use]
pub fn account_prefix(account_id: &AccountId) -> Vec<u8> {
    let mut key = Vec::with_capacity(account_id.as_bytes().len() + 1);
    key.extend_from_slice(account_id.as_bytes());
    key.push(KEY_SEPARATOR);
    key
}

/// Create an entry key.
///
/// Format: `account_id || 0x00 || entry_id`
#[must_use]
pub fn entry_key(account_id: &AccountId, entry_id: &EntryId) -> Vec<u8> {
    entry_prefix_key(account_id, entry_id.as_str())
}

/// Create the key prefix matching every entry whose id starts with `prefix`.
#[must_use]
pub fn entry_prefix_key(account_id: &AccountId, prefix: &str) -> Vec<u8> {
    let mut key = account_prefix(account_id);
    key.extend_from_slice(prefix.as_bytes());
    key
}

/// Create a sequence index key.
///
/// Format: `account_id || 0x00 || sequence (8 bytes, big-endian)`
///
/// Big-endian keeps the index sorted in ledger order.
#[must_use]
pub fn sequence_key(account_id: &AccountId, sequence: u64) -> Vec<u8> {
    let mut key = account_prefix(account_id);
    key.extend_from_slice(&sequence.to_be_bytes());
    key
}

/// Extract the sequence from a sequence index key.
///
/// Returns `None` if the key is shorter than eight bytes.
#[must_use]
pub fn sequence_from_key(key: &[u8]) -> Option<u64> {
    let start = key.len().checked_sub(8)?;
    let bytes: [u8; 8] = key[start..].try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}
