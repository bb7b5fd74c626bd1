//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Account records with their next sequence number, keyed by `account_id`.
    pub const ACCOUNTS: &str = "accounts";

    /// Ledger entries, keyed by `account_id || 0x00 || entry_id`.
    pub const ENTRIES: &str = "entries";

    /// Index: entries in ledger order, keyed by
    /// `account_id || 0x00 || sequence (u64 big-endian)`.
    /// Value is the entry id.
    pub const ENTRIES_BY_SEQUENCE: &str = "entries_by_seq";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::ACCOUNTS, cf::ENTRIES, cf::ENTRIES_BY_SEQUENCE]
}
