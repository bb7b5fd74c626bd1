//! Identifier types for the credits ledger.
//!
//! Account and entry identifiers are opaque strings supplied by callers
//! (account ids come from the identity provider, entry ids are idempotency
//! keys). Both are validated once at the boundary so the rest of the crate can
//! treat them as well-formed.
//!
//! # Macro-based ID Types
//!
//! The `string_id_type!` macro reduces boilerplate for the string identifier
//! types, ensuring consistent validation, serialization, parsing, and display.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted length of an identifier, in bytes.
pub const MAX_ID_LEN: usize = 256;

/// Maximum length accepted when deserializing. Derived entry ids (a prefix
/// plus an account id or plan code) may exceed [`MAX_ID_LEN`].
pub const MAX_STORED_ID_LEN: usize = 2 * MAX_ID_LEN;

/// Byte used to separate the account id from the entry key in storage keys.
///
/// Identifiers may never contain it, which keeps composite keys unambiguous.
pub const KEY_SEPARATOR: u8 = 0;

/// Macro to define a validated string identifier type with standard trait implementations.
///
/// This macro generates a newtype wrapper around `String` with implementations for:
/// - `Clone`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - `Serialize`, `Deserialize` (as string, validated)
/// - `FromStr`, `Display`, `Debug`
/// - `TryFrom<String>`, `Into<String>`
/// - `AsRef<str>`
macro_rules! string_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier, validating its contents.
            ///
            /// # Errors
            ///
            /// Returns an error if the value is empty, too long, or contains
            /// control characters.
            pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                validate(&value, MAX_ID_LEN)?;
                Ok(Self(value))
            }

            /// Wrap a value that is well-formed by construction (derived from
            /// already-validated identifiers). Skips the length limit.
            #[allow(dead_code)]
            pub(crate) fn from_trusted(value: String) -> Self {
                Self(value)
            }

            /// Return the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Return the bytes of the identifier.
            #[must_use]
            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                validate(&value, MAX_STORED_ID_LEN)?;
                Ok(Self(value))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id_type!(
    AccountId,
    "An account identifier.\n\nAccount ids are issued by the identity provider; one account exists per user."
);
string_id_type!(
    EntryId,
    "A ledger entry identifier, unique per account.\n\nThe entry id is the idempotency key: applying an entry whose id already exists is a no-op."
);
string_id_type!(
    PlanCode,
    "A plan code referencing an entry in the plan catalog (e.g. `standard`)."
);

fn validate(value: &str, max_len: usize) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }
    if value.len() > max_len {
        return Err(IdError::TooLong { len: value.len() });
    }
    if value.chars().any(char::is_control) {
        return Err(IdError::InvalidCharacter);
    }
    Ok(())
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is empty.
    #[error("identifier must not be empty")]
    Empty,

    /// The input exceeds the length limit.
    #[error("identifier too long: {len} bytes")]
    TooLong {
        /// Length of the rejected input.
        len: usize,
    },

    /// The input contains a control character.
    #[error("identifier contains a control character")]
    InvalidCharacter,

    /// The input starts with a prefix reserved for system-written entries.
    #[error("identifier uses reserved prefix {prefix}")]
    ReservedPrefix {
        /// The reserved prefix.
        prefix: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_roundtrip() {
        let id = AccountId::new("user_8f2a").unwrap();
        let parsed = AccountId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn entry_id_serde_json() {
        let id = EntryId::new("RESET_2026-10").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"RESET_2026-10\"");
        let parsed: EntryId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(AccountId::new(""), Err(IdError::Empty));
    }

    #[test]
    fn rejects_control_characters() {
        assert_eq!(EntryId::new("a\0b"), Err(IdError::InvalidCharacter));
        assert_eq!(EntryId::new("a\nb"), Err(IdError::InvalidCharacter));
    }

    #[test]
    fn rejects_too_long() {
        let long = "x".repeat(MAX_ID_LEN + 1);
        assert!(matches!(
            AccountId::new(long),
            Err(IdError::TooLong { len }) if len == MAX_ID_LEN + 1
        ));
    }

    #[test]
    fn deserialize_validates() {
        let result: Result<PlanCode, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn debug_includes_type_name() {
        let id = PlanCode::new("pro").unwrap();
        assert_eq!(format!("{id:?}"), "PlanCode(pro)");
    }
}
