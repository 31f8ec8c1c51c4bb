//! Stable item identifiers.
//!
//! Backends hand out ids as strings or integers. Everything inside the
//! engine normalizes them to [`ItemId`], a string newtype, so that `42` and
//! `"42"` address the same record.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized identifier of a list item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Create an id from anything string-like.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the normalized string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&ItemId> for ItemId {
    fn from(id: &ItemId) -> Self {
        id.clone()
    }
}

impl From<String> for ItemId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&String> for ItemId {
    fn from(raw: &String) -> Self {
        Self(raw.clone())
    }
}

impl From<&str> for ItemId {
    fn from(raw: &str) -> Self {
        Self(raw.to_owned())
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ItemId {
                fn from(raw: $ty) -> Self {
                    Self(raw.to_string())
                }
            }
        )*
    };
}

impl_from_integer!(u32, u64, usize, i32, i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_string_ids_normalize_equal() {
        assert_eq!(ItemId::from(42u64), ItemId::from("42"));
        assert_eq!(ItemId::from(-7i64).as_str(), "-7");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&ItemId::from(9u32)).unwrap();
        assert_eq!(json, "\"9\"");
    }
}
