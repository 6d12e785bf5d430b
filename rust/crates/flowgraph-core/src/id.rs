//! Strongly-typed run identifier.
//!
//! Uses ULID (time-ordered, collision-resistant) so run IDs sort the same
//! way they were created, which is convenient for log correlation.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Macro to generate strongly-typed ID wrappers, same shape the engine's
/// sibling crates use for entity IDs.
macro_rules! define_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Create a new ID.
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Parse from string (with or without prefix).
            pub fn parse(s: &str) -> Result<Self, IdParseError> {
                let s = s.strip_prefix($prefix).unwrap_or(s);
                let s = s.strip_prefix('_').unwrap_or(s);
                let ulid = Ulid::from_string(s).map_err(|_| IdParseError::InvalidFormat)?;
                Ok(Self(ulid))
            }

            /// Milliseconds since epoch encoded in the ID.
            pub fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

/// Error parsing an ID.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdParseError {
    #[error("invalid ID format")]
    InvalidFormat,
}

define_id!(RunId, "run");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrips_through_display() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn run_id_parses_without_prefix() {
        let id = RunId::new();
        let bare = id.to_string();
        let bare = bare.strip_prefix("run_").unwrap();
        assert_eq!(RunId::parse(bare).unwrap(), id);
    }
}
