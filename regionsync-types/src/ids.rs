//! Identifier types used throughout regionsync.
//!
//! Files, events and conflicts use UUID v7 so identifiers sort by creation
//! time. Regions are named by operators and use a validated string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new time-ordered identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Wraps an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Parses an identifier from its hyphenated string form.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

uuid_id!(
    /// Globally unique identifier of a file entity, shared by every region.
    FileId
);

uuid_id!(
    /// Unique identifier of a change event.
    EventId
);

uuid_id!(
    /// Unique identifier of a detected conflict.
    ConflictId
);

/// Identifier of a region (replica) in the fleet.
///
/// Region ids double as vector clock keys, so they must be stable for the
/// lifetime of the deployment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(String);

impl RegionId {
    const COORDINATOR: &'static str = "coordinator";

    /// Creates a region id, rejecting empty or whitespace-bearing names.
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(crate::Error::InvalidRegionId(id));
        }
        Ok(Self(id))
    }

    /// The pseudo-region used when the coordinator itself originates an
    /// event (e.g. the result of a conflict resolution).
    #[must_use]
    pub fn coordinator() -> Self {
        Self(Self::COORDINATOR.to_string())
    }

    /// Returns true if this is the coordinator pseudo-region.
    #[must_use]
    pub fn is_coordinator(&self) -> bool {
        self.0 == Self::COORDINATOR
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RegionId {
    fn default() -> Self {
        Self("local".to_string())
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RegionId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for RegionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
