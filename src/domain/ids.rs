//! Record identifiers.
//!
//! Records carry one of two identifier kinds:
//! - `DurableId`: issued by a store on `create`, the only kind stores accept
//!   as a parent reference
//! - `EphemeralId`: minted locally for preview records, serialized with a
//!   `tmp_` prefix so it can never be read back as a durable identifier
//!
//! Entity types are generic over `RecordId`, which ties each identifier kind
//! to the bundle `Mode` it produces.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Prefix marking an ephemeral identifier on the wire
pub const EPHEMERAL_PREFIX: &str = "tmp_";

/// Error parsing an identifier from text
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("Ephemeral id must start with 'tmp_': {0}")]
    MissingPrefix(String),

    #[error("Durable id must not carry the 'tmp_' prefix: {0}")]
    UnexpectedPrefix(String),

    #[error("Invalid UUID in id '{0}'")]
    InvalidUuid(String),
}

/// Whether a bundle was persisted during generation or is a preview
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Generated without touching any store
    Preview,

    /// Every record written through the stores as it was produced
    Saved,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Preview => write!(f, "preview"),
            Mode::Saved => write!(f, "saved"),
        }
    }
}

/// An identifier kind usable on entity records
pub trait RecordId:
    Copy
    + Clone
    + Eq
    + Hash
    + fmt::Debug
    + fmt::Display
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Bundle mode produced by records carrying this identifier kind
    const MODE: Mode;
}

/// Identifier issued by a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DurableId(Uuid);

impl DurableId {
    /// Issue a fresh identifier (stores only)
    pub(crate) fn issue() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap a UUID read back from durable storage
    pub(crate) fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl RecordId for DurableId {
    const MODE: Mode = Mode::Saved;
}

impl fmt::Display for DurableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DurableId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with(EPHEMERAL_PREFIX) {
            return Err(IdParseError::UnexpectedPrefix(s.to_string()));
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| IdParseError::InvalidUuid(s.to_string()))
    }
}

/// Identifier minted locally for a preview record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EphemeralId(Uuid);

impl EphemeralId {
    /// Mint a new locally-unique identifier
    pub fn mint() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl RecordId for EphemeralId {
    const MODE: Mode = Mode::Preview;
}

impl fmt::Display for EphemeralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", EPHEMERAL_PREFIX, self.0)
    }
}

impl FromStr for EphemeralId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(EPHEMERAL_PREFIX)
            .ok_or_else(|| IdParseError::MissingPrefix(s.to_string()))?;
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| IdParseError::InvalidUuid(s.to_string()))
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(DurableId);
string_serde!(EphemeralId);
