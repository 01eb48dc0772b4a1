use std::{
    fmt::{self, Display},
    str::FromStr,
    sync::atomic::{AtomicU32, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub mod test_objects;

const OBJECT_ID_LEN: usize = 12;
const COUNTER_MASK: u32 = 0x00ff_ffff;

// Random per process so ids minted by different server instances don't collide.
static PROCESS_UNIQUE: Lazy<[u8; 5]> = Lazy::new(rand::random);
static COUNTER: Lazy<AtomicU32> = Lazy::new(|| AtomicU32::new(rand::random::<u32>() & COUNTER_MASK));

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IdParseError {
    #[error("invalid id length {0}, expected 24 hex characters")]
    InvalidLength(usize),

    #[error("invalid id {id:?}: {source}")]
    InvalidHex {
        id: String,
        #[source]
        source: hex::FromHexError,
    },
}

/// Opaque 12 byte document identifier.
///
/// The first four bytes hold the creation time in seconds, the next five are
/// random per process and the last three are a wrapping counter. It is
/// rendered as 24 lowercase hex characters everywhere outside the store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();
        let counter = COUNTER.fetch_add(1, Ordering::SeqCst) & COUNTER_MASK;

        let mut bytes = [0u8; OBJECT_ID_LEN];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn parse_str(s: &str) -> Result<Self, IdParseError> {
        if s.len() != OBJECT_ID_LEN * 2 {
            return Err(IdParseError::InvalidLength(s.len()));
        }
        let mut bytes = [0u8; OBJECT_ID_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|source| IdParseError::InvalidHex {
            id: s.to_string(),
            source,
        })?;
        Ok(Self(bytes))
    }

    pub fn bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Seconds since the epoch at which the id was minted.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_str(s)
    }
}

impl TryFrom<String> for ObjectId {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_str(&value)
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.to_hex()
    }
}

/// A record that lives in a collection and is addressed by an [`ObjectId`].
pub trait Document: Serialize + serde::de::DeserializeOwned + fmt::Debug + Send + Sync {
    fn id(&self) -> Option<ObjectId>;

    fn set_id(&mut self, id: ObjectId);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct User {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
}

impl User {
    pub fn new(username: &str, email: &str) -> Self {
        Self {
            id: None,
            username: username.to_string(),
            email: email.to_string(),
        }
    }
}

impl Document for User {
    fn id(&self) -> Option<ObjectId> {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }
}

/// Metadata of one stored image. The bytes live in blob storage at
/// `blob_url`; several files may share a `filename`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageFile {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub filename: String,
    pub mime_type: String,
    pub length: u64,
    pub sha256: String,
    pub upload_date: u64,
    pub blob_url: String,
}

impl Document for ImageFile {
    fn id(&self) -> Option<ObjectId> {
        self.id
    }

    fn set_id(&mut self, id: ObjectId) {
        self.id = Some(id);
    }
}

pub fn get_epoch_time_in_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
