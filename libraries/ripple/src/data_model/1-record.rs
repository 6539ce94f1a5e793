//! # Record
//! A record is one row of a remote collection, decoded into a Rust type.
//! Rows travel as JSON objects (that's what the hosted store speaks), so a record needs to know how to get in and out of JSON.
//! Records also carry their own identity and creation time, which together define the order a cache is kept in.

/// A raw row as the backing store hands it to us.
pub type Row = serde_json::Value;

pub trait Record: Sized + Clone {
    fn id(&self) -> &str;
    fn created_at(&self) -> chrono::DateTime<chrono::Utc>;

    fn from_row(row: &Row) -> Result<Self, serde_json::Error>;
    fn to_row(&self) -> Result<Row, serde_json::Error>;
}

/// The identity a write is performed as. Opaque to us.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        ActorId(value.to_string())
    }
}
