//! facegate-store — Persistent credential records.
//!
//! A record ties an identity name to one face template and the face crop it
//! was extracted from. Records are only ever appended.

pub mod sqlite;

pub use sqlite::SqliteCredentialStore;

use facegate_core::{FaceTemplate, TemplateError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("credential store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
    #[error("cannot create store directory {path}: {source}")]
    Directory {
        path: String,
        source: std::io::Error,
    },
    #[error("credential store lock poisoned")]
    Poisoned,
    #[error("identity must not be empty")]
    EmptyIdentity,
    #[error("record {id} is corrupt: {source}")]
    Corrupt { id: i64, source: TemplateError },
}

/// One enrolled face.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    pub id: i64,
    pub identity: String,
    pub template: FaceTemplate,
    /// PNG-encoded grayscale face crop.
    pub photo: Vec<u8>,
    pub template_version: u32,
    /// RFC 3339 UTC timestamp.
    pub created_at: String,
}

/// Listing view of a record, without the template and photo payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSummary {
    pub id: i64,
    pub identity: String,
    pub template_bytes: usize,
    pub photo_bytes: usize,
    /// Raw stored version; may be one this build cannot decode.
    pub template_version: i64,
    pub created_at: String,
}

/// Durable storage for enrolled faces.
///
/// Implementations never update or delete records. Inserts are atomic with
/// respect to reads.
pub trait CredentialStore {
    /// Create the persisted structure if absent. Safe to call on every start.
    fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Append a record and return its id. Existing records for the same
    /// identity are left untouched.
    fn insert(&self, identity: &str, template: &FaceTemplate, photo: &[u8]) -> Result<i64, StoreError>;

    /// Most recently inserted record for `identity`.
    fn find_latest(&self, identity: &str) -> Result<Option<CredentialRecord>, StoreError>;

    /// Every record, oldest first.
    fn list(&self) -> Result<Vec<RecordSummary>, StoreError>;
}
