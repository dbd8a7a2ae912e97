//! facefind-store — Gallery of identities and their face embeddings.
//!
//! Every identity owns the raw embeddings captured while ingesting its
//! reference images, plus at most one aggregate embedding (their mean) that
//! the matching pipeline compares probes against.

pub mod codec;
pub mod sqlite;

use facefind_core::Embedding;
use serde::Serialize;
use thiserror::Error;

pub use sqlite::SqliteGallery;

pub type IdentityId = i64;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("gallery store unavailable: {0}")]
    Unavailable(#[source] rusqlite::Error),
    /// A write broke a schema rule: unknown identity, or a second aggregate.
    #[error("gallery constraint violated: {0}")]
    Constraint(#[source] rusqlite::Error),
    #[error("gallery store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding has {actual} dimensions, gallery expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding contains NaN or infinite values")]
    NonFiniteVector,
    #[error("cannot commit an aggregate from zero embeddings")]
    EmptyAggregateInput,
    #[error("gallery holds {expected_model} ({expected_dim}-d) embeddings, refusing {actual_model} ({actual_dim}-d)")]
    ModelMismatch {
        expected_model: String,
        expected_dim: usize,
        actual_model: String,
        actual_dim: usize,
    },
    #[error("corrupt vector in {table} row {row}: {reason}")]
    CorruptVector {
        table: &'static str,
        row: i64,
        reason: String,
    },
}

impl StoreError {
    /// Whether the error must abort the whole run.
    ///
    /// A wrong-sized or non-finite vector only spoils the one write it was
    /// part of; every other store error means the gallery can no longer be
    /// trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            StoreError::DimensionMismatch { .. } | StoreError::NonFiniteVector
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => StoreError::Constraint(err),
            _ => StoreError::Unavailable(err),
        }
    }
}

/// A named person enrolled in the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    pub description: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// An identity plus what has been captured for it.
#[derive(Debug, Clone, Serialize)]
pub struct IdentitySummary {
    #[serde(flatten)]
    pub identity: Identity,
    pub raw_embeddings: usize,
    pub has_aggregate: bool,
}

/// One embedding from one reference image.
#[derive(Debug, Clone)]
pub struct RawEmbedding {
    pub id: i64,
    pub identity_id: IdentityId,
    pub embedding: Embedding,
    pub source_path: String,
}

/// The mean embedding an identity is matched by. Name and description are
/// copied from the identity at commit time.
#[derive(Debug, Clone)]
pub struct AggregateEmbedding {
    pub identity_id: IdentityId,
    pub name: String,
    pub description: String,
    pub embedding: Embedding,
}

/// Persistence contract for the gallery.
///
/// Each write is durable on return; there is no transaction spanning an
/// identity's ingestion.
pub trait GalleryStore {
    /// Dimension `D` every stored vector must have.
    fn dim(&self) -> usize;

    /// Insert a new identity. Duplicate names create a new identity.
    fn create_identity(&self, name: &str, description: &str) -> Result<IdentityId>;

    /// Append one raw embedding for `identity_id`.
    fn append_raw_embedding(
        &self,
        identity_id: IdentityId,
        embedding: &Embedding,
        source_path: &str,
    ) -> Result<i64>;

    /// Store the element-wise mean of `vectors` as the identity's aggregate and return it.
    fn commit_aggregate(
        &self,
        identity_id: IdentityId,
        name: &str,
        description: &str,
        vectors: &[Embedding],
    ) -> Result<Embedding>;

    /// All aggregate embeddings, in no meaningful order.
    fn list_aggregates(&self) -> Result<Vec<AggregateEmbedding>>;

    /// All identities with their capture counts, oldest first.
    fn list_identities(&self) -> Result<Vec<IdentitySummary>>;

    /// Raw embeddings for one identity, in insertion order.
    fn raw_embeddings(&self, identity_id: IdentityId) -> Result<Vec<RawEmbedding>>;
}
