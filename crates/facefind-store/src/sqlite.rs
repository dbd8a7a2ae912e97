//! SQLite-backed gallery.

use crate::codec::{decode_vector, encode_vector};
use crate::{
    AggregateEmbedding, GalleryStore, Identity, IdentityId, IdentitySummary, RawEmbedding, Result,
    StoreError,
};
use facefind_core::Embedding;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS gallery_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS identities (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    description TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS raw_embeddings (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id INTEGER NOT NULL REFERENCES identities(id),
    dim         INTEGER NOT NULL,
    vector      BLOB NOT NULL,
    source_path TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_raw_embeddings_identity
    ON raw_embeddings(identity_id);

CREATE TABLE IF NOT EXISTS aggregate_embeddings (
    identity_id INTEGER PRIMARY KEY REFERENCES identities(id),
    name        TEXT NOT NULL,
    description TEXT NOT NULL,
    dim         INTEGER NOT NULL,
    vector      BLOB NOT NULL
);
";

const META_MODEL_ID: &str = "recognition_model_id";
const META_DIM: &str = "dim";

/// Gallery persisted in a single SQLite database.
///
/// The first open pins the recognition model and its dimension in
/// `gallery_meta`; later opens with a different model or dimension fail.
pub struct SqliteGallery {
    conn: Connection,
    model_id: String,
    dim: usize,
}

impl SqliteGallery {
    /// Open or create the gallery at `path` for embeddings of `model_id` with dimension `dim`.
    pub fn open(path: impl AsRef<Path>, model_id: &str, dim: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), model_id, dim, "opened gallery database");
        Self::init(conn, model_id, dim)
    }

    /// Open a private in-memory gallery.
    pub fn open_in_memory(model_id: &str, dim: usize) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, model_id, dim)
    }

    fn init(conn: Connection, model_id: &str, dim: usize) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", 1)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let gallery = Self {
            conn,
            model_id: model_id.to_string(),
            dim,
        };
        gallery.pin_model()?;
        Ok(gallery)
    }

    /// Record the model on first use, or check it against what is recorded.
    fn pin_model(&self) -> Result<()> {
        let stored_model = self.meta(META_MODEL_ID)?;
        let stored_dim = self.meta(META_DIM)?;

        match (stored_model, stored_dim) {
            (Some(model), Some(dim)) => {
                let stored_dim: usize = dim.parse().map_err(|_| StoreError::ModelMismatch {
                    expected_model: model.clone(),
                    expected_dim: 0,
                    actual_model: self.model_id.clone(),
                    actual_dim: self.dim,
                })?;
                if model != self.model_id || stored_dim != self.dim {
                    return Err(StoreError::ModelMismatch {
                        expected_model: model,
                        expected_dim: stored_dim,
                        actual_model: self.model_id.clone(),
                        actual_dim: self.dim,
                    });
                }
            }
            _ => {
                self.conn.execute(
                    "INSERT OR REPLACE INTO gallery_meta (key, value) VALUES (?1, ?2), (?3, ?4)",
                    params![META_MODEL_ID, self.model_id, META_DIM, self.dim.to_string()],
                )?;
                tracing::debug!(model_id = %self.model_id, dim = self.dim, "pinned gallery model");
            }
        }
        Ok(())
    }

    fn meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM gallery_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    fn check_vector(&self, embedding: &Embedding) -> Result<()> {
        if embedding.dim() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: embedding.dim(),
            });
        }
        if !embedding.is_finite() {
            return Err(StoreError::NonFiniteVector);
        }
        Ok(())
    }

    fn decode(&self, table: &'static str, row: i64, dim: i64, blob: &[u8]) -> Result<Embedding> {
        let corrupt = |reason: String| StoreError::CorruptVector { table, row, reason };
        let dim = usize::try_from(dim).map_err(|_| corrupt(format!("negative dimension {dim}")))?;
        if dim != self.dim {
            return Err(corrupt(format!("stored dimension {dim}, gallery expects {}", self.dim)));
        }
        decode_vector(blob, dim).map(Embedding::new).map_err(corrupt)
    }
}

impl GalleryStore for SqliteGallery {
    fn dim(&self) -> usize {
        self.dim
    }

    fn create_identity(&self, name: &str, description: &str) -> Result<IdentityId> {
        let created_at = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO identities (name, description, created_at) VALUES (?1, ?2, ?3)",
            params![name, description, created_at],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::info!(identity_id = id, name, "created identity");
        Ok(id)
    }

    fn append_raw_embedding(
        &self,
        identity_id: IdentityId,
        embedding: &Embedding,
        source_path: &str,
    ) -> Result<i64> {
        self.check_vector(embedding)?;
        self.conn.execute(
            "INSERT INTO raw_embeddings (identity_id, dim, vector, source_path)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                identity_id,
                embedding.dim() as i64,
                encode_vector(&embedding.values),
                source_path
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn commit_aggregate(
        &self,
        identity_id: IdentityId,
        name: &str,
        description: &str,
        vectors: &[Embedding],
    ) -> Result<Embedding> {
        if vectors.is_empty() {
            return Err(StoreError::EmptyAggregateInput);
        }
        for v in vectors {
            self.check_vector(v)?;
        }
        let mean = Embedding::mean(vectors).ok_or(StoreError::EmptyAggregateInput)?;
        self.check_vector(&mean)?;

        self.conn.execute(
            "INSERT INTO aggregate_embeddings (identity_id, name, description, dim, vector)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity_id,
                name,
                description,
                mean.dim() as i64,
                encode_vector(&mean.values)
            ],
        )?;

        tracing::info!(identity_id, name, from = vectors.len(), "committed aggregate embedding");
        Ok(mean)
    }

    fn list_aggregates(&self) -> Result<Vec<AggregateEmbedding>> {
        let mut stmt = self.conn.prepare(
            "SELECT identity_id, name, description, dim, vector FROM aggregate_embeddings
             ORDER BY identity_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Vec<u8>>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (identity_id, name, description, dim, blob) = row?;
            let embedding = self.decode("aggregate_embeddings", identity_id, dim, &blob)?;
            out.push(AggregateEmbedding {
                identity_id,
                name,
                description,
                embedding,
            });
        }
        Ok(out)
    }

    fn list_identities(&self) -> Result<Vec<IdentitySummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT i.id, i.name, i.description, i.created_at,
                    (SELECT COUNT(*) FROM raw_embeddings r WHERE r.identity_id = i.id),
                    EXISTS (SELECT 1 FROM aggregate_embeddings a WHERE a.identity_id = i.id)
             FROM identities i
             ORDER BY i.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(IdentitySummary {
                identity: Identity {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    created_at: row.get(3)?,
                },
                raw_embeddings: row.get::<_, i64>(4)? as usize,
                has_aggregate: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn raw_embeddings(&self, identity_id: IdentityId) -> Result<Vec<RawEmbedding>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, dim, vector, source_path FROM raw_embeddings
             WHERE identity_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![identity_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, dim, blob, source_path) = row?;
            out.push(RawEmbedding {
                id,
                identity_id,
                embedding: self.decode("raw_embeddings", id, dim, &blob)?,
                source_path,
            });
        }
        Ok(out)
    }
}
