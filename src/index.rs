//! Vector index over the `message_vectors` table.
//!
//! One entry per live message, keyed by `message_id`. Writes are upserts:
//! re-ingesting a message replaces its vector, never appends. Search loads
//! the candidate vectors and ranks by cosine similarity in Rust — at the
//! few-thousand-message scale this index targets, a linear scan beats
//! maintaining an ANN structure.

use sqlx::{Row, SqliteConnection, SqlitePool};
use std::sync::Arc;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::error::Result;
use crate::models::{IndexStatus, MessageRecord};

/// A ranked search hit. `score` is cosine similarity against the query:
/// higher is better, range [-1, 1].
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub message_id: String,
    pub score: f32,
}

pub struct VectorIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
}

impl VectorIndex {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>) -> Self {
        Self { pool, embedder }
    }

    /// Embed a batch of messages and upsert their vectors. An existing
    /// entry for the same `message_id` is replaced.
    pub async fn add_or_replace(&self, records: &[MessageRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = records.iter().map(|r| r.index_text()).collect();
        let vectors = self.embedder.embed(&texts).await?;

        let model = self.embedder.model_name();
        let dims = self.embedder.dims() as i64;
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;
        for (record, vector) in records.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO message_vectors (message_id, model, dims, embedding, created_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(message_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&record.message_id)
            .bind(model)
            .bind(dims)
            .bind(vec_to_blob(vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Remove entries for the given ids. Absent keys are ignored.
    pub async fn delete(&self, message_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        delete_in_tx(&mut *tx, message_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Clear the entire index.
    pub async fn delete_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM message_vectors")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Embed `query_text` and return up to `k` nearest entries, best
    /// first. Entries written under a different embedding model are
    /// skipped — scores across models are not comparable.
    pub async fn search(&self, query_text: &str, k: usize) -> Result<Vec<SearchHit>> {
        let query_vec = self
            .embedder
            .embed(&[query_text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                crate::error::Error::EmbeddingUnavailable("empty embedding response".into())
            })?;

        let rows = sqlx::query("SELECT message_id, embedding FROM message_vectors WHERE model = ?")
            .bind(self.embedder.model_name())
            .fetch_all(&self.pool)
            .await?;

        let mut hits: Vec<SearchHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                SearchHit {
                    message_id: row.get("message_id"),
                    score: cosine_similarity(&query_vec, &vec),
                }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        hits.truncate(k);

        Ok(hits)
    }

    /// Entry count and most recent write time.
    pub async fn status(&self) -> Result<IndexStatus> {
        let indexed_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_vectors")
            .fetch_one(&self.pool)
            .await?;

        let last_updated: Option<i64> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM message_vectors")
                .fetch_one(&self.pool)
                .await?;

        Ok(IndexStatus {
            indexed_count: indexed_count as u64,
            last_updated: last_updated.and_then(|ts| chrono::DateTime::from_timestamp(ts, 0)),
        })
    }
}

/// Delete index entries inside a caller-owned transaction. Used by the
/// store so a scoped or full clear removes messages and their vectors in
/// one atomic step, with no window where a query sees one but not the
/// other.
pub(crate) async fn delete_in_tx(
    tx: &mut SqliteConnection,
    message_ids: &[String],
) -> sqlx::Result<()> {
    for id in message_ids {
        sqlx::query("DELETE FROM message_vectors WHERE message_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    Ok(())
}

pub(crate) async fn delete_all_in_tx(tx: &mut SqliteConnection) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM message_vectors")
        .execute(&mut *tx)
        .await?;
    Ok(())
}
