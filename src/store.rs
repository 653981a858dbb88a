//! Local durable store for selected messages and ingestion runs.
//!
//! All writes are upserts keyed by the remote `message_id`, so repeated
//! ingestion of the same message can never duplicate it. A batch commits
//! atomically: the run row and every message row land in one transaction,
//! which keeps reported progress from ever exceeding what is durable.
//! Run attribution follows the most recent write — a message re-ingested
//! by a later run counts toward that run, and per-run counts are computed
//! at read time rather than cached.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::crypto::BodyCipher;
use crate::error::{Error, Result};
use crate::index;
use crate::models::{IngestMode, MessageRecord, RunSummary};

/// Identity of the run a batch is written under. The run row is created
/// with the first batch that commits.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_id: String,
    pub label: String,
    pub mode: IngestMode,
    pub created_at: DateTime<Utc>,
}

/// Live message count and most recent write time.
#[derive(Debug, Clone)]
pub struct StoreStatus {
    pub message_count: u64,
    pub last_write: Option<DateTime<Utc>>,
}

pub struct MessageStore {
    pool: SqlitePool,
    cipher: Option<BodyCipher>,
}

impl MessageStore {
    /// Open the store, checking that the encryption state of the database
    /// matches the configured cipher. An encrypted store without a
    /// passphrase (or vice versa, once populated) is refused up front
    /// rather than surfacing garbage text at query time.
    pub async fn open(pool: SqlitePool, cipher: Option<BodyCipher>) -> Result<Self> {
        let marker: Option<String> =
            sqlx::query_scalar("SELECT value FROM store_meta WHERE key = 'encrypted'")
                .fetch_optional(&pool)
                .await?;
        let encrypted = marker.as_deref() == Some("1");

        match (&cipher, encrypted) {
            (Some(_), false) => {
                let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
                    .fetch_one(&pool)
                    .await?;
                if count > 0 {
                    return Err(Error::Crypto(
                        "this index was created without encryption; clear it before enabling a passphrase".into(),
                    ));
                }
                sqlx::query("INSERT INTO store_meta (key, value) VALUES ('encrypted', '1') ON CONFLICT(key) DO UPDATE SET value = '1'")
                    .execute(&pool)
                    .await?;
            }
            (None, true) => {
                return Err(Error::Crypto(
                    "this index is encrypted; set the passphrase to open it".into(),
                ));
            }
            _ => {}
        }

        Ok(Self { pool, cipher })
    }

    /// Write a batch of messages attributed to `run`, atomically. Existing
    /// rows are overwritten and reattributed; a record without an id fails
    /// the whole batch with [`Error::InvalidRecord`] (callers pre-filter,
    /// this is the dedup-key backstop).
    pub async fn upsert_messages(&self, run: &RunMeta, records: &[MessageRecord]) -> Result<u64> {
        if records.iter().any(|r| r.message_id.is_empty()) {
            return Err(Error::InvalidRecord);
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO ingest_runs (run_id, label, mode, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(run_id) DO NOTHING
            "#,
        )
        .bind(&run.run_id)
        .bind(&run.label)
        .bind(run.mode.as_str())
        .bind(run.created_at.timestamp())
        .execute(&mut *tx)
        .await?;

        for record in records {
            let body_hash = hash_text(&record.body);
            let stored_body = match &self.cipher {
                Some(cipher) => cipher.encrypt(&record.body)?,
                None => record.body.clone(),
            };

            sqlx::query(
                r#"
                INSERT INTO messages (message_id, folder_id, subject, sender, received_at, weblink, body, body_hash, run_id, ingested_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(message_id) DO UPDATE SET
                    folder_id = excluded.folder_id,
                    subject = excluded.subject,
                    sender = excluded.sender,
                    received_at = excluded.received_at,
                    weblink = excluded.weblink,
                    body = excluded.body,
                    body_hash = excluded.body_hash,
                    run_id = excluded.run_id,
                    ingested_at = excluded.ingested_at
                "#,
            )
            .bind(&record.message_id)
            .bind(&record.folder_id)
            .bind(&record.subject)
            .bind(&record.sender)
            .bind(record.received_at.map(|dt| dt.timestamp()))
            .bind(&record.weblink)
            .bind(&stored_body)
            .bind(&body_hash)
            .bind(&run.run_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len() as u64)
    }

    /// Live message count and most recent write timestamp. Side-effect-free.
    pub async fn status(&self) -> Result<StoreStatus> {
        let message_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        let last_write: Option<i64> = sqlx::query_scalar("SELECT MAX(ingested_at) FROM messages")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStatus {
            message_count: message_count as u64,
            last_write: last_write.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        })
    }

    /// Ingestion runs, newest first, with live message counts computed at
    /// read time.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT r.run_id, r.label, r.mode, r.created_at, COUNT(m.message_id) AS message_count
            FROM ingest_runs r
            LEFT JOIN messages m ON m.run_id = r.run_id
            GROUP BY r.run_id
            ORDER BY r.created_at DESC, r.run_id DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let runs = rows
            .iter()
            .map(|row| {
                let mode_str: String = row.get("mode");
                let created_at: i64 = row.get("created_at");
                let message_count: i64 = row.get("message_count");
                RunSummary {
                    run_id: row.get("run_id"),
                    label: row.get("label"),
                    mode: IngestMode::parse(&mode_str).unwrap_or(IngestMode::Selection),
                    created_at: DateTime::from_timestamp(created_at, 0)
                        .unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap()),
                    message_count: message_count as u64,
                }
            })
            .collect();

        Ok(runs)
    }

    /// Delete every message still attributed to `run_id`, its index
    /// entries, and the run row, in one transaction. A missing run is a
    /// no-op returning 0.
    pub async fn clear_run(&self, run_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let ids: Vec<String> =
            sqlx::query_scalar("SELECT message_id FROM messages WHERE run_id = ?")
                .bind(run_id)
                .fetch_all(&mut *tx)
                .await?;

        index::delete_in_tx(&mut *tx, &ids).await?;

        sqlx::query("DELETE FROM messages WHERE run_id = ?")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM ingest_runs WHERE run_id = ?")
            .bind(run_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ids.len() as u64)
    }

    /// Delete every message, run, and index entry. Returns the number of
    /// messages removed.
    pub async fn clear_all(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&mut *tx)
            .await?;

        index::delete_all_in_tx(&mut *tx).await?;
        sqlx::query("DELETE FROM messages").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM ingest_runs")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(count as u64)
    }

    /// Fetch full records for the given ids, preserving input order. Ids
    /// not present (e.g. cleared between search and lookup) are skipped.
    pub async fn fetch_messages(&self, message_ids: &[String]) -> Result<Vec<MessageRecord>> {
        let mut records = Vec::with_capacity(message_ids.len());

        for id in message_ids {
            let row = sqlx::query(
                "SELECT message_id, folder_id, subject, sender, received_at, weblink, body FROM messages WHERE message_id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else { continue };

            let stored_body: String = row.get("body");
            let body = match &self.cipher {
                Some(cipher) => cipher.decrypt(&stored_body)?,
                None => stored_body,
            };
            let received_at: Option<i64> = row.get("received_at");

            records.push(MessageRecord {
                message_id: row.get("message_id"),
                folder_id: row.get("folder_id"),
                subject: row.get("subject"),
                sender: row.get("sender"),
                received_at: received_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
                weblink: row.get("weblink"),
                body,
            });
        }

        Ok(records)
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
