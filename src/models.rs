//! Core data types flowing through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Folder id recorded for messages ingested by explicit selection rather
/// than by folder scope.
pub const SELECTION_FOLDER_ID: &str = "selection";

/// One email as fetched from the remote mail source and stored locally.
///
/// `message_id` is the remote provider's stable identifier and doubles as
/// the local primary key: the same message fetched twice always lands on
/// the same row and the same index entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub folder_id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub weblink: Option<String>,
    pub body: String,
}

impl MessageRecord {
    /// Text handed to the embedder: subject and body together, so a match
    /// on either surfaces the message.
    pub fn index_text(&self) -> String {
        match self.subject.as_deref() {
            Some(s) if !s.is_empty() => format!("{}\n\n{}", s, self.body),
            _ => self.body.clone(),
        }
    }
}

/// A mail folder as reported by the remote source. `total_item_count` is
/// the provider's estimate and may be stale in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailFolder {
    pub id: String,
    pub display_name: String,
    pub total_item_count: u64,
}

/// One page of a folder listing plus the opaque continuation token for the
/// next page, if any.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub items: Vec<MessageRecord>,
    pub next_page: Option<String>,
}

/// How a run selected its messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Most-recent-N messages from each of a set of folders.
    Folders,
    /// An explicit, fixed list of message identifiers.
    Selection,
}

impl IngestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestMode::Folders => "folders",
            IngestMode::Selection => "selection",
        }
    }

    pub fn parse(s: &str) -> Option<IngestMode> {
        match s {
            "folders" => Some(IngestMode::Folders),
            "selection" => Some(IngestMode::Selection),
            _ => None,
        }
    }
}

/// Run metadata as listed for the user. `message_count` is computed at
/// read time: messages re-ingested by a later run are attributed to that
/// run, not this one.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub label: String,
    pub mode: IngestMode,
    pub created_at: DateTime<Utc>,
    pub message_count: u64,
}

/// Snapshot of what is indexed.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub indexed_count: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// One cited source backing an answer, best match first.
#[derive(Debug, Clone, Serialize)]
pub struct SourceCitation {
    pub message_id: String,
    pub weblink: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub snippet: String,
    /// Cosine similarity against the question, higher is better.
    pub score: f32,
}

/// A synthesized answer with its ordered citations and per-stage latency.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceCitation>,
    pub retrieval_ms: u64,
    pub synthesis_ms: u64,
}
