//! End-to-end pipeline tests over scratch databases, with deterministic
//! fakes standing in for the remote mail source, the embedder, and the
//! text-completion service.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use mailbrief::answer::{AnswerEngine, NO_ANSWER_TEXT};
use mailbrief::config::{IngestConfig, RetrievalConfig};
use mailbrief::control::IngestControl;
use mailbrief::crypto::BodyCipher;
use mailbrief::db;
use mailbrief::embedding::Embedder;
use mailbrief::error::{Error, Result};
use mailbrief::graph::MailSource;
use mailbrief::index::VectorIndex;
use mailbrief::ingest::{IngestSelection, Ingestor, RunStatus};
use mailbrief::migrate;
use mailbrief::models::{MailFolder, MessagePage, MessageRecord, SELECTION_FOLDER_ID};
use mailbrief::progress::{IngestEvent, IngestPhase, IngestReporter, NullProgress};
use mailbrief::store::MessageStore;
use mailbrief::synth::Synthesizer;

// ============ Fakes ============

/// Embeds text onto fixed topic axes, so similarity is predictable: texts
/// sharing a topic word score near 1.0 against each other, unrelated
/// texts near 0.0.
struct FakeEmbedder;

const TOPICS: [&str; 3] = ["invoice", "lunch", "meeting"];

fn embed_one(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = TOPICS
        .iter()
        .map(|t| if lower.contains(t) { 1.0 } else { 0.0 })
        .collect();
    // Small constant axis keeps vectors non-zero for topic-free text.
    v.push(0.05);
    v
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-minilm"
    }

    fn dims(&self) -> usize {
        4
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_one(t)).collect())
    }
}

/// In-memory mail source with paginated folder listings and id lookup.
#[derive(Default, Clone)]
struct FakeMailSource {
    folders: Vec<MailFolder>,
    listings: HashMap<String, Vec<MessageRecord>>,
    by_id: HashMap<String, MessageRecord>,
}

impl FakeMailSource {
    fn new() -> Self {
        Self::default()
    }

    /// Register a folder. `reported_count` is what the provider claims;
    /// the actual listing may be shorter (stale counts are normal).
    fn add_folder(
        &mut self,
        id: &str,
        name: &str,
        reported_count: u64,
        records: Vec<MessageRecord>,
    ) {
        self.folders.push(MailFolder {
            id: id.to_string(),
            display_name: name.to_string(),
            total_item_count: reported_count,
        });
        for r in &records {
            self.by_id.insert(r.message_id.clone(), r.clone());
        }
        self.listings.insert(id.to_string(), records);
    }

    /// Register a message reachable only by id (for explicit selections).
    fn add_loose(&mut self, record: MessageRecord) {
        self.by_id.insert(record.message_id.clone(), record);
    }
}

#[async_trait]
impl MailSource for FakeMailSource {
    async fn list_folders(&self) -> Result<Vec<MailFolder>> {
        Ok(self.folders.clone())
    }

    async fn list_messages(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<MessagePage> {
        let items = self.listings.get(folder_id).cloned().unwrap_or_default();
        let offset: usize = page_token.map(|t| t.parse().unwrap()).unwrap_or(0);
        let end = (offset + page_size).min(items.len());
        let next_page = (end < items.len()).then(|| end.to_string());

        Ok(MessagePage {
            items: items[offset..end].to_vec(),
            next_page,
        })
    }

    async fn fetch_messages(&self, ids: &[String]) -> Result<Vec<MessageRecord>> {
        // Unknown ids are simply absent from the response, like a message
        // deleted remotely after selection.
        Ok(ids
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .map(|r| {
                let mut r = r.clone();
                r.folder_id = SELECTION_FOLDER_ID.to_string();
                r
            })
            .collect())
    }

    async fn resolve_weblink(&self, message_id: &str) -> Result<Option<String>> {
        Ok(self.by_id.get(message_id).and_then(|r| r.weblink.clone()))
    }
}

struct FakeSynthesizer {
    fail: bool,
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if self.fail {
            return Err(Error::SynthesisFailed("model unavailable".into()));
        }
        Ok(format!(
            "Grounded answer citing {} source(s).",
            prompt.matches("Subject:").count()
        ))
    }
}

/// Captures every progress event; optionally hard-cancels the run once
/// the stored counter reaches a threshold.
#[derive(Default)]
struct RecordingReporter {
    events: Mutex<Vec<IngestEvent>>,
    cancel_when_stored: Mutex<Option<(u64, IngestControl)>>,
}

impl RecordingReporter {
    fn cancel_at(threshold: u64, control: IngestControl) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            cancel_when_stored: Mutex::new(Some((threshold, control))),
        }
    }

    fn events(&self) -> Vec<IngestEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl IngestReporter for RecordingReporter {
    fn report(&self, event: IngestEvent) {
        if let IngestEvent::Stored { stored, .. } = &event {
            let mut pending = self.cancel_when_stored.lock().unwrap();
            let hit = matches!(pending.as_ref(), Some((threshold, _)) if stored >= threshold);
            if hit {
                if let Some((_, control)) = pending.take() {
                    control.cancel();
                }
            }
        }
        self.events.lock().unwrap().push(event);
    }
}

// ============ Harness ============

fn msg(id: &str, folder: &str, subject: &str, body: &str) -> MessageRecord {
    MessageRecord {
        message_id: id.to_string(),
        folder_id: folder.to_string(),
        subject: Some(subject.to_string()),
        sender: Some("someone@example.com".to_string()),
        received_at: chrono::DateTime::from_timestamp(1_700_000_000, 0),
        weblink: Some(format!("https://outlook.example/owa/{}", id)),
        body: body.to_string(),
    }
}

/// N filler messages about lunch, distinct ids with the given prefix.
fn lunch_messages(folder: &str, prefix: &str, n: usize) -> Vec<MessageRecord> {
    (0..n)
        .map(|i| {
            msg(
                &format!("{}{}", prefix, i),
                folder,
                &format!("Lunch plan {}", i),
                "lunch at noon, tacos again",
            )
        })
        .collect()
}

struct Pipeline {
    _tmp: TempDir,
    store: Arc<MessageStore>,
    index: Arc<VectorIndex>,
}

async fn pipeline() -> Pipeline {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("mail.db")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    let store = Arc::new(MessageStore::open(pool.clone(), None).await.unwrap());
    let index = Arc::new(VectorIndex::new(pool, Arc::new(FakeEmbedder)));
    Pipeline {
        _tmp: tmp,
        store,
        index,
    }
}

impl Pipeline {
    fn ingestor(&self, mail: FakeMailSource, batch_size: usize, page_size: usize) -> Ingestor {
        let tuning = IngestConfig {
            batch_size,
            page_size,
            per_folder_limit: 50,
            indexing_floor_ms: 0,
        };
        Ingestor::new(self.store.clone(), self.index.clone(), Arc::new(mail), tuning)
    }

    fn engine(&self, fail_synthesis: bool) -> AnswerEngine {
        AnswerEngine::new(
            self.store.clone(),
            self.index.clone(),
            Arc::new(FakeSynthesizer {
                fail: fail_synthesis,
            }),
            RetrievalConfig::default(),
        )
    }

    async fn indexed_count(&self) -> u64 {
        self.index.status().await.unwrap().indexed_count
    }
}

fn folders(ids: &[&str]) -> IngestSelection {
    IngestSelection::Folders {
        folder_ids: ids.iter().map(|s| s.to_string()).collect(),
        per_folder_limit: 50,
    }
}

// ============ Ingestion properties ============

#[tokio::test]
async fn reingestion_is_idempotent() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    mail.add_folder(
        "f1",
        "Inbox",
        3,
        vec![
            msg("m1", "f1", "Invoice #42", "invoice total $120"),
            msg("m2", "f1", "Lunch", "lunch tomorrow?"),
            msg("m3", "f1", "Standup", "meeting notes"),
        ],
    );
    let ingestor = p.ingestor(mail, 25, 10);

    let first = ingestor
        .run(folders(&["f1"]), &IngestControl::new(), &NullProgress)
        .await
        .unwrap();
    let second = ingestor
        .run(folders(&["f1"]), &IngestControl::new(), &NullProgress)
        .await
        .unwrap();

    // The second run still counts its writes as stored...
    assert_eq!(first.stored, 3);
    assert_eq!(second.stored, 3);

    // ...but there is exactly one live copy and one vector per message.
    assert_eq!(p.store.status().await.unwrap().message_count, 3);
    assert_eq!(p.indexed_count().await, 3);

    // Attribution moved to the later run.
    let runs = p.store.list_runs(10).await.unwrap();
    assert_eq!(runs.len(), 2);
    let count_of = |run_id: &str| {
        runs.iter()
            .find(|r| r.run_id == run_id)
            .map(|r| r.message_count)
            .unwrap()
    };
    assert_eq!(count_of(&first.run_id), 0);
    assert_eq!(count_of(&second.run_id), 3);
}

#[tokio::test]
async fn explicit_selection_dedups_and_uses_sentinel_folder() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    mail.add_loose(msg("m1", "f1", "Invoice #42", "invoice attached"));
    mail.add_loose(msg("m2", "f1", "Lunch", "lunch thursday"));
    let ingestor = p.ingestor(mail, 25, 10);

    let selection = IngestSelection::Messages {
        message_ids: vec![
            "m1".into(),
            "m2".into(),
            "m1".into(),  // duplicate
            "".into(),    // no identifier
            "ghost".into(), // gone from the remote source
        ],
    };
    let outcome = ingestor
        .run(selection, &IngestControl::new(), &NullProgress)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stored, 2);
    assert_eq!(outcome.rejected, 2);
    assert_eq!(outcome.message_ids, vec!["m1".to_string(), "m2".to_string()]);

    let fetched = p.store.fetch_messages(&["m1".into()]).await.unwrap();
    assert_eq!(fetched[0].folder_id, SELECTION_FOLDER_ID);
}

#[tokio::test]
async fn clear_run_removes_only_that_runs_messages() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    mail.add_folder("f1", "Billing", 2, {
        vec![
            msg("a1", "f1", "Invoice March", "invoice total $10"),
            msg("a2", "f1", "Invoice April", "invoice total $20"),
        ]
    });
    mail.add_folder("f2", "Social", 3, lunch_messages("f2", "b", 3));
    let ingestor = p.ingestor(mail, 25, 10);

    let run1 = ingestor
        .run(folders(&["f1"]), &IngestControl::new(), &NullProgress)
        .await
        .unwrap();
    ingestor
        .run(folders(&["f2"]), &IngestControl::new(), &NullProgress)
        .await
        .unwrap();
    assert_eq!(p.indexed_count().await, 5);

    let deleted = p.store.clear_run(&run1.run_id).await.unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(p.indexed_count().await, 3);

    // The other run's messages are untouched and still retrievable.
    let remaining = p
        .store
        .fetch_messages(&["b0".into(), "b1".into(), "b2".into()])
        .await
        .unwrap();
    assert_eq!(remaining.len(), 3);
    assert!(p
        .store
        .list_runs(10)
        .await
        .unwrap()
        .iter()
        .all(|r| r.run_id != run1.run_id));

    // Clearing an unknown run is a no-op, not an error.
    assert_eq!(p.store.clear_run("nope").await.unwrap(), 0);
}

#[tokio::test]
async fn clear_all_resets_store_index_and_answers() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    mail.add_folder(
        "f1",
        "Inbox",
        1,
        vec![msg("m1", "f1", "Invoice", "invoice body")],
    );
    mail.add_folder("f2", "Social", 3, lunch_messages("f2", "b", 3));
    let ingestor = p.ingestor(mail, 25, 10);

    ingestor
        .run(folders(&["f1", "f2"]), &IngestControl::new(), &NullProgress)
        .await
        .unwrap();
    assert_eq!(p.indexed_count().await, 4);

    let deleted = p.store.clear_all().await.unwrap();
    assert_eq!(deleted, 4);
    assert_eq!(p.indexed_count().await, 0);
    assert!(p.store.list_runs(10).await.unwrap().is_empty());

    // Queries now short-circuit to the deterministic no-answer result.
    let answer = p.engine(false).answer("any invoices?", 3).await.unwrap();
    assert_eq!(answer.answer, NO_ANSWER_TEXT);
    assert!(answer.sources.is_empty());
}

#[tokio::test]
async fn progress_counters_are_monotonic_and_phases_ordered() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    mail.add_folder("f1", "Inbox", 12, lunch_messages("f1", "m", 12));
    let ingestor = p.ingestor(mail, 4, 5);

    let reporter = RecordingReporter::default();
    ingestor
        .run(folders(&["f1"]), &IngestControl::new(), &reporter)
        .await
        .unwrap();

    let events = reporter.events();

    let phases: Vec<IngestPhase> = events
        .iter()
        .filter_map(|e| match e {
            IngestEvent::Phase { phase } => Some(*phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            IngestPhase::Collecting,
            IngestPhase::Storing,
            IngestPhase::Indexing,
            IngestPhase::Done
        ]
    );

    let mut last_collected = 0u64;
    let mut last_stored = 0u64;
    for event in &events {
        match event {
            IngestEvent::Collected { collected, .. } => {
                assert!(*collected >= last_collected, "collected went backwards");
                last_collected = *collected;
            }
            IngestEvent::Stored { stored, .. } => {
                assert!(*stored >= last_stored, "stored went backwards");
                last_stored = *stored;
            }
            IngestEvent::Phase { .. } => {}
        }
    }
    assert_eq!(last_collected, 12);
    assert_eq!(last_stored, 12);
    assert!(last_stored <= last_collected);
}

#[tokio::test]
async fn hard_cancel_preserves_committed_batches() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    mail.add_folder("f1", "Inbox", 10, lunch_messages("f1", "m", 10));
    let ingestor = p.ingestor(mail, 2, 25);

    // Cancel as soon as two batches (4 messages) are committed; the gate
    // before the next batch sees it.
    let control = IngestControl::new();
    let reporter = RecordingReporter::cancel_at(4, control.clone());

    let outcome = ingestor
        .run(folders(&["f1"]), &control, &reporter)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.stored, 4);
    assert_eq!(outcome.message_ids.len(), 4);
    assert_eq!(p.indexed_count().await, 4);
    assert_eq!(p.store.status().await.unwrap().message_count, 4);
}

#[tokio::test]
async fn folder_caps_and_stale_counts_shape_the_estimate() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    // Reported 60 but only 30 actually listed (stale count), and a full 80.
    mail.add_folder("small", "Small", 60, lunch_messages("small", "s", 30));
    mail.add_folder("big", "Big", 80, lunch_messages("big", "g", 80));
    let ingestor = p.ingestor(mail, 25, 25);

    let reporter = RecordingReporter::default();
    let outcome = ingestor
        .run(folders(&["small", "big"]), &IngestControl::new(), &reporter)
        .await
        .unwrap();

    // Estimate: min(50, 60) + min(50, 80) = 100. Actual: 30 + 50 = 80.
    let last_collected = reporter
        .events()
        .iter()
        .rev()
        .find_map(|e| match e {
            IngestEvent::Collected {
                collected,
                expected,
            } => Some((*collected, *expected)),
            _ => None,
        })
        .unwrap();
    assert_eq!(last_collected, (80, Some(100)));

    assert_eq!(outcome.stored, 80);
    assert_eq!(p.indexed_count().await, 80);
}

#[tokio::test]
async fn empty_selection_fails_without_touching_the_store() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    mail.add_folder("f1", "Empty", 0, Vec::new());
    let ingestor = p.ingestor(mail, 25, 10);

    let failure = ingestor
        .run(folders(&["f1"]), &IngestControl::new(), &NullProgress)
        .await
        .unwrap_err();

    assert!(matches!(failure.error, Error::NoItemsSelected));
    assert_eq!(failure.committed, 0);
    assert_eq!(p.store.status().await.unwrap().message_count, 0);
    assert!(p.store.list_runs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn records_without_identifiers_are_skipped_not_fatal() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    mail.add_folder(
        "f1",
        "Inbox",
        3,
        vec![
            msg("m1", "f1", "Invoice", "invoice one"),
            msg("", "f1", "Broken", "no id on this one"),
            msg("m2", "f1", "Invoice", "invoice two"),
        ],
    );
    let ingestor = p.ingestor(mail, 25, 10);

    let outcome = ingestor
        .run(folders(&["f1"]), &IngestControl::new(), &NullProgress)
        .await
        .unwrap();

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.stored, 2);
    assert_eq!(outcome.rejected, 1);
    assert_eq!(p.indexed_count().await, 2);
}

#[tokio::test]
async fn concurrent_second_run_is_rejected() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    mail.add_folder("f1", "Inbox", 3, lunch_messages("f1", "m", 3));
    let ingestor = Arc::new(p.ingestor(mail, 25, 10));

    // Park the first run at its opening pause gate.
    let control = IngestControl::new();
    control.request_pause();
    let background = {
        let ingestor = ingestor.clone();
        let control = control.clone();
        tokio::spawn(async move {
            ingestor
                .run(folders(&["f1"]), &control, &NullProgress)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = ingestor
        .run(folders(&["f1"]), &IngestControl::new(), &NullProgress)
        .await;
    assert!(matches!(
        second.unwrap_err().error,
        Error::RunInProgress
    ));

    // Resolve the parked run by cancelling it.
    control.cancel();
    let outcome = background.await.unwrap().unwrap();
    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(outcome.stored, 0);
}

#[tokio::test]
async fn index_delete_ignores_absent_keys() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    mail.add_folder("f1", "Inbox", 2, lunch_messages("f1", "m", 2));
    let ingestor = p.ingestor(mail, 25, 10);
    ingestor
        .run(folders(&["f1"]), &IngestControl::new(), &NullProgress)
        .await
        .unwrap();
    assert_eq!(p.indexed_count().await, 2);

    p.index
        .delete(&["m0".into(), "never-existed".into()])
        .await
        .unwrap();
    assert_eq!(p.indexed_count().await, 1);

    p.index.delete_all().await.unwrap();
    assert_eq!(p.indexed_count().await, 0);
}

// ============ Retrieval properties ============

#[tokio::test]
async fn one_relevant_message_yields_exactly_one_source() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    let mut records = lunch_messages("f1", "noise", 9);
    records.push(msg(
        "inv1",
        "f1",
        "Invoice #77 from Acme",
        "invoice for March, total due $450",
    ));
    mail.add_folder("f1", "Inbox", 10, records);
    let ingestor = p.ingestor(mail, 25, 25);
    ingestor
        .run(folders(&["f1"]), &IngestControl::new(), &NullProgress)
        .await
        .unwrap();

    let answer = p
        .engine(false)
        .answer("find invoices from last month", 3)
        .await
        .unwrap();

    // Unrelated lunch mail sits below the relevance floor: one source,
    // not three padded ones.
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].message_id, "inv1");
    assert!(answer.sources[0].score >= 0.25);
    assert!(!answer.answer.is_empty());
    assert_ne!(answer.answer, NO_ANSWER_TEXT);
}

#[tokio::test]
async fn sources_are_ranked_best_first_and_truncated() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    let mut records = vec![
        msg("inv1", "f1", "Invoice #1", "invoice one, total $10"),
        msg("inv2", "f1", "Invoice #2", "invoice two, total $20"),
        msg("inv3", "f1", "Invoice #3", "invoice three, total $30"),
        msg("inv4", "f1", "Invoice #4", "invoice four, total $40"),
        msg("inv5", "f1", "Invoice #5", "invoice five, total $50"),
    ];
    records.extend(lunch_messages("f1", "noise", 3));
    mail.add_folder("f1", "Inbox", 8, records);
    let ingestor = p.ingestor(mail, 25, 25);
    ingestor
        .run(folders(&["f1"]), &IngestControl::new(), &NullProgress)
        .await
        .unwrap();

    let answer = p.engine(false).answer("any invoices due?", 3).await.unwrap();

    assert_eq!(answer.sources.len(), 3);
    for pair in answer.sources.windows(2) {
        assert!(pair[0].score >= pair[1].score, "sources not ranked");
    }
    assert!(answer.sources.iter().all(|s| s.message_id.starts_with("inv")));
}

#[tokio::test]
async fn synthesis_failure_still_surfaces_sources() {
    let p = pipeline().await;
    let mut mail = FakeMailSource::new();
    mail.add_folder(
        "f1",
        "Inbox",
        1,
        vec![msg("inv1", "f1", "Invoice #9", "invoice overdue")],
    );
    let ingestor = p.ingestor(mail, 25, 10);
    ingestor
        .run(folders(&["f1"]), &IngestControl::new(), &NullProgress)
        .await
        .unwrap();

    let failure = p
        .engine(true)
        .answer("which invoice is overdue?", 3)
        .await
        .unwrap_err();

    assert!(matches!(failure.error, Error::SynthesisFailed(_)));
    assert_eq!(failure.sources.len(), 1);
    assert_eq!(failure.sources[0].message_id, "inv1");
}

#[tokio::test]
async fn empty_question_never_calls_external_services() {
    let p = pipeline().await;
    // A failing synthesizer proves the short-circuit: reaching it would error.
    let answer = p.engine(true).answer("   ", 3).await.unwrap();
    assert_eq!(answer.answer, NO_ANSWER_TEXT);
    assert!(answer.sources.is_empty());
}

// ============ Encryption at rest ============

#[tokio::test]
async fn encrypted_bodies_round_trip_and_reject_missing_passphrase() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("mail.db");
    let pool = db::connect(&db_path).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let cipher = BodyCipher::derive("correct horse battery", &tmp.path().join("mail.db.salt"))
        .unwrap();
    let store = Arc::new(MessageStore::open(pool.clone(), Some(cipher)).await.unwrap());
    let index = Arc::new(VectorIndex::new(pool.clone(), Arc::new(FakeEmbedder)));

    let mut mail = FakeMailSource::new();
    mail.add_folder(
        "f1",
        "Inbox",
        1,
        vec![msg("m1", "f1", "Invoice", "invoice total $120")],
    );
    let tuning = IngestConfig {
        batch_size: 25,
        page_size: 10,
        per_folder_limit: 50,
        indexing_floor_ms: 0,
    };
    let ingestor = Ingestor::new(store.clone(), index.clone(), Arc::new(mail), tuning);
    ingestor
        .run(folders(&["f1"]), &IngestControl::new(), &NullProgress)
        .await
        .unwrap();

    // On disk the body is ciphertext.
    let raw: String = sqlx::query_scalar("SELECT body FROM messages WHERE message_id = 'm1'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!raw.contains("invoice"));

    // Through the store it decrypts transparently.
    let fetched = store.fetch_messages(&["m1".into()]).await.unwrap();
    assert_eq!(fetched[0].body, "invoice total $120");

    // Opening the same database without the passphrase is refused.
    let reopened = MessageStore::open(pool.clone(), None).await;
    assert!(matches!(reopened, Err(Error::Crypto(_))));
}
