//! Query-time retrieval and answer composition.
//!
//! A question is embedded, matched against the index with headroom beyond
//! the requested source count, floored on similarity so unrelated mail
//! never pads the citations, grounded into a numbered-source prompt, and
//! handed to the text-completion service. An empty index (or no hit above
//! the floor) short-circuits to a deterministic no-answer result — the
//! completion service is never invoked without grounding.

use std::sync::Arc;
use std::time::Instant;

use crate::config::RetrievalConfig;
use crate::error::Error;
use crate::index::VectorIndex;
use crate::models::{Answer, MessageRecord, SourceCitation};
use crate::store::MessageStore;
use crate::synth::Synthesizer;

/// Fixed answer text when nothing relevant is indexed.
pub const NO_ANSWER_TEXT: &str = "No indexed messages matched this question.";

/// Candidate pool floor: search fetches at least this many hits so
/// truncation to `max_sources` has headroom.
const MIN_CANDIDATES: usize = 4;

/// A failed answer attempt. Retrieval may have succeeded before synthesis
/// failed, so the sources ride along for callers that want to render
/// "search succeeded, synthesis failed".
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct AnswerFailure {
    pub error: Error,
    pub sources: Vec<SourceCitation>,
}

impl AnswerFailure {
    fn bare(error: Error) -> Self {
        Self {
            error,
            sources: Vec::new(),
        }
    }
}

pub struct AnswerEngine {
    store: Arc<MessageStore>,
    index: Arc<VectorIndex>,
    synth: Arc<dyn Synthesizer>,
    retrieval: RetrievalConfig,
}

impl AnswerEngine {
    pub fn new(
        store: Arc<MessageStore>,
        index: Arc<VectorIndex>,
        synth: Arc<dyn Synthesizer>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            index,
            synth,
            retrieval,
        }
    }

    /// Answer `question` from the index, citing at most `max_sources`
    /// messages, best match first.
    pub async fn answer(
        &self,
        question: &str,
        max_sources: usize,
    ) -> Result<Answer, AnswerFailure> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(no_answer(0));
        }

        let retrieval_start = Instant::now();
        let k = max_sources.max(MIN_CANDIDATES);

        let mut hits = self
            .index
            .search(question, k)
            .await
            .map_err(AnswerFailure::bare)?;

        hits.retain(|h| h.score >= self.retrieval.min_score);
        hits.truncate(max_sources);

        if hits.is_empty() {
            return Ok(no_answer(ms_since(retrieval_start)));
        }

        let ids: Vec<String> = hits.iter().map(|h| h.message_id.clone()).collect();
        let records = self
            .store
            .fetch_messages(&ids)
            .await
            .map_err(AnswerFailure::bare)?;

        // fetch_messages preserves rank order but skips ids cleared since
        // the search; rejoin scores by id.
        let mut sources = Vec::with_capacity(records.len());
        let mut grounding = Vec::with_capacity(records.len());
        for record in &records {
            let score = hits
                .iter()
                .find(|h| h.message_id == record.message_id)
                .map(|h| h.score)
                .unwrap_or(0.0);
            sources.push(to_citation(record, score, self.retrieval.snippet_chars));
            grounding.push(record.clone());
        }

        let retrieval_ms = ms_since(retrieval_start);
        if sources.is_empty() {
            return Ok(no_answer(retrieval_ms));
        }

        let prompt = build_prompt(question, &grounding);
        tracing::debug!(
            sources = sources.len(),
            retrieval_ms,
            "retrieval complete, synthesizing"
        );

        let synthesis_start = Instant::now();
        let answer = match self.synth.complete(&prompt).await {
            Ok(text) => text,
            Err(error) => return Err(AnswerFailure { error, sources }),
        };
        let synthesis_ms = ms_since(synthesis_start);

        Ok(Answer {
            answer,
            sources,
            retrieval_ms,
            synthesis_ms,
        })
    }
}

fn no_answer(retrieval_ms: u64) -> Answer {
    Answer {
        answer: NO_ANSWER_TEXT.to_string(),
        sources: Vec::new(),
        retrieval_ms,
        synthesis_ms: 0,
    }
}

fn ms_since(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

fn to_citation(record: &MessageRecord, score: f32, snippet_chars: usize) -> SourceCitation {
    SourceCitation {
        message_id: record.message_id.clone(),
        weblink: record.weblink.clone(),
        subject: record.subject.clone(),
        sender: record.sender.clone(),
        received_at: record.received_at,
        snippet: snippet(&record.body, snippet_chars),
        score,
    }
}

/// Single-line excerpt of at most `max_chars` characters.
fn snippet(body: &str, max_chars: usize) -> String {
    let flat = body.replace('\n', " ");
    let flat = flat.trim();
    flat.chars().take(max_chars).collect()
}

/// Grounding prompt: numbered sources with their metadata, then the
/// question. The model is told to answer only from the sources and cite
/// them by number.
fn build_prompt(question: &str, records: &[MessageRecord]) -> String {
    let mut sources = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let received = record
            .received_at
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        sources.push(format!(
            "[{}] Subject: {}\nFrom: {}\nReceived: {}\nLink: {}\n\n{}",
            i + 1,
            record.subject.as_deref().unwrap_or("(no subject)"),
            record.sender.as_deref().unwrap_or("unknown"),
            received,
            record.weblink.as_deref().unwrap_or("none"),
            record.body
        ));
    }

    format!(
        "Answer the question using ONLY the SOURCES below.\n\
         If the answer is not contained in the sources, say you don't know.\n\
         Cite sources using [1], [2], etc.\n\n\
         SOURCES:\n{}\n\n\
         QUESTION:\n{}\n\n\
         ANSWER:\n",
        sources.join("\n\n"),
        question
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, subject: &str, body: &str) -> MessageRecord {
        MessageRecord {
            message_id: id.into(),
            folder_id: "inbox".into(),
            subject: Some(subject.into()),
            sender: Some("alice@example.com".into()),
            received_at: chrono::DateTime::from_timestamp(1_700_000_000, 0),
            weblink: Some("https://outlook.example/m1".into()),
            body: body.into(),
        }
    }

    #[test]
    fn prompt_numbers_sources_and_ends_with_question() {
        let records = vec![
            record("m1", "Invoice #42", "Total due: $120"),
            record("m2", "Lunch?", "Tacos at noon"),
        ];
        let prompt = build_prompt("what do I owe?", &records);

        assert!(prompt.starts_with("Answer the question using ONLY the SOURCES below."));
        assert!(prompt.contains("[1] Subject: Invoice #42"));
        assert!(prompt.contains("[2] Subject: Lunch?"));
        assert!(prompt.contains("QUESTION:\nwhat do I owe?"));
        assert!(prompt.ends_with("ANSWER:\n"));
    }

    #[test]
    fn prompt_handles_missing_metadata() {
        let mut rec = record("m1", "x", "body");
        rec.subject = None;
        rec.sender = None;
        rec.received_at = None;
        rec.weblink = None;
        let prompt = build_prompt("q", &[rec]);
        assert!(prompt.contains("Subject: (no subject)"));
        assert!(prompt.contains("From: unknown"));
        assert!(prompt.contains("Received: unknown"));
    }

    #[test]
    fn snippet_is_single_line_and_bounded() {
        let body = "line one\nline two with a fairly long tail that keeps going";
        let s = snippet(body, 20);
        assert!(!s.contains('\n'));
        assert_eq!(s.chars().count(), 20);
    }

    #[test]
    fn snippet_respects_multibyte_boundaries() {
        let body = "déjà vu — résumé attached";
        let s = snippet(body, 10);
        assert_eq!(s.chars().count(), 10);
    }
}
