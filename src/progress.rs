//! Ingestion progress reporting.
//!
//! The orchestrator emits phase transitions and monotonic counters;
//! reporters render them. Progress goes to **stderr** so stdout stays
//! parseable for scripts. The folder-scoped expected total is an estimate
//! and may overshoot the final collected count — renderers clamp rather
//! than reconcile.

use std::io::Write;

/// Phase of the ingestion state machine, in order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IngestPhase {
    /// Paginating the remote source, accumulating identifiers.
    Collecting,
    /// Committing store+index batches.
    Storing,
    /// Nominal milestone before DONE; no additional work.
    Indexing,
    /// Terminal.
    Done,
}

impl IngestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestPhase::Collecting => "collecting",
            IngestPhase::Storing => "storing",
            IngestPhase::Indexing => "indexing",
            IngestPhase::Done => "done",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum IngestEvent {
    Phase {
        phase: IngestPhase,
    },
    /// Collection progress. `expected` is None for explicit selections
    /// until known, and approximate for folder scopes.
    Collected {
        collected: u64,
        expected: Option<u64>,
    },
    /// Batch commit progress out of the final deduplicated total.
    Stored {
        stored: u64,
        total: u64,
    },
}

/// Renders progress events. Implementations must be cheap; they are called
/// from inside the ingest loop.
pub trait IngestReporter: Send + Sync {
    fn report(&self, event: IngestEvent);
}

/// Human-friendly lines on stderr:
/// `ingest  storing  1,234 / 5,000 messages`.
pub struct StderrProgress;

impl IngestReporter for StderrProgress {
    fn report(&self, event: IngestEvent) {
        let line = match &event {
            IngestEvent::Phase { phase } => format!("ingest  {}...\n", phase.as_str()),
            IngestEvent::Collected {
                collected,
                expected,
            } => match expected {
                Some(total) => format!(
                    "ingest  collecting  {} / ~{} messages\n",
                    format_number(*collected),
                    format_number(*total)
                ),
                None => format!(
                    "ingest  collecting  {} messages\n",
                    format_number(*collected)
                ),
            },
            IngestEvent::Stored { stored, total } => format!(
                "ingest  storing  {} / {} messages\n",
                format_number(*stored),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestReporter for JsonProgress {
    fn report(&self, event: IngestEvent) {
        let obj = match &event {
            IngestEvent::Phase { phase } => serde_json::json!({
                "event": "phase",
                "phase": phase.as_str()
            }),
            IngestEvent::Collected {
                collected,
                expected,
            } => serde_json::json!({
                "event": "progress",
                "phase": "collecting",
                "collected": collected,
                "expected": expected
            }),
            IngestEvent::Stored { stored, total } => serde_json::json!({
                "event": "progress",
                "phase": "storing",
                "stored": stored,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NullProgress;

impl IngestReporter for NullProgress {
    fn report(&self, _event: IngestEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestReporter> {
        match self {
            ProgressMode::Off => Box::new(NullProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn phases_in_order() {
        assert_eq!(IngestPhase::Collecting.as_str(), "collecting");
        assert_eq!(IngestPhase::Done.as_str(), "done");
    }
}
