//! # mailbrief
//!
//! Local-first retrieval-augmented question answering over a user-selected
//! slice of an Outlook mailbox.
//!
//! A bounded ingestion run pulls selected folders or messages from
//! Microsoft Graph into a local SQLite store, embeds each message into a
//! vector index, and questions are answered by similarity search plus a
//! local LLM, with ranked source citations. Everything indexed can be
//! forgotten again, per run or wholesale.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────┐
//! │ MS Graph  │──▶│  Ingestor    │──▶│    SQLite      │
//! │ folders/  │   │ collect →    │   │ messages +     │
//! │ messages  │   │ store+index  │   │ vectors (1:1)  │
//! └───────────┘   └──────────────┘   └──────┬────────┘
//!                                           │
//!                        ┌──────────────────┤
//!                        ▼                  ▼
//!                  ┌──────────┐       ┌──────────┐
//!                  │   CLI    │       │   HTTP   │
//!                  │  (mbx)   │       │  (axum)  │
//!                  └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mbx init                                  # create database
//! mbx folders                               # pick folders to ingest
//! mbx ingest --folder <id> --folder <id>    # pull + index, Ctrl-C pauses
//! mbx ask "what did finance send last week?"
//! mbx serve                                 # JSON API for a UI
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`graph`] | Remote mail source (Microsoft Graph) |
//! | [`store`] | Durable message + run storage |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Vector index and similarity search |
//! | [`ingest`] | Ingestion state machine |
//! | [`control`] | Pause/cancel token |
//! | [`progress`] | Progress reporting |
//! | [`answer`] | Retrieval + answer composition |
//! | [`synth`] | Text-completion boundary |
//! | [`crypto`] | Passphrase encryption at rest |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod config;
pub mod control;
pub mod crypto;
pub mod db;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod server;
pub mod store;
pub mod synth;
