//! # Insight Harness
//!
//! A local-first engine that answers natural-language questions about
//! uploaded datasets and documents, and builds dashboards from tabular data
//! without any question at all.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!  question ────────▶│ Orchestrator │── route by extension ──┐
//!                    └──────┬───────┘                        │
//!                  .csv/.xlsx                          .pdf/.txt/.epub
//!                           ▼                                ▼
//!  ┌──────────┐     ┌──────────────┐               ┌──────────────────┐
//!  │ Profiler │────▶│ Tabular agent│               │ Retrieval index  │
//!  └────┬─────┘     │ (step loop)  │               │ + RAG answerer   │
//!       │           └──────┬───────┘               └────────┬─────────┘
//!       ▼                  ▼                                ▼
//!  ┌──────────┐     chart renderer (SVG)          embedding / generation
//!  │Dashboard │                                    providers (fallible)
//!  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! insight init
//! insight profile data/sales.csv
//! insight ask data/sales.csv "total revenue"
//! insight ask docs/report.pdf "what were the findings?"
//! insight dashboard data/sales.csv data/costs.xlsx
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`ingress`] | Extension gate, uploads, source identity |
//! | [`table`] | CSV / XLSX loading |
//! | [`profile`] | Schema profiler |
//! | [`extract`] | PDF / text / EPUB text extraction |
//! | [`chunk`] | Overlapping passage splitter |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Language-generation providers |
//! | [`limit`] | Outbound call concurrency bound |
//! | [`index`] | Persistent retrieval index |
//! | [`rag`] | Retrieval-augmented answerer |
//! | [`heuristic`] | Deterministic fallback answers |
//! | [`agent`] | Tabular reasoning agent |
//! | [`charts`] | Chart descriptions from columns |
//! | [`render`] | SVG chart renderer |
//! | [`orchestrator`] | Question entry point |
//! | [`dashboard`] | Dashboard synthesizer |

pub mod agent;
pub mod charts;
pub mod chunk;
pub mod config;
pub mod dashboard;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod heuristic;
mod http;
pub mod index;
pub mod ingress;
pub mod limit;
pub mod models;
pub mod orchestrator;
pub mod profile;
pub mod rag;
pub mod render;
pub mod table;
