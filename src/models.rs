//! Core data models shared by the orchestrator, the synthesizer, and their
//! collaborators.
//!
//! Everything here except [`DataSource`] is transient: it is derived per
//! invocation and handed back to the caller, never persisted by the core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Shape of an uploaded source, decided purely from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Tabular,
    Document,
}

/// An uploaded dataset or document.
///
/// Created by ingress and immutable afterwards. The `id` is opaque; the
/// retrieval index collection is derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub kind: SourceKind,
    pub path: PathBuf,
    pub filename: String,
    pub owner: String,
}

/// A contiguous chunk of document text with citation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    /// Where the passage came from (the document's file name).
    pub source: String,
    /// Character offset of the passage within its page (or the whole text).
    pub start_offset: usize,
    /// Zero-based page for paginated formats.
    pub page: Option<u32>,
}

/// Provenance entry appended to a retrieval-grounded answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub page: Option<u32>,
    pub source: String,
}

/// The orchestrator's output contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub answer_text: String,
    pub citations: Vec<Citation>,
    pub chart_refs: Vec<String>,
}

impl AnalysisResult {
    pub fn text(answer: impl Into<String>) -> Self {
        Self {
            answer_text: answer.into(),
            ..Default::default()
        }
    }
}

/// Display hint for a KPI value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KpiFormat {
    Number,
    Decimal,
}

/// A single named headline metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpi {
    pub title: String,
    pub value: f64,
    pub format: KpiFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Pie,
    Line,
}

impl ChartKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Pie => "pie",
            ChartKind::Line => "line",
        }
    }
}

/// One named run of values inside a chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

/// Declarative chart description, independent of the rendering engine.
///
/// `labels` are the category (bar, pie) or x-axis (line) labels and line up
/// with each series' values. `data_ref` holds the rendered artifact URL once a
/// renderer has produced one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub kind: ChartKind,
    pub title: String,
    pub labels: Vec<String>,
    pub series: Vec<Series>,
    pub x_label: Option<String>,
    pub y_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_ref: Option<String>,
}
