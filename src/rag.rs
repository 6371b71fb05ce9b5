//! Retrieval-augmented answers over document sources.
//!
//! The top-k passages are placed verbatim into a single prompt ("stuff"
//! composition) and every retrieved passage is cited after the answer.
//!
//! Degradation, in order:
//! - embedding provider down while building: passages are ranked by keyword
//!   overlap straight from the document, nothing is persisted
//! - embedding provider down for the question: keyword ranking over the index
//! - generation provider down: the answer is the retrieved passages themselves

use std::sync::Arc;
use tracing::{info, warn};

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{AnalysisError, Result};
use crate::generation::GenerationProvider;
use crate::index::{keyword_search, IndexBuilder};
use crate::models::{AnalysisResult, Citation, DataSource, Passage};

/// Tokens allowed for a composed answer.
const ANSWER_MAX_TOKENS: usize = 512;

pub struct RagAnswerer {
    builder: Arc<IndexBuilder>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    top_k: usize,
}

impl RagAnswerer {
    pub fn new(
        builder: Arc<IndexBuilder>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        top_k: usize,
    ) -> Self {
        Self {
            builder,
            embedder,
            generator,
            top_k: top_k.max(1),
        }
    }

    pub async fn answer(&self, source: &DataSource, question: &str) -> Result<AnalysisResult> {
        let passages = self.retrieve(source, question).await?;
        let prompt = stuff_prompt(&passages, question);

        let body = match self.generator.generate(&prompt, ANSWER_MAX_TOKENS).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => degraded_answer(&passages),
            Err(e) => {
                warn!(source = %source.filename, error = %e, "generation unavailable, returning passages");
                degraded_answer(&passages)
            }
        };

        let citations: Vec<Citation> = passages
            .iter()
            .map(|p| Citation {
                page: p.page,
                source: p.source.clone(),
            })
            .collect();

        info!(source = %source.filename, passages = passages.len(), "document question answered");
        Ok(AnalysisResult {
            answer_text: format!("{}{}", body, format_citations(&citations)),
            citations,
            chart_refs: Vec::new(),
        })
    }

    /// The top-k passages for a question, best first.
    pub async fn retrieve(&self, source: &DataSource, question: &str) -> Result<Vec<Passage>> {
        let index = match self.builder.open_or_build(source).await {
            Ok(index) => index,
            Err(AnalysisError::ProviderUnavailable(reason)) => {
                warn!(source = %source.filename, %reason, "cannot embed document, ranking by keywords");
                let passages = self.builder.passages_for(source)?;
                return Ok(keyword_search(&passages, question, self.top_k)
                    .into_iter()
                    .cloned()
                    .collect());
            }
            Err(e) => return Err(e),
        };

        match embed_query(self.embedder.as_ref(), question).await {
            Ok(query) => Ok(index
                .search(&query, self.top_k)
                .into_iter()
                .map(|(_, p)| p.clone())
                .collect()),
            Err(e) => {
                warn!(error = %e, "cannot embed question, ranking by keywords");
                Ok(keyword_search(index.passages(), question, self.top_k)
                    .into_iter()
                    .cloned()
                    .collect())
            }
        }
    }
}

pub fn stuff_prompt(passages: &[Passage], question: &str) -> String {
    let context = passages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Use the following pieces of context to answer the question at the end. \
         If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
         {}\n\nQuestion: {}\nHelpful Answer:",
        context, question
    )
}

fn degraded_answer(passages: &[Passage]) -> String {
    let mut out =
        String::from("The language model is unavailable. The most relevant passages are:\n");
    for (i, p) in passages.iter().enumerate() {
        out.push_str(&format!("\n[{}] {}\n", i + 1, p.text.trim()));
    }
    out.trim_end().to_string()
}

/// Citation list appended to an answer.
pub fn format_citations(citations: &[Citation]) -> String {
    if citations.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\n**Sources:**");
    for c in citations {
        match c.page {
            Some(page) => out.push_str(&format!("\n- Page {} ({})", page, c.source)),
            None => out.push_str(&format!("\n- {}", c.source)),
        }
    }
    out
}
