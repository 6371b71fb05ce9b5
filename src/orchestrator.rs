//! Query orchestrator: the single entry point for questions.
//!
//! Routing is a pure function of the file extension. Tabular files go to the
//! [`TabularAgent`], documents to the [`RagAnswerer`]; content is never
//! inspected to pick a strategy.
//!
//! [`Orchestrator::answer`] never fails. Any error left over from a component
//! becomes an answer string starting with [`ERROR_MARKER`]; running out of the
//! request budget yields a partial answer instead.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::agent::TabularAgent;
use crate::config::Config;
use crate::embedding::{create_embedder, EmbeddingProvider};
use crate::error::{AnalysisError, Result};
use crate::generation::{create_generator, GenerationProvider};
use crate::heuristic;
use crate::index::IndexBuilder;
use crate::limit::Limited;
use crate::models::{AnalysisResult, DataSource, SourceKind};
use crate::profile;
use crate::rag::RagAnswerer;
use crate::render::{ChartRenderer, SvgRenderer};
use crate::table;

/// Prefix of every answer produced from a failure.
pub const ERROR_MARKER: &str = "Error processing request:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    TabularAgent,
    RetrievalAnswerer,
}

/// Strategy for a source, decided from its file name alone.
pub fn route_for(source: &DataSource) -> Result<Route> {
    match SourceKind::from_filename(&source.filename)? {
        SourceKind::Tabular => Ok(Route::TabularAgent),
        SourceKind::Document => Ok(Route::RetrievalAnswerer),
    }
}

pub struct Orchestrator {
    agent: TabularAgent,
    rag: RagAnswerer,
    request_timeout: Duration,
}

impl Orchestrator {
    /// Builds every component from configuration with the configured providers.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Ok(Self::with_providers(config, embedder, generator))
    }

    /// Builds every component around the given providers.
    ///
    /// Both providers share one semaphore of `limits.max_concurrent_calls`
    /// permits.
    pub fn with_providers(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.limits.max_concurrent_calls.max(1)));
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(Limited::new(embedder, permits.clone()));
        let generator: Arc<dyn GenerationProvider> = Arc::new(Limited::new(generator, permits));
        let renderer: Arc<dyn ChartRenderer> = Arc::new(SvgRenderer::new(&config.paths));

        let builder = Arc::new(IndexBuilder::new(
            &config.paths.index_root,
            &config.chunking,
            &config.retrieval,
            embedder.clone(),
        ));
        Self {
            agent: TabularAgent::new(
                generator.clone(),
                renderer,
                &config.agent,
                &config.profiler,
            ),
            rag: RagAnswerer::new(builder, embedder, generator, config.retrieval.top_k),
            request_timeout: Duration::from_secs(config.limits.request_timeout_secs.max(1)),
        }
    }

    /// Answers a question about a source. Never fails.
    pub async fn answer(&self, source: &DataSource, question: &str) -> AnalysisResult {
        let attempt = tokio::time::timeout(self.request_timeout, self.try_answer(source, question));
        let outcome = match attempt.await {
            Ok(outcome) => outcome,
            Err(_) => return self.timed_out(source, question),
        };

        match outcome {
            Ok(result) => result,
            Err(e) => {
                error!(source = %source.filename, kind = e.kind(), error = %e, "request failed");
                AnalysisResult::text(format!("{} {}", ERROR_MARKER, e))
            }
        }
    }

    /// Best-effort answer once the request budget is spent.
    ///
    /// Tabular sources still get the deterministic heuristics, which need no
    /// provider call.
    fn timed_out(&self, source: &DataSource, question: &str) -> AnalysisResult {
        let secs = self.request_timeout.as_secs();
        let e = AnalysisError::BudgetExceeded(format!("no answer within {}s", secs));
        warn!(source = %source.filename, kind = e.kind(), error = %e, "returning partial answer");
        let mut text = format!(
            "Partial answer: the request timed out after {}s before the analysis finished.",
            secs
        );
        if let Ok(Route::TabularAgent) = route_for(source) {
            if let Ok(table) = table::load_table(&source.path) {
                let schema = profile::profile(&table);
                text.push_str("\n\n");
                text.push_str(&heuristic::answer(&table, &schema, question));
            }
        }
        AnalysisResult::text(text)
    }

    async fn try_answer(&self, source: &DataSource, question: &str) -> Result<AnalysisResult> {
        let route = route_for(source)?;
        if !source.path.is_file() {
            return Err(AnalysisError::NotFound(source.path.display().to_string()));
        }
        info!(source = %source.filename, ?route, "routing question");

        match route {
            Route::TabularAgent => {
                let table = table::load_table(&source.path)?;
                let run = self.agent.run(&table, question).await;
                info!(iterations = run.iterations, stop = ?run.stop, "agent finished");
                Ok(run.result)
            }
            Route::RetrievalAnswerer => self.rag.answer(source, question).await,
        }
    }
}
