//! Per-process bound on concurrent outbound provider calls.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::embedding::EmbeddingProvider;
use crate::error::ProviderError;
use crate::generation::GenerationProvider;

/// Wraps a provider so each call holds one permit of a shared semaphore.
///
/// Share one semaphore between the embedder and the generator to bound the
/// total number of calls in flight.
pub struct Limited<P: ?Sized> {
    inner: Arc<P>,
    permits: Arc<Semaphore>,
}

impl<P: ?Sized> Limited<P> {
    pub fn new(inner: Arc<P>, permits: Arc<Semaphore>) -> Self {
        Self { inner, permits }
    }

    async fn permit(&self) -> Result<tokio::sync::SemaphorePermit<'_>, ProviderError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| ProviderError::unreachable("limiter", "semaphore closed"))
    }
}

#[async_trait]
impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Limited<P> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let _permit = self.permit().await?;
        self.inner.embed(texts).await
    }
}

#[async_trait]
impl<P: GenerationProvider + ?Sized> GenerationProvider for Limited<P> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
    async fn generate(&self, prompt: &str, max_tokens: usize) -> Result<String, ProviderError> {
        let _permit = self.permit().await?;
        self.inner.generate(prompt, max_tokens).await
    }
}
