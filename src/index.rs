//! Persistent passage index for document sources.
//!
//! One directory per document under `index_root`, named by
//! [`collection_id`]:
//!
//! ```text
//! <index_root>/collection_<id>/
//!     passages.json   ordered passage records
//!     vectors.bin     little-endian f32 embeddings, `dims` per passage
//!     manifest.json   model, dims, passage count, source hash (written last)
//! ```
//!
//! Builds go to `<index_root>/.staging-<uuid>` and are published with a
//! rename, so a reader either finds no directory or a complete index.
//! Rebuilding the same document replaces the previous directory.
//!
//! Directory presence is the cache signal. The manifest records the SHA-256
//! of the source bytes; a mismatch is logged, and triggers a rebuild only when
//! `retrieval.check_freshness` is enabled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chunk;
use crate::config::{ChunkingConfig, RetrievalConfig};
use crate::embedding::{blob_to_vec, cosine_similarity, tokenize, vec_to_blob, EmbeddingProvider};
use crate::error::{AnalysisError, ProviderError, Result};
use crate::extract;
use crate::models::{DataSource, Passage};

const PASSAGES_FILE: &str = "passages.json";
const VECTORS_FILE: &str = "vectors.bin";
const MANIFEST_FILE: &str = "manifest.json";

/// Stable collection name for a document. A pure function of its id.
pub fn collection_id(source_id: &str) -> String {
    format!("collection_{}", source_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub collection: String,
    pub source: String,
    pub model: String,
    pub dims: usize,
    pub passages: usize,
    pub source_sha256: String,
    pub built_at: DateTime<Utc>,
}

/// A loaded index: passages with one embedding each, in document order.
#[derive(Debug, Clone)]
pub struct RetrievalIndex {
    pub manifest: Manifest,
    passages: Vec<Passage>,
    vectors: Vec<Vec<f32>>,
}

impl RetrievalIndex {
    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    /// The `k` passages most similar to `query`, best first.
    ///
    /// Returns every passage when the index holds fewer than `k`. Equal scores
    /// keep document order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(f32, &Passage)> {
        let mut scored: Vec<(f32, &Passage)> = self
            .vectors
            .iter()
            .zip(self.passages.iter())
            .map(|(v, p)| (cosine_similarity(query, v), p))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// Ranks passages by how many distinct question words they contain.
///
/// Used when the embedding provider cannot embed the question.
pub fn keyword_search<'a>(passages: &'a [Passage], question: &str, k: usize) -> Vec<&'a Passage> {
    let terms: HashSet<String> = tokenize(question).filter(|t| t.len() > 2).collect();
    let mut scored: Vec<(usize, &Passage)> = passages
        .iter()
        .map(|p| {
            let words: HashSet<String> = tokenize(&p.text).collect();
            (terms.iter().filter(|t| words.contains(*t)).count(), p)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().take(k).map(|(_, p)| p).collect()
}

pub struct IndexBuilder {
    index_root: PathBuf,
    chunking: ChunkingConfig,
    check_freshness: bool,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl IndexBuilder {
    pub fn new(
        index_root: &Path,
        chunking: &ChunkingConfig,
        retrieval: &RetrievalConfig,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            index_root: index_root.to_path_buf(),
            chunking: chunking.clone(),
            check_freshness: retrieval.check_freshness,
            embedder,
        }
    }

    pub fn dir_for(&self, source: &DataSource) -> PathBuf {
        self.index_root.join(collection_id(&source.id))
    }

    /// Loads the document and splits it into passages without embedding.
    pub fn passages_for(&self, source: &DataSource) -> Result<Vec<Passage>> {
        let pages = extract::load_document(&source.path)?;
        let passages = chunk::split_pages(
            &pages,
            &source.filename,
            self.chunking.chunk_size,
            self.chunking.chunk_overlap,
        );
        if passages.is_empty() {
            return Err(AnalysisError::format(format!(
                "{} produced no passages",
                source.filename
            )));
        }
        Ok(passages)
    }

    /// Returns the persisted index, building it first if it is absent.
    pub async fn open_or_build(&self, source: &DataSource) -> Result<RetrievalIndex> {
        match self.open(source)? {
            Some(index) => Ok(index),
            None => self.build(source).await,
        }
    }

    /// Loads the persisted index, or `None` when it must be (re)built.
    pub fn open(&self, source: &DataSource) -> Result<Option<RetrievalIndex>> {
        let dir = self.dir_for(source);
        if !dir.is_dir() {
            return Ok(None);
        }

        let index = match read_index(&dir) {
            Ok(index) => index,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "unreadable index, rebuilding");
                return Ok(None);
            }
        };

        if index.manifest.model != self.embedder.model_name()
            || index.manifest.dims != self.embedder.dims()
        {
            warn!(
                collection = %index.manifest.collection,
                built_with = %index.manifest.model,
                current = %self.embedder.model_name(),
                "index was built with a different embedding model, rebuilding"
            );
            return Ok(None);
        }

        match std::fs::read(&source.path) {
            Ok(bytes) if sha256_hex(&bytes) != index.manifest.source_sha256 => {
                warn!(
                    collection = %index.manifest.collection,
                    source = %source.filename,
                    "source changed since the index was built"
                );
                if self.check_freshness {
                    return Ok(None);
                }
            }
            _ => {}
        }

        debug!(collection = %index.manifest.collection, passages = index.len(), "index reused");
        Ok(Some(index))
    }

    /// Builds and publishes the index, replacing any previous one.
    pub async fn build(&self, source: &DataSource) -> Result<RetrievalIndex> {
        let bytes = std::fs::read(&source.path)?;
        let passages = self.passages_for(source)?;

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != passages.len() {
            return Err(ProviderError::invalid(
                self.embedder.model_name(),
                format!("{} vectors for {} passages", vectors.len(), passages.len()),
            )
            .into());
        }
        let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
        if vectors.iter().any(|v| v.len() != dims) {
            return Err(ProviderError::invalid(
                self.embedder.model_name(),
                "embeddings have inconsistent dimensions",
            )
            .into());
        }

        let collection = collection_id(&source.id);
        let index = RetrievalIndex {
            manifest: Manifest {
                collection: collection.clone(),
                source: source.filename.clone(),
                model: self.embedder.model_name().to_string(),
                dims,
                passages: passages.len(),
                source_sha256: sha256_hex(&bytes),
                built_at: Utc::now(),
            },
            passages,
            vectors,
        };

        std::fs::create_dir_all(&self.index_root)?;
        let staging = self
            .index_root
            .join(format!(".staging-{}", uuid::Uuid::new_v4()));
        if let Err(e) = write_index(&staging, &index) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }
        self.publish(&staging, &self.dir_for(source))?;

        info!(
            collection = %collection,
            passages = index.len(),
            dims,
            model = %index.manifest.model,
            "index built"
        );
        Ok(index)
    }

    /// Moves a complete staging directory into the live location.
    fn publish(&self, staging: &Path, live: &Path) -> Result<()> {
        let retired = self
            .index_root
            .join(format!(".retired-{}", uuid::Uuid::new_v4()));
        let had_previous = live.is_dir() && std::fs::rename(live, &retired).is_ok();

        let result = std::fs::rename(staging, live);
        if had_previous {
            let _ = std::fs::remove_dir_all(&retired);
        }
        if let Err(e) = result {
            let _ = std::fs::remove_dir_all(staging);
            // A concurrent build published first; its index is just as good.
            if live.join(MANIFEST_FILE).is_file() {
                debug!(dir = %live.display(), "concurrent build already published");
                return Ok(());
            }
            return Err(e.into());
        }
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_index(dir: &Path, index: &RetrievalIndex) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let passages = serde_json::to_vec(&index.passages)
        .map_err(|e| AnalysisError::format(format!("cannot encode passages: {}", e)))?;
    std::fs::write(dir.join(PASSAGES_FILE), passages)?;

    let mut blob = Vec::with_capacity(index.vectors.len() * index.manifest.dims * 4);
    for v in &index.vectors {
        blob.extend_from_slice(&vec_to_blob(v));
    }
    std::fs::write(dir.join(VECTORS_FILE), blob)?;

    let manifest = serde_json::to_vec_pretty(&index.manifest)
        .map_err(|e| AnalysisError::format(format!("cannot encode manifest: {}", e)))?;
    std::fs::write(dir.join(MANIFEST_FILE), manifest)?;
    Ok(())
}

fn read_index(dir: &Path) -> Result<RetrievalIndex> {
    let manifest: Manifest = serde_json::from_slice(&std::fs::read(dir.join(MANIFEST_FILE))?)
        .map_err(|e| AnalysisError::format(format!("bad manifest: {}", e)))?;
    let passages: Vec<Passage> = serde_json::from_slice(&std::fs::read(dir.join(PASSAGES_FILE))?)
        .map_err(|e| AnalysisError::format(format!("bad passages: {}", e)))?;
    let flat = blob_to_vec(&std::fs::read(dir.join(VECTORS_FILE))?);

    if passages.len() != manifest.passages || flat.len() != manifest.passages * manifest.dims {
        return Err(AnalysisError::format(format!(
            "index in {} is inconsistent with its manifest",
            dir.display()
        )));
    }
    let vectors = if manifest.dims == 0 {
        vec![Vec::new(); passages.len()]
    } else {
        flat.chunks(manifest.dims).map(|c| c.to_vec()).collect()
    };

    Ok(RetrievalIndex {
        manifest,
        passages,
        vectors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DisabledEmbedder, HashEmbedder};
    use crate::models::SourceKind;

    fn source(dir: &Path, text: &str) -> DataSource {
        let path = dir.join("notes.txt");
        std::fs::write(&path, text).unwrap();
        DataSource {
            id: "doc1".into(),
            kind: SourceKind::Document,
            path,
            filename: "notes.txt".into(),
            owner: "tester".into(),
        }
    }

    fn builder(root: &Path, embedder: Arc<dyn EmbeddingProvider>) -> IndexBuilder {
        IndexBuilder::new(
            &root.join("vector_store"),
            &ChunkingConfig::default(),
            &RetrievalConfig::default(),
            embedder,
        )
    }

    #[test]
    fn collection_id_is_pure() {
        assert_eq!(collection_id("abc"), "collection_abc");
        assert_eq!(collection_id("abc"), collection_id("abc"));
    }

    #[tokio::test]
    async fn build_then_open_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "alpha beta gamma");
        let b = builder(dir.path(), Arc::new(HashEmbedder::new(32)));

        let built = b.build(&src).await.unwrap();
        let opened = b.open(&src).unwrap().unwrap();
        assert_eq!(opened.passages(), built.passages());
        assert_eq!(opened.manifest, built.manifest);
    }

    #[tokio::test]
    async fn rebuild_overwrites_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "first version");
        let b = builder(dir.path(), Arc::new(HashEmbedder::new(32)));
        b.build(&src).await.unwrap();

        std::fs::write(&src.path, "second version, longer text").unwrap();
        b.build(&src).await.unwrap();

        let entries: Vec<String> = std::fs::read_dir(dir.path().join("vector_store"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["collection_doc1".to_string()]);
        let index = b.open(&src).unwrap().unwrap();
        assert_eq!(index.passages()[0].text, "second version, longer text");
    }

    #[tokio::test]
    async fn failed_embedding_leaves_nothing_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "some text");
        let b = builder(dir.path(), Arc::new(DisabledEmbedder));

        let err = b.build(&src).await.unwrap_err();
        assert!(matches!(err, AnalysisError::ProviderUnavailable(_)));
        assert!(!b.dir_for(&src).exists());
    }

    #[tokio::test]
    async fn empty_document_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "   ");
        let b = builder(dir.path(), Arc::new(HashEmbedder::new(32)));
        assert!(matches!(
            b.build(&src).await.unwrap_err(),
            AnalysisError::DataFormat(_)
        ));
        assert!(!b.dir_for(&src).exists());
    }

    #[tokio::test]
    async fn stale_index_is_trusted_unless_freshness_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "original");
        let b = builder(dir.path(), Arc::new(HashEmbedder::new(32)));
        b.build(&src).await.unwrap();
        std::fs::write(&src.path, "changed").unwrap();

        let trusted = b.open_or_build(&src).await.unwrap();
        assert_eq!(trusted.passages()[0].text, "original");

        let strict = IndexBuilder::new(
            &dir.path().join("vector_store"),
            &ChunkingConfig::default(),
            &RetrievalConfig {
                check_freshness: true,
                ..Default::default()
            },
            Arc::new(HashEmbedder::new(32)),
        );
        let rebuilt = strict.open_or_build(&src).await.unwrap();
        assert_eq!(rebuilt.passages()[0].text, "changed");
    }

    #[tokio::test]
    async fn search_returns_all_when_fewer_than_k() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path(), "only one passage here");
        let embedder = Arc::new(HashEmbedder::new(32));
        let index = builder(dir.path(), embedder.clone()).build(&src).await.unwrap();
        let q = embedder.embed_one("passage");
        assert_eq!(index.search(&q, 5).len(), 1);
    }

    #[test]
    fn keyword_search_prefers_matching_passages() {
        let p = |t: &str| Passage {
            text: t.into(),
            source: "s".into(),
            start_offset: 0,
            page: None,
        };
        let passages = vec![p("cats and dogs"), p("quarterly revenue report"), p("weather")];
        let hits = keyword_search(&passages, "What was the revenue?", 2);
        assert_eq!(hits[0].text, "quarterly revenue report");
        assert_eq!(hits.len(), 2);
    }
}
