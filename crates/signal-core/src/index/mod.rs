//! # Similarity Index
//!
//! In-process nearest-neighbour store over embedded reference procedures.
//!
//! ## Snapshot model
//!
//! ```text
//!   reload(docs) ──► build CorpusSnapshot ──► swap Arc under a short write lock
//!                                                   │
//!   query() ──► clone Arc under read lock ──► score against that snapshot only
//! ```
//!
//! Queries never hold the lock while scoring, and a reload never mutates a
//! snapshot that a query may still be reading. A failed reload leaves the
//! active snapshot untouched.

pub mod corpus;
pub mod embedder;

pub use corpus::{CorpusEntry, CorpusFile, CorpusSnapshot, ReferenceDocument};
pub use embedder::{cosine_similarity, Embedder, HashingEmbedder};

use crate::error::{Result, SignalError};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

/// Query input: free text (embedded by the index) or a raw vector
#[derive(Debug, Clone, Copy)]
pub enum Query<'a> {
    /// Text to embed with the index's embedder
    Text(&'a str),
    /// Precomputed query vector
    Vector(&'a [f32]),
}

/// One retrieval hit
#[derive(Debug, Clone)]
pub struct ScoredReference {
    /// The matched document
    pub document: Arc<ReferenceDocument>,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// Summary of a successful reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadSummary {
    /// New generation number
    pub generation: u64,
    /// Documents in the new snapshot
    pub documents: usize,
    /// Embedding dimension
    pub dimension: usize,
    /// blake3 fingerprint
    pub fingerprint: String,
}

/// Shared similarity index with atomic snapshot swap
#[derive(Debug)]
pub struct SimilarityIndex {
    snapshot: RwLock<Arc<CorpusSnapshot>>,
    embedder: Arc<dyn Embedder>,
}

impl SimilarityIndex {
    /// Create an empty index using `embedder` for text queries
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(CorpusSnapshot::empty())),
            embedder,
        }
    }

    /// Create an index pre-loaded with `documents`
    pub fn with_documents(
        embedder: Arc<dyn Embedder>,
        documents: Vec<ReferenceDocument>,
    ) -> Result<Self> {
        let index = Self::new(embedder);
        index.reload(documents)?;
        Ok(index)
    }

    /// The embedder used for text queries
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// The snapshot current at the time of the call
    pub fn snapshot(&self) -> Arc<CorpusSnapshot> {
        self.snapshot.read().clone()
    }

    /// Number of documents in the current snapshot
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether the current snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Replace the whole corpus. On error the previous snapshot stays active.
    ///
    /// A non-empty corpus must match the embedder's dimension, otherwise every
    /// text query against it would fail.
    pub fn reload(&self, documents: Vec<ReferenceDocument>) -> Result<ReloadSummary> {
        let mut snapshot = CorpusSnapshot::build(0, documents)?;
        if !snapshot.is_empty() && snapshot.dimension() != self.embedder.dimension() {
            return Err(SignalError::CorpusLoad(format!(
                "corpus dimension {} does not match embedder dimension {}",
                snapshot.dimension(),
                self.embedder.dimension()
            )));
        }

        // Generations follow install order
        let mut active = self.snapshot.write();
        snapshot.set_generation(active.generation() + 1);
        let summary = ReloadSummary {
            generation: snapshot.generation(),
            documents: snapshot.len(),
            dimension: snapshot.dimension(),
            fingerprint: snapshot.fingerprint().to_string(),
        };
        *active = Arc::new(snapshot);
        drop(active);

        tracing::info!(
            "Similarity index reloaded: generation {} ({} documents, dim {})",
            summary.generation,
            summary.documents,
            summary.dimension
        );
        Ok(summary)
    }

    /// Load a JSON corpus file and swap it in
    pub fn reload_from_file(&self, path: impl AsRef<Path>) -> Result<ReloadSummary> {
        let file = CorpusFile::from_file(path)?;
        let documents = file.into_documents(self.embedder.as_ref());
        self.reload(documents)
    }

    /// Top-k nearest documents, highest score first, ties by id ascending
    pub fn query(&self, query: Query<'_>, top_k: usize) -> Result<Vec<ScoredReference>> {
        let snapshot = self.snapshot();
        Self::query_snapshot(&snapshot, self.embedder.as_ref(), query, top_k)
    }

    /// Run a query against an explicit snapshot
    pub fn query_snapshot(
        snapshot: &CorpusSnapshot,
        embedder: &dyn Embedder,
        query: Query<'_>,
        top_k: usize,
    ) -> Result<Vec<ScoredReference>> {
        if snapshot.is_empty() {
            return Err(SignalError::IndexEmpty);
        }

        let embedded;
        let vector: &[f32] = match query {
            Query::Vector(v) => v,
            Query::Text(text) => {
                embedded = embedder.embed(text);
                &embedded
            }
        };

        if vector.len() != snapshot.dimension() {
            return Err(SignalError::DimensionMismatch {
                expected: snapshot.dimension(),
                actual: vector.len(),
            });
        }

        let query_norm = embedder::l2_norm(vector);
        let mut scored: Vec<ScoredReference> = snapshot
            .entries()
            .map(|(doc, norm)| {
                let score = if query_norm == 0.0 || norm == 0.0 {
                    0.0
                } else {
                    let dot: f32 = doc
                        .embedding
                        .iter()
                        .zip(vector.iter())
                        .map(|(a, b)| a * b)
                        .sum();
                    dot / (query_norm * norm)
                };
                // Non-finite query components must not poison the ordering
                let score = if score.is_finite() { score } else { f32::NEG_INFINITY };
                ScoredReference {
                    document: doc.clone(),
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}
