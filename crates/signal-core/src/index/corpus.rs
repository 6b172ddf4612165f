//! Reference corpus: documents, corpus files and immutable snapshots

use super::embedder::{l2_norm, Embedder};
use crate::error::{Result, SignalError};
use crate::policy::ActionTemplate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

/// A stored procedure with its precomputed embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceDocument {
    /// Unique identifier, e.g. `SOP-104`
    pub id: String,

    /// Optional title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Full text content
    pub content: String,

    /// Embedding of `content`, dimension D
    pub embedding: Vec<f32>,

    /// Recommended action, if the procedure prescribes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_action: Option<ActionTemplate>,

    /// Additional metadata, e.g. `{"category": "maintenance"}`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// A corpus entry as written on disk; the embedding may be omitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusEntry {
    /// Unique identifier
    pub id: String,
    /// Optional title
    #[serde(default)]
    pub title: Option<String>,
    /// Full text content
    pub content: String,
    /// Precomputed embedding
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Recommended action
    #[serde(default)]
    pub recommended_action: Option<ActionTemplate>,
    /// Metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// On-disk corpus file (JSON)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusFile {
    /// Documents in the corpus
    pub documents: Vec<CorpusEntry>,
}

impl CorpusFile {
    /// Read a corpus file from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SignalError::CorpusLoad(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| SignalError::CorpusLoad(format!("{}: {}", path.display(), e)))
    }

    /// Materialise documents, embedding any entry without a precomputed vector
    pub fn into_documents(self, embedder: &dyn Embedder) -> Vec<ReferenceDocument> {
        self.documents
            .into_iter()
            .map(|entry| {
                let embedding = entry
                    .embedding
                    .unwrap_or_else(|| embedder.embed(&entry.content));
                ReferenceDocument {
                    id: entry.id,
                    title: entry.title,
                    content: entry.content,
                    embedding,
                    recommended_action: entry.recommended_action,
                    metadata: entry.metadata,
                }
            })
            .collect()
    }
}

/// Immutable, query-ready view of one corpus generation.
///
/// Documents are kept sorted by id so ties resolve deterministically.
#[derive(Debug)]
pub struct CorpusSnapshot {
    generation: u64,
    dimension: usize,
    fingerprint: String,
    documents: Vec<Arc<ReferenceDocument>>,
    norms: Vec<f32>,
}

impl CorpusSnapshot {
    /// An empty snapshot (generation 0)
    pub fn empty() -> Self {
        Self {
            generation: 0,
            dimension: 0,
            fingerprint: blake3::hash(b"").to_hex().to_string(),
            documents: Vec::new(),
            norms: Vec::new(),
        }
    }

    /// Validate and build a snapshot. Rejects duplicate ids, empty content,
    /// inconsistent or zero dimensions and non-finite embedding values.
    pub fn build(generation: u64, mut documents: Vec<ReferenceDocument>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut dimension = None;

        for doc in &documents {
            if doc.id.trim().is_empty() {
                return Err(SignalError::CorpusLoad("document with empty id".to_string()));
            }
            if !seen.insert(doc.id.as_str()) {
                return Err(SignalError::CorpusLoad(format!(
                    "duplicate document id '{}'",
                    doc.id
                )));
            }
            if doc.content.trim().is_empty() {
                return Err(SignalError::CorpusLoad(format!(
                    "document '{}' has empty content",
                    doc.id
                )));
            }
            if doc.embedding.is_empty() {
                return Err(SignalError::CorpusLoad(format!(
                    "document '{}' has an empty embedding",
                    doc.id
                )));
            }
            if doc.embedding.iter().any(|v| !v.is_finite()) {
                return Err(SignalError::CorpusLoad(format!(
                    "document '{}' has non-finite embedding values",
                    doc.id
                )));
            }
            match dimension {
                None => dimension = Some(doc.embedding.len()),
                Some(d) if d != doc.embedding.len() => {
                    return Err(SignalError::CorpusLoad(format!(
                        "document '{}' has dimension {}, corpus dimension is {}",
                        doc.id,
                        doc.embedding.len(),
                        d
                    )));
                }
                Some(_) => {}
            }
        }

        documents.sort_by(|a, b| a.id.cmp(&b.id));

        let mut hasher = blake3::Hasher::new();
        for doc in &documents {
            hasher.update(doc.id.as_bytes());
            hasher.update(doc.content.as_bytes());
            for v in &doc.embedding {
                hasher.update(&v.to_le_bytes());
            }
        }

        let norms = documents.iter().map(|d| l2_norm(&d.embedding)).collect();

        Ok(Self {
            generation,
            dimension: dimension.unwrap_or(0),
            fingerprint: hasher.finalize().to_hex().to_string(),
            documents: documents.into_iter().map(Arc::new).collect(),
            norms,
        })
    }

    /// Reload counter; 0 for the initial empty snapshot
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// Embedding dimension (0 when empty)
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// blake3 fingerprint of ids, contents and embeddings
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the snapshot holds no documents
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Look up a document by id
    pub fn get(&self, id: &str) -> Option<&Arc<ReferenceDocument>> {
        self.documents
            .binary_search_by(|d| d.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.documents[i])
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = (&Arc<ReferenceDocument>, f32)> {
        self.documents.iter().zip(self.norms.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::embedder::HashingEmbedder;

    fn doc(id: &str, embedding: Vec<f32>) -> ReferenceDocument {
        ReferenceDocument {
            id: id.to_string(),
            title: None,
            content: format!("content of {}", id),
            embedding,
            recommended_action: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_build_sorts_by_id() {
        let snapshot = CorpusSnapshot::build(
            1,
            vec![doc("SOP-2", vec![1.0, 0.0]), doc("SOP-1", vec![0.0, 1.0])],
        )
        .unwrap();

        let ids: Vec<&str> = snapshot.entries().map(|(d, _)| d.id.as_str()).collect();
        assert_eq!(ids, vec!["SOP-1", "SOP-2"]);
        assert_eq!(snapshot.dimension(), 2);
        assert!(snapshot.get("SOP-2").is_some());
        assert!(snapshot.get("SOP-9").is_none());
    }

    #[test]
    fn test_build_rejects_duplicates() {
        let err = CorpusSnapshot::build(
            1,
            vec![doc("SOP-1", vec![1.0]), doc("SOP-1", vec![0.5])],
        )
        .unwrap_err();
        assert!(matches!(err, SignalError::CorpusLoad(_)));
    }

    #[test]
    fn test_build_rejects_inconsistent_dimension() {
        let err = CorpusSnapshot::build(
            1,
            vec![doc("SOP-1", vec![1.0, 0.0]), doc("SOP-2", vec![1.0])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("dimension"));
    }

    #[test]
    fn test_build_rejects_nan() {
        assert!(CorpusSnapshot::build(1, vec![doc("SOP-1", vec![f32::NAN])]).is_err());
    }

    #[test]
    fn test_fingerprint_stable_under_reordering() {
        let a = CorpusSnapshot::build(
            1,
            vec![doc("A", vec![1.0]), doc("B", vec![2.0])],
        )
        .unwrap();
        let b = CorpusSnapshot::build(
            2,
            vec![doc("B", vec![2.0]), doc("A", vec![1.0])],
        )
        .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_corpus_file_embeds_missing_vectors() {
        let json = r#"{
            "documents": [
                {"id": "SOP-104", "title": "Vacuum Error", "content": "Aspiration timeout: retry at half speed",
                 "recommended_action": "RETRY(speed=0.5)"},
                {"id": "SOP-200", "content": "Door open", "embedding": [0.0, 1.0, 0.0, 0.0]}
            ]
        }"#;
        let file: CorpusFile = serde_json::from_str(json).unwrap();
        let embedder = HashingEmbedder::new(4);
        let docs = file.into_documents(&embedder);

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].embedding.len(), 4);
        assert_eq!(docs[1].embedding, vec![0.0, 1.0, 0.0, 0.0]);
        assert_eq!(
            docs[0].recommended_action.as_ref().map(|t| t.action.as_str()),
            Some("RETRY")
        );
    }

    #[test]
    fn test_corpus_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.json");
        std::fs::write(&path, r#"{"documents": []}"#).unwrap();

        let file = CorpusFile::from_file(&path).unwrap();
        assert!(file.documents.is_empty());

        assert!(CorpusFile::from_file(dir.path().join("missing.json")).is_err());
    }
}
