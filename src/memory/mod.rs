//! Tone memory: approved posts kept as style exemplars for future generations.
//!
//! Reads work on an `Arc` snapshot of the entry list. Writers build a new
//! list and swap it in, so a reader holding a snapshot never sees a
//! half-applied add or cleanup.

pub mod embedding;
pub mod import;
pub mod model;
pub mod similarity;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub use embedding::{Embedder, OpenAiEmbedder};
pub use import::ImportReport;
pub use model::{MemoryEntry, MemoryStats, QualityScores, content_hash, normalize_content};

use crate::error::MemoryError;
use crate::store::Database;

/// Default bound on one embedding call made by the store.
pub const DEFAULT_EMBED_TIMEOUT: StdDuration = StdDuration::from_secs(15);

/// Durable, queryable corpus of approved posts.
pub struct ToneMemoryStore {
    db: Arc<dyn Database>,
    embedder: Option<Arc<dyn Embedder>>,
    embed_timeout: StdDuration,
    snapshot: RwLock<Arc<Vec<MemoryEntry>>>,
    /// Serializes writers; readers never take it.
    write_lock: Mutex<()>,
}

impl ToneMemoryStore {
    /// Load every persisted entry into memory.
    pub async fn load(
        db: Arc<dyn Database>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self, MemoryError> {
        let entries = db.list_memory_entries().await?;
        info!(
            entries = entries.len(),
            embedder = embedder.as_ref().map(|e| e.model_name()).unwrap_or("none"),
            "Tone memory loaded"
        );
        Ok(Self {
            db,
            embedder,
            embed_timeout: DEFAULT_EMBED_TIMEOUT,
            snapshot: RwLock::new(Arc::new(entries)),
            write_lock: Mutex::new(()),
        })
    }

    /// Bound every embedding call. A call that runs over is treated as failed.
    pub fn with_embed_timeout(mut self, timeout: StdDuration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    async fn embed(&self, embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, MemoryError> {
        match tokio::time::timeout(self.embed_timeout, embedder.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(MemoryError::EmbeddingFailed {
                reason: format!("timed out after {:?}", self.embed_timeout),
            }),
        }
    }

    fn is_duplicate(entries: &[MemoryEntry], entry: &MemoryEntry) -> bool {
        entries
            .iter()
            .any(|e| e.client_id == entry.client_id && e.content_hash == entry.content_hash)
    }

    /// Current snapshot. Cheap; holds no lock once returned.
    pub async fn snapshot(&self) -> Arc<Vec<MemoryEntry>> {
        self.snapshot.read().await.clone()
    }

    async fn swap(&self, entries: Vec<MemoryEntry>) {
        *self.snapshot.write().await = Arc::new(entries);
    }

    /// Whether a vector index backs similarity retrieval.
    pub fn index_available(&self) -> bool {
        self.embedder.is_some()
    }

    /// Insert an approved post. Returns `false` if the same normalized
    /// content already exists for this client.
    pub async fn add(&self, mut entry: MemoryEntry) -> Result<bool, MemoryError> {
        if entry.content.trim().is_empty() {
            debug!(client_id = %entry.client_id, "Ignoring empty memory entry");
            return Ok(false);
        }
        entry.content_hash = content_hash(&entry.content);

        if Self::is_duplicate(&self.snapshot().await, &entry) {
            debug!(client_id = %entry.client_id, hash = %entry.content_hash, "Duplicate memory entry skipped");
            return Ok(false);
        }

        // Embedding happens before the writer lock so a slow backend never
        // blocks other writers.
        if entry.embedding.is_none() {
            if let Some(embedder) = &self.embedder {
                match self.embed(embedder.as_ref(), &entry.embedding_text()).await {
                    Ok(vector) => entry.embedding = Some(vector),
                    Err(e) => warn!(error = %e, "Embedding failed, entry stored without vector"),
                }
            }
        }

        let _guard = self.write_lock.lock().await;
        let current = self.snapshot().await;
        if Self::is_duplicate(&current, &entry) {
            return Ok(false);
        }

        if !self.db.insert_memory_entry(&entry).await? {
            return Ok(false);
        }

        info!(entry_id = %entry.id, client_id = %entry.client_id, topic = %entry.topic, "Added post to tone memory");
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(entry);
        self.swap(next).await;
        Ok(true)
    }

    /// Entries for `client_id`, ranked for `topic`.
    ///
    /// `top_k = None` returns every entry for the client, newest first.
    /// `min_age_days > 0` drops entries created within that many days.
    pub async fn retrieve_similar(
        &self,
        topic: &str,
        client_id: &str,
        min_age_days: u32,
        top_k: Option<usize>,
    ) -> Vec<MemoryEntry> {
        let snapshot = self.snapshot().await;
        let cutoff = Utc::now() - Duration::days(min_age_days as i64);

        let mut candidates: Vec<MemoryEntry> = snapshot
            .iter()
            .filter(|e| e.client_id == client_id)
            .filter(|e| min_age_days == 0 || e.created_at <= cutoff)
            .cloned()
            .collect();
        candidates.sort_by(newest_first);

        let Some(k) = top_k else {
            return candidates;
        };

        let scores = match self.vector_scores(topic, &candidates).await {
            Some(scores) => scores,
            None => lexical_scores(topic, &candidates),
        };

        // Stable sort keeps newest-first order among equal scores.
        let mut ranked: Vec<(f32, MemoryEntry)> = scores.into_iter().zip(candidates).collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        ranked.into_iter().take(k).map(|(_, e)| e).collect()
    }

    /// Cosine scores, or `None` when the vector index cannot rank every candidate.
    async fn vector_scores(&self, topic: &str, candidates: &[MemoryEntry]) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        if candidates.iter().any(|e| e.embedding.is_none()) {
            debug!("Some entries lack embeddings, using lexical ranking");
            return None;
        }
        let query = match self.embed(embedder.as_ref(), topic).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Query embedding failed, using lexical ranking");
                return None;
            }
        };
        Some(
            candidates
                .iter()
                .map(|e| {
                    e.embedding
                        .as_deref()
                        .map(|v| similarity::cosine_similarity(&query, v))
                        .unwrap_or(0.0)
                })
                .collect(),
        )
    }

    /// Remove entries strictly older than `now - days_old`. Returns the count removed.
    pub async fn cleanup(&self, days_old: u32) -> Result<usize, MemoryError> {
        let _guard = self.write_lock.lock().await;
        let cutoff = Utc::now() - Duration::days(days_old as i64);

        let removed = self.db.delete_memory_entries_before(cutoff).await?;

        let current = self.snapshot().await;
        let kept: Vec<MemoryEntry> = current
            .iter()
            .filter(|e| e.created_at >= cutoff)
            .cloned()
            .collect();
        if kept.len() != current.len() {
            self.swap(kept).await;
        }

        info!(removed, days_old, "Tone memory cleanup complete");
        Ok(removed)
    }

    /// Aggregate statistics.
    pub async fn stats(&self) -> MemoryStats {
        let snapshot = self.snapshot().await;
        let clients: HashSet<&str> = snapshot.iter().map(|e| e.client_id.as_str()).collect();
        let voice: Vec<f32> = snapshot.iter().filter_map(|e| e.quality_scores.voice).collect();
        let content: Vec<f32> = snapshot.iter().filter_map(|e| e.quality_scores.content).collect();
        let all: Vec<f32> = voice.iter().chain(content.iter()).copied().collect();

        MemoryStats {
            total_posts: snapshot.len(),
            unique_clients: clients.len(),
            avg_quality: mean(&all),
            avg_voice_quality: mean(&voice),
            avg_content_quality: mean(&content),
            index_available: self.index_available(),
            indexed_entries: snapshot.iter().filter(|e| e.embedding.is_some()).count(),
        }
    }

    /// Entries newest first, optionally for one client.
    pub async fn entries(&self, client_id: Option<&str>) -> Vec<MemoryEntry> {
        let mut entries: Vec<MemoryEntry> = self
            .snapshot()
            .await
            .iter()
            .filter(|e| client_id.is_none_or(|c| e.client_id == c))
            .cloned()
            .collect();
        entries.sort_by(newest_first);
        entries
    }

    /// Embed entries stored while no embedder was available.
    pub async fn backfill_embeddings(&self) -> Result<usize, MemoryError> {
        let Some(embedder) = self.embedder.clone() else {
            return Ok(0);
        };

        let missing: Vec<MemoryEntry> = self
            .snapshot()
            .await
            .iter()
            .filter(|e| e.embedding.is_none())
            .cloned()
            .collect();

        let mut vectors = HashMap::new();
        for entry in &missing {
            match self.embed(embedder.as_ref(), &entry.embedding_text()).await {
                Ok(vector) => {
                    self.db.set_memory_embedding(entry.id, &vector).await?;
                    vectors.insert(entry.id, vector);
                }
                Err(e) => warn!(entry_id = %entry.id, error = %e, "Backfill embedding failed"),
            }
        }
        if vectors.is_empty() {
            return Ok(0);
        }

        // Apply to whatever the snapshot is now; entries may have been
        // added or cleaned up meanwhile.
        let _guard = self.write_lock.lock().await;
        let mut next = self.snapshot().await.as_ref().clone();
        let mut filled = 0;
        for entry in next.iter_mut() {
            if let Some(vector) = vectors.remove(&entry.id) {
                entry.embedding = Some(vector);
                filled += 1;
            }
        }
        self.swap(next).await;
        info!(filled, "Backfilled memory embeddings");
        Ok(filled)
    }
}

fn newest_first(a: &MemoryEntry, b: &MemoryEntry) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

fn lexical_scores(topic: &str, candidates: &[MemoryEntry]) -> Vec<f32> {
    let query = similarity::tokenize(topic);
    candidates
        .iter()
        .map(|e| {
            let doc = similarity::tokenize(&e.embedding_text());
            similarity::shared_token_count(&query, &doc) as f32
        })
        .collect()
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}
