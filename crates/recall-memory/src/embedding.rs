use std::collections::HashMap;

use async_trait::async_trait;
use recall_core::{MemoryError, MemoryResult};

/// Injected capability that turns text into a dense vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute the embedding of a single text.
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>>;

    /// Compute embeddings for a batch of texts, preserving order.
    async fn embed_batch(&self, texts: &[&str]) -> MemoryResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;
}

/// Deterministic hashed bag-of-words embedding.
///
/// Every word is spread over three FNV-1a buckets weighted by its term
/// frequency and the result is L2-normalised. Identical text always yields an
/// identical vector, which keeps retrieval order reproducible.
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    /// Embedding with `dimension` buckets. A zero dimension is bumped to one.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MemoryError::Validation(
                "cannot embed empty text".to_string(),
            ));
        }

        let mut vector = vec![0.0f32; self.dimension];
        let words = words(text);
        if words.is_empty() {
            return Ok(vector);
        }

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for word in &words {
            *freq.entry(word.as_str()).or_insert(0.0) += 1.0;
        }

        let total = words.len() as f32;
        for (word, count) in &freq {
            let tf = count / total;
            let bytes = word.as_bytes();
            vector[bucket(bytes, None, self.dimension)] += tf;
            vector[bucket(bytes, Some(1), self.dimension)] += tf * 0.7;
            vector[bucket(bytes, Some(2), self.dimension)] += tf * 0.5;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Lowercased alphanumeric words longer than one character.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 1)
        .map(str::to_lowercase)
        .collect()
}

fn bucket(word: &[u8], salt: Option<u8>, dimension: usize) -> usize {
    let mut hash = fnv1a(2166136261, word);
    if let Some(salt) = salt {
        hash = fnv1a(hash, &[salt]);
    }
    hash as usize % dimension
}

/// FNV-1a continuing from `seed`.
fn fnv1a(seed: u32, data: &[u8]) -> u32 {
    let mut hash = seed;
    for &byte in data {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
