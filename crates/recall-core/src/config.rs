use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{MemoryError, MemoryResult};

/// Top-level configuration, usually read from `recall.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct RecallConfig {
    /// Root for the metadata database and vector files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Hybrid retrieval defaults.
    #[serde(default)]
    pub search: SearchConfig,
    /// Vector index settings.
    #[serde(default)]
    pub index: IndexConfig,
    /// Metadata store settings.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Tracing subscriber settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Hybrid retrieval defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Weight of the embedding similarity signal.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f32,
    /// Weight of the literal keyword signal.
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
    /// Result count when a request names none.
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// Multiplier applied to `limit` for the semantic candidate fetch.
    #[serde(default = "default_overfetch")]
    pub overfetch_factor: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            keyword_weight: default_keyword_weight(),
            default_limit: default_limit(),
            overfetch_factor: default_overfetch(),
        }
    }
}

/// Where vector collections live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorBackendKind {
    /// Process-local, lost on exit.
    Memory,
    /// One JSONL file per folder under `data_dir/vectors`.
    File,
}

/// Vector index settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Records per backend call in batch writes.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Length of every embedding vector.
    #[serde(default = "default_dimension")]
    pub embedding_dimension: usize,
    /// Storage engine for vector collections.
    #[serde(default = "default_vector_backend")]
    pub backend: VectorBackendKind,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            embedding_dimension: default_dimension(),
            backend: default_vector_backend(),
        }
    }
}

/// Which engine keeps metadata rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataBackendKind {
    /// Process-local, lost on exit.
    Memory,
    /// SQLite database file.
    Sqlite,
}

/// Metadata store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataConfig {
    /// Storage engine for metadata rows.
    #[serde(default = "default_metadata_backend")]
    pub backend: MetadataBackendKind,
    /// Database file; relative paths resolve against `data_dir`.
    #[serde(default = "default_db_file")]
    pub path: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: default_metadata_backend(),
            path: default_db_file(),
        }
    }
}

/// Logging settings consumed by [`crate::logging::init_tracing`].
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_semantic_weight() -> f32 {
    0.7
}
fn default_keyword_weight() -> f32 {
    0.3
}
fn default_limit() -> usize {
    5
}
fn default_overfetch() -> usize {
    2
}
fn default_batch_size() -> usize {
    100
}
fn default_dimension() -> usize {
    256
}
fn default_vector_backend() -> VectorBackendKind {
    VectorBackendKind::File
}
fn default_metadata_backend() -> MetadataBackendKind {
    MetadataBackendKind::Sqlite
}
fn default_db_file() -> PathBuf {
    PathBuf::from("metadata.db")
}
fn default_filter() -> String {
    "info".to_string()
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            search: SearchConfig::default(),
            index: IndexConfig::default(),
            metadata: MetadataConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RecallConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> MemoryResult<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| MemoryError::Config(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> MemoryResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MemoryError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }

    /// In-memory backends only; nothing touches disk.
    pub fn ephemeral() -> Self {
        let mut config = Self::default();
        config.index.backend = VectorBackendKind::Memory;
        config.metadata.backend = MetadataBackendKind::Memory;
        config
    }

    /// Reject values the engine cannot operate with.
    pub fn validate(&self) -> MemoryResult<()> {
        let s = &self.search;
        if s.semantic_weight < 0.0 || s.keyword_weight < 0.0 {
            return Err(MemoryError::Config(
                "search weights must be non-negative".to_string(),
            ));
        }
        if s.semantic_weight + s.keyword_weight <= 0.0 {
            return Err(MemoryError::Config(
                "search weights must not both be zero".to_string(),
            ));
        }
        if s.default_limit == 0 {
            return Err(MemoryError::Config("search.default_limit must be > 0".to_string()));
        }
        if s.overfetch_factor == 0 {
            return Err(MemoryError::Config(
                "search.overfetch_factor must be > 0".to_string(),
            ));
        }
        if self.index.batch_size == 0 {
            return Err(MemoryError::Config("index.batch_size must be > 0".to_string()));
        }
        if self.index.embedding_dimension == 0 {
            return Err(MemoryError::Config(
                "index.embedding_dimension must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Metadata database path with `data_dir` applied.
    pub fn metadata_path(&self) -> PathBuf {
        if self.metadata.path.is_absolute() {
            self.metadata.path.clone()
        } else {
            self.data_dir.join(&self.metadata.path)
        }
    }

    /// Directory holding one JSONL file per vector collection.
    pub fn vectors_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RecallConfig::from_toml_str("").unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert!((config.search.semantic_weight - 0.7).abs() < f32::EPSILON);
        assert!((config.search.keyword_weight - 0.3).abs() < f32::EPSILON);
        assert_eq!(config.search.default_limit, 5);
        assert_eq!(config.index.batch_size, 100);
        assert_eq!(config.index.backend, VectorBackendKind::File);
        assert_eq!(config.metadata.backend, MetadataBackendKind::Sqlite);
        assert_eq!(config.metadata_path(), PathBuf::from("./data/metadata.db"));
    }

    #[test]
    fn test_sections_override() {
        let config = RecallConfig::from_toml_str(
            r#"
            data_dir = "/var/lib/recall"

            [search]
            semantic_weight = 0.5
            keyword_weight = 0.5

            [index]
            batch_size = 10
            backend = "memory"

            [metadata]
            backend = "memory"

            [logging]
            filter = "recall_memory=debug"
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.index.batch_size, 10);
        assert_eq!(config.index.backend, VectorBackendKind::Memory);
        assert_eq!(config.metadata.backend, MetadataBackendKind::Memory);
        assert_eq!(config.vectors_dir(), PathBuf::from("/var/lib/recall/vectors"));
        assert!(config.logging.json);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        for doc in [
            "[search]\nsemantic_weight = -0.1",
            "[search]\nsemantic_weight = 0.0\nkeyword_weight = 0.0",
            "[search]\ndefault_limit = 0",
            "[index]\nbatch_size = 0",
            "[index]\nembedding_dimension = 0",
        ] {
            let err = RecallConfig::from_toml_str(doc).unwrap_err();
            assert!(matches!(err, MemoryError::Config(_)), "{doc}");
        }
    }

    #[test]
    fn test_unknown_backend_is_config_error() {
        let err = RecallConfig::from_toml_str("[index]\nbackend = \"qdrant\"").unwrap_err();
        assert!(matches!(err, MemoryError::Config(_)));
    }
}
