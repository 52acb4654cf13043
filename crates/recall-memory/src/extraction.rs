use std::sync::LazyLock;

use async_trait::async_trait;
use recall_core::MemoryResult;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Line separating the enrichment header from the raw content.
pub const CONTENT_DELIMITER: &str = "\n--- content ---\n";

/// A directed link between two extracted entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Entity the relation starts from.
    pub source: String,
    /// Entity the relation points to.
    pub target: String,
    /// Relation label.
    pub kind: String,
}

/// Structure pulled out of raw text by a [`ContentExtractor`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extraction {
    /// Distinct entity names in order of first appearance.
    pub entities: Vec<String>,
    /// Links between entities.
    pub relations: Vec<Relation>,
    /// Standalone statements, one per sentence.
    pub observations: Vec<String>,
}

impl Extraction {
    /// `(entity_count, relation_count, observation_count)`.
    pub fn counts(&self) -> (u32, u32, u32) {
        (
            to_count(self.entities.len()),
            to_count(self.relations.len()),
            to_count(self.observations.len()),
        )
    }
}

fn to_count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Upstream capability turning raw text into entities, relations and
/// observations. Only used to build the enriched text sent to the index.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Extract structure from `content`.
    async fn extract(&self, title: &str, content: &str) -> MemoryResult<Extraction>;
}

#[allow(clippy::expect_used)]
static SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(\s+|$)|\n+").expect("sentence pattern compiles"));
#[allow(clippy::expect_used)]
static CAPITALIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][A-Za-z0-9_-]*\b").expect("entity pattern compiles"));

const NON_ENTITIES: &[&str] = &[
    "A", "An", "And", "But", "I", "If", "In", "It", "On", "Or", "So", "The", "There", "These",
    "They", "This", "Those", "We", "When", "You",
];

/// Rule-based extractor with no model behind it.
///
/// Capitalised words are entities, entities sharing a sentence are linked by a
/// `co_occurs` relation, and each sentence of three or more words is an
/// observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    /// Create the extractor.
    pub fn new() -> Self {
        Self
    }

    fn sentences(content: &str) -> Vec<&str> {
        SENTENCE_BREAK
            .split(content)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    fn entities_in(sentence: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for m in CAPITALIZED.find_iter(sentence) {
            let word = m.as_str();
            if NON_ENTITIES.contains(&word) || found.iter().any(|e| e == word) {
                continue;
            }
            found.push(word.to_string());
        }
        found
    }
}

#[async_trait]
impl ContentExtractor for HeuristicExtractor {
    async fn extract(&self, _title: &str, content: &str) -> MemoryResult<Extraction> {
        let mut extraction = Extraction::default();

        for sentence in Self::sentences(content) {
            let local = Self::entities_in(sentence);
            for pair in local.windows(2) {
                let relation = Relation {
                    source: pair[0].clone(),
                    target: pair[1].clone(),
                    kind: "co_occurs".to_string(),
                };
                if !extraction.relations.contains(&relation) {
                    extraction.relations.push(relation);
                }
            }
            for entity in local {
                if !extraction.entities.contains(&entity) {
                    extraction.entities.push(entity);
                }
            }
            if sentence.split_whitespace().count() >= 3 {
                extraction.observations.push(sentence.to_string());
            }
        }

        Ok(extraction)
    }
}

/// Build the text stored in the vector index: a header with the title and the
/// extracted structure, then [`CONTENT_DELIMITER`], then the raw content.
pub fn enrich(title: &str, extraction: &Extraction, content: &str) -> String {
    let title = title.replace(['\r', '\n'], " ");
    let mut out = format!("# {}\n", title.trim());
    if !extraction.entities.is_empty() {
        out.push_str("\nEntities: ");
        out.push_str(&extraction.entities.join(", "));
    }
    if !extraction.relations.is_empty() {
        let relations: Vec<String> = extraction
            .relations
            .iter()
            .map(|r| format!("{} -[{}]-> {}", r.source, r.kind, r.target))
            .collect();
        out.push_str("\nRelations: ");
        out.push_str(&relations.join("; "));
    }
    out.push_str(CONTENT_DELIMITER);
    out.push_str(content);
    out
}

/// Recover the raw content from text produced by [`enrich`]. Text without an
/// enrichment header is returned unchanged.
pub fn strip_enrichment(text: &str) -> &str {
    if !text.starts_with("# ") {
        return text;
    }
    match text.split_once(CONTENT_DELIMITER) {
        Some((_, content)) => content,
        None => text,
    }
}
