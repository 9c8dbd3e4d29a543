//! Long-term memory interface
//!
//! Memory is a black-box similarity-search service shared by concurrent
//! analyses. Every failure is non-fatal to the pipeline. [`InMemoryMemory`]
//! ranks by token-overlap similarity and serves tests and the CLI.

use crate::error::MemoryError;
use crate::types::{AnalysisId, StructuredResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use ulid::Ulid;

/// Metadata key used for category filtering
pub const CATEGORY_KEY: &str = "category";

/// Category of stored analysis insights
pub const ANALYSIS_RESULT_CATEGORY: &str = "analysis_result";

/// Category of stored user feedback
pub const USER_FEEDBACK_CATEGORY: &str = "user_feedback";

/// One search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    /// Memory identifier
    pub id: String,
    /// Stored text
    pub text: String,
    /// Stored metadata
    pub metadata: StructuredResult,
    /// Distance from the query (lower is closer)
    pub distance: f64,
}

/// Similarity-search memory backend
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Up to `limit` entries closest to `query`, nearest first
    async fn search(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<MemoryHit>, MemoryError>;

    /// Store an entry, returning its identifier
    async fn add(&self, text: String, metadata: StructuredResult) -> Result<String, MemoryError>;
}

#[derive(Debug, Clone)]
struct StoredMemory {
    id: String,
    text: String,
    tokens: HashSet<String>,
    metadata: StructuredResult,
}

/// Process-local memory ranked by Jaccard similarity of word sets
#[derive(Debug, Default)]
pub struct InMemoryMemory {
    entries: RwLock<Vec<StoredMemory>>,
}

impl InMemoryMemory {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[async_trait]
impl MemoryService for InMemoryMemory {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<MemoryHit>, MemoryError> {
        let query_tokens = tokenize(query);
        let entries = self.entries.read();

        let mut hits: Vec<MemoryHit> = entries
            .iter()
            .filter(|m| {
                category.map_or(true, |c| {
                    m.metadata.get(CATEGORY_KEY).and_then(Value::as_str) == Some(c)
                })
            })
            .map(|m| MemoryHit {
                id: m.id.clone(),
                text: m.text.clone(),
                metadata: m.metadata.clone(),
                distance: 1.0 - jaccard(&query_tokens, &m.tokens),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn add(&self, text: String, metadata: StructuredResult) -> Result<String, MemoryError> {
        let id = Ulid::new().to_string();
        self.entries.write().push(StoredMemory {
            id: id.clone(),
            tokens: tokenize(&text),
            text,
            metadata,
        });
        tracing::debug!(memory_id = %id, "memory added");
        Ok(id)
    }
}

/// User feedback on a completed analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Overall rating, 1 to 5
    pub rating: u8,
    /// Accuracy rating, 1 to 5
    #[serde(default)]
    pub accuracy_rating: Option<u8>,
    /// Helpfulness rating, 1 to 5
    #[serde(default)]
    pub helpfulness_rating: Option<u8>,
    /// Whether the verdict turned out right
    #[serde(default)]
    pub was_decision_correct: Option<bool>,
    /// Factors the analysis missed
    #[serde(default)]
    pub missing_factors: Vec<String>,
    /// Free-text comment
    #[serde(default)]
    pub comment: Option<String>,
}

impl Feedback {
    /// Create feedback with an overall rating
    #[inline]
    #[must_use]
    pub fn new(rating: u8) -> Self {
        Self {
            rating,
            accuracy_rating: None,
            helpfulness_rating: None,
            was_decision_correct: None,
            missing_factors: Vec::new(),
            comment: None,
        }
    }

    /// With accuracy rating
    #[inline]
    #[must_use]
    pub fn with_accuracy(mut self, rating: u8) -> Self {
        self.accuracy_rating = Some(rating);
        self
    }

    /// With correctness flag
    #[inline]
    #[must_use]
    pub fn with_correctness(mut self, correct: bool) -> Self {
        self.was_decision_correct = Some(correct);
        self
    }

    /// With missing factors
    #[inline]
    #[must_use]
    pub fn with_missing_factors(mut self, factors: Vec<String>) -> Self {
        self.missing_factors = factors;
        self
    }

    /// With comment
    #[inline]
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Check every rating is within 1..=5
    pub fn validate(&self) -> Result<(), MemoryError> {
        let ratings = [Some(self.rating), self.accuracy_rating, self.helpfulness_rating];
        if ratings.iter().flatten().all(|r| (1..=5).contains(r)) {
            Ok(())
        } else {
            Err(MemoryError::Invalid("ratings must be between 1 and 5".into()))
        }
    }
}

/// Store feedback as a `user_feedback` memory entry
pub async fn remember_feedback(
    memory: &dyn MemoryService,
    analysis_id: AnalysisId,
    feedback: &Feedback,
) -> Result<String, MemoryError> {
    feedback.validate()?;

    let missing = if feedback.missing_factors.is_empty() {
        "None".to_string()
    } else {
        feedback.missing_factors.join(", ")
    };
    let text = format!(
        "Analysis feedback:\n- Rating: {}/5\n- Accuracy: {}/5\n- Decision correct: {}\n- Missing factors: {}\n- Comment: {}",
        feedback.rating,
        feedback.accuracy_rating.map_or_else(|| "n/a".to_string(), |r| r.to_string()),
        feedback.was_decision_correct.map_or_else(|| "unknown".to_string(), |c| c.to_string()),
        missing,
        feedback.comment.as_deref().unwrap_or("No comment"),
    );

    let mut metadata = StructuredResult::new();
    metadata.insert("type".into(), json!("feedback"));
    metadata.insert("analysis_id".into(), json!(analysis_id.to_string()));
    metadata.insert("rating".into(), json!(feedback.rating));
    metadata.insert(CATEGORY_KEY.into(), json!(USER_FEEDBACK_CATEGORY));

    let id = memory.add(text, metadata).await?;
    tracing::info!(analysis_id = %analysis_id, memory_id = %id, "feedback stored in memory");
    Ok(id)
}
