//! Analysis record repository
//!
//! Records are keyed by analysis id. The repository is injected into the
//! service layer; [`InMemoryRepository`] backs tests and the CLI.

use crate::error::RepositoryError;
use crate::state_machine::PipelineState;
use crate::types::{AggregateResult, AnalysisId, ContextMap};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Stored state of one analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Analysis identifier
    pub id: AnalysisId,
    /// Problem statement as submitted
    pub problem_statement: String,
    /// Caller context
    pub context: ContextMap,
    /// Last persisted state
    pub status: PipelineState,
    /// Compiled aggregate, once completed
    pub result: Option<AggregateResult>,
    /// Error message, if the run failed or was cancelled
    pub error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time the run reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisRecord {
    /// Create a pending record
    #[must_use]
    pub fn new(id: AnalysisId, problem_statement: impl Into<String>, context: ContextMap) -> Self {
        Self {
            id,
            problem_statement: problem_statement.into(),
            context,
            status: PipelineState::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Keyed store of analysis records
#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    /// Fetch a record
    async fn get(&self, id: AnalysisId) -> Result<Option<AnalysisRecord>, RepositoryError>;

    /// Insert or replace a record
    async fn put(&self, record: AnalysisRecord) -> Result<(), RepositoryError>;

    /// Remove a record; returns whether it existed
    async fn delete(&self, id: AnalysisId) -> Result<bool, RepositoryError>;

    /// Most recent records first
    async fn list(&self, limit: usize) -> Result<Vec<AnalysisRecord>, RepositoryError>;
}

/// Process-local repository
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    records: DashMap<AnalysisId, AnalysisRecord>,
}

impl InMemoryRepository {
    /// Create an empty repository
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisRepository for InMemoryRepository {
    async fn get(&self, id: AnalysisId) -> Result<Option<AnalysisRecord>, RepositoryError> {
        Ok(self.records.get(&id).map(|r| r.value().clone()))
    }

    async fn put(&self, record: AnalysisRecord) -> Result<(), RepositoryError> {
        self.records.insert(record.id, record);
        Ok(())
    }

    async fn delete(&self, id: AnalysisId) -> Result<bool, RepositoryError> {
        Ok(self.records.remove(&id).is_some())
    }

    async fn list(&self, limit: usize) -> Result<Vec<AnalysisRecord>, RepositoryError> {
        let mut records: Vec<AnalysisRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        records.truncate(limit);
        Ok(records)
    }
}
