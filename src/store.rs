//! Hierarchy store capability and concurrent compilation.
//!
//! A store hands out frozen [`HierarchyModel`] snapshots behind an `Arc`.
//! Independent projects compile concurrently, one blocking task each, every
//! task reading only its own snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::compile::{CompileOutcome, PipelineCompiler};
use crate::config::PipelineConfig;
use crate::connector::FactSource;
use crate::model::HierarchyModel;

/// Errors from fetching or compiling stored hierarchies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("compile task failed: {0}")]
    Join(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Read-only access to hierarchies by project id.
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    /// Fetch a frozen snapshot of one project's hierarchy.
    async fn fetch(&self, project_id: &str) -> StoreResult<Arc<HierarchyModel>>;

    /// Ids of every stored project, sorted.
    async fn list_projects(&self) -> StoreResult<Vec<String>>;
}

/// A store holding hierarchies in memory.
#[derive(Debug, Default)]
pub struct InMemoryHierarchyStore {
    projects: RwLock<HashMap<String, Arc<HierarchyModel>>>,
}

impl InMemoryHierarchyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a model under its project id, replacing any previous version.
    ///
    /// Snapshots already handed out keep the version they were fetched at.
    pub async fn insert(&self, model: HierarchyModel) {
        let mut projects = self.projects.write().await;
        projects.insert(model.project_id().to_string(), Arc::new(model));
    }
}

#[async_trait]
impl HierarchyStore for InMemoryHierarchyStore {
    async fn fetch(&self, project_id: &str) -> StoreResult<Arc<HierarchyModel>> {
        let projects = self.projects.read().await;
        projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))
    }

    async fn list_projects(&self) -> StoreResult<Vec<String>> {
        let projects = self.projects.read().await;
        let mut ids: Vec<String> = projects.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// Fetch and compile several projects concurrently.
///
/// Each compile runs on the blocking pool against its own snapshot; the
/// configuration and fact source are shared read-only. Results come back in
/// the order of `project_ids`.
pub async fn compile_projects(
    store: &dyn HierarchyStore,
    project_ids: &[String],
    config: Arc<PipelineConfig>,
    source: Arc<dyn FactSource>,
) -> Vec<(String, StoreResult<CompileOutcome>)> {
    let futures: Vec<_> = project_ids
        .iter()
        .map(|project_id| {
            let config = Arc::clone(&config);
            let source = Arc::clone(&source);
            async move {
                let model = store.fetch(project_id).await?;
                tracing::debug!(project = %project_id, "compiling stored project");
                tokio::task::spawn_blocking(move || {
                    PipelineCompiler::new(&model, &config).compile(source.as_ref())
                })
                .await
                .map_err(|e| StoreError::Join(e.to_string()))
            }
        })
        .collect();

    let results = futures::future::join_all(futures).await;
    project_ids.iter().cloned().zip(results).collect()
}
