use std::path::{Path, PathBuf};
use std::sync::Arc;

use exam_rag_core::{PipelineError, SimilarityScope};
use exam_rag_provider::{EmbeddingEndpoint, GenerationEndpoint, HttpEmbedder, HttpTextGenerator};
use serde::{Deserialize, Serialize};

use crate::templates::{DirectoryTemplateStore, InMemoryTemplateStore};
use crate::ExamRagApi;

/// How prior records are chosen as context for a new evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// The subject's most recent labeled records.
    #[default]
    Temporal,
    /// Nearest records by embedding distance.
    Similarity,
}

impl RetrievalStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Similarity => "similarity",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RetrievalSettings {
    #[serde(default)]
    pub strategy: RetrievalStrategy,
    #[serde(default)]
    pub scope: SimilarityScope,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_similar_limit")]
    pub similar_limit: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            strategy: RetrievalStrategy::default(),
            scope: SimilarityScope::default(),
            history_limit: default_history_limit(),
            similar_limit: default_similar_limit(),
        }
    }
}

fn default_history_limit() -> usize {
    3
}

fn default_similar_limit() -> usize {
    5
}

/// File-level configuration (YAML).
///
/// ```yaml
/// generation:
///   url: http://127.0.0.1:8080/model/invoke
///   model: clinical-large
///   api_key_env: EXAM_RAG_API_KEY
/// embedding:
///   url: http://127.0.0.1:8080/embed
///   model: clinical-embed
///   dimensions: 1024
/// templates_dir: ./prompts
/// retrieval:
///   strategy: similarity
///   scope: subject
///   history_limit: 3
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub generation: Option<GenerationEndpoint>,
    #[serde(default)]
    pub embedding: Option<EmbeddingEndpoint>,
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
}

impl AppConfig {
    /// # Errors
    /// Returns `PipelineError::Configuration` when the YAML is malformed or has unknown keys.
    pub fn from_yaml_str(raw: &str) -> Result<Self, PipelineError> {
        serde_yaml::from_str(raw)
            .map_err(|err| PipelineError::Configuration(format!("invalid configuration: {err}")))
    }

    /// # Errors
    /// Returns `PipelineError::Configuration` when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            PipelineError::Configuration(format!(
                "failed to read configuration {}: {err}",
                path.display()
            ))
        })?;
        let mut config = Self::from_yaml_str(&raw)?;

        // Relative template directories are resolved against the config file location.
        if let (Some(dir), Some(parent)) = (config.templates_dir.as_ref(), path.parent()) {
            if dir.is_relative() {
                config.templates_dir = Some(parent.join(dir));
            }
        }
        Ok(config)
    }

    /// Build the pipeline once at the boundary, wiring concrete clients and the template source.
    ///
    /// # Errors
    /// Returns `PipelineError::Configuration` when a configured endpoint is invalid or the
    /// similarity strategy is selected without an embedding endpoint.
    pub fn build_api(&self, db_path: PathBuf) -> Result<ExamRagApi, PipelineError> {
        if self.retrieval.strategy == RetrievalStrategy::Similarity && self.embedding.is_none() {
            return Err(PipelineError::Configuration(
                "similarity retrieval requires an `embedding` endpoint".to_string(),
            ));
        }

        let mut api = ExamRagApi::new(db_path).with_settings(self.retrieval);
        if let Some(endpoint) = &self.generation {
            api = api.with_generator(Arc::new(HttpTextGenerator::new(endpoint)?));
        }
        if let Some(endpoint) = &self.embedding {
            api = api.with_embedder(Arc::new(HttpEmbedder::new(endpoint)?));
        }
        api = match &self.templates_dir {
            Some(dir) => api.with_templates(Arc::new(DirectoryTemplateStore::new(dir.clone()))),
            None => api.with_templates(Arc::new(InMemoryTemplateStore::builtin())),
        };
        Ok(api)
    }
}
