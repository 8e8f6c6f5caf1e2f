use std::collections::BTreeMap;
use std::path::PathBuf;

use exam_rag_core::{PipelineError, Placeholder, PromptTemplate, TaskProfile};

const BUILTIN_CLASSIFICATION: &str = include_str!("../../../prompts/classification.txt");
const BUILTIN_SUMMARY: &str = include_str!("../../../prompts/summary.txt");
const BUILTIN_NOTIFICATION: &str = include_str!("../../../prompts/notification.txt");

/// Key-addressed source of prompt template text.
pub trait TemplateStore: Send + Sync {
    /// # Errors
    /// Returns `PipelineError::Configuration` when the template cannot be fetched.
    fn fetch(&self, key: &str) -> Result<String, PipelineError>;
}

/// Templates read from `<root>/<key>.txt` on every fetch, so edits apply without a restart.
#[derive(Debug, Clone)]
pub struct DirectoryTemplateStore {
    root: PathBuf,
}

impl DirectoryTemplateStore {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl TemplateStore for DirectoryTemplateStore {
    fn fetch(&self, key: &str) -> Result<String, PipelineError> {
        let path = self.root.join(format!("{key}.txt"));
        std::fs::read_to_string(&path).map_err(|err| {
            PipelineError::Configuration(format!(
                "prompt template `{key}` could not be read from {}: {err}",
                path.display()
            ))
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTemplateStore {
    templates: BTreeMap<String, String>,
}

impl InMemoryTemplateStore {
    /// Templates shipped with the crate.
    #[must_use]
    pub fn builtin() -> Self {
        Self::default()
            .with(TaskProfile::Classification.template_key(), BUILTIN_CLASSIFICATION)
            .with(TaskProfile::Summary.template_key(), BUILTIN_SUMMARY)
            .with(TaskProfile::Notification.template_key(), BUILTIN_NOTIFICATION)
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, body: impl Into<String>) -> Self {
        self.templates.insert(key.into(), body.into());
        self
    }
}

impl TemplateStore for InMemoryTemplateStore {
    fn fetch(&self, key: &str) -> Result<String, PipelineError> {
        self.templates.get(key).cloned().ok_or_else(|| {
            PipelineError::Configuration(format!("prompt template `{key}` is not registered"))
        })
    }
}

#[must_use]
pub fn required_placeholders(profile: TaskProfile) -> &'static [Placeholder] {
    match profile {
        TaskProfile::Classification => {
            &[Placeholder::HistoricalContext, Placeholder::CurrentRecord]
        }
        TaskProfile::Summary => {
            &[Placeholder::HistoricalContext, Placeholder::CurrentRecord, Placeholder::RiskLabel]
        }
        TaskProfile::Notification => {
            &[Placeholder::CurrentRecord, Placeholder::RiskLabel, Placeholder::Summary]
        }
    }
}

/// Fetch and check the template for a task.
///
/// # Errors
/// Returns `PipelineError::Configuration` when the template is missing, empty or lacks a required
/// placeholder.
pub fn load_template(
    store: &dyn TemplateStore,
    profile: TaskProfile,
) -> Result<PromptTemplate, PipelineError> {
    let key = profile.template_key();
    let body = store.fetch(key)?;
    PromptTemplate::new(key, body, required_placeholders(profile))
}
