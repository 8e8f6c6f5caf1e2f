use std::path::PathBuf;
use std::sync::Arc;

use exam_rag_core::{
    analyze_subject_trend, content_hash, embedding_text, format_current_record, format_history,
    tone_guidance, validate_classification, validate_free_text, ClassificationResult,
    ClassificationStage, Embedder, Embedding, ErrorKind, ExamIntake, ExamRecord, PipelineError,
    Placeholder, RecordId, RiskLabel, SimilarRecord, SimilarityScope, SummaryResult, TaskProfile,
    TextGenerator, Trend,
};
use exam_rag_store_sqlite::{SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};

mod config;
mod templates;

pub use config::{AppConfig, RetrievalSettings, RetrievalStrategy};
pub use templates::{
    load_template, required_placeholders, DirectoryTemplateStore, InMemoryTemplateStore,
    TemplateStore,
};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

/// Prior records selected for one evaluation, with the derived trend and rendered prompt block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoricalContext {
    pub record_id: RecordId,
    pub strategy: RetrievalStrategy,
    pub records: Vec<ExamRecord>,
    pub trend: Trend,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassificationOutcome {
    pub record_id: RecordId,
    pub classification: ClassificationResult,
    pub strategy: RetrievalStrategy,
    pub history_count: usize,
    pub trend: Trend,
    pub stage: ClassificationStage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryOutcome {
    pub record_id: RecordId,
    pub risk_label: RiskLabel,
    pub summary: SummaryResult,
}

/// Notification text for the contractor. Drafts are returned, never sent or stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationDraft {
    pub record_id: RecordId,
    pub risk_label: RiskLabel,
    pub tone: String,
    pub draft: SummaryResult,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Created,
    Updated,
    /// Stored vector already matches the record content; no model call was made.
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingOutcome {
    pub record_id: RecordId,
    pub status: EmbeddingStatus,
    pub dimensions: usize,
    pub content_hash: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    ClassifyUnscored,
    SummarizePending,
    EmbedMissing,
}

impl BatchOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClassifyUnscored => "classify_unscored",
            Self::SummarizePending => "summarize_pending",
            Self::EmbedMissing => "embed_missing",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    /// Last classification stage reached before the failure, for classification batches.
    pub stage: Option<ClassificationStage>,
}

impl ErrorReport {
    fn new(error: &PipelineError, stage: Option<ClassificationStage>) -> Self {
        Self { kind: error.kind(), message: error.message().to_string(), stage }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchItem {
    pub record_id: RecordId,
    pub status: BatchItemStatus,
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchOutcome {
    pub batch_id: String,
    pub operation: BatchOperation,
    pub processed_count: usize,
    pub failed_count: usize,
    pub total_count: usize,
    pub items: Vec<BatchItem>,
}

impl BatchOutcome {
    fn start(operation: BatchOperation, total_count: usize) -> Self {
        Self {
            batch_id: ulid::Ulid::new().to_string(),
            operation,
            processed_count: 0,
            failed_count: 0,
            total_count,
            items: Vec::with_capacity(total_count),
        }
    }

    fn succeeded(&mut self, record_id: RecordId) {
        self.processed_count += 1;
        self.items.push(BatchItem { record_id, status: BatchItemStatus::Succeeded, error: None });
    }

    fn failed(&mut self, record_id: RecordId, report: ErrorReport) {
        tracing::warn!(
            batch_id = %self.batch_id,
            operation = self.operation.as_str(),
            %record_id,
            kind = report.kind.as_str(),
            error = %report.message,
            "batch item failed"
        );
        self.failed_count += 1;
        self.items.push(BatchItem {
            record_id,
            status: BatchItemStatus::Failed,
            error: Some(report),
        });
    }

    fn finish(self) -> Self {
        tracing::info!(
            batch_id = %self.batch_id,
            operation = self.operation.as_str(),
            processed = self.processed_count,
            failed = self.failed_count,
            total = self.total_count,
            "batch finished"
        );
        self
    }
}

/// Classification failure tagged with the last stage the record reached.
struct StageFailure {
    stage: ClassificationStage,
    error: PipelineError,
}

fn at(stage: ClassificationStage) -> impl FnOnce(PipelineError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

/// Pipeline facade. Every operation opens its own store connection on `db_path`.
#[derive(Clone)]
pub struct ExamRagApi {
    db_path: PathBuf,
    generator: Option<Arc<dyn TextGenerator>>,
    embedder: Option<Arc<dyn Embedder>>,
    templates: Arc<dyn TemplateStore>,
    settings: RetrievalSettings,
}

impl std::fmt::Debug for ExamRagApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExamRagApi")
            .field("db_path", &self.db_path)
            .field("generator", &self.generator.is_some())
            .field("embedder", &self.embedder.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ExamRagApi {
    /// Store-only facade with the built-in templates and default retrieval settings.
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            generator: None,
            embedder: None,
            templates: Arc::new(InMemoryTemplateStore::builtin()),
            settings: RetrievalSettings::default(),
        }
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    #[must_use]
    pub fn with_templates(mut self, templates: Arc<dyn TemplateStore>) -> Self {
        self.templates = templates;
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: RetrievalSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn settings(&self) -> RetrievalSettings {
        self.settings
    }

    fn open_raw_store(&self) -> Result<SqliteStore, PipelineError> {
        SqliteStore::open(&self.db_path).map_err(PipelineError::storage)
    }

    fn open_store(&self) -> Result<SqliteStore, PipelineError> {
        let mut store = self.open_raw_store()?;
        store.migrate().map_err(PipelineError::storage)?;
        Ok(store)
    }

    fn generator(&self) -> Result<&dyn TextGenerator, PipelineError> {
        self.generator.as_deref().ok_or_else(|| {
            PipelineError::Configuration("no generation endpoint is configured".to_string())
        })
    }

    fn embedder(&self) -> Result<&dyn Embedder, PipelineError> {
        self.embedder.as_deref().ok_or_else(|| {
            PipelineError::Configuration("no embedding endpoint is configured".to_string())
        })
    }

    /// # Errors
    /// Returns `PipelineError::Storage` when schema metadata cannot be read.
    pub fn schema_status(&self) -> Result<SchemaStatus, PipelineError> {
        self.open_raw_store()?.schema_status().map_err(PipelineError::storage)
    }

    /// Report (when `dry_run`) or apply pending schema migrations.
    ///
    /// # Errors
    /// Returns `PipelineError::Storage` when inspection or migration fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult, PipelineError> {
        let mut store = self.open_raw_store()?;
        let before = store.schema_status().map_err(PipelineError::storage)?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate().map_err(PipelineError::storage)?;
        let after = store.schema_status().map_err(PipelineError::storage)?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Register a new unscored exam record.
    ///
    /// # Errors
    /// Returns `PipelineError::Validation` for an invalid intake and `PipelineError::Storage`
    /// when persistence fails.
    pub fn add_record(&self, intake: &ExamIntake) -> Result<ExamRecord, PipelineError> {
        intake.validate()?;
        let mut store = self.open_store()?;
        let record = store.insert_record(intake).map_err(PipelineError::storage)?;
        tracing::info!(
            record_id = %record.record_id,
            subject_id = %record.subject.subject_id,
            "exam record added"
        );
        Ok(record)
    }

    /// # Errors
    /// Returns `PipelineError::NotFound` when the record does not exist.
    pub fn get_record(&self, record_id: RecordId) -> Result<ExamRecord, PipelineError> {
        load_record(&self.open_store()?, record_id)
    }

    /// Retrieve and render the history that would accompany an evaluation of `record_id`.
    ///
    /// # Errors
    /// Returns `PipelineError::NotFound` for an unknown record, `PipelineError::Storage` on store
    /// failures, and embedding errors when the similarity strategy is configured.
    pub fn historical_context(
        &self,
        record_id: RecordId,
        limit: Option<usize>,
    ) -> Result<HistoricalContext, PipelineError> {
        let mut store = self.open_store()?;
        let record = load_record(&store, record_id)?;
        self.build_context(&mut store, &record, limit)
    }

    /// Classify one record with historical context and persist the validated result.
    ///
    /// Records that already carry a label are re-classified.
    ///
    /// # Errors
    /// Returns the category of the first failing step; nothing is written unless the model output
    /// validated.
    pub fn classify_record(
        &self,
        record_id: RecordId,
    ) -> Result<ClassificationOutcome, PipelineError> {
        let mut store = self.open_store()?;
        self.classify_in_store(&mut store, record_id).map_err(|failure| failure.error)
    }

    /// Produce and persist the executive summary of a classified record.
    ///
    /// # Errors
    /// Returns `PipelineError::Validation` when the record has not been classified yet or the
    /// model output is empty.
    pub fn summarize_record(&self, record_id: RecordId) -> Result<SummaryOutcome, PipelineError> {
        let mut store = self.open_store()?;
        self.summarize_in_store(&mut store, record_id)
    }

    /// Draft the contractor notification for a classified and summarized record.
    ///
    /// # Errors
    /// Returns `PipelineError::Validation` when the record lacks a label or summary.
    pub fn draft_notification(
        &self,
        record_id: RecordId,
    ) -> Result<NotificationDraft, PipelineError> {
        let store = self.open_store()?;
        let record = load_record(&store, record_id)?;
        let label = record.risk_label.ok_or_else(|| {
            PipelineError::Validation(format!(
                "record {record_id} must be classified before a notification can be drafted"
            ))
        })?;
        let summary = record.summary.as_deref().ok_or_else(|| {
            PipelineError::Validation(format!(
                "record {record_id} must be summarized before a notification can be drafted"
            ))
        })?;

        let profile = TaskProfile::Notification;
        let template = load_template(self.templates.as_ref(), profile)?;
        let generator = self.generator()?;
        let tone = tone_guidance(label);
        let current = format_current_record(&record);
        let prompt = template.render(&[
            (Placeholder::CurrentRecord, current.as_str()),
            (Placeholder::RiskLabel, label.as_str()),
            (Placeholder::Summary, summary),
            (Placeholder::ToneGuidance, tone),
        ]);

        let raw = generator.generate(&prompt, profile.decoding())?;
        let draft = validate_free_text(&raw, free_text_budget(profile))?;
        tracing::info!(
            %record_id,
            risk_label = label.as_str(),
            words = draft.word_count,
            "notification drafted"
        );
        Ok(NotificationDraft { record_id, risk_label: label, tone: tone.to_string(), draft })
    }

    /// Compute and store the embedding of one record, skipping the model call when the stored
    /// vector was computed from identical content.
    ///
    /// # Errors
    /// Returns `PipelineError::Configuration` without an embedding endpoint and
    /// `PipelineError::Inference` when the model call fails.
    pub fn embed_record(&self, record_id: RecordId) -> Result<EmbeddingOutcome, PipelineError> {
        let mut store = self.open_store()?;
        let record = load_record(&store, record_id)?;
        self.ensure_embedding(&mut store, &record).map(|(outcome, _)| outcome)
    }

    /// Nearest records to `record_id` by embedding distance.
    ///
    /// `scope` and `limit` default to the configured retrieval settings.
    ///
    /// # Errors
    /// Returns `PipelineError::NotFound` for an unknown record and embedding errors when the
    /// query vector has to be computed.
    pub fn similar_records(
        &self,
        record_id: RecordId,
        scope: Option<SimilarityScope>,
        limit: Option<usize>,
    ) -> Result<Vec<SimilarRecord>, PipelineError> {
        let mut store = self.open_store()?;
        let record = load_record(&store, record_id)?;
        self.nearest(
            &mut store,
            &record,
            scope.unwrap_or(self.settings.scope),
            limit.unwrap_or(self.settings.similar_limit),
        )
    }

    /// Classify every unscored record (oldest exam first), isolating per-record failures.
    ///
    /// # Errors
    /// Returns an error only when the batch cannot start: store failure or missing generator.
    pub fn classify_unscored(&self, limit: usize) -> Result<BatchOutcome, PipelineError> {
        self.generator()?;
        let mut store = self.open_store()?;
        let ids = store.unscored_record_ids(limit).map_err(PipelineError::storage)?;
        let mut outcome = BatchOutcome::start(BatchOperation::ClassifyUnscored, ids.len());
        tracing::info!(
            batch_id = %outcome.batch_id,
            total = ids.len(),
            "classifying unscored records"
        );

        for record_id in ids {
            match self.classify_in_store(&mut store, record_id) {
                Ok(_) => outcome.succeeded(record_id),
                Err(failure) => outcome
                    .failed(record_id, ErrorReport::new(&failure.error, Some(failure.stage))),
            }
        }
        Ok(outcome.finish())
    }

    /// Summarize every classified record that has no summary yet.
    ///
    /// # Errors
    /// Returns an error only when the batch cannot start.
    pub fn summarize_pending(&self, limit: usize) -> Result<BatchOutcome, PipelineError> {
        self.generator()?;
        let mut store = self.open_store()?;
        let ids = store.unsummarized_record_ids(limit).map_err(PipelineError::storage)?;
        let mut outcome = BatchOutcome::start(BatchOperation::SummarizePending, ids.len());
        tracing::info!(
            batch_id = %outcome.batch_id,
            total = ids.len(),
            "summarizing classified records"
        );

        for record_id in ids {
            match self.summarize_in_store(&mut store, record_id) {
                Ok(_) => outcome.succeeded(record_id),
                Err(error) => outcome.failed(record_id, ErrorReport::new(&error, None)),
            }
        }
        Ok(outcome.finish())
    }

    /// Embed records that have no stored vector or whose content changed since it was computed.
    ///
    /// # Errors
    /// Returns an error only when the batch cannot start.
    pub fn embed_missing(&self, limit: usize) -> Result<BatchOutcome, PipelineError> {
        self.embedder()?;
        let mut store = self.open_store()?;
        let pending = store
            .records_with_embedding_hash()
            .map_err(PipelineError::storage)?
            .into_iter()
            .filter(|(record, stored_hash)| {
                stored_hash.as_deref() != Some(content_hash(&embedding_text(record)).as_str())
            })
            .map(|(record, _)| record)
            .take(limit)
            .collect::<Vec<_>>();
        let mut outcome = BatchOutcome::start(BatchOperation::EmbedMissing, pending.len());
        tracing::info!(
            batch_id = %outcome.batch_id,
            total = pending.len(),
            "embedding stale records"
        );

        for record in pending {
            match self.ensure_embedding(&mut store, &record) {
                Ok(_) => outcome.succeeded(record.record_id),
                Err(error) => outcome.failed(record.record_id, ErrorReport::new(&error, None)),
            }
        }
        Ok(outcome.finish())
    }

    fn classify_in_store(
        &self,
        store: &mut SqliteStore,
        record_id: RecordId,
    ) -> Result<ClassificationOutcome, StageFailure> {
        use ClassificationStage::{ContextBuilt, Parsed, Scored, Unscored};

        let record = load_record(store, record_id).map_err(at(Unscored))?;
        if record.is_scored() {
            tracing::info!(
                %record_id,
                previous = record.risk_label.map_or("", RiskLabel::as_str),
                "re-classifying scored record"
            );
        }
        let profile = TaskProfile::Classification;
        let template = load_template(self.templates.as_ref(), profile).map_err(at(Unscored))?;
        let generator = self.generator().map_err(at(Unscored))?;

        let context = self.build_context(store, &record, None).map_err(at(Unscored))?;
        let current = format_current_record(&record);
        let prompt = template.render(&[
            (Placeholder::HistoricalContext, context.text.as_str()),
            (Placeholder::CurrentRecord, current.as_str()),
        ]);
        tracing::info!(
            %record_id,
            stage = ContextBuilt.as_str(),
            strategy = context.strategy.as_str(),
            history = context.records.len(),
            trend = context.trend.as_str(),
            "classification context built"
        );

        let raw = generator.generate(&prompt, profile.decoding()).map_err(at(ContextBuilt))?;
        tracing::debug!(%record_id, preview = %preview(&raw), "classification output received");
        let classification = validate_classification(&raw).map_err(at(Parsed))?;

        store
            .save_classification(record_id, &classification)
            .map_err(PipelineError::storage)
            .map_err(at(Parsed))?;
        tracing::info!(
            %record_id,
            stage = Scored.as_str(),
            risk_label = classification.risk_label.as_str(),
            "record classified"
        );

        Ok(ClassificationOutcome {
            record_id,
            classification,
            strategy: context.strategy,
            history_count: context.records.len(),
            trend: context.trend,
            stage: Scored,
        })
    }

    fn summarize_in_store(
        &self,
        store: &mut SqliteStore,
        record_id: RecordId,
    ) -> Result<SummaryOutcome, PipelineError> {
        let record = load_record(store, record_id)?;
        let label = record.risk_label.ok_or_else(|| {
            PipelineError::Validation(format!(
                "record {record_id} must be classified before it can be summarized"
            ))
        })?;

        let profile = TaskProfile::Summary;
        let template = load_template(self.templates.as_ref(), profile)?;
        let generator = self.generator()?;
        let context = self.build_context(store, &record, None)?;
        let current = format_current_record(&record);
        let prompt = template.render(&[
            (Placeholder::HistoricalContext, context.text.as_str()),
            (Placeholder::CurrentRecord, current.as_str()),
            (Placeholder::RiskLabel, label.as_str()),
        ]);

        let raw = generator.generate(&prompt, profile.decoding())?;
        let summary = validate_free_text(&raw, free_text_budget(profile))?;
        store.save_summary(record_id, &summary.text).map_err(PipelineError::storage)?;
        tracing::info!(
            %record_id,
            words = summary.word_count,
            truncated = summary.truncated,
            "record summarized"
        );

        Ok(SummaryOutcome { record_id, risk_label: label, summary })
    }

    fn build_context(
        &self,
        store: &mut SqliteStore,
        record: &ExamRecord,
        limit: Option<usize>,
    ) -> Result<HistoricalContext, PipelineError> {
        let strategy = self.settings.strategy;
        let records = match strategy {
            RetrievalStrategy::Temporal => store
                .labeled_history(
                    record.subject.subject_id,
                    record.record_id,
                    limit.unwrap_or(self.settings.history_limit),
                )
                .map_err(PipelineError::storage)?,
            RetrievalStrategy::Similarity => self
                .nearest(
                    store,
                    record,
                    self.settings.scope,
                    limit.unwrap_or(self.settings.similar_limit),
                )?
                .into_iter()
                .map(|similar| similar.record)
                .collect(),
        };
        let trend = analyze_subject_trend(&records, record.subject.subject_id);
        let text = format_history(&records, trend);
        Ok(HistoricalContext { record_id: record.record_id, strategy, records, trend, text })
    }

    fn nearest(
        &self,
        store: &mut SqliteStore,
        record: &ExamRecord,
        scope: SimilarityScope,
        limit: usize,
    ) -> Result<Vec<SimilarRecord>, PipelineError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let (_, query) = self.ensure_embedding(store, record)?;
        let subject = match scope {
            SimilarityScope::Subject => Some(record.subject.subject_id),
            SimilarityScope::Global => None,
        };
        let hits = store
            .nearest_records(&query, subject, record.record_id, limit)
            .map_err(PipelineError::storage)?;

        let mut similar = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(neighbor) = store.get_record(hit.record_id).map_err(PipelineError::storage)?
            else {
                continue;
            };
            similar.push(SimilarRecord {
                record: neighbor,
                distance: hit.distance,
                similarity: 1.0 - hit.distance,
            });
        }
        Ok(similar)
    }

    fn ensure_embedding(
        &self,
        store: &mut SqliteStore,
        record: &ExamRecord,
    ) -> Result<(EmbeddingOutcome, Embedding), PipelineError> {
        let embedder = self.embedder()?;
        let text = embedding_text(record);
        let hash = content_hash(&text);
        let record_id = record.record_id;

        if let Some(stored) = store.get_embedding(record_id).map_err(PipelineError::storage)? {
            if stored.content_hash == hash && stored.embedding.dimensions() == embedder.dimensions()
            {
                tracing::debug!(%record_id, "embedding unchanged");
                let outcome = EmbeddingOutcome {
                    record_id,
                    status: EmbeddingStatus::Unchanged,
                    dimensions: stored.embedding.dimensions(),
                    content_hash: hash,
                };
                return Ok((outcome, stored.embedding));
            }
        }

        let embedding = embedder.embed(&text)?;
        if embedding.dimensions() != embedder.dimensions() {
            return Err(PipelineError::Inference(format!(
                "embedding model returned {} dimensions, expected {}",
                embedding.dimensions(),
                embedder.dimensions()
            )));
        }
        let upsert = store
            .upsert_embedding(record_id, &embedding, &hash)
            .map_err(PipelineError::storage)?;
        let status =
            if upsert.was_update { EmbeddingStatus::Updated } else { EmbeddingStatus::Created };
        tracing::info!(%record_id, dimensions = upsert.dimensions, ?status, "embedding stored");

        let outcome = EmbeddingOutcome {
            record_id,
            status,
            dimensions: upsert.dimensions,
            content_hash: hash,
        };
        Ok((outcome, embedding))
    }
}

fn load_record(store: &SqliteStore, record_id: RecordId) -> Result<ExamRecord, PipelineError> {
    store
        .get_record(record_id)
        .map_err(PipelineError::storage)?
        .ok_or_else(|| PipelineError::NotFound(format!("exam record {record_id}")))
}

fn free_text_budget(profile: TaskProfile) -> usize {
    profile.word_budget().unwrap_or(usize::MAX)
}

fn preview(raw: &str) -> String {
    raw.chars().take(120).collect()
}
