use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::Date;

mod context;
mod embedding;
mod prompt;
mod trend;
mod validate;

pub use context::{
    body_mass_index, excerpt, format_current_record, format_history, NO_HISTORY_SENTINEL,
    OBSERVATION_EXCERPT_CHARS, TRUNCATION_MARKER,
};
pub use embedding::{content_hash, cosine_similarity, embedding_text, Embedding};
pub use prompt::{tone_guidance, Placeholder, PromptTemplate};
pub use trend::{analyze_subject_trend, analyze_trend, Trend};
pub use validate::{
    strip_code_fence, truncate_words, validate_classification, validate_free_text,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PipelineError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("inference error: {0}")]
    Inference(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Inference(_) => ErrorKind::Inference,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(message)
            | Self::Storage(message)
            | Self::Inference(message)
            | Self::Validation(message)
            | Self::Configuration(message) => message,
        }
    }

    /// Wrap an infrastructure failure (typically an `anyhow::Error` chain) as a storage error.
    pub fn storage(err: impl Display) -> Self {
        Self::Storage(format!("{err:#}"))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Storage,
    Inference,
    Validation,
    Configuration,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Storage => "storage",
            Self::Inference => "inference",
            Self::Validation => "validation",
            Self::Configuration => "configuration",
        }
    }

    /// Boundary-facing status label for this category.
    #[must_use]
    pub fn status_label(self) -> &'static str {
        match self {
            Self::NotFound => "missing",
            Self::Storage => "storage failure",
            Self::Inference => "upstream failure",
            Self::Validation => "bad output",
            Self::Configuration => "misconfigured",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubjectId(pub i64);

impl Display for SubjectId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordId(pub i64);

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordinal risk category. Ordering is `Low < Medium < High`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLabel {
    Low,
    Medium,
    High,
}

impl RiskLabel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    /// Case-insensitive parse that also accepts the legacy `BAJO`/`MEDIO`/`ALTO` vocabulary.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "LOW" | "BAJO" => Some(Self::Low),
            "MEDIUM" | "MEDIO" => Some(Self::Medium),
            "HIGH" | "ALTO" => Some(Self::High),
            _ => None,
        }
    }
}

impl Display for RiskLabel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subject {
    pub subject_id: SubjectId,
    pub name: String,
    pub document: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClinicalMeasurements {
    pub blood_pressure: Option<String>,
    pub weight_kg: Option<f64>,
    pub height_m: Option<f64>,
    pub vision: Option<String>,
    pub audiometry: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExamRecord {
    pub record_id: RecordId,
    pub subject: Subject,
    pub exam_type: String,
    #[serde(with = "exam_date")]
    pub exam_date: Date,
    pub measurements: ClinicalMeasurements,
    pub observations: Option<String>,
    pub risk_label: Option<RiskLabel>,
    pub risk_justification: Option<String>,
    pub summary: Option<String>,
}

impl ExamRecord {
    #[must_use]
    pub fn is_scored(&self) -> bool {
        self.risk_label.is_some()
    }
}

/// Payload used to register a new, unscored exam record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExamIntake {
    pub subject_name: String,
    pub subject_document: String,
    pub exam_type: String,
    #[serde(with = "exam_date")]
    pub exam_date: Date,
    #[serde(default)]
    pub measurements: ClinicalMeasurements,
    #[serde(default)]
    pub observations: Option<String>,
}

impl ExamIntake {
    /// # Errors
    /// Returns `PipelineError::Validation` when identity fields are blank or measurements are not
    /// finite non-negative numbers.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (field, value) in [
            ("subject_name", &self.subject_name),
            ("subject_document", &self.subject_document),
            ("exam_type", &self.exam_type),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::Validation(format!("{field} must not be empty")));
            }
        }

        for (field, value) in
            [("weight_kg", self.measurements.weight_kg), ("height_m", self.measurements.height_m)]
        {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(PipelineError::Validation(format!(
                        "{field} must be a finite non-negative number, got {value}"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassificationResult {
    pub risk_label: RiskLabel,
    pub justification: String,
}

/// Validated free-text model output bounded to a word budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryResult {
    pub text: String,
    pub word_count: usize,
    pub truncated: bool,
}

/// Candidate pool for similarity retrieval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityScope {
    /// Only records belonging to the same subject.
    #[default]
    Subject,
    Global,
}

impl SimilarityScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Global => "global",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarRecord {
    pub record: ExamRecord,
    pub distance: f64,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DecodingConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Generation task. Each task carries its own decoding policy and output budget.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskProfile {
    Classification,
    Summary,
    Notification,
}

impl TaskProfile {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::Summary => "summary",
            Self::Notification => "notification",
        }
    }

    #[must_use]
    pub fn decoding(self) -> DecodingConfig {
        match self {
            Self::Classification => DecodingConfig { temperature: 0.1, max_output_tokens: 1000 },
            Self::Summary => DecodingConfig { temperature: 0.5, max_output_tokens: 300 },
            Self::Notification => DecodingConfig { temperature: 0.7, max_output_tokens: 800 },
        }
    }

    /// Maximum number of words kept from free-text output. Classification output is structured.
    #[must_use]
    pub fn word_budget(self) -> Option<usize> {
        match self {
            Self::Classification => None,
            Self::Summary => Some(150),
            Self::Notification => Some(300),
        }
    }

    #[must_use]
    pub fn template_key(self) -> &'static str {
        self.as_str()
    }
}

/// Classification lifecycle of one record. `Scored` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStage {
    Unscored,
    ContextBuilt,
    Parsed,
    Scored,
}

impl ClassificationStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unscored => "unscored",
            Self::ContextBuilt => "context_built",
            Self::Parsed => "parsed",
            Self::Scored => "scored",
        }
    }
}

/// Model client that turns a prompt into raw text under a decoding configuration.
pub trait TextGenerator: Send + Sync {
    /// # Errors
    /// Returns `PipelineError::Inference` on transport failure, an unexpected response shape, or
    /// empty generated content.
    fn generate(&self, prompt: &str, config: DecodingConfig) -> Result<String, PipelineError>;
}

/// Model client that maps text to a fixed-dimension vector.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;

    /// # Errors
    /// Returns `PipelineError::Inference` when the model call fails or yields an empty or
    /// malformed vector.
    fn embed(&self, text: &str) -> Result<Embedding, PipelineError>;
}

/// Parse a `YYYY-MM-DD` exam date.
///
/// # Errors
/// Returns `PipelineError::Validation` when the input is not a calendar date.
pub fn parse_exam_date(raw: &str) -> Result<Date, PipelineError> {
    Date::parse(raw.trim(), time::macros::format_description!("[year]-[month]-[day]"))
        .map_err(|err| PipelineError::Validation(format!("invalid exam date `{raw}`: {err}")))
}

/// Serde adapter storing exam dates as `YYYY-MM-DD` strings.
pub mod exam_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    /// # Errors
    /// Propagates serializer failures.
    pub fn serialize<S>(date: &Date, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(date)
    }

    /// # Errors
    /// Returns a deserialization error when the value is not a `YYYY-MM-DD` string.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Date, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_exam_date(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn date(raw: &str) -> Date {
        match parse_exam_date(raw) {
            Ok(date) => date,
            Err(err) => panic!("invalid fixture date {raw}: {err}"),
        }
    }

    pub fn subject() -> Subject {
        Subject {
            subject_id: SubjectId(7),
            name: "Ana Torres".to_string(),
            document: "CC-1020".to_string(),
        }
    }

    pub fn record(record_id: i64, exam_date: &str, label: Option<RiskLabel>) -> ExamRecord {
        ExamRecord {
            record_id: RecordId(record_id),
            subject: subject(),
            exam_type: "periodic".to_string(),
            exam_date: date(exam_date),
            measurements: ClinicalMeasurements {
                blood_pressure: Some("120/80".to_string()),
                weight_kg: Some(72.5),
                height_m: Some(1.75),
                vision: Some("20/20".to_string()),
                audiometry: Some("normal".to_string()),
            },
            observations: Some("No relevant findings".to_string()),
            risk_label: label,
            risk_justification: label.map(|label| format!("fixture {label}")),
            summary: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test IDs: TLBL-001
    #[test]
    fn risk_label_parse_accepts_case_and_legacy_aliases() {
        assert_eq!(RiskLabel::parse("high"), Some(RiskLabel::High));
        assert_eq!(RiskLabel::parse(" alto "), Some(RiskLabel::High));
        assert_eq!(RiskLabel::parse("Medio"), Some(RiskLabel::Medium));
        assert_eq!(RiskLabel::parse("BAJO"), Some(RiskLabel::Low));
        assert_eq!(RiskLabel::parse("CRITICAL"), None);
        assert_eq!(RiskLabel::parse(""), None);
    }

    // Test IDs: TLBL-002
    #[test]
    fn risk_label_ordering_matches_severity() {
        assert!(RiskLabel::Low < RiskLabel::Medium);
        assert!(RiskLabel::Medium < RiskLabel::High);
    }

    // Test IDs: TLBL-003
    #[test]
    fn record_is_scored_only_once_labeled() {
        assert!(!fixtures::record(1, "2024-01-01", None).is_scored());
        assert!(fixtures::record(2, "2024-01-01", Some(RiskLabel::Medium)).is_scored());
    }

    // Test IDs: TPRF-001
    #[test]
    fn task_profiles_carry_distinct_decoding_policies() {
        let classification = TaskProfile::Classification.decoding();
        let summary = TaskProfile::Summary.decoding();
        let notification = TaskProfile::Notification.decoding();

        assert!((classification.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(classification.max_output_tokens, 1000);
        assert!((summary.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(summary.max_output_tokens, 300);
        assert!((notification.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(notification.max_output_tokens, 800);
        assert!(classification.temperature < summary.temperature);
        assert_eq!(TaskProfile::Summary.word_budget(), Some(150));
        assert_eq!(TaskProfile::Classification.word_budget(), None);
    }

    // Test IDs: TERR-001
    #[test]
    fn error_kinds_are_distinguishable() {
        let errors = [
            PipelineError::NotFound("record 1".to_string()),
            PipelineError::Storage("disk".to_string()),
            PipelineError::Inference("timeout".to_string()),
            PipelineError::Validation("bad json".to_string()),
            PipelineError::Configuration("template".to_string()),
        ];
        let kinds = errors.iter().map(PipelineError::kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::NotFound,
                ErrorKind::Storage,
                ErrorKind::Inference,
                ErrorKind::Validation,
                ErrorKind::Configuration,
            ]
        );
        assert_eq!(errors[3].message(), "bad json");
        assert_eq!(ErrorKind::Inference.status_label(), "upstream failure");
    }

    // Test IDs: TINT-001
    #[test]
    fn intake_validation_rejects_blank_identity_and_bad_measurements() {
        let mut intake = ExamIntake {
            subject_name: "Ana Torres".to_string(),
            subject_document: "CC-1020".to_string(),
            exam_type: "periodic".to_string(),
            exam_date: fixtures::date("2024-05-02"),
            measurements: ClinicalMeasurements::default(),
            observations: None,
        };
        assert!(intake.validate().is_ok());

        intake.subject_document = "  ".to_string();
        assert!(matches!(intake.validate(), Err(PipelineError::Validation(_))));

        intake.subject_document = "CC-1020".to_string();
        intake.measurements.weight_kg = Some(f64::NAN);
        assert!(matches!(intake.validate(), Err(PipelineError::Validation(_))));
    }

    // Test IDs: TINT-002
    #[test]
    fn exam_dates_serialize_as_calendar_strings() -> Result<(), serde_json::Error> {
        let record = fixtures::record(1, "2023-11-09", Some(RiskLabel::Medium));
        let value = serde_json::to_value(&record)?;
        assert_eq!(value.get("exam_date").and_then(serde_json::Value::as_str), Some("2023-11-09"));
        assert_eq!(value.get("risk_label").and_then(serde_json::Value::as_str), Some("MEDIUM"));

        let decoded: ExamRecord = serde_json::from_value(value)?;
        assert_eq!(decoded, record);
        Ok(())
    }
}
