use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::context::body_mass_index;
use crate::{ExamRecord, PipelineError};

/// Non-empty vector of finite components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// # Errors
    /// Returns `PipelineError::Validation` when the vector is empty or has a non-finite component.
    pub fn new(values: Vec<f32>) -> Result<Self, PipelineError> {
        if values.is_empty() {
            return Err(PipelineError::Validation("embedding vector is empty".to_string()));
        }
        if let Some(index) = values.iter().position(|value| !value.is_finite()) {
            return Err(PipelineError::Validation(format!(
                "embedding component {index} is not finite"
            )));
        }
        Ok(Self(values))
    }

    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.0
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    /// Cosine distance in `[0, 2]`; `None` when dimensions differ or either vector has zero norm.
    #[must_use]
    pub fn cosine_distance(&self, other: &Self) -> Option<f64> {
        cosine_similarity(&self.0, &other.0).map(|similarity| 1.0 - similarity)
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = PipelineError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.0
    }
}

#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (left, right) in a.iter().zip(b) {
        let left = f64::from(*left);
        let right = f64::from(*right);
        dot += left * right;
        norm_a += left * left;
        norm_b += right * right;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// Representative text of a record used as embedding input.
#[must_use]
pub fn embedding_text(record: &ExamRecord) -> String {
    let measurements = &record.measurements;
    let mut parts = vec![
        format!("Worker: {}", record.subject.name),
        format!("Exam type: {}", record.exam_type),
        format!("Exam date: {}", record.exam_date),
    ];

    if let Some(pressure) = present(measurements.blood_pressure.as_deref()) {
        parts.push(format!("Blood pressure: {pressure} mmHg"));
    }
    if let Some(weight) = measurements.weight_kg.filter(|value| *value > 0.0) {
        parts.push(format!("Weight: {weight} kg"));
    }
    if let Some(height) = measurements.height_m.filter(|value| *value > 0.0) {
        parts.push(format!("Height: {height} m"));
    }
    if let Some(bmi) = body_mass_index(measurements) {
        parts.push(format!("BMI: {bmi:.1}"));
    }
    if let Some(vision) = present(measurements.vision.as_deref()) {
        parts.push(format!("Vision: {vision}"));
    }
    if let Some(audiometry) = present(measurements.audiometry.as_deref()) {
        parts.push(format!("Audiometry: {audiometry}"));
    }
    if let Some(observations) = present(record.observations.as_deref()) {
        parts.push(format!("Observations: {observations}"));
    }
    if let Some(label) = record.risk_label {
        parts.push(format!("Risk level: {label}"));
        if let Some(justification) = present(record.risk_justification.as_deref()) {
            parts.push(format!("Risk justification: {justification}"));
        }
    }
    if let Some(summary) = present(record.summary.as_deref()) {
        parts.push(format!("Executive summary: {summary}"));
    }

    parts.join("\n")
}

#[must_use]
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("sha256:{digest:x}")
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::record;
    use crate::RiskLabel;

    // Test IDs: TEMB-001
    #[test]
    fn embedding_rejects_empty_and_non_finite_vectors() {
        assert!(matches!(Embedding::new(Vec::new()), Err(PipelineError::Validation(_))));
        assert!(matches!(
            Embedding::new(vec![0.1, f32::NAN]),
            Err(PipelineError::Validation(_))
        ));
        assert!(Embedding::new(vec![0.1, 0.2]).is_ok());
    }

    // Test IDs: TEMB-002
    #[test]
    fn cosine_distance_orders_closer_vectors_first() -> Result<(), PipelineError> {
        let query = Embedding::new(vec![1.0, 0.0, 0.0])?;
        let same = Embedding::new(vec![2.0, 0.0, 0.0])?;
        let orthogonal = Embedding::new(vec![0.0, 1.0, 0.0])?;
        let opposite = Embedding::new(vec![-1.0, 0.0, 0.0])?;

        let close = query.cosine_distance(&same).unwrap_or(f64::NAN);
        let mid = query.cosine_distance(&orthogonal).unwrap_or(f64::NAN);
        let far = query.cosine_distance(&opposite).unwrap_or(f64::NAN);
        assert!(close.abs() < 1e-9);
        assert!((mid - 1.0).abs() < 1e-9);
        assert!((far - 2.0).abs() < 1e-9);
        Ok(())
    }

    // Test IDs: TEMB-003
    #[test]
    fn cosine_similarity_is_undefined_for_mismatch_or_zero_norm() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
    }

    // Test IDs: TEMB-004
    #[test]
    fn embedding_text_includes_present_fields_only() {
        let mut scored = record(4, "2024-04-04", Some(RiskLabel::Medium));
        scored.summary = Some("Follow-up recommended".to_string());
        scored.measurements.audiometry = None;
        let text = embedding_text(&scored);

        assert!(text.contains("Worker: Ana Torres"));
        assert!(text.contains("BMI: 23.7"));
        assert!(text.contains("Risk level: MEDIUM"));
        assert!(text.contains("Executive summary: Follow-up recommended"));
        assert!(!text.contains("Audiometry"));
    }

    // Test IDs: TEMB-005
    #[test]
    fn content_hash_changes_with_source_text() {
        let unscored = record(4, "2024-04-04", None);
        let mut scored = unscored.clone();
        scored.risk_label = Some(RiskLabel::High);

        let before = content_hash(&embedding_text(&unscored));
        let after = content_hash(&embedding_text(&scored));
        assert!(before.starts_with("sha256:"));
        assert_eq!(before.len(), "sha256:".len() + 64);
        assert_ne!(before, after);
        assert_eq!(before, content_hash(&embedding_text(&unscored)));
    }
}
