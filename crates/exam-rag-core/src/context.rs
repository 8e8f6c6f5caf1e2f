use std::fmt::Write as _;

use crate::trend::Trend;
use crate::{ClinicalMeasurements, ExamRecord};

pub const NO_HISTORY_SENTINEL: &str = "No previous exams are on record for this worker.";
pub const OBSERVATION_EXCERPT_CHARS: usize = 200;
pub const TRUNCATION_MARKER: &str = "...";

const NOT_AVAILABLE: &str = "N/A";

/// Body-mass index rounded to one decimal, or `None` when either input is missing or not positive.
#[must_use]
pub fn body_mass_index(measurements: &ClinicalMeasurements) -> Option<f64> {
    let weight = measurements.weight_kg?;
    let height = measurements.height_m?;
    if !weight.is_finite() || !height.is_finite() || weight <= 0.0 || height <= 0.0 {
        return None;
    }
    let bmi = weight / (height * height);
    Some((bmi * 10.0).round() / 10.0)
}

/// First `max_chars` characters of `text`, followed by the truncation marker only when cut.
#[must_use]
pub fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Render prior records as the historical-context block of a prompt.
///
/// Never returns an empty string: an empty history renders [`NO_HISTORY_SENTINEL`].
#[must_use]
pub fn format_history(history: &[ExamRecord], trend: Trend) -> String {
    if history.is_empty() {
        return NO_HISTORY_SENTINEL.to_string();
    }

    let mut out = String::from("WORKER HISTORY:\n");
    for (index, record) in history.iter().enumerate() {
        let measurements = &record.measurements;
        let _ = writeln!(out, "\n[Exam {} - {}]", index + 1, record.exam_date);
        let _ = writeln!(out, "- Exam type: {}", text_or_na(Some(record.exam_type.as_str())));
        let _ = writeln!(out, "- Blood pressure: {}", blood_pressure_text(measurements));
        let _ = writeln!(
            out,
            "- Weight: {}, Height: {}, BMI: {}",
            quantity(measurements.weight_kg, "kg"),
            quantity(measurements.height_m, "m"),
            bmi_text(measurements)
        );
        let _ = writeln!(
            out,
            "- Risk level: {}",
            record.risk_label.map_or(NOT_AVAILABLE, crate::RiskLabel::as_str)
        );
        if let Some(observations) = non_blank(record.observations.as_deref()) {
            let _ = writeln!(
                out,
                "- Observations: {}",
                excerpt(observations, OBSERVATION_EXCERPT_CHARS)
            );
        }
    }

    let _ = write!(out, "\nTREND: {}", trend.describe());
    out
}

/// Render the record under evaluation with explicit fallbacks for every absent field.
#[must_use]
pub fn format_current_record(record: &ExamRecord) -> String {
    let measurements = &record.measurements;
    let mut out = String::new();
    let _ = writeln!(out, "Subject ID: {}", record.subject.subject_id);
    let _ = writeln!(out, "Worker: {}", text_or_na(Some(record.subject.name.as_str())));
    let _ = writeln!(out, "Document: {}", text_or_na(Some(record.subject.document.as_str())));
    let _ = writeln!(out, "Exam type: {}", text_or_na(Some(record.exam_type.as_str())));
    let _ = writeln!(out, "Exam date: {}", record.exam_date);
    out.push_str("\nCLINICAL PARAMETERS:\n");
    let _ = writeln!(out, "- Blood pressure: {}", blood_pressure_text(measurements));
    let _ = writeln!(out, "- Weight: {}", quantity(measurements.weight_kg, "kg"));
    let _ = writeln!(out, "- Height: {}", quantity(measurements.height_m, "m"));
    let _ = writeln!(out, "- BMI: {}", bmi_text(measurements));
    let _ = writeln!(out, "- Vision: {}", text_or_na(measurements.vision.as_deref()));
    let _ = writeln!(out, "- Audiometry: {}", text_or_na(measurements.audiometry.as_deref()));
    out.push_str("\nOBSERVATIONS:\n");
    out.push_str(non_blank(record.observations.as_deref()).unwrap_or("No observations"));
    out
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn text_or_na(value: Option<&str>) -> &str {
    non_blank(value).unwrap_or(NOT_AVAILABLE)
}

fn blood_pressure_text(measurements: &ClinicalMeasurements) -> String {
    non_blank(measurements.blood_pressure.as_deref())
        .map_or_else(|| NOT_AVAILABLE.to_string(), |value| format!("{value} mmHg"))
}

fn quantity(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(value) if value.is_finite() && value > 0.0 => format!("{value} {unit}"),
        _ => NOT_AVAILABLE.to_string(),
    }
}

fn bmi_text(measurements: &ClinicalMeasurements) -> String {
    body_mass_index(measurements).map_or_else(|| NOT_AVAILABLE.to_string(), |bmi| format!("{bmi:.1}"))
}
