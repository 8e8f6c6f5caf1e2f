use serde::{Deserialize, Serialize};

use crate::{PipelineError, RiskLabel};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Placeholder {
    CurrentRecord,
    HistoricalContext,
    RiskLabel,
    Summary,
    ToneGuidance,
}

impl Placeholder {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::CurrentRecord => "current_record",
            Self::HistoricalContext => "historical_context",
            Self::RiskLabel => "risk_label",
            Self::Summary => "summary",
            Self::ToneGuidance => "tone_guidance",
        }
    }

    #[must_use]
    pub fn token(self) -> String {
        format!("{{{}}}", self.name())
    }
}

/// Externally managed prompt text addressed by key, checked for its required placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    key: String,
    body: String,
}

impl PromptTemplate {
    /// # Errors
    /// Returns `PipelineError::Configuration` when the body is blank or lacks a required
    /// placeholder.
    pub fn new(
        key: impl Into<String>,
        body: impl Into<String>,
        required: &[Placeholder],
    ) -> Result<Self, PipelineError> {
        let key = key.into();
        let body = body.into();
        if body.trim().is_empty() {
            return Err(PipelineError::Configuration(format!("prompt template `{key}` is empty")));
        }

        let missing = required
            .iter()
            .filter(|placeholder| !body.contains(&placeholder.token()))
            .map(|placeholder| placeholder.token())
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(PipelineError::Configuration(format!(
                "prompt template `{key}` is missing required placeholder(s): {}",
                missing.join(", ")
            )));
        }

        Ok(Self { key, body })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Substitute placeholders in a single left-to-right pass.
    ///
    /// Only whole `{name}` tokens match, so `{record}` never matches inside `{record_id}`.
    /// Unknown tokens stay literal and substituted values are not rescanned.
    #[must_use]
    pub fn render(&self, values: &[(Placeholder, &str)]) -> String {
        let mut out = String::with_capacity(self.body.len());
        let mut rest = self.body.as_str();

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find(|ch: char| ch == '{' || ch == '}') else {
                out.push('{');
                rest = after;
                continue;
            };
            if !after[close..].starts_with('}') {
                out.push('{');
                rest = after;
                continue;
            }

            let name = &after[..close];
            match values.iter().find(|(placeholder, _)| placeholder.name() == name) {
                Some((_, value)) => out.push_str(value),
                None => {
                    out.push('{');
                    out.push_str(name);
                    out.push('}');
                }
            }
            rest = &after[close + 1..];
        }

        out.push_str(rest);
        out
    }
}

/// Register the notification draft should use for a given risk level.
#[must_use]
pub fn tone_guidance(label: RiskLabel) -> &'static str {
    match label {
        RiskLabel::High => {
            "Use an urgent, direct tone. State that immediate follow-up is required and list the \
             concrete actions the contractor must take."
        }
        RiskLabel::Medium => {
            "Use a professional, attentive tone. Recommend scheduled follow-up and preventive \
             measures without alarm."
        }
        RiskLabel::Low => {
            "Use a calm, reassuring tone. Confirm the worker is fit and mention routine \
             preventive recommendations."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classification_template(body: &str) -> Result<PromptTemplate, PipelineError> {
        PromptTemplate::new(
            "classification",
            body,
            &[Placeholder::CurrentRecord, Placeholder::HistoricalContext],
        )
    }

    // Test IDs: TPRM-001
    #[test]
    fn render_substitutes_both_blocks() -> Result<(), PipelineError> {
        let template = classification_template(
            "History:\n{historical_context}\n\nCurrent:\n{current_record}\nRespond in JSON.",
        )?;
        let prompt = template.render(&[
            (Placeholder::HistoricalContext, "TREND: Stable"),
            (Placeholder::CurrentRecord, "Worker: Ana"),
        ]);
        assert_eq!(prompt, "History:\nTREND: Stable\n\nCurrent:\nWorker: Ana\nRespond in JSON.");
        Ok(())
    }

    // Test IDs: TPRM-002
    #[test]
    fn render_does_not_match_overlapping_names() -> Result<(), PipelineError> {
        let template = PromptTemplate::new(
            "summary",
            "{risk_label} / {risk_label_note} / {current_record}",
            &[Placeholder::RiskLabel],
        )?;
        let prompt = template.render(&[
            (Placeholder::RiskLabel, "HIGH"),
            (Placeholder::CurrentRecord, "record"),
        ]);
        assert_eq!(prompt, "HIGH / {risk_label_note} / record");
        Ok(())
    }

    // Test IDs: TPRM-003
    #[test]
    fn substituted_values_are_not_rescanned() -> Result<(), PipelineError> {
        let template = classification_template("{historical_context}|{current_record}")?;
        let prompt = template.render(&[
            (Placeholder::HistoricalContext, "mentions {current_record} literally"),
            (Placeholder::CurrentRecord, "CURRENT"),
        ]);
        assert_eq!(prompt, "mentions {current_record} literally|CURRENT");
        Ok(())
    }

    // Test IDs: TPRM-004
    #[test]
    fn template_missing_placeholder_is_configuration_error() {
        let result = classification_template("Only {current_record} here");
        match result {
            Err(PipelineError::Configuration(message)) => {
                assert!(message.contains("{historical_context}"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }

        assert!(matches!(
            classification_template("   "),
            Err(PipelineError::Configuration(_))
        ));
    }

    // Test IDs: TPRM-005
    #[test]
    fn stray_braces_are_preserved() -> Result<(), PipelineError> {
        let template = classification_template(
            "{historical_context} {current_record} {\"risk_label\": \"LOW|MEDIUM|HIGH\"} {",
        )?;
        let prompt = template.render(&[
            (Placeholder::HistoricalContext, "H"),
            (Placeholder::CurrentRecord, "C"),
        ]);
        assert_eq!(prompt, "H C {\"risk_label\": \"LOW|MEDIUM|HIGH\"} {");
        Ok(())
    }

    // Test IDs: TPRM-006
    #[test]
    fn tone_guidance_escalates_with_risk() {
        assert!(tone_guidance(RiskLabel::High).contains("urgent"));
        assert!(tone_guidance(RiskLabel::Medium).contains("professional"));
        assert!(tone_guidance(RiskLabel::Low).contains("reassuring"));
    }
}
