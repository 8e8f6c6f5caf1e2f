use std::cmp::{Ordering, Reverse};

use serde::{Deserialize, Serialize};

use crate::{ExamRecord, SubjectId};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Deteriorating,
    Improving,
    Stable,
    Unknown,
}

impl Trend {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deteriorating => "deteriorating",
            Self::Improving => "improving",
            Self::Stable => "stable",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn describe(self) -> &'static str {
        match self {
            Self::Deteriorating => "Progressive deterioration over time",
            Self::Improving => "Progressive improvement over time",
            Self::Stable => "Stable",
            Self::Unknown => "Not enough labeled history to establish a trend",
        }
    }
}

/// Compare the risk label of the chronologically earliest record against the latest one.
///
/// Records are located by `exam_date`, so the input may arrive newest-first (temporal retrieval)
/// or in relevance order (similarity retrieval). Equal dates fall back to input position, later
/// positions being treated as older.
#[must_use]
pub fn analyze_trend(history: &[ExamRecord]) -> Trend {
    trend_over(&history.iter().collect::<Vec<_>>())
}

/// Trend over the records of one subject only; neighbours from other workers are ignored.
#[must_use]
pub fn analyze_subject_trend(history: &[ExamRecord], subject_id: SubjectId) -> Trend {
    let own = history
        .iter()
        .filter(|record| record.subject.subject_id == subject_id)
        .collect::<Vec<_>>();
    trend_over(&own)
}

fn trend_over(history: &[&ExamRecord]) -> Trend {
    let labeled = history.iter().filter(|record| record.risk_label.is_some()).count();
    if history.len() < 2 || labeled < 2 {
        return Trend::Unknown;
    }

    let chronological_key =
        |(position, record): &(usize, &ExamRecord)| (record.exam_date, Reverse(*position));
    let earliest = history.iter().copied().enumerate().min_by_key(chronological_key);
    let latest = history.iter().copied().enumerate().max_by_key(chronological_key);

    let (Some((_, earliest)), Some((_, latest))) = (earliest, latest) else {
        return Trend::Unknown;
    };

    match (earliest.risk_label, latest.risk_label) {
        (Some(first), Some(last)) => match last.cmp(&first) {
            Ordering::Greater => Trend::Deteriorating,
            Ordering::Less => Trend::Improving,
            Ordering::Equal => Trend::Stable,
        },
        _ => Trend::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::fixtures::record;
    use crate::RiskLabel;

    // Test IDs: TTRD-001
    #[test]
    fn rising_label_is_deteriorating() {
        let history = vec![
            record(3, "2024-06-01", Some(RiskLabel::High)),
            record(2, "2023-06-01", Some(RiskLabel::Medium)),
            record(1, "2022-06-01", Some(RiskLabel::Low)),
        ];
        assert_eq!(analyze_trend(&history), Trend::Deteriorating);
    }

    // Test IDs: TTRD-002
    #[test]
    fn falling_label_is_improving_and_equal_is_stable() {
        let improving = vec![
            record(2, "2024-01-10", Some(RiskLabel::Low)),
            record(1, "2023-01-10", Some(RiskLabel::High)),
        ];
        assert_eq!(analyze_trend(&improving), Trend::Improving);

        let stable = vec![
            record(3, "2024-01-10", Some(RiskLabel::Medium)),
            record(2, "2023-07-10", Some(RiskLabel::High)),
            record(1, "2023-01-10", Some(RiskLabel::Medium)),
        ];
        assert_eq!(analyze_trend(&stable), Trend::Stable);
    }

    // Test IDs: TTRD-003
    #[test]
    fn short_or_unlabeled_history_is_unknown() {
        assert_eq!(analyze_trend(&[]), Trend::Unknown);
        assert_eq!(analyze_trend(&[record(1, "2024-01-10", Some(RiskLabel::High))]), Trend::Unknown);

        let one_labeled = vec![
            record(2, "2024-01-10", Some(RiskLabel::High)),
            record(1, "2023-01-10", None),
        ];
        assert_eq!(analyze_trend(&one_labeled), Trend::Unknown);

        let missing_latest = vec![
            record(3, "2024-01-10", None),
            record(2, "2023-06-10", Some(RiskLabel::High)),
            record(1, "2023-01-10", Some(RiskLabel::Low)),
        ];
        assert_eq!(analyze_trend(&missing_latest), Trend::Unknown);
    }

    // Test IDs: TTRD-004
    #[test]
    fn relevance_ordered_input_is_resolved_by_date() {
        let relevance_order = vec![
            record(1, "2021-03-01", Some(RiskLabel::Low)),
            record(3, "2024-03-01", Some(RiskLabel::High)),
            record(2, "2022-03-01", Some(RiskLabel::Medium)),
        ];
        assert_eq!(analyze_trend(&relevance_order), Trend::Deteriorating);
    }

    // Test IDs: TTRD-005
    #[test]
    fn equal_dates_fall_back_to_position() {
        let same_day = vec![
            record(2, "2024-03-01", Some(RiskLabel::High)),
            record(1, "2024-03-01", Some(RiskLabel::Low)),
        ];
        assert_eq!(analyze_trend(&same_day), Trend::Deteriorating);
    }

    // Test IDs: TTRD-006
    #[test]
    fn subject_trend_ignores_other_workers() {
        let mut other_low = record(1, "2020-01-10", Some(RiskLabel::Low));
        other_low.subject.subject_id = SubjectId(1);
        let mut other_high = record(2, "2023-01-10", Some(RiskLabel::High));
        other_high.subject.subject_id = SubjectId(2);
        let neighbours = vec![other_low, other_high];
        assert_eq!(analyze_trend(&neighbours), Trend::Deteriorating);
        assert_eq!(analyze_subject_trend(&neighbours, SubjectId(7)), Trend::Unknown);

        let mut mixed = neighbours;
        mixed.push(record(3, "2022-01-10", Some(RiskLabel::High)));
        mixed.push(record(4, "2024-01-10", Some(RiskLabel::Medium)));
        assert_eq!(analyze_subject_trend(&mixed, SubjectId(7)), Trend::Improving);
    }

    fn label_strategy() -> impl Strategy<Value = Option<RiskLabel>> {
        prop_oneof![
            Just(None),
            Just(Some(RiskLabel::Low)),
            Just(Some(RiskLabel::Medium)),
            Just(Some(RiskLabel::High)),
        ]
    }

    proptest! {
        #[test]
        fn property_trend_never_panics_and_reverses_under_mirroring(
            labels in proptest::collection::vec(label_strategy(), 0..8)
        ) {
            let history = labels
                .iter()
                .enumerate()
                .map(|(index, label)| {
                    let year = 2024 - i64::try_from(index).unwrap_or(0);
                    record(100 - i64::try_from(index).unwrap_or(0), &format!("{year}-01-15"), *label)
                })
                .collect::<Vec<_>>();
            let trend = analyze_trend(&history);

            let mirrored = history
                .iter()
                .zip(labels.iter().rev())
                .map(|(record, label)| {
                    let mut record = record.clone();
                    record.risk_label = *label;
                    record
                })
                .collect::<Vec<_>>();
            let expected = match trend {
                Trend::Deteriorating => Trend::Improving,
                Trend::Improving => Trend::Deteriorating,
                other => other,
            };
            prop_assert_eq!(analyze_trend(&mirrored), expected);
        }
    }
}
