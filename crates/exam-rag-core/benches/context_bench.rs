use criterion::{criterion_group, criterion_main, Criterion};
use exam_rag_core::{
    analyze_trend, format_current_record, format_history, parse_exam_date, ClinicalMeasurements,
    ExamRecord, Placeholder, PromptTemplate, RecordId, RiskLabel, Subject, SubjectId,
};

fn mk_record(index: usize) -> ExamRecord {
    let label = match index % 3 {
        0 => RiskLabel::Low,
        1 => RiskLabel::Medium,
        _ => RiskLabel::High,
    };
    let year = 2024 - (index % 20);
    let exam_date = match parse_exam_date(&format!("{year}-03-15")) {
        Ok(date) => date,
        Err(err) => panic!("invalid bench date: {err}"),
    };

    ExamRecord {
        record_id: RecordId(i64::try_from(index).unwrap_or(i64::MAX)),
        subject: Subject {
            subject_id: SubjectId(1),
            name: "Bench Worker".to_string(),
            document: "CC-0001".to_string(),
        },
        exam_type: "periodic".to_string(),
        exam_date,
        measurements: ClinicalMeasurements {
            blood_pressure: Some("130/85".to_string()),
            weight_kg: Some(81.0),
            height_m: Some(1.80),
            vision: Some("20/25".to_string()),
            audiometry: Some("mild loss at 4kHz".to_string()),
        },
        observations: Some("Reports lower back discomfort after long shifts. ".repeat(8)),
        risk_label: Some(label),
        risk_justification: Some("bench fixture".to_string()),
        summary: None,
    }
}

fn bench_history_formatting(c: &mut Criterion) {
    let history = (0..20).map(mk_record).collect::<Vec<_>>();
    c.bench_function("format_history_20_records", |b| {
        b.iter(|| {
            let trend = analyze_trend(&history);
            format_history(&history, trend)
        });
    });
}

fn bench_prompt_assembly(c: &mut Criterion) {
    let history = (0..3).map(mk_record).collect::<Vec<_>>();
    let current = mk_record(99);
    let template = match PromptTemplate::new(
        "classification",
        "History:\n{historical_context}\n\nCurrent exam:\n{current_record}\n\nRespond with JSON.",
        &[Placeholder::HistoricalContext, Placeholder::CurrentRecord],
    ) {
        Ok(template) => template,
        Err(err) => panic!("bench template should be valid: {err}"),
    };

    c.bench_function("assemble_classification_prompt", |b| {
        b.iter(|| {
            let context = format_history(&history, analyze_trend(&history));
            let record = format_current_record(&current);
            template.render(&[
                (Placeholder::HistoricalContext, context.as_str()),
                (Placeholder::CurrentRecord, record.as_str()),
            ])
        });
    });
}

criterion_group!(benches, bench_history_formatting, bench_prompt_assembly);
criterion_main!(benches);
