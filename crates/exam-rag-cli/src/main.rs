use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use exam_rag_api::{AppConfig, ExamRagApi};
use exam_rag_core::{parse_exam_date, ClinicalMeasurements, ExamIntake, RecordId, SimilarityScope};
use serde_json::Value;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const DEFAULT_BATCH_LIMIT: usize = 100;

#[derive(Debug, Parser)]
#[command(name = "exam-rag")]
#[command(about = "Occupational exam risk classification with historical context")]
struct Cli {
    #[arg(long, default_value = "./exam_rag.sqlite3")]
    db: PathBuf,

    /// YAML file with model endpoints, template directory and retrieval settings.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Record {
        #[command(subcommand)]
        command: Box<RecordCommand>,
    },
    /// Classify one record using its historical context.
    Classify(RecordArgs),
    /// Generate and store the executive summary of a classified record.
    Summarize(RecordArgs),
    /// Draft the contractor notification for a summarized record.
    NotifyDraft(RecordArgs),
    /// Compute or refresh the embedding of one record.
    Embed(RecordArgs),
    Batch {
        #[command(subcommand)]
        command: BatchCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    Add(RecordAddArgs),
    Show(RecordArgs),
    /// Show the history block that would accompany an evaluation of the record.
    History(HistoryArgs),
    Similar(SimilarArgs),
}

#[derive(Debug, Args)]
struct RecordArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Args)]
struct RecordAddArgs {
    /// JSON file holding a complete intake payload.
    #[arg(long, conflicts_with_all = ["name", "document", "exam_type", "date"])]
    file: Option<PathBuf>,
    #[arg(long, required_unless_present = "file")]
    name: Option<String>,
    #[arg(long, required_unless_present = "file")]
    document: Option<String>,
    #[arg(long, required_unless_present = "file")]
    exam_type: Option<String>,
    /// Exam date as YYYY-MM-DD.
    #[arg(long, required_unless_present = "file")]
    date: Option<String>,
    #[arg(long)]
    blood_pressure: Option<String>,
    #[arg(long)]
    weight_kg: Option<f64>,
    #[arg(long)]
    height_m: Option<f64>,
    #[arg(long)]
    vision: Option<String>,
    #[arg(long)]
    audiometry: Option<String>,
    #[arg(long)]
    observations: Option<String>,
}

#[derive(Debug, Args)]
struct HistoryArgs {
    #[arg(long)]
    id: i64,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct SimilarArgs {
    #[arg(long)]
    id: i64,
    #[arg(long, value_enum)]
    scope: Option<ScopeArg>,
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum BatchCommand {
    ClassifyUnscored(BatchArgs),
    SummarizePending(BatchArgs),
    EmbedMissing(BatchArgs),
}

#[derive(Debug, Args)]
struct BatchArgs {
    #[arg(long, default_value_t = DEFAULT_BATCH_LIMIT)]
    limit: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScopeArg {
    Subject,
    Global,
}

impl From<ScopeArg> for SimilarityScope {
    fn from(value: ScopeArg) -> Self {
        match value {
            ScopeArg::Subject => Self::Subject,
            ScopeArg::Global => Self::Global,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: impl serde::Serialize) -> Result<()> {
    let value = serde_json::to_value(value).context("failed to serialize command output")?;
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_api(cli: &Cli) -> Result<ExamRagApi> {
    match &cli.config {
        Some(path) => Ok(AppConfig::load(path)?.build_api(cli.db.clone())?),
        None => Ok(ExamRagApi::new(cli.db.clone())),
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let api = build_api(&cli)?;
    tracing::debug!(db = %cli.db.display(), command = ?cli.command, "dispatching command");

    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Record { command } => run_record(*command, &api),
        Command::Classify(args) => emit_json(api.classify_record(RecordId(args.id))?),
        Command::Summarize(args) => emit_json(api.summarize_record(RecordId(args.id))?),
        Command::NotifyDraft(args) => emit_json(api.draft_notification(RecordId(args.id))?),
        Command::Embed(args) => emit_json(api.embed_record(RecordId(args.id))?),
        Command::Batch { command } => run_batch(command, &api),
    }
}

fn run_db(command: DbCommand, api: &ExamRagApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => emit_json(api.migrate(args.dry_run)?),
    }
}

fn run_record(command: RecordCommand, api: &ExamRagApi) -> Result<()> {
    match command {
        RecordCommand::Add(args) => emit_json(api.add_record(&intake_from_args(args)?)?),
        RecordCommand::Show(args) => emit_json(api.get_record(RecordId(args.id))?),
        RecordCommand::History(args) => {
            emit_json(api.historical_context(RecordId(args.id), args.limit)?)
        }
        RecordCommand::Similar(args) => emit_json(serde_json::json!({
            "record_id": args.id,
            "neighbors": api.similar_records(
                RecordId(args.id),
                args.scope.map(SimilarityScope::from),
                args.limit,
            )?
        })),
    }
}

fn run_batch(command: BatchCommand, api: &ExamRagApi) -> Result<()> {
    let outcome = match command {
        BatchCommand::ClassifyUnscored(args) => api.classify_unscored(args.limit)?,
        BatchCommand::SummarizePending(args) => api.summarize_pending(args.limit)?,
        BatchCommand::EmbedMissing(args) => api.embed_missing(args.limit)?,
    };
    emit_json(outcome)
}

fn intake_from_args(args: RecordAddArgs) -> Result<ExamIntake> {
    if let Some(path) = args.file {
        let body = fs::read_to_string(&path)
            .with_context(|| format!("failed to read intake file {}", path.display()))?;
        return serde_json::from_str(&body)
            .with_context(|| format!("invalid intake JSON in {}", path.display()));
    }

    let required = |value: Option<String>, flag: &str| {
        value.ok_or_else(|| anyhow!("--{flag} is required without --file"))
    };
    let date = required(args.date, "date")?;
    Ok(ExamIntake {
        subject_name: required(args.name, "name")?,
        subject_document: required(args.document, "document")?,
        exam_type: required(args.exam_type, "exam-type")?,
        exam_date: parse_exam_date(&date)?,
        measurements: ClinicalMeasurements {
            blood_pressure: args.blood_pressure,
            weight_kg: args.weight_kg,
            height_m: args.height_m,
            vision: args.vision,
            audiometry: args.audiometry,
        },
        observations: args.observations,
    })
}
