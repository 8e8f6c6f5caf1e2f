use std::cmp::Ordering;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use exam_rag_core::{
    parse_exam_date, ClassificationResult, ClinicalMeasurements, Embedding, ExamIntake,
    ExamRecord, RecordId, RiskLabel, Subject, SubjectId,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS subjects (
  subject_id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  document TEXT NOT NULL UNIQUE,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS exam_records (
  record_id INTEGER PRIMARY KEY AUTOINCREMENT,
  subject_id INTEGER NOT NULL,
  exam_type TEXT NOT NULL,
  exam_date TEXT NOT NULL,
  blood_pressure TEXT,
  weight_kg REAL CHECK (weight_kg IS NULL OR weight_kg >= 0),
  height_m REAL CHECK (height_m IS NULL OR height_m >= 0),
  vision TEXT,
  audiometry TEXT,
  observations TEXT,
  risk_label TEXT CHECK (risk_label IS NULL OR risk_label IN ('LOW','MEDIUM','HIGH')),
  risk_justification TEXT,
  summary TEXT,
  created_at TEXT NOT NULL,
  scored_at TEXT,
  summarized_at TEXT,
  FOREIGN KEY (subject_id) REFERENCES subjects(subject_id)
);

CREATE TABLE IF NOT EXISTS record_embeddings (
  record_id INTEGER PRIMARY KEY,
  subject_id INTEGER NOT NULL,
  dimensions INTEGER NOT NULL CHECK (dimensions > 0),
  embedding BLOB NOT NULL,
  content_hash TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  FOREIGN KEY (record_id) REFERENCES exam_records(record_id),
  FOREIGN KEY (subject_id) REFERENCES subjects(subject_id)
);

CREATE INDEX IF NOT EXISTS idx_exam_records_subject_date ON exam_records(subject_id, exam_date);
CREATE INDEX IF NOT EXISTS idx_exam_records_risk_label ON exam_records(risk_label);
CREATE INDEX IF NOT EXISTS idx_record_embeddings_subject ON record_embeddings(subject_id);
";

const RECORD_SELECT_SQL: &str = r"
SELECT
  r.record_id, r.subject_id, s.name, s.document, r.exam_type, r.exam_date,
  r.blood_pressure, r.weight_kg, r.height_m, r.vision, r.audiometry, r.observations,
  r.risk_label, r.risk_justification, r.summary
FROM exam_records r
JOIN subjects s ON s.subject_id = r.subject_id
";

const RECORD_WITH_HASH_SELECT_SQL: &str = r"
SELECT
  r.record_id, r.subject_id, s.name, s.document, r.exam_type, r.exam_date,
  r.blood_pressure, r.weight_kg, r.height_m, r.vision, r.audiometry, r.observations,
  r.risk_label, r.risk_justification, r.summary, e.content_hash
FROM exam_records r
JOIN subjects s ON s.subject_id = r.subject_id
LEFT JOIN record_embeddings e ON e.record_id = r.record_id
ORDER BY r.record_id ASC
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingUpsert {
    pub record_id: RecordId,
    pub dimensions: usize,
    pub was_update: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub record_id: RecordId,
    pub embedding: Embedding,
    pub content_hash: String,
}

/// Record id paired with its cosine distance to a query vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityHit {
    pub record_id: RecordId,
    pub distance: f64,
}

impl SqliteStore {
    /// Open a SQLite-backed record store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
        }

        let version = current_schema_version(&self.conn)?;
        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Register a new unscored exam record, creating or renaming its subject by document.
    ///
    /// # Errors
    /// Returns an error when intake validation fails or any write in the transaction fails.
    pub fn insert_record(&mut self, intake: &ExamIntake) -> Result<ExamRecord> {
        intake.validate()?;
        let now = now_rfc3339()?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO subjects(name, document, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(document) DO UPDATE SET name = excluded.name",
            params![intake.subject_name.trim(), intake.subject_document.trim(), now],
        )
        .context("failed to upsert subject")?;
        let subject_id: i64 = tx
            .query_row(
                "SELECT subject_id FROM subjects WHERE document = ?1",
                params![intake.subject_document.trim()],
                |row| row.get(0),
            )
            .context("failed to resolve subject id")?;

        let measurements = &intake.measurements;
        tx.execute(
            "INSERT INTO exam_records(
                subject_id, exam_type, exam_date, blood_pressure, weight_kg, height_m,
                vision, audiometry, observations, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                subject_id,
                intake.exam_type.trim(),
                intake.exam_date.to_string(),
                measurements.blood_pressure,
                measurements.weight_kg,
                measurements.height_m,
                measurements.vision,
                measurements.audiometry,
                intake.observations,
                now,
            ],
        )
        .context("failed to insert exam record")?;
        let record_id = RecordId(tx.last_insert_rowid());
        tx.commit().context("failed to commit intake transaction")?;

        self.get_record(record_id)?
            .ok_or_else(|| anyhow!("exam record {record_id} vanished after insert"))
    }

    /// Load one exam record with its subject identity.
    ///
    /// # Errors
    /// Returns an error when the lookup fails or the stored row cannot be decoded.
    pub fn get_record(&self, record_id: RecordId) -> Result<Option<ExamRecord>> {
        let mut stmt = self.conn.prepare(&format!("{RECORD_SELECT_SQL} WHERE r.record_id = ?1"))?;
        let mut rows = stmt.query(params![record_id.0])?;
        match rows.next()? {
            Some(row) => Ok(Some(decode_record(row)?)),
            None => Ok(None),
        }
    }

    /// Temporal history: the subject's labeled records other than `exclude`, newest first.
    ///
    /// # Errors
    /// Returns an error when the query fails or a row cannot be decoded.
    pub fn labeled_history(
        &self,
        subject_id: SubjectId,
        exclude: RecordId,
        limit: usize,
    ) -> Result<Vec<ExamRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(&format!(
            "{RECORD_SELECT_SQL}
             WHERE r.subject_id = ?1 AND r.record_id != ?2 AND r.risk_label IS NOT NULL
             ORDER BY r.exam_date DESC, r.record_id DESC
             LIMIT ?3"
        ))?;
        let mut rows = stmt.query(params![subject_id.0, exclude.0, sql_limit(limit)])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(decode_record(row)?);
        }
        Ok(records)
    }

    /// Nearest stored embeddings to `query` by ascending cosine distance, excluding `exclude`.
    ///
    /// `subject` restricts the pool to one subject; `None` searches every record. Vectors whose
    /// dimension differs from the query or whose norm is zero are skipped.
    ///
    /// # Errors
    /// Returns an error when the query fails or a stored vector cannot be decoded.
    pub fn nearest_records(
        &self,
        query: &Embedding,
        subject: Option<SubjectId>,
        exclude: RecordId,
        limit: usize,
    ) -> Result<Vec<SimilarityHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self.conn.prepare(
            "SELECT record_id, dimensions, embedding
             FROM record_embeddings
             WHERE record_id != ?1 AND (?2 IS NULL OR subject_id = ?2)",
        )?;
        let mut rows = stmt.query(params![exclude.0, subject.map(|id| id.0)])?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next()? {
            let record_id = RecordId(row.get(0)?);
            let dimensions: i64 = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            let values = decode_embedding_blob(&blob, dimensions)
                .with_context(|| format!("failed to decode embedding for record {record_id}"))?;
            let Ok(stored) = Embedding::new(values) else {
                tracing::warn!(%record_id, "skipping stored embedding with invalid components");
                continue;
            };
            match query.cosine_distance(&stored) {
                Some(distance) => hits.push(SimilarityHit { record_id, distance }),
                None => tracing::warn!(
                    %record_id,
                    stored_dimensions = stored.dimensions(),
                    query_dimensions = query.dimensions(),
                    "skipping stored embedding that cannot be compared with the query"
                ),
            }
        }

        hits.sort_by(|left, right| {
            left.distance
                .partial_cmp(&right.distance)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.record_id.cmp(&right.record_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Create or replace the embedding of one record.
    ///
    /// # Errors
    /// Returns an error when the record does not exist or the write fails.
    pub fn upsert_embedding(
        &mut self,
        record_id: RecordId,
        embedding: &Embedding,
        content_hash: &str,
    ) -> Result<EmbeddingUpsert> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        let subject_id: i64 = tx
            .query_row(
                "SELECT subject_id FROM exam_records WHERE record_id = ?1",
                params![record_id.0],
                |row| row.get(0),
            )
            .optional()
            .context("failed to resolve record subject")?
            .ok_or_else(|| anyhow!("exam record {record_id} does not exist"))?;

        let was_update = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM record_embeddings WHERE record_id = ?1)",
                params![record_id.0],
                |row| row.get::<_, i64>(0),
            )
            .context("failed to check existing embedding")?
            == 1;

        let dimensions = embedding.dimensions();
        tx.execute(
            "INSERT INTO record_embeddings(
                record_id, subject_id, dimensions, embedding, content_hash, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(record_id) DO UPDATE SET
                subject_id = excluded.subject_id,
                dimensions = excluded.dimensions,
                embedding = excluded.embedding,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at",
            params![
                record_id.0,
                subject_id,
                i64::try_from(dimensions).context("embedding dimension overflows i64")?,
                encode_embedding_blob(embedding.values()),
                content_hash,
                now_rfc3339()?,
            ],
        )
        .context("failed to write embedding")?;
        tx.commit().context("failed to commit embedding transaction")?;

        Ok(EmbeddingUpsert { record_id, dimensions, was_update })
    }

    /// # Errors
    /// Returns an error when the lookup fails or the stored vector cannot be decoded.
    pub fn get_embedding(&self, record_id: RecordId) -> Result<Option<StoredEmbedding>> {
        let row = self
            .conn
            .query_row(
                "SELECT dimensions, embedding, content_hash FROM record_embeddings WHERE record_id = ?1",
                params![record_id.0],
                |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?, row.get::<_, String>(2)?))
                },
            )
            .optional()
            .context("failed to load embedding")?;

        match row {
            Some((dimensions, blob, content_hash)) => {
                let values = decode_embedding_blob(&blob, dimensions)?;
                Ok(Some(StoredEmbedding {
                    record_id,
                    embedding: Embedding::new(values)?,
                    content_hash,
                }))
            }
            None => Ok(None),
        }
    }

    /// Every record paired with the content hash of its stored embedding, if any.
    ///
    /// # Errors
    /// Returns an error when the query fails or a row cannot be decoded.
    pub fn records_with_embedding_hash(&self) -> Result<Vec<(ExamRecord, Option<String>)>> {
        let mut stmt = self.conn.prepare(RECORD_WITH_HASH_SELECT_SQL)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let record = decode_record(row)?;
            let content_hash: Option<String> = row.get("content_hash")?;
            out.push((record, content_hash));
        }
        Ok(out)
    }

    /// Records without a risk label, oldest exam first.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn unscored_record_ids(&self, limit: usize) -> Result<Vec<RecordId>> {
        self.record_ids_where("risk_label IS NULL", limit)
    }

    /// Scored records still missing an executive summary, oldest exam first.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn unsummarized_record_ids(&self, limit: usize) -> Result<Vec<RecordId>> {
        self.record_ids_where("risk_label IS NOT NULL AND summary IS NULL", limit)
    }

    /// Persist a validated classification. Rewriting the same result is a no-op in effect.
    ///
    /// # Errors
    /// Returns an error when the record does not exist or the update fails.
    pub fn save_classification(
        &mut self,
        record_id: RecordId,
        result: &ClassificationResult,
    ) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE exam_records
                 SET risk_label = ?2, risk_justification = ?3, scored_at = ?4
                 WHERE record_id = ?1",
                params![
                    record_id.0,
                    result.risk_label.as_str(),
                    result.justification,
                    now_rfc3339()?
                ],
            )
            .context("failed to persist classification")?;
        if changed == 0 {
            return Err(anyhow!("exam record {record_id} does not exist"));
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error when the record does not exist or the update fails.
    pub fn save_summary(&mut self, record_id: RecordId, summary: &str) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE exam_records SET summary = ?2, summarized_at = ?3 WHERE record_id = ?1",
                params![record_id.0, summary, now_rfc3339()?],
            )
            .context("failed to persist summary")?;
        if changed == 0 {
            return Err(anyhow!("exam record {record_id} does not exist"));
        }
        Ok(())
    }

    fn record_ids_where(&self, predicate: &str, limit: usize) -> Result<Vec<RecordId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT record_id FROM exam_records WHERE {predicate}
             ORDER BY exam_date ASC, record_id ASC LIMIT ?1"
        ))?;
        let ids = stmt
            .query_map(params![sql_limit(limit)], |row| row.get::<_, i64>(0))?
            .map(|id| id.map(RecordId))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

fn decode_record(row: &Row<'_>) -> Result<ExamRecord> {
    let record_id = RecordId(row.get("record_id")?);
    let exam_date_raw: String = row.get("exam_date")?;
    let risk_label_raw: Option<String> = row.get("risk_label")?;
    let risk_label = match risk_label_raw {
        Some(raw) => Some(
            RiskLabel::parse(&raw)
                .ok_or_else(|| anyhow!("unknown risk_label `{raw}` on record {record_id}"))?,
        ),
        None => None,
    };

    Ok(ExamRecord {
        record_id,
        subject: Subject {
            subject_id: SubjectId(row.get("subject_id")?),
            name: row.get("name")?,
            document: row.get("document")?,
        },
        exam_type: row.get("exam_type")?,
        exam_date: parse_exam_date(&exam_date_raw)
            .with_context(|| format!("invalid exam_date on record {record_id}"))?,
        measurements: ClinicalMeasurements {
            blood_pressure: row.get("blood_pressure")?,
            weight_kg: row.get("weight_kg")?,
            height_m: row.get("height_m")?,
            vision: row.get("vision")?,
            audiometry: row.get("audiometry")?,
        },
        observations: row.get("observations")?,
        risk_label,
        risk_justification: row.get("risk_justification")?,
        summary: row.get("summary")?,
    })
}

fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(values.len() * 4);
    for value in values {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn decode_embedding_blob(blob: &[u8], dimensions: i64) -> Result<Vec<f32>> {
    let expected = usize::try_from(dimensions)
        .map_err(|_| anyhow!("invalid embedding dimension {dimensions}"))?;
    if blob.len() != expected * 4 {
        return Err(anyhow!(
            "embedding blob has {} bytes, expected {} for {expected} dimensions",
            blob.len(),
            expected * 4
        ));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
