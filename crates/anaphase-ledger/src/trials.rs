//! Two-phase trial records keyed by (master variant key, iteration).

use std::path::{Path, PathBuf};

use anaphase_core::errors::{AnaphaseError, ErrorInfo};
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::{Deserialize, Serialize};

/// One trial row. `cpu_time`, `results` and `filename` stay NULL between
/// the open and close phases; an open-but-never-closed row is the durable
/// crash signature of a run that started and never finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Master variant key grouping runs of the same configuration.
    pub variant: String,
    /// Sequence number distinguishing repeated runs of the same key.
    pub iteration: i64,
    /// Source snapshot id (commit hash or the debug sentinel).
    pub source_id: String,
    /// Timestamp of the open phase, RFC 3339.
    pub opened_at: String,
    /// Process CPU seconds consumed by the run environment.
    pub cpu_time: Option<f64>,
    /// Result metrics string captured from the run environment.
    pub results: Option<String>,
    /// Exported artifact filename, if any.
    pub filename: Option<String>,
}

impl TrialRecord {
    /// True once the close phase has recorded an outcome.
    pub fn is_closed(&self) -> bool {
        self.cpu_time.is_some()
    }
}

/// Handle to one experiment's trial table inside a SQLite store.
///
/// The handle validates the schema on construction and holds only the
/// store path and table name afterwards. Every operation opens its own
/// short-lived connection scoped to a single statement group; no
/// connection is held across an experiment's execution.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialLedger {
    db_path: PathBuf,
    table: String,
}

impl TrialLedger {
    /// Opens (creating if needed) the trial table for an experiment,
    /// optionally segregated into a named group.
    pub fn open_store(
        db_path: impl Into<PathBuf>,
        experiment: &str,
        group: Option<&str>,
    ) -> Result<Self, AnaphaseError> {
        let mut table = format!("trials_{}", sanitize_identifier(experiment)?);
        if let Some(group) = group {
            table.push('_');
            table.push_str(&sanitize_identifier(group)?);
        }
        let ledger = Self {
            db_path: db_path.into(),
            table,
        };
        let conn = ledger.connect()?;
        conn.execute_batch(&format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" (
                variant TEXT NOT NULL,
                iteration INTEGER NOT NULL,
                "commit" TEXT NOT NULL,
                opened_at TEXT NOT NULL,
                cpu_time REAL,
                results TEXT,
                filename TEXT,
                PRIMARY KEY (variant, iteration)
            );"#,
            table = ledger.table
        ))
        .map_err(|err| ledger_error("ledger.open_store", "failed to create trials table", err))?;
        Ok(ledger)
    }

    /// Path of the backing SQLite store.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Name of the trials table this handle writes to.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn connect(&self) -> Result<Connection, AnaphaseError> {
        Connection::open(&self.db_path).map_err(|err| {
            AnaphaseError::Ledger(
                ErrorInfo::new("ledger.unreachable", "failed to open trial store")
                    .with_context("path", self.db_path.display().to_string())
                    .with_hint(err.to_string()),
            )
        })
    }

    /// Next unused iteration for a master variant key: `max + 1` over all
    /// open and closed rows, or 1 when the key is new.
    ///
    /// This is a read-then-decide step. It is not one transaction with the
    /// subsequent [`open_trial`](Self::open_trial); two processes racing on
    /// the same key can both read the same number, and the loser surfaces
    /// the primary-key collision at open time.
    pub fn next_iteration(&self, master_key: &str) -> Result<i64, AnaphaseError> {
        let conn = self.connect()?;
        let max: Option<i64> = conn
            .query_row(
                &format!(
                    r#"SELECT MAX(iteration) FROM "{}" WHERE variant = ?"#,
                    self.table
                ),
                params![master_key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| ledger_error("ledger.next_iteration", "failed to read iterations", err))?
            .flatten();
        Ok(max.map_or(1, |m| m + 1))
    }

    /// Phase 1: inserts the identity row with outcome columns unset.
    ///
    /// A primary-key collision means another run claimed this iteration
    /// between the read and this write; it is surfaced, never dropped.
    pub fn open_trial(
        &self,
        master_key: &str,
        iteration: i64,
        source_id: &str,
    ) -> Result<(), AnaphaseError> {
        let conn = self.connect()?;
        let opened_at = Utc::now().to_rfc3339();
        conn.execute(
            &format!(
                r#"INSERT INTO "{}" (variant, iteration, "commit", opened_at)
                 VALUES (?1, ?2, ?3, ?4)"#,
                self.table
            ),
            params![master_key, iteration, source_id, opened_at],
        )
        .map_err(|err| {
            if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
                AnaphaseError::Ledger(
                    ErrorInfo::new(
                        "ledger.iteration_taken",
                        "trial row already exists for this variant and iteration",
                    )
                    .with_context("variant", master_key)
                    .with_context("iteration", iteration.to_string())
                    .with_hint("a concurrent run claimed the same iteration; re-invoke to renumber"),
                )
            } else {
                ledger_error("ledger.open_trial", "failed to insert trial row", err)
            }
        })?;
        tracing::debug!(variant = master_key, iteration, table = %self.table, "trial opened");
        Ok(())
    }

    /// Phase 2: records the outcome on the row matching the primary key.
    ///
    /// Fails loudly when no matching row exists; a lost open phase means
    /// the crash-visibility mechanism is broken and must not pass silently.
    pub fn close_trial(
        &self,
        master_key: &str,
        iteration: i64,
        cpu_time: Option<f64>,
        results: Option<&str>,
        filename: Option<&str>,
    ) -> Result<(), AnaphaseError> {
        let conn = self.connect()?;
        let updated = conn
            .execute(
                &format!(
                    r#"UPDATE "{}" SET cpu_time = ?3, results = ?4, filename = ?5
                     WHERE variant = ?1 AND iteration = ?2"#,
                    self.table
                ),
                params![master_key, iteration, cpu_time, results, filename],
            )
            .map_err(|err| ledger_error("ledger.close_trial", "failed to update trial row", err))?;
        if updated == 0 {
            return Err(AnaphaseError::Ledger(
                ErrorInfo::new(
                    "ledger.close_without_open",
                    "no open trial row matches this variant and iteration",
                )
                .with_context("variant", master_key)
                .with_context("iteration", iteration.to_string()),
            ));
        }
        tracing::debug!(variant = master_key, iteration, table = %self.table, "trial closed");
        Ok(())
    }

    /// All rows for a master variant key, ordered by iteration. Includes
    /// open rows, which is how operators find runs that never finished.
    pub fn load_trials(&self, master_key: &str) -> Result<Vec<TrialRecord>, AnaphaseError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                r#"SELECT variant, iteration, "commit", opened_at, cpu_time, results, filename
                 FROM "{}" WHERE variant = ? ORDER BY iteration"#,
                self.table
            ))
            .map_err(|err| ledger_error("ledger.query", "failed to prepare trial query", err))?;
        let rows = stmt
            .query_map(params![master_key], row_to_record)
            .map_err(|err| ledger_error("ledger.query", "failed to query trials", err))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|err| ledger_error("ledger.query", "failed to read trial row", err))
    }

    /// Point lookup of one trial row.
    pub fn load_trial(
        &self,
        master_key: &str,
        iteration: i64,
    ) -> Result<Option<TrialRecord>, AnaphaseError> {
        let conn = self.connect()?;
        conn.query_row(
            &format!(
                r#"SELECT variant, iteration, "commit", opened_at, cpu_time, results, filename
                 FROM "{}" WHERE variant = ?1 AND iteration = ?2"#,
                self.table
            ),
            params![master_key, iteration],
            row_to_record,
        )
        .optional()
        .map_err(|err| ledger_error("ledger.query", "failed to read trial row", err))
    }

    /// Every row in the table, ordered by key and iteration.
    pub fn all_trials(&self) -> Result<Vec<TrialRecord>, AnaphaseError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                r#"SELECT variant, iteration, "commit", opened_at, cpu_time, results, filename
                 FROM "{}" ORDER BY variant, iteration"#,
                self.table
            ))
            .map_err(|err| ledger_error("ledger.query", "failed to prepare trial scan", err))?;
        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|err| ledger_error("ledger.query", "failed to scan trials", err))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|err| ledger_error("ledger.query", "failed to read trial row", err))
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<TrialRecord, rusqlite::Error> {
    Ok(TrialRecord {
        variant: row.get(0)?,
        iteration: row.get(1)?,
        source_id: row.get(2)?,
        opened_at: row.get(3)?,
        cpu_time: row.get(4)?,
        results: row.get(5)?,
        filename: row.get(6)?,
    })
}

fn ledger_error(code: &str, message: &str, err: impl ToString) -> AnaphaseError {
    AnaphaseError::Ledger(ErrorInfo::new(code, message).with_hint(err.to_string()))
}

/// Experiment and group names are embedded in table identifiers, so only
/// alphanumerics and underscores pass through.
pub(crate) fn sanitize_identifier(name: &str) -> Result<&str, AnaphaseError> {
    if !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(name)
    } else {
        Err(AnaphaseError::Ledger(
            ErrorInfo::new("ledger.bad_identifier", "invalid table identifier")
                .with_context("name", name)
                .with_hint("use ASCII alphanumerics and underscores"),
        ))
    }
}
