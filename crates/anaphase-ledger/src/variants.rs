//! Write-once variant registry, one lookup table per argument name.

use anaphase_core::canonicalize;
use anaphase_core::errors::{AnaphaseError, ErrorInfo};
use anaphase_core::{ModuleIndex, Parameter};
use rusqlite::{params, Connection, OptionalExtension};

use crate::trials::{sanitize_identifier, TrialLedger};

/// Registers a parameter's variant id against its canonical value string.
///
/// First use of a (argument, variant id) pair inserts the row; later
/// registrations must canonicalize to the identical string or the run is
/// rejected with a variant conflict. Re-registration with the same value
/// is idempotent. This is the only code path that writes variant tables.
pub fn register_variant(
    ledger: &TrialLedger,
    param: &Parameter,
    index: &ModuleIndex,
) -> Result<(), AnaphaseError> {
    let canonical = canonicalize(param.value(), index)?;
    let conn = ledger.connect()?;
    let table = variant_table(&conn, param.arg_name())?;
    match stored_params(&conn, &table, param.variant())? {
        None => {
            conn.execute(
                &format!(r#"INSERT INTO "{table}" (name, params) VALUES (?1, ?2)"#),
                params![param.variant(), canonical],
            )
            .map_err(|err| {
                AnaphaseError::Ledger(
                    ErrorInfo::new("ledger.variant_insert", "failed to insert variant row")
                        .with_context("arg_name", param.arg_name())
                        .with_context("variant", param.variant())
                        .with_hint(err.to_string()),
                )
            })?;
            tracing::debug!(
                arg_name = param.arg_name(),
                variant = param.variant(),
                "variant registered"
            );
            Ok(())
        }
        Some(stored) if stored == canonical => Ok(()),
        Some(stored) => Err(AnaphaseError::VariantConflict(
            ErrorInfo::new(
                "ledger.variant_conflict",
                format!(
                    "variant '{}' of argument '{}' is already registered with a different value",
                    param.variant(),
                    param.arg_name()
                ),
            )
            .with_context("arg_name", param.arg_name())
            .with_context("variant", param.variant())
            .with_context("stored", stored)
            .with_context("attempted", canonical)
            .with_hint("pick a new variant id for the new value"),
        )),
    }
}

/// Canonical string stored for a (argument, variant id) pair, if any.
pub fn stored_variant(
    ledger: &TrialLedger,
    arg_name: &str,
    variant: &str,
) -> Result<Option<String>, AnaphaseError> {
    let conn = ledger.connect()?;
    let table = variant_table(&conn, arg_name)?;
    stored_params(&conn, &table, variant)
}

/// Ensures the per-argument lookup table exists and returns its name.
fn variant_table(conn: &Connection, arg_name: &str) -> Result<String, AnaphaseError> {
    let table = format!("variant_{}", sanitize_identifier(arg_name)?);
    conn.execute_batch(&format!(
        r#"CREATE TABLE IF NOT EXISTS "{table}" (
            name TEXT PRIMARY KEY,
            params TEXT NOT NULL
        );"#
    ))
    .map_err(|err| {
        AnaphaseError::Ledger(
            ErrorInfo::new("ledger.variant_table", "failed to create variant table")
                .with_context("arg_name", arg_name)
                .with_hint(err.to_string()),
        )
    })?;
    Ok(table)
}

fn stored_params(
    conn: &Connection,
    table: &str,
    variant: &str,
) -> Result<Option<String>, AnaphaseError> {
    conn.query_row(
        &format!(r#"SELECT params FROM "{table}" WHERE name = ?"#),
        params![variant],
        |row| row.get(0),
    )
    .optional()
    .map_err(|err| {
        AnaphaseError::Ledger(
            ErrorInfo::new("ledger.variant_lookup", "failed to read variant row")
                .with_hint(err.to_string()),
        )
    })
}
