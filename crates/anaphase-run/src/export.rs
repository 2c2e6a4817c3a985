//! Artifact export contract and the raw-record exporter.

use std::fs;
use std::path::{Path, PathBuf};

use anaphase_core::errors::{AnaphaseError, ErrorInfo};
use anaphase_ledger::TrialRecord;
use serde::{Deserialize, Serialize};

/// Output document kinds a run may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Human-viewable rich document. Requires an exporter that supports it.
    Document,
    /// Raw trial record dumped as JSON.
    #[default]
    Raw,
    /// No artifact file; the ledger row records no filename.
    None,
}

/// Converts a finished trial record into a viewer-facing artifact.
/// External collaborator: the orchestrator consumes this contract and
/// records the returned filename on the ledger row.
pub trait ArtifactExporter {
    /// Writes the artifact for `record`, returning its path, or `None`
    /// when `format` requests no output.
    fn export(
        &self,
        record: &TrialRecord,
        format: ExportFormat,
        out_dir: &Path,
    ) -> Result<Option<PathBuf>, AnaphaseError>;
}

/// Exporter shipping with the orchestrator: dumps the closed record as
/// pretty JSON. Rich document rendering lives outside this system.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawRecordExporter;

impl ArtifactExporter for RawRecordExporter {
    fn export(
        &self,
        record: &TrialRecord,
        format: ExportFormat,
        out_dir: &Path,
    ) -> Result<Option<PathBuf>, AnaphaseError> {
        match format {
            ExportFormat::None => Ok(None),
            ExportFormat::Document => Err(AnaphaseError::Execution(
                ErrorInfo::new(
                    "export.unsupported_format",
                    "document export requires an external exporter",
                )
                .with_hint("use ExportFormat::Raw or plug in a document exporter"),
            )),
            ExportFormat::Raw => {
                let path = out_dir.join(format!(
                    "trial_{}_{}.json",
                    record.variant, record.iteration
                ));
                let body = serde_json::to_vec_pretty(record).map_err(|err| {
                    AnaphaseError::Execution(
                        ErrorInfo::new("export.encode", "failed to encode trial record")
                            .with_hint(err.to_string()),
                    )
                })?;
                fs::write(&path, body).map_err(|err| {
                    AnaphaseError::Execution(
                        ErrorInfo::new("export.write", "failed to write trial artifact")
                            .with_context("path", path.display().to_string())
                            .with_hint(err.to_string()),
                    )
                })?;
                Ok(Some(path))
            }
        }
    }
}
