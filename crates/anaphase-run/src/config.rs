//! Run configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::export::ExportFormat;

/// Options governing one trial run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Debug runs bypass the ledger entirely: no variant registration, no
    /// trial rows, iteration pinned to 0 and a random trial-folder suffix.
    #[serde(default)]
    pub debug: bool,
    /// Optional grouping to segregate trials sharing experiment code.
    #[serde(default)]
    pub group: Option<String>,
    /// SQLite store filename, resolved under `trials_folder`.
    #[serde(default = "default_logfile")]
    pub logfile: String,
    /// Folder holding the store and per-run trial folders.
    #[serde(default = "default_trials_folder")]
    pub trials_folder: PathBuf,
    /// Artifact export format for finished trials.
    #[serde(default)]
    pub export: ExportFormat,
    /// Argument names excluded from variant registration. Their variant
    /// ids still participate in the master key.
    #[serde(default)]
    pub untracked_params: Vec<String>,
}

fn default_logfile() -> String {
    "trials.db".to_string()
}

fn default_trials_folder() -> PathBuf {
    PathBuf::from("trials")
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            debug: false,
            group: None,
            logfile: default_logfile(),
            trials_folder: default_trials_folder(),
            export: ExportFormat::default(),
            untracked_params: Vec::new(),
        }
    }
}
