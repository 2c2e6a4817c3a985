#![deny(missing_docs)]
#![doc = "SQLite-backed trial ledger and variant registry for anaphase runs."]

pub mod trials;
pub mod variants;

pub use trials::{TrialLedger, TrialRecord};
pub use variants::{register_variant, stored_variant};
