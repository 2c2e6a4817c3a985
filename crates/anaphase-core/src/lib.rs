#![deny(missing_docs)]
#![doc = "Canonical parameter identity for reproducible experiment trials."]

pub mod canon;
pub mod errors;
pub mod params;
pub mod snapshot;
pub mod value;

pub use canon::{canonicalize, validate_func, FuncRejection};
pub use errors::{AnaphaseError, ErrorInfo};
pub use params::{master_variant_key, ModuleBinding, Parameter};
pub use snapshot::{DebugSnapshot, SourceSnapshot, DEBUG_SOURCE_ID};
pub use value::{FuncRef, ModuleIndex, ParamValue};
