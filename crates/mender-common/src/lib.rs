//! Shared domain vocabulary for the Mender pipeline.
//!
//! These types cross every boundary in the system: the stage adapters
//! produce them, the run state stores them, and the HTTP surface serialises
//! them verbatim. They carry no behaviour beyond parsing and display.

pub mod finding;
pub mod language;
pub mod run_id;
pub mod stage;
pub mod validation;

pub use finding::{Edit, Finding, FindingKind};
pub use language::{Language, UnsupportedLanguage};
pub use run_id::RunId;
pub use stage::Stage;
pub use validation::{
    UnknownValidationStatus, ValidationCheck, ValidationResult, ValidationStatus,
};
