//! Autofix Analyzer - Failure classification
//!
//! Extracts classified error events from raw CI run logs and structured
//! annotations:
//! - [`Catalog`]: ordered, append-only `{matcher, remedy}` rules
//! - [`LogAnalyzer`]: traceback-aware scanning with umbrella suppression
//! - [`ErrorSignature`]: run-independent failure keys
//! - [`CandidatePattern`]: uncovered failure lines for catalog growth
//!
//! # Example
//!
//! ```rust
//! use autofix_analyzer::{Catalog, LogAnalyzer};
//!
//! let catalog = Catalog::builtin().unwrap();
//! let analysis = LogAnalyzer::default().analyze(
//!     "2024-05-01T10:00:00Z sdkmanager: command not found\n",
//!     &[],
//!     &catalog,
//! );
//! assert_eq!(analysis.events.len(), 1);
//! assert_eq!(analysis.events[0].pattern_id.as_deref(), Some("sdkmanager-missing"));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod analyzer;
pub mod catalog;
pub mod error;
pub mod event;
pub mod signature;

pub use analyzer::{AnalyzerConfig, Analysis, CandidatePattern, LogAnalyzer};
pub use catalog::{Catalog, RemedyRule, RuleOrigin, StepRemedy, BUILTIN_CATALOG_YAML};
pub use error::{CatalogError, CatalogResult};
pub use event::{Annotation, AnnotationLevel, ErrorEvent, EventKind, EventSource};
pub use signature::ErrorSignature;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for log analysis
    pub use crate::{
        Analysis, Annotation, Catalog, ErrorEvent, ErrorSignature, EventKind, LogAnalyzer,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
