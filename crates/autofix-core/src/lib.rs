//! Autofix Core - Remediation orchestrator
//!
//! Drives one pipeline towards a passing run:
//! - Fetches the latest completed run and classifies its log
//! - Picks one remedy per iteration, consulting the ledger first
//! - Applies it through the patch engine and publishes the result
//! - Records every outcome so no remedy is retried after it failed
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use autofix_core::{Orchestrator, RemedyConfig, SessionStatus};
//! use autofix_ledger::{FixHistoryLedger, SystemClock};
//!
//! # fn example(ci: impl autofix_core::CiClient + 'static, publisher: impl autofix_core::Publisher + 'static)
//! #     -> Result<(), Box<dyn std::error::Error>> {
//! let config = RemedyConfig::load("autofix.toml")?;
//! let ledger = FixHistoryLedger::open(".autofix/ledger.json")?;
//! let mut orchestrator = Orchestrator::new(config, ci, publisher, ledger, Arc::new(SystemClock))?;
//!
//! let report = orchestrator.run_until_settled()?;
//! assert_eq!(report.status, SessionStatus::Success);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod collab;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod selection;
pub mod structural;

pub use collab::{
    CiClient, ContextBundle, Publisher, RunConclusion, RunInfo, RunStatus, StepResult,
    SuggestionOracle,
};
pub use config::{
    FetchConfig, PathsConfig, PollingConfig, PublishConfig, RemedyConfig, StructuralConfig,
    SuggestionConfig,
};
pub use error::{CollaboratorError, RemedyError, RemedyResult};
pub use orchestrator::{
    reset_signature, AppliedRemedy, Orchestrator, RunReport, SessionStatus, RESET_REMEDY,
};
pub use retry::{PollPolicy, RetryPolicy};
pub use selection::{local_candidates, parse_suggestion, suggestion_id, Remedy, RemedySource};
pub use structural::{DependencyPin, StructuralFix, StructuralFixer};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving the orchestrator
    pub use crate::{
        CiClient, Orchestrator, Publisher, RemedyConfig, RemedyError, RemedyResult, RunReport,
        SessionStatus, SuggestionOracle,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
