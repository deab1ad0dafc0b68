//! Autofix Ledger - Fix history
//!
//! Durable record of which remedies were tried against which failure
//! signatures, how each attempt ended, and which pipeline steps were
//! verified in a real run. Verified steps are protected: the ledger is a
//! [`StepGuard`](autofix_pipeline::StepGuard) the patch engine consults
//! before touching a step.
//!
//! The ledger is rewritten as a full snapshot after every mutation.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod clock;
pub mod error;
pub mod ledger;
pub mod record;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{FixHistoryLedger, PendingRemedy};
pub use record::{
    AnalyzedRun, Attempt, HistoryEntry, LedgerRecord, Outcome, SessionState, SignatureHistory,
    StepConclusion, StepStatus, SCHEMA_VERSION,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for ledger users
    pub use crate::{Clock, FixHistoryLedger, Outcome, StepConclusion};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
