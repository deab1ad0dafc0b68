//! Autofix Pipeline - Document model and patch engine
//!
//! Structural representation of the one workflow shape autofix manages:
//! - [`PipelineDocument`]: metadata, trigger, runner and ordered [`Step`]s
//! - [`Phase`]: preparation, build, verification, publish ordering
//! - [`DocumentPolicy`]: golden steps, valid runners, baseline document
//! - [`PatchEngine`]: idempotent, protection-aware application of one remedy
//!
//! # Example
//!
//! ```rust
//! use autofix_pipeline::{DocumentPolicy, PatchEngine, PatchRequest, PipelineDocument, Unguarded};
//!
//! let policy = DocumentPolicy::default().with_golden_steps(["Build APK"]);
//! let doc = PipelineDocument::parse(
//!     "on: push\njobs:\n  build:\n    runs-on: ubuntu-latest\n    steps:\n      - name: Build APK\n        run: make\n",
//!     &policy,
//! )
//! .unwrap();
//!
//! let engine = PatchEngine::new(policy);
//! let fragment = serde_yaml::from_str("name: Clean Disk Space\nrun: df -h\n").unwrap();
//! let patched = engine
//!     .apply(&doc, &PatchRequest::add("Clean Disk Space", fragment), &Unguarded)
//!     .unwrap();
//! assert_eq!(patched.identities(), vec!["Clean Disk Space", "Build APK"]);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod document;
pub mod error;
pub mod guard;
pub mod hash;
pub mod patch;
pub mod phase;
pub mod policy;
pub mod step;

pub use document::{PipelineDocument, MAX_NESTING};
pub use error::{DocumentError, DocumentResult, PatchError, PatchResult};
pub use guard::{StepGuard, Unguarded};
pub use hash::{Fingerprint, FingerprintError};
pub use patch::{unwrap_fragment, PatchEngine, PatchMode, PatchRequest};
pub use phase::Phase;
pub use policy::{DocumentPolicy, BASELINE_YAML};
pub use step::{Step, StepError};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with pipeline documents
    pub use crate::{
        DocumentPolicy, PatchEngine, PatchError, PatchMode, PatchRequest, Phase,
        PipelineDocument, Step, StepGuard,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
