//! Step phases
//!
//! Every step belongs to exactly one [`Phase`]. After a patch the step list
//! is stably re-sorted by phase so that preparation runs before the build,
//! verification after it, and artifact publishing last.

use serde::{Deserialize, Serialize};

const PUBLISH_KEYWORDS: &[&str] = &["upload", "save build log", "save ", "publish", "deploy"];

const VERIFICATION_KEYWORDS: &[&str] = &["verify", "validate", "check disk space after", "after build"];

const PREPARATION_KEYWORDS: &[&str] = &[
    "set up",
    "setup",
    "install",
    "configure",
    "download",
    "initialize",
    "prepare",
    "clean",
    "check disk",
    "check network",
    "accept",
    "update",
    "checkout",
];

const BUILD_KEYWORDS: &[&str] = &["build", "compile", "assemble"];

/// Execution phase of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Environment setup, dependency installation, cleanup, network checks
    Preparation,
    /// The build itself
    Build,
    /// Checks on build output
    Verification,
    /// Artifact upload and log saving
    Publish,
}

impl Phase {
    /// Classify a step by its identity
    ///
    /// Publish and verification keywords win over preparation keywords so that
    /// "Check Disk Space After Build" verifies and "Save Build Log" publishes.
    /// Preparation wins over build so that "Install Buildozer" prepares.
    /// Anything unrecognised is preparation.
    #[must_use]
    pub fn classify(identity: &str) -> Self {
        let lowered = identity.to_lowercase();
        let has = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

        if has(PUBLISH_KEYWORDS) {
            Self::Publish
        } else if has(VERIFICATION_KEYWORDS) {
            Self::Verification
        } else if has(PREPARATION_KEYWORDS) {
            Self::Preparation
        } else if has(BUILD_KEYWORDS) {
            Self::Build
        } else {
            Self::Preparation
        }
    }

    /// Lowercase label
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preparation => "preparation",
            Self::Build => "build",
            Self::Verification => "verification",
            Self::Publish => "publish",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_steps() {
        assert_eq!(Phase::classify("Install Android SDK Tools"), Phase::Preparation);
        assert_eq!(Phase::classify("Set up JDK 17"), Phase::Preparation);
        assert_eq!(Phase::classify("Clean Disk Space"), Phase::Preparation);
        assert_eq!(Phase::classify("Build APK"), Phase::Build);
        assert_eq!(Phase::classify("Verify Build Log"), Phase::Verification);
        assert_eq!(Phase::classify("Check Disk Space After Build"), Phase::Verification);
        assert_eq!(Phase::classify("Save Build Log"), Phase::Publish);
        assert_eq!(Phase::classify("Upload APK"), Phase::Publish);
    }

    #[test]
    fn preparation_beats_build_keyword() {
        assert_eq!(Phase::classify("Install Buildozer"), Phase::Preparation);
        assert_eq!(Phase::classify("Initialize Buildozer"), Phase::Preparation);
    }

    #[test]
    fn uses_references_classify_by_action() {
        assert_eq!(Phase::classify("actions/checkout@v4"), Phase::Preparation);
        assert_eq!(Phase::classify("actions/upload-artifact@v4"), Phase::Publish);
    }

    #[test]
    fn unknown_defaults_to_preparation() {
        assert_eq!(Phase::classify("Set Custom Temp Directory"), Phase::Preparation);
        assert_eq!(Phase::classify("Something else"), Phase::Preparation);
    }

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::Preparation < Phase::Build);
        assert!(Phase::Build < Phase::Verification);
        assert!(Phase::Verification < Phase::Publish);
    }
}
