//! Recoverable problems recorded during a run.
//!
//! Warnings never abort a run. They are collected on the
//! [`RunContext`](crate::RunContext) and listed in full in action results and
//! in the package manifest.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A recoverable problem observed by one of the pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Warning {
    /// Artifact file could not be read or parsed and was skipped.
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
    /// Artifact was recovered by the best-effort legacy extractor.
    LegacyFallback {
        /// File that needed the fallback.
        path: PathBuf,
        /// Name recovered from the text.
        artifact: String,
    },
    /// Two files declare the same artifact name; the later one was skipped.
    DuplicateArtifact {
        /// Artifact name.
        artifact: String,
        /// The skipped file.
        path: PathBuf,
    },
    /// Same canonical URL declared with different expected hashes.
    ReferenceConflict {
        /// Canonical URL.
        url: String,
        /// Hash that was kept (first declared).
        kept: String,
        /// Hash that was ignored.
        ignored: String,
        /// Artifact carrying the ignored declaration.
        artifact: String,
    },
    /// Same declared tool name maps to different canonical URLs.
    NameConflict {
        /// Declared tool name.
        name: String,
        /// URL that was kept (first declared).
        kept: String,
        /// URL that was redirected.
        ignored: String,
        /// Artifact carrying the ignored declaration.
        artifact: String,
    },
    /// A reference could not be turned into a fetchable URL.
    UnresolvableReference {
        /// Artifact carrying the reference.
        artifact: String,
        /// Tool name or raw text.
        reference: String,
        /// Why it was dropped.
        reason: String,
    },
    /// A declared expected hash is not a SHA-256 hex digest and was ignored.
    InvalidExpectedHash {
        /// Artifact carrying the declaration.
        artifact: String,
        /// Tool URL.
        url: String,
        /// The rejected value.
        value: String,
    },
    /// A tool was downloaded without a pre-declared hash.
    MissingExpectedHash {
        /// Canonical URL.
        url: String,
        /// Hash computed from the first download.
        computed: String,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { path, message } => {
                write!(f, "skipped {}: {message}", path.display())
            }
            Self::LegacyFallback { path, artifact } => write!(
                f,
                "{} could not be parsed; recovered artifact '{artifact}' with legacy text extraction",
                path.display()
            ),
            Self::DuplicateArtifact { artifact, path } => write!(
                f,
                "artifact '{artifact}' in {} duplicates an earlier definition and was skipped",
                path.display()
            ),
            Self::ReferenceConflict {
                url,
                kept,
                ignored,
                artifact,
            } => write!(
                f,
                "conflicting expected hash for {url} in '{artifact}': kept {kept}, ignored {ignored}"
            ),
            Self::NameConflict {
                name,
                kept,
                ignored,
                artifact,
            } => write!(
                f,
                "tool name '{name}' in '{artifact}' points at {ignored}; first declaration {kept} wins"
            ),
            Self::UnresolvableReference {
                artifact,
                reference,
                reason,
            } => write!(f, "tool '{reference}' in '{artifact}' skipped: {reason}"),
            Self::InvalidExpectedHash {
                artifact,
                url,
                value,
            } => write!(
                f,
                "ignored invalid expected hash '{value}' for {url} in '{artifact}'"
            ),
            Self::MissingExpectedHash { url, computed } => write!(
                f,
                "no expected hash declared for {url}; first download defines sha256 {computed}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_display_conflict() {
        let w = Warning::ReferenceConflict {
            url: "https://example.com/a.exe".into(),
            kept: "aa".into(),
            ignored: "bb".into(),
            artifact: "Windows.Test".into(),
        };
        let s = w.to_string();
        assert!(s.contains("kept aa"));
        assert!(s.contains("Windows.Test"));
    }

    #[test]
    fn test_warning_serialization_is_tagged() {
        let w = Warning::MissingExpectedHash {
            url: "https://example.com/a.exe".into(),
            computed: "abc".into(),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains("\"kind\":\"missingExpectedHash\""));
    }
}
