//! Tool reference canonicalization and conflict handling.

use crate::artifact::{ArtifactDefinition, ReferenceOrigin};
use crate::graph::ToolKey;
use crate::hash::normalize_digest;
use crate::{ConflictPolicy, RunContext, Warning};
use miette::Diagnostic;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

/// Prefix of tool paths inside an Offline package.
pub const LOCAL_TOOL_PREFIX: &str = "tools/";

/// Reasons a reference cannot be canonicalized.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum NormalizeError {
    /// No `scheme://` separator.
    #[error("'{url}' is not an absolute URL")]
    #[diagnostic(code(artools::core::url::scheme))]
    MissingScheme {
        /// The rejected input.
        url: String,
    },
    /// Scheme contains characters outside `[A-Za-z0-9+.-]`.
    #[error("'{url}' has an invalid scheme")]
    #[diagnostic(code(artools::core::url::scheme))]
    InvalidScheme {
        /// The rejected input.
        url: String,
    },
    /// Nothing between `://` and the path.
    #[error("'{url}' has no host")]
    #[diagnostic(code(artools::core::url::host))]
    MissingHost {
        /// The rejected input.
        url: String,
    },
}

/// Whether `reference` points at a tool embedded in a package.
#[must_use]
pub fn is_local_reference(reference: &str) -> bool {
    let trimmed = reference.trim();
    !trimmed.contains("://") && trimmed.replace('\\', "/").starts_with(LOCAL_TOOL_PREFIX)
}

/// Canonicalize a tool URL for deduplication.
///
/// Scheme and host are lower-cased, a default port is dropped, the fragment
/// is stripped and an empty path becomes `/`. Path and query are preserved
/// verbatim. Package-local `tools/<file>` references canonicalize to
/// themselves.
///
/// # Errors
///
/// Returns a [`NormalizeError`] if `raw` is neither an absolute URL nor a
/// package-local tool path.
pub fn canonicalize_url(raw: &str) -> Result<String, NormalizeError> {
    let trimmed = raw.trim();
    if is_local_reference(trimmed) {
        return Ok(trimmed.replace('\\', "/"));
    }

    let (scheme, rest) = trimmed
        .split_once("://")
        .ok_or_else(|| NormalizeError::MissingScheme {
            url: trimmed.to_string(),
        })?;
    if scheme.is_empty()
        || !scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    {
        return Err(NormalizeError::InvalidScheme {
            url: trimmed.to_string(),
        });
    }
    let scheme = scheme.to_ascii_lowercase();

    let rest = rest.split('#').next().unwrap_or_default();
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);

    let (userinfo, host) = authority
        .rsplit_once('@')
        .map_or((None, authority), |(user, host)| (Some(user), host));
    let mut host = host.to_ascii_lowercase();
    if host.is_empty() {
        return Err(NormalizeError::MissingHost {
            url: trimmed.to_string(),
        });
    }
    let default_port = match scheme.as_str() {
        "http" => Some(":80"),
        "https" => Some(":443"),
        _ => None,
    };
    if let Some(port) = default_port {
        if let Some(stripped) = host.strip_suffix(port) {
            host = stripped.to_string();
        }
    }

    let mut canonical = format!("{scheme}://");
    if let Some(user) = userinfo {
        canonical.push_str(user);
        canonical.push('@');
    }
    canonical.push_str(&host);
    if !tail.starts_with('/') {
        canonical.push('/');
    }
    canonical.push_str(tail);
    Ok(canonical)
}

/// A tool reference after canonicalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedReference {
    /// Canonical URL.
    pub key: ToolKey,
    /// Declared (or inferred) tool name.
    pub name: String,
    /// Validated lower-case SHA-256, if declared.
    pub expected_hash: Option<String>,
    /// Artifact carrying the reference.
    pub source_artifact: String,
    /// Where the reference was found.
    pub origin: ReferenceOrigin,
}

/// Output of [`Normalizer::normalize`].
#[derive(Debug, Clone, Default)]
pub struct NormalizeOutput {
    /// References in input order.
    pub references: Vec<NormalizedReference>,
    /// Conflicts observed (hash and name), whatever the policy.
    pub conflicts: usize,
}

impl NormalizeOutput {
    /// Whether the run must stop under `policy`.
    #[must_use]
    pub fn rejected(&self, policy: ConflictPolicy) -> bool {
        policy == ConflictPolicy::Strict && self.conflicts > 0
    }
}

/// Turns raw tool references into canonical keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    policy: ConflictPolicy,
}

impl Normalizer {
    /// Create a normalizer with the given conflict policy.
    #[must_use]
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Normalize every reference of every artifact.
    ///
    /// Conflicts keep the first declaration. Under
    /// [`ConflictPolicy::FirstDeclared`] they are recorded as warnings; under
    /// [`ConflictPolicy::Strict`] they are recorded as errors and counted in
    /// [`NormalizeOutput::conflicts`] so the caller can stop.
    pub fn normalize(
        &self,
        artifacts: &[ArtifactDefinition],
        ctx: &mut RunContext,
    ) -> NormalizeOutput {
        let mut output = NormalizeOutput::default();
        // First declared hash per key, with the artifact that declared it.
        let mut hashes: HashMap<ToolKey, String> = HashMap::new();
        // First URL per declared tool-section name (case-insensitive).
        let mut names: HashMap<String, ToolKey> = HashMap::new();

        for artifact in artifacts {
            for reference in &artifact.tool_references {
                if is_local_reference(&reference.url) {
                    ctx.warn(Warning::UnresolvableReference {
                        artifact: artifact.name.clone(),
                        reference: reference.url.clone(),
                        reason: "refers to a tool already embedded in a package".into(),
                    });
                    continue;
                }

                let mut key = match canonicalize_url(&reference.url) {
                    Ok(url) => ToolKey::new(url),
                    Err(e) => {
                        ctx.warn(Warning::UnresolvableReference {
                            artifact: artifact.name.clone(),
                            reference: reference.url.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                let expected_hash = match reference.expected_hash.as_deref() {
                    None => None,
                    Some(raw) => {
                        let digest = normalize_digest(raw);
                        if digest.is_none() {
                            ctx.warn(Warning::InvalidExpectedHash {
                                artifact: artifact.name.clone(),
                                url: key.to_string(),
                                value: raw.to_string(),
                            });
                        }
                        digest
                    }
                };

                if reference.origin == ReferenceOrigin::ToolSection {
                    let name_key = reference.declared_name.to_lowercase();
                    match names.get(&name_key) {
                        Some(first) if *first != key => {
                            output.conflicts += 1;
                            self.record(
                                ctx,
                                Warning::NameConflict {
                                    name: reference.declared_name.clone(),
                                    kept: first.to_string(),
                                    ignored: key.to_string(),
                                    artifact: artifact.name.clone(),
                                },
                            );
                            key = first.clone();
                        }
                        Some(_) => {}
                        None => {
                            names.insert(name_key, key.clone());
                        }
                    }
                }

                let expected_hash = match (hashes.get(&key), expected_hash) {
                    (Some(kept), Some(declared)) if *kept != declared => {
                        output.conflicts += 1;
                        self.record(
                            ctx,
                            Warning::ReferenceConflict {
                                url: key.to_string(),
                                kept: kept.clone(),
                                ignored: declared,
                                artifact: artifact.name.clone(),
                            },
                        );
                        Some(kept.clone())
                    }
                    (Some(kept), _) => Some(kept.clone()),
                    (None, Some(declared)) => {
                        hashes.insert(key.clone(), declared.clone());
                        Some(declared)
                    }
                    (None, None) => None,
                };

                debug!(
                    artifact = %artifact.name,
                    url = %key,
                    name = %reference.declared_name,
                    "Normalized tool reference"
                );
                output.references.push(NormalizedReference {
                    key,
                    name: reference.declared_name.clone(),
                    expected_hash,
                    source_artifact: artifact.name.clone(),
                    origin: reference.origin,
                });
            }
        }

        info!(
            references = output.references.len(),
            conflicts = output.conflicts,
            policy = %self.policy,
            "Normalized tool references"
        );
        output
    }

    fn record(&self, ctx: &mut RunContext, warning: Warning) {
        match self.policy {
            ConflictPolicy::FirstDeclared => ctx.warn(warning),
            ConflictPolicy::Strict => ctx.error(warning.to_string()),
        }
    }
}
