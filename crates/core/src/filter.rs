//! Include/exclude name patterns for artifact selection.

use crate::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Glob-based artifact name filter.
///
/// An empty include list matches every name. Exclusions always win.
/// Matching is case-insensitive since artifact names are conventionally
/// written in mixed case (`Windows.Sysinternals.Autoruns`).
#[derive(Debug, Clone)]
pub struct NameFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl Default for NameFilter {
    fn default() -> Self {
        Self::all()
    }
}

impl NameFilter {
    /// Filter that accepts everything.
    #[must_use]
    pub fn all() -> Self {
        Self {
            include: None,
            exclude: None,
        }
    }

    /// Build a filter from include and exclude patterns.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid glob pattern.
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_set(include)?,
            exclude: build_set(exclude)?,
        })
    }

    /// Whether `name` passes the filter.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(name) {
                return false;
            }
        }
        self.include.as_ref().is_none_or(|set| set.is_match(name))
    }
}

fn build_set(patterns: &[String]) -> Result<Option<GlobSet>> {
    let patterns: Vec<&str> = patterns
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(false)
            .build()
            .map_err(|e| Error::configuration(format!("Invalid name pattern '{pattern}': {e}")))?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| Error::configuration(format!("Failed to build name filter: {e}")))?;
    Ok(Some(set))
}
