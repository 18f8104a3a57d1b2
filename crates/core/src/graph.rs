//! Bipartite artifact ↔ tool dependency graph.
//!
//! All maps are ordered so that serializing the graph is deterministic:
//! artifacts sort by name, tools by canonical URL. Two scans of an unchanged
//! corpus therefore serialize to byte-identical JSON.

use crate::artifact::ArtifactDefinition;
use crate::normalize::NormalizedReference;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::info;

/// Canonical URL identifying a tool in the graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolKey(String);

impl ToolKey {
    /// Wrap an already canonical URL.
    #[must_use]
    pub fn new(canonical_url: impl Into<String>) -> Self {
        Self(canonical_url.into())
    }

    /// The canonical URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ToolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ToolKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One deduplicated tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolNode {
    /// Canonical URL.
    pub key: ToolKey,
    /// First declared name.
    pub name: String,
    /// First declared (or pinned) expected hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    /// Artifacts referencing this tool.
    pub referenced_by: BTreeSet<String>,
}

/// Artifact → tools mapping plus the deduplicated tool records.
///
/// Every tool key appears in exactly one [`ToolNode`]. The inverse mapping
/// (tool → artifacts) is [`ToolNode::referenced_by`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyGraph {
    artifacts: BTreeMap<String, BTreeSet<ToolKey>>,
    tools: BTreeMap<ToolKey, ToolNode>,
}

impl DependencyGraph {
    /// Build the graph from scanned artifacts and their normalized references.
    ///
    /// Artifacts without references are present with an empty tool set.
    #[must_use]
    pub fn build(artifacts: &[ArtifactDefinition], references: &[NormalizedReference]) -> Self {
        let mut graph = Self::default();
        for artifact in artifacts {
            graph.artifacts.entry(artifact.name.clone()).or_default();
        }

        for reference in references {
            graph
                .artifacts
                .entry(reference.source_artifact.clone())
                .or_default()
                .insert(reference.key.clone());

            let node = graph
                .tools
                .entry(reference.key.clone())
                .or_insert_with(|| ToolNode {
                    key: reference.key.clone(),
                    name: reference.name.clone(),
                    expected_hash: None,
                    referenced_by: BTreeSet::new(),
                });
            if node.expected_hash.is_none() {
                node.expected_hash.clone_from(&reference.expected_hash);
            }
            node.referenced_by.insert(reference.source_artifact.clone());
        }

        info!(
            artifacts = graph.artifact_count(),
            tools = graph.tool_count(),
            "Built dependency graph"
        );
        graph
    }

    /// Number of artifacts.
    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.artifacts.len()
    }

    /// Number of deduplicated tools.
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Artifact names in sorted order.
    pub fn artifact_names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    /// Tool nodes in canonical URL order.
    pub fn tools(&self) -> impl Iterator<Item = &ToolNode> {
        self.tools.values()
    }

    /// Tool node for `key`.
    #[must_use]
    pub fn tool(&self, key: &ToolKey) -> Option<&ToolNode> {
        self.tools.get(key)
    }

    /// Tools referenced by `artifact`.
    #[must_use]
    pub fn tools_for(&self, artifact: &str) -> Option<&BTreeSet<ToolKey>> {
        self.artifacts.get(artifact)
    }

    /// Artifacts referencing `key`.
    #[must_use]
    pub fn artifacts_for(&self, key: &ToolKey) -> Option<&BTreeSet<String>> {
        self.tools.get(key).map(|node| &node.referenced_by)
    }

    /// Union of the tools needed by the selected artifacts.
    ///
    /// Unknown artifact names contribute nothing.
    pub fn closure<'a, I>(&self, selected: I) -> BTreeSet<ToolKey>
    where
        I: IntoIterator<Item = &'a str>,
    {
        selected
            .into_iter()
            .filter_map(|name| self.artifacts.get(name))
            .flat_map(|keys| keys.iter().cloned())
            .collect()
    }

    /// Adopt hashes pinned by a previous manifest for tools with none declared.
    ///
    /// Declared hashes always win over pins. Returns the number of tools
    /// that adopted a pin.
    pub fn apply_pins(&mut self, pins: &BTreeMap<String, String>) -> usize {
        let mut applied = 0;
        for node in self.tools.values_mut() {
            if node.expected_hash.is_some() {
                continue;
            }
            if let Some(hash) = pins.get(node.key.as_str()) {
                node.expected_hash = Some(hash.clone());
                applied += 1;
            }
        }
        if applied > 0 {
            info!(pinned = applied, "Applied manifest hash pins");
        }
        applied
    }

    /// Deterministic pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if JSON encoding fails.
    pub fn to_canonical_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{ArtifactKind, ParseMode, ReferenceOrigin};
    use std::path::PathBuf;

    fn artifact(name: &str) -> ArtifactDefinition {
        ArtifactDefinition {
            name: name.into(),
            description: String::new(),
            kind: ArtifactKind::Client,
            tool_references: Vec::new(),
            source_path: PathBuf::from(format!("{name}.yaml")),
            parse_mode: ParseMode::Structured,
            raw_text: String::new(),
        }
    }

    fn reference(artifact: &str, url: &str, hash: Option<&str>) -> NormalizedReference {
        NormalizedReference {
            key: ToolKey::new(url),
            name: url.rsplit('/').next().unwrap_or_default().into(),
            expected_hash: hash.map(String::from),
            source_artifact: artifact.into(),
            origin: ReferenceOrigin::ToolSection,
        }
    }

    #[test]
    fn test_build_dedups_tools() {
        let artifacts = vec![artifact("A1"), artifact("A2"), artifact("B1"), artifact("Empty")];
        let refs = vec![
            reference("A1", "https://x/a", None),
            reference("A2", "https://x/a", Some("h")),
            reference("B1", "https://x/b", None),
        ];
        let graph = DependencyGraph::build(&artifacts, &refs);

        assert_eq!(graph.artifact_count(), 4);
        assert_eq!(graph.tool_count(), 2);
        let a = graph.tool(&ToolKey::new("https://x/a")).unwrap();
        assert_eq!(a.referenced_by.len(), 2);
        assert_eq!(a.expected_hash.as_deref(), Some("h"));
        assert!(graph.tools_for("Empty").unwrap().is_empty());
    }

    #[test]
    fn test_closure() {
        let artifacts = vec![artifact("A"), artifact("B")];
        let refs = vec![
            reference("A", "https://x/a", None),
            reference("B", "https://x/a", None),
            reference("B", "https://x/b", None),
        ];
        let graph = DependencyGraph::build(&artifacts, &refs);
        assert_eq!(graph.closure(["A"]).len(), 1);
        assert_eq!(graph.closure(["A", "B"]).len(), 2);
        assert!(graph.closure(["Missing"]).is_empty());
    }

    #[test]
    fn test_apply_pins_respects_declared() {
        let refs = vec![
            reference("A", "https://x/a", Some("declared")),
            reference("A", "https://x/b", None),
        ];
        let mut graph = DependencyGraph::build(&[artifact("A")], &refs);
        let pins = BTreeMap::from([
            ("https://x/a".to_string(), "pinned-a".to_string()),
            ("https://x/b".to_string(), "pinned-b".to_string()),
        ]);
        assert_eq!(graph.apply_pins(&pins), 1);
        assert_eq!(
            graph.tool(&ToolKey::new("https://x/a")).unwrap().expected_hash.as_deref(),
            Some("declared")
        );
        assert_eq!(
            graph.tool(&ToolKey::new("https://x/b")).unwrap().expected_hash.as_deref(),
            Some("pinned-b")
        );
    }

    #[test]
    fn test_canonical_json_order_independent() {
        let artifacts = vec![artifact("A"), artifact("B")];
        let forward = vec![
            reference("A", "https://x/a", None),
            reference("B", "https://x/b", None),
        ];
        let backward: Vec<_> = forward.iter().rev().cloned().collect();
        let artifacts_rev: Vec<_> = artifacts.iter().rev().cloned().collect();

        let one = DependencyGraph::build(&artifacts, &forward).to_canonical_json().unwrap();
        let two = DependencyGraph::build(&artifacts_rev, &backward)
            .to_canonical_json()
            .unwrap();
        assert_eq!(one, two);
    }
}
