//! Artifact definitions and the tool references they carry.
//!
//! Artifact files are YAML documents. Only the fields this crate needs are
//! modeled in [`ArtifactDocument`]; everything else (sources, parameters,
//! VQL queries) is ignored during parsing and preserved verbatim in
//! [`ArtifactDefinition::raw_text`] for packaging.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of artifact, from the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKind {
    /// Collected from endpoints (the default when `type` is absent).
    #[default]
    Client,
    /// Runs on the server.
    Server,
    /// Client-side event monitoring.
    ClientEvent,
    /// Server-side event monitoring.
    ServerEvent,
}

impl ArtifactKind {
    /// Parse the `type` field (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "CLIENT" => Some(Self::Client),
            "SERVER" => Some(Self::Server),
            "CLIENT_EVENT" => Some(Self::ClientEvent),
            "SERVER_EVENT" => Some(Self::ServerEvent),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "CLIENT"),
            Self::Server => write!(f, "SERVER"),
            Self::ClientEvent => write!(f, "CLIENT_EVENT"),
            Self::ServerEvent => write!(f, "SERVER_EVENT"),
        }
    }
}

/// Where in the artifact a reference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceOrigin {
    /// Declared in the `tools:` section (authoritative).
    ToolSection,
    /// Scraped from body text by the fallback pass.
    BodyText,
}

/// How an artifact file was parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParseMode {
    /// Typed YAML schema.
    Structured,
    /// Best-effort text extraction for malformed files.
    Legacy,
}

/// A mention of a downloadable tool inside an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolReference {
    /// Tool name as declared, or inferred from the URL.
    pub declared_name: String,
    /// URL exactly as written in the artifact.
    pub url: String,
    /// Expected SHA-256 as declared (not yet validated).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    /// Name of the artifact carrying this reference.
    pub source_artifact: String,
    /// Where the reference was found.
    pub origin: ReferenceOrigin,
    /// Declared tool version, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Declared `serve_locally` flag, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serve_locally: Option<bool>,
}

/// A parsed artifact file. Immutable once scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDefinition {
    /// Unique artifact name.
    pub name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Artifact kind.
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    /// Tool references in declaration order.
    pub tool_references: Vec<ToolReference>,
    /// File the artifact was read from.
    pub source_path: PathBuf,
    /// How the file was parsed.
    pub parse_mode: ParseMode,
    /// Verbatim file content.
    #[serde(skip)]
    pub raw_text: String,
}

/// Typed view of an artifact YAML document.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactDocument {
    /// Artifact name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Raw `type` value.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Declared tools.
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
    /// Documentation links; never treated as tools.
    #[serde(default, alias = "references")]
    pub reference: Vec<String>,
}

/// One entry of an artifact's `tools:` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolDeclaration {
    /// Tool name used by VQL to request the tool.
    #[serde(default)]
    pub name: Option<String>,
    /// Download URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Expected SHA-256 of the download.
    #[serde(default)]
    pub expected_hash: Option<String>,
    /// Tool version.
    #[serde(default)]
    pub version: Option<String>,
    /// Whether the server should serve the tool itself.
    #[serde(default)]
    pub serve_locally: Option<bool>,
    /// GitHub project resolved by the server at runtime.
    #[serde(default)]
    pub github_project: Option<String>,
    /// Asset pattern used with `github_project`.
    #[serde(default)]
    pub github_asset_regex: Option<String>,
}

/// Infer a tool name from the final path segment of a URL.
///
/// Returns `None` when the path is empty or ends with a slash.
#[must_use]
pub fn name_from_url(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);
    let path = without_query
        .split_once("://")
        .map_or(without_query, |(_, rest)| {
            rest.split_once('/').map_or("", |(_, path)| path)
        });
    let segment = path.rsplit('/').next().unwrap_or_default().trim();
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}
