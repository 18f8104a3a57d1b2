//! Package target platform and packaging mode.

use serde::{Deserialize, Serialize};

/// Target platform of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Windows endpoints.
    Windows,
    /// Linux endpoints.
    Linux,
    /// macOS endpoints.
    #[serde(rename = "macos")]
    MacOS,
    /// No platform restriction.
    #[default]
    Generic,
}

impl Platform {
    /// Platform of the running host.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOS
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Generic
        }
    }

    /// Parse from string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "windows" | "win" => Some(Self::Windows),
            "linux" => Some(Self::Linux),
            "macos" | "darwin" | "osx" => Some(Self::MacOS),
            "generic" | "any" => Some(Self::Generic),
            _ => None,
        }
    }

    /// Whether an artifact with this name belongs in a package for `self`.
    ///
    /// Artifact names carry their platform as the first dotted segment
    /// (`Windows.`, `Linux.`, `MacOS.`). Names without a platform prefix
    /// (`Generic.`, `Server.`, `Exchange.`) are platform-neutral.
    #[must_use]
    pub fn selects(self, artifact_name: &str) -> bool {
        if self == Self::Generic {
            return true;
        }
        let prefix = artifact_name.split('.').next().unwrap_or_default();
        match Self::parse(prefix) {
            Some(Self::Generic) | None => true,
            Some(platform) => platform == self,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Windows => write!(f, "windows"),
            Self::Linux => write!(f, "linux"),
            Self::MacOS => write!(f, "macos"),
            Self::Generic => write!(f, "generic"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("Unknown platform: {s}"))
    }
}

/// Whether tool binaries are embedded in the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageMode {
    /// Artifacts only; the deployed server fetches tools on first use.
    #[default]
    Online,
    /// Artifacts plus tool binaries for air-gapped deployment.
    Offline,
}

impl PackageMode {
    /// Whether tool bytes are required for this mode.
    #[must_use]
    pub fn embeds_tools(self) -> bool {
        self == Self::Offline
    }
}

impl std::fmt::Display for PackageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

impl std::str::FromStr for PackageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            _ => Err(format!("Unknown package mode: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse() {
        assert_eq!(Platform::parse("windows"), Some(Platform::Windows));
        assert_eq!(Platform::parse("Linux"), Some(Platform::Linux));
        assert_eq!(Platform::parse("darwin"), Some(Platform::MacOS));
        assert_eq!(Platform::parse("MACOS"), Some(Platform::MacOS));
        assert_eq!(Platform::parse("generic"), Some(Platform::Generic));
        assert_eq!(Platform::parse("solaris"), None);
        assert_eq!(Platform::parse(""), None);
    }

    #[test]
    fn test_platform_display_roundtrip() {
        for p in [
            Platform::Windows,
            Platform::Linux,
            Platform::MacOS,
            Platform::Generic,
        ] {
            assert_eq!(p.to_string().parse::<Platform>().unwrap(), p);
        }
    }

    #[test]
    fn test_platform_selects() {
        assert!(Platform::Linux.selects("Linux.Sys.Pslist"));
        assert!(!Platform::Linux.selects("Windows.Sys.Pslist"));
        assert!(Platform::Linux.selects("Generic.Client.Info"));
        assert!(Platform::Linux.selects("Server.Monitor.Health"));
        assert!(Platform::Windows.selects("Exchange.Windows.Thing"));
        assert!(!Platform::Windows.selects("MacOS.Applications.List"));
        assert!(Platform::Generic.selects("MacOS.Applications.List"));
    }

    #[test]
    fn test_platform_serialization() {
        assert_eq!(
            serde_json::to_string(&Platform::MacOS).unwrap(),
            "\"macos\""
        );
        assert_eq!(
            serde_json::to_string(&PackageMode::Offline).unwrap(),
            "\"offline\""
        );
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("Offline".parse::<PackageMode>().unwrap(), PackageMode::Offline);
        assert!(PackageMode::Offline.embeds_tools());
        assert!(!PackageMode::Online.embeds_tools());
        assert!("hybrid".parse::<PackageMode>().is_err());
    }
}
