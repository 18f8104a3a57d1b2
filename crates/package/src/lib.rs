//! Package assembly and manifest export for artools
//!
//! Turns a resolved dependency graph and a download report into a
//! self-contained package directory:
//!
//! ```text
//! <package>/
//!   artifacts/   selected artifact definitions
//!   tools/       verified tool binaries (Offline mode)
//!   manifest.json
//! ```
//!
//! # Key Types
//!
//! - [`PackageBuilder`]: assembles a package atomically from a [`PackageRequest`]
//! - [`Manifest`]: the audit and reproducibility record
//! - [`verify_package`]: re-checks a package against its manifest

pub mod builder;
mod error;
pub mod layout;
pub mod manifest;
pub mod verify;

pub use builder::{BuiltPackage, PackageBuilder, PackageRequest};
pub use error::{Error, Result};
pub use manifest::{Manifest, ManifestTool, PackageFile};
pub use verify::{Mismatch, VerifyReport, verify_package};
