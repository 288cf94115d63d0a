// src/packages/traits.rs

//! Common trait for package bundle readers

use crate::db::models::PackageKind;
use crate::error::Result;
use std::path::Path;

/// Decoded kind string that marks development packages
pub const DEVEL_KIND: &str = "devel";

/// What the import pipeline needs to know about a package bundle
pub trait PackageFormat {
    /// Open and decode the package file at `path`
    fn open(path: &Path) -> Result<Self>
    where
        Self: Sized;

    /// Get the package name
    fn name(&self) -> &str;

    /// Get the package version
    fn version(&self) -> &str;

    /// Get the package architecture (e.g., "amd64", "all")
    fn architecture(&self) -> &str;

    /// Get the raw package type, if the bundle declares one
    fn kind(&self) -> Option<&str>;

    /// Get the list of dependencies
    fn dependencies(&self) -> &[String];

    /// Whether the bundle carries further packages inside it
    fn has_embedded_packages(&self) -> bool;

    /// The embedded AppStream component document
    fn appstream_data(&self) -> Option<&str>;

    /// Write the bundle's icons below `dest`, returning how many were written
    fn extract_icons(&self, dest: &Path) -> Result<usize>;

    /// Repository kind of this package
    fn package_kind(&self) -> PackageKind {
        match self.kind() {
            Some(DEVEL_KIND) => PackageKind::Sdk,
            _ => PackageKind::Standard,
        }
    }
}
