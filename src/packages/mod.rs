// src/packages/mod.rs

//! Package bundle support for LiHub
//!
//! The import pipeline only talks to the `PackageFormat` trait; `IpkPackage`
//! is the reader for the bundles the repository publishes.

pub mod ipk;
pub mod traits;

pub use ipk::IpkPackage;
pub use traits::PackageFormat;
