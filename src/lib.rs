// src/lib.rs

//! LiHub repository maintenance
//!
//! Ingests signed uploads into a software repository and publishes the
//! per-architecture indices clients fetch.
//!
//! # Architecture
//!
//! - Control files: hand-authored, clearsigned manifests naming the uploaded files
//! - Trust: every upload is verified with `gpg` against the uploader's own keyring,
//!   and the signing key must be the fingerprint registered for that user
//! - Integrity: SHA-256 of every referenced file is checked before anything is written
//! - Pool: artifacts are placed under a sharded, component-id derived path
//! - Indices: regenerated from the database and swapped in by rename, never rewritten in place

pub mod appstream;
pub mod categories;
pub mod config;
pub mod control;
pub mod db;
mod error;
pub mod maintain;
pub mod packages;
pub mod signature;

pub use error::{Error, Result};
