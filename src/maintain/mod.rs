// src/maintain/mod.rs

//! Repository maintenance jobs
//!
//! Both jobs are meant to be run by an external scheduler: the importer
//! admits uploads from the incoming directory, the index rebuilder publishes
//! what is in the database.

pub mod importer;
pub mod indices;

pub use importer::{ImportReport, Importer, Rejection, RejectionRecord};
pub use indices::{IndexReport, rebuild_indices};
