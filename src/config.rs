// src/config.rs

//! Runtime paths of a LiHub instance
//!
//! All locations hang off one instance directory and can be overridden one
//! by one from the command line.

use std::path::{Path, PathBuf};

/// Default instance directory
pub const DEFAULT_INSTANCE_DIR: &str = "/var/lib/lihub";

/// Name of the import lock file inside the incoming directory
pub const IMPORT_LOCK_FILE: &str = ".lihub-import.lock";

/// Locations and external programs used by the pipeline
#[derive(Debug, Clone)]
pub struct Settings {
    /// SQLite database file
    pub db_path: PathBuf,
    /// Directory holding one storage root per repository
    pub repos_root: PathBuf,
    /// Directory holding per-user gpg homes
    pub users_dir: PathBuf,
    /// Directory scanned for uploads
    pub incoming_dir: PathBuf,
    /// Quarantine for rejected uploads
    pub morgue_dir: PathBuf,
    /// OpenPGP verifier program
    pub gpg_program: PathBuf,
}

impl Settings {
    /// Derive every location from an instance directory
    pub fn from_instance_dir(instance_dir: &Path) -> Self {
        Self {
            db_path: instance_dir.join("db.sqlite"),
            repos_root: instance_dir.join("repositories"),
            users_dir: instance_dir.join("users"),
            incoming_dir: instance_dir.join("incoming"),
            morgue_dir: instance_dir.join("morgue"),
            gpg_program: PathBuf::from("gpg"),
        }
    }

    /// Database path as the string form `db::init`/`db::open` take
    pub fn db_path_str(&self) -> String {
        self.db_path.to_string_lossy().into_owned()
    }

    pub fn import_lock_path(&self) -> PathBuf {
        self.incoming_dir.join(IMPORT_LOCK_FILE)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_instance_dir(Path::new(DEFAULT_INSTANCE_DIR))
    }
}
