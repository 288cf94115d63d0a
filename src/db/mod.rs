// src/db/mod.rs

//! Database layer for LiHub
//!
//! This module handles all SQLite operations including:
//! - Database initialization and schema creation
//! - Connection management
//! - Transaction handling
//! - Seeding of the default repositories

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use models::{RepoFlag, Repository};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use tracing::{debug, info};

/// Initialize a new LiHub database at the specified path
///
/// Creates the database file, applies all migrations and seeds the category
/// taxonomy. This is idempotent - calling it on an existing database is safe.
pub fn init(db_path: &str) -> Result<()> {
    debug!("Initializing database at: {}", db_path);

    // Create parent directories if they don't exist
    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    info!("Database initialized successfully");
    Ok(())
}

/// Open an existing LiHub database
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::DatabaseNotFound(db_path.to_string()));
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    Ok(conn)
}

/// Run `f` inside a transaction, committing only if it succeeds
///
/// Any error returned by `f` rolls the whole transaction back.
pub fn transaction<F, T>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&mut Transaction) -> Result<T>,
{
    let mut tx = conn.transaction()?;
    let value = f(&mut tx)?;
    tx.commit()?;
    Ok(value)
}

/// Create the `master` and `nonfree` repositories if they do not exist yet
///
/// Repository storage lives in `<repos_root>/<name>`. Returns the
/// repositories that were newly created.
pub fn seed_default_repositories(conn: &Connection, repos_root: &Path) -> Result<Vec<Repository>> {
    let defaults = [("master", RepoFlag::None), ("nonfree", RepoFlag::NonFree)];
    let mut created = Vec::new();

    for (name, flag) in defaults {
        if Repository::find_by_name(conn, name)?.is_some() {
            debug!("Repository {} already exists", name);
            continue;
        }

        let mut repo = Repository::new(
            name.to_string(),
            repos_root.join(name).to_string_lossy().into_owned(),
        );
        repo.toplevel = true;
        repo.flag = flag;
        repo.insert(conn)?;

        info!("Created repository {} at {}", repo.name, repo.root_dir);
        created.push(repo);
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_init_creates_database() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap().to_string();

        // Remove the temp file so init can create it
        drop(temp_file);

        let result = init(&db_path);
        assert!(result.is_ok());
        assert!(Path::new(&db_path).exists());
    }

    #[test]
    fn test_init_is_idempotent() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();

        init(db_path).unwrap();
        init(db_path).unwrap();

        let conn = open(db_path).unwrap();
        assert_eq!(schema::get_schema_version(&conn).unwrap(), schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_open_nonexistent_database() {
        let result = open("/nonexistent/path/db.sqlite");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), Error::DatabaseNotFound(_)));
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        init(db_path).unwrap();
        let mut conn = open(db_path).unwrap();

        let result: Result<()> = transaction(&mut conn, |tx| {
            seed_default_repositories(tx, Path::new("/srv/lihub"))?;
            Err(Error::ConflictError("abort".to_string()))
        });
        assert!(result.is_err());
        assert!(Repository::list_all(&conn).unwrap().is_empty());

        let created = transaction(&mut conn, |tx| seed_default_repositories(tx, Path::new("/srv/lihub")))
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(Repository::list_all(&conn).unwrap().len(), 2);
    }

    #[test]
    fn test_seed_default_repositories() {
        let temp_file = NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        init(db_path).unwrap();
        let conn = open(db_path).unwrap();

        let created = seed_default_repositories(&conn, Path::new("/srv/lihub")).unwrap();
        assert_eq!(created.len(), 2);

        let master = Repository::find_by_name(&conn, "master").unwrap().unwrap();
        assert!(master.toplevel);
        assert_eq!(master.flag, RepoFlag::None);
        assert_eq!(master.root_dir, "/srv/lihub/master");

        let nonfree = Repository::find_by_name(&conn, "nonfree").unwrap().unwrap();
        assert_eq!(nonfree.flag, RepoFlag::NonFree);

        // Second run leaves existing repositories alone
        assert!(seed_default_repositories(&conn, Path::new("/elsewhere")).unwrap().is_empty());
        assert_eq!(
            Repository::find_by_name(&conn, "master").unwrap().unwrap().root_dir,
            "/srv/lihub/master"
        );
    }
}
