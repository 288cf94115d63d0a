// src/db/schema.rs

//! Database schema definitions and migrations for LiHub
//!
//! This module defines the SQLite schema for all core tables and provides
//! a migration system to evolve the schema over time.

use crate::categories::Category;
use crate::error::{Error, Result};
use rusqlite::{Connection, params};
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    info!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        info!("Schema is up to date");
        return Ok(());
    }

    // Apply migrations in order
    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!(
        "Schema migration complete. Now at version {}",
        SCHEMA_VERSION
    );
    Ok(())
}

/// Apply a specific migration version
fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::Migration(format!("Unknown migration version: {}", version))),
    }
}

/// Initial schema - Version 1
///
/// Creates all core tables:
/// - users: Uploader identities and their registered OpenPGP fingerprints
/// - repositories: Published repositories and their storage roots
/// - categories: The fixed browsing taxonomy
/// - components: Software components imported into a repository
/// - component_categories: Category assignments of components
/// - packages: Installable artifacts placed in a repository pool
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        -- Users: Registered uploaders
        CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            pgpfpr TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX idx_users_email ON users(email);

        -- Repositories: Pool, asset and index roots
        CREATE TABLE repositories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            root_dir TEXT NOT NULL,
            toplevel INTEGER NOT NULL DEFAULT 0,
            flag TEXT NOT NULL DEFAULT 'none' CHECK(flag IN ('none', 'nonfree')),
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        -- Categories: Fixed taxonomy, seeded on init
        CREATE TABLE categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idname TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            description TEXT NOT NULL
        );

        -- Components: Browsable software items
        CREATE TABLE components (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cid TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('desktop', 'library', 'generic')),
            name TEXT NOT NULL,
            summary TEXT NOT NULL,
            description TEXT NOT NULL,
            developer_name TEXT,
            url TEXT,
            xml TEXT NOT NULL,
            repository_id INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (repository_id) REFERENCES repositories(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_components_cid ON components(cid);
        CREATE INDEX idx_components_repository ON components(repository_id);

        CREATE TABLE component_categories (
            component_id INTEGER NOT NULL,
            category_id INTEGER NOT NULL,
            PRIMARY KEY (component_id, category_id),
            FOREIGN KEY (component_id) REFERENCES components(id) ON DELETE CASCADE,
            FOREIGN KEY (category_id) REFERENCES categories(id)
        );

        -- Packages: Artifacts in the pool
        CREATE TABLE packages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('standard', 'sdk')),
            fname TEXT NOT NULL,
            architecture TEXT NOT NULL,
            sha256sum TEXT NOT NULL,
            dependencies TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            component_id INTEGER NOT NULL,
            repository_id INTEGER NOT NULL,
            UNIQUE(repository_id, name, version, architecture),
            FOREIGN KEY (component_id) REFERENCES components(id) ON DELETE CASCADE,
            FOREIGN KEY (repository_id) REFERENCES repositories(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_packages_repository_arch ON packages(repository_id, architecture);
        CREATE INDEX idx_packages_component ON packages(component_id);
        ",
    )?;

    info!("Schema version 1 created successfully");
    Ok(())
}

/// Schema Version 2: Seed the category taxonomy
///
/// Categories are read-only to the import pipeline, so they are part of the
/// schema rather than runtime data.
fn migrate_v2(conn: &Connection) -> Result<()> {
    debug!("Migrating to schema version 2");

    for category in Category::ALL {
        conn.execute(
            "INSERT OR IGNORE INTO categories (idname, name, description) VALUES (?1, ?2, ?3)",
            params![category.idname(), category.display_name(), category.description()],
        )?;
    }

    info!("Schema version 2 applied successfully");
    Ok(())
}
