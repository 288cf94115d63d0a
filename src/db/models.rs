// src/db/models.rs

//! Data models for LiHub database entities
//!
//! This module defines Rust structs that correspond to database tables
//! and provides methods for creating and reading records. Relations are
//! plain ids; nothing here holds on to other records.

use crate::categories::Category;
use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Map a text column that failed to parse into a rusqlite conversion error
fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

/// A registered uploader
#[derive(Debug, Clone)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
    pub email: String,
    /// Fingerprint of the user's previously imported OpenPGP key
    pub pgpfpr: Option<String>,
    pub created_at: Option<String>,
}

impl User {
    /// Create a new User
    pub fn new(name: String, email: String) -> Self {
        Self {
            id: None,
            name,
            email,
            pgpfpr: None,
            created_at: None,
        }
    }

    /// Directory holding this user's gpg keyring
    pub fn gpghome(&self, users_dir: &Path) -> PathBuf {
        users_dir.join(&self.name).join("gpg")
    }

    /// Insert this user into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO users (name, email, pgpfpr) VALUES (?1, ?2, ?3)",
            params![&self.name, &self.email, &self.pgpfpr],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a user by email address
    pub fn find_by_email(conn: &Connection, email: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, email, pgpfpr, created_at FROM users WHERE email = ?1",
        )?;

        let user = stmt.query_row([email], Self::from_row).optional()?;

        Ok(user)
    }

    /// Find a user by name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, email, pgpfpr, created_at FROM users WHERE name = ?1",
        )?;

        let user = stmt.query_row([name], Self::from_row).optional()?;

        Ok(user)
    }

    /// Record a new registered fingerprint
    pub fn set_fingerprint(&mut self, conn: &Connection, fingerprint: &str) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::InitError("Cannot update user without ID".to_string()))?;

        conn.execute(
            "UPDATE users SET pgpfpr = ?1 WHERE id = ?2",
            params![fingerprint, id],
        )?;

        self.pgpfpr = Some(fingerprint.to_string());
        Ok(())
    }

    /// Convert a database row to a User
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            email: row.get(2)?,
            pgpfpr: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

/// Licensing classification of a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoFlag {
    None,
    NonFree,
}

impl RepoFlag {
    pub fn as_str(&self) -> &str {
        match self {
            RepoFlag::None => "none",
            RepoFlag::NonFree => "nonfree",
        }
    }
}

impl FromStr for RepoFlag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(RepoFlag::None),
            "nonfree" => Ok(RepoFlag::NonFree),
            _ => Err(format!("Invalid repository flag: {}", s)),
        }
    }
}

/// A published repository
#[derive(Debug, Clone)]
pub struct Repository {
    pub id: Option<i64>,
    pub name: String,
    /// Root storage directory holding `pool/`, `assets/` and `indices/`
    pub root_dir: String,
    pub toplevel: bool,
    pub flag: RepoFlag,
    pub created_at: Option<String>,
}

impl Repository {
    /// Create a new Repository
    pub fn new(name: String, root_dir: String) -> Self {
        Self {
            id: None,
            name,
            root_dir,
            toplevel: false,
            flag: RepoFlag::None,
            created_at: None,
        }
    }

    pub fn root(&self) -> &Path {
        Path::new(&self.root_dir)
    }

    pub fn pool_dir(&self) -> PathBuf {
        self.root().join("pool")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.root().join("assets")
    }

    pub fn indices_dir(&self) -> PathBuf {
        self.root().join("indices")
    }

    /// Insert this repository into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO repositories (name, root_dir, toplevel, flag) VALUES (?1, ?2, ?3, ?4)",
            params![&self.name, &self.root_dir, &self.toplevel, self.flag.as_str()],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a repository by name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, root_dir, toplevel, flag, created_at FROM repositories WHERE name = ?1",
        )?;

        let repo = stmt.query_row([name], Self::from_row).optional()?;

        Ok(repo)
    }

    /// List all repositories
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, root_dir, toplevel, flag, created_at FROM repositories ORDER BY name",
        )?;

        let repos = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(repos)
    }

    /// Convert a database row to a Repository
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let flag_str: String = row.get(4)?;
        let flag = flag_str
            .parse::<RepoFlag>()
            .map_err(|e| conversion_error(4, e))?;

        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            root_dir: row.get(2)?,
            toplevel: row.get(3)?,
            flag,
            created_at: row.get(5)?,
        })
    }
}

/// A row of the seeded category taxonomy
#[derive(Debug, Clone)]
pub struct CategoryRecord {
    pub id: i64,
    pub idname: String,
    pub name: String,
    pub description: String,
}

impl CategoryRecord {
    /// Find a category by its idname
    pub fn find_by_idname(conn: &Connection, idname: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, idname, name, description FROM categories WHERE idname = ?1",
        )?;

        let category = stmt.query_row([idname], Self::from_row).optional()?;

        Ok(category)
    }

    /// Resolve a taxonomy entry to its row
    pub fn resolve(conn: &Connection, category: Category) -> Result<Self> {
        Self::find_by_idname(conn, category.idname())?.ok_or_else(|| {
            Error::NotFoundError(format!("Category '{}' is not seeded", category.idname()))
        })
    }

    /// Categories assigned to a component
    pub fn find_by_component(conn: &Connection, component_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT c.id, c.idname, c.name, c.description
             FROM categories c
             JOIN component_categories cc ON cc.category_id = c.id
             WHERE cc.component_id = ?1
             ORDER BY c.idname",
        )?;

        let categories = stmt
            .query_map([component_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(categories)
    }

    /// Convert a database row to a CategoryRecord
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            idname: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
        })
    }
}

/// Kind of software component
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Desktop,
    Library,
    Generic,
}

impl ComponentKind {
    pub fn as_str(&self) -> &str {
        match self {
            ComponentKind::Desktop => "desktop",
            ComponentKind::Library => "library",
            ComponentKind::Generic => "generic",
        }
    }
}

impl FromStr for ComponentKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(ComponentKind::Desktop),
            "library" => Ok(ComponentKind::Library),
            "generic" => Ok(ComponentKind::Generic),
            _ => Err(format!("Invalid component kind: {}", s)),
        }
    }
}

/// A software component imported into a repository
#[derive(Debug, Clone)]
pub struct Component {
    pub id: Option<i64>,
    pub cid: String,
    pub kind: ComponentKind,
    pub name: String,
    pub summary: String,
    pub description: String,
    pub developer_name: Option<String>,
    pub url: Option<String>,
    /// Raw AppStream metadata document
    pub xml: String,
    pub repository_id: i64,
    pub created_at: Option<String>,
}

impl Component {
    /// Create a new Component
    pub fn new(cid: String, kind: ComponentKind, name: String, xml: String, repository_id: i64) -> Self {
        Self {
            id: None,
            cid,
            kind,
            name,
            summary: String::new(),
            description: String::new(),
            developer_name: None,
            url: None,
            xml,
            repository_id,
            created_at: None,
        }
    }

    /// Insert this component into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO components (cid, kind, name, summary, description, developer_name, url, xml, repository_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &self.cid,
                self.kind.as_str(),
                &self.name,
                &self.summary,
                &self.description,
                &self.developer_name,
                &self.url,
                &self.xml,
                &self.repository_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Append a category assignment
    pub fn add_category(&self, conn: &Connection, category_id: i64) -> Result<()> {
        let id = self
            .id
            .ok_or_else(|| Error::InitError("Cannot categorize component without ID".to_string()))?;

        conn.execute(
            "INSERT OR IGNORE INTO component_categories (component_id, category_id) VALUES (?1, ?2)",
            params![id, category_id],
        )?;
        Ok(())
    }

    /// Find a component by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, cid, kind, name, summary, description, developer_name, url, xml, repository_id, created_at
             FROM components WHERE id = ?1",
        )?;

        let component = stmt.query_row([id], Self::from_row).optional()?;

        Ok(component)
    }

    /// Find all components of a repository
    pub fn find_by_repository(conn: &Connection, repository_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, cid, kind, name, summary, description, developer_name, url, xml, repository_id, created_at
             FROM components WHERE repository_id = ?1 ORDER BY cid, id",
        )?;

        let components = stmt
            .query_map([repository_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(components)
    }

    /// Convert a database row to a Component
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind_str: String = row.get(2)?;
        let kind = kind_str
            .parse::<ComponentKind>()
            .map_err(|e| conversion_error(2, e))?;

        Ok(Self {
            id: Some(row.get(0)?),
            cid: row.get(1)?,
            kind,
            name: row.get(3)?,
            summary: row.get(4)?,
            description: row.get(5)?,
            developer_name: row.get(6)?,
            url: row.get(7)?,
            xml: row.get(8)?,
            repository_id: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

/// Kind of package artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Standard,
    /// Development files (headers, SDK tooling) of a runtime
    Sdk,
}

impl PackageKind {
    pub fn as_str(&self) -> &str {
        match self {
            PackageKind::Standard => "standard",
            PackageKind::Sdk => "sdk",
        }
    }
}

impl FromStr for PackageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "standard" => Ok(PackageKind::Standard),
            "sdk" => Ok(PackageKind::Sdk),
            _ => Err(format!("Invalid package kind: {}", s)),
        }
    }
}

/// A package artifact in a repository pool
#[derive(Debug, Clone)]
pub struct Package {
    pub id: Option<i64>,
    pub name: String,
    pub version: String,
    pub kind: PackageKind,
    /// Location of the artifact in the pool
    pub fname: String,
    pub architecture: String,
    pub sha256sum: String,
    /// JSON array of dependency strings
    pub dependencies: Option<String>,
    pub created_at: Option<String>,
    pub component_id: i64,
    pub repository_id: i64,
}

impl Package {
    /// Create a new Package
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        version: String,
        kind: PackageKind,
        fname: String,
        architecture: String,
        sha256sum: String,
        component_id: i64,
        repository_id: i64,
    ) -> Self {
        Self {
            id: None,
            name,
            version,
            kind,
            fname,
            architecture,
            sha256sum,
            dependencies: None,
            created_at: None,
            component_id,
            repository_id,
        }
    }

    /// Store a dependency list
    pub fn set_dependencies(&mut self, deps: &[String]) {
        self.dependencies = if deps.is_empty() {
            None
        } else {
            serde_json::to_string(deps).ok()
        };
    }

    /// Decode the stored dependency list
    pub fn dependency_list(&self) -> Vec<String> {
        self.dependencies
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default()
    }

    /// Insert this package into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO packages (name, version, kind, fname, architecture, sha256sum, dependencies, component_id, repository_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &self.name,
                &self.version,
                self.kind.as_str(),
                &self.fname,
                &self.architecture,
                &self.sha256sum,
                &self.dependencies,
                &self.component_id,
                &self.repository_id,
            ],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Check whether a repository already publishes this name, version and architecture
    pub fn exists(
        conn: &Connection,
        repository_id: i64,
        name: &str,
        version: &str,
        architecture: &str,
    ) -> Result<bool> {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM packages
             WHERE repository_id = ?1 AND name = ?2 AND version = ?3 AND architecture = ?4",
            params![repository_id, name, version, architecture],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Find all packages of a repository, in index order
    pub fn find_by_repository(conn: &Connection, repository_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, version, kind, fname, architecture, sha256sum, dependencies, created_at, component_id, repository_id
             FROM packages WHERE repository_id = ?1 ORDER BY name, version, id",
        )?;

        let packages = stmt
            .query_map([repository_id], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Find packages by name
    pub fn find_by_name(conn: &Connection, name: &str) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, version, kind, fname, architecture, sha256sum, dependencies, created_at, component_id, repository_id
             FROM packages WHERE name = ?1 ORDER BY version, id",
        )?;

        let packages = stmt
            .query_map([name], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(packages)
    }

    /// Convert a database row to a Package
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind_str: String = row.get(3)?;
        let kind = kind_str
            .parse::<PackageKind>()
            .map_err(|e| conversion_error(3, e))?;

        Ok(Self {
            id: Some(row.get(0)?),
            name: row.get(1)?,
            version: row.get(2)?,
            kind,
            fname: row.get(4)?,
            architecture: row.get(5)?,
            sha256sum: row.get(6)?,
            dependencies: row.get(7)?,
            created_at: row.get(8)?,
            component_id: row.get(9)?,
            repository_id: row.get(10)?,
        })
    }
}
