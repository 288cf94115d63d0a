// src/maintain/indices.rs

//! Index rebuilder
//!
//! Regenerates `indices/<arch>/Metadata.xml.gz` and `indices/<arch>/Index.gz`
//! for every repository from the database. Each architecture is written as a
//! batch: both files are fully written to temporary files in the target
//! directory first, and only then renamed over the live files. A failing
//! architecture keeps its previous indices and does not stop the others.

use crate::db::models::Repository;
use crate::error::{Error, Result};
use flate2::Compression;
use flate2::GzBuilder;
use rayon::prelude::*;
use rusqlite::{Connection, Row};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};

/// AppStream metadata collection of one architecture
pub const METADATA_FILE: &str = "Metadata.xml.gz";

/// Package index of one architecture
pub const INDEX_FILE: &str = "Index.gz";

/// Version written to the package index header
pub const INDEX_FORMAT_VERSION: &str = "1.0";

/// AppStream collection format version
pub const APPSTREAM_VERSION: &str = "0.8";

/// One package as it appears in the indices
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub app_name: String,
    pub version: String,
    pub sha256: String,
    pub dependencies: Vec<String>,
    pub component_id: i64,
    pub xml: String,
}

impl IndexEntry {
    fn from_row(row: &Row) -> rusqlite::Result<(String, Self)> {
        let dependencies: Option<String> = row.get(5)?;
        let dependencies = dependencies
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
            .unwrap_or_default();

        Ok((
            row.get(0)?,
            Self {
                name: row.get(1)?,
                version: row.get(2)?,
                sha256: row.get(3)?,
                app_name: row.get(4)?,
                dependencies,
                component_id: row.get(6)?,
                xml: row.get(7)?,
            },
        ))
    }
}

/// Everything needed to write one repository's indices
#[derive(Debug, Clone)]
pub struct RepositorySnapshot {
    pub repository: Repository,
    /// Index entries per architecture, in index order
    pub architectures: BTreeMap<String, Vec<IndexEntry>>,
}

impl RepositorySnapshot {
    /// Read the indexable packages of a repository
    ///
    /// Packages whose component has no metadata document are left out.
    pub fn load(conn: &Connection, repository: Repository) -> Result<Self> {
        let repo_id = repository
            .id
            .ok_or_else(|| Error::NotFoundError(format!("Repository {} has no ID", repository.name)))?;

        let mut stmt = conn.prepare(
            "SELECT p.architecture, p.name, p.version, p.sha256sum, c.name, p.dependencies, c.id, c.xml
             FROM packages p
             JOIN components c ON c.id = p.component_id
             WHERE p.repository_id = ?1 AND c.xml != ''
             ORDER BY p.name, p.version, p.id",
        )?;

        let rows = stmt
            .query_map([repo_id], IndexEntry::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut architectures: BTreeMap<String, Vec<IndexEntry>> = BTreeMap::new();
        for (arch, entry) in rows {
            architectures.entry(arch).or_default().push(entry);
        }

        Ok(Self {
            repository,
            architectures,
        })
    }
}

/// Outcome of rebuilding one architecture of one repository
#[derive(Debug)]
pub struct ArchitectureOutcome {
    pub repository: String,
    pub architecture: String,
    /// Number of indexed packages, or why the indices were not replaced
    pub result: std::result::Result<usize, String>,
}

/// Result of a rebuild run
#[derive(Debug, Default)]
pub struct IndexReport {
    pub outcomes: Vec<ArchitectureOutcome>,
}

impl IndexReport {
    pub fn failures(&self) -> impl Iterator<Item = &ArchitectureOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Render the AppStream collection of one architecture
pub fn render_metadata(origin: &str, entries: &[IndexEntry]) -> String {
    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    out.push_str(&format!(
        "<components version=\"{}\" origin=\"{}\">\n",
        APPSTREAM_VERSION,
        quick_xml::escape::escape(origin)
    ));

    // Several packages may belong to the same component
    let mut seen = BTreeSet::new();
    for entry in entries {
        if !seen.insert(entry.component_id) {
            continue;
        }
        let document = crate::appstream::strip_xml_declaration(&entry.xml).trim_end();
        out.push_str(document);
        out.push('\n');
    }

    out.push_str("</components>\n");
    out
}

/// Render the package index of one architecture
pub fn render_index(entries: &[IndexEntry]) -> String {
    let mut out = format!("Format-Version: {}\n", INDEX_FORMAT_VERSION);

    for entry in entries {
        out.push('\n');
        out.push_str(&format!("PkgName: {}\n", entry.name));
        out.push_str(&format!("AppName: {}\n", entry.app_name));
        out.push_str(&format!("Version: {}\n", entry.version));
        out.push_str(&format!("SHA256: {}\n", entry.sha256));
        if !entry.dependencies.is_empty() {
            out.push_str(&format!("Requires: {}\n", entry.dependencies.join(", ")));
        }
    }

    out
}

/// Gzip `data` without timestamp or file name, so equal input gives equal bytes
pub fn gzip_deterministic(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzBuilder::new()
        .mtime(0)
        .write(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Replace several files in `dir`, keeping the old set if any replacement fails
///
/// Every file is first written and synced to a temporary file in `dir`; the
/// renames only start once all temporaries are complete. Temporaries are
/// removed again if anything fails before that point. If a rename fails, the
/// files already replaced are restored from copies taken before the first
/// rename.
pub fn write_files_atomically(dir: &Path, files: &[(&str, &[u8])]) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    let mut staged: Vec<(PathBuf, TempPath)> = Vec::with_capacity(files.len());
    for (name, data) in files {
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(data)?;
        temp.as_file().sync_all()?;
        staged.push((dir.join(name), temp.into_temp_path()));
    }

    let mut backups: Vec<(PathBuf, Option<TempPath>)> = Vec::with_capacity(staged.len());
    for (path, _) in &staged {
        let backup = if path.is_file() {
            Some(backup_file(dir, path)?)
        } else {
            None
        };
        backups.push((path.clone(), backup));
    }

    for (replaced, (path, temp)) in staged.into_iter().enumerate() {
        if path.exists() {
            debug!("Replacing {}", path.display());
        }
        if let Err(e) = temp.persist(&path) {
            warn!("Failed to replace {}: {}", path.display(), e.error);
            restore_backups(backups.into_iter().take(replaced));
            return Err(e.error);
        }
    }

    Ok(())
}

/// Copy a live file to a temporary file next to it
fn backup_file(dir: &Path, path: &Path) -> io::Result<TempPath> {
    let mut backup = NamedTempFile::new_in(dir)?;
    io::copy(&mut File::open(path)?, backup.as_file_mut())?;
    backup.as_file().sync_all()?;
    Ok(backup.into_temp_path())
}

/// Put back the files that existed before a failed replacement
fn restore_backups(backups: impl Iterator<Item = (PathBuf, Option<TempPath>)>) {
    for (path, backup) in backups {
        let restored = match backup {
            Some(backup) => backup.persist(&path).map_err(|e| e.error),
            None => fs::remove_file(&path),
        };
        if let Err(e) = restored {
            warn!("Failed to restore {}: {}", path.display(), e);
        }
    }
}

/// Write both indices of one architecture
fn write_architecture(dir: &Path, origin: &str, entries: &[IndexEntry]) -> io::Result<()> {
    let metadata = gzip_deterministic(render_metadata(origin, entries).as_bytes())?;
    let index = gzip_deterministic(render_index(entries).as_bytes())?;

    write_files_atomically(dir, &[(METADATA_FILE, metadata.as_slice()), (INDEX_FILE, index.as_slice())])
}

/// Write the indices of every architecture of a snapshot
pub fn rebuild_snapshot(snapshot: &RepositorySnapshot) -> Vec<ArchitectureOutcome> {
    let indices_dir = snapshot.repository.indices_dir();

    snapshot
        .architectures
        .iter()
        .map(|(arch, entries)| {
            let dir = indices_dir.join(arch);
            let result = match write_architecture(&dir, &snapshot.repository.name, entries) {
                Ok(()) => {
                    info!(
                        "Wrote indices for {}/{} ({} packages)",
                        snapshot.repository.name,
                        arch,
                        entries.len()
                    );
                    Ok(entries.len())
                }
                Err(e) => {
                    warn!(
                        "Failed to write indices for {}/{}: {}",
                        snapshot.repository.name, arch, e
                    );
                    Err(e.to_string())
                }
            };

            ArchitectureOutcome {
                repository: snapshot.repository.name.clone(),
                architecture: arch.clone(),
                result,
            }
        })
        .collect()
}

/// Rebuild the indices of all repositories, or of the one named `only`
pub fn rebuild_indices(conn: &Connection, only: Option<&str>) -> Result<IndexReport> {
    let repositories = match only {
        Some(name) => vec![Repository::find_by_name(conn, name)?
            .ok_or_else(|| Error::NotFoundError(format!("Repository '{}' not found", name)))?],
        None => Repository::list_all(conn)?,
    };

    let snapshots = repositories
        .into_iter()
        .map(|repo| RepositorySnapshot::load(conn, repo))
        .collect::<Result<Vec<_>>>()?;

    // Repositories own disjoint directory trees
    let outcomes: Vec<Vec<ArchitectureOutcome>> =
        snapshots.par_iter().map(rebuild_snapshot).collect();

    let report = IndexReport {
        outcomes: outcomes.into_iter().flatten().collect(),
    };

    info!(
        "Index rebuild finished: {} architectures, {} failed",
        report.outcomes.len(),
        report.failures().count()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn entry(name: &str, deps: &[&str]) -> IndexEntry {
        IndexEntry {
            name: name.to_string(),
            app_name: format!("{} App", name),
            version: "1.0".to_string(),
            sha256: "abc".to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            component_id: 1,
            xml: format!("<?xml version=\"1.0\"?>\n<component><id>{}</id></component>\n", name),
        }
    }

    fn gunzip(data: &[u8]) -> String {
        let mut out = String::new();
        GzDecoder::new(data).read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_render_index() {
        let entries = vec![entry("bar", &[]), entry("foo", &["libc6", "zlib"])];
        assert_eq!(
            render_index(&entries),
            "Format-Version: 1.0\n\
             \n\
             PkgName: bar\nAppName: bar App\nVersion: 1.0\nSHA256: abc\n\
             \n\
             PkgName: foo\nAppName: foo App\nVersion: 1.0\nSHA256: abc\nRequires: libc6, zlib\n"
        );
    }

    #[test]
    fn test_render_metadata() {
        let mut second = entry("foo", &[]);
        second.component_id = 2;
        let mut duplicate = entry("foo", &[]);
        duplicate.component_id = 2;

        let xml = render_metadata("master", &[entry("bar", &[]), second, duplicate]);
        assert_eq!(
            xml,
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
             <components version=\"0.8\" origin=\"master\">\n\
             <component><id>bar</id></component>\n\
             <component><id>foo</id></component>\n\
             </components>\n"
        );
    }

    #[test]
    fn test_gzip_is_deterministic() {
        let a = gzip_deterministic(b"hello index").unwrap();
        let b = gzip_deterministic(b"hello index").unwrap();
        assert_eq!(a, b);
        assert_eq!(gunzip(&a), "hello index");
        // No modification time in the header
        assert_eq!(&a[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_write_files_atomically_replaces_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("indices/amd64");

        write_files_atomically(&target, &[("a", &b"old a"[..]), ("b", &b"old b"[..])]).unwrap();
        write_files_atomically(&target, &[("a", &b"new a"[..]), ("b", &b"new b"[..])]).unwrap();

        assert_eq!(fs::read(target.join("a")).unwrap(), b"new a");
        assert_eq!(fs::read(target.join("b")).unwrap(), b"new b");
        assert_eq!(fs::read_dir(&target).unwrap().count(), 2);
    }

    #[test]
    fn test_failed_rename_restores_replaced_files() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("indices/amd64");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join(METADATA_FILE), b"old metadata").unwrap();

        // A non-empty directory cannot be renamed over
        fs::create_dir_all(target.join(INDEX_FILE).join("blocker")).unwrap();

        let result = write_files_atomically(
            &target,
            &[(METADATA_FILE, &b"new metadata"[..]), (INDEX_FILE, &b"new index"[..])],
        );

        assert!(result.is_err());
        assert_eq!(fs::read(target.join(METADATA_FILE)).unwrap(), b"old metadata");
        assert!(target.join(INDEX_FILE).is_dir());
        assert_eq!(fs::read_dir(&target).unwrap().count(), 2);
    }

    #[test]
    fn test_interrupted_replacement_keeps_published_pair() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("indices/amd64");

        let old_metadata = gzip_deterministic(b"old metadata").unwrap();
        let old_index = gzip_deterministic(b"old index").unwrap();
        write_files_atomically(
            &target,
            &[(METADATA_FILE, old_metadata.as_slice()), (INDEX_FILE, old_index.as_slice())],
        )
        .unwrap();

        // Both live files are renamed before the blocked one fails
        fs::create_dir_all(target.join("blocked").join("entry")).unwrap();
        let result = write_files_atomically(
            &target,
            &[
                (METADATA_FILE, &b"new metadata"[..]),
                (INDEX_FILE, &b"new index"[..]),
                ("blocked", &b"new"[..]),
            ],
        );

        assert!(result.is_err());
        assert_eq!(fs::read(target.join(METADATA_FILE)).unwrap(), old_metadata);
        assert_eq!(fs::read(target.join(INDEX_FILE)).unwrap(), old_index);
        assert_eq!(fs::read_dir(&target).unwrap().count(), 3);
    }

    #[test]
    fn test_failed_write_keeps_other_architectures() {
        let dir = tempfile::tempdir().unwrap();
        let mut repo = Repository::new("master".to_string(), dir.path().to_string_lossy().into_owned());
        repo.id = Some(1);

        // A plain file where the armhf directory should be
        fs::create_dir_all(repo.indices_dir()).unwrap();
        fs::write(repo.indices_dir().join("armhf"), b"in the way").unwrap();

        let snapshot = RepositorySnapshot {
            repository: repo.clone(),
            architectures: BTreeMap::from([
                ("amd64".to_string(), vec![entry("foo", &[])]),
                ("armhf".to_string(), vec![entry("foo", &[])]),
            ]),
        };

        let outcomes = rebuild_snapshot(&snapshot);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].result, Ok(1));
        assert!(outcomes[1].result.is_err());

        let index = fs::read(repo.indices_dir().join("amd64").join(INDEX_FILE)).unwrap();
        assert!(gunzip(&index).contains("PkgName: foo"));
        assert_eq!(fs::read(repo.indices_dir().join("armhf")).unwrap(), b"in the way");
    }
}
