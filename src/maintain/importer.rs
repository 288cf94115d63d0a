// src/maintain/importer.rs

//! Upload importer
//!
//! Processes the signed control files (`*.dsc`) found in the incoming
//! directory. An upload is admitted only if its uploader is a registered
//! user, the control file carries a good signature made with that user's
//! registered key, and every listed file matches its declared SHA-256 checksum.
//!
//! The whole batch runs in one database transaction. Each upload gets its
//! own savepoint, so a rejected upload never takes other uploads' records
//! with it. Rejected uploads are moved to the morgue together with a reason
//! file; accepted uploads are removed from the incoming directory once the
//! batch is committed.

use crate::appstream::{self, ComponentMetadata};
use crate::categories::{build_cpt_path, map_categories};
use crate::config::Settings;
use crate::control::{self, ControlFile};
use crate::db;
use crate::db::models::{CategoryRecord, Component, Package, Repository, User};
use crate::error::{Error, Result};
use crate::packages::{IpkPackage, PackageFormat};
use crate::signature::{SignatureError, SignatureVerifier, fingerprints_match};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// File extension of upload control files
pub const CONTROL_EXTENSION: &str = "dsc";

/// Suffix of the reason file written next to a quarantined control file
pub const REASON_SUFFIX: &str = "reason";

/// Why an upload was not admitted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("malformed control file: {0}")]
    MalformedControlFile(String),

    #[error("uploader field not set")]
    UploaderNotSet,

    #[error("unable to get uploader email from '{0}'")]
    UploaderEmail(String),

    #[error("could not find user with email {0}")]
    IdentityNotFound(String),

    #[error("{0}")]
    Signature(#[from] SignatureError),

    #[error("fingerprint does not match user (signed with {actual})")]
    FingerprintMismatch { actual: String },

    #[error("checksum mismatch for {0}")]
    ChecksumMismatch(String),

    #[error("unsupported package {file}: {reason}")]
    UnsupportedPackageShape { file: String, reason: String },

    #[error("target field not set")]
    TargetNotSet,

    #[error("target repository '{0}' not found")]
    TargetRepositoryNotFound(String),

    #[error("invalid component metadata in {file}: {reason}")]
    InvalidMetadata { file: String, reason: String },

    #[error("{name} {version} ({architecture}) is already published in {repository}")]
    AlreadyPublished {
        repository: String,
        name: String,
        version: String,
        architecture: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Error> for Rejection {
    fn from(err: Error) -> Self {
        Rejection::Internal(err.to_string())
    }
}

impl From<io::Error> for Rejection {
    fn from(err: io::Error) -> Self {
        Rejection::Internal(err.to_string())
    }
}

/// A rejected upload
#[derive(Debug, Clone)]
pub struct RejectionRecord {
    /// Control file of the upload, at its original incoming location
    pub control_file: PathBuf,
    pub reason: Rejection,
}

/// A package placed in a repository pool
#[derive(Debug, Clone)]
pub struct PublishedPackage {
    pub name: String,
    pub version: String,
    pub architecture: String,
    pub component_id: String,
    pub pool_path: PathBuf,
}

/// An admitted upload
#[derive(Debug, Clone)]
pub struct AcceptedUpload {
    pub control_file: PathBuf,
    pub repository: String,
    pub uploader: String,
    pub packages: Vec<PublishedPackage>,
    /// Incoming files to remove once the batch is committed
    files: Vec<PathBuf>,
}

/// Result of one import batch
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub accepted: Vec<AcceptedUpload>,
    pub rejected: Vec<RejectionRecord>,
}

impl ImportReport {
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }
}

/// Exclusive claim on an incoming directory, released on drop
#[derive(Debug)]
pub struct ImportLock {
    path: PathBuf,
}

impl ImportLock {
    /// Create the lock file, failing if another importer holds it
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::ImportLocked(path.display().to_string()));
            }
            Err(e) => {
                return Err(Error::IncomingDir {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };

        writeln!(file, "{}", std::process::id())?;
        debug!("Acquired import lock {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for ImportLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove import lock {}: {}", self.path.display(), e);
        }
    }
}

/// A package that passed every check and is ready to be written
struct StagedPackage<P> {
    source: PathBuf,
    sha256: String,
    package: P,
    metadata: ComponentMetadata,
    xml: String,
}

/// Imports uploads from the incoming directory
pub struct Importer<'a, P = IpkPackage> {
    settings: &'a Settings,
    verifier: &'a dyn SignatureVerifier,
    _format: PhantomData<P>,
}

impl<'a> Importer<'a> {
    /// Create an importer for `.ipk` bundles
    pub fn new(settings: &'a Settings, verifier: &'a dyn SignatureVerifier) -> Self {
        Self::for_format(settings, verifier)
    }
}

impl<'a, P: PackageFormat> Importer<'a, P> {
    /// Create an importer decoding packages with `P`
    pub fn for_format(settings: &'a Settings, verifier: &'a dyn SignatureVerifier) -> Self {
        Self {
            settings,
            verifier,
            _format: PhantomData,
        }
    }

    /// Process every control file in the incoming directory
    ///
    /// Returns an error only for problems that affect the whole batch; a
    /// bad upload is reported in the returned [`ImportReport`].
    pub fn import_incoming(&self, conn: &mut Connection) -> Result<ImportReport> {
        let _lock = ImportLock::acquire(&self.settings.import_lock_path())?;

        let controls = scan_incoming(&self.settings.incoming_dir)?;
        if controls.is_empty() {
            debug!("No uploads in {}", self.settings.incoming_dir.display());
            return Ok(ImportReport::default());
        }
        info!("Processing {} uploads", controls.len());

        let report = db::transaction(conn, |tx| {
            let mut report = ImportReport::default();

            for control_path in &controls {
                let savepoint = tx.savepoint()?;

                match self.import_upload(&savepoint, control_path) {
                    Ok(upload) => {
                        savepoint.commit()?;
                        info!(
                            "Accepted {} from {} into {} ({} packages)",
                            control_path.display(),
                            upload.uploader,
                            upload.repository,
                            upload.packages.len()
                        );
                        report.accepted.push(upload);
                    }
                    Err(reason) => {
                        // Dropping the savepoint rolls this upload back
                        drop(savepoint);
                        warn!("Rejected {}: {}", control_path.display(), reason);
                        report.rejected.push(RejectionRecord {
                            control_file: control_path.clone(),
                            reason,
                        });
                    }
                }
            }

            Ok(report)
        })?;

        for upload in &report.accepted {
            for file in upload.files.iter().chain(std::iter::once(&upload.control_file)) {
                if let Err(e) = fs::remove_file(file) {
                    warn!("Failed to remove imported file {}: {}", file.display(), e);
                }
            }
        }

        for record in &report.rejected {
            if let Err(e) = quarantine(&self.settings.morgue_dir, record) {
                warn!(
                    "Failed to quarantine {}: {}",
                    record.control_file.display(),
                    e
                );
            }
        }

        info!(
            "Import finished: {} accepted, {} rejected",
            report.accepted.len(),
            report.rejected.len()
        );
        Ok(report)
    }

    /// Run every check on one upload and, if all pass, publish its packages
    fn import_upload(
        &self,
        conn: &Connection,
        control_path: &Path,
    ) -> std::result::Result<AcceptedUpload, Rejection> {
        let control = ControlFile::open(control_path)
            .map_err(|e| Rejection::MalformedControlFile(e.to_string()))?;

        let uploader = control.uploader().ok_or(Rejection::UploaderNotSet)?;
        let email = control::extract_email(uploader)
            .ok_or_else(|| Rejection::UploaderEmail(uploader.to_string()))?;

        let user = User::find_by_email(conn, email)?
            .ok_or_else(|| Rejection::IdentityNotFound(email.to_string()))?;

        let gpghome = user.gpghome(&self.settings.users_dir);
        let fingerprint = self.verifier.verify(control_path, &gpghome)?;

        match user.pgpfpr.as_deref() {
            Some(registered) if fingerprints_match(registered, &fingerprint) => {}
            _ => return Err(Rejection::FingerprintMismatch { actual: fingerprint }),
        }
        debug!("{} is signed by {} ({})", control_path.display(), user.name, fingerprint);

        let files = verify_files(&control)?;

        let target = control.target().ok_or(Rejection::TargetNotSet)?;
        let repo = Repository::find_by_name(conn, target)?
            .ok_or_else(|| Rejection::TargetRepositoryNotFound(target.to_string()))?;

        let mut staged = Vec::with_capacity(files.len());
        let mut seen = BTreeSet::new();
        for (source, sha256) in files {
            let pkg = self.stage_package(conn, &repo, source, sha256)?;

            let key = (
                pkg.package.name().to_string(),
                pkg.package.version().to_string(),
                pkg.package.architecture().to_string(),
            );
            if !seen.insert(key) {
                return Err(already_published(&repo, &pkg.package));
            }
            staged.push(pkg);
        }

        let mut upload = AcceptedUpload {
            control_file: control_path.to_path_buf(),
            repository: repo.name.clone(),
            uploader: user.name.clone(),
            packages: Vec::with_capacity(staged.len()),
            files: staged.iter().map(|pkg| pkg.source.clone()).collect(),
        };

        for pkg in staged {
            upload.packages.push(self.publish(conn, &repo, pkg)?);
        }

        Ok(upload)
    }

    /// Decode and validate one package without writing anything
    fn stage_package(
        &self,
        conn: &Connection,
        repo: &Repository,
        source: PathBuf,
        sha256: String,
    ) -> std::result::Result<StagedPackage<P>, Rejection> {
        let file = file_label(&source);

        let package = P::open(&source).map_err(|e| Rejection::UnsupportedPackageShape {
            file: file.clone(),
            reason: e.to_string(),
        })?;

        if package.has_embedded_packages() {
            return Err(Rejection::UnsupportedPackageShape {
                file,
                reason: "packages with embedded dependencies are not allowed in repositories"
                    .to_string(),
            });
        }

        for (field, value) in [
            ("name", package.name()),
            ("version", package.version()),
            ("architecture", package.architecture()),
        ] {
            if !is_plain_name(value) {
                return Err(Rejection::InvalidMetadata {
                    file,
                    reason: format!("invalid package {} '{}'", field, value),
                });
            }
        }

        let xml = package
            .appstream_data()
            .ok_or_else(|| Rejection::InvalidMetadata {
                file: file.clone(),
                reason: "package has no component metadata".to_string(),
            })?
            .to_string();

        let metadata = appstream::parse_component(&xml).map_err(|e| Rejection::InvalidMetadata {
            file: file.clone(),
            reason: e.to_string(),
        })?;

        if let Some(repo_id) = repo.id {
            if Package::exists(conn, repo_id, package.name(), package.version(), package.architecture())? {
                return Err(already_published(repo, &package));
            }
        }

        Ok(StagedPackage {
            source,
            sha256,
            package,
            metadata,
            xml,
        })
    }

    /// Record a staged package and place it in the pool
    fn publish(
        &self,
        conn: &Connection,
        repo: &Repository,
        staged: StagedPackage<P>,
    ) -> std::result::Result<PublishedPackage, Rejection> {
        let StagedPackage {
            source,
            sha256,
            package,
            metadata,
            xml,
        } = staged;

        let repo_id = repo
            .id
            .ok_or_else(|| Rejection::Internal(format!("repository {} has no id", repo.name)))?;

        let cpt_path = build_cpt_path(&metadata.id);
        let pool_dir = repo.pool_dir().join(&cpt_path);
        let pool_path = pool_dir.join(format!(
            "{}_{}.ipk",
            metadata.id.replace('/', "_"),
            package.architecture()
        ));

        let mut component = Component::new(
            metadata.id.clone(),
            metadata.kind,
            metadata.name.clone(),
            xml,
            repo_id,
        );
        component.summary = metadata.summary.clone();
        component.description = metadata.description_or_default().to_string();
        component.developer_name = metadata.developer_name.clone();
        component.url = metadata.homepage.clone();
        let component_id = component.insert(conn)?;

        for category in map_categories(metadata.kind, &metadata.categories) {
            let record = CategoryRecord::resolve(conn, category)?;
            component.add_category(conn, record.id)?;
        }

        let mut record = Package::new(
            package.name().to_string(),
            package.version().to_string(),
            package.package_kind(),
            pool_path.to_string_lossy().into_owned(),
            package.architecture().to_string(),
            sha256,
            component_id,
            repo_id,
        );
        record.set_dependencies(package.dependencies());
        record.insert(conn)?;

        let icons_dir = repo
            .assets_dir()
            .join(&cpt_path)
            .join(package.version())
            .join("icons");
        package.extract_icons(&icons_dir)?;

        fs::create_dir_all(&pool_dir)?;
        fs::copy(&source, &pool_path)?;

        info!(
            "Published {} {} ({}) as {}",
            package.name(),
            package.version(),
            package.architecture(),
            pool_path.display()
        );

        Ok(PublishedPackage {
            name: package.name().to_string(),
            version: package.version().to_string(),
            architecture: package.architecture().to_string(),
            component_id: metadata.id,
            pool_path,
        })
    }
}

fn already_published<P: PackageFormat>(repo: &Repository, package: &P) -> Rejection {
    Rejection::AlreadyPublished {
        repository: repo.name.clone(),
        name: package.name().to_string(),
        version: package.version().to_string(),
        architecture: package.architecture().to_string(),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A single path component that cannot leave its directory
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Check every listed file against its declared checksum
///
/// Returns the resolved paths with their checksums, in file name order.
fn verify_files(control: &ControlFile) -> std::result::Result<Vec<(PathBuf, String)>, Rejection> {
    let listed = control.files();
    if listed.is_empty() {
        return Err(Rejection::MalformedControlFile(
            "control file lists no files".to_string(),
        ));
    }

    let mut files = Vec::with_capacity(listed.len());
    for (checksum, filename) in &listed {
        if !is_plain_name(filename) {
            return Err(Rejection::MalformedControlFile(format!(
                "invalid file name '{}'",
                filename
            )));
        }

        let path = control.directory().join(filename);
        let actual = match sha256_file(&path) {
            Ok(actual) => actual,
            Err(e) => {
                debug!("Unable to hash {}: {}", path.display(), e);
                return Err(Rejection::ChecksumMismatch(filename.clone()));
            }
        };

        if !actual.eq_ignore_ascii_case(checksum) {
            return Err(Rejection::ChecksumMismatch(filename.clone()));
        }
        files.push((path, actual));
    }

    files.sort();
    Ok(files)
}

/// Compute the hex SHA-256 digest of a file
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Control files waiting in the incoming directory, in file name order
fn scan_incoming(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| Error::IncomingDir {
        path: dir.display().to_string(),
        source: e,
    })?;

    let mut controls = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::IncomingDir {
            path: dir.display().to_string(),
            source: e,
        })?;
        let path = entry.path();

        if path.is_file() && path.extension().is_some_and(|ext| ext == CONTROL_EXTENSION) {
            controls.push(path);
        }
    }

    controls.sort();
    Ok(controls)
}

/// Move a file, copying across filesystems when a rename is not possible
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

/// Move a rejected upload into the morgue and record why it was rejected
///
/// Earlier rejections of the same file names are kept: the new entry gets a
/// `.1`, `.2`, ... suffix instead of replacing them.
pub fn quarantine(morgue_dir: &Path, record: &RejectionRecord) -> Result<PathBuf> {
    fs::create_dir_all(morgue_dir)?;

    let control_name = record
        .control_file
        .file_name()
        .ok_or_else(|| Error::ParseError(format!(
            "Invalid control file path: {}",
            record.control_file.display()
        )))?;

    // Referenced files can only be found while the control file still parses
    let referenced: Vec<PathBuf> = match ControlFile::open(&record.control_file) {
        Ok(control) => control
            .files()
            .values()
            .filter(|name| is_plain_name(name))
            .map(|name| control.directory().join(name))
            .filter(|path| path.is_file())
            .collect(),
        Err(_) => Vec::new(),
    };

    let is_free = |attempt: usize| {
        let control = morgue_name(control_name, attempt);
        !morgue_dir.join(&control).exists()
            && !morgue_dir.join(reason_name(&control)).exists()
            && referenced.iter().filter_map(|file| file.file_name()).all(|name| {
                !morgue_dir.join(morgue_name(name, attempt)).exists()
            })
    };
    let attempt = (0..).find(|attempt| is_free(*attempt)).unwrap_or_default();

    let dest_name = morgue_name(control_name, attempt);
    let dest = morgue_dir.join(&dest_name);
    move_file(&record.control_file, &dest)?;

    for file in &referenced {
        if let Some(name) = file.file_name() {
            move_file(file, &morgue_dir.join(morgue_name(name, attempt)))?;
        }
    }

    fs::write(
        morgue_dir.join(reason_name(&dest_name)),
        format!(
            "Rejected: {}\nTime: {}\n",
            record.reason,
            chrono::Utc::now().to_rfc3339()
        ),
    )?;

    info!("Quarantined {} as {}", record.control_file.display(), dest.display());
    Ok(dest)
}

/// File name used in the morgue for the `attempt`-th rejection of `name`
fn morgue_name(name: &OsStr, attempt: usize) -> OsString {
    let mut name = name.to_os_string();
    if attempt > 0 {
        name.push(format!(".{}", attempt));
    }
    name
}

/// Name of the reason file belonging to a quarantined control file
fn reason_name(control_name: &OsStr) -> OsString {
    let mut name = control_name.to_os_string();
    name.push(".");
    name.push(REASON_SUFFIX);
    name
}
