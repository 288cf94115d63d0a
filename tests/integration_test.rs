// tests/integration_test.rs

//! Integration tests for LiHub
//!
//! These tests run uploads through the whole pipeline: control file,
//! signature verdict, checksum gate, pool placement and index generation.

use flate2::read::GzDecoder;
use lihub::config::Settings;
use lihub::db;
use lihub::db::models::{CategoryRecord, Component, ComponentKind, Package, PackageKind, User};
use lihub::maintain::indices::{INDEX_FILE, METADATA_FILE};
use lihub::maintain::{Importer, Rejection, rebuild_indices};
use lihub::signature::{SignatureError, SignatureVerifier, VerifyResult};
use rusqlite::Connection;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};

const FPR: &str = "0123456789ABCDEF0123456789ABCDEF01234567";

/// Stands in for gpg: every document is signed with `fingerprint`, except
/// those whose file name is listed in `bad`
struct FakeVerifier {
    fingerprint: String,
    bad: Vec<String>,
}

impl FakeVerifier {
    fn good() -> Self {
        Self {
            fingerprint: FPR.to_string(),
            bad: Vec::new(),
        }
    }
}

impl SignatureVerifier for FakeVerifier {
    fn verify(&self, document: &Path, gpghome: &Path) -> VerifyResult {
        assert!(gpghome.ends_with("gpg"), "unexpected keyring location {}", gpghome.display());

        let name = document.file_name().unwrap().to_string_lossy().to_string();
        if self.bad.contains(&name) {
            Err(SignatureError::Bad)
        } else {
            Ok(self.fingerprint.clone())
        }
    }
}

struct Instance {
    _dir: TempDir,
    settings: Settings,
    conn: Connection,
}

fn instance() -> Instance {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::from_instance_dir(dir.path());
    fs::create_dir_all(&settings.incoming_dir).unwrap();

    db::init(&settings.db_path_str()).unwrap();
    let conn = db::open(&settings.db_path_str()).unwrap();
    db::seed_default_repositories(&conn, &settings.repos_root).unwrap();

    let mut user = User::new("jane".to_string(), "jane@example.org".to_string());
    user.pgpfpr = Some("0123 4567 89AB CDEF 0123  4567 89AB CDEF 0123 4567".to_string());
    user.insert(&conn).unwrap();

    Instance {
        _dir: dir,
        settings,
        conn,
    }
}

fn metainfo(cid: &str, kind: &str, categories: &[&str]) -> String {
    let categories: String = categories
        .iter()
        .map(|c| format!("<category>{}</category>", c))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <component type=\"{kind}\">\n\
         <id>{cid}</id>\n\
         <name>FooBar</name>\n\
         <summary>Foo and bar</summary>\n\
         <developer_name>Example Devs</developer_name>\n\
         <url type=\"homepage\">https://example.org</url>\n\
         <categories>{categories}</categories>\n\
         </component>\n"
    )
}

/// Write an xz-compressed .ipk bundle into `dir`
fn write_ipk(dir: &Path, file_name: &str, control: &str, metainfo: &str) -> PathBuf {
    let mut builder = tar::Builder::new(Vec::new());
    let members: [(&str, &[u8]); 3] = [
        ("control", control.as_bytes()),
        ("metainfo.xml", metainfo.as_bytes()),
        ("icons/64x64/foobar.png", b"not really a png"),
    ];
    for (path, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, path, data).unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let path = dir.join(file_name);
    let mut encoder = xz2::write::XzEncoder::new(File::create(&path).unwrap(), 6);
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap();
    path
}

/// Write a control file listing `files` with their actual checksums
fn write_upload(settings: &Settings, name: &str, target: &str, files: &[&Path]) -> PathBuf {
    let mut body = String::from(
        "-----BEGIN PGP SIGNED MESSAGE-----\nHash: SHA256\n\n\
         Format: 1.0\nUploader: Jane Doe <jane@example.org>\n",
    );
    body.push_str(&format!("Target: {}\nFiles:\n", target));
    for file in files {
        body.push_str(&format!(
            " {} {}\n",
            lihub::maintain::importer::sha256_file(file).unwrap(),
            file.file_name().unwrap().to_string_lossy()
        ));
    }
    body.push_str("-----BEGIN PGP SIGNATURE-----\n\niQEcBAEBCAAGBQJV\n-----END PGP SIGNATURE-----\n");

    let path = settings.incoming_dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn foobar_upload(settings: &Settings, dsc: &str, version: &str) -> (PathBuf, PathBuf) {
    let ipk = write_ipk(
        &settings.incoming_dir,
        &format!("foobar_{}_amd64.ipk", version),
        &format!("PkgName: foobar\nVersion: {}\nArchitecture: amd64\nRequires: libc6, zlib\n", version),
        &metainfo("org.example.FooBar", "desktop", &["Game", "Utility"]),
    );
    let dsc = write_upload(settings, dsc, "master", &[&ipk]);
    (dsc, ipk)
}

fn gunzip(path: &Path) -> String {
    let mut out = String::new();
    GzDecoder::new(File::open(path).unwrap())
        .read_to_string(&mut out)
        .unwrap();
    out
}

fn package_count(conn: &Connection) -> i64 {
    conn.query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn test_database_lifecycle() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file.path().to_str().unwrap().to_string();

    // Remove the temp file so init can create it
    drop(temp_file);

    db::init(&db_path).unwrap();
    assert!(Path::new(&db_path).exists());

    let conn = db::open(&db_path).unwrap();
    let categories: i64 = conn
        .query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))
        .unwrap();
    assert_eq!(categories, 12);

    let foreign_keys: i32 = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
        .unwrap();
    assert_eq!(foreign_keys, 1, "Foreign keys should be enabled");
}

#[test]
fn test_database_init_creates_parent_directories() {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir
        .path()
        .join("nested/path/to/lihub.db")
        .to_str()
        .unwrap()
        .to_string();

    db::init(&db_path).unwrap();
    assert!(Path::new(&db_path).exists());
}

#[test]
fn test_import_publishes_package() {
    let mut inst = instance();
    let (dsc, ipk) = foobar_upload(&inst.settings, "foobar_1.0.dsc", "1.0");
    let verifier = FakeVerifier::good();

    let report = Importer::new(&inst.settings, &verifier)
        .import_incoming(&mut inst.conn)
        .unwrap();
    assert!(report.rejected.is_empty(), "unexpected rejections: {:?}", report.rejected);
    assert_eq!(report.accepted.len(), 1);
    assert_eq!(report.accepted[0].uploader, "jane");
    assert_eq!(report.accepted[0].repository, "master");

    let master = inst.settings.repos_root.join("master");
    let pool_path = master.join("pool/org/example/org.example.FooBar/org.example.FooBar_amd64.ipk");
    assert!(pool_path.is_file());
    assert_eq!(report.accepted[0].packages[0].pool_path, pool_path);
    assert!(master
        .join("assets/org/example/org.example.FooBar/1.0/icons/64x64/foobar.png")
        .is_file());

    // Incoming files are consumed
    assert!(!dsc.exists());
    assert!(!ipk.exists());
    assert!(!inst.settings.import_lock_path().exists());

    let packages = Package::find_by_name(&inst.conn, "foobar").unwrap();
    assert_eq!(packages.len(), 1);
    let package = &packages[0];
    assert_eq!(package.version, "1.0");
    assert_eq!(package.kind, PackageKind::Standard);
    assert_eq!(package.fname, pool_path.to_string_lossy());
    assert_eq!(package.dependency_list(), vec!["libc6", "zlib"]);
    assert_eq!(
        package.sha256sum,
        lihub::maintain::importer::sha256_file(&pool_path).unwrap()
    );

    let component = Component::find_by_id(&inst.conn, package.component_id)
        .unwrap()
        .unwrap();
    assert_eq!(component.cid, "org.example.FooBar");
    assert_eq!(component.kind, ComponentKind::Desktop);
    assert_eq!(component.summary, "Foo and bar");
    assert_eq!(component.description, "<p>A software component</p>");
    assert_eq!(component.url.as_deref(), Some("https://example.org"));

    let categories: Vec<String> = CategoryRecord::find_by_component(&inst.conn, component.id.unwrap())
        .unwrap()
        .into_iter()
        .map(|c| c.idname)
        .collect();
    assert_eq!(categories, vec!["games", "tools"]);
}

#[test]
fn test_sdk_package_shares_runtime_directory() {
    let mut inst = instance();
    let ipk = write_ipk(
        &inst.settings.incoming_dir,
        "foobar-dev.ipk",
        "PkgName: foobar-dev\nVersion: 1.0\nArchitecture: amd64\nType: devel\n",
        &metainfo("org.example.FooBar.sdk", "generic", &[]),
    );
    write_upload(&inst.settings, "sdk.dsc", "master", &[&ipk]);

    let verifier = FakeVerifier::good();
    let report = Importer::new(&inst.settings, &verifier)
        .import_incoming(&mut inst.conn)
        .unwrap();
    assert_eq!(report.accepted.len(), 1);

    let package = &Package::find_by_name(&inst.conn, "foobar-dev").unwrap()[0];
    assert_eq!(package.kind, PackageKind::Sdk);
    assert!(package
        .fname
        .ends_with("pool/org/example/org.example.FooBar/org.example.FooBar.sdk_amd64.ipk"));

    let categories = CategoryRecord::find_by_component(&inst.conn, package.component_id).unwrap();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0].idname, "components");
}

#[test]
fn test_checksum_mismatch_rejects_whole_upload() {
    let mut inst = instance();
    let (dsc, ipk) = foobar_upload(&inst.settings, "foobar.dsc", "1.0");

    // Tamper with the package after the control file was written
    let mut file = fs::OpenOptions::new().append(true).open(&ipk).unwrap();
    file.write_all(b"trailing garbage").unwrap();
    drop(file);

    let verifier = FakeVerifier::good();
    let report = Importer::new(&inst.settings, &verifier)
        .import_incoming(&mut inst.conn)
        .unwrap();

    assert!(report.accepted.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(
        report.rejected[0].reason,
        Rejection::ChecksumMismatch("foobar_1.0_amd64.ipk".to_string())
    );
    assert_eq!(report.rejected[0].control_file, dsc);
    assert_eq!(package_count(&inst.conn), 0);
    assert!(!inst.settings.repos_root.join("master/pool").exists());

    let morgue = &inst.settings.morgue_dir;
    assert!(morgue.join("foobar.dsc").is_file());
    assert!(morgue.join("foobar_1.0_amd64.ipk").is_file());
    let reason = fs::read_to_string(morgue.join("foobar.dsc.reason")).unwrap();
    assert!(reason.contains("checksum mismatch for foobar_1.0_amd64.ipk"));
}

#[test]
fn test_rejection_does_not_affect_other_uploads() {
    let mut inst = instance();
    foobar_upload(&inst.settings, "a_good.dsc", "1.0");
    foobar_upload(&inst.settings, "b_bad.dsc", "2.0");

    let verifier = FakeVerifier {
        fingerprint: FPR.to_string(),
        bad: vec!["b_bad.dsc".to_string()],
    };
    let report = Importer::new(&inst.settings, &verifier)
        .import_incoming(&mut inst.conn)
        .unwrap();

    assert_eq!(report.accepted.len(), 1);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].reason, Rejection::Signature(SignatureError::Bad));

    let packages = Package::find_by_name(&inst.conn, "foobar").unwrap();
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0].version, "1.0");
}

#[test]
fn test_fingerprint_must_match_registered_key() {
    let mut inst = instance();
    foobar_upload(&inst.settings, "foobar.dsc", "1.0");

    let verifier = FakeVerifier {
        fingerprint: "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF".to_string(),
        bad: Vec::new(),
    };
    let report = Importer::new(&inst.settings, &verifier)
        .import_incoming(&mut inst.conn)
        .unwrap();

    assert_eq!(report.rejected.len(), 1);
    assert!(matches!(report.rejected[0].reason, Rejection::FingerprintMismatch { .. }));
    assert_eq!(package_count(&inst.conn), 0);
}

#[test]
fn test_republishing_is_rejected() {
    let mut inst = instance();
    let verifier = FakeVerifier::good();

    foobar_upload(&inst.settings, "first.dsc", "1.0");
    Importer::new(&inst.settings, &verifier)
        .import_incoming(&mut inst.conn)
        .unwrap();

    foobar_upload(&inst.settings, "second.dsc", "1.0");
    let report = Importer::new(&inst.settings, &verifier)
        .import_incoming(&mut inst.conn)
        .unwrap();

    assert_eq!(report.rejected.len(), 1);
    assert!(matches!(report.rejected[0].reason, Rejection::AlreadyPublished { .. }));
    assert_eq!(package_count(&inst.conn), 1);
}

#[test]
fn test_component_id_cannot_leave_repository() {
    let mut inst = instance();
    let ipk = write_ipk(
        &inst.settings.incoming_dir,
        "escape_amd64.ipk",
        "PkgName: escape\nVersion: 1.0\nArchitecture: amd64\n",
        &metainfo("org.x.../../../../../../escaped", "desktop", &["Game"]),
    );
    write_upload(&inst.settings, "escape.dsc", "master", &[&ipk]);

    let verifier = FakeVerifier::good();
    let report = Importer::new(&inst.settings, &verifier)
        .import_incoming(&mut inst.conn)
        .unwrap();

    assert!(report.accepted.is_empty());
    assert_eq!(report.rejected.len(), 1);
    assert!(matches!(
        &report.rejected[0].reason,
        Rejection::InvalidMetadata { file, .. } if file == "escape_amd64.ipk"
    ));
    assert_eq!(package_count(&inst.conn), 0);

    let master = inst.settings.repos_root.join("master");
    assert!(!master.join("pool").exists());
    assert!(!master.join("assets").exists());
    assert!(!inst.settings.repos_root.join("escaped").exists());
    assert!(inst.settings.morgue_dir.join("escape_amd64.ipk").is_file());
}

#[test]
fn test_rebuild_indices() {
    let mut inst = instance();
    let verifier = FakeVerifier::good();

    foobar_upload(&inst.settings, "foobar.dsc", "1.0");
    let armhf = write_ipk(
        &inst.settings.incoming_dir,
        "xpenguin_armhf.ipk",
        "PkgName: xpenguin\nVersion: 0.3\nArchitecture: armhf\n",
        "<component><id>xpenguin</id><name>XPenguin</name></component>",
    );
    write_upload(&inst.settings, "xpenguin.dsc", "master", &[&armhf]);

    let report = Importer::new(&inst.settings, &verifier)
        .import_incoming(&mut inst.conn)
        .unwrap();
    assert_eq!(report.accepted.len(), 2);

    let report = rebuild_indices(&inst.conn, None).unwrap();
    assert!(report.is_success());
    assert_eq!(report.outcomes.len(), 2);

    let indices = inst.settings.repos_root.join("master/indices");
    let index = gunzip(&indices.join("amd64").join(INDEX_FILE));
    assert_eq!(
        index,
        format!(
            "Format-Version: 1.0\n\nPkgName: foobar\nAppName: FooBar\nVersion: 1.0\nSHA256: {}\nRequires: libc6, zlib\n",
            Package::find_by_name(&inst.conn, "foobar").unwrap()[0].sha256sum
        )
    );

    let metadata = gunzip(&indices.join("amd64").join(METADATA_FILE));
    assert!(metadata.starts_with(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<components version=\"0.8\" origin=\"master\">\n<component type=\"desktop\">"
    ));
    assert!(metadata.ends_with("</components>\n"));
    assert_eq!(metadata.matches("<?xml").count(), 1);

    let armhf_index = gunzip(&indices.join("armhf").join(INDEX_FILE));
    assert!(armhf_index.contains("PkgName: xpenguin\nAppName: XPenguin\nVersion: 0.3\n"));
    assert!(!armhf_index.contains("Requires"));

    // Nothing but the two index files in each architecture directory
    for arch in ["amd64", "armhf"] {
        assert_eq!(fs::read_dir(indices.join(arch)).unwrap().count(), 2);
    }
}

#[test]
fn test_rebuild_is_byte_identical() {
    let mut inst = instance();
    let verifier = FakeVerifier::good();
    foobar_upload(&inst.settings, "foobar.dsc", "1.0");
    Importer::new(&inst.settings, &verifier)
        .import_incoming(&mut inst.conn)
        .unwrap();

    let amd64 = inst.settings.repos_root.join("master/indices/amd64");

    rebuild_indices(&inst.conn, Some("master")).unwrap();
    let first = (
        fs::read(amd64.join(METADATA_FILE)).unwrap(),
        fs::read(amd64.join(INDEX_FILE)).unwrap(),
    );

    rebuild_indices(&inst.conn, Some("master")).unwrap();
    let second = (
        fs::read(amd64.join(METADATA_FILE)).unwrap(),
        fs::read(amd64.join(INDEX_FILE)).unwrap(),
    );

    assert_eq!(first, second);
}

#[test]
fn test_rebuild_unknown_repository() {
    let inst = instance();
    assert!(matches!(
        rebuild_indices(&inst.conn, Some("testing")),
        Err(lihub::Error::NotFoundError(_))
    ));
}

#[test]
fn test_failed_rebuild_keeps_published_indices() {
    let mut inst = instance();
    let verifier = FakeVerifier::good();
    foobar_upload(&inst.settings, "first.dsc", "1.0");
    Importer::new(&inst.settings, &verifier)
        .import_incoming(&mut inst.conn)
        .unwrap();

    let amd64 = inst.settings.repos_root.join("master/indices/amd64");
    rebuild_indices(&inst.conn, Some("master")).unwrap();
    let published = fs::read(amd64.join(METADATA_FILE)).unwrap();

    foobar_upload(&inst.settings, "second.dsc", "2.0");
    Importer::new(&inst.settings, &verifier)
        .import_incoming(&mut inst.conn)
        .unwrap();

    // The metadata is renamed first; the index rename then fails
    fs::remove_file(amd64.join(INDEX_FILE)).unwrap();
    fs::create_dir_all(amd64.join(INDEX_FILE).join("blocker")).unwrap();

    let report = rebuild_indices(&inst.conn, Some("master")).unwrap();
    assert!(!report.is_success());
    assert_eq!(report.failures().count(), 1);
    assert_eq!(fs::read(amd64.join(METADATA_FILE)).unwrap(), published);
    assert_eq!(fs::read_dir(&amd64).unwrap().count(), 2);

    fs::remove_dir_all(amd64.join(INDEX_FILE)).unwrap();
    let report = rebuild_indices(&inst.conn, Some("master")).unwrap();
    assert!(report.is_success());
    assert!(gunzip(&amd64.join(INDEX_FILE)).contains("Version: 2.0"));
    assert_ne!(fs::read(amd64.join(METADATA_FILE)).unwrap(), published);
}
