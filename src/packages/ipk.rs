// src/packages/ipk.rs

//! IPK bundle reader
//!
//! An .ipk is a tar archive, optionally compressed with xz, zstd or gzip,
//! holding an RFC 822-style `control` member, the AppStream `metainfo.xml`,
//! icons under `icons/<size>/` and, for bundles, further packages under `repo/`.

use crate::error::{Error, Result};
use crate::packages::traits::PackageFormat;
use flate2::read::GzDecoder;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::debug;
use xz2::read::XzDecoder;

const CONTROL_MEMBER: &str = "control";
const METAINFO_MEMBER: &str = "metainfo.xml";
const ICONS_DIR: &str = "icons";
const EMBEDDED_DIR: &str = "repo";

/// Contents of the `control` member
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IpkControl {
    pkg_name: String,
    version: String,
    architecture: String,
    #[serde(rename = "Type", default)]
    kind: Option<String>,
    #[serde(default)]
    requires: Option<String>,
}

/// Compression of the outer tar archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompressionFormat {
    Zstd,
    Xz,
    Gzip,
    None,
}

impl CompressionFormat {
    fn from_magic(magic: &[u8]) -> Self {
        if magic.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]) {
            CompressionFormat::Xz
        } else if magic.starts_with(&[0x28, 0xB5, 0x2F, 0xFD]) {
            CompressionFormat::Zstd
        } else if magic.starts_with(&[0x1F, 0x8B]) {
            CompressionFormat::Gzip
        } else {
            CompressionFormat::None
        }
    }
}

/// An icon file inside the bundle
#[derive(Debug, Clone)]
struct Icon {
    /// Path below `icons/`, e.g. `64x64/foobar.png`
    relative: PathBuf,
    data: Vec<u8>,
}

/// A decoded IPK bundle
#[derive(Debug, Clone)]
pub struct IpkPackage {
    package_path: PathBuf,
    name: String,
    version: String,
    architecture: String,
    kind: Option<String>,
    dependencies: Vec<String>,
    metainfo: Option<String>,
    icons: Vec<Icon>,
    embedded: Vec<String>,
}

impl IpkPackage {
    /// Open and decompress the bundle archive
    fn open_archive(path: &Path) -> Result<Archive<Box<dyn Read>>> {
        let mut file = File::open(path)
            .map_err(|e| Error::ParseError(format!("Failed to open package file: {}", e)))?;

        let mut magic = [0u8; 6];
        let read = file.read(&mut magic)?;
        file.seek(SeekFrom::Start(0))?;

        let file = BufReader::new(file);
        let reader: Box<dyn Read> = match CompressionFormat::from_magic(&magic[..read]) {
            CompressionFormat::Zstd => {
                let decoder = zstd::Decoder::with_buffer(file)
                    .map_err(|e| Error::ParseError(format!("Failed to create zstd decoder: {}", e)))?;
                Box::new(decoder)
            }
            CompressionFormat::Xz => Box::new(XzDecoder::new(file)),
            CompressionFormat::Gzip => Box::new(GzDecoder::new(file)),
            CompressionFormat::None => Box::new(file),
        };

        Ok(Archive::new(reader))
    }

    /// Parse the `control` member
    fn parse_control(content: &str) -> Result<IpkControl> {
        let entries: Vec<IpkControl> = rfc822_like::from_str(content)
            .map_err(|e| Error::ParseError(format!("Failed to parse package control data: {}", e)))?;

        entries
            .into_iter()
            .next()
            .ok_or_else(|| Error::ParseError("Package control data is empty".to_string()))
    }

    /// Split a comma-separated `Requires` value
    fn parse_dependencies(requires: Option<&str>) -> Vec<String> {
        requires
            .map(|deps| {
                deps.split(',')
                    .map(str::trim)
                    .filter(|dep| !dep.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Path of the package file this was decoded from
    pub fn path(&self) -> &Path {
        &self.package_path
    }

    /// Names of packages embedded in this bundle
    pub fn embedded_packages(&self) -> &[String] {
        &self.embedded
    }
}

/// Archive member path without a leading `./`, or `None` if it could escape
fn member_path(raw: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => clean.push(part),
            _ => return None,
        }
    }
    Some(clean)
}

impl PackageFormat for IpkPackage {
    fn open(path: &Path) -> Result<Self> {
        debug!("Decoding package bundle: {}", path.display());

        let mut archive = Self::open_archive(path)?;
        let mut control = None;
        let mut metainfo = None;
        let mut icons = Vec::new();
        let mut embedded = Vec::new();

        for entry in archive
            .entries()
            .map_err(|e| Error::ParseError(format!("Failed to read archive entries: {}", e)))?
        {
            let mut entry =
                entry.map_err(|e| Error::ParseError(format!("Failed to read archive entry: {}", e)))?;

            if !entry.header().entry_type().is_file() {
                continue;
            }

            let raw_path = entry
                .path()
                .map_err(|e| Error::ParseError(format!("Failed to get entry path: {}", e)))?
                .into_owned();
            let Some(member) = member_path(&raw_path) else {
                return Err(Error::ParseError(format!(
                    "Archive member escapes the package: {}",
                    raw_path.display()
                )));
            };

            if member == Path::new(CONTROL_MEMBER) {
                let mut content = String::new();
                entry.read_to_string(&mut content)?;
                control = Some(Self::parse_control(&content)?);
            } else if member == Path::new(METAINFO_MEMBER) {
                let mut content = String::new();
                entry.read_to_string(&mut content)?;
                metainfo = Some(content);
            } else if let Ok(relative) = member.strip_prefix(ICONS_DIR) {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                icons.push(Icon {
                    relative: relative.to_path_buf(),
                    data,
                });
            } else if member.starts_with(EMBEDDED_DIR)
                && member.extension().is_some_and(|ext| ext == "ipk")
            {
                embedded.push(member.to_string_lossy().into_owned());
            }
        }

        let control = control.ok_or_else(|| {
            Error::ParseError(format!("Package {} has no control member", path.display()))
        })?;

        Ok(Self {
            package_path: path.to_path_buf(),
            dependencies: Self::parse_dependencies(control.requires.as_deref()),
            name: control.pkg_name,
            version: control.version,
            architecture: control.architecture,
            kind: control.kind,
            metainfo,
            icons,
            embedded,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn architecture(&self) -> &str {
        &self.architecture
    }

    fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn has_embedded_packages(&self) -> bool {
        !self.embedded.is_empty()
    }

    fn appstream_data(&self) -> Option<&str> {
        self.metainfo.as_deref()
    }

    fn extract_icons(&self, dest: &Path) -> Result<usize> {
        for icon in &self.icons {
            let target = dest.join(&icon.relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &icon.data)?;
        }

        debug!("Extracted {} icons to {}", self.icons.len(), dest.display());
        Ok(self.icons.len())
    }
}
