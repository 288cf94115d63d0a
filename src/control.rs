// src/control.rs

//! Upload control file parser
//!
//! Control files (`*.dsc`) are clearsigned, RFC 822-like manifests written by
//! hand. Parsing is deliberately relaxed: as long as fields can be read, stray
//! lines are skipped instead of failing the upload.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// First line of the detached signature block of a clearsigned document
pub const SIGNATURE_DELIMITER: &str = "-----BEGIN PGP SIGNATURE-----";

/// Errors produced while reading a control file
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("unable to read control file: {0}")]
    Read(#[from] std::io::Error),

    #[error("control file is not valid UTF-8")]
    Encoding,

    #[error("control file contains no fields")]
    Empty,
}

/// A parsed control file
#[derive(Debug, Clone, Default)]
pub struct ControlFile {
    path: Option<PathBuf>,
    fields: Vec<(String, String)>,
}

impl ControlFile {
    /// Read and parse the control file at `path`
    pub fn open(path: &Path) -> Result<Self, ControlError> {
        let raw = fs::read(path)?;
        let mut control = Self::parse_bytes(&raw)?;
        control.path = Some(path.to_path_buf());
        Ok(control)
    }

    /// Parse raw control file bytes
    pub fn parse_bytes(raw: &[u8]) -> Result<Self, ControlError> {
        let content = std::str::from_utf8(raw).map_err(|_| ControlError::Encoding)?;
        Self::parse(content)
    }

    /// Parse control file content
    pub fn parse(content: &str) -> Result<Self, ControlError> {
        let mut control = Self::default();
        let mut current: Option<(String, String)> = None;

        for line in content.lines() {
            if line == SIGNATURE_DELIMITER {
                break;
            }

            if line.starts_with(' ') {
                if let Some((_, value)) = current.as_mut() {
                    value.push('\n');
                    value.push_str(line.trim());
                    continue;
                }
            } else if let Some((name, value)) = current.take() {
                control.set(name, value);
            }

            if let Some((name, value)) = line.split_once(':') {
                current = Some((name.trim().to_string(), value.trim().to_string()));
            }
        }

        if let Some((name, value)) = current {
            control.set(name, value);
        }

        if control.fields.is_empty() {
            return Err(ControlError::Empty);
        }

        debug!("Parsed control file with {} fields", control.fields.len());
        Ok(control)
    }

    /// Insert a field, replacing the value of an earlier field with the same name
    fn set(&mut self, name: String, value: String) {
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(field) => field.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Get the value of a field
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// All fields in document order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// The `Uploader` field
    pub fn uploader(&self) -> Option<&str> {
        self.get("Uploader")
    }

    /// The `Target` field (destination repository name)
    pub fn target(&self) -> Option<&str> {
        self.get("Target").filter(|target| !target.is_empty())
    }

    /// Files listed in the `Files` field, as a checksum to file name map
    pub fn files(&self) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();

        let Some(raw) = self.get("Files") else {
            return files;
        };

        for line in raw.split('\n') {
            if let Some((checksum, filename)) = line.split_once(' ') {
                files.insert(checksum.trim().to_string(), filename.trim().to_string());
            }
        }

        files
    }

    /// Path this control file was read from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Directory referenced files are resolved against
    pub fn directory(&self) -> &Path {
        self.path
            .as_deref()
            .and_then(Path::parent)
            .unwrap_or_else(|| Path::new("."))
    }
}

/// Extract the address between angle brackets, as in `Jane Doe <jane@example.org>`
pub fn extract_email(identity: &str) -> Option<&str> {
    let start = identity.find('<')? + 1;
    let end = start + identity[start..].find('>')?;
    let email = identity[start..end].trim();

    if email.is_empty() || !email.contains('@') || email.contains(char::is_whitespace) {
        return None;
    }

    Some(email)
}
