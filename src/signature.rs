// src/signature.rs

//! OpenPGP signature verification
//!
//! Signatures are checked by running `gpg` in batch mode against the
//! uploader's own keyring and reading its machine-readable status lines
//! (`--status-fd 1`). This module only decides whether a document carries a
//! cryptographically valid signature and which key made it; binding that key
//! to a user is the importer's job.

use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Keyring file name inside a user's gpg home
pub const KEYRING_FILE: &str = "keyring.gpg";

const STATUS_PREFIX: &str = "[GNUPG:]";

/// Why a signature was not accepted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// The verifier could not be run or gave no usable answer
    #[error("unknown problem while verifying signature")]
    Tool,

    #[error("bad signature")]
    Bad,

    #[error("error verifying signature")]
    Errored,

    #[error("no signature found")]
    NoData,
}

impl SignatureError {
    /// Whether this is a verifier failure rather than a verdict on the signature
    pub fn is_tool_error(&self) -> bool {
        matches!(self, SignatureError::Tool)
    }
}

/// Fingerprint of the signing key, or why the signature was not accepted
pub type VerifyResult = std::result::Result<String, SignatureError>;

/// Something that can verify a signed document against a user's keyring
pub trait SignatureVerifier {
    /// Verify `document` using the keyring in `gpghome`, returning the
    /// fingerprint of the signing key
    fn verify(&self, document: &Path, gpghome: &Path) -> VerifyResult;
}

/// Signature verification through an external `gpg` binary
#[derive(Debug, Clone)]
pub struct GpgVerifier {
    program: PathBuf,
}

impl GpgVerifier {
    /// Create a verifier running `program`
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Path of the keyring file inside a gpg home directory
    pub fn keyring_path(gpghome: &Path) -> PathBuf {
        gpghome.join(KEYRING_FILE)
    }

    /// Run gpg with the given keyring and trailing arguments
    ///
    /// Returns the status output, or `None` if the program could not be run.
    /// gpg's exit code is not consulted: it is non-zero for bad signatures too,
    /// and the status lines carry the actual verdict.
    fn run<I, S>(&self, keyring: &Path, args: I) -> Option<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = Command::new(&self.program)
            .arg("--batch")
            .arg("--status-fd")
            .arg("1")
            .arg("--no-default-keyring")
            .arg("--keyring")
            .arg(keyring)
            .args(args)
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(output) => {
                debug!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Err(e) => {
                warn!("Failed to run {}: {}", self.program.display(), e);
                None
            }
        }
    }

    /// Fetch the key with `fingerprint` from the keyserver into the keyring in `gpghome`
    ///
    /// Succeeds only if gpg reports the key as both imported and OK.
    pub fn import_key(&self, gpghome: &Path, fingerprint: &str) -> Result<()> {
        fs::create_dir_all(gpghome)?;
        let keyring = Self::keyring_path(gpghome);

        info!("Importing key {} into {}", fingerprint, keyring.display());

        let output = self
            .run(&keyring, ["--recv-key", fingerprint])
            .ok_or_else(|| Error::KeyImport("unknown problem while importing key".to_string()))?;

        if has_status(&output, "IMPORTED") && has_status(&output, "IMPORT_OK") {
            Ok(())
        } else {
            Err(Error::KeyImport(format!(
                "gpg did not import key {}",
                fingerprint
            )))
        }
    }
}

impl Default for GpgVerifier {
    fn default() -> Self {
        Self::new("gpg")
    }
}

impl SignatureVerifier for GpgVerifier {
    fn verify(&self, document: &Path, gpghome: &Path) -> VerifyResult {
        let keyring = Self::keyring_path(gpghome);
        debug!("Verifying {} against {}", document.display(), keyring.display());

        let output = self.run(&keyring, [OsStr::new("--verify"), document.as_os_str()]);
        check_status(output.as_deref())
    }
}

/// Check whether a status line with `keyword` is present
fn has_status(output: &str, keyword: &str) -> bool {
    status_lines(output).any(|(tag, _)| tag == keyword)
}

/// Iterate `(keyword, arguments)` of every status line
fn status_lines(output: &str) -> impl Iterator<Item = (&str, &str)> {
    output.lines().filter_map(|line| {
        let rest = line.strip_prefix(STATUS_PREFIX)?.trim_start();
        Some(rest.split_once(' ').unwrap_or((rest, "")))
    })
}

/// Decide on gpg's `--verify` status output
///
/// `None` means the verifier never ran.
pub fn check_status(output: Option<&str>) -> VerifyResult {
    let output = output.ok_or(SignatureError::Tool)?;

    // A document with several signatures is only as good as its worst one
    if has_status(output, "BADSIG") {
        return Err(SignatureError::Bad);
    }
    if has_status(output, "ERRSIG") {
        return Err(SignatureError::Errored);
    }
    if !has_status(output, "GOODSIG") {
        if has_status(output, "NODATA") {
            return Err(SignatureError::NoData);
        }
        return Err(SignatureError::Tool);
    }

    status_lines(output)
        .filter(|(tag, _)| *tag == "VALIDSIG")
        .filter_map(|(_, args)| args.split_whitespace().next())
        .map(normalize_fingerprint)
        .find(|fingerprint| !fingerprint.is_empty())
        .ok_or(SignatureError::Tool)
}

/// Canonical form of a fingerprint: no whitespace, upper-case hex
pub fn normalize_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Compare two fingerprints ignoring spacing and case
pub fn fingerprints_match(a: &str, b: &str) -> bool {
    let a = normalize_fingerprint(a);
    !a.is_empty() && a == normalize_fingerprint(b)
}
