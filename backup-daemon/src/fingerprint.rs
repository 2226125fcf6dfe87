//! Snapshot fingerprints.
//!
//! A fingerprint is the MD5 of a snapshot's canonical text form. It only has
//! to detect change between two polls; it is not a tamper check.

use crate::fs::snapshot::Snapshot;
use md5::{Digest, Md5};
use std::fmt;
use std::str::FromStr;

/// 128-bit digest of a [`Snapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Compare against the hex string persisted in the settings file
    pub fn matches(&self, saved: &str) -> bool {
        saved
            .parse::<Fingerprint>()
            .map(|other| other == *self)
            .unwrap_or(false)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFingerprintError;

impl fmt::Display for ParseFingerprintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("fingerprint must be 32 hex digits")
    }
}

impl std::error::Error for ParseFingerprintError {}

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 32 || !s.is_ascii() {
            return Err(ParseFingerprintError);
        }

        let mut out = [0u8; 16];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| ParseFingerprintError)?;
        }
        Ok(Self(out))
    }
}

/// Hash a snapshot.
///
/// Each entry is fed as `<path>\t<secs>.<nanos>\n` in path order, so equal
/// path/mtime sets always hash the same.
pub fn fingerprint(snapshot: &Snapshot) -> Fingerprint {
    let mut hasher = Md5::new();

    for (path, mtime) in snapshot.iter() {
        hasher.update(path.as_os_str().as_encoded_bytes());
        hasher.update(format!("\t{}.{:09}\n", mtime.as_secs(), mtime.subsec_nanos()).as_bytes());
    }

    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    Fingerprint(out)
}
