//! Content fingerprints for change detection.
//!
//! A fingerprint is the first 128 bits of the SHA-256 digest of a file's
//! bytes. It only answers "did anything change"; it is not used for
//! integrity or authentication.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

const FINGERPRINT_LEN: usize = 16;
const READ_BUFFER: usize = 64 * 1024;

/// A 128-bit content digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

/// Raised when parsing a fingerprint from text.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid fingerprint {0:?}: expected 32 hex characters")]
pub struct ParseFingerprintError(String);

impl Fingerprint {
    /// Fingerprints an in-memory buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// use notesync::Fingerprint;
    ///
    /// let a = Fingerprint::of_bytes(b"notes");
    /// let b = Fingerprint::of_bytes(b"notes");
    /// assert_eq!(a, b);
    /// assert_ne!(a, Fingerprint::of_bytes(b"Notes"));
    /// ```
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::from_digest(Sha256::digest(bytes).as_slice())
    }

    /// Fingerprints everything a reader yields, streaming in fixed-size chunks.
    pub fn of_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; READ_BUFFER];
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..read]);
        }
        Ok(Self::from_digest(hasher.finalize().as_slice()))
    }

    /// Fingerprints the full contents of a file.
    pub fn of_file(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::of_reader(File::open(path)?)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    fn from_digest(digest: &[u8]) -> Self {
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes.copy_from_slice(&digest[..FINGERPRINT_LEN]);
        Self(bytes)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let decoded =
            hex::decode(trimmed).map_err(|_| ParseFingerprintError(trimmed.to_string()))?;
        let bytes: [u8; FINGERPRINT_LEN] = decoded
            .try_into()
            .map_err(|_| ParseFingerprintError(trimmed.to_string()))?;
        Ok(Self(bytes))
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = ParseFingerprintError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn display_is_32_lowercase_hex_chars() {
        let text = Fingerprint::of_bytes(b"abc").to_string();

        assert_eq!(text.len(), 32);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // SHA-256("abc") starts with ba7816bf8f01cfea414140de5dae2223
        assert_eq!(text, "ba7816bf8f01cfea414140de5dae2223");
    }

    #[test]
    fn parse_accepts_display_output() {
        let original = Fingerprint::of_bytes(b"round trip");
        let parsed: Fingerprint = original.to_string().parse().unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn parse_rejects_wrong_length_and_non_hex() {
        assert!("abcd".parse::<Fingerprint>().is_err());
        assert!("zz".repeat(16).parse::<Fingerprint>().is_err());
    }

    #[test]
    fn streaming_matches_in_memory_digest() {
        // Larger than one read buffer so several chunks are hashed
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        let streamed = Fingerprint::of_reader(data.as_slice()).unwrap();
        assert_eq!(streamed, Fingerprint::of_bytes(&data));
    }

    #[test]
    fn any_single_byte_change_alters_the_fingerprint() {
        let original: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 256) as u8).collect();
        let baseline = Fingerprint::of_bytes(&original);

        for position in [0, 1, 2047, 4095] {
            let mut changed = original.clone();
            changed[position] ^= 0x01;
            assert_eq!(changed.len(), original.len());
            assert_ne!(
                Fingerprint::of_bytes(&changed),
                baseline,
                "flip at byte {position} went undetected"
            );
        }
    }

    #[test]
    fn file_fingerprint_matches_bytes() {
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"store contents").unwrap();

        let from_file = Fingerprint::of_file(file.path()).unwrap();
        assert_eq!(from_file, Fingerprint::of_bytes(b"store contents"));
    }

    #[test]
    fn serializes_as_hex_string() {
        let fp = Fingerprint::of_bytes(b"json");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{fp}\""));
        assert_eq!(serde_json::from_str::<Fingerprint>(&json).unwrap(), fp);
    }
}
