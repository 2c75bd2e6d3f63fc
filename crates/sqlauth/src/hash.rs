//! Salted message-digest password hashing.
//!
//! Stored hashes follow the iterated salted digest scheme:
//!
//! ```text
//! merged = password                      (empty salt)
//! merged = password "{" salt "}"         (otherwise)
//! digest = H(merged)
//! repeat iterations - 1 times: digest = H(digest || merged)
//! stored = base64(digest) | hex(digest)
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

/// Passwords longer than this never verify.
pub const MAX_PASSWORD_LENGTH: usize = 4096;

/// Default number of digest rounds.
pub const DEFAULT_ITERATIONS: u32 = 5000;

/// Error produced when a password cannot be encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("password exceeds {MAX_PASSWORD_LENGTH} bytes")]
    PasswordTooLong,
    #[error("cannot use {{ or }} in salt")]
    InvalidSalt,
}

/// Unknown hash algorithm identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported hash algorithm '{0}'")]
pub struct UnknownAlgorithm(pub String);

/// A pluggable password hashing capability.
pub trait PasswordEncoder: Send + Sync + fmt::Debug {
    /// Encode a raw password with the given salt.
    fn encode(&self, raw: &str, salt: &str) -> Result<String, EncodeError>;

    /// Check a raw password against a stored encoded hash.
    ///
    /// Never fails: anything that cannot be encoded simply does not match.
    fn is_password_valid(&self, encoded: &str, raw: &str, salt: &str) -> bool {
        match self.encode(raw, salt) {
            Ok(candidate) => constant_time_eq(encoded, &candidate),
            Err(_) => false,
        }
    }
}

/// Digest functions available to [`MessageDigestEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha224 => "sha224",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    fn digest(self, merged: &[u8], iterations: u32) -> Vec<u8> {
        match self {
            Self::Md5 => iterate::<Md5>(merged, iterations),
            Self::Sha1 => iterate::<Sha1>(merged, iterations),
            Self::Sha224 => iterate::<Sha224>(merged, iterations),
            Self::Sha256 => iterate::<Sha256>(merged, iterations),
            Self::Sha384 => iterate::<Sha384>(merged, iterations),
            Self::Sha512 => iterate::<Sha512>(merged, iterations),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "");
        match normalized.as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha224" => Ok(Self::Sha224),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn iterate<D: Digest>(merged: &[u8], iterations: u32) -> Vec<u8> {
    let mut digest = D::digest(merged).to_vec();
    for _ in 1..iterations {
        let mut hasher = D::new();
        hasher.update(&digest);
        hasher.update(merged);
        digest = hasher.finalize().to_vec();
    }
    digest
}

/// Compare two strings without short-circuiting on the first difference.
#[inline]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Iterated salted message-digest encoder.
#[derive(Debug, Clone)]
pub struct MessageDigestEncoder {
    algorithm: DigestAlgorithm,
    iterations: u32,
    encode_as_base64: bool,
}

impl MessageDigestEncoder {
    /// Create an encoder with the default rounds and base64 output.
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            iterations: DEFAULT_ITERATIONS,
            encode_as_base64: true,
        }
    }

    /// Builder: set the number of digest rounds (at least one is always applied).
    pub fn iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    /// Builder: choose base64 (`true`) or lowercase hex (`false`) output.
    pub fn encode_as_base64(mut self, enabled: bool) -> Self {
        self.encode_as_base64 = enabled;
        self
    }

    /// The configured digest function.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    fn merge_password_and_salt(raw: &str, salt: &str) -> Result<String, EncodeError> {
        // "0" counts as no salt, matching hashes written by existing deployments.
        if salt.is_empty() || salt == "0" {
            return Ok(raw.to_string());
        }
        if salt.contains('{') || salt.contains('}') {
            return Err(EncodeError::InvalidSalt);
        }
        Ok(format!("{raw}{{{salt}}}"))
    }
}

impl PasswordEncoder for MessageDigestEncoder {
    fn encode(&self, raw: &str, salt: &str) -> Result<String, EncodeError> {
        if raw.len() > MAX_PASSWORD_LENGTH {
            return Err(EncodeError::PasswordTooLong);
        }
        let merged = Self::merge_password_and_salt(raw, salt)?;
        let digest = self.algorithm.digest(merged.as_bytes(), self.iterations);
        Ok(if self.encode_as_base64 {
            BASE64.encode(digest)
        } else {
            hex::encode(digest)
        })
    }
}

/// Options applied when an encoder is built from the registry.
#[derive(Debug, Clone, Copy)]
pub struct EncoderOptions {
    pub iterations: u32,
    pub encode_as_base64: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            encode_as_base64: true,
        }
    }
}

/// Build the encoder registered under `algorithm`.
pub fn encoder_for(
    algorithm: &str,
    options: EncoderOptions,
) -> Result<Arc<dyn PasswordEncoder>, UnknownAlgorithm> {
    let algorithm: DigestAlgorithm = algorithm.parse()?;
    Ok(Arc::new(
        MessageDigestEncoder::new(algorithm)
            .iterations(options.iterations)
            .encode_as_base64(options.encode_as_base64),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_round_matches_plain_digest() {
        let encoder = MessageDigestEncoder::new(DigestAlgorithm::Md5)
            .iterations(1)
            .encode_as_base64(false);
        assert_eq!(
            encoder.encode("password", "").unwrap(),
            "5f4dcc3b5aa765d61d8327deb882cf99"
        );

        let encoder = MessageDigestEncoder::new(DigestAlgorithm::Sha1)
            .iterations(1)
            .encode_as_base64(false);
        assert_eq!(
            encoder.encode("abc", "").unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_salt_is_merged_in_braces() {
        let salted = MessageDigestEncoder::new(DigestAlgorithm::Sha256)
            .iterations(1)
            .encode_as_base64(false);
        let unsalted = salted.clone();
        assert_eq!(
            salted.encode("secret", "s1").unwrap(),
            unsalted.encode("secret{s1}", "").unwrap()
        );
    }

    #[test]
    fn test_iterations_change_output() {
        let one = MessageDigestEncoder::new(DigestAlgorithm::Sha512).iterations(1);
        let many = MessageDigestEncoder::new(DigestAlgorithm::Sha512);
        assert_ne!(
            one.encode("secret", "s1").unwrap(),
            many.encode("secret", "s1").unwrap()
        );
        // zero rounds still applies one digest
        let zero = MessageDigestEncoder::new(DigestAlgorithm::Sha512).iterations(0);
        assert_eq!(
            zero.encode("secret", "s1").unwrap(),
            one.encode("secret", "s1").unwrap()
        );
    }

    #[test]
    fn test_output_encodings() {
        let b64 = MessageDigestEncoder::new(DigestAlgorithm::Sha512);
        let hex = MessageDigestEncoder::new(DigestAlgorithm::Sha512).encode_as_base64(false);
        assert_eq!(b64.encode("pw", "salt").unwrap().len(), 88);
        let h = hex.encode("pw", "salt").unwrap();
        assert_eq!(h.len(), 128);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_is_password_valid() {
        let encoder = MessageDigestEncoder::new(DigestAlgorithm::Sha256);
        let stored = encoder.encode("correct horse", "pepper").unwrap();
        assert!(encoder.is_password_valid(&stored, "correct horse", "pepper"));
        assert!(!encoder.is_password_valid(&stored, "correct horse", "other"));
        assert!(!encoder.is_password_valid(&stored, "wrong", "pepper"));
    }

    #[test]
    fn test_invalid_salt_and_long_password_never_match() {
        let encoder = MessageDigestEncoder::new(DigestAlgorithm::Sha256);
        assert_eq!(encoder.encode("pw", "a{b"), Err(EncodeError::InvalidSalt));
        assert!(!encoder.is_password_valid("anything", "pw", "a}b"));

        let long = "x".repeat(MAX_PASSWORD_LENGTH + 1);
        assert_eq!(encoder.encode(&long, ""), Err(EncodeError::PasswordTooLong));
    }

    #[test]
    fn test_zero_salt_counts_as_empty() {
        let encoder = MessageDigestEncoder::new(DigestAlgorithm::Sha1);
        assert_eq!(
            encoder.encode("pw", "0").unwrap(),
            encoder.encode("pw", "").unwrap()
        );
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("SHA512".parse(), Ok(DigestAlgorithm::Sha512));
        assert_eq!("sha-256".parse(), Ok(DigestAlgorithm::Sha256));
        assert_eq!("md5".parse(), Ok(DigestAlgorithm::Md5));
        assert!("whirlpool".parse::<DigestAlgorithm>().is_err());
        assert!(encoder_for("crc32", EncoderOptions::default()).is_err());
    }

    #[test]
    fn test_registry_applies_options() {
        let encoder = encoder_for(
            "sha1",
            EncoderOptions {
                iterations: 1,
                encode_as_base64: false,
            },
        )
        .unwrap();
        assert_eq!(
            encoder.encode("abc", "").unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }
}
