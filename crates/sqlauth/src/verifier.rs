//! Password verification against stored salted hashes.

use std::sync::Arc;

use crate::hash::{EncoderOptions, PasswordEncoder, UnknownAlgorithm, encoder_for};

/// Decides whether a candidate password matches a stored salted hash.
///
/// Holds the hashing capability chosen at construction; verification itself
/// performs no I/O and cannot fail.
#[derive(Debug, Clone)]
pub struct CredentialVerifier {
    encoder: Arc<dyn PasswordEncoder>,
}

impl CredentialVerifier {
    /// Wrap an existing encoder.
    pub fn new(encoder: Arc<dyn PasswordEncoder>) -> Self {
        Self { encoder }
    }

    /// Look up the encoder registered for `algorithm`.
    pub fn for_algorithm(algorithm: &str, options: EncoderOptions) -> Result<Self, UnknownAlgorithm> {
        encoder_for(algorithm, options).map(Self::new)
    }

    /// Check `candidate` salted with `salt` against `stored`.
    #[inline]
    pub fn verify(&self, stored: &str, candidate: &str, salt: &str) -> bool {
        self.encoder.is_password_valid(stored, candidate, salt)
    }

    /// The underlying encoder.
    pub fn encoder(&self) -> &Arc<dyn PasswordEncoder> {
        &self.encoder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        let verifier = CredentialVerifier::for_algorithm("sha512", EncoderOptions::default()).unwrap();
        let stored = verifier.encoder().encode("hunter2", "s1").unwrap();

        assert!(verifier.verify(&stored, "hunter2", "s1"));
        assert!(!verifier.verify(&stored, "hunter3", "s1"));
        assert!(!verifier.verify(&stored, "hunter2", "s2"));
        assert!(!verifier.verify("", "hunter2", "s1"));
    }

    #[test]
    fn test_empty_password_is_ordinary() {
        let verifier = CredentialVerifier::for_algorithm("sha1", EncoderOptions::default()).unwrap();
        let stored = verifier.encoder().encode("", "s1").unwrap();
        assert!(verifier.verify(&stored, "", "s1"));
        assert!(!verifier.verify(&stored, "x", "s1"));
    }

    #[test]
    fn test_unknown_algorithm() {
        let err = CredentialVerifier::for_algorithm("rot13", EncoderOptions::default()).unwrap_err();
        assert_eq!(err.to_string(), "unsupported hash algorithm 'rot13'");
    }
}
