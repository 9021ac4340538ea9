//! Shared types for repomirror

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length of a hex-encoded SHA-1 object id.
pub const FINGERPRINT_LEN: usize = 40;

/// Error type for parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("expected {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid character in value: {0:?}")]
    InvalidCharacter(char),
}

/// Identifier of the commit at the tip of the tracked branch.
///
/// Validation rules:
/// - Exactly 40 characters
/// - Hexadecimal digits only (either case; stored lowercase)
///
/// Two fingerprints compare equal iff they name the same commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Returns the fingerprint as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines and human output.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl FromStr for Fingerprint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let len = s.chars().count();
        if len != FINGERPRINT_LEN {
            return Err(ParseError::InvalidLength {
                expected: FINGERPRINT_LEN,
                actual: len,
            });
        }

        for c in s.chars() {
            if !c.is_ascii_hexdigit() {
                return Err(ParseError::InvalidCharacter(c));
            }
        }

        Ok(Fingerprint(s.to_ascii_lowercase()))
    }
}

impl From<git2::Oid> for Fingerprint {
    fn from(oid: git2::Oid) -> Self {
        Fingerprint(oid.to_string())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

    mod fingerprint_tests {
        use super::*;

        #[test]
        fn valid_fingerprint() {
            let fp: Fingerprint = SHA.parse().unwrap();
            assert_eq!(fp.as_str(), SHA);
            assert_eq!(fp.short(), "4b825dc642cb");
        }

        #[test]
        fn uppercase_is_normalized() {
            let upper: Fingerprint = SHA.to_ascii_uppercase().parse().unwrap();
            let lower: Fingerprint = SHA.parse().unwrap();
            assert_eq!(upper, lower);
            assert_eq!(upper.as_str(), SHA);
        }

        #[test]
        fn empty_is_rejected() {
            assert_eq!("".parse::<Fingerprint>(), Err(ParseError::Empty));
        }

        #[test]
        fn short_value_is_rejected() {
            assert_eq!(
                "4b825dc".parse::<Fingerprint>(),
                Err(ParseError::InvalidLength {
                    expected: 40,
                    actual: 7
                })
            );
        }

        #[test]
        fn long_value_is_rejected() {
            let long = format!("{}00", SHA);
            assert!(matches!(
                long.parse::<Fingerprint>(),
                Err(ParseError::InvalidLength { actual: 42, .. })
            ));
        }

        #[test]
        fn non_hex_is_rejected() {
            let bad = format!("{}g", &SHA[..39]);
            assert_eq!(
                bad.parse::<Fingerprint>(),
                Err(ParseError::InvalidCharacter('g'))
            );
        }

        #[test]
        fn multibyte_input_is_rejected_without_panicking() {
            let bad = "é".repeat(40);
            assert_eq!(
                bad.parse::<Fingerprint>(),
                Err(ParseError::InvalidCharacter('é'))
            );
        }

        #[test]
        fn distinct_commits_are_unequal() {
            let a: Fingerprint = SHA.parse().unwrap();
            let b: Fingerprint = "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391".parse().unwrap();
            assert_ne!(a, b);
        }

        #[test]
        fn from_oid() {
            let oid = git2::Oid::from_str(SHA).unwrap();
            assert_eq!(Fingerprint::from(oid).as_str(), SHA);
        }

        #[test]
        fn serde_rejects_malformed() {
            let ok: Fingerprint = serde_json::from_str(&format!("\"{}\"", SHA)).unwrap();
            assert_eq!(ok.as_str(), SHA);
            assert!(serde_json::from_str::<Fingerprint>("\"abc\"").is_err());
        }
    }
}
