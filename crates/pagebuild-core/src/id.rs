//! Build identifiers.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use derive_more::{Display, From};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

/// Number of random bytes behind every build id.
const BUILD_ID_BYTES: usize = 48;

/// Encoded length of a build id: 48 bytes of URL-safe base64 without padding.
pub const BUILD_ID_LEN: usize = 64;

/// Opaque identifier of a scheduled build.
///
/// Generated from the OS random source and encoded as URL-safe base64 with no
/// padding, so it can be embedded in callback URLs as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From)]
#[display("{_0}")]
#[serde(transparent)]
pub struct BuildId(String);

impl BuildId {
    /// Generate a new random build id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; BUILD_ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BuildId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for BuildId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<BuildId> = (0..1000).map(|_| BuildId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_generated_id_is_url_safe_and_unpadded() {
        for _ in 0..100 {
            let id = BuildId::generate();
            assert_eq!(id.as_str().len(), BUILD_ID_LEN);
            assert!(!id.as_str().contains('='));
            assert!(
                id.as_str()
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "unexpected character in {}",
                id
            );
        }
    }
}
