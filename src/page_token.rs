//! Opaque keyset cursor for paging through cached objects.
//!
//! A token records the last id returned on the previous page. It is JSON,
//! hex-encoded so callers treat it as an opaque string.

use serde::{Deserialize, Serialize};

use crate::storage::traits::StorageError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    pub last_id: String,
}

impl PageToken {
    pub fn new(last_id: impl Into<String>) -> Self {
        Self {
            last_id: last_id.into(),
        }
    }

    pub fn encode(&self) -> Result<String, StorageError> {
        let json = serde_json::to_vec(self).map_err(|source| StorageError::Serialization {
            context: "encode page token".to_string(),
            source,
        })?;
        Ok(hex::encode(json))
    }

    /// Decode a token; the empty string means "first page" and yields `None`.
    pub fn decode(token: &str) -> Result<Option<Self>, StorageError> {
        if token.is_empty() {
            return Ok(None);
        }
        let bytes = hex::decode(token)
            .map_err(|e| StorageError::InvalidArgument(format!("malformed page token: {}", e)))?;
        let parsed = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::InvalidArgument(format!("malformed page token: {}", e)))?;
        Ok(Some(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_is_first_page() {
        assert_eq!(PageToken::decode("").unwrap(), None);
    }

    #[test]
    fn test_token_roundtrip() {
        let token = PageToken::new("IMSI001010000000042");
        let encoded = token.encode().unwrap();
        assert!(!encoded.is_empty());
        assert_eq!(PageToken::decode(&encoded).unwrap(), Some(token));
    }

    #[test]
    fn test_garbage_token_rejected() {
        assert!(matches!(
            PageToken::decode("not-hex"),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(matches!(
            PageToken::decode(&hex::encode(b"{\"nope\":1}")),
            Err(StorageError::InvalidArgument(_))
        ));
    }
}
