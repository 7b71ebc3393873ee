// Copyright (c) ChainBallot, Inc.
// SPDX-License-Identifier: Apache-2.0

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    // Connected node reports a different chain id than the config expects
    ChainIdMismatch { expected: u64, actual: u64 },
    // Transient RPC provider error, safe to retry
    TransientProviderError(String),
    // Provider returned malformed or inconsistent data
    ProviderError(String),
    // Log could not be decoded as a VoteCast event
    DecodeError(String),
    // Database error
    StorageError(String),
    // Uncategorized error
    Generic(String),
}

impl SyncError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            SyncError::ChainIdMismatch { .. } => "chain_id_mismatch",
            SyncError::TransientProviderError(_) => "transient_provider_error",
            SyncError::ProviderError(_) => "provider_error",
            SyncError::DecodeError(_) => "decode_error",
            SyncError::StorageError(_) => "storage_error",
            SyncError::Generic(_) => "generic",
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

impl<E> From<E> for SyncError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        SyncError::Generic(format!("{:?}", err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_type_variants() {
        let errors = vec![
            (
                SyncError::ChainIdMismatch {
                    expected: 1,
                    actual: 31337,
                },
                "chain_id_mismatch",
            ),
            (
                SyncError::TransientProviderError("test".to_string()),
                "transient_provider_error",
            ),
            (
                SyncError::ProviderError("test".to_string()),
                "provider_error",
            ),
            (SyncError::DecodeError("test".to_string()), "decode_error"),
            (SyncError::StorageError("test".to_string()), "storage_error"),
            (SyncError::Generic("test".to_string()), "generic"),
        ];

        for (error, expected_type) in errors {
            assert_eq!(
                error.error_type(),
                expected_type,
                "error_type for {:?} should be '{}'",
                error,
                expected_type
            );
        }
    }

    /// error_type values are used as Prometheus label values
    /// (lowercase, underscores only, no spaces or special chars)
    #[test]
    fn test_error_type_valid_prometheus_labels() {
        let errors_to_test = vec![
            SyncError::ChainIdMismatch {
                expected: 1,
                actual: 2,
            },
            SyncError::TransientProviderError("test".to_string()),
            SyncError::ProviderError("test".to_string()),
            SyncError::DecodeError("test".to_string()),
            SyncError::StorageError("test".to_string()),
            SyncError::Generic("test".to_string()),
        ];

        for error in errors_to_test {
            let error_type = error.error_type();

            assert!(!error_type.is_empty(), "error_type should not be empty");

            for c in error_type.chars() {
                assert!(
                    c.is_ascii_lowercase() || c == '_',
                    "error_type '{}' contains invalid character '{}' for Prometheus label",
                    error_type,
                    c
                );
            }

            assert!(!error_type.starts_with('_'));
            assert!(!error_type.ends_with('_'));
        }
    }

    #[test]
    fn test_error_type_payload_independence() {
        let err1 = SyncError::ProviderError("short".to_string());
        let err2 = SyncError::ProviderError(
            "a very long error message with lots of details".to_string(),
        );
        assert_eq!(err1.error_type(), err2.error_type());
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: SyncError = anyhow::anyhow!("boom").into();
        assert_eq!(err.error_type(), "generic");
    }
}
