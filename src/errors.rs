/// Errors produced by adapters, native objects and codecs.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint error: {0}")]
    Constraint(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Transaction is read-only")]
    ReadOnly,

    #[error("Version error: requested {requested}, current {current}")]
    Version { requested: u32, current: u32 },

    #[error("IndexedDB error: {0}")]
    IndexedDb(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("Backend error: {0}")]
    Backend(anyhow::Error),
}

/// Result type used throughout the crate.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<anyhow::Error> for StorageError {
    fn from(err: anyhow::Error) -> Self {
        // Storage areas report through anyhow; keep the typed error when there is one.
        match err.downcast::<StorageError>() {
            Ok(inner) => inner,
            Err(other) => StorageError::Backend(other),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anyhow_keeps_typed_storage_error() {
        let err: anyhow::Error = StorageError::QuotaExceeded("5 bytes".into()).into();
        let converted = StorageError::from(err);
        assert!(matches!(converted, StorageError::QuotaExceeded(ref s) if s == "5 bytes"));
    }

    #[test]
    fn foreign_anyhow_becomes_backend() {
        let converted = StorageError::from(anyhow::anyhow!("disk on fire"));
        assert!(matches!(converted, StorageError::Backend(_)));
        assert_eq!(converted.to_string(), "Backend error: disk on fire");
    }
}
