use foundation::ids::LayerId;
use thiserror::Error;

/// Contract violations on a [`crate::VectorContext`].
///
/// Stale features, pending uploads and class changes are not errors; they
/// surface as `Ok(None)`, [`crate::UpdateOutcome`] or `false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("vector context for {layer} has been disposed")]
    Disposed { layer: LayerId },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("synchronizer for {layer} has been disposed")]
    Disposed { layer: LayerId },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
mod tests {
    use super::{RegistryError, SyncError};
    use foundation::ids::LayerId;

    #[test]
    fn registry_errors_convert_into_sync_errors() {
        let err: SyncError = RegistryError::Disposed { layer: LayerId(4) }.into();
        assert_eq!(err.to_string(), "vector context for layer#4 has been disposed");
    }
}
