use thiserror::Error;

use crate::instance_repository::RepositoryError;
use crate::media_fetch::MediaFetchError;
use crate::protocol_client::ProtocolError;

/// Errors returned by session manager operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("instance '{0}' not found")]
    InstanceNotFound(String),
    #[error("instance '{0}' has no active client")]
    ClientNotAttached(String),
    #[error("failed to generate pairing code: {source}")]
    CodeGenerationFailed {
        #[source]
        source: ProtocolError,
    },
    #[error("{operation} failed: {source}")]
    Upstream {
        operation: &'static str,
        #[source]
        source: ProtocolError,
    },
    #[error("invalid recipient '{0}'")]
    InvalidRecipient(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Media(#[from] MediaFetchError),
}

impl SessionError {
    pub(crate) fn upstream(operation: &'static str) -> impl FnOnce(ProtocolError) -> Self {
        move |source| Self::Upstream { operation, source }
    }

    /// True for the not-found family (unknown instance or no attached client).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::InstanceNotFound(_)
                | Self::ClientNotAttached(_)
                | Self::Repository(RepositoryError::NotFound(_))
        )
    }
}
