use std::error::Error as StdError;

use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use crate::{
    application::{pagination::PaginationError, repos::RepoError},
    cache::CacheError,
    config::LoadError,
    infra::error::InfraError,
};

/// How a caller-facing boundary should answer a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NotFound,
    /// The cursor no longer resolves; restart from the first page.
    RetryWithoutCursor,
    Invalid,
    Internal,
}

impl FailureKind {
    pub fn public_message(self) -> &'static str {
        match self {
            FailureKind::NotFound => "Resource not found",
            FailureKind::RetryWithoutCursor => "Pagination expired; retry without a cursor",
            FailureKind::Invalid => "Request could not be processed",
            FailureKind::Internal => "Unexpected error occurred",
        }
    }
}

/// Classified failure with an opaque correlation id for log lookup.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub correlation_id: Uuid,
    pub kind: FailureKind,
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    /// Build the report and log it once under its correlation id.
    pub fn from_error(source: &'static str, error: &AppError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        let report = Self {
            correlation_id: Uuid::new_v4(),
            kind: error.kind(),
            source,
            messages,
        };
        report.log();
        report
    }

    pub fn public_message(&self) -> &'static str {
        self.kind.public_message()
    }

    fn log(&self) {
        match self.kind {
            FailureKind::Internal => error!(
                target: "reseed::application::error",
                correlation_id = %self.correlation_id,
                source = self.source,
                messages = ?self.messages,
                "Request failed"
            ),
            kind => debug!(
                target: "reseed::application::error",
                correlation_id = %self.correlation_id,
                source = self.source,
                kind = ?kind,
                messages = ?self.messages,
                "Request rejected"
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("resource not found")]
    NotFound,
    #[error("pagination cursor is stale")]
    StalePagination,
    #[error(transparent)]
    Repo(RepoError),
    #[error(transparent)]
    Cache(CacheError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            AppError::NotFound => FailureKind::NotFound,
            AppError::StalePagination => FailureKind::RetryWithoutCursor,
            AppError::Validation(_) => FailureKind::Invalid,
            AppError::Repo(_) | AppError::Cache(_) | AppError::Infra(_) => FailureKind::Internal,
        }
    }

    pub fn report(&self, source: &'static str) -> ErrorReport {
        ErrorReport::from_error(source, self)
    }
}

impl From<CacheError> for AppError {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::NotFound { .. } => AppError::NotFound,
            CacheError::StalePagination { .. } => AppError::StalePagination,
            CacheError::InvalidPosition(message) => AppError::Validation(message),
            other => AppError::Cache(other),
        }
    }
}

impl From<RepoError> for AppError {
    fn from(error: RepoError) -> Self {
        match error {
            RepoError::NotFound => AppError::NotFound,
            RepoError::InvalidInput { message } => AppError::Validation(message),
            RepoError::Cache(inner) => AppError::from(inner),
            other => AppError::Repo(other),
        }
    }
}

impl From<PaginationError> for AppError {
    fn from(error: PaginationError) -> Self {
        AppError::Validation(error.to_string())
    }
}

impl From<LoadError> for AppError {
    fn from(error: LoadError) -> Self {
        AppError::Infra(InfraError::configuration(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StoreError;

    #[test]
    fn stale_cursor_asks_for_a_restart() {
        let err = AppError::from(CacheError::StalePagination {
            key: "ticket-timeline".into(),
            rand_id: "gone".into(),
        });
        assert_eq!(err.kind(), FailureKind::RetryWithoutCursor);
    }

    #[test]
    fn missing_rows_are_not_found() {
        assert_eq!(
            AppError::from(RepoError::NotFound).kind(),
            FailureKind::NotFound
        );
        let nested = RepoError::Cache(CacheError::NotFound {
            key: "account:x".into(),
        });
        assert_eq!(AppError::from(nested).kind(), FailureKind::NotFound);
    }

    #[test]
    fn store_failures_are_internal_with_a_correlation_id() {
        let err = AppError::from(CacheError::Store(StoreError::WrongType {
            key: "ticket:1".into(),
        }));
        let first = err.report("test");
        let second = err.report("test");

        assert_eq!(first.kind, FailureKind::Internal);
        assert_ne!(first.correlation_id, second.correlation_id);
        assert!(first.messages[0].contains("ticket:1"));
        assert_eq!(first.public_message(), "Unexpected error occurred");
    }

    #[test]
    fn bad_cursor_is_invalid_input() {
        let err = AppError::from(PaginationError::InvalidCursor("bad".into()));
        assert_eq!(err.kind(), FailureKind::Invalid);
    }
}
