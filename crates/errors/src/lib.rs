//! Shared error taxonomy used across the reactive backend core.
//!
//! Every fault that can reach a client is tagged with an [`ErrorMetadata`]
//! via `anyhow`'s `.context(...)`, the same convention the rest of the
//! workspace uses to classify errors without committing to a single
//! concrete error enum per crate.

use std::borrow::Cow;

use http::StatusCode;

/// Attached to an anyhow error chain via `.context(e /* ErrorMetadata */)`.
/// Used to classify errors across the codebase: which HTTP status they map
/// to, whether they're safe to show verbatim to a client, and what stable
/// machine code a client should match on instead of parsing `msg`.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    /// short CapitalCamelCase tag, stable across copy changes. Eg `NotFound`.
    pub short_msg: Cow<'static, str>,
    /// human readable, developer facing message.
    pub msg: Cow<'static, str>,
}

#[cfg_attr(any(test, feature = "testing"), derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    NotFound,
    ImmutableField,
    ReservedTable,
    InvalidIdentifier,
    InvalidValue,
    InvalidFilter,
    SchemaViolation,
    VersionConflict,
    SchemaHashMismatch,
    Timeout,
    Unauthenticated,
    Unauthorized,
    RateLimited,
    StorageFailure,
    InvalidResolution,
    ResolverRequired,
    ProtocolError,
    Internal,
}

impl ErrorMetadata {
    fn new(
        code: ErrorCode,
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn not_found(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::NotFound, short_msg, msg)
    }

    pub fn immutable_field(field: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::ImmutableField,
            "ImmutableField",
            format!("Field \"{field}\" cannot be changed after a document is created"),
        )
    }

    pub fn reserved_table(table: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::ReservedTable,
            "ReservedTable",
            format!("Table \"{table}\" is reserved for internal use"),
        )
    }

    pub fn invalid_identifier(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(ErrorCode::InvalidIdentifier, short_msg, msg)
    }

    pub fn invalid_value(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(ErrorCode::InvalidValue, short_msg, msg)
    }

    pub fn invalid_filter(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidFilter, "InvalidFilter", msg)
    }

    pub fn schema_violation(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::SchemaViolation, "SchemaViolation", msg)
    }

    pub fn version_conflict(
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::new(
            ErrorCode::VersionConflict,
            "VersionConflict",
            format!("Expected schema version {expected} but current version is {actual}"),
        )
    }

    pub fn schema_hash_mismatch() -> Self {
        Self::new(
            ErrorCode::SchemaHashMismatch,
            "SchemaHashMismatch",
            "The migration's expected schema hash did not match the current schema",
        )
    }

    pub fn timeout() -> Self {
        Self::new(ErrorCode::Timeout, "Timeout", "The operation timed out")
    }

    pub fn unauthenticated(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(ErrorCode::Unauthenticated, short_msg, msg)
    }

    pub fn unauthorized(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, "Unauthorized", msg)
    }

    pub fn rate_limited(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::RateLimited, "RateLimited", msg)
    }

    pub fn storage_failure(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::StorageFailure, "StorageFailure", msg)
    }

    pub fn invalid_resolution(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidResolution, "InvalidResolution", msg)
    }

    pub fn resolver_required(table: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::ResolverRequired,
            "ResolverRequired",
            format!("Table \"{table}\" uses the manual conflict strategy but no handler is configured"),
        )
    }

    pub fn protocol_error(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ProtocolError, "ProtocolError", msg)
    }

    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Internal, "InternalServerError", msg)
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::NotFound
    }

    pub fn is_unauthenticated(&self) -> bool {
        self.code == ErrorCode::Unauthenticated
    }
}

impl ErrorCode {
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidIdentifier
            | ErrorCode::InvalidValue
            | ErrorCode::InvalidFilter
            | ErrorCode::SchemaViolation
            | ErrorCode::ProtocolError => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::Unauthorized => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::ReservedTable | ErrorCode::ImmutableField => StatusCode::CONFLICT,
            ErrorCode::VersionConflict
            | ErrorCode::SchemaHashMismatch
            | ErrorCode::InvalidResolution
            | ErrorCode::ResolverRequired => StatusCode::CONFLICT,
            ErrorCode::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::StorageFailure | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The shape every client-visible error takes on the wire (§6, §7).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_data: Option<serde_json::Value>,
}

impl From<&ErrorMetadata> for ErrorResponse {
    fn from(e: &ErrorMetadata) -> Self {
        ErrorResponse {
            error: e.msg.to_string(),
            error_code: e.short_msg.to_string(),
            error_data: None,
        }
    }
}

pub trait ErrorMetadataAnyhowExt {
    fn error_metadata(&self) -> Option<&ErrorMetadata>;
    fn error_code(&self) -> ErrorCode;
    fn http_status(&self) -> StatusCode;
    fn to_error_response(&self) -> ErrorResponse;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn error_metadata(&self) -> Option<&ErrorMetadata> {
        self.downcast_ref::<ErrorMetadata>()
    }

    fn error_code(&self) -> ErrorCode {
        self.error_metadata()
            .map(|e| e.code)
            .unwrap_or(ErrorCode::Internal)
    }

    fn http_status(&self) -> StatusCode {
        self.error_code().http_status()
    }

    fn to_error_response(&self) -> ErrorResponse {
        match self.error_metadata() {
            Some(e) => e.into(),
            None => {
                tracing::error!("internal error with no ErrorMetadata: {:#}", self);
                ErrorResponse {
                    error: "An internal error occurred".to_string(),
                    error_code: "InternalServerError".to_string(),
                    error_data: None,
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping_is_stable() {
        assert_eq!(ErrorCode::NotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::Unauthenticated.http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ErrorCode::RateLimited.http_status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn anyhow_ext_downcasts_error_metadata() {
        let err: anyhow::Error =
            anyhow::Error::msg("boom").context(ErrorMetadata::not_found("DocNotFound", "no such document"));
        assert_eq!(err.error_code(), ErrorCode::NotFound);
        let response = err.to_error_response();
        assert_eq!(response.error_code, "DocNotFound");
    }

    #[test]
    fn anyhow_ext_defaults_to_internal_without_metadata() {
        let err = anyhow::anyhow!("totally unclassified failure");
        assert_eq!(err.error_code(), ErrorCode::Internal);
    }
}
