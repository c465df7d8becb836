// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for herald-core.
//!
//! [`Error`] covers every failure the engine reports to its caller: input
//! validation, service registration, storage, and dispatch. [`ServiceError`]
//! is what a [`ServiceClient`](crate::services::ServiceClient) returns and is
//! wrapped by [`Error::DispatchFailed`] during announcement.

use std::time::Duration;

use thiserror::Error;

use crate::records::RecordKind;

/// Result type using herald's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the orchestration engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------
    /// Input validation failed.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// The record already carries a tag set.
    #[error("'{label}' has already been tagged")]
    AlreadyTagged {
        /// Label of the record.
        label: String,
    },

    /// The name does not belong to a registered service.
    #[error("Unrecognised service name: {name}")]
    UnknownService {
        /// The unknown service name.
        name: String,
    },

    /// The record is not tagged with the given service.
    #[error("'{label}' does not have tag: {tag}")]
    UnknownTag {
        /// Label of the record.
        label: String,
        /// The missing tag.
        tag: String,
    },

    /// The service only accepts the other kind of record.
    #[error("Service '{service}' operates on {expected} records, not {actual} records")]
    WrongRecordKind {
        /// The service name.
        service: String,
        /// The record kind the service accepts.
        expected: RecordKind,
        /// The record kind that was supplied.
        actual: RecordKind,
    },

    // ------------------------------------------------------------------
    // Registration (fatal at bootstrap)
    // ------------------------------------------------------------------
    /// A service with this name is already registered.
    #[error("Service already registered: {name}")]
    DuplicateService {
        /// The duplicated service name.
        name: String,
    },

    /// A service lists itself as a dependency.
    #[error("Service '{name}' can't depend on itself")]
    SelfDependency {
        /// The service name.
        name: String,
    },

    /// A dependency was not registered before its dependent.
    #[error("Dependency '{dependency}' of service '{name}' is not registered")]
    MissingDependency {
        /// The service being registered.
        name: String,
        /// The unregistered dependency.
        dependency: String,
    },

    /// The requested services contain a dependency cycle.
    #[error("Service dependency cycle detected between: {}", services.join(", "))]
    CycleDetected {
        /// Services left unordered by the sort.
        services: Vec<String>,
    },

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------
    /// The namespace holds its maximum number of records.
    #[error("{kind} store entry limit reached ({max})")]
    CapacityReached {
        /// Namespace that is full.
        kind: RecordKind,
        /// Configured capacity.
        max: usize,
    },

    /// The label is already present in the namespace.
    #[error("Duplicate label can't be added to the {kind} store: {label}")]
    DuplicateLabel {
        /// Namespace of the record.
        kind: RecordKind,
        /// The duplicated label.
        label: String,
    },

    /// No record with this label exists in the namespace.
    #[error("No {kind} labelled '{label}' in storage")]
    NotFound {
        /// Namespace that was searched.
        kind: RecordKind,
        /// The missing label.
        label: String,
    },

    /// A stored record could not be decoded.
    #[error("Failed to decode stored record '{label}': {details}")]
    Codec {
        /// Label of the record.
        label: String,
        /// Decoder message.
        details: String,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    // ------------------------------------------------------------------
    // Orchestration
    // ------------------------------------------------------------------
    /// `announce` was called with nothing queued.
    #[error("Announcement queue is empty")]
    EmptyQueue,

    /// Pre-flight connectivity check failed for a service.
    #[error("Service '{service}' is not reachable at {address}")]
    ServiceUnreachable {
        /// The unreachable service.
        service: String,
        /// Address that was probed.
        address: String,
    },

    /// A service request failed during announcement.
    #[error("Service '{service}' request for '{label}' failed: {source}")]
    DispatchFailed {
        /// The service that failed.
        service: String,
        /// Label of the record being dispatched.
        label: String,
        /// The underlying client error.
        #[source]
        source: ServiceError,
    },

    /// A sample names a run that does not exist.
    #[error("Parent run '{parent}' not found for sample '{label}'")]
    ParentNotFound {
        /// The sample label.
        label: String,
        /// The missing run label.
        parent: String,
    },

    /// Announced records are external commitments and can't be deleted.
    #[error("Can't delete {kind} during announcement: {label}")]
    DeleteWhileAnnounced {
        /// Namespace of the record.
        kind: RecordKind,
        /// The record label.
        label: String,
    },

    /// Storage reported a different size than was enumerated.
    #[error("{kind} store reports {reported} records but {enumerated} were enumerated")]
    ConsistencyMismatch {
        /// The inconsistent namespace.
        kind: RecordKind,
        /// Count reported by the store.
        reported: usize,
        /// Records actually enumerated.
        enumerated: usize,
    },

    /// Records were left in the queue after an announcement pass.
    #[error("Announcements sent but queue still contains {remaining} requests")]
    QueueNotDrained {
        /// Entries left in the queue.
        remaining: usize,
    },
}

impl Error {
    /// Shorthand for a [`Error::Validation`].
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::AlreadyTagged { .. } => "ALREADY_TAGGED",
            Self::UnknownService { .. } => "UNKNOWN_SERVICE",
            Self::UnknownTag { .. } => "UNKNOWN_TAG",
            Self::WrongRecordKind { .. } => "WRONG_RECORD_KIND",
            Self::DuplicateService { .. } => "DUPLICATE_SERVICE",
            Self::SelfDependency { .. } => "SELF_DEPENDENCY",
            Self::MissingDependency { .. } => "MISSING_DEPENDENCY",
            Self::CycleDetected { .. } => "CYCLE_DETECTED",
            Self::CapacityReached { .. } => "CAPACITY_REACHED",
            Self::DuplicateLabel { .. } => "DUPLICATE_LABEL",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Codec { .. } => "CODEC_ERROR",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::EmptyQueue => "EMPTY_QUEUE",
            Self::ServiceUnreachable { .. } => "SERVICE_UNREACHABLE",
            Self::DispatchFailed { .. } => "DISPATCH_FAILED",
            Self::ParentNotFound { .. } => "PARENT_NOT_FOUND",
            Self::DeleteWhileAnnounced { .. } => "DELETE_WHILE_ANNOUNCED",
            Self::ConsistencyMismatch { .. } => "CONSISTENCY_MISMATCH",
            Self::QueueNotDrained { .. } => "QUEUE_NOT_DRAINED",
        }
    }

    /// Whether this error came from a malformed service catalogue.
    ///
    /// Bootstrap treats these as fatal.
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateService { .. }
                | Self::SelfDependency { .. }
                | Self::MissingDependency { .. }
                | Self::CycleDetected { .. }
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Error::Database {
            operation: "migrate".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Database {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

/// Failures reported by a service client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// The service endpoint could not be reached.
    #[error("Could not connect to {address}: {source}")]
    Connect {
        /// Address of the service.
        address: String,
        /// The I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The request did not finish in time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The service handled the request and refused it.
    #[error("Service rejected the request: {0}")]
    Rejected(String),

    /// The service was handed the wrong kind of record.
    #[error("Service operates on {expected} records, got a {actual}")]
    WrongRecordKind {
        /// Record kind the service accepts.
        expected: RecordKind,
        /// Record kind that was sent.
        actual: RecordKind,
    },
}
