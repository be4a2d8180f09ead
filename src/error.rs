//! Error types for the GCE provisioning core.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration, cloud API calls, resource tasks, the task engine,
//! and the model builders.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the provisioning system.
#[derive(Debug, Error)]
pub enum InfraError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cloud API errors.
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Resource task errors.
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// Task engine errors.
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Model builder errors.
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// Errors returned by the cloud facades, the transport and the waiter.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The resource does not exist (HTTP 404).
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Resource kind or API collection.
        kind: String,
        /// Resource name or path.
        name: String,
    },

    /// The resource name is already taken (HTTP 409).
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// Resource kind or API collection.
        kind: String,
        /// Resource name.
        name: String,
    },

    /// The request was rejected as invalid (HTTP 400).
    #[error("Bad request: {message}")]
    BadRequest {
        /// Message returned by the API.
        message: String,
    },

    /// An IAM policy write raced with another writer.
    #[error("IAM policy etag mismatch on {resource}")]
    EtagMismatch {
        /// Resource whose policy was being written.
        resource: String,
    },

    /// The resource is not ready yet; the call may succeed later.
    #[error("Resource not ready: {message}")]
    ResourceNotReady {
        /// Message returned by the API.
        message: String,
    },

    /// A long-running operation finished with an error.
    #[error("Operation {operation} failed: {code}: {message}")]
    OperationFailed {
        /// Operation name.
        operation: String,
        /// Code of the first sub-error.
        code: String,
        /// Message of the first sub-error.
        message: String,
    },

    /// Waiting for an operation exceeded the poll timeout.
    #[error("Timeout after {waited_secs}s waiting for operation {operation}")]
    Timeout {
        /// Operation name or link.
        operation: String,
        /// Seconds spent waiting.
        waited_secs: u64,
    },

    /// The simulator received a request it has no handler for.
    #[error("Unhandled request: {method} {url}")]
    UnhandledRequest {
        /// HTTP method.
        method: String,
        /// Request URL.
        url: String,
    },

    /// Any other API error.
    #[error("API error {code} ({status}): {message}")]
    Api {
        /// HTTP status code.
        code: u16,
        /// Symbolic status such as `PERMISSION_DENIED`.
        status: String,
        /// Message returned by the API.
        message: String,
    },

    /// Transport failure talking to the API.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// A resource URL could not be parsed.
    #[error("Invalid resource URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors raised by resource tasks while checking or rendering changes.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A field required on creation was not set.
    #[error("{kind} {name}: field {field} is required")]
    RequiredField {
        /// Task kind.
        kind: &'static str,
        /// Task name.
        name: String,
        /// Missing field.
        field: String,
    },

    /// A field changed that cannot be changed in place.
    #[error("cannot apply changes to {kind}: {field}")]
    CannotChangeField {
        /// Task kind.
        kind: &'static str,
        /// Offending field.
        field: String,
    },

    /// A field carries a value the cloud would reject.
    #[error("{kind} {name}: invalid {field}: {reason}")]
    InvalidValue {
        /// Task kind.
        kind: &'static str,
        /// Task name.
        name: String,
        /// Offending field.
        field: String,
        /// Why it is invalid.
        reason: String,
    },

    /// A shared or must-exist resource was not found.
    #[error("{kind} {name} is expected to exist but was not found")]
    SharedNotFound {
        /// Task kind.
        kind: &'static str,
        /// Task name.
        name: String,
    },

    /// A validate-only resource differs from its declaration.
    #[error("{kind} {name} differs from its declaration in: {fields}")]
    LifecycleViolation {
        /// Task kind.
        kind: &'static str,
        /// Task name.
        name: String,
        /// Comma separated list of changed fields.
        fields: String,
    },

    /// A referenced task produced no usable output.
    #[error("unresolved reference to {target}")]
    UnresolvedReference {
        /// Key of the referenced task.
        target: String,
    },
}

/// Errors raised by the task graph engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The dependency graph contains a cycle.
    #[error("Dependency cycle between tasks: {tasks}")]
    Cycle {
        /// Tasks participating in (or blocked by) the cycle.
        tasks: String,
    },

    /// A task depends on a task that was never declared.
    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency {
        /// Declaring task.
        task: String,
        /// Missing dependency.
        dependency: String,
    },

    /// Two tasks share a key.
    #[error("Duplicate task: {task}")]
    DuplicateTask {
        /// Duplicated key.
        task: String,
    },

    /// A task kept failing with transient errors past its time budget.
    #[error("Task {task} did not complete within {secs}s: {last_error}")]
    MaxDurationExceeded {
        /// Task key.
        task: String,
        /// Time budget in seconds.
        secs: u64,
        /// The last transient error seen.
        last_error: String,
    },

    /// One or more tasks failed; details are in the run report.
    #[error("{failed} task(s) failed, {skipped} skipped")]
    TasksFailed {
        /// Number of failed tasks.
        failed: usize,
        /// Number of tasks skipped because a predecessor failed.
        skipped: usize,
    },
}

/// Errors raised while building tasks from the cluster specification.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The load balancer type is not supported.
    #[error("Unsupported API load balancer type: {lb_type}")]
    UnsupportedLoadBalancer {
        /// Requested type.
        lb_type: String,
    },

    /// An instance group has no zones to spread across.
    #[error("Instance group {group} has no zones")]
    NoZones {
        /// Instance group name.
        group: String,
    },

    /// The cluster specification cannot be turned into tasks.
    #[error("Invalid cluster specification: {message}")]
    InvalidSpec {
        /// Description of the problem.
        message: String,
    },

    /// No free range of the requested size remains in the base block.
    #[error("No free /{prefix} left in {base}")]
    CidrExhausted {
        /// Base block searched.
        base: String,
        /// Requested prefix length.
        prefix: u8,
    },
}

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, InfraError>;

impl InfraError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the engine should requeue the task that produced this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Cloud(CloudError::ResourceNotReady { .. } | CloudError::Network { .. }) => true,
            Self::Cloud(CloudError::Api { code, .. }) => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// Returns true if this is a cloud `NotFound`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Cloud(CloudError::NotFound { .. }))
    }

    /// Returns true if this is a cloud `AlreadyExists`.
    #[must_use]
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::Cloud(CloudError::AlreadyExists { .. }))
    }

    /// Returns true if this is an IAM etag conflict.
    #[must_use]
    pub const fn is_etag_mismatch(&self) -> bool {
        matches!(self, Self::Cloud(CloudError::EtagMismatch { .. }))
    }

    /// Returns a stable short name for the error kind, used in run reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "Config",
            Self::Cloud(e) => match e {
                CloudError::NotFound { .. } => "NotFound",
                CloudError::AlreadyExists { .. } => "AlreadyExists",
                CloudError::BadRequest { .. } => "BadRequest",
                CloudError::EtagMismatch { .. } => "EtagMismatch",
                CloudError::ResourceNotReady { .. } => "ResourceNotReady",
                CloudError::OperationFailed { .. } => "OperationFailed",
                CloudError::Timeout { .. } => "Timeout",
                CloudError::UnhandledRequest { .. } => "UnhandledRequest",
                CloudError::Api { .. } => "Api",
                CloudError::Network { .. } => "Network",
                CloudError::InvalidUrl { .. } => "InvalidUrl",
            },
            Self::Task(e) => match e {
                TaskError::RequiredField { .. } => "RequiredField",
                TaskError::CannotChangeField { .. } => "CannotChangeField",
                TaskError::InvalidValue { .. } => "InvalidValue",
                TaskError::SharedNotFound { .. } => "SharedNotFound",
                TaskError::LifecycleViolation { .. } => "LifecycleViolation",
                TaskError::UnresolvedReference { .. } => "UnresolvedReference",
            },
            Self::Engine(_) => "Engine",
            Self::Model(_) => "Model",
            Self::Io(_) => "Io",
            Self::Json(_) => "Json",
            Self::Internal(_) => "Internal",
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl CloudError {
    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates an `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Maps an API error body to a typed error.
    ///
    /// `status` is the symbolic status (`NOT_FOUND`, ...) when the body carries one.
    #[must_use]
    pub fn from_api(code: u16, status: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match (code, status) {
            (404, _) | (_, "NOT_FOUND") => Self::NotFound {
                kind: "resource".to_string(),
                name: message,
            },
            (409, _) | (_, "ALREADY_EXISTS") => Self::AlreadyExists {
                kind: "resource".to_string(),
                name: message,
            },
            (400, _) | (_, "BAD_REQUEST" | "INVALID_ARGUMENT") => {
                if message.contains("resourceNotReady") || message.contains("is not ready") {
                    Self::ResourceNotReady { message }
                } else {
                    Self::BadRequest { message }
                }
            }
            _ => Self::Api {
                code,
                status: status.to_string(),
                message,
            },
        }
    }

    /// Returns the symbolic status and HTTP code for this error, as served on the wire.
    #[must_use]
    pub const fn wire_status(&self) -> (&'static str, u16) {
        match self {
            Self::NotFound { .. } | Self::EtagMismatch { .. } => ("NOT_FOUND", 404),
            Self::AlreadyExists { .. } => ("ALREADY_EXISTS", 409),
            _ => ("BAD_REQUEST", 400),
        }
    }
}

impl TaskError {
    /// Creates a `cannot apply changes` error for a field.
    #[must_use]
    pub fn cannot_change(kind: &'static str, field: impl Into<String>) -> Self {
        Self::CannotChangeField {
            kind,
            field: field.into(),
        }
    }

    /// Creates a required-field error.
    #[must_use]
    pub fn required(kind: &'static str, name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::RequiredField {
            kind,
            name: name.into(),
            field: field.into(),
        }
    }

    /// Creates an invalid-value error.
    #[must_use]
    pub fn invalid(
        kind: &'static str,
        name: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            kind,
            name: name.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}
