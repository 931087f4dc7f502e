//! Error type for the Aliyun CLI gateway.

use thiserror::Error;

use crate::command::{CommandError, CommandOutput};
use crate::inventory::{FailureClass, FailureClassification};

/// Provider codes that mean "try another candidate".
const TRANSIENT_CODES: &[&str] = &[
    "OperationDenied.NoStock",
    "Zone.NotOnSale",
    "InvalidResourceType.NotSupported",
    "InvalidInstanceType.ValueNotSupported",
    "InvalidSystemDiskCategory.ValueNotSupported",
    "ServiceUnavailable",
    "InternalError",
    "OperationConflict",
    "IncorrectVSwitchStatus",
];

/// Code families that are transient regardless of their suffix.
const TRANSIENT_PREFIXES: &[&str] = &["InvalidSpotPriceLimit", "Throttling"];

/// Errors raised by [`super::AliyunGateway`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AliyunError {
    /// Raised when the CLI cannot be started.
    #[error(transparent)]
    Runner(#[from] CommandError),
    /// Raised when the API rejects a call with an error code.
    #[error("{action} failed with {code}: {message}")]
    Api {
        /// API action (for example `RunInstances`).
        action: String,
        /// Provider error code.
        code: String,
        /// Provider error message.
        message: String,
    },
    /// Raised when the CLI exits non-zero without a recognisable API error.
    #[error("{action} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// API action being invoked.
        action: String,
        /// Human readable exit status.
        status_text: String,
        /// Stderr captured from the CLI.
        stderr: String,
    },
    /// Raised when JSON output cannot be parsed.
    #[error("failed to parse {action} output: {message}")]
    Parse {
        /// API action whose output was parsed.
        action: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when a response lacks a required value.
    #[error("{action} response is missing {field}")]
    MissingField {
        /// API action whose output was incomplete.
        action: String,
        /// Missing field.
        field: &'static str,
    },
    /// Raised when a created resource never becomes available.
    #[error("{resource} {id} did not become available")]
    NotReady {
        /// Kind of resource.
        resource: String,
        /// Resource id.
        id: String,
    },
    /// Raised when the blocking worker running the CLI panics or is cancelled.
    #[error("worker running {action} failed: {message}")]
    Join {
        /// API action being invoked.
        action: String,
        /// Join error message.
        message: String,
    },
}

impl AliyunError {
    /// Provider error code, when the API returned one.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Converts a failed CLI invocation into an error, extracting the
    /// `ErrorCode:` and `Message:` lines the CLI prints for API errors.
    pub(super) fn from_output(action: &str, output: &CommandOutput) -> Self {
        match field(&output.stderr, "ErrorCode:") {
            Some(code) => Self::Api {
                action: action.to_owned(),
                code,
                message: field(&output.stderr, "Message:").unwrap_or_default(),
            },
            None => Self::CommandFailure {
                action: action.to_owned(),
                status_text: output.status_text(),
                stderr: output.stderr.trim().to_owned(),
            },
        }
    }
}

fn field(stderr: &str, label: &str) -> Option<String> {
    stderr
        .lines()
        .find_map(|line| line.trim().strip_prefix(label))
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Classifies a provider error code.
#[must_use]
pub fn classify_code(code: &str) -> FailureClass {
    let transient = TRANSIENT_CODES.contains(&code)
        || TRANSIENT_PREFIXES
            .iter()
            .any(|prefix| code.starts_with(prefix));
    if transient {
        FailureClass::Transient
    } else {
        FailureClass::Fatal
    }
}

impl FailureClassification for AliyunError {
    fn classify(&self) -> FailureClass {
        match self {
            Self::Api { code, .. } => classify_code(code),
            Self::NotReady { .. } => FailureClass::Transient,
            _ => FailureClass::Fatal,
        }
    }
}
