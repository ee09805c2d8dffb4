use serde::Serialize;
use thiserror::Error;

use crate::jobs::JobStatus;
use crate::wizard::SubmitBlock;

/// Patterns (lowercase) that indicate sensitive data not safe for UI display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "authorization:",
    "\"token\"",
    "token=",
    "password",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for UI display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for the consumer of the sync layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Coarse classification used to decide how an error is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Per-field problem, recovered locally; never reaches the network.
    Validation,
    /// Credentials or session problem.
    Auth,
    /// Timeout or connectivity failure.
    Network,
    /// 5xx or an unexpected server answer.
    Server,
    /// Client-side credit precondition failed.
    InsufficientCredits,
    /// A job reached the `failed` status.
    JobFailed,
    /// A retry attempt was refused or failed.
    Retry,
    /// Local guard or programming error.
    Internal,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Validation ────────────────────────────────────────────────────────────
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    // ── Auth ──────────────────────────────────────────────────────────────────
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Session expired")]
    SessionExpired,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    // ── Server ────────────────────────────────────────────────────────────────
    #[error("Server error (HTTP {status})")]
    ServerError { status: u16 },

    #[error("Request rejected: {message}")]
    Rejected {
        field: Option<String>,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    // ── Credits ───────────────────────────────────────────────────────────────
    #[error("Insufficient credits (balance {balance})")]
    InsufficientCredits { balance: u32 },

    // ── Jobs ──────────────────────────────────────────────────────────────────
    #[error("Brief {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("Submission blocked: {0}")]
    SubmissionBlocked(SubmitBlock),

    #[error("Retry already in progress for brief {job_id}")]
    RetryInFlight { job_id: String },

    #[error("Retry of brief {job_id} failed: {message}")]
    RetryFailed { job_id: String, message: String },

    #[error("Brief {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Classifies the error into one of the user-facing categories.
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Validation { .. } => ErrorCategory::Validation,
            AppError::NotAuthenticated
            | AppError::SessionExpired
            | AppError::InvalidCredentials
            | AppError::AccountDisabled
            | AppError::RateLimited { .. } => ErrorCategory::Auth,
            AppError::ConnectionFailed(_) | AppError::Timeout => ErrorCategory::Network,
            AppError::ServerError { .. } | AppError::Rejected { .. } | AppError::NotFound(_) => {
                ErrorCategory::Server
            }
            AppError::InsufficientCredits { .. } => ErrorCategory::InsufficientCredits,
            AppError::JobFailed { .. } => ErrorCategory::JobFailed,
            AppError::RetryInFlight { .. } | AppError::RetryFailed { .. } => ErrorCategory::Retry,
            AppError::SubmissionBlocked(_)
            | AppError::InvalidTransition { .. }
            | AppError::Config(_)
            | AppError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// True for the only error that escalates automatically to sign-out.
    pub fn is_session_invalid(&self) -> bool {
        matches!(self, AppError::SessionExpired)
    }

    /// True when a later attempt may succeed without any user correction.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::ConnectionFailed(_) | AppError::Timeout | AppError::ServerError { .. }
        )
    }

    /// Converts the error into a user-friendly presentation suitable for UI display.
    /// Never leaks tokens, passwords or raw transport details.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Validation ────────────────────────────────────────────────────
            AppError::Validation { field, message } => ErrorPresentation {
                title: "Check This Field".into(),
                message: format!("{}: {}", field, sanitize_message(message, "invalid value")),
                action: Some("Correct the highlighted field".into()),
            },

            // ── Auth ──────────────────────────────────────────────────────────
            AppError::NotAuthenticated => ErrorPresentation {
                title: "Not Signed In".into(),
                message: "You need to sign in to continue.".into(),
                action: Some("Sign in".into()),
            },

            AppError::SessionExpired => ErrorPresentation {
                title: "Session Expired".into(),
                message: "Your session has expired. Please sign in again.".into(),
                action: Some("Sign in again".into()),
            },

            AppError::InvalidCredentials => ErrorPresentation {
                title: "Sign In Failed".into(),
                message: "Invalid email or password.".into(),
                action: Some("Check your credentials and sign in again".into()),
            },

            AppError::AccountDisabled => ErrorPresentation {
                title: "Account Disabled".into(),
                message: "This account has been disabled.".into(),
                action: Some("Contact support".into()),
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Attempts".into(),
                    message: format!("Too many failed attempts. {}", wait_msg),
                    action: Some("Wait and retry".into()),
                }
            }

            // ── Network ───────────────────────────────────────────────────────
            AppError::ConnectionFailed(_) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: "Network error. Please check your connection.".into(),
                action: Some("Check network and retry".into()),
            },

            AppError::Timeout => ErrorPresentation {
                title: "Request Timed Out".into(),
                message: "Request timeout. Please try again.".into(),
                action: Some("Retry".into()),
            },

            // ── Server ────────────────────────────────────────────────────────
            AppError::ServerError { .. } => ErrorPresentation {
                title: "Server Error".into(),
                message: "Server error. Please try again later.".into(),
                action: Some("Retry later".into()),
            },

            AppError::Rejected { field, message } => {
                let message = sanitize_message(message, "The request was rejected.");
                ErrorPresentation {
                    title: "Request Rejected".into(),
                    message: match field {
                        Some(field) => format!("{}: {}", field, message),
                        None => message,
                    },
                    action: None,
                }
            }

            AppError::NotFound(_) => ErrorPresentation {
                title: "Not Found".into(),
                message: "The requested brief could not be found.".into(),
                action: None,
            },

            // ── Credits ───────────────────────────────────────────────────────
            AppError::InsufficientCredits { .. } => ErrorPresentation {
                title: "No Credits Left".into(),
                message: "Insufficient credits to create a brief.".into(),
                action: Some("Upgrade your plan to get more credits".into()),
            },

            // ── Jobs ──────────────────────────────────────────────────────────
            AppError::JobFailed { message, .. } => ErrorPresentation {
                title: "Generation Failed".into(),
                message: sanitize_message(message, "The brand strategy could not be generated."),
                action: Some("Retry the brief".into()),
            },

            AppError::SubmissionBlocked(block) => ErrorPresentation {
                title: "Not Submitted".into(),
                message: block.to_string(),
                action: None,
            },

            AppError::RetryInFlight { .. } => ErrorPresentation {
                title: "Retry In Progress".into(),
                message: "This brief is already being retried.".into(),
                action: None,
            },

            AppError::RetryFailed { message, .. } => ErrorPresentation {
                title: "Retry Failed".into(),
                message: sanitize_message(message, "The brief could not be retried."),
                action: Some("Try the retry again".into()),
            },

            AppError::InvalidTransition { .. } => ErrorPresentation {
                title: "Action Unavailable".into(),
                message: "This action is not available for the brief's current status.".into(),
                action: None,
            },

            // ── Configuration / Generic ───────────────────────────────────────
            AppError::Config(msg) => ErrorPresentation {
                title: "Configuration Error".into(),
                message: sanitize_message(msg, "The client configuration is invalid."),
                action: Some("Fix the configuration and restart".into()),
            },

            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}
