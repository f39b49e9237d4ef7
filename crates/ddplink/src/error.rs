//! CLI error types with miette diagnostics.
//!
//! Maps `ClientError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use ddplink_config::ConfigError;
use ddplink_core::ClientError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const REMOTE: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to {url}")]
    #[diagnostic(
        code(ddplink::connection_failed),
        help(
            "Check that the server is running and the endpoint ends in /websocket.\n\
             URL: {url}"
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: ClientError,
    },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Login failed for profile '{profile}'")]
    #[diagnostic(
        code(ddplink::auth_failed),
        help("Verify the username, password or resume token of the profile.")
    )]
    AuthFailed {
        profile: String,
        #[source]
        source: ClientError,
    },

    #[error("No password configured for profile '{profile}'")]
    #[diagnostic(
        code(ddplink::no_credentials),
        help("Set `password_env` in the profile or export DDPLINK_PASSWORD.")
    )]
    NoCredentials { profile: String },

    // ── Server ───────────────────────────────────────────────────────
    #[error("Server error: {message}")]
    #[diagnostic(code(ddplink::remote))]
    Remote { message: String },

    #[error("Subscription to '{publication}' failed: {message}")]
    #[diagnostic(
        code(ddplink::subscription),
        help("Check the publication name and its arguments.")
    )]
    Subscription { publication: String, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(ddplink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(ddplink::profile_not_found),
        help("Available profiles: {available}")
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No server configured")]
    #[diagnostic(
        code(ddplink::no_config),
        help(
            "Pass --endpoint ws://host/websocket, or add a profile to\n\
             {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(ddplink::config))]
    Config(Box<ConfigError>),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("No answer within {timeout_ms} ms")]
    #[diagnostic(
        code(ddplink::timeout),
        help("Increase the bound with --timeout-ms or check server responsiveness.")
    )]
    Timeout { timeout_ms: u64 },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(ddplink::json))]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    #[diagnostic(code(ddplink::client))]
    Client(ClientError),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Remote { .. } | Self::Subscription { .. } => exit_code::REMOTE,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileNotFound { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ClientError → CliError mapping ───────────────────────────────────

impl From<ClientError> for CliError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Timeout { timeout_ms } => CliError::Timeout { timeout_ms },
            ClientError::Remote(remote) => CliError::Remote {
                message: remote.to_string(),
            },
            ClientError::InvalidData { message } => CliError::Validation {
                field: "data".into(),
                reason: message,
            },
            other => CliError::Client(other),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            other => CliError::Config(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_keep_their_bound() {
        let err = CliError::from(ClientError::Timeout { timeout_ms: 250 });
        assert_eq!(err.exit_code(), exit_code::TIMEOUT);
        assert_eq!(err.to_string(), "No answer within 250 ms");
    }

    #[test]
    fn config_validation_is_a_usage_error() {
        let err = CliError::from(ConfigError::Validation {
            field: "endpoint".into(),
            reason: "bad".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }

    #[test]
    fn shutdown_is_general() {
        assert_eq!(CliError::from(ClientError::Shutdown).exit_code(), exit_code::GENERAL);
    }
}
