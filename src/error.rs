//! Error types for device sessions and configuration transactions.
//!
//! Every failure the engine can report maps onto one [`ErrorKind`], which is
//! what diagnostics are keyed on. Transport errors coming from the SSH stack
//! are converted at the session boundary into the operation they interrupted.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Classification of a [`JunosError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Command,
    Lock,
    ConfigApply,
    ConfigCommit,
    ConfigClear,
    PreCheck,
    PostCheck,
    Decode,
    Cancelled,
    Identity,
    Config,
    Internal,
}

/// Errors that can occur while talking to a Junos device.
#[derive(Error, Debug)]
pub enum JunosError {
    /// Transport or session establishment failed.
    #[error("connection to {target} failed: {reason}")]
    Connection { target: String, reason: String },

    /// A read-only command was rejected or its round trip failed.
    #[error("command `{command}` failed: {reason}")]
    Command { command: String, reason: String },

    /// The candidate configuration lock could not be acquired.
    #[error("candidate configuration lock failed: {0}")]
    Lock(String),

    /// One or more `set`/`delete` lines were rejected by the device.
    #[error("config set error: {reason}")]
    ConfigApply {
        /// Attribute the failing lines were generated from, if known.
        path: Option<String>,
        reason: String,
    },

    /// The device refused to commit the candidate configuration.
    #[error("commit error: {0}")]
    ConfigCommit(String),

    /// Discarding the candidate or releasing the device lock failed.
    #[error("config clear/unlock error: {0}")]
    ConfigClear(String),

    /// A resource pre-check rejected the operation.
    #[error("{0}")]
    PreCheck(String),

    /// The device does not reflect the committed change.
    #[error("{0}")]
    PostCheck(String),

    /// A `$9$` secret could not be decoded.
    #[error("failed to decode {field}: {reason}")]
    Decode { field: String, reason: String },

    /// The operation's cancellation token fired before the call.
    #[error("operation cancelled before `{0}`")]
    Cancelled(String),

    /// A resource identity string could not be split into its fields.
    #[error("invalid resource id `{id}`: {reason}")]
    InvalidIdentity { id: String, reason: String },

    /// Provider configuration is incomplete or inconsistent.
    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),

    /// The SSH channel was closed while waiting for a NETCONF reply.
    #[error("channel disconnect on wait reply")]
    ChannelDisconnect,

    /// No reply delimiter arrived within the command timeout.
    #[error("rpc timeout, partial reply: {0}")]
    ExecTimeout(String),

    /// A replayed session had no recorded reply for a request.
    #[error("replay mismatch: {0}")]
    ReplayMismatch(String),

    #[error("internal error: {0}")]
    InternalServerError(String),

    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    #[error("failed to send data: {0}")]
    SendDataError(#[from] SendError<Vec<u8>>),
}

impl JunosError {
    /// Returns the taxonomy bucket of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            JunosError::Connection { .. }
            | JunosError::ChannelDisconnect
            | JunosError::Ssh2Error(_)
            | JunosError::RusshError(_)
            | JunosError::SendDataError(_) => ErrorKind::Connection,
            JunosError::Command { .. } | JunosError::ExecTimeout(_) => ErrorKind::Command,
            JunosError::ReplayMismatch(_) => ErrorKind::Command,
            JunosError::Lock(_) => ErrorKind::Lock,
            JunosError::ConfigApply { .. } => ErrorKind::ConfigApply,
            JunosError::ConfigCommit(_) => ErrorKind::ConfigCommit,
            JunosError::ConfigClear(_) => ErrorKind::ConfigClear,
            JunosError::PreCheck(_) => ErrorKind::PreCheck,
            JunosError::PostCheck(_) => ErrorKind::PostCheck,
            JunosError::Decode { .. } => ErrorKind::Decode,
            JunosError::Cancelled(_) => ErrorKind::Cancelled,
            JunosError::InvalidIdentity { .. } => ErrorKind::Identity,
            JunosError::InvalidConfig(_) => ErrorKind::Config,
            JunosError::InternalServerError(_) => ErrorKind::Internal,
        }
    }

    /// Short summary line used when the error becomes a diagnostic.
    pub fn summary(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Connection => "Failed to Start Session",
            ErrorKind::Command => "Command Error",
            ErrorKind::Lock => "Config Lock Error",
            ErrorKind::ConfigApply => "Config Set Error",
            ErrorKind::ConfigCommit => "Commit Error",
            ErrorKind::ConfigClear => "Config Clear/Unlock Warning",
            ErrorKind::PreCheck => "Pre Check Error",
            ErrorKind::PostCheck => "Post Check Error",
            ErrorKind::Decode => "Decode Error",
            ErrorKind::Cancelled => "Operation Cancelled",
            ErrorKind::Identity => "Invalid Resource ID",
            ErrorKind::Config => "Invalid Provider Configuration",
            ErrorKind::Internal => "Internal Error",
        }
    }

    /// Attribute path attached to a config apply error.
    pub fn attribute_path(&self) -> Option<&str> {
        match self {
            JunosError::ConfigApply { path, .. } => path.as_deref(),
            _ => None,
        }
    }

    /// Wraps a transport failure that interrupted a read-only command.
    pub(crate) fn command(command: &str, err: impl std::fmt::Display) -> Self {
        JunosError::Command {
            command: command.to_string(),
            reason: err.to_string(),
        }
    }

    /// Shorthand for an unscoped config apply error.
    pub fn config_apply(reason: impl Into<String>) -> Self {
        JunosError::ConfigApply {
            path: None,
            reason: reason.into(),
        }
    }

    /// Scopes a config apply error to an attribute path.
    pub fn with_path(self, attribute: impl Into<String>) -> Self {
        match self {
            JunosError::ConfigApply { reason, .. } => JunosError::ConfigApply {
                path: Some(attribute.into()),
                reason,
            },
            other => other,
        }
    }
}
