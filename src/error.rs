use thiserror::Error;
use uuid::Uuid;

use crate::transport::{Capability, TransportError};

pub type Result<T> = std::result::Result<T, ShellError>;

/// Every failure a shell command can end in.
///
/// None of these are fatal: the shell loop prints them and prompts again.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("not connected to a peripheral")]
    NotConnected,

    #[error("characteristic {0} is not in the service tree")]
    UnknownCharacteristic(Uuid),

    #[error("characteristic {uuid} does not support {capability}")]
    Capability { uuid: Uuid, capability: Capability },

    #[error("invalid hex payload '{text}': {reason}")]
    Format { text: String, reason: String },

    #[error("'{identifier}' matches more than one scanned device: {}", .candidates.join(", "))]
    AmbiguousTarget {
        identifier: String,
        candidates: Vec<String>,
    },

    #[error("no scanned device matches '{0}' and it is not a device address")]
    NotFound(String),

    #[error("no characteristic given and no default characteristic set")]
    NoDefaultCharacteristic,

    #[error("unknown command '{verb}'; available commands: {available}")]
    UnknownCommand { verb: String, available: String },

    #[error("usage: {0}")]
    Usage(String),
}

impl ShellError {
    /// Canonical name of the error kind, printed ahead of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ShellError::Transport(_) => "TransportError",
            ShellError::NotConnected => "NotConnectedError",
            ShellError::UnknownCharacteristic(_) => "UnknownCharacteristicError",
            ShellError::Capability { .. } => "CapabilityError",
            ShellError::Format { .. } => "FormatError",
            ShellError::AmbiguousTarget { .. } => "AmbiguousTargetError",
            ShellError::NotFound(_) => "NotFoundError",
            ShellError::NoDefaultCharacteristic => "NoDefaultCharacteristicError",
            ShellError::UnknownCommand { .. } => "UnknownCommandError",
            ShellError::Usage(_) => "UsageError",
        }
    }
}
