use crate::error::{Result, ShellError};

/// Parses a hex payload as typed at the prompt. Either case is accepted.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    hex::decode(text).map_err(|err| ShellError::Format {
        text: text.to_owned(),
        reason: err.to_string(),
    })
}

/// Lowercase hex, no separators.
pub fn encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
