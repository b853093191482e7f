pub mod request;
pub mod response;

use crate::error::Result;
use serde::Serialize;

/// Serializes `message` as a single line terminated by `\n`.
pub fn encode<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
