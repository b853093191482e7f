use crate::error::Result;
use crate::job::Job;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Error {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// What a pool message means to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolMessage {
    /// Structured `error` field.
    Error(Error),
    /// First job, carried in `result.job` of the login response.
    LoginJob(Job),
    /// Job pushed in `params`.
    Job(Job),
    /// `result` without a job: share or keepalive acknowledgement.
    Status(String),
    /// None of the fields above.
    Unexpected,
}

impl PoolMessage {
    /// Classifies a parsed message object. Checks run in order: `error`,
    /// `result`, `params`. Job fields that fail to decode make the whole
    /// message malformed.
    pub fn classify(message: &Value, known_miner_id: Option<&str>) -> Result<Self> {
        if let Some(error) = message.get("error").filter(|e| e.is_object() || e.is_array()) {
            let error = Error::deserialize(error).unwrap_or_else(|_| Error {
                code: 0,
                message: error.to_string(),
            });
            return Ok(PoolMessage::Error(error));
        }

        if let Some(result) = message.get("result").filter(|r| !r.is_null()) {
            return match result.get("job") {
                Some(job) => {
                    let miner_id = result.get("id").and_then(Value::as_str).or(known_miner_id);
                    Ok(PoolMessage::LoginJob(Job::from_value(job, miner_id)?))
                }
                None => Ok(PoolMessage::Status(
                    result
                        .get("status")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                )),
            };
        }

        if let Some(params) = message.get("params").filter(|p| p.is_object()) {
            return Ok(PoolMessage::Job(Job::from_value(params, known_miner_id)?));
        }

        Ok(PoolMessage::Unexpected)
    }
}

/// Parses one line, yielding it only if it is a JSON object.
pub fn parse_object(line: &str) -> Option<Value> {
    serde_json::from_str::<Value>(line.trim())
        .ok()
        .filter(Value::is_object)
}
