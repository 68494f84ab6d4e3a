// Shape-checking of JSON replies from the model.
//
// Models sometimes wrap JSON in a ```json fence or add a sentence around it,
// so the object is located first and then deserialized with serde.

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::client::LlmError;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("model reply contained no JSON object")]
    NoJson { raw: String },

    #[error("model reply did not match the expected shape: {source}")]
    Shape {
        source: serde_json::Error,
        raw: String,
    },
}

/// Locate the outermost JSON object in `raw`.
///
/// A fenced block (```json ... ``` or bare ```) takes precedence; otherwise
/// the text between the first `{` and the last `}` is used.
pub fn json_object(raw: &str) -> Option<&str> {
    let body = match raw.find("```") {
        Some(open) => {
            let after = &raw[open + 3..];
            // Skip the info string ("json") up to the end of the line.
            let after = after.find('\n').map_or(after, |nl| &after[nl + 1..]);
            match after.find("```") {
                Some(close) => &after[..close],
                None => after,
            }
        }
        None => raw,
    };

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| body[start..=end].trim())
}

/// Deserialize the JSON object embedded in `raw` into `T`.
pub fn parse_reply<T: DeserializeOwned>(raw: &str) -> Result<T, ExtractionError> {
    let json = json_object(raw).ok_or_else(|| ExtractionError::NoJson {
        raw: raw.to_string(),
    })?;
    serde_json::from_str(json).map_err(|source| ExtractionError::Shape {
        source,
        raw: raw.to_string(),
    })
}
