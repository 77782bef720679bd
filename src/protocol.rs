use crate::error::DecodeError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Body of `POST /run_sse`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub new_message: NewMessage,
}

#[derive(Debug, Serialize)]
pub struct NewMessage {
    pub role: String,
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

impl NewMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![TextPart { text: text.into() }],
        }
    }
}

/// One authored unit of the upstream stream, after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub author: String,
    pub parts: Vec<ContentPart>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text { value: String },
    FunctionCall { name: String, args: Map<String, Value> },
    FunctionResponse { result: Option<String> },
}

#[cfg(test)]
impl Event {
    pub fn new(author: impl Into<String>, parts: Vec<ContentPart>) -> Self {
        Self {
            author: author.into(),
            parts,
            error_code: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
impl ContentPart {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text {
            value: value.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    author: String,
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Option<Vec<WirePart>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<WireFunctionCall>,
    #[serde(default)]
    function_response: Option<WireFunctionResponse>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionResponse {
    // Outer `None`: key absent. Inner `None`: explicit null.
    #[serde(default, deserialize_with = "present")]
    result: Option<Option<String>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl TryFrom<WirePart> for ContentPart {
    type Error = DecodeError;

    fn try_from(part: WirePart) -> Result<Self, Self::Error> {
        match (part.text, part.function_call, part.function_response) {
            (Some(value), None, None) => Ok(ContentPart::Text { value }),
            (None, Some(call), None) => Ok(ContentPart::FunctionCall {
                name: call.name,
                args: call.args.unwrap_or_default(),
            }),
            (None, None, Some(response)) => match response.result {
                Some(result) => Ok(ContentPart::FunctionResponse { result }),
                None => Err(DecodeError::Schema(
                    "functionResponse carries no result field".to_string(),
                )),
            },
            (None, None, None) => Err(DecodeError::Schema(
                "part carries none of text, functionCall, functionResponse".to_string(),
            )),
            _ => Err(DecodeError::Schema(
                "part carries more than one of text, functionCall, functionResponse".to_string(),
            )),
        }
    }
}

/// Parses one `data:` payload into an `Event`.
///
/// Syntax errors are `DecodeError::Json`; anything that parses but does not
/// have the expected shape is `DecodeError::Schema`.
pub fn decode_event(payload: &str) -> Result<Event, DecodeError> {
    let value: Value = serde_json::from_str(payload)?;
    let wire: WireEvent =
        serde_json::from_value(value).map_err(|e| DecodeError::Schema(e.to_string()))?;

    let parts = wire
        .content
        .and_then(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .map(ContentPart::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Event {
        author: wire.author,
        parts,
        error_code: wire.error_code,
        error_message: wire.error_message,
    })
}
