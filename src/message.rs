//! Normalized multi-part message model and its JSON codec.
//!
//! Every conversation artifact in the runtime is a [`Message`]: an ordered
//! list of typed [`Part`]s plus a [`Creator`] (role and optional display
//! name), a message id, the producing model id where known, and a timestamp.
//!
//! The part vocabulary is the tagged sum the whole runtime speaks:
//!
//! - [`TextPart`]: free text (model deltas, prompts, thinking output)
//! - [`DataPart`]: structured key/value payload, rendered as JSON for
//!   backends that only accept text
//! - [`BinaryPart`]: MIME-typed blob, inline bytes or URL reference
//! - [`ToolCallPart`]: a tool invocation requested by the assistant
//! - [`ToolCallResultPart`]: the paired result, carried on a tool-role
//!   message
//!
//! # Wire format
//!
//! A message serializes as
//! `{message_id, creator, model, timestamp, parts: [{type, content}…]}`.
//! Binary `content` bytes are emitted as base64 but accepted as either a
//! base64 string or a JSON number array, since both appear in the wild.
//! Decoding an unknown part tag yields a text-less placeholder rather than an
//! error, except for tool-ish tags, which are rejected because silently
//! dropping them would break call/result pairing.

use crate::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Identifies the sender/role of a message in the conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message that establishes agent behavior and context.
    System,
    /// User message representing human or application input.
    User,
    /// Assistant message containing the model's response.
    Assistant,
    /// Tool message carrying function execution results.
    Tool,
}

impl Role {
    /// Lowercase wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a message: a role plus an optional display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Creator {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
}

impl Creator {
    pub fn new(role: Role) -> Self {
        Self { role, name: None }
    }

    pub fn named(role: Role, name: impl Into<String>) -> Self {
        Self {
            role,
            name: Some(name.into()),
        }
    }
}

/// Free text content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TextPart {
    pub text: String,
}

impl TextPart {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Structured key/value payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DataPart {
    pub data: Map<String, Value>,
}

impl DataPart {
    pub fn new(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// Render the payload as compact JSON, for backends that only take text.
    pub fn render(&self) -> String {
        Value::Object(self.data.clone()).to_string()
    }
}

/// MIME-typed blob with either inline bytes or a URL reference.
///
/// `length >= 0` means `content` holds the loaded bytes; `length < 0` means
/// loading is deferred to the `url`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinaryPart {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub name: Option<String>,
    pub mime_type: String,
    #[serde(with = "binary_content", default)]
    pub content: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
    #[serde(default)]
    pub length: i64,
}

impl BinaryPart {
    /// Inline blob; the length is taken from the byte slice.
    pub fn inline(name: Option<String>, mime_type: impl Into<String>, content: Vec<u8>) -> Self {
        let length = content.len() as i64;
        Self {
            name,
            mime_type: mime_type.into(),
            content,
            url: None,
            length,
        }
    }

    /// Deferred blob referenced by URL.
    pub fn reference(
        name: Option<String>,
        mime_type: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name,
            mime_type: mime_type.into(),
            content: Vec::new(),
            url: Some(url.into()),
            length: -1,
        }
    }

    /// True when the bytes are present inline.
    pub fn is_inline(&self) -> bool {
        self.length >= 0
    }
}

/// A tool invocation emitted by the assistant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolCallPart {
    /// Unique identifier for this tool call, used to correlate the result.
    pub id: String,
    /// Name of the tool to execute.
    pub name: String,
    /// Argument map to pass to the tool.
    pub arguments: Map<String, Value>,
}

impl ToolCallPart {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The result of a tool invocation, pairing with a prior [`ToolCallPart`] by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolCallResultPart {
    /// Id of the tool call this result answers.
    pub id: String,
    /// Name of the tool that produced the result.
    pub name: String,
    /// Result map. Recoverable tool failures are carried here as
    /// `{"success": false, "error": …}`.
    pub result: Map<String, Value>,
}

impl ToolCallResultPart {
    pub fn new(id: impl Into<String>, name: impl Into<String>, result: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            result,
        }
    }

    /// Build a failed-call result with the conventional error shape.
    pub fn failure(id: impl Into<String>, name: impl Into<String>, error: impl Into<String>) -> Self {
        let mut result = Map::new();
        result.insert("success".into(), Value::Bool(false));
        result.insert("error".into(), Value::String(error.into()));
        Self::new(id, name, result)
    }
}

/// A typed element of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(TextPart),
    Data(DataPart),
    Binary(BinaryPart),
    ToolCall(ToolCallPart),
    ToolCallResult(ToolCallResultPart),
}

impl Part {
    /// Wire tag of this part.
    pub fn kind(&self) -> &'static str {
        match self {
            Part::Text(_) => "text",
            Part::Data(_) => "data",
            Part::Binary(_) => "binary",
            Part::ToolCall(_) => "tool_call",
            Part::ToolCallResult(_) => "tool_call_result",
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(TextPart::new(text))
    }

    pub fn data(data: Map<String, Value>) -> Self {
        Part::Data(DataPart::new(data))
    }
}

impl Serialize for Part {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::Error as _;
        let content = match self {
            Part::Text(p) => serde_json::to_value(p),
            Part::Data(p) => serde_json::to_value(p),
            Part::Binary(p) => serde_json::to_value(p),
            Part::ToolCall(p) => serde_json::to_value(p),
            Part::ToolCallResult(p) => serde_json::to_value(p),
        }
        .map_err(S::Error::custom)?;

        let mut s = serializer.serialize_struct("Part", 2)?;
        s.serialize_field("type", self.kind())?;
        s.serialize_field("content", &content)?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for Part {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error as _;

        #[derive(Deserialize)]
        struct RawPart {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            content: Value,
        }

        let raw = RawPart::deserialize(deserializer)?;
        let part = match raw.kind.as_str() {
            "text" => Part::Text(serde_json::from_value(raw.content).map_err(D::Error::custom)?),
            "data" => Part::Data(serde_json::from_value(raw.content).map_err(D::Error::custom)?),
            "binary" => {
                Part::Binary(serde_json::from_value(raw.content).map_err(D::Error::custom)?)
            }
            "tool_call" => {
                Part::ToolCall(serde_json::from_value(raw.content).map_err(D::Error::custom)?)
            }
            "tool_call_result" => Part::ToolCallResult(
                serde_json::from_value(raw.content).map_err(D::Error::custom)?,
            ),
            // Unknown tool traffic cannot be degraded without breaking the
            // call/result pairing invariant.
            other if other.starts_with("tool") => {
                return Err(D::Error::custom(format!("unknown tool part type: {other}")));
            }
            // Anything else degrades to a text-less placeholder.
            _ => Part::Text(TextPart::default()),
        };
        Ok(part)
    }
}

mod binary_content {
    //! Binary bytes on the wire: emitted as base64, accepted as base64
    //! string or number array.

    use super::*;

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        use serde::de::Error as _;

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Base64(String),
            Bytes(Vec<u8>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Base64(s) => BASE64.decode(s.as_bytes()).map_err(D::Error::custom),
            Repr::Bytes(b) => Ok(b),
        }
    }
}

/// A complete message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Unique identifier, assigned at construction.
    pub message_id: String,
    /// Who produced the message.
    pub creator: Creator,
    /// Id of the model that produced the message, where known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    /// Ordered, non-empty list of parts.
    pub parts: Vec<Part>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// General constructor; assigns a fresh id and the current time.
    pub fn new(creator: Creator, parts: Vec<Part>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            creator,
            model: None,
            parts,
            timestamp: Utc::now(),
        }
    }

    /// Creates a system message with a single text part.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Creator::new(Role::System), vec![Part::text(text)])
    }

    /// Creates a user message with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Creator::new(Role::User), vec![Part::text(text)])
    }

    /// Creates a user message from explicit parts.
    pub fn user_with_parts(parts: Vec<Part>) -> Self {
        Self::new(Creator::new(Role::User), parts)
    }

    /// Creates an assistant message with text and any number of tool calls.
    ///
    /// A response that carries neither (e.g. a content-filtered terminal
    /// with no preceding deltas) degrades to a single text-less placeholder
    /// part, keeping the parts list non-empty.
    pub fn assistant(
        message_id: impl Into<String>,
        model: impl Into<String>,
        text: impl Into<String>,
        tool_calls: Vec<ToolCallPart>,
    ) -> Self {
        let text = text.into();
        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
        parts.extend(tool_calls.into_iter().map(Part::ToolCall));
        if parts.is_empty() {
            parts.push(Part::text(""));
        }
        Self {
            message_id: message_id.into(),
            creator: Creator::new(Role::Assistant),
            model: Some(model.into()),
            parts,
            timestamp: Utc::now(),
        }
    }

    /// Creates a tool-role message carrying a single tool-call result.
    pub fn tool_result(result: ToolCallResultPart, timestamp: DateTime<Utc>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            creator: Creator::new(Role::Tool),
            model: None,
            parts: vec![Part::ToolCallResult(result)],
            timestamp,
        }
    }

    /// Attach the producing model id.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// All tool-call parts, in order.
    pub fn tool_calls(&self) -> Vec<&ToolCallPart> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCall(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// All tool-call-result parts, in order.
    pub fn tool_call_results(&self) -> Vec<&ToolCallResultPart> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolCallResult(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    /// True if the message carries at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::ToolCall(_)))
    }
}

/// Encode a message to its wire JSON.
pub fn encode_message(message: &Message) -> Result<String> {
    serde_json::to_string(message).map_err(Error::from)
}

/// Decode a message from its wire JSON.
pub fn decode_message(json: &str) -> Result<Message> {
    serde_json::from_str(json).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
    }

    #[test]
    fn test_part_wire_shape() {
        let part = Part::text("Hello");
        let value = serde_json::to_value(&part).unwrap();
        assert_eq!(value["type"], "text");
        assert_eq!(value["content"]["text"], "Hello");
    }

    #[test]
    fn test_message_round_trip_all_part_types() {
        let mut data = Map::new();
        data.insert("k".into(), json!(1));
        let mut args = Map::new();
        args.insert("timezone".into(), json!("UTC"));
        let mut result = Map::new();
        result.insert("current_time".into(), json!("2024-01-01T00:00:00Z"));

        let message = Message::new(
            Creator::named(Role::Assistant, "core"),
            vec![
                Part::text("hello"),
                Part::data(data),
                Part::Binary(BinaryPart::inline(
                    Some("img.png".into()),
                    "image/png",
                    vec![1, 2, 3],
                )),
                Part::ToolCall(ToolCallPart::new("call_1", "current_time", args)),
                Part::ToolCallResult(ToolCallResultPart::new("call_1", "current_time", result)),
            ],
        );

        let encoded = encode_message(&message).unwrap();
        let decoded = decode_message(&encoded).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_binary_content_accepts_base64_and_array() {
        let from_b64: BinaryPart = serde_json::from_value(json!({
            "mime_type": "image/png",
            "content": BASE64.encode([9u8, 8, 7]),
            "length": 3
        }))
        .unwrap();
        assert_eq!(from_b64.content, vec![9, 8, 7]);

        let from_array: BinaryPart = serde_json::from_value(json!({
            "mime_type": "image/png",
            "content": [9, 8, 7],
            "length": 3
        }))
        .unwrap();
        assert_eq!(from_array.content, vec![9, 8, 7]);
    }

    #[test]
    fn test_binary_inline_vs_reference() {
        let inline = BinaryPart::inline(None, "application/pdf", vec![0; 16]);
        assert!(inline.is_inline());
        assert_eq!(inline.length, 16);

        let referenced = BinaryPart::reference(None, "application/pdf", "https://example.com/doc.pdf");
        assert!(!referenced.is_inline());
        assert_eq!(referenced.length, -1);
    }

    #[test]
    fn test_unknown_part_tag_decodes_as_placeholder() {
        let part: Part = serde_json::from_value(json!({
            "type": "audio_transcript",
            "content": {"whatever": true}
        }))
        .unwrap();
        assert_eq!(part, Part::Text(TextPart::default()));
    }

    #[test]
    fn test_unknown_tool_tag_is_rejected() {
        let result: std::result::Result<Part, _> = serde_json::from_value(json!({
            "type": "tool_call_batch",
            "content": {}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_assistant_constructor() {
        let mut args = Map::new();
        args.insert("q".into(), json!("rust"));
        let msg = Message::assistant(
            "msg_1",
            "claude-sonnet-4-5",
            "Searching now.",
            vec![ToolCallPart::new("call_1", "search", args)],
        );

        assert_eq!(msg.creator.role, Role::Assistant);
        assert_eq!(msg.model.as_deref(), Some("claude-sonnet-4-5"));
        assert_eq!(msg.text(), "Searching now.");
        assert_eq!(msg.tool_calls().len(), 1);
        assert!(msg.has_tool_calls());
    }

    #[test]
    fn test_assistant_constructor_skips_empty_text() {
        let mut args = Map::new();
        args.insert("a".into(), json!(1));
        let msg = Message::assistant("m", "model", "", vec![ToolCallPart::new("c", "t", args)]);
        assert_eq!(msg.parts.len(), 1);
    }

    #[test]
    fn test_assistant_constructor_never_yields_zero_parts() {
        // No text, no tool calls: a content-filtered terminal looks exactly
        // like this. The parts list must still be non-empty.
        let msg = Message::assistant("m", "model", "", Vec::new());
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.parts[0], Part::Text(TextPart::default()));
        assert_eq!(msg.text(), "");
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn test_tool_result_message() {
        let result = ToolCallResultPart::failure("call_9", "sleep", "sleep cancelled");
        let msg = Message::tool_result(result.clone(), Utc::now());
        assert_eq!(msg.creator.role, Role::Tool);
        assert_eq!(msg.tool_call_results(), vec![&result]);
        assert_eq!(
            msg.tool_call_results()[0].result["success"],
            Value::Bool(false)
        );
    }

    #[test]
    fn test_text_concatenates_in_order() {
        let msg = Message::user_with_parts(vec![Part::text("a"), Part::text("b")]);
        assert_eq!(msg.text(), "ab");
    }

    #[test]
    fn test_data_part_render() {
        let mut data = Map::new();
        data.insert("x".into(), json!(2));
        let part = DataPart::new(data);
        assert_eq!(part.render(), r#"{"x":2}"#);
    }
}
