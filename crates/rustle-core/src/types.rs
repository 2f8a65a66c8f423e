//! Chat wire types shared across the runtime.
//!
//! Everything the LLM sees or returns is modeled here in the OpenAI chat
//! completions shape: typed `Message` variants instead of loose JSON maps,
//! so format mistakes fail at compile time rather than mid-conversation.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────

/// A chat message, tagged by its `role` on the wire.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System { content: String },

    #[serde(rename = "user")]
    User { content: MessageContent },

    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
        /// Thinking output from reasoning models. Must be echoed back on
        /// later requests or those models lose their chain of thought.
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
    },

    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
        /// Name of the tool that produced this result.
        name: String,
    },
}

impl Message {
    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    /// Plain-text user message.
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: MessageContent::Text(content.into()),
        }
    }

    /// Multipart user message (images + text).
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Message::User {
            content: MessageContent::Parts(parts),
        }
    }

    /// Text-only assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: None,
            reasoning_content: None,
        }
    }

    /// Assistant turn as returned by the model: optional text, tool calls,
    /// and reasoning content are all carried so the turn round-trips intact.
    pub fn assistant_turn(
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
        reasoning_content: Option<String>,
    ) -> Self {
        Message::Assistant {
            content,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            reasoning_content,
        }
    }

    /// Tool result message, keyed by the call id it answers.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
            name: name.into(),
        }
    }
}

// ─────────────────────────────────────────────
// Message content (text or multipart)
// ─────────────────────────────────────────────

/// User message content: a plain string, or a list of parts for vision.
///
/// Serializes untagged, matching the wire format: string or array.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One part of a multipart user message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

/// Image payload: a URL or a base64 data URI.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ─────────────────────────────────────────────
// Tool calls
// ─────────────────────────────────────────────

/// A function call requested by the assistant.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Opaque id, echoed back in the matching tool result.
    pub id: String,
    /// Always "function".
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        ToolCall {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function name plus JSON-encoded arguments string.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

// ─────────────────────────────────────────────
// Tool definitions (exported to the LLM)
// ─────────────────────────────────────────────

/// A tool definition in the function-calling shape the LLM expects:
/// `{"type":"function","function":{name, description, parameters}}`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// Function schema: name, prose description, JSON-Schema parameters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ─────────────────────────────────────────────
// LLM response
// ─────────────────────────────────────────────

/// What a provider call produced.
#[derive(Clone, Debug, Default)]
pub struct LlmResponse {
    /// Assistant text (may be absent when only tool calls came back).
    pub content: Option<String>,
    /// Requested tool calls, in order.
    pub tool_calls: Vec<ToolCall>,
    /// Why generation stopped ("stop", "tool_calls", "error", ...).
    pub finish_reason: Option<String>,
    /// Token accounting, when the API reports it.
    pub usage: Option<UsageInfo>,
    /// Thinking output from reasoning models.
    pub reasoning_content: Option<String>,
}

impl LlmResponse {
    /// A diagnostic response: the error text becomes the content the user
    /// sees and `finish_reason` is "error" so the loop exits normally.
    pub fn error(msg: impl Into<String>) -> Self {
        LlmResponse {
            content: Some(msg.into()),
            finish_reason: Some("error".to_string()),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token usage reported by the API.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ─────────────────────────────────────────────
// Media attachments
// ─────────────────────────────────────────────

/// A media file attached to a channel message (photo, document, ...).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MediaAttachment {
    /// MIME type, e.g. "image/jpeg". Drives the image filter in the
    /// context builder.
    pub mime_type: String,
    /// Local file path or URL.
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Size in bytes, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl MediaAttachment {
    pub fn new(mime_type: impl Into<String>, path: impl Into<String>) -> Self {
        MediaAttachment {
            mime_type: mime_type.into(),
            path: path.into(),
            filename: None,
            size: None,
        }
    }

    /// Whether this attachment is an image the LLM can be shown inline.
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

// ─────────────────────────────────────────────
// Chat completion request/response records
// ─────────────────────────────────────────────

/// Request body for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

/// Raw response body, deserialized before conversion into [`LlmResponse`].
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: Option<String>,
    pub choices: Vec<ChatChoice>,
    pub usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: AssistantReply,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssistantReply {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

impl From<ChatCompletionResponse> for LlmResponse {
    fn from(resp: ChatCompletionResponse) -> Self {
        match resp.choices.into_iter().next() {
            Some(c) => LlmResponse {
                content: c.message.content,
                tool_calls: c.message.tool_calls.unwrap_or_default(),
                finish_reason: c.finish_reason,
                usage: resp.usage,
                reasoning_content: c.message.reasoning_content,
            },
            None => LlmResponse::error("No choices in response"),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
