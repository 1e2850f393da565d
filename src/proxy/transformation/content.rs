//! Clone and extraction helpers shared by every pipeline stage
//!
//! Input items arrive as raw JSON from the client. They are wrapped in
//! [`InputItem`] without being validated: a malformed item (missing role,
//! numeric content, `null` content) survives untouched and the accessors
//! below simply return `None` for it.
//!
//! # Ownership
//!
//! Items read from the request body are borrowed. Any stage that needs to
//! change an item works on a [`InputItem::deep_clone`] and produces a new
//! item; nothing is edited in place.

use serde::Serialize;
use serde_json::{json, Value};

/// Content part kinds that carry plain text
const TEXT_PART_KINDS: &[&str] = &["input_text", "output_text", "text"];

// ============================================================================
// Role
// ============================================================================

/// Role of a message item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
}

impl Role {
    /// Parse a wire role string. Unknown roles yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "developer" => Some(Self::Developer),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Developer => "developer",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// System and developer messages carry instructions, not conversation
    pub fn is_instruction(&self) -> bool {
        matches!(self, Self::System | Self::Developer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Content
// ============================================================================

/// Borrowed view of a message's content union
#[derive(Debug, Clone, Copy)]
pub enum Content<'a> {
    /// `"content": "plain text"`
    Text(&'a str),
    /// `"content": [{"type": "input_text", "text": "..."}, ...]`
    Parts(&'a [Value]),
}

impl<'a> Content<'a> {
    /// View a raw content value, `None` for null or non-text shapes
    pub fn from_value(value: &'a Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Text(s)),
            Value::Array(parts) => Some(Self::Parts(parts)),
            _ => None,
        }
    }

    /// Concatenate the text this content carries
    ///
    /// Parts are joined with a newline. Parts of other kinds (images, files)
    /// and malformed parts are skipped. Returns `None` when no text is found.
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some((*s).to_string()),
            Self::Parts(parts) => {
                let texts: Vec<&str> = parts
                    .iter()
                    .filter_map(|part| {
                        let kind = part.get("type")?.as_str()?;
                        if TEXT_PART_KINDS.contains(&kind) {
                            part.get("text")?.as_str()
                        } else {
                            None
                        }
                    })
                    .collect();
                if texts.is_empty() {
                    None
                } else {
                    Some(texts.join("\n"))
                }
            }
        }
    }
}

// ============================================================================
// Input Item
// ============================================================================

/// One entry of the `input` array
///
/// Wraps the raw JSON so unknown fields (`call_id`, `arguments`, provider
/// extensions) pass through to the backend untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct InputItem(Value);

impl InputItem {
    /// Take ownership of a raw item
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Structural copy of a borrowed item
    ///
    /// `serde_json::Value` is a tree, so the copy is always finite and
    /// shares nothing with the source.
    pub fn deep_clone(value: &Value) -> Self {
        Self(value.clone())
    }

    /// Build a text message item
    ///
    /// Assistant messages use `output_text` parts, every other role uses
    /// `input_text`, matching what the backend echoes back.
    pub fn message(role: Role, text: impl Into<String>) -> Self {
        let part_kind = if role == Role::Assistant {
            "output_text"
        } else {
            "input_text"
        };
        Self(json!({
            "type": "message",
            "role": role.as_str(),
            "content": [{"type": part_kind, "text": text.into()}],
        }))
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Classified role, `None` for tool items and malformed roles
    pub fn role(&self) -> Option<Role> {
        self.0.get("role")?.as_str().and_then(Role::parse)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("id")?.as_str()
    }

    /// The item's `type` tag (`message`, `function_call`, `item_reference`, ...)
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type")?.as_str()
    }

    pub fn content(&self) -> Option<Content<'_>> {
        Content::from_value(self.0.get("content")?)
    }

    /// Plain text of a message item
    pub fn text(&self) -> Option<String> {
        self.content()?.text()
    }

    /// True for system and developer messages
    pub fn is_instruction(&self) -> bool {
        self.role().is_some_and(|r| r.is_instruction())
    }

    /// Everything that is not an instruction message
    pub fn is_conversational(&self) -> bool {
        !self.is_instruction()
    }

    /// Output text of a `function_call_output` item
    pub fn tool_output(&self) -> Option<&str> {
        if self.kind() != Some("function_call_output") {
            return None;
        }
        self.0.get("output")?.as_str()
    }

    /// Name and arguments of a `function_call` item
    pub fn tool_call(&self) -> Option<(&str, &str)> {
        if self.kind() != Some("function_call") {
            return None;
        }
        let name = self.0.get("name")?.as_str()?;
        let args = self
            .0
            .get("arguments")
            .and_then(|a| a.as_str())
            .unwrap_or("");
        Some((name, args))
    }

    /// Character count used for token approximation
    pub fn char_count(&self) -> usize {
        if let Some(text) = self.text() {
            return text.chars().count();
        }
        if let Some(output) = self.tool_output() {
            return output.chars().count();
        }
        if let Some((name, args)) = self.tool_call() {
            return name.chars().count() + args.chars().count();
        }
        0
    }
}

impl From<Value> for InputItem {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

/// Deep-copy a borrowed `input` array
pub fn clone_items(items: &[Value]) -> Vec<InputItem> {
    items.iter().map(InputItem::deep_clone).collect()
}
