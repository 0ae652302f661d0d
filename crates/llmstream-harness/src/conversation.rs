use crate::stream::{ReasoningData, ToolCall};

/// Author of a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Attachment payload.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AttachmentData {
    /// Extracted text content, inlined into the prompt.
    Text(String),
    /// Raw bytes; only image mime types are forwarded to vendors.
    Binary(Vec<u8>),
}

/// A file attached to a turn.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub data: AttachmentData,
}

impl Attachment {
    pub fn text(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: "text/plain".into(),
            data: AttachmentData::Text(content.into()),
        }
    }

    pub fn image(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: AttachmentData::Binary(bytes),
        }
    }

    /// Returns the image bytes when this is a binary image attachment.
    pub fn image_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            AttachmentData::Binary(bytes) if self.mime_type.starts_with("image/") => Some(bytes),
            _ => None,
        }
    }

    /// Text rendering used by vendors for non-image attachments.
    pub fn inline_text(&self) -> Option<String> {
        match &self.data {
            AttachmentData::Text(content) => Some(format!("File: {}\n{}", self.name, content)),
            AttachmentData::Binary(_) => None,
        }
    }
}

/// One resolved tool round: the calls (now carrying results) and the reasoning
/// that preceded them, replayed to the vendor on the next invocation.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolRound {
    pub calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningData>,
}

/// A role-tagged message in the conversation.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Turn {
    pub role: Role,
    pub message: String,
    #[serde(default)]
    pub files: Vec<Attachment>,
    /// Prior tool use. Only meaningful on assistant turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_round: Option<ToolRound>,
}

impl Turn {
    pub fn new(role: Role, message: impl Into<String>) -> Self {
        Self {
            role,
            message: message.into(),
            files: Vec::new(),
            tool_round: None,
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(Role::System, message)
    }

    pub fn user(message: impl Into<String>) -> Self {
        Self::new(Role::User, message)
    }

    pub fn assistant(message: impl Into<String>) -> Self {
        Self::new(Role::Assistant, message)
    }

    pub fn with_file(mut self, file: Attachment) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_tool_round(mut self, round: ToolRound) -> Self {
        self.tool_round = Some(round);
        self
    }
}

/// Tool made available to the model.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Ordered turn list, owned by the caller and read-only to adapters.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Conversation {
    pub turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turn(mut self, turn: Turn) -> Self {
        self.turns.push(turn);
        self
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// System turns joined by blank lines, if any carry text.
    pub fn system_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .turns
            .iter()
            .filter(|turn| turn.role == Role::System)
            .map(|turn| turn.message.trim())
            .filter(|message| !message.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    }

    /// User and assistant turns in order.
    pub fn dialogue(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|turn| turn.role != Role::System)
    }
}
