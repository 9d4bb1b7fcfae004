use serde::{Deserialize, Serialize};

/// Kind of chat an inbound event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Direct,
    Group,
}

/// What the user sent: typed text or a button payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Text(String),
    Callback(String),
}

impl Payload {
    pub fn as_str(&self) -> &str {
        match self {
            Payload::Text(s) | Payload::Callback(s) => s,
        }
    }
}

/// Events delivered by the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    /// Public handle, absent when the account has none set.
    pub sender_handle: Option<String>,
    pub sender_id: i64,
    pub payload: Payload,
}

impl InboundEvent {
    /// Handle with surrounding whitespace removed; `None` if missing or empty.
    pub fn handle(&self) -> Option<&str> {
        self.sender_handle
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    #[default]
    Plain,
    Html,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Button grid attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Markup {
    pub rows: Vec<Vec<Button>>,
}

impl Markup {
    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        if !buttons.is_empty() {
            self.rows.push(buttons);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A message handed to the transport for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(default)]
    pub format: TextFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markup: Option<Markup>,
}

impl OutgoingMessage {
    pub fn plain(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            format: TextFormat::Plain,
            markup: None,
        }
    }

    pub fn html(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            format: TextFormat::Html,
            ..Self::plain(chat_id, text)
        }
    }

    pub fn with_markup(mut self, markup: Markup) -> Self {
        self.markup = (!markup.is_empty()).then_some(markup);
        self
    }
}
