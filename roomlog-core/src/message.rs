// ABOUTME: Typed message entity reconstructed from raw store rows
// ABOUTME: Static type-code -> constructor table with a documented fallback entry

use crate::traits::{ContactRecord, RawMessageRow, RoomRecord};
use anyhow::Result;
use chrono::{Local, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Message type codes used by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Text,
    Image,
    Voice,
    ContactCard,
    Video,
    Emoji,
    Location,
    App,
    VoipCall,
    System,
    Recalled,
    Unknown(i64),
}

impl MessageType {
    pub const KNOWN: &'static [MessageType] = &[
        Self::Text,
        Self::Image,
        Self::Voice,
        Self::ContactCard,
        Self::Video,
        Self::Emoji,
        Self::Location,
        Self::App,
        Self::VoipCall,
        Self::System,
        Self::Recalled,
    ];

    pub fn code(&self) -> i64 {
        match self {
            Self::Text => 1,
            Self::Image => 3,
            Self::Voice => 34,
            Self::ContactCard => 42,
            Self::Video => 43,
            Self::Emoji => 47,
            Self::Location => 48,
            Self::App => 49,
            Self::VoipCall => 50,
            Self::System => 10000,
            Self::Recalled => 10002,
            Self::Unknown(code) => *code,
        }
    }

    pub fn from_code(code: i64) -> Self {
        Self::KNOWN
            .iter()
            .copied()
            .find(|t| t.code() == code)
            .unwrap_or(Self::Unknown(code))
    }

    /// Parse a type by name ("text", "image", ...) or by numeric code
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim().to_lowercase();
        if let Ok(code) = input.parse::<i64>() {
            return Some(Self::from_code(code));
        }
        Self::KNOWN.iter().copied().find(|t| t.name() == input)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Voice => "voice",
            Self::ContactCard => "contact_card",
            Self::Video => "video",
            Self::Emoji => "emoji",
            Self::Location => "location",
            Self::App => "app",
            Self::VoipCall => "voip_call",
            Self::System => "system",
            Self::Recalled => "recalled",
            Self::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown({})", code),
            other => f.write_str(other.name()),
        }
    }
}

/// Decoded payload of a message. Closed set: every variant renders to text.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    Text(String),
    Image { path: Option<String> },
    Voice { data: Option<Vec<u8>> },
    ContactCard { nickname: Option<String> },
    Video { path: Option<String> },
    Emoji,
    Location { label: Option<String> },
    App { title: Option<String>, xml: String },
    VoipCall,
    System(String),
    Recalled(Option<String>),
    Other { type_code: i64, content: Option<String> },
}

impl MessageBody {
    pub fn render_text(&self) -> String {
        match self {
            Self::Text(text) | Self::System(text) => text.clone(),
            Self::Image { .. } => "[Image]".to_string(),
            Self::Voice { .. } => "[Voice]".to_string(),
            Self::ContactCard { nickname } => match nickname {
                Some(name) => format!("[Contact card] {}", name),
                None => "[Contact card]".to_string(),
            },
            Self::Video { .. } => "[Video]".to_string(),
            Self::Emoji => "[Emoji]".to_string(),
            Self::Location { label } => match label {
                Some(label) => format!("[Location] {}", label),
                None => "[Location]".to_string(),
            },
            Self::App { title, .. } => match title {
                Some(title) => format!("[Link] {}", title),
                None => "[Link]".to_string(),
            },
            Self::VoipCall => "[Call]".to_string(),
            Self::Recalled(notice) => notice.clone().unwrap_or_else(|| "[Recalled]".to_string()),
            Self::Other { type_code, content } => content
                .clone()
                .unwrap_or_else(|| format!("[Unsupported message type {}]", type_code)),
        }
    }
}

/// A message reconstructed from the store. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub local_id: i64,
    pub server_id: i64,
    pub message_type: MessageType,
    /// Seconds since Unix epoch
    pub create_time: i64,
    pub timestamp_ms: i64,
    pub is_sender: bool,
    pub body: MessageBody,
    /// Opaque identifier of the owning room
    pub room: String,
    pub sender: Option<ContactRecord>,
    pub db_path: Option<String>,
}

impl Message {
    pub fn render_text(&self) -> String {
        self.body.render_text()
    }

    pub fn sender(&self) -> Option<&ContactRecord> {
        self.sender.as_ref()
    }

    /// Sender display name, or "unknown" when the sender did not resolve
    pub fn sender_name(&self) -> &str {
        self.sender
            .as_ref()
            .map(|c| c.display_name())
            .unwrap_or("unknown")
    }

    /// Local time of creation as `%Y-%m-%d %H:%M:%S`
    pub fn str_time(&self) -> String {
        Local
            .timestamp_opt(self.create_time, 0)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default()
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builds a message body from a raw row
pub type MessageConstructor = fn(&RawMessageRow) -> Result<MessageBody>;

/// Code of the fallback entry used for unrecognized type codes
pub const FALLBACK_TYPE_CODE: i64 = -1;

static FACTORY_TABLE: &[(i64, MessageConstructor)] = &[
    (1, build_text),
    (3, build_image),
    (34, build_voice),
    (42, build_contact_card),
    (43, build_video),
    (47, build_emoji),
    (48, build_location),
    (49, build_app),
    (50, build_voip_call),
    (10000, build_system),
    (10002, build_recalled),
    (FALLBACK_TYPE_CODE, build_other),
];

/// Static dispatch from type code to constructor
pub struct MessageFactory;

impl MessageFactory {
    /// Constructor for a type code, or the fallback entry when unrecognized
    pub fn constructor_for(type_code: i64) -> MessageConstructor {
        FACTORY_TABLE
            .iter()
            .find(|(code, _)| *code == type_code)
            .or_else(|| {
                FACTORY_TABLE
                    .iter()
                    .find(|(code, _)| *code == FALLBACK_TYPE_CODE)
            })
            .map(|(_, build)| *build)
            .unwrap_or(build_other)
    }

    pub fn is_registered(type_code: i64) -> bool {
        FACTORY_TABLE.iter().any(|(code, _)| *code == type_code)
    }

    pub fn create(
        row: &RawMessageRow,
        room: &RoomRecord,
        sender: Option<ContactRecord>,
    ) -> Result<Message> {
        let body = Self::constructor_for(row.type_code)(row)?;
        Ok(Message {
            local_id: row.local_id,
            server_id: row.server_id,
            message_type: MessageType::from_code(row.type_code),
            create_time: row.create_time,
            timestamp_ms: row.timestamp_ms,
            is_sender: row.is_sender,
            body,
            room: room.username.clone(),
            sender,
            db_path: row.db_path.clone(),
        })
    }
}

static APP_TITLE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)<title>(.*?)</title>").ok());
static LOCATION_LABEL: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"label="([^"]*)""#).ok());
static CARD_NICKNAME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"nickname="([^"]*)""#).ok());

fn xml_capture(xml: &str, pattern: &Option<Regex>) -> Option<String> {
    let caps = pattern.as_ref()?.captures(xml)?;
    let value = caps.get(1)?.as_str().trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn build_text(row: &RawMessageRow) -> Result<MessageBody> {
    match &row.content {
        Some(text) => Ok(MessageBody::Text(text.clone())),
        None => {
            tracing::warn!(local_id = row.local_id, "Text message has no content");
            Ok(MessageBody::Text(String::new()))
        }
    }
}

fn build_image(row: &RawMessageRow) -> Result<MessageBody> {
    Ok(MessageBody::Image {
        path: row.db_path.clone(),
    })
}

fn build_voice(row: &RawMessageRow) -> Result<MessageBody> {
    Ok(MessageBody::Voice {
        data: row.bytes_extra.clone(),
    })
}

fn build_contact_card(row: &RawMessageRow) -> Result<MessageBody> {
    let nickname = row
        .content
        .as_deref()
        .and_then(|xml| xml_capture(xml, &CARD_NICKNAME));
    Ok(MessageBody::ContactCard { nickname })
}

fn build_video(row: &RawMessageRow) -> Result<MessageBody> {
    Ok(MessageBody::Video {
        path: row.db_path.clone(),
    })
}

fn build_emoji(_row: &RawMessageRow) -> Result<MessageBody> {
    Ok(MessageBody::Emoji)
}

fn build_location(row: &RawMessageRow) -> Result<MessageBody> {
    let label = row
        .content
        .as_deref()
        .and_then(|xml| xml_capture(xml, &LOCATION_LABEL));
    Ok(MessageBody::Location { label })
}

fn build_app(row: &RawMessageRow) -> Result<MessageBody> {
    let xml = row.content.clone().unwrap_or_default();
    let title = xml_capture(&xml, &APP_TITLE);
    Ok(MessageBody::App { title, xml })
}

fn build_voip_call(_row: &RawMessageRow) -> Result<MessageBody> {
    Ok(MessageBody::VoipCall)
}

fn build_system(row: &RawMessageRow) -> Result<MessageBody> {
    Ok(MessageBody::System(row.content.clone().unwrap_or_default()))
}

fn build_recalled(row: &RawMessageRow) -> Result<MessageBody> {
    Ok(MessageBody::Recalled(row.content.clone()))
}

fn build_other(row: &RawMessageRow) -> Result<MessageBody> {
    Ok(MessageBody::Other {
        type_code: row.type_code,
        content: row.content.clone(),
    })
}
