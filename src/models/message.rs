// File: message.rs

use chrono::{DateTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

use super::from_bson_time;

pub const SYSTEM_SENDER_ID: &str = "system";
pub const SYSTEM_SENDER_NAME: &str = "System";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    File,
}

/// A chat message as stored in the `messages` collection.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub timestamp: BsonDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub group_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<ChatMessageRecord> for ChatMessage {
    fn from(r: ChatMessageRecord) -> Self {
        Self {
            id: r.id,
            group_id: r.group_id,
            sender_id: r.sender_id,
            sender_name: r.sender_name,
            text: r.text,
            kind: r.kind,
            file_url: r.file_url,
            file_name: r.file_name,
            timestamp: from_bson_time(r.timestamp),
        }
    }
}

/// Message body supplied by the sender; also the POST payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(default)]
    pub text: String,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
}

