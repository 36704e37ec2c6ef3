use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

use super::from_bson_time;

/// A study group as stored in the `studyGroups` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyGroupRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_by: String,
    pub created_by_name: String,
    #[serde(default)]
    pub members: Vec<String>,
    /// userId -> display name at join time
    #[serde(default)]
    pub member_names: BTreeMap<String, String>,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudyGroup {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub created_by_name: String,
    pub members: Vec<String>,
    pub member_names: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<StudyGroupRecord> for StudyGroup {
    fn from(r: StudyGroupRecord) -> Self {
        Self {
            id: r.id,
            name: r.name,
            description: r.description,
            created_by: r.created_by,
            created_by_name: r.created_by_name,
            members: r.members,
            member_names: r.member_names,
            created_at: from_bson_time(r.created_at),
            updated_at: from_bson_time(r.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}
