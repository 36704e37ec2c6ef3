use chrono::{DateTime, Utc};
use mongodb::bson::DateTime as BsonDateTime;
use serde::{Deserialize, Serialize};

use super::from_bson_time;

/// Profile document in `users`, keyed by the identity's uid.
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileRecord {
    #[serde(rename = "_id")]
    pub uid: String,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub joined_groups: Vec<String>,
    pub created_at: BsonDateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub email: String,
    pub full_name: String,
    pub joined_groups: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<UserProfileRecord> for UserProfile {
    fn from(r: UserProfileRecord) -> Self {
        Self {
            uid: r.uid,
            email: r.email,
            full_name: r.full_name,
            joined_groups: r.joined_groups,
            created_at: from_bson_time(r.created_at),
        }
    }
}

/// Identity-provider record in `credentials`. Never leaves the server.
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    #[serde(rename = "_id")]
    pub uid: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: BsonDateTime,
}
