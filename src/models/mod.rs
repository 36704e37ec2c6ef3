pub mod group;
pub mod message;
pub mod task;
pub mod user;

use chrono::{DateTime, Utc};
use mongodb::bson::{self, DateTime as BsonDateTime, Document};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Stored timestamps are BSON datetimes (millisecond precision).
pub fn to_bson_time(at: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(at.timestamp_millis())
}

pub fn from_bson_time(at: BsonDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(at.timestamp_millis()).unwrap_or_default()
}

pub fn bson_now() -> BsonDateTime {
    to_bson_time(Utc::now())
}

/// Serializes a record for writing.
pub fn encode<T: Serialize>(record: &T) -> AppResult<Document> {
    bson::to_document(record).map_err(|e| AppError::RemoteWrite(format!("serialization failed: {}", e)))
}

/// Deserializes a stored document read back from the store.
pub fn decode<T: DeserializeOwned>(doc: Document) -> AppResult<T> {
    bson::from_document(doc).map_err(|e| AppError::RemoteQuery(format!("malformed document: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bson_time_keeps_millisecond_precision() {
        let at = Utc.with_ymd_and_hms(2025, 1, 10, 9, 30, 0).unwrap();
        assert_eq!(from_bson_time(to_bson_time(at)), at);
    }
}
