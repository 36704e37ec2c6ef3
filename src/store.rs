// src/store.rs

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use uuid::Uuid;

use crate::error::AppResult;

pub const USERS: &str = "users";
pub const CREDENTIALS: &str = "credentials";
pub const TASKS: &str = "tasks";
pub const STUDY_GROUPS: &str = "studyGroups";
pub const MESSAGES: &str = "messages";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Bson),
    /// Matches documents whose array field holds the value.
    ArrayContains(String, Bson),
}

/// A conjunctive filter with an optional single-field sort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub sort: Option<(String, SortOrder)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    pub fn array_contains(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.filters.push(Filter::ArrayContains(field.to_string(), value.into()));
        self
    }

    pub fn order_by(mut self, field: &str, order: SortOrder) -> Self {
        self.sort = Some((field.to_string(), order));
        self
    }

    /// Mongo filter document. Mongo matches a scalar against array elements,
    /// so both filter kinds render the same way.
    pub fn filter_document(&self) -> Document {
        let mut filter = Document::new();
        for f in &self.filters {
            match f {
                Filter::Eq(field, value) | Filter::ArrayContains(field, value) => {
                    filter.insert(field.clone(), value.clone());
                }
            }
        }
        filter
    }

    pub fn sort_document(&self) -> Option<Document> {
        self.sort.as_ref().map(|(field, order)| {
            let direction = match order {
                SortOrder::Ascending => 1,
                SortOrder::Descending => -1,
            };
            let mut sort = Document::new();
            sort.insert(field.clone(), direction);
            sort
        })
    }
}

/// Partial merge applied to a single document. Field paths in `set` may be
/// dotted to reach into nested maps (`memberNames.<uid>`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Document,
    pub add_to_set: Document,
    pub pull: Document,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.set.insert(field, value.into());
        self
    }

    pub fn add_to_set(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.add_to_set.insert(field, value.into());
        self
    }

    pub fn pull(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.pull.insert(field, value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.add_to_set.is_empty() && self.pull.is_empty()
    }

    /// Mongo update operators; empty operators are left out because the
    /// server rejects `{"$set": {}}`.
    pub fn to_document(&self) -> Document {
        let mut update = Document::new();
        if !self.set.is_empty() {
            update.insert("$set", self.set.clone());
        }
        if !self.add_to_set.is_empty() {
            update.insert("$addToSet", self.add_to_set.clone());
        }
        if !self.pull.is_empty() {
            update.insert("$pull", self.pull.clone());
        }
        update
    }
}

/// Collection-based storage addressed by opaque string ids.
///
/// Reads fail with `AppError::RemoteQuery`, writes with
/// `AppError::RemoteWrite`. `update` on a missing id fails with
/// `AppError::NotFound`; `delete` on a missing id succeeds.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts `doc`, keeping its `_id` when it has one, and returns the id.
    async fn insert(&self, collection: &str, doc: Document) -> AppResult<String>;

    /// Creates or fully replaces the document stored under `id`.
    async fn put(&self, collection: &str, id: &str, doc: Document) -> AppResult<()>;

    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Document>>;

    async fn update(&self, collection: &str, id: &str, update: Update) -> AppResult<()>;

    async fn delete(&self, collection: &str, id: &str) -> AppResult<()>;

    async fn query(&self, collection: &str, query: Query) -> AppResult<Vec<Document>>;
}

/// Returns the document's `_id`, assigning a fresh UUID when it has none.
pub fn assign_id(doc: &mut Document) -> String {
    match doc.get_str("_id") {
        Ok(id) => id.to_string(),
        Err(_) => {
            let id = Uuid::new_v4().to_string();
            doc.insert("_id", id.clone());
            id
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn update_renders_only_non_empty_operators() {
        let update = Update::new()
            .set("memberNames.u1", "Ada")
            .add_to_set("members", "u1");
        assert_eq!(
            update.to_document(),
            doc! {
                "$set": { "memberNames.u1": "Ada" },
                "$addToSet": { "members": "u1" },
            }
        );
        assert!(Update::new().is_empty());
    }

    #[test]
    fn query_renders_filter_and_sort() {
        let query = Query::new()
            .array_contains("members", "u1")
            .order_by("createdAt", SortOrder::Descending);
        assert_eq!(query.filter_document(), doc! { "members": "u1" });
        assert_eq!(query.sort_document(), Some(doc! { "createdAt": -1 }));
        assert_eq!(Query::new().sort_document(), None);
    }

    #[test]
    fn assign_id_keeps_existing_string_ids() {
        let mut existing = doc! { "_id": "task-1", "title": "x" };
        assert_eq!(assign_id(&mut existing), "task-1");

        let mut fresh = doc! { "title": "y" };
        let id = assign_id(&mut fresh);
        assert_eq!(fresh.get_str("_id").ok(), Some(id.as_str()));
        assert!(Uuid::parse_str(&id).is_ok());
    }
}
