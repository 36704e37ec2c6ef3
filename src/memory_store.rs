// src/memory_store.rs
//
// In-process document store used by the test suite and by local runs
// without MONGO_URI. Collections are insertion-ordered vectors, so sorting is
// stable and ties keep insertion order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};

use crate::error::{AppError, AppResult};
use crate::store::{assign_id, DocumentStore, Filter, Query, SortOrder, Update};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> AppError {
    AppError::RemoteWrite("memory store lock poisoned".to_string())
}

fn has_id(doc: &Document, id: &str) -> bool {
    doc.get_str("_id").map(|d| d == id).unwrap_or(false)
}

fn set_path(doc: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(doc.get(head), Some(Bson::Document(_))) {
                doc.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

fn apply(doc: &mut Document, update: &Update) -> AppResult<()> {
    for (path, value) in &update.set {
        set_path(doc, path, value.clone());
    }
    for (field, value) in &update.add_to_set {
        match doc.get_mut(field) {
            Some(Bson::Array(items)) => {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            None => {
                doc.insert(field, Bson::Array(vec![value.clone()]));
            }
            Some(_) => {
                return Err(AppError::RemoteWrite(format!("{} is not an array", field)));
            }
        }
    }
    for (field, value) in &update.pull {
        match doc.get_mut(field) {
            Some(Bson::Array(items)) => items.retain(|item| item != value),
            None => {}
            Some(_) => {
                return Err(AppError::RemoteWrite(format!("{} is not an array", field)));
            }
        }
    }
    Ok(())
}

fn matches(doc: &Document, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(field, value) => doc.get(field) == Some(value),
        Filter::ArrayContains(field, value) => {
            matches!(doc.get(field), Some(Bson::Array(items)) if items.contains(value))
        }
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn compare(a: &Bson, b: &Bson) -> Ordering {
    match (a, b) {
        (Bson::DateTime(x), Bson::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, mut doc: Document) -> AppResult<String> {
        let id = assign_id(&mut doc);
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| has_id(d, &id)) {
            return Err(AppError::RemoteWrite(format!("duplicate id {} in {}", id, collection)));
        }
        docs.push(doc);
        Ok(id)
    }

    async fn put(&self, collection: &str, id: &str, mut doc: Document) -> AppResult<()> {
        doc.insert("_id", id);
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| has_id(d, id)) {
            Some(existing) => *existing = doc,
            None => docs.push(doc),
        }
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Document>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| AppError::RemoteQuery("memory store lock poisoned".to_string()))?;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| has_id(d, id)).cloned()))
    }

    async fn update(&self, collection: &str, id: &str, update: Update) -> AppResult<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| has_id(d, id)))
            .ok_or_else(|| AppError::NotFound(format!("No document {} in {}", id, collection)))?;
        // apply to a copy so a rejected operator leaves the stored doc untouched
        let mut merged = doc.clone();
        apply(&mut merged, &update)?;
        *doc = merged;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> AppResult<()> {
        let mut collections = self.collections.write().map_err(|_| poisoned())?;
        if let Some(docs) = collections.get_mut(collection) {
            docs.retain(|d| !has_id(d, id));
        }
        Ok(())
    }

    async fn query(&self, collection: &str, query: Query) -> AppResult<Vec<Document>> {
        let collections = self
            .collections
            .read()
            .map_err(|_| AppError::RemoteQuery("memory store lock poisoned".to_string()))?;
        let mut found: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| query.filters.iter().all(|f| matches(d, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((field, order)) = &query.sort {
            found.retain(|d| d.contains_key(field));
            found.sort_by(|a, b| {
                let ord = match (a.get(field), b.get(field)) {
                    (Some(x), Some(y)) => compare(x, y),
                    _ => Ordering::Equal,
                };
                match order {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                }
            });
        }
        Ok(found)
    }
}
