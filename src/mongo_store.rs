use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, error};
use mongodb::bson::{doc, Document};
use mongodb::{options::ClientOptions, Client, Collection, Database};

use crate::error::{AppError, AppResult};
use crate::store::{assign_id, DocumentStore, Query, Update};

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn init(uri: &str, db_name: &str) -> AppResult<Self> {
        let client_options = ClientOptions::parse(uri).await.map_err(|e| {
            error!("Failed to parse MongoDB connection string: {}", e);
            AppError::RemoteQuery(format!("invalid MongoDB connection string: {}", e))
        })?;
        let client = Client::with_options(client_options)
            .map_err(|e| AppError::RemoteQuery(format!("failed to initialize client: {}", e)))?;
        let db = client.database(db_name);
        debug!("Connected to MongoDB database {}", db_name);
        Ok(MongoStore { db })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

fn write_err(collection: &str, e: mongodb::error::Error) -> AppError {
    error!("Write to {} failed: {}", collection, e);
    AppError::RemoteWrite(e.to_string())
}

fn query_err(collection: &str, e: mongodb::error::Error) -> AppError {
    error!("Query on {} failed: {}", collection, e);
    AppError::RemoteQuery(e.to_string())
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn insert(&self, collection: &str, mut doc: Document) -> AppResult<String> {
        let id = assign_id(&mut doc);
        self.collection(collection)
            .insert_one(doc)
            .await
            .map_err(|e| write_err(collection, e))?;
        debug!("Inserted {} into {}", id, collection);
        Ok(id)
    }

    async fn put(&self, collection: &str, id: &str, mut doc: Document) -> AppResult<()> {
        doc.insert("_id", id);
        self.collection(collection)
            .replace_one(doc! { "_id": id }, doc)
            .upsert(true)
            .await
            .map_err(|e| write_err(collection, e))?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Document>> {
        self.collection(collection)
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| query_err(collection, e))
    }

    async fn update(&self, collection: &str, id: &str, update: Update) -> AppResult<()> {
        let filter = doc! { "_id": id };
        if update.is_empty() {
            // nothing to merge, but a missing document is still an error
            return match self.get(collection, id).await? {
                Some(_) => Ok(()),
                None => Err(AppError::NotFound(format!("No document {} in {}", id, collection))),
            };
        }
        let res = self
            .collection(collection)
            .update_one(filter, update.to_document())
            .await
            .map_err(|e| write_err(collection, e))?;
        if res.matched_count == 0 {
            return Err(AppError::NotFound(format!("No document {} in {}", id, collection)));
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> AppResult<()> {
        self.collection(collection)
            .delete_one(doc! { "_id": id })
            .await
            .map_err(|e| write_err(collection, e))?;
        Ok(())
    }

    async fn query(&self, collection: &str, query: Query) -> AppResult<Vec<Document>> {
        let coll = self.collection(collection);
        let mut find = coll.find(query.filter_document());
        if let Some(sort) = query.sort_document() {
            find = find.sort(sort);
        }
        let mut cursor = find.await.map_err(|e| query_err(collection, e))?;

        let mut docs = Vec::new();
        while let Some(result) = cursor.next().await {
            match result {
                Ok(doc) => docs.push(doc),
                Err(e) => return Err(query_err(collection, e)),
            }
        }
        Ok(docs)
    }
}
