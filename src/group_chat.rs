// src/group_chat.rs
//
// Study groups and their chat history. Multi-document operations are plain
// sequences of store calls: nothing is transactional and nothing is rolled
// back, so a failure midway leaves whatever was already written.

use std::collections::BTreeMap;

use actix_web::{web, HttpRequest, HttpResponse};
use futures::future::join_all;
use log::{debug, error, info};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::group::{CreateGroupRequest, StudyGroup, StudyGroupRecord};
use crate::models::message::{
    ChatMessage, ChatMessageRecord, MessageKind, NewMessage, SYSTEM_SENDER_ID, SYSTEM_SENDER_NAME,
};
use crate::models::{bson_now, decode, encode};
use crate::session::current_identity;
use crate::store::{DocumentStore, Query, SortOrder, Update, MESSAGES, STUDY_GROUPS, USERS};

fn log_err(context: &'static str) -> impl Fn(AppError) -> AppError {
    move |e| {
        error!("Error {}: {}", context, e);
        e
    }
}

async fn load_group(store: &dyn DocumentStore, group_id: &str) -> AppResult<StudyGroupRecord> {
    match store.get(STUDY_GROUPS, group_id).await? {
        Some(doc) => decode(doc),
        None => Err(AppError::NotFound("Group not found".to_string())),
    }
}

async fn post_system_message(store: &dyn DocumentStore, group_id: &str, text: String) -> AppResult<String> {
    let message = ChatMessageRecord {
        id: Uuid::new_v4().to_string(),
        group_id: group_id.to_string(),
        sender_id: SYSTEM_SENDER_ID.to_string(),
        sender_name: SYSTEM_SENDER_NAME.to_string(),
        text,
        kind: MessageKind::Text,
        file_url: None,
        file_name: None,
        timestamp: bson_now(),
    };
    store.insert(MESSAGES, encode(&message)?).await
}

/// Waits for every write, then reports the first failure.
async fn all_issued<F>(writes: impl IntoIterator<Item = F>) -> AppResult<()>
where
    F: std::future::Future<Output = AppResult<()>>,
{
    join_all(writes).await.into_iter().collect()
}

async fn groups_matching(store: &dyn DocumentStore, query: Query) -> AppResult<Vec<StudyGroup>> {
    store
        .query(STUDY_GROUPS, query)
        .await?
        .into_iter()
        .map(|doc| decode::<StudyGroupRecord>(doc).map(StudyGroup::from))
        .collect()
}

/// Creates the group, posts the welcome message, then records the group in
/// the creator's `joinedGroups`. Returns the new group id.
pub async fn create_group(
    store: &dyn DocumentStore,
    name: &str,
    description: &str,
    user_id: &str,
    user_name: &str,
) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Please enter a group name".to_string()));
    }

    let now = bson_now();
    let group = StudyGroupRecord {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        description: description.trim().to_string(),
        created_by: user_id.to_string(),
        created_by_name: user_name.to_string(),
        members: vec![user_id.to_string()],
        member_names: BTreeMap::from([(user_id.to_string(), user_name.to_string())]),
        created_at: now,
        updated_at: now,
    };
    let group_id = store
        .insert(STUDY_GROUPS, encode(&group)?)
        .await
        .map_err(log_err("creating study group"))?;

    post_system_message(
        store,
        &group_id,
        format!("Welcome to {}! This is the beginning of your study group.", name),
    )
    .await
    .map_err(log_err("posting welcome message"))?;

    store
        .update(USERS, user_id, Update::new().add_to_set("joinedGroups", group_id.as_str()))
        .await
        .map_err(log_err("recording joined group"))?;

    info!("Study group created successfully: {}", group_id);
    Ok(group_id)
}

/// Adds the user to the group, announces it in the chat and records the
/// group in the user's `joinedGroups`.
pub async fn join_study_group(
    store: &dyn DocumentStore,
    group_id: &str,
    user_id: &str,
    user_name: &str,
) -> AppResult<()> {
    let group = load_group(store, group_id).await?;
    if group.members.iter().any(|m| m == user_id) {
        return Err(AppError::AlreadyMember);
    }

    let update = Update::new()
        .add_to_set("members", user_id)
        .set(&format!("memberNames.{}", user_id), user_name)
        .set("updatedAt", bson_now());
    store
        .update(STUDY_GROUPS, group_id, update)
        .await
        .map_err(log_err("adding group member"))?;

    post_system_message(store, group_id, format!("{} joined the group", user_name))
        .await
        .map_err(log_err("posting join message"))?;

    store
        .update(USERS, user_id, Update::new().add_to_set("joinedGroups", group_id))
        .await
        .map_err(log_err("recording joined group"))?;

    info!("User {} joined study group {}", user_id, group_id);
    Ok(())
}

/// Every group, newest first.
pub async fn list_groups(store: &dyn DocumentStore) -> AppResult<Vec<StudyGroup>> {
    let groups = groups_matching(store, Query::new().order_by("createdAt", SortOrder::Descending))
        .await
        .map_err(log_err("getting study groups"))?;
    debug!("Retrieved study groups: {}", groups.len());
    Ok(groups)
}

/// Groups the user is a member of, newest first.
pub async fn list_user_groups(store: &dyn DocumentStore, user_id: &str) -> AppResult<Vec<StudyGroup>> {
    let query = Query::new()
        .array_contains("members", user_id)
        .order_by("createdAt", SortOrder::Descending);
    groups_matching(store, query).await.map_err(log_err("getting user study groups"))
}

/// Stores the message and bumps the group's `updatedAt`. Membership of the
/// sender is not checked.
pub async fn send_message(
    store: &dyn DocumentStore,
    group_id: &str,
    user_id: &str,
    user_name: &str,
    message: NewMessage,
) -> AppResult<String> {
    if message.kind == MessageKind::Text && message.text.trim().is_empty() {
        return Err(AppError::Validation("Message text is empty".to_string()));
    }

    let record = ChatMessageRecord {
        id: Uuid::new_v4().to_string(),
        group_id: group_id.to_string(),
        sender_id: user_id.to_string(),
        sender_name: user_name.to_string(),
        text: message.text,
        kind: message.kind,
        file_url: message.file_url,
        file_name: message.file_name,
        timestamp: bson_now(),
    };
    let message_id = store
        .insert(MESSAGES, encode(&record)?)
        .await
        .map_err(log_err("sending message"))?;

    store
        .update(STUDY_GROUPS, group_id, Update::new().set("updatedAt", bson_now()))
        .await
        .map_err(log_err("updating group activity"))?;

    debug!("Message sent successfully: {}", message_id);
    Ok(message_id)
}

/// The group's full history, oldest first.
pub async fn list_group_messages(store: &dyn DocumentStore, group_id: &str) -> AppResult<Vec<ChatMessage>> {
    let query = Query::new()
        .eq("groupId", group_id)
        .order_by("timestamp", SortOrder::Ascending);
    let messages = store
        .query(MESSAGES, query)
        .await
        .map_err(log_err("getting messages"))?
        .into_iter()
        .map(|doc| decode::<ChatMessageRecord>(doc).map(ChatMessage::from))
        .collect::<AppResult<Vec<_>>>()?;
    debug!("Retrieved messages: {}", messages.len());
    Ok(messages)
}

/// Creator-only. Deletes every message of the group, then the group, then
/// the group id from each member's `joinedGroups`. Every write of a step is
/// issued even when one of them fails.
pub async fn delete_group(store: &dyn DocumentStore, group_id: &str, user_id: &str) -> AppResult<()> {
    let group = load_group(store, group_id).await?;
    if group.created_by != user_id {
        return Err(AppError::Permission(
            "Only the group creator can delete the group".to_string(),
        ));
    }

    let message_ids: Vec<String> = store
        .query(MESSAGES, Query::new().eq("groupId", group_id))
        .await
        .map_err(log_err("listing group messages"))?
        .iter()
        .filter_map(|doc| doc.get_str("_id").ok().map(str::to_string))
        .collect();
    all_issued(message_ids.iter().map(|id| store.delete(MESSAGES, id)))
        .await
        .map_err(log_err("deleting group messages"))?;

    store
        .delete(STUDY_GROUPS, group_id)
        .await
        .map_err(log_err("deleting study group"))?;

    all_issued(group.members.iter().map(|member| {
        store.update(USERS, member, Update::new().pull("joinedGroups", group_id))
    }))
    .await
    .map_err(log_err("updating member profiles"))?;

    info!("Study group deleted successfully: {}", group_id);
    Ok(())
}

// ─── HANDLERS ──────────────────────────────────────────────────────────────────

// GET /groups
// Every group is visible to every signed-in user.
pub async fn get_groups(req: HttpRequest, data: web::Data<AppState>) -> AppResult<HttpResponse> {
    current_identity(&req)?;
    Ok(HttpResponse::Ok().json(list_groups(data.store.as_ref()).await?))
}

// GET /groups/mine
pub async fn get_my_groups(req: HttpRequest, data: web::Data<AppState>) -> AppResult<HttpResponse> {
    let identity = current_identity(&req)?;
    Ok(HttpResponse::Ok().json(list_user_groups(data.store.as_ref(), &identity.uid).await?))
}

// POST /groups
pub async fn post_group(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<CreateGroupRequest>,
) -> AppResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let group_id = create_group(
        data.store.as_ref(),
        &payload.name,
        &payload.description,
        &identity.uid,
        &identity.display_name,
    )
    .await?;
    Ok(HttpResponse::Created().json(serde_json::json!({ "id": group_id })))
}

// POST /groups/{group_id}/join
pub async fn join_group(
    req: HttpRequest,
    data: web::Data<AppState>,
    group_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let identity = current_identity(&req)?;
    join_study_group(data.store.as_ref(), &group_id, &identity.uid, &identity.display_name).await?;
    Ok(HttpResponse::Ok().body("Joined group"))
}

// DELETE /groups/{group_id}
pub async fn remove_group(
    req: HttpRequest,
    data: web::Data<AppState>,
    group_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    let identity = current_identity(&req)?;
    delete_group(data.store.as_ref(), &group_id, &identity.uid).await?;
    Ok(HttpResponse::Ok().body("Group deleted"))
}

// GET /groups/{group_id}/messages
pub async fn get_messages(
    req: HttpRequest,
    data: web::Data<AppState>,
    group_id: web::Path<String>,
) -> AppResult<HttpResponse> {
    current_identity(&req)?;
    Ok(HttpResponse::Ok().json(list_group_messages(data.store.as_ref(), &group_id).await?))
}

// POST /groups/{group_id}/messages
pub async fn post_message(
    req: HttpRequest,
    data: web::Data<AppState>,
    group_id: web::Path<String>,
    payload: web::Json<NewMessage>,
) -> AppResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let message_id = send_message(
        data.store.as_ref(),
        &group_id,
        &identity.uid,
        &identity.display_name,
        payload.into_inner(),
    )
    .await?;
    Ok(HttpResponse::Created().json(serde_json::json!({ "id": message_id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::models::user::UserProfileRecord;
    use async_trait::async_trait;
    use mongodb::bson::Document;
    use std::time::Duration;

    async fn add_profile(store: &dyn DocumentStore, uid: &str) {
        let profile = UserProfileRecord {
            uid: uid.to_string(),
            email: format!("{}@example.com", uid),
            full_name: uid.to_string(),
            joined_groups: Vec::new(),
            created_at: bson_now(),
        };
        store.put(USERS, uid, encode(&profile).unwrap()).await.unwrap();
    }

    async fn joined_groups(store: &dyn DocumentStore, uid: &str) -> Vec<String> {
        let doc = store.get(USERS, uid).await.unwrap().unwrap();
        decode::<UserProfileRecord>(doc).unwrap().joined_groups
    }

    fn text(body: &str) -> NewMessage {
        NewMessage {
            text: body.to_string(),
            kind: MessageKind::Text,
            file_url: None,
            file_name: None,
        }
    }

    /// Wraps the memory store and fails the chosen operations.
    struct FlakyStore {
        inner: MemoryStore,
        fail_update_in: Option<&'static str>,
        fail_message_deletes: bool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_update_in: None,
                fail_message_deletes: false,
            }
        }
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn insert(&self, collection: &str, doc: Document) -> AppResult<String> {
            self.inner.insert(collection, doc).await
        }

        async fn put(&self, collection: &str, id: &str, doc: Document) -> AppResult<()> {
            self.inner.put(collection, id, doc).await
        }

        async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Document>> {
            self.inner.get(collection, id).await
        }

        async fn update(&self, collection: &str, id: &str, update: Update) -> AppResult<()> {
            if self.fail_update_in == Some(collection) {
                return Err(AppError::RemoteWrite("unavailable".into()));
            }
            self.inner.update(collection, id, update).await
        }

        async fn delete(&self, collection: &str, id: &str) -> AppResult<()> {
            if self.fail_message_deletes && collection == MESSAGES {
                return Err(AppError::RemoteWrite("unavailable".into()));
            }
            self.inner.delete(collection, id).await
        }

        async fn query(&self, collection: &str, query: Query) -> AppResult<Vec<Document>> {
            self.inner.query(collection, query).await
        }
    }

    #[actix_web::test]
    async fn new_group_has_a_single_welcome_message() {
        let store = MemoryStore::new();
        add_profile(&store, "ada").await;

        let id = create_group(&store, "Algebra", "linear maps", "ada", "Ada").await.unwrap();

        let messages = list_group_messages(&store, &id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].text.contains("Algebra"));
        assert_eq!(messages[0].sender_id, SYSTEM_SENDER_ID);
        assert_eq!(messages[0].sender_name, SYSTEM_SENDER_NAME);

        let group = load_group(&store, &id).await.unwrap();
        assert_eq!(group.members, vec!["ada"]);
        assert_eq!(group.member_names.get("ada").map(String::as_str), Some("Ada"));
        assert_eq!(joined_groups(&store, "ada").await, vec![id]);
    }

    #[actix_web::test]
    async fn blank_group_names_are_rejected() {
        let store = MemoryStore::new();
        let err = create_group(&store, "  ", "", "ada", "Ada").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(list_groups(&store).await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn joining_updates_both_sides_of_membership() {
        let store = MemoryStore::new();
        add_profile(&store, "ada").await;
        add_profile(&store, "bob").await;
        let id = create_group(&store, "Physics", "", "ada", "Ada").await.unwrap();

        join_study_group(&store, &id, "bob", "Bob").await.unwrap();

        let mine = list_user_groups(&store, "bob").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, id);
        let group = load_group(&store, &id).await.unwrap();
        assert!(group.members.contains(&"bob".to_string()));
        assert_eq!(group.member_names.get("bob").map(String::as_str), Some("Bob"));
        assert_eq!(joined_groups(&store, "bob").await, vec![id.clone()]);

        let messages = list_group_messages(&store, &id).await.unwrap();
        assert_eq!(messages.last().map(|m| m.text.as_str()), Some("Bob joined the group"));
    }

    #[actix_web::test]
    async fn joining_twice_fails_and_keeps_one_membership() {
        let store = MemoryStore::new();
        add_profile(&store, "ada").await;
        add_profile(&store, "bob").await;
        let id = create_group(&store, "Physics", "", "ada", "Ada").await.unwrap();

        join_study_group(&store, &id, "bob", "Bob").await.unwrap();
        let second = join_study_group(&store, &id, "bob", "Bob").await;
        assert_eq!(second, Err(AppError::AlreadyMember));

        let group = load_group(&store, &id).await.unwrap();
        assert_eq!(group.members.iter().filter(|m| *m == "bob").count(), 1);

        // the creator is already a member as well
        assert_eq!(
            join_study_group(&store, &id, "ada", "Ada").await,
            Err(AppError::AlreadyMember)
        );
    }

    #[actix_web::test]
    async fn joining_a_missing_group_is_not_found() {
        let store = MemoryStore::new();
        let err = join_study_group(&store, "nope", "bob", "Bob").await.unwrap_err();
        assert_eq!(err, AppError::NotFound("Group not found".into()));
    }

    #[actix_web::test]
    async fn groups_are_listed_newest_first() {
        let store = MemoryStore::new();
        add_profile(&store, "ada").await;
        add_profile(&store, "bob").await;
        let first = create_group(&store, "First", "", "ada", "Ada").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = create_group(&store, "Second", "", "bob", "Bob").await.unwrap();

        let all: Vec<String> = list_groups(&store).await.unwrap().into_iter().map(|g| g.id).collect();
        assert_eq!(all, vec![second.clone(), first.clone()]);

        let adas: Vec<String> = list_user_groups(&store, "ada")
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.id)
            .collect();
        assert_eq!(adas, vec![first]);
    }

    #[actix_web::test]
    async fn messages_come_back_oldest_first_and_bump_activity() {
        let store = MemoryStore::new();
        add_profile(&store, "ada").await;
        let id = create_group(&store, "Chem", "", "ada", "Ada").await.unwrap();
        let before = load_group(&store, &id).await.unwrap().updated_at;

        tokio::time::sleep(Duration::from_millis(5)).await;
        send_message(&store, &id, "ada", "Ada", text("first")).await.unwrap();
        let file = NewMessage {
            text: String::new(),
            kind: MessageKind::File,
            file_url: Some("https://files.example.com/notes.pdf".to_string()),
            file_name: Some("notes.pdf".to_string()),
        };
        send_message(&store, &id, "ada", "Ada", file).await.unwrap();

        let messages = list_group_messages(&store, &id).await.unwrap();
        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts.len(), 3);
        assert_eq!(texts[1], "first");
        assert_eq!(messages[2].kind, MessageKind::File);
        assert_eq!(messages[2].file_name.as_deref(), Some("notes.pdf"));

        let after = load_group(&store, &id).await.unwrap().updated_at;
        assert!(after.timestamp_millis() > before.timestamp_millis());
    }

    #[actix_web::test]
    async fn non_members_may_post_but_not_blank_text() {
        let store = MemoryStore::new();
        add_profile(&store, "ada").await;
        let id = create_group(&store, "Chem", "", "ada", "Ada").await.unwrap();

        send_message(&store, &id, "stranger", "Stranger", text("hi")).await.unwrap();
        let err = send_message(&store, &id, "ada", "Ada", text("   ")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[actix_web::test]
    async fn message_to_vanished_group_is_stored_then_reported() {
        let store = MemoryStore::new();
        let err = send_message(&store, "gone", "ada", "Ada", text("hello?")).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(list_group_messages(&store, "gone").await.unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn only_the_creator_may_delete() {
        let store = MemoryStore::new();
        add_profile(&store, "ada").await;
        add_profile(&store, "bob").await;
        let id = create_group(&store, "Bio", "", "ada", "Ada").await.unwrap();
        join_study_group(&store, &id, "bob", "Bob").await.unwrap();

        let err = delete_group(&store, &id, "bob").await.unwrap_err();
        assert!(matches!(err, AppError::Permission(_)));
        assert!(load_group(&store, &id).await.is_ok());
        assert_eq!(list_group_messages(&store, &id).await.unwrap().len(), 2);
    }

    #[actix_web::test]
    async fn deleting_cascades_to_messages_and_members() {
        let store = MemoryStore::new();
        add_profile(&store, "ada").await;
        add_profile(&store, "bob").await;
        let id = create_group(&store, "Bio", "", "ada", "Ada").await.unwrap();
        let other = create_group(&store, "Other", "", "bob", "Bob").await.unwrap();
        join_study_group(&store, &id, "bob", "Bob").await.unwrap();
        send_message(&store, &id, "bob", "Bob", text("hello")).await.unwrap();

        delete_group(&store, &id, "ada").await.unwrap();

        assert!(list_group_messages(&store, &id).await.unwrap().is_empty());
        assert!(list_groups(&store).await.unwrap().iter().all(|g| g.id != id));
        assert!(joined_groups(&store, "ada").await.is_empty());
        assert_eq!(joined_groups(&store, "bob").await, vec![other.clone()]);
        assert_eq!(list_group_messages(&store, &other).await.unwrap().len(), 1);

        let err = delete_group(&store, &id, "ada").await.unwrap_err();
        assert_eq!(err, AppError::NotFound("Group not found".into()));
    }

    #[actix_web::test]
    async fn create_without_profile_leaves_partial_state() {
        let store = MemoryStore::new();

        let err = create_group(&store, "Orphan", "", "ghost", "Ghost").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let groups = list_groups(&store).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(list_group_messages(&store, &groups[0].id).await.unwrap().len(), 1);
        assert!(list_user_groups(&store, "ghost").await.unwrap().len() == 1);
    }

    #[actix_web::test]
    async fn join_failure_after_member_write_diverges() {
        let mut store = FlakyStore::new();
        add_profile(&store, "ada").await;
        add_profile(&store, "bob").await;
        let id = create_group(&store, "Geo", "", "ada", "Ada").await.unwrap();

        store.fail_update_in = Some(USERS);
        let err = join_study_group(&store, &id, "bob", "Bob").await.unwrap_err();
        assert!(matches!(err, AppError::RemoteWrite(_)));

        // the group lists bob, bob's profile does not list the group
        let group = load_group(&store, &id).await.unwrap();
        assert!(group.members.contains(&"bob".to_string()));
        assert!(joined_groups(&store, "bob").await.is_empty());
    }

    #[actix_web::test]
    async fn member_cleanup_continues_past_a_deleted_profile() {
        let store = MemoryStore::new();
        for uid in ["ada", "bob", "cy"] {
            add_profile(&store, uid).await;
        }
        let id = create_group(&store, "Stats", "", "ada", "Ada").await.unwrap();
        join_study_group(&store, &id, "bob", "Bob").await.unwrap();
        join_study_group(&store, &id, "cy", "Cy").await.unwrap();
        store.delete(USERS, "bob").await.unwrap();

        let err = delete_group(&store, &id, "ada").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        assert!(load_group(&store, &id).await.is_err());
        assert!(list_group_messages(&store, &id).await.unwrap().is_empty());
        assert!(joined_groups(&store, "ada").await.is_empty());
        assert!(joined_groups(&store, "cy").await.is_empty());
    }

    #[actix_web::test]
    async fn failed_message_cascade_keeps_group() {
        let mut store = FlakyStore::new();
        add_profile(&store, "ada").await;
        let id = create_group(&store, "Geo", "", "ada", "Ada").await.unwrap();
        send_message(&store, &id, "ada", "Ada", text("one")).await.unwrap();

        store.fail_message_deletes = true;
        let err = delete_group(&store, &id, "ada").await.unwrap_err();
        assert!(matches!(err, AppError::RemoteWrite(_)));

        assert!(load_group(&store, &id).await.is_ok());
        assert_eq!(joined_groups(&store, "ada").await, vec![id]);
    }
}
